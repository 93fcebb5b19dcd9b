use actix::Handler;
use chrono::{Local, Utc};
use diesel::sql_types::{BigInt, Integer};
use diesel::{
    r2d2::{ConnectionManager, Pool, PooledConnection},
    result::{DatabaseErrorKind, Error},
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, QueryResult,
    QueryableByName, RunQueryDsl, SqliteConnection,
};

use crate::lifecycle::rules;
use crate::services::db_models::{AdminClaim, Dish, Order, OrderRow, PromoCheck, PromoCode, Promotion, User};
use crate::services::db_utils::DbActor;
use crate::services::insertable::{NewOrder, NewUser};
use crate::services::messages::{
    AddRole, AdminCandidate, ApplyTransition, ClaimAdmin, CreateDish, CreateOrder, CreatePromo,
    CreatePromotion, DeleteDish, DeletePromo, DeletePromotion, FetchDishes, FetchOrder,
    FetchPendingOrders, FetchPickupCandidates, FetchPromos, FetchPromotions, FetchRecipients,
    FetchStaleOrders, FetchUser, FetchUserOrders, MarkPaid, RedeemPromo, TouchNotified,
    TouchPickupNotified, UpsertUser, ValidatePromo,
};
use crate::types::{OrderStatus, OrderType, Role};

fn establish_connection(
    pool: &Pool<ConnectionManager<SqliteConnection>>,
) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Error> {
    match pool.get() {
        Ok(val) => Ok(val),
        Err(err) => {
            tracing::error!(error = %err, "unable to check out a store connection");
            Err(connection_err())
        }
    }
}

fn connection_err() -> Error {
    Error::DatabaseError(
        DatabaseErrorKind::ClosedConnection,
        Box::new("Failed to establish connection".to_owned()),
    )
}

fn decode_orders(rows: Vec<OrderRow>) -> QueryResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

fn load_order(conn: &mut SqliteConnection, order_id: i64) -> QueryResult<Option<Order>> {
    use crate::schema::orders::dsl::orders;

    orders
        .find(order_id)
        .first::<OrderRow>(conn)
        .optional()?
        .map(Order::try_from)
        .transpose()
}

fn load_user(conn: &mut SqliteConnection, id: i64) -> QueryResult<Option<User>> {
    use crate::schema::users::dsl::users;

    users.find(id).first::<User>(conn).optional()
}

#[derive(QueryableByName)]
struct Recipient {
    #[diesel(sql_type = BigInt)]
    telegram_id: i64,
}

impl Handler<UpsertUser> for DbActor {
    type Result = QueryResult<User>;

    fn handle(&mut self, msg: UpsertUser, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::users::{dsl::users, telegram_id, username};

        let mut conn = establish_connection(&self.0)?;

        conn.immediate_transaction(|trx_conn| {
            diesel::insert_or_ignore_into(users)
                .values(NewUser {
                    telegram_id: msg.telegram_id,
                    username: None,
                    roles: Role::User.bit(),
                })
                .execute(trx_conn)?;

            if let Some(name) = msg.username.filter(|name| !name.is_empty()) {
                // telegram usernames move between accounts; the newest holder wins
                diesel::update(users.filter(username.eq(&name)).filter(telegram_id.ne(msg.telegram_id)))
                    .set(username.eq(None::<String>))
                    .execute(trx_conn)?;
                diesel::update(users.find(msg.telegram_id))
                    .set(username.eq(Some(name)))
                    .execute(trx_conn)?;
            }

            users.find(msg.telegram_id).first::<User>(trx_conn)
        })
    }
}

impl Handler<FetchUser> for DbActor {
    type Result = QueryResult<Option<User>>;

    fn handle(&mut self, msg: FetchUser, _ctx: &mut Self::Context) -> Self::Result {
        let mut conn = establish_connection(&self.0)?;

        load_user(&mut conn, msg.0)
    }
}

impl Handler<AddRole> for DbActor {
    type Result = QueryResult<bool>;

    fn handle(&mut self, msg: AddRole, _ctx: &mut Self::Context) -> Self::Result {
        let mut conn = establish_connection(&self.0)?;

        let updated = diesel::sql_query("UPDATE users SET roles = roles | ? WHERE telegram_id = ?")
            .bind::<Integer, _>(msg.role.bit())
            .bind::<BigInt, _>(msg.telegram_id)
            .execute(&mut conn)?;

        Ok(updated > 0)
    }
}

impl Handler<ClaimAdmin> for DbActor {
    type Result = QueryResult<AdminClaim>;

    fn handle(&mut self, msg: ClaimAdmin, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::users::{dsl::users, username};

        let admin_bit = Role::Admin.bit();
        let mut conn = establish_connection(&self.0)?;

        conn.immediate_transaction(|trx_conn| {
            // the uniqueness guard and the grant are one statement
            let granted = match &msg.0 {
                AdminCandidate::TelegramId(id) => diesel::sql_query(
                    "UPDATE users SET roles = roles | ? WHERE telegram_id = ? \
                     AND NOT EXISTS (SELECT 1 FROM users WHERE roles & ? <> 0)",
                )
                .bind::<Integer, _>(admin_bit)
                .bind::<BigInt, _>(*id)
                .bind::<Integer, _>(admin_bit)
                .execute(trx_conn)?,
                AdminCandidate::Username(name) => diesel::sql_query(
                    "UPDATE users SET roles = roles | ? WHERE username = ? \
                     AND NOT EXISTS (SELECT 1 FROM users WHERE roles & ? <> 0)",
                )
                .bind::<Integer, _>(admin_bit)
                .bind::<diesel::sql_types::Text, _>(name)
                .bind::<Integer, _>(admin_bit)
                .execute(trx_conn)?,
            };

            if granted > 0 {
                return Ok(AdminClaim::Granted);
            }

            let known = match &msg.0 {
                AdminCandidate::TelegramId(id) => load_user(trx_conn, *id)?.is_some(),
                AdminCandidate::Username(name) => users
                    .filter(username.eq(name))
                    .first::<User>(trx_conn)
                    .optional()?
                    .is_some(),
            };

            Ok(if known { AdminClaim::AlreadyTaken } else { AdminClaim::UnknownUser })
        })
    }
}

impl Handler<FetchRecipients> for DbActor {
    type Result = QueryResult<Vec<i64>>;

    fn handle(&mut self, msg: FetchRecipients, _ctx: &mut Self::Context) -> Self::Result {
        let mut conn = establish_connection(&self.0)?;

        let rows = diesel::sql_query("SELECT telegram_id FROM users WHERE roles & ? <> 0 ORDER BY telegram_id")
            .bind::<Integer, _>(msg.0.bit())
            .load::<Recipient>(&mut conn)?;

        Ok(rows.into_iter().map(|row| row.telegram_id).collect())
    }
}

impl Handler<FetchDishes> for DbActor {
    type Result = QueryResult<Vec<Dish>>;

    fn handle(&mut self, msg: FetchDishes, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::dishes::{category, dsl::dishes, id};

        let mut conn = establish_connection(&self.0)?;

        match msg.category {
            Some(cat) => dishes.filter(category.eq(cat)).order(id.asc()).get_results::<Dish>(&mut conn),
            None => dishes.order(id.asc()).get_results::<Dish>(&mut conn),
        }
    }
}

impl Handler<CreateDish> for DbActor {
    type Result = QueryResult<Dish>;

    fn handle(&mut self, msg: CreateDish, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::dishes::dsl::dishes;

        let mut conn = establish_connection(&self.0)?;

        diesel::insert_into(dishes).values(msg.0).get_result::<Dish>(&mut conn)
    }
}

impl Handler<DeleteDish> for DbActor {
    type Result = QueryResult<Option<Dish>>;

    fn handle(&mut self, msg: DeleteDish, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::dishes::dsl::dishes;

        let mut conn = establish_connection(&self.0)?;

        conn.immediate_transaction(|trx_conn| {
            let Some(dish) = dishes.find(msg.0).first::<Dish>(trx_conn).optional()? else {
                return Ok(None);
            };
            diesel::delete(dishes.find(msg.0)).execute(trx_conn)?;

            Ok(Some(dish))
        })
    }
}

impl Handler<FetchPromotions> for DbActor {
    type Result = QueryResult<Vec<Promotion>>;

    fn handle(&mut self, _msg: FetchPromotions, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promotions::{dsl::promotions, id};

        let mut conn = establish_connection(&self.0)?;

        promotions.order(id.asc()).get_results::<Promotion>(&mut conn)
    }
}

impl Handler<CreatePromotion> for DbActor {
    type Result = QueryResult<Promotion>;

    fn handle(&mut self, msg: CreatePromotion, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promotions::dsl::promotions;

        let mut conn = establish_connection(&self.0)?;

        diesel::insert_into(promotions).values(msg.0).get_result::<Promotion>(&mut conn)
    }
}

impl Handler<DeletePromotion> for DbActor {
    type Result = QueryResult<bool>;

    fn handle(&mut self, msg: DeletePromotion, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promotions::dsl::promotions;

        let mut conn = establish_connection(&self.0)?;

        Ok(diesel::delete(promotions.find(msg.0)).execute(&mut conn)? > 0)
    }
}

impl Handler<CreatePromo> for DbActor {
    type Result = QueryResult<PromoCode>;

    fn handle(&mut self, msg: CreatePromo, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promo_codes::dsl::promo_codes;

        let mut conn = establish_connection(&self.0)?;

        diesel::insert_into(promo_codes).values(msg.0).get_result::<PromoCode>(&mut conn)
    }
}

impl Handler<FetchPromos> for DbActor {
    type Result = QueryResult<Vec<PromoCode>>;

    fn handle(&mut self, _msg: FetchPromos, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promo_codes::{created_at, dsl::promo_codes, id};

        let mut conn = establish_connection(&self.0)?;

        promo_codes
            .order((created_at.desc(), id.desc()))
            .get_results::<PromoCode>(&mut conn)
    }
}

impl Handler<DeletePromo> for DbActor {
    type Result = QueryResult<bool>;

    fn handle(&mut self, msg: DeletePromo, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promo_codes::dsl::promo_codes;

        let mut conn = establish_connection(&self.0)?;

        Ok(diesel::delete(promo_codes.find(msg.0)).execute(&mut conn)? > 0)
    }
}

impl Handler<ValidatePromo> for DbActor {
    type Result = QueryResult<PromoCheck>;

    fn handle(&mut self, msg: ValidatePromo, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promo_codes::{code, dsl::promo_codes};

        let mut conn = establish_connection(&self.0)?;
        let today = Local::now().date_naive();

        let check = match promo_codes.filter(code.eq(&msg.0)).first::<PromoCode>(&mut conn).optional()? {
            Some(promo) => PromoCheck { valid: promo.is_redeemable(today), discount: Some(promo.discount_percent) },
            None => PromoCheck { valid: false, discount: None },
        };

        Ok(check)
    }
}

impl Handler<RedeemPromo> for DbActor {
    type Result = QueryResult<Option<f64>>;

    fn handle(&mut self, msg: RedeemPromo, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::promo_codes::{
            code, discount_percent, dsl::promo_codes, expires_at, is_active, max_uses, uses,
        };

        let mut conn = establish_connection(&self.0)?;
        let today = Local::now().date_naive();

        conn.immediate_transaction(|trx_conn| {
            // the redeemability predicate is re-checked by the UPDATE itself
            let taken = diesel::update(
                promo_codes
                    .filter(code.eq(&msg.0))
                    .filter(is_active.eq(true))
                    .filter(uses.lt(max_uses))
                    .filter(expires_at.is_null().or(expires_at.ge(today))),
            )
            .set(uses.eq(uses + 1))
            .execute(trx_conn)?;

            if taken == 0 {
                return Ok(None);
            }

            promo_codes
                .filter(code.eq(&msg.0))
                .select(discount_percent)
                .first::<f64>(trx_conn)
                .map(Some)
        })
    }
}

impl Handler<CreateOrder> for DbActor {
    type Result = QueryResult<Order>;

    fn handle(&mut self, msg: CreateOrder, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::dsl::orders;

        let draft = msg.0;
        let items = serde_json::to_string(&draft.items).map_err(|err| Error::SerializationError(Box::new(err)))?;
        let mut conn = establish_connection(&self.0)?;

        let row = diesel::insert_into(orders)
            .values(NewOrder {
                user_id: draft.user_id,
                items,
                address: draft.address.clone(),
                total: draft.resolved_total(),
                status: OrderStatus::Pending.as_str().to_owned(),
                order_type: draft.order_type.as_str().to_owned(),
                payment_provider: draft.payment_provider,
                payment_id: draft.payment_id,
                created_at: Utc::now().naive_utc(),
            })
            .get_result::<OrderRow>(&mut conn)?;

        Order::try_from(row)
    }
}

impl Handler<FetchOrder> for DbActor {
    type Result = QueryResult<Option<Order>>;

    fn handle(&mut self, msg: FetchOrder, _ctx: &mut Self::Context) -> Self::Result {
        let mut conn = establish_connection(&self.0)?;

        load_order(&mut conn, msg.0)
    }
}

impl Handler<FetchUserOrders> for DbActor {
    type Result = QueryResult<Vec<Order>>;

    fn handle(&mut self, msg: FetchUserOrders, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, id, user_id};

        let mut conn = establish_connection(&self.0)?;

        let rows = orders
            .filter(user_id.eq(msg.0))
            .order(id.desc())
            .get_results::<OrderRow>(&mut conn)?;

        decode_orders(rows)
    }
}

impl Handler<FetchPendingOrders> for DbActor {
    type Result = QueryResult<Vec<Order>>;

    fn handle(&mut self, _msg: FetchPendingOrders, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, id, status};

        let mut conn = establish_connection(&self.0)?;

        let rows = orders
            .filter(status.eq(OrderStatus::Pending.as_str()))
            .order(id.asc())
            .get_results::<OrderRow>(&mut conn)?;

        decode_orders(rows)
    }
}

impl Handler<ApplyTransition> for DbActor {
    type Result = QueryResult<Option<Order>>;

    fn handle(&mut self, msg: ApplyTransition, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{courier_id, dsl::orders, notified_at, status};

        let mut conn = establish_connection(&self.0)?;

        // BEGIN IMMEDIATE takes the write lock up front, so the status read below
        // cannot go stale before the update lands
        conn.immediate_transaction(|trx_conn| {
            let Some(current) = load_order(trx_conn, msg.order_id)? else {
                return Ok(None);
            };

            if !rules::is_edge(current.status, msg.to, current.order_type) {
                return Ok(None);
            }

            let moved = diesel::update(orders.find(msg.order_id).filter(status.eq(current.status.as_str())))
                .set((status.eq(msg.to.as_str()), notified_at.eq(Some(Utc::now().naive_utc()))))
                .execute(trx_conn)?;

            if moved == 0 {
                return Ok(None);
            }

            if let Some(courier) = msg.courier_id {
                diesel::update(orders.find(msg.order_id).filter(courier_id.is_null()))
                    .set(courier_id.eq(Some(courier)))
                    .execute(trx_conn)?;
            }

            load_order(trx_conn, msg.order_id)
        })
    }
}

impl Handler<MarkPaid> for DbActor {
    type Result = QueryResult<usize>;

    fn handle(&mut self, msg: MarkPaid, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, paid_at, payment_id};

        let mut conn = establish_connection(&self.0)?;

        diesel::update(orders.filter(payment_id.eq(&msg.0)).filter(paid_at.is_null()))
            .set(paid_at.eq(Some(Utc::now().naive_utc())))
            .execute(&mut conn)
    }
}

impl Handler<FetchStaleOrders> for DbActor {
    type Result = QueryResult<Vec<Order>>;

    fn handle(&mut self, msg: FetchStaleOrders, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, id, notified_at, status};

        let mut conn = establish_connection(&self.0)?;

        let rows = orders
            .filter(status.eq_any(OrderStatus::NON_TERMINAL.map(|s| s.as_str())))
            .filter(notified_at.is_null().or(notified_at.lt(msg.cutoff)))
            .order(id.asc())
            .get_results::<OrderRow>(&mut conn)?;

        decode_orders(rows)
    }
}

impl Handler<TouchNotified> for DbActor {
    type Result = QueryResult<()>;

    fn handle(&mut self, msg: TouchNotified, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, notified_at};

        let mut conn = establish_connection(&self.0)?;

        diesel::update(orders.find(msg.0))
            .set(notified_at.eq(Some(Utc::now().naive_utc())))
            .execute(&mut conn)?;

        Ok(())
    }
}

impl Handler<FetchPickupCandidates> for DbActor {
    type Result = QueryResult<Vec<Order>>;

    fn handle(&mut self, msg: FetchPickupCandidates, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, id, order_type, pickup_notified_at, status};

        let mut conn = establish_connection(&self.0)?;

        let rows = orders
            .filter(status.eq(OrderStatus::Cooking.as_str()))
            .filter(order_type.eq(OrderType::Pickup.as_str()))
            .filter(pickup_notified_at.is_null().or(pickup_notified_at.lt(msg.cutoff)))
            .order(id.asc())
            .get_results::<OrderRow>(&mut conn)?;

        decode_orders(rows)
    }
}

impl Handler<TouchPickupNotified> for DbActor {
    type Result = QueryResult<()>;

    fn handle(&mut self, msg: TouchPickupNotified, _ctx: &mut Self::Context) -> Self::Result {
        use crate::schema::orders::{dsl::orders, pickup_notified_at};

        let mut conn = establish_connection(&self.0)?;

        diesel::update(orders.find(msg.0))
            .set(pickup_notified_at.eq(Some(Utc::now().naive_utc())))
            .execute(&mut conn)?;

        Ok(())
    }
}
