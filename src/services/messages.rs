use actix::Message;
use chrono::NaiveDateTime;
use diesel::QueryResult;

use crate::services::db_models::{AdminClaim, Dish, Order, PromoCheck, PromoCode, Promotion, User};
use crate::services::insertable::{NewDish, NewPromoCode, NewPromotion};
use crate::types::{OrderDraft, OrderStatus, Role};

// users

#[derive(Message)]
#[rtype(result = "QueryResult<User>")]
pub struct UpsertUser {
    pub telegram_id: i64,
    pub username: Option<String>,
}

#[derive(Message)]
#[rtype(result = "QueryResult<Option<User>>")]
pub struct FetchUser(pub i64);

/// Adds a role to an existing account; resolves to `false` when the account is unknown.
#[derive(Message)]
#[rtype(result = "QueryResult<bool>")]
pub struct AddRole {
    pub telegram_id: i64,
    pub role: Role,
}

pub enum AdminCandidate {
    TelegramId(i64),
    Username(String),
}

#[derive(Message)]
#[rtype(result = "QueryResult<AdminClaim>")]
pub struct ClaimAdmin(pub AdminCandidate);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<i64>>")]
pub struct FetchRecipients(pub Role);

// catalog

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Dish>>")]
pub struct FetchDishes {
    pub category: Option<String>,
}

#[derive(Message)]
#[rtype(result = "QueryResult<Dish>")]
pub struct CreateDish(pub NewDish);

/// Resolves to the removed dish so its stored image can be cleaned up.
#[derive(Message)]
#[rtype(result = "QueryResult<Option<Dish>>")]
pub struct DeleteDish(pub i64);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Promotion>>")]
pub struct FetchPromotions;

#[derive(Message)]
#[rtype(result = "QueryResult<Promotion>")]
pub struct CreatePromotion(pub NewPromotion);

#[derive(Message)]
#[rtype(result = "QueryResult<bool>")]
pub struct DeletePromotion(pub i64);

// promo codes

#[derive(Message)]
#[rtype(result = "QueryResult<PromoCode>")]
pub struct CreatePromo(pub NewPromoCode);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<PromoCode>>")]
pub struct FetchPromos;

#[derive(Message)]
#[rtype(result = "QueryResult<bool>")]
pub struct DeletePromo(pub i64);

#[derive(Message)]
#[rtype(result = "QueryResult<PromoCheck>")]
pub struct ValidatePromo(pub String);

/// Consumes one use of a code; resolves to its discount when a use was actually taken.
#[derive(Message)]
#[rtype(result = "QueryResult<Option<f64>>")]
pub struct RedeemPromo(pub String);

// orders

#[derive(Message)]
#[rtype(result = "QueryResult<Order>")]
pub struct CreateOrder(pub OrderDraft);

#[derive(Message)]
#[rtype(result = "QueryResult<Option<Order>>")]
pub struct FetchOrder(pub i64);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Order>>")]
pub struct FetchUserOrders(pub i64);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Order>>")]
pub struct FetchPendingOrders;

/// Moves an order along one lifecycle edge. Resolves to `None` when the order is
/// missing or the edge is not legal from the status found at mutation time.
#[derive(Message)]
#[rtype(result = "QueryResult<Option<Order>>")]
pub struct ApplyTransition {
    pub order_id: i64,
    pub to: OrderStatus,
    pub courier_id: Option<i64>,
}

#[derive(Message)]
#[rtype(result = "QueryResult<usize>")]
pub struct MarkPaid(pub String);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Order>>")]
pub struct FetchStaleOrders {
    pub cutoff: NaiveDateTime,
}

#[derive(Message)]
#[rtype(result = "QueryResult<()>")]
pub struct TouchNotified(pub i64);

#[derive(Message)]
#[rtype(result = "QueryResult<Vec<Order>>")]
pub struct FetchPickupCandidates {
    pub cutoff: NaiveDateTime,
}

#[derive(Message)]
#[rtype(result = "QueryResult<()>")]
pub struct TouchPickupNotified(pub i64);
