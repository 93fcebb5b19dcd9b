//! Order lifecycle: the single entry point every actor (REST, chat bot,
//! schedulers) goes through to move an order.

use actix::Addr;

use crate::error::AppError;
use crate::notify::Dispatcher;
use crate::services::db_models::Order;
use crate::services::db_utils::{ask, DbActor};
use crate::services::messages::{ApplyTransition, CreateOrder, FetchUser};
use crate::types::{OrderDraft, OrderStatus, Role, RoleSet};

pub mod rules;

pub use rules::Caller;

#[derive(Clone)]
pub struct OrderLifecycle {
    db: Addr<DbActor>,
    dispatcher: Dispatcher,
    admin_id: Option<i64>,
}

impl OrderLifecycle {
    pub fn new(db: Addr<DbActor>, dispatcher: Dispatcher, admin_id: Option<i64>) -> Self {
        OrderLifecycle { db, dispatcher, admin_id }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Roles are read fresh from the store on every call; the configured
    /// administrator id is admin whether or not it has a row.
    pub async fn resolve_caller(&self, telegram_id: i64) -> Result<Caller, AppError> {
        let mut roles = ask(&self.db, FetchUser(telegram_id))
            .await?
            .map(|user| user.roles)
            .unwrap_or_else(RoleSet::user);

        if self.admin_id == Some(telegram_id) {
            roles = roles.with(Role::Admin);
        }

        Ok(Caller { telegram_id, roles })
    }

    pub async fn is_admin(&self, telegram_id: i64) -> Result<bool, AppError> {
        Ok(self.resolve_caller(telegram_id).await?.is_admin())
    }

    /// Moves `order_id` to `to` on behalf of `caller`.
    ///
    /// `Ok(None)` means the order does not exist or `to` is not reachable from
    /// its current status; that is an expected outcome, not a fault. On success
    /// the customer, couriers and admins are notified after the change is
    /// committed.
    pub async fn transition(&self, order_id: i64, to: OrderStatus, caller: &Caller) -> Result<Option<Order>, AppError> {
        rules::authorize(caller, to)?;

        // a courier accepting an order takes ownership of it
        let courier_id = (to == OrderStatus::Accepted && caller.is_courier()).then_some(caller.telegram_id);

        let updated = ask(&self.db, ApplyTransition { order_id, to, courier_id }).await?;

        match &updated {
            Some(order) => {
                tracing::info!(order_id, status = %to, by = caller.telegram_id, "order status updated");
                self.dispatcher.announce_status(order).await;
            }
            None => tracing::info!(order_id, status = %to, by = caller.telegram_id, "transition rejected"),
        }

        Ok(updated)
    }

    /// Same as [`transition`](Self::transition) for a caller known only by id;
    /// a missing id is rejected before anything else is looked at.
    pub async fn transition_as(
        &self,
        order_id: i64,
        to: OrderStatus,
        telegram_id: Option<i64>,
    ) -> Result<Option<Order>, AppError> {
        let telegram_id = telegram_id.ok_or(AppError::Unauthorized)?;
        let caller = self.resolve_caller(telegram_id).await?;

        self.transition(order_id, to, &caller).await
    }

    pub async fn place_order(&self, draft: OrderDraft) -> Result<Order, AppError> {
        let order = ask(&self.db, CreateOrder(draft)).await?;
        tracing::info!(
            order_id = order.id,
            user_id = order.user_id,
            order_type = %order.order_type,
            total = order.total,
            "order placed"
        );

        self.dispatcher.announce_new_order(&order).await;

        Ok(order)
    }
}
