//! Outbound chat messages about orders.
//!
//! Every send is best-effort: a recipient that cannot be reached is logged and
//! skipped, and nothing here ever fails or rolls back the state change that
//! triggered the message.

use std::collections::BTreeSet;
use std::sync::Arc;

use actix::Addr;
use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;

use crate::services::db_models::Order;
use crate::services::db_utils::{ask, DbActor};
use crate::services::messages::FetchRecipients;
use crate::types::{OrderStatus, OrderType, Role};

pub mod telegram;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat api rejected the request: {0}")]
    Api(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Used when no bot token is configured: messages only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        tracing::info!(chat_id, text, "notification (no chat transport configured)");
        Ok(())
    }
}

pub fn customer_text(order: &Order, status: OrderStatus) -> String {
    let id = order.id;
    match status {
        OrderStatus::Pending => format!("📝 Your order #{id} has been received. Please wait for confirmation."),
        OrderStatus::Accepted => format!("✅ Your order #{id} has been accepted by a courier!"),
        OrderStatus::Cooking => format!("🍳 Your order #{id} is being prepared!"),
        OrderStatus::OnDelivery => format!("🚚 Your order #{id} is on its way!"),
        OrderStatus::Delivered => match order.order_type {
            OrderType::Delivery => format!("🎉 Your order #{id} has been delivered! Thank you!"),
            OrderType::Pickup => format!("🍽 Your order #{id} is ready for pickup! Come by the restaurant."),
        },
        OrderStatus::Failed => format!("⚠️ Your order #{id} could not be completed. Please contact us."),
    }
}

pub fn staff_status_text(order: &Order) -> String {
    format!("Order #{} ({})\nStatus: {}", order.id, order.order_type, order.status)
}

pub fn staff_new_order_text(order: &Order, currency: &str) -> String {
    format!(
        "New order #{}\nType: {}\nCustomer: {}\nAddress: {}\nDishes: {}\nTotal: {:.2} {}\nStatus: {}",
        order.id,
        order.order_type,
        order.user_id,
        order.address,
        order.items_line(),
        order.total,
        currency,
        order.status
    )
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Addr<DbActor>,
    notifier: Arc<dyn Notifier>,
    admin_id: Option<i64>,
    currency: String,
}

impl Dispatcher {
    pub fn new(
        db: Addr<DbActor>,
        notifier: Arc<dyn Notifier>,
        admin_id: Option<i64>,
        currency: impl Into<String>,
    ) -> Self {
        Dispatcher { db, notifier, admin_id, currency: currency.into() }
    }

    async fn deliver(&self, chat_id: i64, text: &str) -> bool {
        match self.notifier.send(chat_id, text).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(chat_id, error = %err, "notification not delivered");
                false
            }
        }
    }

    /// Resolves everyone holding `role`. The configured administrator always
    /// counts as an admin recipient.
    async fn recipients(&self, role: Role) -> Vec<i64> {
        let mut ids: BTreeSet<i64> = match ask(&self.db, FetchRecipients(role)).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                tracing::warn!(%role, error = %err, "unable to resolve notification recipients");
                BTreeSet::new()
            }
        };

        if role == Role::Admin {
            ids.extend(self.admin_id);
        }

        ids.into_iter().collect()
    }

    async fn broadcast(&self, recipients: &[i64], text: &str) -> usize {
        let results = join_all(recipients.iter().map(|chat_id| self.deliver(*chat_id, text))).await;
        results.into_iter().filter(|delivered| *delivered).count()
    }

    pub async fn notify_customer(&self, order: &Order, status: OrderStatus) -> bool {
        // orders paid through the web checkout may carry no account
        if order.user_id <= 0 {
            return false;
        }
        self.deliver(order.user_id, &customer_text(order, status)).await
    }

    /// Returns how many recipients were reached.
    pub async fn notify_role(&self, role: Role, text: &str) -> usize {
        let recipients = self.recipients(role).await;
        self.broadcast(&recipients, text).await
    }

    /// Fans out staff text to couriers and admins, sending at most once to an account holding both roles.
    async fn notify_staff(&self, text: &str) -> usize {
        let mut staff: BTreeSet<i64> = self.recipients(Role::Courier).await.into_iter().collect();
        staff.extend(self.recipients(Role::Admin).await);
        let staff: Vec<i64> = staff.into_iter().collect();

        self.broadcast(&staff, text).await
    }

    pub async fn announce_status(&self, order: &Order) {
        let customer_reached = self.notify_customer(order, order.status).await;
        let staff_reached = self.notify_staff(&staff_status_text(order)).await;

        tracing::debug!(
            order_id = order.id,
            status = %order.status,
            customer_reached,
            staff_reached,
            "status announced"
        );
    }

    pub async fn announce_new_order(&self, order: &Order) {
        let staff_reached = self.notify_staff(&staff_new_order_text(order, &self.currency)).await;

        tracing::debug!(order_id = order.id, staff_reached, "new order announced");
    }
}
