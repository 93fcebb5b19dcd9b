use chrono::{NaiveDate, NaiveDateTime};
use diesel::result::Error;
use diesel::{Queryable, QueryResult};
use serde::Serialize;

use crate::types::{OrderItem, OrderStatus, OrderType, RoleSet};

#[derive(Queryable, Debug, Clone, Serialize)]
pub struct User {
    pub telegram_id: i64,
    pub username: Option<String>,
    #[diesel(deserialize_as = i32)]
    #[serde(rename = "role")]
    pub roles: RoleSet,
}

#[derive(Queryable, Debug, Clone, Serialize)]
pub struct Dish {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: String,
}

#[derive(Queryable, Debug, Clone, Serialize)]
pub struct Promotion {
    pub id: i64,
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Queryable, Debug, Clone, Serialize)]
pub struct PromoCode {
    pub id: i64,
    pub code: String,
    #[serde(rename = "discount")]
    pub discount_percent: f64,
    pub max_uses: i32,
    pub uses: i32,
    pub expires_at: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl PromoCode {
    pub fn is_redeemable(&self, today: NaiveDate) -> bool {
        self.is_active && self.uses < self.max_uses && self.expires_at.map_or(true, |last_day| today <= last_day)
    }
}

/// Raw `orders` row; `items`, `status` and `order_type` are still text here.
#[derive(Queryable, Debug, Clone)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub items: String,
    pub address: String,
    pub total: f64,
    pub status: String,
    pub order_type: String,
    pub courier_id: Option<i64>,
    pub payment_provider: Option<String>,
    pub payment_id: Option<String>,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub notified_at: Option<NaiveDateTime>,
    pub pickup_notified_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub items: Vec<OrderItem>,
    pub address: String,
    pub total: f64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub courier_id: Option<i64>,
    pub payment_provider: Option<String>,
    pub payment_id: Option<String>,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub notified_at: Option<NaiveDateTime>,
    pub pickup_notified_at: Option<NaiveDateTime>,
}

impl Order {
    pub fn items_line(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("{} x{}", item.name, item.qty))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = Error;

    fn try_from(row: OrderRow) -> QueryResult<Self> {
        let items = serde_json::from_str(&row.items).map_err(|err| Error::DeserializationError(Box::new(err)))?;
        let status = row.status.parse().map_err(|err| Error::DeserializationError(Box::new(err)))?;
        let order_type = row.order_type.parse().map_err(|err| Error::DeserializationError(Box::new(err)))?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            items,
            address: row.address,
            total: row.total,
            status,
            order_type,
            courier_id: row.courier_id,
            payment_provider: row.payment_provider,
            payment_id: row.payment_id,
            paid_at: row.paid_at,
            created_at: row.created_at,
            notified_at: row.notified_at,
            pickup_notified_at: row.pickup_notified_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub id: i64,
    pub created_at: NaiveDateTime,
    pub total: f64,
    pub status: OrderStatus,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        OrderSummary { id: order.id, created_at: order.created_at, total: order.total, status: order.status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PromoCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminClaim {
    Granted,
    AlreadyTaken,
    UnknownUser,
}
