use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const UPLOADS_ROUTE: &str = "/uploads";
pub const ALLOWED_IMAGE_EXT: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];
pub const STUB_PAYMENT_PROVIDER: &str = "stub_payment";
pub const STUB_PAYMENT_URL: &str = "https://example.com/pay";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct PoolInitializationError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{0}'")]
pub struct UnknownVariant(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Cooking,
    OnDelivery,
    Delivered,
    Failed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Cooking,
        OrderStatus::OnDelivery,
        OrderStatus::Delivered,
        OrderStatus::Failed,
    ];

    /// Every status that is not terminal; the staleness sweep re-announces these.
    pub const NON_TERMINAL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Cooking,
        OrderStatus::OnDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Cooking => "cooking",
            OrderStatus::OnDelivery => "on_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Failed)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    Delivery,
    // the storefront calls in-restaurant pickup "restaurant"
    #[serde(alias = "restaurant")]
    Pickup,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Delivery => "delivery",
            OrderType::Pickup => "pickup",
        }
    }
}

impl Display for OrderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(OrderType::Delivery),
            "pickup" | "restaurant" => Ok(OrderType::Pickup),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Courier,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Courier, Role::Admin];

    pub const fn bit(self) -> i32 {
        match self {
            Role::User => 1,
            Role::Courier => 1 << 1,
            Role::Admin => 1 << 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Courier => "courier",
            Role::Admin => "admin",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Capability tags held by one account, persisted as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleSet(i32);

impl RoleSet {
    pub fn user() -> Self {
        RoleSet(Role::User.bit())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn with(mut self, role: Role) -> Self {
        self.0 |= role.bit();
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(|role| self.contains(*role))
    }
}

impl Default for RoleSet {
    fn default() -> Self {
        RoleSet::user()
    }
}

impl From<i32> for RoleSet {
    fn from(bits: i32) -> Self {
        // every account can at least order
        RoleSet(bits | Role::User.bit())
    }
}

impl Debug for RoleSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for RoleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for role in self.iter() {
            seq.serialize_element(&role)?;
        }
        seq.end()
    }
}

fn default_qty() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_qty")]
    pub qty: u32,
}

pub fn items_total(items: &[OrderItem]) -> f64 {
    items.iter().map(|item| item.price * item.qty as f64).sum()
}

/// Everything needed to record a new order; the store assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: i64,
    pub items: Vec<OrderItem>,
    pub address: String,
    pub total: f64,
    pub order_type: OrderType,
    pub payment_provider: Option<String>,
    pub payment_id: Option<String>,
}

impl OrderDraft {
    pub fn resolved_total(&self) -> f64 {
        if self.total > 0.0 {
            self.total
        } else {
            items_total(&self.items).max(0.0)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadUser {
    pub id: i64,
}

/// Order as the storefront web app submits it, through the chat or the payment endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    #[serde(default)]
    pub dishes: Vec<OrderItem>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub order_type: OrderType,
    pub user: Option<PayloadUser>,
}

impl OrderPayload {
    pub fn into_draft(self, user_id: i64) -> OrderDraft {
        OrderDraft {
            user_id,
            items: self.dishes,
            address: self.address,
            total: self.total,
            order_type: self.order_type,
            payment_provider: None,
            payment_id: None,
        }
    }
}
