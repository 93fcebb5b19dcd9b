//! Transition graph and role gates for order statuses.
//!
//! ```text
//! pending -> accepted -> cooking -> on_delivery -> delivered   (delivery)
//!                           \--------------------> delivered   (pickup)
//! any non-terminal -> failed                                   (admin only)
//! ```

use crate::error::AppError;
use crate::types::{OrderStatus, OrderType, Role, RoleSet};

/// Whoever is asking for a transition, with roles resolved from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub telegram_id: i64,
    pub roles: RoleSet,
}

impl Caller {
    /// Identity the background schedulers act under.
    pub fn system() -> Self {
        Caller { telegram_id: 0, roles: RoleSet::user().with(Role::Admin) }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(Role::Admin)
    }

    pub fn is_courier(&self) -> bool {
        self.roles.contains(Role::Courier)
    }
}

pub fn is_edge(from: OrderStatus, to: OrderStatus, order_type: OrderType) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (_, Failed) => !from.is_terminal(),
        (Pending, Accepted) | (Accepted, Cooking) => true,
        (Cooking, OnDelivery) | (OnDelivery, Delivered) => order_type == OrderType::Delivery,
        (Cooking, Delivered) => order_type == OrderType::Pickup,
        _ => false,
    }
}

pub fn permits(roles: RoleSet, to: OrderStatus) -> bool {
    use OrderStatus::*;

    if roles.contains(Role::Admin) {
        return true;
    }

    roles.contains(Role::Courier) && matches!(to, Accepted | Cooking | OnDelivery | Delivered)
}

pub fn authorize(caller: &Caller, to: OrderStatus) -> Result<(), AppError> {
    if permits(caller.roles, to) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("not allowed to move orders to '{to}'")))
    }
}
