//! Chat-bot surface: turns incoming Telegram messages into lifecycle, promo and
//! account operations and produces the replies for the sender.

use std::time::Duration;

use actix::Addr;

use crate::error::AppError;
use crate::lifecycle::{Caller, OrderLifecycle};
use crate::notify::telegram::{IncomingMessage, TelegramClient};
use crate::promo::PromoLedger;
use crate::services::db_models::{AdminClaim, Order};
use crate::services::db_utils::{ask, DbActor};
use crate::services::messages::{AddRole, AdminCandidate, ClaimAdmin, FetchPendingOrders, FetchUser, UpsertUser};
use crate::types::{OrderPayload, OrderStatus, OrderType, Role};

use commands::{Command, ParseError};

pub mod commands;

const COURIER_COMMANDS: &str =
    "/courier_orders, /accept_order [id], /start_cooking [id], /start_delivery [id], /complete_order [id]";

const FALLBACK: &str = "Command not recognized. For couriers: /courier_orders, /accept_order [id], \
                        /start_cooking [id], /start_delivery [id], /complete_order [id], /help";

const COURIER_HELP: &str = "📋 Courier commands:\n\n\
    /courier_orders - list new orders with their status, address and total.\n\
    /accept_order [id] - accept an order. Status becomes 'accepted'.\n\
    /start_cooking [id] - the order is being prepared. Status becomes 'cooking'.\n\
    /start_delivery [id] - start delivering the order. Status becomes 'on_delivery' (delivery orders only).\n\
    /complete_order [id] - finish the order. Status becomes 'delivered'.\n\n\
    Example: /accept_order 123";

#[derive(Clone)]
pub struct ChatBot {
    db: Addr<DbActor>,
    lifecycle: OrderLifecycle,
    promos: PromoLedger,
    web_app_url: String,
    currency: String,
}

fn transition_reply(order: &Order) -> String {
    match (order.status, order.order_type) {
        (OrderStatus::Accepted, _) => format!("Order #{} accepted.\nStatus: accepted", order.id),
        (OrderStatus::Delivered, OrderType::Delivery) => {
            format!("Order #{} marked as delivered.\nStatus: delivered", order.id)
        }
        (OrderStatus::Delivered, OrderType::Pickup) => {
            format!("Order #{} marked as ready for pickup.\nStatus: delivered", order.id)
        }
        (status, _) => format!("Order #{} moved to status: {}", order.id, status),
    }
}

fn rejected_reply(order_id: i64, to: OrderStatus) -> String {
    match to {
        OrderStatus::OnDelivery => format!("Order #{order_id} is not a delivery order or was already processed."),
        _ => format!("Order #{order_id} not found or already processed."),
    }
}

impl ChatBot {
    pub fn new(
        db: Addr<DbActor>,
        lifecycle: OrderLifecycle,
        promos: PromoLedger,
        web_app_url: String,
        currency: String,
    ) -> Self {
        ChatBot { db, lifecycle, promos, web_app_url, currency }
    }

    /// Handles one message and returns the replies for its chat, in order.
    pub async fn handle(&self, message: &IncomingMessage) -> Vec<String> {
        let Some(sender) = &message.from else {
            return Vec::new();
        };

        let outcome = if let Some(data) = &message.web_app_data {
            self.submit_order(sender.id, &data.data).await
        } else {
            let text = message.text.as_deref().unwrap_or_default();
            match commands::parse(text) {
                Ok(command) => self.run(command, sender.id, sender.username.as_deref()).await,
                Err(ParseError::Usage(usage)) => Ok(vec![format!("Usage: {usage}")]),
                Err(ParseError::NotACommand) | Err(ParseError::Unknown(_)) => Ok(vec![FALLBACK.to_owned()]),
            }
        };

        match outcome {
            Ok(replies) => replies,
            Err(AppError::Forbidden(msg)) | Err(AppError::Validation(msg)) | Err(AppError::Conflict(msg)) => vec![msg],
            Err(err) => {
                tracing::error!(chat_id = message.chat.id, error = %err, "chat command failed");
                vec!["Something went wrong, please try again later.".to_owned()]
            }
        }
    }

    async fn run(&self, command: Command, sender: i64, username: Option<&str>) -> Result<Vec<String>, AppError> {
        tracing::debug!(sender, ?command, "chat command");

        match command {
            Command::Start => self.start(sender, username).await,
            Command::InitAdmin => self.init_admin(sender, username).await,
            Command::CreatePromo { .. } => {
                self.require_admin(sender).await?;
                let Some(draft) = command.promo_draft() else {
                    return Ok(Vec::new());
                };
                let promo = self.promos.create(draft).await.map_err(|err| match err {
                    AppError::Conflict(_) => AppError::Conflict("Error: the code already exists.".to_owned()),
                    other => other,
                })?;
                Ok(vec![format!("Promo code {} created!", promo.code)])
            }
            Command::AddCourierRole(telegram_id) => {
                self.require_admin(sender).await?;
                self.add_courier_role(telegram_id).await
            }
            Command::Help => {
                self.require_courier(sender).await?;
                Ok(vec![COURIER_HELP.to_owned()])
            }
            Command::CourierOrders => {
                self.require_courier(sender).await?;
                self.courier_orders().await
            }
            Command::Transition { order_id, to } => {
                let reply = match self.lifecycle.transition_as(order_id, to, Some(sender)).await? {
                    Some(order) => transition_reply(&order),
                    None => rejected_reply(order_id, to),
                };
                Ok(vec![reply])
            }
        }
    }

    async fn require_admin(&self, sender: i64) -> Result<Caller, AppError> {
        let caller = self.lifecycle.resolve_caller(sender).await?;
        if caller.is_admin() {
            Ok(caller)
        } else {
            Err(AppError::forbidden("Admins only."))
        }
    }

    async fn require_courier(&self, sender: i64) -> Result<Caller, AppError> {
        let caller = self.lifecycle.resolve_caller(sender).await?;
        if caller.is_courier() {
            Ok(caller)
        } else {
            Err(AppError::forbidden("This command is available to couriers only."))
        }
    }

    async fn start(&self, sender: i64, username: Option<&str>) -> Result<Vec<String>, AppError> {
        ask(&self.db, UpsertUser { telegram_id: sender, username: username.map(str::to_owned) }).await?;
        let caller = self.lifecycle.resolve_caller(sender).await?;
        tracing::info!(sender, roles = ?caller.roles, "user started the bot");

        let mut replies = vec![format!("Welcome! Open the menu: {}", self.web_app_url)];
        if caller.is_courier() {
            replies.push(format!("Hi, courier! Use {COURIER_COMMANDS}"));
        }
        if caller.is_admin() {
            replies.push("Hi, admin! Open /admin in the browser to manage the restaurant.".to_owned());
        }
        Ok(replies)
    }

    async fn init_admin(&self, sender: i64, username: Option<&str>) -> Result<Vec<String>, AppError> {
        let Some(username) = username.filter(|name| !name.is_empty()) else {
            return Ok(vec!["A Telegram username is required in your profile.".to_owned()]);
        };
        ask(&self.db, UpsertUser { telegram_id: sender, username: Some(username.to_owned()) }).await?;

        let reply = match ask(&self.db, ClaimAdmin(AdminCandidate::TelegramId(sender))).await? {
            AdminClaim::Granted => {
                tracing::info!(sender, username, "administrator claimed");
                "You are now the administrator."
            }
            AdminClaim::AlreadyTaken | AdminClaim::UnknownUser => "An administrator is already assigned.",
        };
        Ok(vec![reply.to_owned()])
    }

    async fn add_courier_role(&self, telegram_id: i64) -> Result<Vec<String>, AppError> {
        let reply = match ask(&self.db, FetchUser(telegram_id)).await? {
            None => "User not found.".to_owned(),
            Some(user) if user.roles.contains(Role::Courier) => {
                format!("User {telegram_id} already has the 'courier' role.")
            }
            Some(_) => {
                if ask(&self.db, AddRole { telegram_id, role: Role::Courier }).await? {
                    tracing::info!(telegram_id, "courier role granted");
                    format!("Role 'courier' added for user {telegram_id}.")
                } else {
                    "User not found.".to_owned()
                }
            }
        };
        Ok(vec![reply])
    }

    async fn courier_orders(&self) -> Result<Vec<String>, AppError> {
        let orders = ask(&self.db, FetchPendingOrders).await?;
        if orders.is_empty() {
            return Ok(vec!["No new orders.".to_owned()]);
        }

        Ok(orders
            .iter()
            .map(|order| {
                format!(
                    "Order #{}\nFrom: {}\nType: {}\nAddress: {}\nDishes: {}\nTotal: {:.2} {}\nStatus: {}",
                    order.id,
                    order.user_id,
                    order.order_type,
                    order.address,
                    order.items_line(),
                    order.total,
                    self.currency,
                    order.status
                )
            })
            .collect())
    }

    async fn submit_order(&self, sender: i64, data: &str) -> Result<Vec<String>, AppError> {
        let payload: OrderPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(sender, error = %err, "malformed web app order");
                return Ok(vec![format!("Could not process order data: {err}")]);
            }
        };

        ask(&self.db, UpsertUser { telegram_id: sender, username: None }).await?;
        let order = self.lifecycle.place_order(payload.into_draft(sender)).await?;

        Ok(vec![format!("Order #{} received! Please wait for confirmation.", order.id)])
    }
}

/// Long-polls the Bot API and handles every update on its own task.
pub async fn run_polling(client: TelegramClient, bot: ChatBot, timeout_secs: u64) {
    let mut offset = 0;
    tracing::info!("chat bot polling started");

    loop {
        let updates = match client.get_updates(offset, timeout_secs).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(error = %err, "getUpdates failed, backing off");
                actix_web::rt::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };

            let client = client.clone();
            let bot = bot.clone();
            actix_web::rt::spawn(async move {
                for reply in bot.handle(&message).await {
                    if let Err(err) = client.send_message(message.chat.id, &reply).await {
                        tracing::warn!(chat_id = message.chat.id, error = %err, "reply not delivered");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notify::telegram::{Chat, Sender, WebAppData};
    use crate::services::messages::FetchOrder;
    use crate::test::{lifecycle_for, seed_order, seed_user, start_db, RecordingNotifier, TestDb};
    use crate::types::RoleSet;

    const ADMIN: i64 = 1;
    const COURIER: i64 = 2;
    const CUSTOMER: i64 = 3;

    fn bot_for(db: &TestDb, notifier: Arc<RecordingNotifier>, admin_id: Option<i64>) -> ChatBot {
        let lifecycle = lifecycle_for(db, notifier, admin_id);
        ChatBot::new(
            db.addr.clone(),
            lifecycle,
            PromoLedger::new(db.addr.clone()),
            "https://menu.example".into(),
            "BYN".into(),
        )
    }

    fn text(from: i64, username: Option<&str>, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat: Chat { id: from },
            from: Some(Sender { id: from, username: username.map(str::to_owned) }),
            text: Some(text.to_owned()),
            web_app_data: None,
        }
    }

    #[actix_web::test]
    async fn start_registers_and_greets_by_role() {
        let db = start_db();
        seed_user(&db.addr, COURIER, Some("courier"), RoleSet::user().with(Role::Courier)).await;
        let bot = bot_for(&db, Arc::new(RecordingNotifier::default()), Some(ADMIN));

        let replies = bot.handle(&text(CUSTOMER, Some("ann"), "/start")).await;
        assert_eq!(replies, vec!["Welcome! Open the menu: https://menu.example".to_owned()]);
        let user = ask(&db.addr, FetchUser(CUSTOMER)).await.unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("ann"));

        assert_eq!(bot.handle(&text(COURIER, Some("courier"), "/start")).await.len(), 2);
        assert_eq!(bot.handle(&text(ADMIN, None, "/start")).await.len(), 2);
    }

    #[actix_web::test]
    async fn only_the_first_admin_claim_wins() {
        let db = start_db();
        let bot = bot_for(&db, Arc::new(RecordingNotifier::default()), None);

        assert_eq!(
            bot.handle(&text(10, None, "/init_admin")).await,
            vec!["A Telegram username is required in your profile.".to_owned()],
        );
        assert_eq!(
            bot.handle(&text(10, Some("first"), "/init_admin")).await,
            vec!["You are now the administrator.".to_owned()],
        );
        assert_eq!(
            bot.handle(&text(11, Some("second"), "/init_admin")).await,
            vec!["An administrator is already assigned.".to_owned()],
        );

        // the new admin can use admin commands straight away
        let replies = bot.handle(&text(10, Some("first"), "/createpromo spring 10 2")).await;
        assert_eq!(replies, vec!["Promo code SPRING created!".to_owned()]);
        let replies = bot.handle(&text(10, Some("first"), "/createpromo SPRING 20")).await;
        assert_eq!(replies, vec!["Error: the code already exists.".to_owned()]);
        let replies = bot.handle(&text(11, Some("second"), "/createpromo other 20")).await;
        assert_eq!(replies, vec!["Admins only.".to_owned()]);
    }

    #[actix_web::test]
    async fn admin_grants_courier_role() {
        let db = start_db();
        seed_user(&db.addr, CUSTOMER, Some("ann"), RoleSet::user()).await;
        let bot = bot_for(&db, Arc::new(RecordingNotifier::default()), Some(ADMIN));

        assert_eq!(bot.handle(&text(CUSTOMER, None, "/add_courier_role 3")).await, vec!["Admins only.".to_owned()]);
        assert_eq!(bot.handle(&text(ADMIN, None, "/add_courier_role 999")).await, vec!["User not found.".to_owned()]);
        assert_eq!(
            bot.handle(&text(ADMIN, None, "/add_courier_role 3")).await,
            vec!["Role 'courier' added for user 3.".to_owned()]
        );
        assert_eq!(
            bot.handle(&text(ADMIN, None, "/add_courier_role 3")).await,
            vec!["User 3 already has the 'courier' role.".to_owned()]
        );

        let user = ask(&db.addr, FetchUser(CUSTOMER)).await.unwrap().unwrap();
        assert!(user.roles.contains(Role::Courier));
        assert_eq!(bot.handle(&text(CUSTOMER, None, "/help")).await, vec![COURIER_HELP.to_owned()]);
    }

    #[actix_web::test]
    async fn couriers_work_the_queue() {
        let db = start_db();
        seed_user(&db.addr, COURIER, Some("courier"), RoleSet::user().with(Role::Courier)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let bot = bot_for(&db, notifier.clone(), Some(ADMIN));

        assert_eq!(bot.handle(&text(COURIER, None, "/courier_orders")).await, vec!["No new orders.".to_owned()]);
        let order = seed_order(&db.addr, CUSTOMER, OrderType::Pickup, vec![]).await;

        let listing = bot.handle(&text(COURIER, None, "/courier_orders")).await;
        assert_eq!(listing.len(), 1);
        assert!(listing[0].starts_with(&format!("Order #{}", order.id)));

        let accept = format!("/accept_order {}", order.id);
        assert_eq!(
            bot.handle(&text(COURIER, None, &accept)).await,
            vec![format!("Order #{} accepted.\nStatus: accepted", order.id)],
        );
        assert_eq!(
            bot.handle(&text(COURIER, None, &accept)).await,
            vec![format!("Order #{} not found or already processed.", order.id)],
        );

        bot.handle(&text(COURIER, None, &format!("/start_cooking {}", order.id))).await;
        let replies = bot.handle(&text(COURIER, None, &format!("/start_delivery {}", order.id))).await;
        assert_eq!(replies, vec![format!("Order #{} is not a delivery order or was already processed.", order.id)]);
        let replies = bot.handle(&text(COURIER, None, &format!("/complete_order {}", order.id))).await;
        assert_eq!(replies, vec![format!("Order #{} marked as ready for pickup.\nStatus: delivered", order.id)]);

        let stored = ask(&db.addr, FetchOrder(order.id)).await.unwrap().unwrap();
        assert_eq!(stored.courier_id, Some(COURIER));
        assert_eq!(notifier.sent_to(CUSTOMER).len(), 3);
    }

    #[actix_web::test]
    async fn customers_cannot_move_orders() {
        let db = start_db();
        let bot = bot_for(&db, Arc::new(RecordingNotifier::default()), Some(ADMIN));
        let order = seed_order(&db.addr, CUSTOMER, OrderType::Delivery, vec![]).await;

        let replies = bot.handle(&text(CUSTOMER, None, &format!("/accept_order {}", order.id))).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(ask(&db.addr, FetchOrder(order.id)).await.unwrap().unwrap().status, OrderStatus::Pending);
        assert_eq!(
            bot.handle(&text(CUSTOMER, None, "/courier_orders")).await,
            vec!["This command is available to couriers only.".to_owned()],
        );
    }

    #[actix_web::test]
    async fn web_app_orders_are_placed_and_announced() {
        let db = start_db();
        seed_user(&db.addr, COURIER, Some("courier"), RoleSet::user().with(Role::Courier)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let bot = bot_for(&db, notifier.clone(), Some(ADMIN));

        let message = IncomingMessage {
            chat: Chat { id: CUSTOMER },
            from: Some(Sender { id: CUSTOMER, username: None }),
            text: None,
            web_app_data: Some(WebAppData {
                data: r#"{"dishes":[{"name":"Pizza","price":12.5,"qty":2}],"address":"Lenina 5","total":0,"orderType":"delivery"}"#.into(),
            }),
        };
        let replies = bot.handle(&message).await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].ends_with("received! Please wait for confirmation."));

        let orders = ask(&db.addr, FetchPendingOrders).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total, 25.0);
        assert_eq!(orders[0].user_id, CUSTOMER);
        assert_eq!(notifier.sent_to(COURIER).len(), 1);
        assert_eq!(notifier.sent_to(ADMIN).len(), 1);

        let broken = IncomingMessage { web_app_data: Some(WebAppData { data: "{".into() }), ..message };
        assert!(bot.handle(&broken).await[0].starts_with("Could not process order data"));
    }

    #[actix_web::test]
    async fn free_text_gets_the_fallback() {
        let db = start_db();
        let bot = bot_for(&db, Arc::new(RecordingNotifier::default()), None);

        assert_eq!(bot.handle(&text(CUSTOMER, None, "hi there")).await, vec![FALLBACK.to_owned()]);
        assert_eq!(
            bot.handle(&text(CUSTOMER, None, "/accept_order")).await,
            vec!["Usage: /accept_order [id]".to_owned()],
        );
    }
}
