use actix_web::web::{JsonConfig, ServiceConfig};
use actix_web::{get, HttpResponse, Responder};
use serde::Serialize;

use crate::error::AppError;

pub mod auth;
pub mod db_handling;
pub mod db_models;
pub mod db_utils;
pub mod insertable;
pub mod messages;
pub mod uploads;

#[get("/")]
pub async fn home_page() -> impl Responder {
    HttpResponse::Ok().body("API for Restaurant WebApp")
}

#[derive(Serialize)]
pub struct Success {
    pub status: &'static str,
}

pub fn success() -> HttpResponse {
    HttpResponse::Ok().json(Success { status: "success" })
}

/// Everything served under `/api`.
pub fn configure_api(cfg: &mut ServiceConfig) {
    cfg.app_data(JsonConfig::default().error_handler(|err, _req| AppError::validation(err.to_string()).into()))
        .service(admin_route::admin_config)
        .service(admin_route::add_admin)
        .service(dishes_route::list_dishes)
        .service(dishes_route::create_dish)
        .service(dishes_route::delete_dish)
        .service(users_route::user_orders)
        .service(users_route::get_user)
        .service(payment_route::create_payment)
        .service(payment_route::payment_callback)
        .service(promotions_route::list_promotions)
        .service(promotions_route::create_promotion)
        .service(promotions_route::delete_promotion)
        .service(promo_route::validate_promo)
        .service(promo_route::list_promocodes)
        .service(promo_route::create_promocode)
        .service(promo_route::delete_promocode)
        .service(order_route::update_status);
}

// sub-route "/api/admin", "/api/add_admin"
pub mod admin_route {
    use actix_web::web::{Data, Json};
    use actix_web::{get, post, HttpRequest, HttpResponse, Responder};
    use serde::Deserialize;
    use serde_json::json;

    use crate::error::AppError;
    use crate::services::auth::{lenient_id, require_admin};
    use crate::services::db_models::AdminClaim;
    use crate::services::db_utils::{ask, AppState};
    use crate::services::messages::{AdminCandidate, ClaimAdmin};
    use crate::services::success;

    #[get("/admin/config")]
    pub async fn admin_config(state: Data<AppState>) -> impl Responder {
        HttpResponse::Ok().json(json!({ "admin_id": state.admin_id }))
    }

    #[derive(Deserialize)]
    pub struct AddAdminBody {
        #[serde(default)]
        pub username: Option<String>,
        #[serde(default, deserialize_with = "lenient_id")]
        pub telegram_id: Option<i64>,
    }

    #[post("/add_admin")]
    pub async fn add_admin(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<AddAdminBody>,
    ) -> Result<HttpResponse, AppError> {
        let body = body.into_inner();
        require_admin(&state, &req, body.telegram_id).await?;

        let username = body
            .username
            .map(|name| name.trim().trim_start_matches('@').to_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::validation("username is required"))?;

        match ask(&state.db, ClaimAdmin(AdminCandidate::Username(username.clone()))).await? {
            AdminClaim::Granted => {
                tracing::info!(%username, "administrator assigned");
                Ok(success())
            }
            AdminClaim::AlreadyTaken => Err(AppError::Conflict("an administrator already exists".to_owned())),
            AdminClaim::UnknownUser => Err(AppError::not_found(format!("user @{username} has not started the bot"))),
        }
    }
}

// sub-route "/api/dishes"
pub mod dishes_route {
    use actix_multipart::Multipart;
    use actix_web::web::{Data, Path, Query};
    use actix_web::{delete, get, post, HttpRequest, HttpResponse, Responder, ResponseError};
    use futures::TryStreamExt;
    use serde::Deserialize;

    use crate::error::AppError;
    use crate::services::auth::require_admin;
    use crate::services::db_utils::{ask, AppState};
    use crate::services::insertable::NewDish;
    use crate::services::messages::{CreateDish, DeleteDish, FetchDishes};
    use crate::services::success;
    use crate::services::uploads::MAX_IMAGE_BYTES;

    #[derive(Deserialize)]
    pub struct CategoryQuery {
        pub category: Option<String>,
    }

    #[get("/dishes")]
    pub async fn list_dishes(state: Data<AppState>, query: Query<CategoryQuery>) -> impl Responder {
        let category = query.into_inner().category.filter(|cat| !cat.is_empty());

        match state.db.send(FetchDishes { category }).await {
            Ok(Ok(resp)) => HttpResponse::Ok().json(resp),
            Ok(Err(err)) => AppError::Store(err).error_response(),
            Err(err) => AppError::Mailbox(err).error_response(),
        }
    }

    #[derive(Default)]
    struct DishForm {
        name: Option<String>,
        price: Option<String>,
        description: Option<String>,
        category: Option<String>,
        telegram_id: Option<i64>,
        image: Option<(String, Vec<u8>)>,
    }

    async fn read_form(mut payload: Multipart) -> Result<DishForm, AppError> {
        let mut form = DishForm::default();
        let bad_form = |err: actix_multipart::MultipartError| AppError::validation(format!("invalid form: {err}"));

        while let Some(mut field) = payload.try_next().await.map_err(bad_form)? {
            let name = field.content_disposition().get_name().unwrap_or_default().to_owned();
            let file_name = field.content_disposition().get_filename().map(str::to_owned);

            let mut data = Vec::new();
            while let Some(chunk) = field.try_next().await.map_err(bad_form)? {
                if data.len() + chunk.len() > MAX_IMAGE_BYTES {
                    return Err(AppError::validation(format!("field '{name}' is larger than {MAX_IMAGE_BYTES} bytes")));
                }
                data.extend_from_slice(&chunk);
            }

            if name == "image" {
                if let Some(file_name) = file_name.filter(|file_name| !file_name.is_empty()) {
                    form.image = Some((file_name, data));
                }
                continue;
            }

            let value =
                String::from_utf8(data).map_err(|_| AppError::validation(format!("field '{name}' is not utf-8")))?;
            match name.as_str() {
                "name" => form.name = Some(value),
                "price" => form.price = Some(value),
                "description" => form.description = Some(value),
                "category" => form.category = Some(value),
                "telegram_id" => form.telegram_id = value.trim().parse().ok(),
                _ => {}
            }
        }

        Ok(form)
    }

    #[post("/dishes")]
    pub async fn create_dish(
        state: Data<AppState>,
        req: HttpRequest,
        payload: Multipart,
    ) -> Result<HttpResponse, AppError> {
        let form = read_form(payload).await?;
        require_admin(&state, &req, form.telegram_id).await?;

        let (Some(name), Some(price)) = (form.name.filter(|v| !v.trim().is_empty()), form.price) else {
            return Err(AppError::validation("name and price required"));
        };
        let price = price
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|price| price.is_finite() && *price >= 0.0)
            .ok_or_else(|| AppError::validation("price must be numeric"))?;

        let image_url = match &form.image {
            Some((file_name, data)) => Some(state.uploads.save(file_name, data).await?),
            None => None,
        };

        let dish = NewDish {
            name: name.trim().to_owned(),
            price,
            description: form.description,
            image_url: image_url.clone(),
            category: form.category.filter(|cat| !cat.trim().is_empty()).unwrap_or_else(|| "other".to_owned()),
        };

        match ask(&state.db, CreateDish(dish)).await {
            Ok(dish) => {
                tracing::info!(dish_id = dish.id, name = %dish.name, "dish created");
                Ok(success())
            }
            Err(err) => {
                if let Some(url) = image_url {
                    state.uploads.remove(&url).await;
                }
                Err(err)
            }
        }
    }

    #[delete("/dishes/{id}")]
    pub async fn delete_dish(
        state: Data<AppState>,
        req: HttpRequest,
        path: Path<i64>,
    ) -> Result<HttpResponse, AppError> {
        require_admin(&state, &req, None).await?;
        let dish_id = path.into_inner();

        let dish = ask(&state.db, DeleteDish(dish_id))
            .await?
            .ok_or_else(|| AppError::not_found(format!("dish {dish_id} not found")))?;

        if let Some(url) = dish.image_url.filter(|url| !url.is_empty()) {
            state.uploads.remove(&url).await;
        }
        tracing::info!(dish_id, "dish deleted");

        Ok(success())
    }
}

// sub-route "/api/user"
pub mod users_route {
    use actix_web::web::{Data, Path};
    use actix_web::{get, HttpResponse, Responder, ResponseError};
    use serde_json::json;

    use crate::error::AppError;
    use crate::services::db_models::OrderSummary;
    use crate::services::db_utils::{ask, AppState};
    use crate::services::messages::{FetchUser, FetchUserOrders};

    #[get("/user/{id}")]
    pub async fn get_user(state: Data<AppState>, path: Path<i64>) -> Result<HttpResponse, AppError> {
        let telegram_id = path.into_inner();
        let known = ask(&state.db, FetchUser(telegram_id)).await?.is_some() || state.admin_id == Some(telegram_id);

        let role = if known {
            Some(state.lifecycle.resolve_caller(telegram_id).await?.roles)
        } else {
            None
        };

        Ok(HttpResponse::Ok().json(json!({ "telegram_id": telegram_id, "role": role })))
    }

    #[get("/user/{id}/orders")]
    pub async fn user_orders(state: Data<AppState>, path: Path<i64>) -> impl Responder {
        match state.db.send(FetchUserOrders(path.into_inner())).await {
            Ok(Ok(orders)) => HttpResponse::Ok().json(orders.iter().map(OrderSummary::from).collect::<Vec<_>>()),
            Ok(Err(err)) => AppError::Store(err).error_response(),
            Err(err) => AppError::Mailbox(err).error_response(),
        }
    }
}

// sub-route "/api/create_payment", "/api/callback"
pub mod payment_route {
    use actix_web::web::{Data, Json};
    use actix_web::{post, HttpRequest, HttpResponse};
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use crate::error::AppError;
    use crate::services::db_utils::{ask, AppState};
    use crate::services::messages::MarkPaid;
    use crate::services::success;
    use crate::types::{OrderPayload, Role, STUB_PAYMENT_PROVIDER, STUB_PAYMENT_URL};

    #[derive(Deserialize, Default)]
    pub struct PaymentInfo {
        pub amount: Option<Value>,
        pub order_id: Option<Value>,
        pub description: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreatePaymentBody {
        #[serde(default)]
        pub payment: PaymentInfo,
        #[serde(default)]
        pub order_data: OrderPayload,
    }

    fn as_text(value: &Value) -> Option<String> {
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    #[post("/create_payment")]
    pub async fn create_payment(
        state: Data<AppState>,
        body: Json<CreatePaymentBody>,
    ) -> Result<HttpResponse, AppError> {
        let CreatePaymentBody { payment, order_data } = body.into_inner();

        let reference = payment
            .order_id
            .as_ref()
            .map_or_else(|| Some(Utc::now().timestamp().to_string()), as_text);
        let (Some(amount), Some(reference)) = (payment.amount.as_ref().filter(|v| !v.is_null()), reference) else {
            return Err(AppError::validation("amount, order_id, dishes, address, and total are required"));
        };
        if order_data.dishes.is_empty() || order_data.address.trim().is_empty() || order_data.total <= 0.0 {
            return Err(AppError::validation("amount, order_id, dishes, address, and total are required"));
        }
        let amount = as_text(amount)
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|amount| amount.is_finite())
            .ok_or_else(|| AppError::validation("amount must be a valid number"))?;

        let invoice_id = format!("invoice_{reference}");
        let user_id = order_data.user.as_ref().map_or(0, |user| user.id);
        let mut draft = order_data.into_draft(user_id);
        draft.payment_provider = Some(STUB_PAYMENT_PROVIDER.to_owned());
        draft.payment_id = Some(invoice_id.clone());

        tracing::info!(
            amount,
            reference = %reference,
            description = payment.description.as_deref().unwrap_or_default(),
            "stub payment requested"
        );
        let order = state.lifecycle.place_order(draft).await?;

        Ok(HttpResponse::Ok().json(json!({
            "status": "success",
            "payment_url": format!("{STUB_PAYMENT_URL}/{reference}"),
            "invoice_id": invoice_id,
            "order_id": order.id,
        })))
    }

    #[derive(Deserialize)]
    pub struct Invoice {
        pub invoice_id: Option<Value>,
        pub status: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct CallbackBody {
        pub update_type: Option<String>,
        pub payload: Option<Invoice>,
    }

    #[post("/callback")]
    pub async fn payment_callback(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<CallbackBody>,
    ) -> Result<HttpResponse, AppError> {
        let signed = req.headers().contains_key("crypto-pay-api-signature");
        tracing::info!(signed, "payment callback received, signature not verified");

        let body = body.into_inner();
        if body.update_type.as_deref() != Some("invoice_paid") {
            return Err(AppError::validation("Invalid callback data"));
        }
        let (Some(invoice_id), Some(status)) = body
            .payload
            .map(|invoice| (invoice.invoice_id.as_ref().and_then(as_text), invoice.status))
            .unwrap_or_default()
        else {
            return Err(AppError::validation("Missing invoice details"));
        };

        if status != "paid" {
            tracing::warn!(%invoice_id, %status, "invoice not paid yet");
            return Ok(HttpResponse::Ok().json(json!({ "status": "pending" })));
        }

        match ask(&state.db, MarkPaid(invoice_id.clone())).await? {
            0 => tracing::warn!(%invoice_id, "no unpaid order for invoice"),
            marked => {
                tracing::info!(%invoice_id, marked, "order marked as paid");
                let text = format!("💳 Payment received for {invoice_id}");
                state.lifecycle.dispatcher().notify_role(Role::Admin, &text).await;
            }
        }

        Ok(success())
    }
}

// sub-route "/api/promotions"
pub mod promotions_route {
    use actix_web::web::{Data, Json};
    use actix_web::{delete, get, post, HttpRequest, HttpResponse, Responder, ResponseError};
    use serde::Deserialize;

    use crate::error::AppError;
    use crate::services::auth::{lenient_id, require_admin};
    use crate::services::db_utils::{ask, AppState};
    use crate::services::insertable::NewPromotion;
    use crate::services::messages::{CreatePromotion, DeletePromotion, FetchPromotions};
    use crate::services::success;

    #[get("/promotions")]
    pub async fn list_promotions(state: Data<AppState>) -> impl Responder {
        match state.db.send(FetchPromotions).await {
            Ok(Ok(resp)) => HttpResponse::Ok().json(resp),
            Ok(Err(err)) => AppError::Store(err).error_response(),
            Err(err) => AppError::Mailbox(err).error_response(),
        }
    }

    #[derive(Deserialize)]
    pub struct PromotionBody {
        pub text: Option<String>,
        pub image_url: Option<String>,
        #[serde(default, deserialize_with = "lenient_id")]
        pub telegram_id: Option<i64>,
    }

    #[post("/promotions")]
    pub async fn create_promotion(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<PromotionBody>,
    ) -> Result<HttpResponse, AppError> {
        let body = body.into_inner();
        require_admin(&state, &req, body.telegram_id).await?;

        let text = body
            .text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AppError::validation("text is required"))?;
        let promotion = ask(&state.db, CreatePromotion(NewPromotion { text, image_url: body.image_url })).await?;
        tracing::info!(promotion_id = promotion.id, "promotion created");

        Ok(success())
    }

    #[derive(Deserialize)]
    pub struct DeleteBody {
        pub id: Option<i64>,
        #[serde(default, deserialize_with = "lenient_id")]
        pub telegram_id: Option<i64>,
    }

    #[delete("/promotions")]
    pub async fn delete_promotion(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<DeleteBody>,
    ) -> Result<HttpResponse, AppError> {
        let body = body.into_inner();
        require_admin(&state, &req, body.telegram_id).await?;

        let id = body.id.ok_or_else(|| AppError::validation("id is required"))?;
        if !ask(&state.db, DeletePromotion(id)).await? {
            return Err(AppError::not_found(format!("promotion {id} not found")));
        }

        Ok(success())
    }
}

// sub-route "/api/validate_promo", "/api/promocodes"
pub mod promo_route {
    use actix_web::web::{Data, Json};
    use actix_web::{delete, get, post, HttpRequest, HttpResponse, Responder, ResponseError};
    use chrono::NaiveDate;
    use serde::Deserialize;
    use serde_json::json;

    use crate::error::AppError;
    use crate::promo::PromoDraft;
    use crate::services::auth::{lenient_id, require_admin};
    use crate::services::db_utils::AppState;
    use crate::services::success;

    #[derive(Deserialize)]
    pub struct CodeBody {
        #[serde(default)]
        pub code: String,
    }

    /// Checks the code and, when it is valid, takes one use of it.
    #[post("/validate_promo")]
    pub async fn validate_promo(state: Data<AppState>, body: Json<CodeBody>) -> Result<HttpResponse, AppError> {
        let code = body.into_inner().code;

        if !state.promos.validate(&code).await?.valid {
            return Ok(HttpResponse::BadRequest().json(json!({
                "status": "error",
                "valid": false,
                "error": "invalid or expired promo code",
            })));
        }

        match state.promos.redeem(&code).await? {
            Some(discount) => {
                Ok(HttpResponse::Ok().json(json!({ "status": "success", "valid": true, "discount": discount })))
            }
            None => Err(AppError::validation("could not apply promo code")),
        }
    }

    #[get("/promocodes")]
    pub async fn list_promocodes(state: Data<AppState>) -> impl Responder {
        match state.promos.list().await {
            Ok(resp) => HttpResponse::Ok().json(resp),
            Err(err) => err.error_response(),
        }
    }

    #[derive(Deserialize)]
    pub struct PromoBody {
        #[serde(default)]
        pub code: String,
        pub discount: Option<f64>,
        pub max_uses: Option<i32>,
        pub expires_at: Option<NaiveDate>,
        #[serde(default, deserialize_with = "lenient_id")]
        pub telegram_id: Option<i64>,
    }

    #[post("/promocodes")]
    pub async fn create_promocode(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<PromoBody>,
    ) -> Result<HttpResponse, AppError> {
        let body = body.into_inner();
        require_admin(&state, &req, body.telegram_id).await?;

        let discount = body.discount.ok_or_else(|| AppError::validation("discount is required"))?;
        state
            .promos
            .create(PromoDraft { code: body.code, discount, max_uses: body.max_uses, expires_at: body.expires_at })
            .await?;

        Ok(success())
    }

    #[derive(Deserialize)]
    pub struct DeleteBody {
        pub id: Option<i64>,
        #[serde(default, deserialize_with = "lenient_id")]
        pub telegram_id: Option<i64>,
    }

    #[delete("/promocodes")]
    pub async fn delete_promocode(
        state: Data<AppState>,
        req: HttpRequest,
        body: Json<DeleteBody>,
    ) -> Result<HttpResponse, AppError> {
        let body = body.into_inner();
        require_admin(&state, &req, body.telegram_id).await?;

        let id = body.id.ok_or_else(|| AppError::validation("id is required"))?;
        if !state.promos.delete(id).await? {
            return Err(AppError::not_found(format!("promo code {id} not found")));
        }

        Ok(success())
    }
}

// sub-route "/api/order"
pub mod order_route {
    use actix_web::web::{Data, Json, Path};
    use actix_web::{post, HttpRequest, HttpResponse};
    use serde::Deserialize;

    use crate::error::AppError;
    use crate::services::auth::header_id;
    use crate::services::db_utils::AppState;
    use crate::services::success;
    use crate::types::OrderStatus;

    #[derive(Deserialize)]
    pub struct StatusBody {
        pub status: Option<String>,
    }

    #[post("/order/{id}/status")]
    pub async fn update_status(
        state: Data<AppState>,
        req: HttpRequest,
        path: Path<i64>,
        body: Json<StatusBody>,
    ) -> Result<HttpResponse, AppError> {
        let order_id = path.into_inner();
        let status = body
            .into_inner()
            .status
            .and_then(|raw| raw.parse::<OrderStatus>().ok())
            .ok_or_else(|| AppError::validation("Invalid or missing status"))?;

        let telegram_id = header_id(&req).ok_or(AppError::Unauthorized)?;
        let caller = state.lifecycle.resolve_caller(telegram_id).await?;
        if !caller.is_admin() {
            return Err(AppError::forbidden("Only admins can update order status"));
        }

        match state.lifecycle.transition(order_id, status, &caller).await? {
            Some(_) => Ok(success()),
            None => Err(AppError::not_found("Order not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::web::{scope, Data};
    use actix_web::{test, App};
    use chrono::{Duration, Local};
    use serde_json::{json, Value};

    use super::*;
    use crate::services::auth::TELEGRAM_ID_HEADER;
    use crate::services::db_utils::{ask, AppState};
    use crate::services::messages::{FetchOrder, FetchUserOrders};
    use crate::test::{app_state, seed_order, seed_user, start_db, RecordingNotifier};
    use crate::types::{OrderStatus, OrderType, Role, RoleSet};

    const ADMIN: i64 = 1;
    const COURIER: i64 = 2;
    const CUSTOMER: i64 = 3;

    macro_rules! api {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .service(home_page)
                    .service(scope("/api").configure(configure_api)),
            )
            .await
        };
    }

    fn state(db: &crate::test::TestDb, notifier: Arc<RecordingNotifier>) -> Data<AppState> {
        Data::new(app_state(db, notifier, Some(ADMIN)))
    }

    #[actix_web::test]
    async fn home_and_admin_config_are_public() {
        let db = start_db();
        let state = state(&db, Arc::new(RecordingNotifier::default()));
        let app = api!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/admin/config").to_request()).await;
        assert_eq!(body, json!({ "admin_id": ADMIN }));
    }

    #[actix_web::test]
    async fn status_endpoint_checks_input_then_identity_then_role() {
        let db = start_db();
        seed_user(&db.addr, COURIER, Some("courier"), RoleSet::user().with(Role::Courier)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let state = state(&db, notifier.clone());
        let app = api!(state);
        let order = seed_order(&db.addr, CUSTOMER, OrderType::Delivery, vec![]).await;
        let uri = format!("/api/order/{}/status", order.id);

        let post = |status: &str| test::TestRequest::post().uri(&uri).set_json(json!({ "status": status }));

        let resp = test::call_service(&app, post("paid").insert_header((TELEGRAM_ID_HEADER, "1")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, post("accepted").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp =
            test::call_service(&app, post("accepted").insert_header((TELEGRAM_ID_HEADER, "2")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp =
            test::call_service(&app, post("cooking").insert_header((TELEGRAM_ID_HEADER, "1")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp =
            test::call_service(&app, post("accepted").insert_header((TELEGRAM_ID_HEADER, "1")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let stored = ask(&db.addr, FetchOrder(order.id)).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Accepted);
        assert_eq!(notifier.sent_to(CUSTOMER).len(), 1);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/order/9999/status")
                .insert_header((TELEGRAM_ID_HEADER, "1"))
                .set_json(json!({ "status": "failed" }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn promo_codes_are_admin_managed_and_redeemed_once() {
        let db = start_db();
        let state = state(&db, Arc::new(RecordingNotifier::default()));
        let app = api!(state);

        let create = |caller: &str, code: &str| {
            test::TestRequest::post()
                .uri(&format!("/api/promocodes?telegram_id={caller}"))
                .set_json(json!({ "code": code, "discount": 10, "max_uses": 1 }))
                .to_request()
        };

        assert_eq!(test::call_service(&app, create("3", "ONCE")).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(test::call_service(&app, create("1", "ONCE")).await.status(), StatusCode::OK);
        assert_eq!(test::call_service(&app, create("1", "once")).await.status(), StatusCode::CONFLICT);

        let validate =
            || test::TestRequest::post().uri("/api/validate_promo").set_json(json!({ "code": "once" })).to_request();
        let body: Value = test::call_and_read_body_json(&app, validate()).await;
        assert_eq!(body, json!({ "status": "success", "valid": true, "discount": 10.0 }));

        let resp = test::call_service(&app, validate()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["valid"], json!(false));

        let list: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/promocodes").to_request()).await;
        assert_eq!(list[0]["code"], json!("ONCE"));
        assert_eq!(list[0]["uses"], json!(1));
        let id = list[0]["id"].as_i64().unwrap();

        let delete = test::TestRequest::delete()
            .uri("/api/promocodes")
            .set_json(json!({ "id": id, "telegram_id": "1" }))
            .to_request();
        assert_eq!(test::call_service(&app, delete).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn promo_validation_rejects_bad_discounts() {
        let db = start_db();
        let state = state(&db, Arc::new(RecordingNotifier::default()));
        let app = api!(state);
        let expired = Local::now().date_naive() - Duration::days(2);

        for body in [
            json!({ "code": "ZERO", "discount": 0 }),
            json!({ "code": "HUGE", "discount": 150 }),
            json!({ "code": "NOPE", "discount": 10, "max_uses": 0 }),
        ] {
            let req = test::TestRequest::post()
                .uri("/api/promocodes")
                .insert_header((TELEGRAM_ID_HEADER, "1"))
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }

        let req = test::TestRequest::post()
            .uri("/api/promocodes")
            .insert_header((TELEGRAM_ID_HEADER, "1"))
            .set_json(json!({ "code": "OLD", "discount": 10, "expires_at": expired }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::post().uri("/api/validate_promo").set_json(json!({ "code": "OLD" })).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn add_admin_requires_known_user_and_free_seat() {
        let db = start_db();
        seed_user(&db.addr, 50, Some("maria"), RoleSet::user()).await;
        seed_user(&db.addr, 51, Some("oleg"), RoleSet::user()).await;
        let state = state(&db, Arc::new(RecordingNotifier::default()));
        let app = api!(state);

        let add = |username: &str| {
            test::TestRequest::post()
                .uri("/api/add_admin")
                .set_json(json!({ "username": username, "telegram_id": ADMIN }))
                .to_request()
        };

        assert_eq!(test::call_service(&app, add("ghost")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(test::call_service(&app, add("@maria")).await.status(), StatusCode::OK);
        assert_eq!(test::call_service(&app, add("oleg")).await.status(), StatusCode::CONFLICT);

        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/user/50").to_request()).await;
        assert_eq!(body, json!({ "telegram_id": 50, "role": ["user", "admin"] }));
        // the refused claim left oleg a plain user
        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/user/51").to_request()).await;
        assert_eq!(body, json!({ "telegram_id": 51, "role": ["user"] }));
        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/user/777").to_request()).await;
        assert_eq!(body["role"], Value::Null);

        // the new admin passes the gate through the store
        let req = test::TestRequest::post()
            .uri("/api/promotions")
            .insert_header((TELEGRAM_ID_HEADER, "50"))
            .set_json(json!({ "text": "Two pizzas for one" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let promos: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/promotions").to_request()).await;
        assert_eq!(promos[0]["text"], json!("Two pizzas for one"));
    }

    #[actix_web::test]
    async fn payment_creates_order_and_callback_marks_it_paid() {
        let db = start_db();
        seed_user(&db.addr, COURIER, Some("courier"), RoleSet::user().with(Role::Courier)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let state = state(&db, notifier.clone());
        let app = api!(state);

        let missing = test::TestRequest::post()
            .uri("/api/create_payment")
            .set_json(json!({
                "payment": { "amount": 20 },
                "orderData": { "dishes": [], "address": "x", "total": 20 },
            }))
            .to_request();
        assert_eq!(test::call_service(&app, missing).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/create_payment")
            .set_json(json!({
                "payment": { "amount": "20.5", "order_id": "A17" },
                "orderData": {
                    "user": { "id": CUSTOMER },
                    "dishes": [{ "name": "Borscht", "price": 20.5, "qty": 1 }],
                    "address": "Lenina 5",
                    "total": 20.5,
                    "orderType": "delivery"
                }
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["invoice_id"], json!("invoice_A17"));
        assert_eq!(body["payment_url"], json!("https://example.com/pay/A17"));
        assert_eq!(notifier.sent_to(COURIER).len(), 1);

        let order_id = body["order_id"].as_i64().unwrap();
        let order = ask(&db.addr, FetchOrder(order_id)).await.unwrap().unwrap();
        assert_eq!(order.payment_provider.as_deref(), Some("stub_payment"));
        assert!(order.paid_at.is_none());

        let callback = |status: &str| {
            test::TestRequest::post()
                .uri("/api/callback")
                .set_json(json!({
                    "update_type": "invoice_paid",
                    "payload": { "invoice_id": "invoice_A17", "status": status },
                }))
                .to_request()
        };
        let body: Value = test::call_and_read_body_json(&app, callback("active")).await;
        assert_eq!(body, json!({ "status": "pending" }));
        let body: Value = test::call_and_read_body_json(&app, callback("paid")).await;
        assert_eq!(body, json!({ "status": "success" }));
        assert_eq!(notifier.sent_to(ADMIN).last().unwrap(), "💳 Payment received for invoice_A17");
        // a repeated webhook does not pay twice
        let before = notifier.sent_to(ADMIN).len();
        test::call_service(&app, callback("paid")).await;
        assert_eq!(notifier.sent_to(ADMIN).len(), before);

        let order = ask(&db.addr, FetchOrder(order_id)).await.unwrap().unwrap();
        assert!(order.paid_at.is_some());
        assert_eq!(order.status, OrderStatus::Pending);

        let bad =
            test::TestRequest::post().uri("/api/callback").set_json(json!({ "update_type": "other" })).to_request();
        assert_eq!(test::call_service(&app, bad).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri(&format!("/api/user/{CUSTOMER}/orders")).to_request();
        let orders: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(orders.as_array().unwrap().len(), 1);
        assert_eq!(orders[0]["status"], json!("pending"));
        assert_eq!(ask(&db.addr, FetchUserOrders(CUSTOMER)).await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn dishes_are_created_from_multipart_and_deleted_with_their_image() {
        let db = start_db();
        let state = state(&db, Arc::new(RecordingNotifier::default()));
        let app = api!(state);

        let boundary = "XBOUNDARYX";
        let form = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nMargherita\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"price\"\r\n\r\n12.5\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"category\"\r\n\r\npizza\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"marg.png\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let multipart = |caller: &str| {
            test::TestRequest::post()
                .uri("/api/dishes")
                .insert_header((TELEGRAM_ID_HEADER, caller.to_owned()))
                .insert_header(("content-type", format!("multipart/form-data; boundary={boundary}")))
                .set_payload(form.clone())
                .to_request()
        };

        assert_eq!(test::call_service(&app, multipart("3")).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(test::call_service(&app, multipart("1")).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/dishes?category=pizza").to_request();
        let dishes: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(dishes.as_array().unwrap().len(), 1);
        assert_eq!(dishes[0]["price"], json!(12.5));
        let image_url = dishes[0]["image_url"].as_str().unwrap().to_owned();
        let stored = state.uploads.dir().join(image_url.trim_start_matches("/uploads/"));
        assert!(stored.exists());

        let req = test::TestRequest::get().uri("/api/dishes?category=soup").to_request();
        let other: Value = test::call_and_read_body_json(&app, req).await;
        assert!(other.as_array().unwrap().is_empty());

        let id = dishes[0]["id"].as_i64().unwrap();
        let delete = || {
            test::TestRequest::delete()
                .uri(&format!("/api/dishes/{id}"))
                .insert_header((TELEGRAM_ID_HEADER, "1"))
                .to_request()
        };
        assert_eq!(test::call_service(&app, delete()).await.status(), StatusCode::OK);
        assert!(!stored.exists());
        assert_eq!(test::call_service(&app, delete()).await.status(), StatusCode::NOT_FOUND);
    }
}
