use actix_web::web::Query;
use actix_web::HttpRequest;
use serde::{Deserialize, Deserializer};

use crate::error::AppError;
use crate::services::db_utils::AppState;

pub const TELEGRAM_ID_HEADER: &str = "X-Telegram-Id";

#[derive(Deserialize)]
struct IdQuery {
    #[serde(default, deserialize_with = "lenient_id")]
    telegram_id: Option<i64>,
}

/// Reads an account id sent either as a JSON number or as a string.
pub fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(id)) => Ok(Some(id)),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => text.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

pub fn header_id(req: &HttpRequest) -> Option<i64> {
    req.headers()
        .get(TELEGRAM_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Header first, then the `telegram_id` query parameter, then whatever the body carried.
pub fn caller_id(req: &HttpRequest, body_id: Option<i64>) -> Option<i64> {
    header_id(req)
        .or_else(|| Query::<IdQuery>::from_query(req.query_string()).ok().and_then(|query| query.telegram_id))
        .or(body_id)
}

pub async fn require_admin(state: &AppState, req: &HttpRequest, body_id: Option<i64>) -> Result<i64, AppError> {
    let Some(telegram_id) = caller_id(req, body_id) else {
        return Err(AppError::forbidden("admin access required"));
    };

    if state.lifecycle.is_admin(telegram_id).await? {
        Ok(telegram_id)
    } else {
        tracing::warn!(telegram_id, path = req.path(), "admin access denied");
        Err(AppError::forbidden("admin access required"))
    }
}

#[cfg(test)]
mod tests {
    use actix_web::test::TestRequest;

    use super::*;

    #[derive(Deserialize)]
    struct Body {
        #[serde(default, deserialize_with = "lenient_id")]
        telegram_id: Option<i64>,
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let body: Body = serde_json::from_str(r#"{"telegram_id": 42}"#).unwrap();
        assert_eq!(body.telegram_id, Some(42));
        let body: Body = serde_json::from_str(r#"{"telegram_id": " 42 "}"#).unwrap();
        assert_eq!(body.telegram_id, Some(42));
        let body: Body = serde_json::from_str("{}").unwrap();
        assert_eq!(body.telegram_id, None);
        assert!(serde_json::from_str::<Body>(r#"{"telegram_id": "abc"}"#).is_err());
    }

    #[test]
    fn header_wins_over_query_and_body() {
        let req = TestRequest::default()
            .uri("/api/dishes?telegram_id=2")
            .insert_header((TELEGRAM_ID_HEADER, "1"))
            .to_http_request();
        assert_eq!(caller_id(&req, Some(3)), Some(1));

        let req = TestRequest::default().uri("/api/dishes?telegram_id=2").to_http_request();
        assert_eq!(caller_id(&req, Some(3)), Some(2));

        let req = TestRequest::default().uri("/api/dishes").to_http_request();
        assert_eq!(caller_id(&req, Some(3)), Some(3));
        assert_eq!(caller_id(&req, None), None);
    }
}
