//! Promo ledger: discount codes validated on lookup and consumed by a single
//! conditional update, so a code can never be redeemed past its cap.

use actix::Addr;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::services::db_models::{PromoCheck, PromoCode};
use crate::services::db_utils::{ask, DbActor};
use crate::services::insertable::NewPromoCode;
use crate::services::messages::{CreatePromo, DeletePromo, FetchPromos, RedeemPromo, ValidatePromo};

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A code as submitted by an admin, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PromoDraft {
    pub code: String,
    pub discount: f64,
    pub max_uses: Option<i32>,
    pub expires_at: Option<NaiveDate>,
}

impl PromoDraft {
    pub fn into_new(self) -> Result<NewPromoCode, AppError> {
        let code = normalize_code(&self.code);
        if code.is_empty() {
            return Err(AppError::validation("code is required"));
        }
        if !(self.discount > 0.0 && self.discount <= 100.0) {
            return Err(AppError::validation("discount must be greater than 0 and at most 100"));
        }
        let max_uses = self.max_uses.unwrap_or(1);
        if max_uses < 1 {
            return Err(AppError::validation("max_uses must be at least 1"));
        }

        Ok(NewPromoCode {
            code,
            discount_percent: self.discount,
            max_uses,
            expires_at: self.expires_at,
            created_at: Utc::now().naive_utc(),
        })
    }
}

#[derive(Clone)]
pub struct PromoLedger {
    db: Addr<DbActor>,
}

impl PromoLedger {
    pub fn new(db: Addr<DbActor>) -> Self {
        PromoLedger { db }
    }

    /// Read-only check of the redeemability predicate as of now.
    pub async fn validate(&self, code: &str) -> Result<PromoCheck, AppError> {
        let check = ask(&self.db, ValidatePromo(normalize_code(code))).await?;
        tracing::debug!(code, valid = check.valid, "promo code validated");
        Ok(check)
    }

    /// Takes one use of `code`; `None` when no use was left to take.
    pub async fn redeem(&self, code: &str) -> Result<Option<f64>, AppError> {
        let redeemed = ask(&self.db, RedeemPromo(normalize_code(code))).await?;
        match redeemed {
            Some(discount) => tracing::info!(code, discount, "promo code redeemed"),
            None => tracing::warn!(code, "promo code could not be redeemed"),
        }
        Ok(redeemed)
    }

    pub async fn create(&self, draft: PromoDraft) -> Result<PromoCode, AppError> {
        let promo = draft.into_new()?;
        let code = promo.code.clone();

        let created = ask(&self.db, CreatePromo(promo)).await.map_err(|err| match err {
            AppError::Store(err) => AppError::conflict_on_unique(err, format!("promo code {code} already exists")),
            other => other,
        })?;
        tracing::info!(
            code = %created.code,
            discount = created.discount_percent,
            max_uses = created.max_uses,
            "promo code created"
        );

        Ok(created)
    }

    pub async fn list(&self) -> Result<Vec<PromoCode>, AppError> {
        ask(&self.db, FetchPromos).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, AppError> {
        ask(&self.db, DeletePromo(id)).await
    }
}
