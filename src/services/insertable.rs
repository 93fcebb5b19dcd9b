use chrono::{NaiveDate, NaiveDateTime};
use diesel::Insertable;
use serde::Serialize;

use crate::schema::dishes;
use crate::schema::orders;
use crate::schema::promo_codes;
use crate::schema::promotions;
use crate::schema::users;

#[derive(Insertable, Serialize, Clone)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub roles: i32,
}

#[derive(Insertable, Serialize, Clone)]
#[diesel(table_name = dishes)]
pub struct NewDish {
    pub name: String,
    pub price: f64,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: String,
}

#[derive(Insertable, Serialize, Clone)]
#[diesel(table_name = promotions)]
pub struct NewPromotion {
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Insertable, Serialize, Clone, Debug)]
#[diesel(table_name = promo_codes)]
pub struct NewPromoCode {
    pub code: String,
    pub discount_percent: f64,
    pub max_uses: i32,
    pub expires_at: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Serialize, Clone)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub user_id: i64,
    pub items: String,
    pub address: String,
    pub total: f64,
    pub status: String,
    pub order_type: String,
    pub payment_provider: Option<String>,
    pub payment_id: Option<String>,
    pub created_at: NaiveDateTime,
}
