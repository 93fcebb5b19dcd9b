// Mirrors SCHEMA_SQL in services/db_utils.rs

diesel::table! {
    users (telegram_id) {
        telegram_id -> BigInt,
        username -> Nullable<Text>,
        roles -> Integer,
    }
}

diesel::table! {
    dishes (id) {
        id -> BigInt,
        name -> Text,
        price -> Double,
        description -> Nullable<Text>,
        image_url -> Nullable<Text>,
        category -> Text,
    }
}

diesel::table! {
    orders (id) {
        id -> BigInt,
        user_id -> BigInt,
        items -> Text,
        address -> Text,
        total -> Double,
        status -> Text,
        order_type -> Text,
        courier_id -> Nullable<BigInt>,
        payment_provider -> Nullable<Text>,
        payment_id -> Nullable<Text>,
        paid_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        notified_at -> Nullable<Timestamp>,
        pickup_notified_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    promotions (id) {
        id -> BigInt,
        text -> Text,
        image_url -> Nullable<Text>,
    }
}

diesel::table! {
    promo_codes (id) {
        id -> BigInt,
        code -> Text,
        discount_percent -> Double,
        max_uses -> Integer,
        uses -> Integer,
        expires_at -> Nullable<Date>,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    dishes,
    orders,
    promotions,
    promo_codes,
);
