use actix::{Actor, Addr, Handler, Message, SyncArbiter, SyncContext};
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::{QueryResult, SqliteConnection};

use crate::error::AppError;
use crate::lifecycle::OrderLifecycle;
use crate::promo::PromoLedger;
use crate::services::uploads::UploadStore;
use crate::types::PoolInitializationError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub struct DbActor(pub DbPool);

pub struct AppState {
    pub db: Addr<DbActor>,
    pub lifecycle: OrderLifecycle,
    pub promos: PromoLedger,
    pub uploads: UploadStore,
    pub admin_id: Option<i64>,
}

impl Actor for DbActor {
    type Context = SyncContext<Self>;
}

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    telegram_id BIGINT PRIMARY KEY NOT NULL,
    username TEXT UNIQUE,
    roles INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS dishes (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT NOT NULL,
    price DOUBLE NOT NULL,
    description TEXT,
    image_url TEXT,
    category TEXT NOT NULL DEFAULT 'other'
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_id BIGINT NOT NULL,
    items TEXT NOT NULL,
    address TEXT NOT NULL DEFAULT '',
    total DOUBLE NOT NULL DEFAULT 0 CHECK (total >= 0),
    status TEXT NOT NULL DEFAULT 'pending',
    order_type TEXT NOT NULL DEFAULT 'delivery',
    courier_id BIGINT,
    payment_provider TEXT,
    payment_id TEXT,
    paid_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL,
    notified_at TIMESTAMP,
    pickup_notified_at TIMESTAMP
);

CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status);
CREATE INDEX IF NOT EXISTS orders_user_idx ON orders (user_id);
CREATE INDEX IF NOT EXISTS orders_payment_idx ON orders (payment_id);

CREATE TABLE IF NOT EXISTS promotions (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    text TEXT NOT NULL,
    image_url TEXT
);

CREATE TABLE IF NOT EXISTS promo_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    code TEXT NOT NULL UNIQUE,
    discount_percent DOUBLE NOT NULL,
    max_uses INTEGER NOT NULL DEFAULT 1,
    uses INTEGER NOT NULL DEFAULT 0,
    expires_at DATE,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL
);
"#;

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn get_db_pool(db_url: &str, max_size: u32) -> Result<DbPool, PoolInitializationError> {
    let manager: ConnectionManager<SqliteConnection> = ConnectionManager::<SqliteConnection>::new(db_url);
    match Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 5_000 }))
        .build(manager)
    {
        Ok(val) => Ok(val),
        Err(err) => Err(PoolInitializationError(err.to_string())),
    }
}

pub fn init_schema(pool: &DbPool) -> Result<(), PoolInitializationError> {
    let mut conn = pool.get().map_err(|err| PoolInitializationError(err.to_string()))?;
    conn.batch_execute(SCHEMA_SQL).map_err(|err| PoolInitializationError(err.to_string()))
}

pub fn start_db_actor(pool: DbPool, workers: usize) -> Addr<DbActor> {
    SyncArbiter::start(workers, move || DbActor(pool.clone()))
}

/// Sends a store message and flattens mailbox and query failures into `AppError`.
pub async fn ask<M, T>(db: &Addr<DbActor>, msg: M) -> Result<T, AppError>
where
    M: Message<Result = QueryResult<T>> + Send + 'static,
    T: Send + 'static,
    DbActor: Handler<M>,
{
    Ok(db.send(msg).await??)
}
