//! Runtime configuration.
//!
//! Layers, lowest first: built-in defaults, `config/default.*`, `config/local.*`,
//! `APP_*` environment variables (nested keys split on `__`, e.g.
//! `APP_SERVER__PORT`), then the bare `BOT_TOKEN`, `ADMIN_TELEGRAM_ID`,
//! `DATABASE_URL`, `WEB_APP_URL` variables a `.env` file usually carries.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub api_url: String,
    pub web_app_url: String,
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminSettings {
    pub telegram_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
    pub stale_after_secs: u64,
    pub pickup_window_secs: u64,
    pub pickup_prep_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSettings {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub telegram: TelegramSettings,
    // no admin table at all when neither variable nor file sets one
    #[serde(default)]
    pub admin: AdminSettings,
    pub scheduler: SchedulerSettings,
    pub uploads: UploadSettings,
    pub log: LogSettings,
    pub currency: String,
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn pickup_window(&self) -> Duration {
        Duration::from_secs(self.pickup_window_secs)
    }

    pub fn pickup_prep(&self) -> Duration {
        Duration::from_secs(self.pickup_prep_secs)
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder(Environment::with_prefix("APP").prefix_separator("_").separator("__"))?
            .set_override_option("telegram.bot_token", env::var("BOT_TOKEN").ok())?
            .set_override_option("admin.telegram_id", env::var("ADMIN_TELEGRAM_ID").ok())?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("telegram.web_app_url", env::var("WEB_APP_URL").ok())?
            .build()?
            .try_deserialize()
    }

    fn builder(env: Environment) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080_i64)?
            .set_default("database.url", "tavola.db")?
            .set_default("database.pool_size", 8_i64)?
            .set_default("database.workers", 4_i64)?
            .set_default("telegram.api_url", "https://api.telegram.org")?
            .set_default("telegram.web_app_url", "http://localhost:8080/")?
            .set_default("telegram.poll_timeout_secs", 30_i64)?
            .set_default("scheduler.poll_interval_secs", 60_i64)?
            .set_default("scheduler.stale_after_secs", 86_400_i64)?
            .set_default("scheduler.pickup_window_secs", 3_600_i64)?
            .set_default("scheduler.pickup_prep_secs", 1_800_i64)?
            .set_default("uploads.dir", "uploads")?
            .set_default("log.filter", "info,actix_web=info")?
            .set_default("currency", "BYN")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(env))
    }
}
