use std::io;
use std::sync::Arc;

use actix::{Actor, Addr};
use actix_cors::Cors;
use actix_files::Files;
use actix_web::middleware::Logger;
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use bot::ChatBot;
use lifecycle::OrderLifecycle;
use notify::telegram::TelegramClient;
use notify::{Dispatcher, LogNotifier, Notifier};
use promo::PromoLedger;
use schedulers::{PickupCompleter, StalenessSweeper};
use services::db_utils::{get_db_pool, init_schema, start_db_actor, AppState, DbActor};
use services::uploads::UploadStore;
use settings::Settings;
use types::UPLOADS_ROUTE;

mod bot;
mod error;
mod lifecycle;
mod notify;
mod promo;
mod schedulers;
mod schema;
mod services;
mod settings;
mod types;


fn io_err(context: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{context}: {err}"))
}

fn init_db(settings: &Settings) -> io::Result<Addr<DbActor>> {
    let pool = get_db_pool(&settings.database.url, settings.database.pool_size)
        .map_err(|err| io_err("database pool", err))?;
    init_schema(&pool).map_err(|err| io_err("database schema", err))?;
    tracing::info!(url = %settings.database.url, workers = settings.database.workers, "database ready");

    Ok(start_db_actor(pool, settings.database.workers))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    let settings = Settings::load().map_err(|err| io_err("configuration", err))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter)))
        .init();

    let db = init_db(&settings)?;
    let admin_id = settings.admin.telegram_id;
    if admin_id.is_none() {
        tracing::warn!("ADMIN_TELEGRAM_ID is not set, only store admins can use admin endpoints");
    }

    let telegram = settings
        .telegram
        .bot_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .map(|token| TelegramClient::new(&settings.telegram.api_url, token));
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(client) => Arc::new(client.clone()),
        None => {
            tracing::warn!("BOT_TOKEN is not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let dispatcher = Dispatcher::new(db.clone(), notifier, admin_id, settings.currency.clone());
    let lifecycle = OrderLifecycle::new(db.clone(), dispatcher, admin_id);
    let promos = PromoLedger::new(db.clone());
    let uploads = UploadStore::new(settings.uploads.dir.clone());
    tokio::fs::create_dir_all(uploads.dir()).await?;

    let scheduler = &settings.scheduler;
    let dispatcher = lifecycle.dispatcher().clone();
    StalenessSweeper::new(db.clone(), dispatcher, scheduler.poll_interval(), scheduler.stale_after()).start();
    PickupCompleter::new(
        db.clone(),
        lifecycle.clone(),
        scheduler.poll_interval(),
        scheduler.pickup_window(),
        scheduler.pickup_prep(),
    )
    .start();

    if let Some(client) = telegram {
        let bot = ChatBot::new(
            db.clone(),
            lifecycle.clone(),
            promos.clone(),
            settings.telegram.web_app_url.clone(),
            settings.currency.clone(),
        );
        actix_web::rt::spawn(bot::run_polling(client, bot, settings.telegram.poll_timeout_secs));
    }

    let state = Data::new(AppState { db, lifecycle, promos, uploads, admin_id });
    let uploads_dir = settings.uploads.dir.clone();

    tracing::info!(host = %settings.server.host, port = settings.server.port, "http server starting");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .service(services::home_page)
            .service(web::scope("/api").configure(services::configure_api))
            .service(Files::new(UPLOADS_ROUTE, uploads_dir.clone()))
    })
    .bind((settings.server.host.as_str(), settings.server.port))?
    .run()
    .await
}
