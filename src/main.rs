use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use dotenvy::dotenv;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod scheduler;
mod service;
mod store;
mod utils;

use config::{Config, StoreKind};
use db::init_db;

use crate::docs::ApiDoc;
use crate::service::AttendanceService;
use crate::store::{AttendanceStore, InMemoryAttendanceStore, MySqlAttendanceStore};
use crate::utils::cipher::IdCipher;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "site attendance"
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn AttendanceStore>> {
    match config.store {
        StoreKind::MySql => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for the mysql store")?;
            let pool = init_db(url, config.run_migrations).await?;
            Ok(Arc::new(MySqlAttendanceStore::new(pool)))
        }
        StoreKind::Memory => {
            warn!("using the in-memory store, nothing is persisted");
            Ok(Arc::new(InMemoryAttendanceStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "attendance.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!("Server starting...");

    let cipher = IdCipher::new(config.id_cipher_key.as_bytes(), config.id_index_key.as_bytes())
        .context("invalid ID_CIPHER_KEY / ID_INDEX_KEY")?;
    let store = build_store(&config).await?;
    let service = AttendanceService::new(store, cipher);

    scheduler::spawn(service.clone(), &config);

    let server_addr = config.server_addr.clone();
    let service_data = Data::new(service);
    let config_data = Data::new(config);

    HttpServer::new(move || {
        let config = config_data.clone();
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(service_data.clone())
            .app_data(config.clone())
            .service(index)
            // Protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, &config))
    })
    .bind(&server_addr)
    .with_context(|| format!("failed to bind {server_addr}"))?
    .run()
    .await?;

    Ok(())
}
