//! Order system service: webhook endpoint, store views and the bot.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ordersystem::api::{self, ApiState};
use ordersystem::bot::{self, BotQueue};
use ordersystem::config::Config;
use ordersystem::db;
use ordersystem::pricing::Pricing;
use ordersystem::provider::BtcPayClient;
use ordersystem::{Orders, Policy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, verbosity from RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // A .env file is optional.
    let _ = dotenvy::dotenv();

    // Settings come from the environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // SQLite pool; pending migrations run here.
    let pool = db::init_pool(&config.database_url).await?;

    // Outbound client for the payment provider API.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let provider = Arc::new(BtcPayClient::new(
        client,
        &config.btcpay_url,
        &config.btcpay_api_key,
    ));

    // Store actions and settlements queue collection ids for the bot.
    let (bot_queue, bot_rx) = BotQueue::channel(config.bot_queue_capacity);
    let orders = Orders::new(
        pool,
        Pricing::new(config.store_fee_share, config.store_fee_base),
        Policy::from_config(&config),
        provider,
        bot_queue,
    );

    // ─── Bot ──────────────────────────────────────────────
    tokio::spawn(bot::run(
        orders.clone(),
        bot_rx,
        Duration::from_secs(config.bot_interval_secs.max(1)),
    ));

    // ─── HTTP ─────────────────────────────────────────────
    if config.webhook_secret.is_none() {
        info!("WEBHOOK_SECRET not set, webhook signatures are not checked");
    }
    let api_state = Arc::new(ApiState {
        orders,
        webhook_secret: config.webhook_secret.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/webhook", post(api::webhook))
        .route("/collections/:id", get(api::get_collection))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
