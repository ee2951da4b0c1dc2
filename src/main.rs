use anyhow::Context;
use axum::Router;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use helpdesk_sla::core::config::AppConfig;
use helpdesk_sla::core::shared::state::AppState;
use helpdesk_sla::core::shared::utils::{create_conn, run_migrations};
use helpdesk_sla::sla::{configure_sla_routes, PgSlaStore, SlaEngine};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let pool = create_conn()?;
    run_migrations(&pool).map_err(|e| anyhow::anyhow!(e))?;

    let store = Arc::new(PgSlaStore::new(pool));
    let engine = SlaEngine::new(store.clone(), store, &config.engine);
    let addr = config.bind_address();
    let state = Arc::new(AppState::new(config, engine));

    let app = Router::new().merge(configure_sla_routes()).with_state(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e.into());
        }
    };
    info!("SLA engine listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("SLA engine stopped");
    Ok(())
}
