use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use api_router::{api_routes, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::{db::SurrealDbClient, types::refresh_token::RefreshToken},
    utils::config::get_config,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config().context("failed to load configuration")?;
    config.validate()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("failed to connect to SurrealDB")?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;
    if let Err(e) = RefreshToken::purge_expired(&db).await {
        warn!("Failed to purge expired refresh tokens: {e}");
    }

    let oracle = assistant_pipeline::oracle::from_config(&config)?;
    info!(provider = oracle.name(), "LLM oracle initialized");

    let api_state = ApiState::new(&config, db, oracle);
    let app = build_app(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}

fn build_app(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api", api_routes(&api_state))
        .with_state(AppState { api_state })
}
