//! exec-engine: execution API supporting native, Docker and Kubernetes
//! backends

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use coderipper_exec::config::Config;
use coderipper_exec::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderipper_exec=info".parse()?)
                .add_directive("exec_engine=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());
    if config.auth_jwt_secret.is_none() {
        tracing::warn!("AUTH_JWT_SECRET not set; /run will be unauthenticated");
    }

    let state = AppState::new(config.clone()).context("Failed to build service state")?;
    let _sweeper = coderipper_exec::rate_limit::RateLimiter::spawn_sweeper(state.limiter.clone());
    let app = server::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("exec-engine listening on {} (mode={})", addr, config.runner_mode);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
