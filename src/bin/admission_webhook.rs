//! admission-webhook: cluster-side pod policy validator
//!
//! Expects the TLS cert and key at /tls/tls.crt and /tls/tls.key mounted
//! into the pod (provisioned by cert-manager, which also populates the
//! ValidatingWebhookConfiguration CA bundle). `DEV_WEBHOOK_NO_TLS=true`
//! serves plaintext for local testing only.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use coderipper_exec::admission::{self, AdmissionPolicy};

const TLS_CERT_PATH: &str = "/tls/tls.crt";
const TLS_KEY_PATH: &str = "/tls/tls.key";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderipper_exec=info".parse()?)
                .add_directive("admission_webhook=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let policy = AdmissionPolicy::from_env();
    match &policy.required_runtime_class {
        Some(runtime_class) => info!("Enforcing runtime class: {}", runtime_class),
        None => warn!("REQUIRED_RUNTIME_CLASS not set; runtime-class enforcement disabled"),
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9443);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = admission::router(policy);

    if std::env::var("DEV_WEBHOOK_NO_TLS").as_deref() == Ok("true") {
        warn!("DEV_WEBHOOK_NO_TLS=true: running webhook without TLS (not for production)");
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("admission webhook listening on {} (plaintext)", addr);
        axum::serve(listener, app).await.context("server error")?;
        return Ok(());
    }

    let tls = RustlsConfig::from_pem_file(TLS_CERT_PATH, TLS_KEY_PATH)
        .await
        .context("Failed to load TLS certificate")?;
    info!("admission webhook listening on {} (TLS)", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await
        .context("server error")?;

    Ok(())
}
