use anyhow::Context;
use factura_core::aeat::AeatClient;
use factura_core::config::Config;
use factura_core::invoice::Party;
use factura_core::service::InvoiceService;
use factura_core::store::MemoryStore;
use factura_server::{AppState, router};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(env = config.env().as_str(), "configuration loaded");

    let store = Arc::new(MemoryStore::new());
    if let Ok(path) = std::env::var("FACTURA_PARTIES") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading parties from {path}"))?;
        let parties: Vec<Party> =
            serde_json::from_str(&raw).with_context(|| format!("parsing parties in {path}"))?;
        info!(count = parties.len(), "registering parties");
        for party in parties {
            store.register_party(party).await;
        }
    }

    let client = Arc::new(AeatClient::new(&config)?);
    info!(endpoint = client.endpoint(), "AEAT client ready");
    let service = InvoiceService::from_config(&config, store, client)?;
    let app = router(AppState::new(service));

    let bind = std::env::var("FACTURA_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(address = %bind, "factura server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
