use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn check_env() {
    // None of these abort startup; each missing credential degrades one route.
    let optional = [
        ("TMDB_API_KEY", "metadata proxy requests will fail with 500"),
        ("AUTH_URL", "all callers will be rate limited at the guest tier"),
        ("AI_GATEWAY_KEY", "chat recommendations will be unavailable"),
    ];
    for (key, effect) in optional {
        if env::var(key).is_err() {
            warn!("{} is not set: {}", key, effect);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    match dotenv() {
        Ok(path) => info!("Loaded environment from {:?}", path),
        Err(e) => warn!("No .env file loaded ({}) - relying on environment", e),
    }
    check_env();
    pirateone_gateway::app::run_server().await
}
