use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;

use zeroad_env_core::transport::RlClient;
use zeroad_openenv_proxy::server::{AppState, serve};
use zeroad_openenv_proxy::session::{ProxySettings, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ProxySettings::from_env();
    let engine = Arc::new(RlClient::new(settings.rl_url.clone()));
    let session = Session::from_settings(engine, &settings);
    let state = AppState {
        session: Arc::new(Mutex::new(session)),
    };

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("bind {}", settings.bind_addr))?;

    info!(
        bind = %settings.bind_addr,
        rl_url = %settings.rl_url,
        snapshot = ?settings.snapshot_path,
        "proxy.listening"
    );

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("proxy.shutdown");
    })
    .await
}
