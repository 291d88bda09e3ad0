#![forbid(unsafe_code)]

use std::net::SocketAddr;

use agora_server::{build_router, init_tracing, AppConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let outbound_queue = std::env::var("AGORA_OUTBOUND_QUEUE").map_or_else(
        |_| Ok(AppConfig::default().outbound_queue),
        |value| {
            value.parse::<usize>().map_err(|e| {
                anyhow::anyhow!("invalid AGORA_OUTBOUND_QUEUE value {value:?}: {e}")
            })
        },
    )?;
    let app_config = AppConfig {
        database_url: std::env::var("AGORA_DATABASE_URL").ok(),
        outbound_queue,
        ..AppConfig::default()
    };
    if app_config.database_url.is_none() {
        tracing::warn!("AGORA_DATABASE_URL not set, falling back to the in-memory store");
    }

    let app = build_router(&app_config)?;
    let addr = std::env::var("AGORA_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid AGORA_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "agora-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
