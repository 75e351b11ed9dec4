use anyhow::Result;
use p2pcall::relay::Relay;
use p2pcall::RelayConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    p2pcall::logger::init();

    let config = RelayConfig::from_env()?;
    info!("Starting signaling relay on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;

    let relay = Relay::new();
    tokio::select! {
        result = relay.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down relay"),
    }
    Ok(())
}
