use chat_session::config::Config;
use chat_session::relay::Relay;
use dotenv::dotenv;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;

    let relay = Arc::new(Relay::new());
    let addr = config.relay_addr.clone();
    let server = Arc::clone(&relay);
    tokio::spawn(async move {
        if let Err(e) = server.run(&addr).await {
            log::error!("relay error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!(
        "shutting down relay ({} participant(s) connected)",
        relay.connected().await
    );

    Ok(())
}
