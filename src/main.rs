use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use duolink::config::{Args, ServerConfig};
use duolink::logging::init_logging;
use duolink::signaling::{serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = init_logging(&args.log_level);
    let config = ServerConfig::try_from(args)?;
    info!(
        filter = %level,
        difficulty = config.challenge_difficulty,
        ttl_secs = config.challenge_ttl.as_secs(),
        grace_secs = config.room_grace.as_secs(),
        "starting duolink relay"
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let state = AppState::new(&config);

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    })
    .await?;
    Ok(())
}
