use anyhow::Context;
use lottery_server::{
    client::{self, Agency},
    config::AgencyConfig,
    shutdown::termination_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // connect tracing to stdout
    tracing_subscriber::fmt::init();

    let config = AgencyConfig::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    let content = tokio::fs::read_to_string(&config.bets_file)
        .await
        .with_context(|| format!("failed to read {}", config.bets_file.display()))?;
    let bets = client::read_bets(config.id, &content)?;

    let mut agency = Agency::connect(
        config.id,
        &config.server_address,
        config.batch_max_amount,
    )
    .await?;

    let session = async {
        agency.send_bets(&bets).await?;
        agency.finish().await?;
        agency.winners().await
    };

    tokio::select! {
        winners = session => {
            let winners = winners.context("failed to take part in the draw")?;
            tracing::info!(agency = config.id, winners = winners.len(), "received the winners");
        }
        _ = termination_signal() => {
            tracing::info!(agency = config.id, "received a termination signal, closing the connection");
        }
    }

    Ok(())
}
