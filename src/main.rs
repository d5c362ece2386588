use lottery_server::{
    config::ServerConfig, server::Server, shutdown::termination_signal, storage::CsvStore,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // connect tracing to stdout
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "loaded configuration");

    let shutdown = CancellationToken::new();
    let store = CsvStore::new(&config.bets_file, config.winning_number);
    let server = Server::bind(&config, store, shutdown.clone()).await?;
    tracing::info!("server is listening on: {}", server.local_addr()?);

    tokio::spawn(async move {
        match termination_signal().await {
            Ok(()) => {
                tracing::info!("received a termination signal, shutting down");
                shutdown.cancel();
            }
            Err(err) => tracing::error!(%err, "failed to listen for termination signals"),
        }
    });

    server.run().await?;

    Ok(())
}
