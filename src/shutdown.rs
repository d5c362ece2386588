/// Resolves once the process is asked to stop, by Ctrl-C or by SIGTERM
#[cfg(unix)]
pub async fn termination_signal() -> tokio::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
pub async fn termination_signal() -> tokio::io::Result<()> {
    tokio::signal::ctrl_c().await
}
