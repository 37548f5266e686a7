/// Foreground daemon and IPC commands
use anyhow::{bail, Result};
use std::{path::Path, sync::Arc};
use vigil_core::{
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon, GuardConfig, RawSignal,
};
use vigil_storage::Database;

pub async fn watch() -> Result<()> {
    let config = GuardConfig::load()?;
    let db = Arc::new(Database::new(None)?);
    let mut daemon = Daemon::new(config, db)?;
    log::info!("Guarding; IPC socket at {}", daemon.socket_path().display());
    daemon.run_with_signals().await
}

fn client(data_dir: &Path) -> Result<IpcClient> {
    let client = IpcClient::new(&data_dir.join("vigil.sock"));
    if !client.socket_exists() {
        bail!("Daemon is not running. Start it with `vigil watch`.");
    }
    Ok(client)
}

pub async fn send_signal(data_dir: &Path, name: &str) -> Result<()> {
    let signal: RawSignal = name.parse().map_err(anyhow::Error::msg)?;
    match client(data_dir)?
        .send_command(IpcRequest::Signal(signal))
        .await?
    {
        IpcResponse::Ack => {
            log::debug!("Delivered {signal}");
            Ok(())
        }
        IpcResponse::Error(message) => bail!(message),
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
}

pub async fn shutdown(data_dir: &Path) -> Result<()> {
    match client(data_dir)?.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon stopped.");
            Ok(())
        }
        Ok(resp) => bail!("Unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Removing stale socket.");
            std::fs::remove_file(data_dir.join("vigil.sock"))?;
            Ok(())
        }
    }
}
