use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, oneshot},
};

use crate::guard::GuardStatus;
use crate::signal_fusion::RawSignal;

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    Status,
    Signal(RawSignal),
    /// PIN-gated forced exit, so the daemon does not mistake it for expiry
    ClearSession(String),
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcResponse {
    Status(GuardStatus),
    Ack,
    Shutdown,
    Error(String),
}

/// A request waiting for the daemon loop to answer it
#[derive(Debug)]
pub struct IpcCommand {
    pub request: IpcRequest,
    pub reply: oneshot::Sender<IpcResponse>,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Whether a daemon socket file exists; it may still be stale
    #[must_use]
    pub fn socket_exists(&self) -> bool {
        self.sock_path.exists()
    }

    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

/// Forward one request to the daemon loop and wait for its answer
async fn dispatch(tx: &mpsc::Sender<IpcCommand>, request: IpcRequest) -> IpcResponse {
    let (reply, answer) = oneshot::channel();
    if tx.send(IpcCommand { request, reply }).await.is_err() {
        return IpcResponse::Error(String::from("daemon is shutting down"));
    }
    answer
        .await
        .unwrap_or_else(|_| IpcResponse::Error(String::from("daemon dropped the request")))
}

async fn serve(tx: mpsc::Sender<IpcCommand>, mut stream: UnixStream) -> Result<()> {
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer).await?;
    if buffer.is_empty() {
        return Ok(());
    }

    let response = match bincode::deserialize::<IpcRequest>(&buffer) {
        Ok(request) => dispatch(&tx, request).await,
        Err(e) => {
            log::error!("IPC deserialize error: {e}");
            IpcResponse::Error(format!("malformed request: {e}"))
        }
    };

    let encoded = bincode::serialize(&response)?;
    stream.write_all(&encoded).await?;
    Ok(())
}

pub async fn listen(tx: mpsc::Sender<IpcCommand>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    if let Some(parent) = sock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::debug!("IPC listening on {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(tx, stream).await {
                        log::error!("IPC handle error: {e}");
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
