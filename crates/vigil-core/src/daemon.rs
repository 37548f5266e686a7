use crate::{
    clock::SystemClock,
    config::{get_data_dir, GuardConfig},
    guard::{format_dwell, GuardCallbacks, PresenceGuard},
    ipc::{listen, IpcCommand, IpcRequest, IpcResponse},
    platform::{host_parts, TimerTick},
};
use anyhow::Result;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use vigil_storage::SessionStore;

/// Reports the UI callbacks to the log when running headless
pub struct LoggingCallbacks;

impl GuardCallbacks for LoggingCallbacks {
    fn on_timer_end(&mut self) {
        log::info!("Study session complete");
    }

    fn on_return(&mut self, dwell: chrono::Duration) {
        log::info!("Welcome back (away for {})", format_dwell(dwell));
    }
}

/// Wait for `deadline`, or forever when there is none
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct Daemon {
    guard: PresenceGuard,
    clock: Arc<SystemClock>,
    ticks: Option<mpsc::UnboundedReceiver<TimerTick>>,
    session_poll: Duration,
    sock_path: PathBuf,
}

impl Daemon {
    /// Must be called inside a tokio runtime so the background timing
    /// source passes capability detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn new(config: GuardConfig, store: Arc<dyn SessionStore>) -> Result<Self> {
        let sock_path = get_data_dir()?.join("vigil.sock");
        Ok(Self::with_socket(config, store, sock_path))
    }

    #[must_use]
    pub fn with_socket(
        config: GuardConfig,
        store: Arc<dyn SessionStore>,
        sock_path: PathBuf,
    ) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let mut parts = host_parts(&config, Some(tick_tx));
        parts.callbacks = Box::new(LoggingCallbacks);

        let clock = Arc::new(SystemClock::new());
        let session_poll = Duration::from_millis(config.session_poll_ms.max(1));
        let guard = PresenceGuard::new(config, store, clock.clone(), parts);

        Self {
            guard,
            clock,
            ticks: Some(tick_rx),
            session_poll,
            sock_path,
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &std::path::Path {
        &self.sock_path
    }

    pub async fn run_with_signals(&mut self) -> Result<()> {
        let (ipc_tx, mut ipc_rx) = mpsc::channel::<IpcCommand>(16);
        let sock_path = self.sock_path.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = listen(ipc_tx, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let Some(mut ticks) = self.ticks.take() else {
            anyhow::bail!("Daemon is already running");
        };

        let mut ticker = interval(self.session_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Daemon started with signal handling and IPC");

        loop {
            let deadline = self
                .guard
                .next_deadline_ms()
                .map(|ms| Instant::from_std(self.clock.instant_at(ms)));

            tokio::select! {
                _ = ticker.tick() => {
                    self.guard.tick();
                }
                () = sleep_until_opt(deadline) => {
                    self.guard.poll();
                }
                Some(tick) = ticks.recv() => {
                    self.guard.on_timer_tick(&tick.source);
                }
                Some(command) = ipc_rx.recv() => {
                    if self.handle_ipc(command) {
                        log::info!("Shutdown requested over IPC");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    break;
                }
            }
        }

        listener.abort();
        self.guard.shutdown();
        if let Err(e) = std::fs::remove_file(&self.sock_path) {
            log::debug!("Could not remove {}: {e}", self.sock_path.display());
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    /// Returns true when the daemon should stop
    fn handle_ipc(&mut self, command: IpcCommand) -> bool {
        let (response, stop) = match command.request {
            IpcRequest::Status => (IpcResponse::Status(self.guard.status()), false),
            IpcRequest::Signal(signal) => {
                log::debug!("Signal over IPC: {signal}");
                self.guard.handle_signal(signal);
                (IpcResponse::Ack, false)
            }
            IpcRequest::ClearSession(pin) => match self.guard.clear_session(&pin) {
                Ok(()) => (IpcResponse::Ack, false),
                Err(e) => (IpcResponse::Error(e.to_string()), false),
            },
            IpcRequest::Shutdown => (IpcResponse::Shutdown, true),
        };
        if command.reply.send(response).is_err() {
            log::debug!("IPC client went away before the reply");
        }
        stop
    }
}
