//! Scheduled maintenance worker

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::{CancelToken, LifecycleEngine, MaintenanceConfig, MaintenanceStats};
use crate::error::{CortexError, Result};

/// Commands for the maintenance worker
#[derive(Debug)]
pub enum MaintenanceCommand {
    /// Run a pass now and report its stats
    RunNow(oneshot::Sender<Result<MaintenanceStats>>),
    /// Stop the worker
    Stop,
}

/// Runs [`LifecycleEngine::run_maintenance`] on a fixed interval
///
/// The first scheduled run happens one full interval after start. Runs
/// execute on the blocking pool so they never stall the runtime.
pub struct MaintenanceWorker {
    sender: mpsc::Sender<MaintenanceCommand>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl MaintenanceWorker {
    /// Start the worker; must be called inside a Tokio runtime
    pub fn start(engine: Arc<LifecycleEngine>, config: MaintenanceConfig, period: Duration) -> Self {
        let (sender, mut receiver) = mpsc::channel::<MaintenanceCommand>(16);
        let cancel = CancelToken::new();
        let period = if period.is_zero() {
            super::DEFAULT_MAINTENANCE_INTERVAL
        } else {
            period
        };

        let dry_run = config.dry_run;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    cmd = receiver.recv() => match cmd {
                        Some(MaintenanceCommand::RunNow(reply)) => {
                            let result = Self::run_once(&engine, &config, &token).await;
                            let _ = reply.send(result);
                        }
                        Some(MaintenanceCommand::Stop) | None => break,
                    },
                    _ = ticker.tick() => {
                        if let Err(e) = Self::run_once(&engine, &config, &token).await {
                            tracing::error!("Scheduled maintenance failed: {}", e);
                        }
                    }
                }

                if token.is_cancelled() {
                    break;
                }
            }

            tracing::info!("Maintenance worker stopped");
        });

        tracing::info!(interval = ?period, dry_run, "Maintenance worker started");

        Self {
            sender,
            cancel,
            handle,
        }
    }

    async fn run_once(
        engine: &Arc<LifecycleEngine>,
        config: &MaintenanceConfig,
        cancel: &CancelToken,
    ) -> Result<MaintenanceStats> {
        let engine = Arc::clone(engine);
        let config = config.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || engine.run_maintenance(&config, &cancel))
            .await
            .map_err(|e| CortexError::Internal(format!("maintenance task failed: {}", e)))?
    }

    /// Run a pass immediately and wait for its stats
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::RunNow(reply))
            .await
            .map_err(|_| CortexError::Internal("Maintenance worker channel closed".to_string()))?;

        response
            .await
            .map_err(|_| CortexError::Internal("Maintenance worker dropped the run".to_string()))?
    }

    /// Token cancelled when the worker stops
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel any running pass and wait for the worker to exit
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        // The worker may already have exited after seeing the token
        let _ = self.sender.send(MaintenanceCommand::Stop).await;

        self.handle
            .await
            .map_err(|e| CortexError::Internal(format!("maintenance worker panicked: {}", e)))
    }
}
