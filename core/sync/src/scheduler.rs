//! Sync scheduling: explicit requests, periodic cycles and reconnect
//! triggers, all funneled through one worker so cycles never overlap.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use offsync_common::{Error, Result};

use crate::config::duration_secs;
use crate::state::SyncResult;

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SyncMode {
    /// Sync only on explicit request.
    Manual,
    /// Sync at regular intervals.
    Periodic {
        #[serde(with = "duration_secs")]
        interval: Duration,
    },
    /// Poll connectivity and sync when the remote comes back.
    OnReconnect {
        #[serde(with = "duration_secs")]
        poll_interval: Duration,
    },
}

impl SyncMode {
    /// Reject modes whose timer period is zero.
    ///
    /// # Errors
    /// - `Config` for a zero `interval` or `poll_interval`
    pub fn validate(&self) -> Result<()> {
        match self {
            SyncMode::Periodic { interval } if interval.is_zero() => Err(Error::Config(
                "periodic sync interval must be non-zero".to_string(),
            )),
            SyncMode::OnReconnect { poll_interval } if poll_interval.is_zero() => Err(
                Error::Config("reconnect poll interval must be non-zero".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Requests accepted by the scheduler worker.
#[derive(Debug)]
pub enum SyncRequest {
    /// Run one full cycle.
    Cycle,
    /// Stop the worker.
    Shutdown,
}

/// Something the scheduler can drive.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Run one sync cycle to completion.
    async fn run_cycle(&self) -> SyncResult;

    /// Whether the remote authority currently answers.
    async fn is_reachable(&self) -> bool;
}

type RequestMessage = (SyncRequest, oneshot::Sender<SyncResult>);

/// Front end for requesting syncs.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: Arc<RwLock<SyncMode>>,
    mode_changed: Arc<Notify>,
    request_tx: mpsc::Sender<RequestMessage>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let mode = Arc::new(RwLock::new(mode));
        let mode_changed = Arc::new(Notify::new());

        let scheduler = Self {
            mode: mode.clone(),
            mode_changed: mode_changed.clone(),
            request_tx,
        };
        let handle = SyncSchedulerHandle {
            mode,
            mode_changed,
            request_rx,
        };

        (scheduler, handle)
    }

    /// Request one cycle and wait for its result.
    ///
    /// # Errors
    /// - The worker is not running
    pub async fn request_sync(&self) -> Result<SyncResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::Cycle, response_tx))
            .await
            .map_err(|_| Error::InvalidInput("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::InvalidInput("Scheduler stopped before replying".to_string()))
    }

    /// Change the sync mode. The worker picks it up immediately.
    ///
    /// # Errors
    /// - `Config` if the mode has a zero period
    pub async fn set_mode(&self, mode: SyncMode) -> Result<()> {
        mode.validate()?;
        *self.mode.write().await = mode;
        self.mode_changed.notify_one();
        Ok(())
    }

    /// Get current sync mode.
    pub async fn get_mode(&self) -> SyncMode {
        self.mode.read().await.clone()
    }

    /// Stop the worker after the current cycle.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Worker side of the scheduler.
pub struct SyncSchedulerHandle {
    mode: Arc<RwLock<SyncMode>>,
    mode_changed: Arc<Notify>,
    request_rx: mpsc::Receiver<RequestMessage>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// Spawn this in a tokio task. Requests and automatic triggers are
    /// processed one at a time.
    pub async fn run<T>(mut self, target: Arc<T>)
    where
        T: SyncTarget + ?Sized,
    {
        let mut mode = self.mode.read().await.clone();
        let mut ticker = Self::ticker_for(&mode);
        let mut last_reachable: Option<bool> = None;

        info!("Sync scheduler started ({:?})", mode);

        loop {
            tokio::select! {
                message = self.request_rx.recv() => {
                    let Some((request, response_tx)) = message else {
                        info!("All scheduler senders dropped, stopping");
                        break;
                    };
                    match request {
                        SyncRequest::Shutdown => {
                            info!("Sync scheduler shutting down");
                            break;
                        }
                        SyncRequest::Cycle => {
                            debug!("Processing sync request");
                            let result = target.run_cycle().await;
                            let _ = response_tx.send(result);
                        }
                    }
                }

                _ = Self::wait_for_tick(&mut ticker) => {
                    match mode {
                        SyncMode::Periodic { .. } => {
                            debug!("Triggering periodic sync");
                            Self::log_result("Periodic", &target.run_cycle().await);
                        }
                        SyncMode::OnReconnect { .. } => {
                            let reachable = target.is_reachable().await;
                            if reachable && last_reachable != Some(true) {
                                info!("Remote authority reachable again, triggering sync");
                                Self::log_result("Reconnect", &target.run_cycle().await);
                            }
                            last_reachable = Some(reachable);
                        }
                        SyncMode::Manual => {}
                    }
                }

                _ = self.mode_changed.notified() => {}
            }

            // Pick up mode changes
            let current = self.mode.read().await.clone();
            if current != mode {
                info!("Sync mode changed to {:?}", current);
                ticker = Self::ticker_for(&current);
                last_reachable = None;
                mode = current;
            }
        }
    }

    fn ticker_for(mode: &SyncMode) -> Option<Interval> {
        let period = match mode {
            SyncMode::Periodic { interval } => *interval,
            SyncMode::OnReconnect { poll_interval } => *poll_interval,
            SyncMode::Manual => return None,
        };
        if period.is_zero() {
            warn!("Ignoring {:?}: zero period, only explicit requests will sync", mode);
            return None;
        }
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    }

    async fn wait_for_tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    fn log_result(trigger: &str, result: &SyncResult) {
        if result.success {
            info!(
                "{} sync completed: {} synced, {} conflicts",
                trigger, result.synced, result.conflicts
            );
        } else if let Some(reason) = &result.aborted {
            warn!("{} sync aborted: {}", trigger, reason);
        } else {
            warn!(
                "{} sync finished with {} failures ({} synced)",
                trigger, result.failed, result.synced
            );
        }
    }
}
