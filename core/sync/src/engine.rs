//! Core sync engine that drains the operation log in batches.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use offsync_common::{EntryId, Error, LogEntry, RemoteId, Result, SyncStatus, Task};
use offsync_store::LocalStore;

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::probe::ConnectivityProbe;
use crate::protocol::{BatchRequest, Outcome, RemoteTask};
use crate::retry::{FailureDisposition, FailureTracker};
use crate::scheduler::SyncTarget;
use crate::state::{SyncResult, SyncStatusReport};
use crate::transport::RemoteAuthority;

/// Sync engine for one local store and one remote authority.
///
/// All engine state lives here; independent instances do not share
/// anything. Cycles on one instance never overlap.
pub struct SyncEngine<S, R>
where
    S: LocalStore + ?Sized,
    R: RemoteAuthority + ?Sized,
{
    /// Record store and operation log.
    store: Arc<S>,
    /// Remote side of the exchange.
    remote: Arc<R>,
    probe: ConnectivityProbe<R>,
    resolver: ConflictResolver,
    tracker: FailureTracker,
    config: SyncConfig,
    /// Held for the whole of a cycle.
    cycle_lock: Mutex<()>,
}

impl<S, R> SyncEngine<S, R>
where
    S: LocalStore + ?Sized,
    R: RemoteAuthority + ?Sized,
{
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - Configuration fails validation
    pub fn new(store: Arc<S>, remote: Arc<R>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            probe: ConnectivityProbe::new(remote.clone(), config.probe_timeout),
            tracker: FailureTracker::new(config.max_retries),
            resolver: ConflictResolver::new(),
            store,
            remote,
            config,
            cycle_lock: Mutex::new(()),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether the remote authority currently answers.
    pub async fn is_reachable(&self) -> bool {
        self.probe.is_reachable().await
    }

    /// Run one sync cycle to completion.
    ///
    /// Concurrent calls wait for the running cycle to finish. Failures are
    /// reported in the result, never returned as errors.
    pub async fn run_sync_cycle(&self) -> SyncResult {
        let _cycle = self.cycle_lock.lock().await;
        let start = Instant::now();

        info!("Starting sync cycle against {}", self.remote.name());

        if !self.probe.is_reachable().await {
            warn!("Remote authority unreachable, skipping sync cycle");
            return SyncResult::aborted("Remote authority unreachable", start.elapsed());
        }

        let entries = match self.store.drain(self.tracker.max_retries()) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read operation log: {}", e);
                return SyncResult::aborted(
                    format!("Failed to read operation log: {}", e),
                    start.elapsed(),
                );
            }
        };

        let mut result = SyncResult::default();

        if entries.is_empty() {
            debug!("Operation log is empty");
        } else {
            let batches = entries.chunks(self.config.batch_size);
            let batch_count = batches.len();
            for (index, batch) in batches.enumerate() {
                debug!(
                    "Dispatching batch {}/{} ({} entries)",
                    index + 1,
                    batch_count,
                    batch.len()
                );
                self.dispatch_batch(batch, &mut result).await;
            }
        }

        result.finish(start.elapsed());

        if result.success {
            if let Err(e) = self.store.set_last_sync_at(Utc::now()) {
                warn!("Failed to record sync time: {}", e);
            }
        }

        info!(
            "Sync cycle completed in {:?}: {} synced, {} failed, {} conflicts, {} unanswered",
            result.duration, result.synced, result.failed, result.conflicts, result.unanswered
        );

        result
    }

    /// Read-only diagnostics.
    pub async fn status(&self) -> Result<SyncStatusReport> {
        let reachable = self.probe.is_reachable().await;
        Ok(SyncStatusReport {
            pending: self.store.pending_count(self.tracker.max_retries())?,
            last_sync_at: self.store.last_sync_at()?,
            reachable,
            outstanding: self.store.total_count()?,
        })
    }

    /// Exchange one batch and apply its outcomes.
    async fn dispatch_batch(&self, batch: &[LogEntry], result: &mut SyncResult) {
        let request = BatchRequest::from_entries(batch, Utc::now());

        let exchange = match timeout(self.config.batch_timeout, self.remote.push_batch(&request))
            .await
        {
            Ok(exchange) => exchange,
            Err(_) => Err(Error::Timeout(format!(
                "No batch response within {:?}",
                self.config.batch_timeout
            ))),
        };

        let response = match exchange {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                if e.is_transport() {
                    warn!("Batch of {} entries not delivered: {}", batch.len(), message);
                } else {
                    error!("Batch of {} entries failed: {}", batch.len(), message);
                }
                for entry in batch {
                    self.fail_entry(entry, &message, result);
                }
                return;
            }
        };

        let mut in_flight: HashMap<&EntryId, &LogEntry> =
            batch.iter().map(|entry| (&entry.id, entry)).collect();

        // Response order, not entry order. Later outcomes for the same
        // entity overwrite earlier ones.
        for item in response.results {
            let (entry_id, outcome) = item.into_outcome();
            let Some(entry) = in_flight.remove(&entry_id) else {
                warn!("Ignoring outcome for unknown or already answered entry {}", entry_id);
                continue;
            };
            self.apply_outcome(entry, outcome, result);
        }

        for entry in in_flight.values() {
            warn!(
                "No outcome for entry {} ({} of {}), leaving it queued",
                entry.id, entry.kind, entry.entity_id
            );
        }
        result.unanswered += in_flight.len();
    }

    fn apply_outcome(&self, entry: &LogEntry, outcome: Outcome, result: &mut SyncResult) {
        match outcome {
            Outcome::Success { remote_id } => match self.apply_success(entry, remote_id) {
                Ok(()) => result.synced += 1,
                Err(e) => self.fail_entry(entry, &e.to_string(), result),
            },
            Outcome::Conflict { remote } => match self.apply_conflict(entry, remote) {
                Ok(()) => {
                    result.synced += 1;
                    result.conflicts += 1;
                }
                Err(e) => self.fail_entry(entry, &e.to_string(), result),
            },
            Outcome::Error { message } => self.fail_entry(entry, &message, result),
        }
    }

    fn apply_success(&self, entry: &LogEntry, remote_id: Option<RemoteId>) -> Result<()> {
        match self.store.get(&entry.entity_id)? {
            Some(mut task) => {
                if let (Some(known), Some(assigned)) = (&task.remote_id, &remote_id) {
                    if known != assigned {
                        warn!(
                            "Entity {} already has remote id {}, ignoring {}",
                            task.id, known, assigned
                        );
                    }
                }
                self.settle(&mut task, entry, remote_id)?;
                self.store.put(&task)?;
            }
            None => debug!(
                "Entity {} for entry {} no longer exists",
                entry.entity_id, entry.id
            ),
        }
        self.store.remove(&entry.id)?;
        debug!("Entry {} ({} of {}) synced", entry.id, entry.kind, entry.entity_id);
        Ok(())
    }

    fn apply_conflict(&self, entry: &LogEntry, remote: RemoteTask) -> Result<()> {
        let local = self.store.get(&entry.entity_id)?;
        let remote = remote.into_task(&entry.entity_id, local.as_ref());

        let mut resolved = match &local {
            Some(local) => {
                let resolution = self.resolver.resolve(local, &remote);
                info!(
                    "Conflict on {} (entry {}): {:?} version wins (local {}, remote {})",
                    entry.entity_id,
                    entry.id,
                    resolution.winner,
                    local.updated_at,
                    remote.updated_at
                );
                resolution.task
            }
            None => remote,
        };

        self.settle(&mut resolved, entry, None)?;
        self.store.put(&resolved)?;
        self.store.remove(&entry.id)?;
        Ok(())
    }

    /// Apply an accepted mutation to its record.
    ///
    /// The record becomes `synced` only when `entry` is its last queued
    /// mutation; otherwise it keeps `pending` until the newer entries are
    /// answered.
    fn settle(&self, task: &mut Task, entry: &LogEntry, remote_id: Option<RemoteId>) -> Result<()> {
        let queued = self
            .store
            .entries_for(&entry.entity_id)?
            .into_iter()
            .filter(|e| e.id != entry.id && e.retry_count < self.tracker.max_retries())
            .count();

        if queued == 0 {
            task.mark_synced(remote_id, Utc::now());
        } else {
            task.acknowledge(remote_id, Utc::now());
            task.sync_status = SyncStatus::Pending;
            debug!(
                "Entity {} still has {} queued mutations after entry {}",
                entry.entity_id, queued, entry.id
            );
        }
        Ok(())
    }

    fn fail_entry(&self, entry: &LogEntry, message: &str, result: &mut SyncResult) {
        match self
            .tracker
            .handle_failure(self.store.as_ref(), entry, message)
        {
            Ok(FailureDisposition::Exhausted { .. }) => result.exhausted += 1,
            Ok(FailureDisposition::Retained { .. }) => {}
            Err(e) => error!(
                "Failed to record failure of entry {} ({} of {}): {}",
                entry.id, entry.kind, entry.entity_id, e
            ),
        }
        result.record_failure(entry, message);
    }
}

#[async_trait]
impl<S, R> SyncTarget for SyncEngine<S, R>
where
    S: LocalStore + ?Sized + 'static,
    R: RemoteAuthority + ?Sized + 'static,
{
    async fn run_cycle(&self) -> SyncResult {
        self.run_sync_cycle().await
    }

    async fn is_reachable(&self) -> bool {
        self.probe.is_reachable().await
    }
}
