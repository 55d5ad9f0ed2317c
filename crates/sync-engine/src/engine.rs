// crates/sync-engine/src/engine.rs
//! Sync orchestrator
//!
//! One cycle pushes queued local mutations, then pulls remote changes.
//! Cycles never overlap; partial failures are counted, never raised.

use crate::conflict::{ConflictResolver, Verdict};
use crate::error::{SyncError, SyncResult};
use crate::protocol::RemotePayload;
use crate::remote::{RemoteClient, RemoteError};
use crate::types::{
    ConflictId, ConflictRecord, ConflictStatistics, CycleOutcome, CycleReport, EngineStatus,
    EntryVersion, PhaseReport, Resolution, ResolutionSuggestion, SyncPhase, SyncSettings,
    TerminalFailure,
};
use futures::stream::{self, StreamExt};
use lotkeeper_core::{
    AppError, EntryId, FailureOutcome, NaturalKey, OperationId, OperationType, ParkingEntry,
    QueueStatus, QueuedOperation, RemoteId, SyncMetadataUpdate, SyncStatus, Timestamp,
};
use lotkeeper_database::{OperationQueue, RecordStore};
use lotkeeper_resilience::{with_timeout, KeyedLock, RetryPolicy};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Outcome of pushing one queued operation
#[derive(Debug)]
enum ItemOutcome {
    Synced,
    Retrying,
    Terminal(TerminalFailure),
    Deferred,
    Skipped,
    /// Remote unreachable before anything succeeded; the item was released untouched
    Aborted,
    /// Transient failure, charged only once the batch is known not to abort
    Unsettled { op: QueuedOperation, error: String },
}

/// Outcome of applying one pulled record
#[derive(Debug)]
enum PullOutcome {
    Applied,
    Unchanged,
    Merged,
    Conflict,
}

/// Tracks whether any remote data call of the current cycle succeeded
#[derive(Debug, Default)]
struct CycleProgress {
    any_success: AtomicBool,
}

impl CycleProgress {
    fn record_success(&self) {
        self.any_success.store(true, Ordering::Release);
    }

    fn any_success(&self) -> bool {
        self.any_success.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    phase: SyncPhase,
    last_sync_time: Option<Timestamp>,
    sync_count: u64,
    error_count: u64,
}

/// Releases the cycle flag when a cycle ends, however it ends
struct CycleGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_phase(SyncPhase::Idle);
        self.engine.running.store(false, Ordering::Release);
    }
}

/// Main synchronization engine
pub struct SyncEngine {
    store: RecordStore,
    queue: OperationQueue,
    remote: Arc<dyn RemoteClient>,
    resolver: ConflictResolver,
    locks: KeyedLock<EntryId>,
    settings: SyncSettings,
    backoff: RetryPolicy,
    enabled: AtomicBool,
    running: AtomicBool,
    stop_requested: AtomicBool,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    /// Creates a new sync engine
    pub fn new(
        store: RecordStore,
        queue: OperationQueue,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
    ) -> Self {
        let resolver = ConflictResolver::new(settings.merge_window);
        Self::with_resolver(store, queue, remote, resolver, settings)
    }

    pub fn with_resolver(
        store: RecordStore,
        queue: OperationQueue,
        remote: Arc<dyn RemoteClient>,
        resolver: ConflictResolver,
        settings: SyncSettings,
    ) -> Self {
        let backoff = RetryPolicy::new(queue.max_attempts() as usize)
            .with_initial_delay(settings.initial_backoff)
            .with_max_delay(settings.max_backoff);

        Self {
            store,
            queue,
            remote,
            resolver,
            locks: KeyedLock::new(),
            enabled: AtomicBool::new(settings.enabled),
            settings,
            backoff,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Shares per-entry locks with other writers, such as the parking service
    pub fn with_locks(mut self, locks: KeyedLock<EntryId>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> KeyedLock<EntryId> {
        self.locks.clone()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Repairs state left by a crash: in-flight operations and `syncing` entries go back to pending
    pub async fn recover(&self) -> SyncResult<(u64, u64)> {
        let operations = self.queue.recover_in_flight().await?;
        let entries = self.store.reset_in_flight().await?;
        Ok((operations, entries))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        log::info!("Sync {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Asks a running push to stop after its current batch
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut state) = self.state.lock() {
            state.phase = phase;
        }
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                // A stop request applies to the cycle running when it was made
                self.stop_requested.store(false, Ordering::Release);
                CycleGuard { engine: self }
            })
    }

    fn record_cycle_result(&self, ok: bool) {
        if let Ok(mut state) = self.state.lock() {
            if ok {
                state.sync_count += 1;
                state.last_sync_time = Some(Timestamp::now());
            } else {
                state.error_count += 1;
            }
        }
    }

    /// Runs one push-then-pull cycle unless one is already running
    pub async fn sync_now(&self) -> SyncResult<CycleOutcome> {
        if !self.is_enabled() {
            return Ok(CycleOutcome::Disabled);
        }
        let Some(_guard) = self.try_begin() else {
            log::debug!("Sync cycle already running; request coalesced");
            return Ok(CycleOutcome::Skipped);
        };

        let started = Instant::now();
        let result = self.run_cycle().await;
        self.record_cycle_result(result.is_ok());

        match result {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                log::info!(
                    "Sync cycle finished in {}ms: pushed {} ({} failed), pulled {} ({} conflicts, {} merged)",
                    report.duration_ms,
                    report.push.synced,
                    report.push.failed,
                    report.pull.synced,
                    report.pull.conflicts,
                    report.pull.merged
                );
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                log::warn!("Sync cycle aborted: {}", e);
                Err(e)
            }
        }
    }

    /// Runs only the push phase
    pub async fn push(&self) -> SyncResult<PhaseReport> {
        let _guard = self.try_begin().ok_or(SyncError::InProgress)?;
        let result = async {
            self.ensure_reachable().await?;
            self.set_phase(SyncPhase::Pushing);
            self.push_phase(&CycleProgress::default()).await
        }
        .await;
        self.record_cycle_result(result.is_ok());
        result
    }

    /// Runs only the pull phase
    pub async fn pull(&self) -> SyncResult<PhaseReport> {
        let _guard = self.try_begin().ok_or(SyncError::InProgress)?;
        let result = async {
            self.ensure_reachable().await?;
            self.set_phase(SyncPhase::Pulling);
            self.pull_phase(&CycleProgress::default()).await
        }
        .await;
        self.record_cycle_result(result.is_ok());
        result
    }

    async fn run_cycle(&self) -> SyncResult<CycleReport> {
        self.ensure_reachable().await?;
        let progress = CycleProgress::default();

        self.set_phase(SyncPhase::Pushing);
        let push = self.push_phase(&progress).await?;

        self.set_phase(SyncPhase::Pulling);
        let pull = self.pull_phase(&progress).await?;

        Ok(CycleReport {
            push,
            pull,
            duration_ms: 0,
        })
    }

    async fn ensure_reachable(&self) -> SyncResult<()> {
        let reachable = with_timeout(self.settings.request_timeout, self.remote.check_connectivity())
            .await
            .unwrap_or(false);
        if reachable {
            Ok(())
        } else {
            Err(SyncError::Offline("connectivity check failed".to_string()))
        }
    }

    /// Bounds a remote call; a timeout is a transient failure
    async fn call<T, F>(&self, operation: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match with_timeout(self.settings.request_timeout, operation).await {
            Ok(result) => result,
            Err(e) => Err(RemoteError::Transient(e.to_string())),
        }
    }

    async fn enqueue_snapshot(
        &self,
        operation_type: OperationType,
        entry: &ParkingEntry,
    ) -> SyncResult<OperationId> {
        let payload = serde_json::to_string(&RemotePayload::from_entry(entry)?)?;
        Ok(self
            .queue
            .enqueue(operation_type, entry.id, &payload, None)
            .await?)
    }

    // ===== Push =====

    /// Enqueues dirty entries that lost their queue operation to a crash
    async fn reconcile_dirty(&self) -> SyncResult<usize> {
        let mut repaired = 0;
        for (entry, meta) in self.store.get_dirty_entities().await? {
            if meta.sync_status == SyncStatus::Conflict {
                continue;
            }
            let _guard = self.locks.lock(entry.id).await;
            if self.queue.has_outstanding(entry.id).await? {
                continue;
            }

            let operation_type = match (entry.is_deleted(), &meta.remote_id) {
                (true, None) => {
                    // Never reached the remote; nothing to delete there
                    self.store.purge(entry.id).await?;
                    continue;
                }
                (true, Some(_)) => OperationType::Delete,
                (false, None) => OperationType::Create,
                (false, Some(_)) => OperationType::Update,
            };
            self.enqueue_snapshot(operation_type, &entry).await?;
            repaired += 1;
        }

        if repaired > 0 {
            log::info!("Re-queued {} dirty entries without queue operations", repaired);
        }
        Ok(repaired)
    }

    async fn push_phase(&self, progress: &CycleProgress) -> SyncResult<PhaseReport> {
        let mut report = PhaseReport::default();
        self.reconcile_dirty().await?;

        let batch_size = self.settings.batch_size.max(1);
        let mut seen: HashSet<OperationId> = HashSet::new();

        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                log::info!("Stop requested; push ends between batches");
                break;
            }

            // Each operation is attempted at most once per phase
            let batch: Vec<QueuedOperation> = self
                .queue
                .dequeue_ready(batch_size + seen.len())
                .await?
                .into_iter()
                .filter(|op| !seen.contains(&op.id))
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }
            seen.extend(batch.iter().map(|op| op.id));

            let outcomes: Vec<SyncResult<ItemOutcome>> = stream::iter(batch)
                .map(|op| self.push_item(op, progress))
                .buffer_unordered(self.settings.max_workers.max(1))
                .collect()
                .await;

            let mut aborted = false;
            let mut unsettled = Vec::new();
            for outcome in outcomes {
                match outcome {
                    Ok(ItemOutcome::Synced) => report.synced += 1,
                    Ok(ItemOutcome::Retrying) => report.failed += 1,
                    Ok(ItemOutcome::Terminal(failure)) => {
                        report.failed += 1;
                        report.terminal.push(failure);
                    }
                    Ok(ItemOutcome::Deferred) => report.deferred += 1,
                    Ok(ItemOutcome::Skipped) => {}
                    Ok(ItemOutcome::Aborted) => aborted = true,
                    Ok(ItemOutcome::Unsettled { op, error }) => unsettled.push((op, error)),
                    Err(e) => {
                        log::error!("Push item failed locally: {}", e);
                        report.failed += 1;
                    }
                }
            }

            if aborted && !progress.any_success() {
                // Siblings that failed alongside the outage go back uncharged
                for (op, _) in &unsettled {
                    if let Err(e) = self.queue.release(op.id).await {
                        log::warn!("Could not release operation {}: {}", op.id, e);
                    }
                }
                return Err(SyncError::Offline(
                    "remote became unreachable during push".to_string(),
                ));
            }

            for (op, error) in unsettled {
                report.failed += 1;
                match self.settle_transient(&op, error).await {
                    Ok(ItemOutcome::Terminal(failure)) => report.terminal.push(failure),
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("Could not record failure of {}: {}", op.id, e);
                        if let Err(e) = self.queue.release(op.id).await {
                            log::warn!("Could not release operation {}: {}", op.id, e);
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn push_item(&self, op: QueuedOperation, progress: &CycleProgress) -> SyncResult<ItemOutcome> {
        let _guard = self.locks.lock(op.target).await;

        match self.queue.mark_processing(op.id).await {
            Ok(()) => {}
            // Claimed or retired by someone else since it was dequeued
            Err(AppError::RecordNotFound { .. }) => return Ok(ItemOutcome::Skipped),
            Err(e) => return Err(e.into()),
        }

        let result = self.push_claimed(&op, progress).await;
        if result.is_err() {
            if let Err(e) = self.queue.release(op.id).await {
                log::warn!("Could not release operation {}: {}", op.id, e);
            }
        }
        result
    }

    async fn push_claimed(&self, op: &QueuedOperation, progress: &CycleProgress) -> SyncResult<ItemOutcome> {
        let meta = match self.store.get_sync_metadata(op.target).await {
            Ok(meta) => meta,
            Err(AppError::RecordNotFound { .. }) => {
                // Entry purged while the operation waited
                self.queue.mark_completed(op.id).await?;
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        if meta.sync_status == SyncStatus::Conflict {
            self.queue.release(op.id).await?;
            return Ok(ItemOutcome::Deferred);
        }

        let payload: RemotePayload = match serde_json::from_str(&op.payload) {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("unreadable payload: {}", e);
                let outcome = self.queue.mark_failed_permanently(op.id, &message).await?;
                return Ok(self.failure_outcome(op, outcome, message));
            }
        };

        self.store
            .upsert_sync_metadata(op.target, &SyncMetadataUpdate::syncing())
            .await?;

        match self.send(op.operation_type, meta.remote_id.clone(), &payload).await {
            Ok(remote_id) => {
                progress.record_success();
                self.complete(op, meta.remote_id, remote_id).await?;
                Ok(ItemOutcome::Synced)
            }
            Err(RemoteError::Unreachable(message)) if !progress.any_success() => {
                log::warn!("Remote unreachable while pushing {}: {}", op.id, message);
                self.queue.release(op.id).await?;
                self.store
                    .upsert_sync_metadata(op.target, &SyncMetadataUpdate::pending())
                    .await?;
                Ok(ItemOutcome::Aborted)
            }
            Err(err) if err.is_transient() => {
                self.store
                    .upsert_sync_metadata(op.target, &SyncMetadataUpdate::pending())
                    .await?;
                log::warn!("Push of {} for entry {} failed: {}", op.operation_type, op.target, err);
                Ok(ItemOutcome::Unsettled {
                    op: op.clone(),
                    error: err.to_string(),
                })
            }
            Err(err) => {
                let outcome = self.queue.mark_failed_permanently(op.id, &err.to_string()).await?;
                self.store
                    .upsert_sync_metadata(op.target, &SyncMetadataUpdate::pending())
                    .await?;
                Ok(self.failure_outcome(op, outcome, err.to_string()))
            }
        }
    }

    /// Charges the attempt of a transient failure and schedules its retry
    async fn settle_transient(&self, op: &QueuedOperation, error: String) -> SyncResult<ItemOutcome> {
        let delay = self.backoff.delay_for_attempt(op.attempts as usize + 1);
        let outcome = self.queue.mark_failed(op.id, &error, delay).await?;
        Ok(self.failure_outcome(op, outcome, error))
    }

    fn failure_outcome(&self, op: &QueuedOperation, outcome: FailureOutcome, error: String) -> ItemOutcome {
        match outcome {
            FailureOutcome::Retrying { .. } => ItemOutcome::Retrying,
            FailureOutcome::Terminal { .. } => ItemOutcome::Terminal(TerminalFailure {
                operation_id: op.id,
                entry_id: op.target,
                error,
            }),
        }
    }

    /// Sends one operation; returns the remote id the record now lives under
    async fn send(
        &self,
        operation_type: OperationType,
        remote_id: Option<RemoteId>,
        payload: &RemotePayload,
    ) -> Result<Option<RemoteId>, RemoteError> {
        match operation_type {
            OperationType::Create | OperationType::Update => {
                self.upsert_remote(remote_id, payload).await.map(Some)
            }
            OperationType::Delete => {
                let Some(remote_id) = remote_id else {
                    return Ok(None);
                };
                match self.call(self.remote.delete_entry(&remote_id)).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Updates a linked record, otherwise creates it; a duplicate key counts as created
    async fn upsert_remote(
        &self,
        remote_id: Option<RemoteId>,
        payload: &RemotePayload,
    ) -> Result<RemoteId, RemoteError> {
        if let Some(remote_id) = remote_id {
            match self.call(self.remote.update_entry(&remote_id, payload)).await {
                Ok(()) => return Ok(remote_id),
                Err(RemoteError::NotFound(_)) => {
                    log::info!("Remote record {} is gone; recreating it", remote_id);
                }
                Err(e) => return Err(e),
            }
        }

        match self.call(self.remote.create_entry(payload)).await {
            Ok(remote_id) => Ok(remote_id),
            Err(RemoteError::DuplicateKey {
                existing: Some(remote_id),
            }) => Ok(remote_id),
            Err(RemoteError::DuplicateKey { existing: None }) => {
                let key = NaturalKey::new(
                    &payload.vehicle_number,
                    Timestamp::from_millis(payload.entry_time.timestamp_millis()),
                );
                self.call(self.remote.find_by_natural_key(&key))
                    .await?
                    .ok_or_else(|| {
                        RemoteError::Transient(format!("duplicate {} reported but not found", key))
                    })
            }
            Err(e) => Err(e),
        }
    }

    async fn complete(
        &self,
        op: &QueuedOperation,
        known_remote_id: Option<RemoteId>,
        remote_id: Option<RemoteId>,
    ) -> SyncResult<()> {
        self.queue.mark_completed(op.id).await?;
        let outstanding = self.queue.has_outstanding(op.target).await?;

        if op.operation_type == OperationType::Delete {
            let tombstoned = self
                .store
                .get_any(op.target)
                .await?
                .map(|e| e.is_deleted())
                .unwrap_or(false);
            if tombstoned && !outstanding {
                self.store.purge(op.target).await?;
                return Ok(());
            }
        }

        let update = if outstanding {
            SyncMetadataUpdate::pending()
        } else {
            SyncMetadataUpdate::synced(None)
        };
        let update = match remote_id {
            Some(id) if known_remote_id.as_ref() != Some(&id) => update.with_remote_id(id),
            _ => update,
        };
        self.store.upsert_sync_metadata(op.target, &update).await?;
        Ok(())
    }

    // ===== Pull =====

    /// Whether some entry is in conflict without a pending record, e.g. after a restart
    async fn has_orphaned_conflicts(&self) -> SyncResult<bool> {
        for id in self.store.conflicted_ids().await? {
            if self.resolver.pending_for(id)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn pull_phase(&self, progress: &CycleProgress) -> SyncResult<PhaseReport> {
        let mut report = PhaseReport::default();

        let checkpoint = self.store.checkpoint().await?;
        let since = match checkpoint {
            Some(cp) if !self.has_orphaned_conflicts().await? => Some(cp),
            _ => None,
        };

        let changes = match self
            .call(self.remote.list_entries_since(since.as_deref()))
            .await
        {
            Ok(changes) => {
                progress.record_success();
                changes
            }
            Err(RemoteError::Unreachable(message)) if !progress.any_success() => {
                return Err(SyncError::Offline(message));
            }
            Err(e) => {
                log::warn!("Listing remote changes failed: {}", e);
                report.failed += 1;
                return Ok(report);
            }
        };

        log::debug!(
            "Pulled {} remote records ({})",
            changes.entries.len(),
            if since.is_some() { "incremental" } else { "full" }
        );

        for payload in &changes.entries {
            match self.apply_pulled(payload).await {
                Ok(PullOutcome::Applied) => report.synced += 1,
                Ok(PullOutcome::Unchanged) => {}
                Ok(PullOutcome::Merged) => report.merged += 1,
                Ok(PullOutcome::Conflict) => report.conflicts += 1,
                Err(e) => {
                    log::warn!("Could not apply remote record {:?}: {}", payload.id, e);
                    report.failed += 1;
                }
            }
        }

        // Records that failed to apply must be listed again next cycle
        match changes.checkpoint {
            Some(checkpoint) if report.failed == 0 => {
                self.store.set_checkpoint(&checkpoint).await?;
            }
            Some(_) => log::warn!(
                "Keeping pull checkpoint; {} remote record(s) could not be applied",
                report.failed
            ),
            None => {}
        }
        Ok(report)
    }

    async fn apply_pulled(&self, payload: &RemotePayload) -> SyncResult<PullOutcome> {
        let remote_id = payload
            .remote_id()
            .ok_or_else(|| SyncError::invalid_data("remote record without id"))?;
        let remote = payload.to_version()?;

        let existing = match self.store.find_by_remote_id(&remote_id).await? {
            Some(found) => Some(found),
            None => {
                self.store
                    .find_by_natural_key(&remote.entry().natural_key())
                    .await?
            }
        };

        let Some((found, _)) = existing else {
            if remote.is_deleted() {
                return Ok(PullOutcome::Unchanged);
            }
            self.store.insert_remote(remote.entry(), &remote_id).await?;
            return Ok(PullOutcome::Applied);
        };

        let _guard = self.locks.lock(found.id).await;
        // Re-read under the lock; a local write may have landed meanwhile
        let local = self
            .store
            .get_any(found.id)
            .await?
            .ok_or_else(|| AppError::not_found("Entry", found.id.to_string()))?;
        let meta = self.store.get_sync_metadata(local.id).await?;

        if let Some(linked) = &meta.remote_id {
            if linked != &remote_id {
                return Err(SyncError::invalid_data(format!(
                    "natural key {} is linked to remote id {}, not {}",
                    local.natural_key(),
                    linked,
                    remote_id
                )));
            }
        }

        if local.is_deleted() && remote.is_deleted() {
            self.queue.supersede_pending(local.id).await?;
            self.store.purge(local.id).await?;
            self.resolver.dismiss_for(local.id)?;
            return Ok(PullOutcome::Applied);
        }

        if !meta.is_dirty && meta.sync_status != SyncStatus::Conflict {
            if remote.is_deleted() {
                self.store.purge(local.id).await?;
                return Ok(PullOutcome::Applied);
            }
            if local.business_eq(remote.entry()) && meta.remote_id.is_some() {
                return Ok(PullOutcome::Unchanged);
            }
            self.store
                .apply_remote(local.id, remote.entry(), &remote_id)
                .await?;
            return Ok(PullOutcome::Applied);
        }

        let local_version = EntryVersion::from_entry(local.clone());
        match self
            .resolver
            .evaluate(&local_version, &remote, Some(remote_id.clone()))?
        {
            Verdict::NoConflict => {
                // Both sides converged; the entry may leave conflict status
                self.resolver.dismiss_for(local.id)?;
                self.store
                    .upsert_sync_metadata(
                        local.id,
                        &SyncMetadataUpdate::pending().with_remote_id(remote_id),
                    )
                    .await?;
                Ok(PullOutcome::Unchanged)
            }
            Verdict::AutoMerged { merged, .. } => {
                let written = self
                    .store
                    .apply_resolution(
                        local.id,
                        &merged,
                        &SyncMetadataUpdate::pending().with_remote_id(remote_id),
                    )
                    .await?;
                self.enqueue_snapshot(OperationType::Update, &written).await?;
                Ok(PullOutcome::Merged)
            }
            Verdict::Manual(_) => {
                let update = if meta.remote_id.is_none() {
                    SyncMetadataUpdate::conflict().with_remote_id(remote_id)
                } else {
                    SyncMetadataUpdate::conflict()
                };
                self.store.upsert_sync_metadata(local.id, &update).await?;
                Ok(PullOutcome::Conflict)
            }
        }
    }

    // ===== Conflicts =====

    /// Applies an operator's decision to the store, then closes the conflict
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        resolution: Resolution,
        notes: Option<String>,
    ) -> SyncResult<ConflictRecord> {
        let record = self.resolver.get(conflict_id)?;
        let entry_id = record.entry_id();
        let _guard = self.locks.lock(entry_id).await;

        match &resolution {
            Resolution::UseRemote => {
                self.queue.supersede_pending(entry_id).await?;
                if record.remote.is_deleted() {
                    self.store.purge(entry_id).await?;
                } else {
                    self.store
                        .apply_resolution(
                            entry_id,
                            record.remote.entry(),
                            &SyncMetadataUpdate::synced(record.remote_id.clone()),
                        )
                        .await?;
                }
            }
            Resolution::UseLocal => {
                let current = self
                    .store
                    .get_any(entry_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Entry", entry_id.to_string()))?;
                self.store
                    .upsert_sync_metadata(entry_id, &SyncMetadataUpdate::pending())
                    .await?;
                if !self.queue.has_outstanding(entry_id).await? {
                    let operation_type = if current.is_deleted() {
                        OperationType::Delete
                    } else {
                        OperationType::Update
                    };
                    self.enqueue_snapshot(operation_type, &current).await?;
                }
            }
            Resolution::Merged(entry) => {
                let written = self
                    .store
                    .apply_resolution(entry_id, entry, &SyncMetadataUpdate::pending())
                    .await?;
                self.queue.supersede_pending(entry_id).await?;
                self.enqueue_snapshot(OperationType::Update, &written).await?;
            }
        }

        let resolved = self.resolver.manual_resolve(conflict_id, resolution, notes)?;
        log::info!(
            "Resolved conflict {} on entry {} with {}",
            conflict_id,
            entry_id,
            resolved
                .resolution
                .as_ref()
                .map(|r| r.label())
                .unwrap_or("none")
        );
        Ok(resolved)
    }

    pub fn pending_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.resolver.pending_conflicts()
    }

    pub fn resolution_suggestions(
        &self,
        conflict_id: ConflictId,
    ) -> SyncResult<Vec<ResolutionSuggestion>> {
        self.resolver.resolution_suggestions(conflict_id)
    }

    pub fn conflict_statistics(&self) -> ConflictStatistics {
        self.resolver.statistics()
    }

    // ===== Status =====

    pub async fn queue_status(&self) -> SyncResult<QueueStatus> {
        Ok(self.queue.status().await?)
    }

    /// Re-arms a terminally failed operation
    pub async fn retry_failed(&self, operation_id: OperationId) -> SyncResult<()> {
        let op = self.queue.get(operation_id).await?;
        self.queue.retry_terminal(operation_id).await?;
        if let Err(e) = self
            .store
            .upsert_sync_metadata(op.target, &SyncMetadataUpdate::pending())
            .await
        {
            log::debug!("Entry {} of re-armed operation not updated: {}", op.target, e);
        }
        Ok(())
    }

    /// Gets the current engine status
    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        let (phase, last_sync_time, sync_count, error_count) = match state {
            Ok(s) => (s.phase, s.last_sync_time, s.sync_count, s.error_count),
            Err(_) => (SyncPhase::Idle, None, 0, 0),
        };
        EngineStatus {
            enabled: self.is_enabled(),
            is_syncing: self.running.load(Ordering::Acquire),
            phase,
            last_sync_time,
            sync_count,
            error_count,
        }
    }
}
