//! Scripted in-memory remote service and engine harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lotkeeper_core::{normalize_vehicle_number, EntryId, FeeSchedule, NaturalKey, RemoteId, Timestamp};
use lotkeeper_database::{
    connect_in_memory, run_migrations, run_queue_migrations, OperationQueue, RecordStore,
};
use lotkeeper_resilience::KeyedLock;
use lotkeeper_sync_engine::{
    ParkingService, RemoteChangeSet, RemoteClient, RemoteError, RemotePayload, SyncEngine,
    SyncSettings,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed entry time used by the scenarios (2024-01-15 10:00 UTC)
pub const ENTRY: i64 = 1_705_312_800_000;

#[derive(Default)]
struct MockState {
    online: bool,
    /// remote id -> (version, record)
    records: BTreeMap<String, (u64, RemotePayload)>,
    version: u64,
    next_id: u64,
    /// Failures consumed by the next calls touching a vehicle number
    scripted: HashMap<String, VecDeque<RemoteError>>,
    /// Failures returned on every call touching a vehicle number
    persistent: HashMap<String, RemoteError>,
    /// Every duplicate-key response omits the existing id
    hide_duplicate_id: bool,
    connectivity_delay: Option<Duration>,
    create_calls: usize,
}

/// Remote service double with per-vehicle failure scripting.
///
/// Deletions leave tombstones so that listings report them. Checkpoints are
/// the store version at listing time.
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                online: true,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn set_connectivity_delay(&self, delay: Duration) {
        self.state().connectivity_delay = Some(delay);
    }

    pub fn hide_duplicate_id(&self) {
        self.state().hide_duplicate_id = true;
    }

    pub fn fail_next(&self, vehicle_number: &str, error: RemoteError) {
        self.state()
            .scripted
            .entry(normalize_vehicle_number(vehicle_number))
            .or_default()
            .push_back(error);
    }

    pub fn fail_always(&self, vehicle_number: &str, error: RemoteError) {
        self.state()
            .persistent
            .insert(normalize_vehicle_number(vehicle_number), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.scripted.clear();
        state.persistent.clear();
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Creates a record on the server side, as another device would
    pub fn seed(&self, payload: RemotePayload) -> RemoteId {
        let mut state = self.state();
        Self::store_new(&mut state, payload)
    }

    /// Edits a record on the server side; `last_modified` is set to now before `edit` runs
    pub fn edit(&self, remote_id: &RemoteId, edit: impl FnOnce(&mut RemotePayload)) {
        let mut state = self.state();
        state.version += 1;
        let version = state.version;
        let (v, record) = state
            .records
            .get_mut(remote_id.as_str())
            .expect("unknown remote id");
        *v = version;
        record.last_modified = Utc::now();
        edit(record);
    }

    /// Deletes a record on the server side
    pub fn remove(&self, remote_id: &RemoteId) {
        self.edit(remote_id, |p| p.deleted_at = Some(Utc::now()));
    }

    pub fn record(&self, remote_id: &RemoteId) -> Option<RemotePayload> {
        self.state()
            .records
            .get(remote_id.as_str())
            .map(|(_, p)| p.clone())
    }

    pub fn find_vehicle(&self, vehicle_number: &str) -> Option<RemotePayload> {
        let vehicle = normalize_vehicle_number(vehicle_number);
        self.state()
            .records
            .values()
            .map(|(_, p)| p)
            .find(|p| p.vehicle_number == vehicle)
            .cloned()
    }

    /// Records that are not deleted
    pub fn live_count(&self) -> usize {
        self.state()
            .records
            .values()
            .filter(|(_, p)| p.deleted_at.is_none())
            .count()
    }

    fn store_new(state: &mut MockState, mut payload: RemotePayload) -> RemoteId {
        state.next_id += 1;
        state.version += 1;
        let id = format!("srv-{}", state.next_id);
        payload.id = Some(id.clone());
        let version = state.version;
        state.records.insert(id.clone(), (version, payload));
        RemoteId::new(id)
    }

    fn check(state: &mut MockState, vehicle_number: &str) -> Result<(), RemoteError> {
        if !state.online {
            return Err(RemoteError::Unreachable("connection refused".to_string()));
        }
        let vehicle = normalize_vehicle_number(vehicle_number);
        if let Some(error) = state.persistent.get(&vehicle) {
            return Err(error.clone());
        }
        if let Some(error) = state.scripted.get_mut(&vehicle).and_then(|q| q.pop_front()) {
            return Err(error);
        }
        Ok(())
    }

    fn live_with_key(state: &MockState, key: &NaturalKey) -> Option<String> {
        state
            .records
            .iter()
            .find(|(_, (_, p))| {
                p.deleted_at.is_none()
                    && normalize_vehicle_number(&p.vehicle_number) == key.vehicle_number
                    && p.entry_time.timestamp_millis() == key.entry_time.as_millis()
            })
            .map(|(id, _)| id.clone())
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn check_connectivity(&self) -> bool {
        let (online, delay) = {
            let state = self.state();
            (state.online, state.connectivity_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        online
    }

    async fn create_entry(&self, payload: &RemotePayload) -> Result<RemoteId, RemoteError> {
        let mut state = self.state();
        state.create_calls += 1;
        Self::check(&mut state, &payload.vehicle_number)?;

        let key = NaturalKey::new(
            &payload.vehicle_number,
            Timestamp::from_millis(payload.entry_time.timestamp_millis()),
        );
        if let Some(existing) = Self::live_with_key(&state, &key) {
            let existing = if state.hide_duplicate_id {
                None
            } else {
                Some(RemoteId::new(existing))
            };
            return Err(RemoteError::DuplicateKey { existing });
        }
        Ok(Self::store_new(&mut state, payload.clone()))
    }

    async fn update_entry(
        &self,
        remote_id: &RemoteId,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check(&mut state, &payload.vehicle_number)?;

        state.version += 1;
        let version = state.version;
        match state.records.get_mut(remote_id.as_str()) {
            Some((v, record)) if record.deleted_at.is_none() => {
                *v = version;
                *record = payload.clone();
                record.id = Some(remote_id.as_str().to_string());
                Ok(())
            }
            _ => Err(RemoteError::NotFound(remote_id.to_string())),
        }
    }

    async fn delete_entry(&self, remote_id: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.state();
        let vehicle = state
            .records
            .get(remote_id.as_str())
            .map(|(_, p)| p.vehicle_number.clone())
            .unwrap_or_default();
        Self::check(&mut state, &vehicle)?;

        state.version += 1;
        let version = state.version;
        match state.records.get_mut(remote_id.as_str()) {
            Some((v, record)) if record.deleted_at.is_none() => {
                *v = version;
                record.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(RemoteError::NotFound(remote_id.to_string())),
        }
    }

    async fn list_entries_since(
        &self,
        checkpoint: Option<&str>,
    ) -> Result<RemoteChangeSet, RemoteError> {
        let state = self.state();
        if !state.online {
            return Err(RemoteError::Unreachable("connection refused".to_string()));
        }
        let since: u64 = checkpoint.and_then(|c| c.parse().ok()).unwrap_or(0);
        let entries = state
            .records
            .values()
            .filter(|(v, _)| *v > since)
            .map(|(_, p)| p.clone())
            .collect();
        Ok(RemoteChangeSet {
            entries,
            checkpoint: Some(state.version.to_string()),
        })
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<RemoteId>, RemoteError> {
        let state = self.state();
        if !state.online {
            return Err(RemoteError::Unreachable("connection refused".to_string()));
        }
        Ok(Self::live_with_key(&state, key).map(RemoteId::new))
    }
}

/// Engine, service and remote wired over one in-memory database
pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub service: ParkingService,
    pub remote: Arc<MockRemote>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(SyncSettings::default(), 5).await
    }

    pub async fn with(settings: SyncSettings, max_attempts: u32) -> Self {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_queue_migrations(&pool).await.unwrap();

        let store = RecordStore::new(pool.clone());
        let queue = OperationQueue::with_max_attempts(pool, max_attempts);
        let locks: KeyedLock<EntryId> = KeyedLock::new();
        let remote = MockRemote::new();

        let engine = SyncEngine::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            settings,
        )
        .with_locks(locks.clone());
        let service = ParkingService::new(store, queue, locks, FeeSchedule::default());

        Self {
            engine: Arc::new(engine),
            service,
            remote,
        }
    }
}

/// Settings that make failed operations eligible again immediately
pub fn no_backoff() -> SyncSettings {
    SyncSettings {
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..Default::default()
    }
}
