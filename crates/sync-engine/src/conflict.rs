// crates/sync-engine/src/conflict.rs
//! Conflict detection and resolution
//!
//! Divergent versions are classified, then either merged automatically by a
//! [`MergePolicy`] or parked in the pending set until an operator decides.

use crate::error::{SyncError, SyncResult};
use crate::types::{
    ConflictId, ConflictKind, ConflictRecord, ConflictStatistics, EntryVersion, Resolution,
    ResolutionSuggestion,
};
use lotkeeper_core::{EntryField, EntryId, EntryStatus, ParkingEntry, PaymentStatus, RemoteId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A named heuristic that settles differences in specific fields
pub trait MergeRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fields this rule decides
    fn fields(&self) -> &'static [EntryField];

    /// Writes the winning values into `merged`; false when the rule cannot decide
    fn apply(&self, local: &ParkingEntry, remote: &ParkingEntry, merged: &mut ParkingEntry) -> bool;
}

/// Exited beats Parked; the exit time follows the Exited side
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalStatusRule;

impl MergeRule for TerminalStatusRule {
    fn name(&self) -> &'static str {
        "terminal-status"
    }

    fn fields(&self) -> &'static [EntryField] {
        &[EntryField::Status, EntryField::ExitTime]
    }

    fn apply(&self, local: &ParkingEntry, remote: &ParkingEntry, merged: &mut ParkingEntry) -> bool {
        let winner = match (local.status, remote.status) {
            (EntryStatus::Exited, EntryStatus::Parked) => local,
            (EntryStatus::Parked, EntryStatus::Exited) => remote,
            // Same status with different exit times has no principled winner
            _ => return false,
        };
        merged.status = winner.status;
        merged.exit_time = winner.exit_time;
        true
    }
}

/// The larger fee wins
#[derive(Debug, Clone, Copy, Default)]
pub struct HigherFeeRule;

impl MergeRule for HigherFeeRule {
    fn name(&self) -> &'static str {
        "higher-fee"
    }

    fn fields(&self) -> &'static [EntryField] {
        &[EntryField::ParkingFee]
    }

    fn apply(&self, local: &ParkingEntry, remote: &ParkingEntry, merged: &mut ParkingEntry) -> bool {
        merged.parking_fee = local.parking_fee.max(remote.parking_fee);
        true
    }
}

/// Paid beats Unpaid and Pending; the payment type follows the Paid side
#[derive(Debug, Clone, Copy, Default)]
pub struct PaidPaymentRule;

impl PaidPaymentRule {
    fn is_open(status: PaymentStatus) -> bool {
        matches!(status, PaymentStatus::Unpaid | PaymentStatus::Pending)
    }
}

impl MergeRule for PaidPaymentRule {
    fn name(&self) -> &'static str {
        "paid-payment"
    }

    fn fields(&self) -> &'static [EntryField] {
        &[EntryField::PaymentStatus, EntryField::PaymentType]
    }

    fn apply(&self, local: &ParkingEntry, remote: &ParkingEntry, merged: &mut ParkingEntry) -> bool {
        let winner = match (local.payment_status, remote.payment_status) {
            (PaymentStatus::Paid, other) if Self::is_open(other) => local,
            (other, PaymentStatus::Paid) if Self::is_open(other) => remote,
            _ => return false,
        };
        merged.payment_status = winner.payment_status;
        merged.payment_type = winner.payment_type.clone();
        true
    }
}

/// An ordered set of merge rules
pub struct MergePolicy {
    rules: Vec<Box<dyn MergeRule>>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(vec![
            Box::new(TerminalStatusRule),
            Box::new(HigherFeeRule),
            Box::new(PaidPaymentRule),
        ])
    }
}

impl std::fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl MergePolicy {
    pub fn new(rules: Vec<Box<dyn MergeRule>>) -> Self {
        Self { rules }
    }

    /// A policy that never merges
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Merges two live versions, starting from the local one.
    ///
    /// Every differing field must be claimed by a rule that can decide it;
    /// otherwise there is no merge.
    pub fn merge(&self, local: &ParkingEntry, remote: &ParkingEntry) -> Option<ParkingEntry> {
        let differing = local.differing_fields(remote);
        let uncovered = differing
            .iter()
            .any(|field| !self.rules.iter().any(|rule| rule.fields().contains(field)));
        if uncovered {
            return None;
        }

        let mut merged = local.clone();
        for rule in &self.rules {
            let relevant = rule.fields().iter().any(|field| differing.contains(field));
            if relevant && !rule.apply(local, remote, &mut merged) {
                log::debug!("Merge rule {} could not decide", rule.name());
                return None;
            }
        }
        merged.last_modified = local.last_modified.max(remote.last_modified);
        Some(merged)
    }
}

/// What the resolver decided about a pair of versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Versions agree
    NoConflict,
    /// Merged automatically; the record is already resolved
    AutoMerged {
        record: ConflictRecord,
        merged: ParkingEntry,
    },
    /// Added to the pending set for manual resolution
    Manual(ConflictRecord),
}

#[derive(Debug, Default)]
struct ResolverState {
    pending: HashMap<ConflictId, ConflictRecord>,
    detected: u64,
    auto_resolved: u64,
    manually_resolved: u64,
}

/// Manages conflict detection and resolution
#[derive(Clone)]
pub struct ConflictResolver {
    state: Arc<Mutex<ResolverState>>,
    policy: Arc<MergePolicy>,
    merge_window: Duration,
}

impl ConflictResolver {
    pub fn new(merge_window: Duration) -> Self {
        Self::with_policy(merge_window, MergePolicy::default())
    }

    pub fn with_policy(merge_window: Duration, policy: MergePolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResolverState::default())),
            policy: Arc::new(policy),
            merge_window,
        }
    }

    pub fn merge_window(&self) -> Duration {
        self.merge_window
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, ResolverState>> {
        self.state
            .lock()
            .map_err(|_| SyncError::Custom("Lock poisoned".to_string()))
    }

    /// Classifies a divergence between two versions of one record
    pub fn detect(&self, local: &EntryVersion, remote: &EntryVersion) -> Option<ConflictRecord> {
        let kind = match (local, remote) {
            (EntryVersion::Deleted { .. }, EntryVersion::Deleted { .. }) => return None,
            (EntryVersion::Deleted { .. }, EntryVersion::Live(_)) => ConflictKind::DeleteUpdate,
            (EntryVersion::Live(_), EntryVersion::Deleted { .. }) => ConflictKind::UpdateDelete,
            (EntryVersion::Live(l), EntryVersion::Live(r)) => {
                if l.business_eq(r) {
                    return None;
                }
                if l.remote_id.is_none() && l.natural_key() == r.natural_key() {
                    ConflictKind::CreateCreate
                } else {
                    ConflictKind::UpdateUpdate
                }
            }
        };
        Some(ConflictRecord::new(kind, local.clone(), remote.clone()))
    }

    fn within_window(&self, local: &ParkingEntry, remote: &ParkingEntry) -> bool {
        let window_ms = i64::try_from(self.merge_window.as_millis()).unwrap_or(i64::MAX);
        local.last_modified.abs_diff_millis(remote.last_modified) <= window_ms
    }

    /// Attempts automatic merging of an update/update conflict
    pub fn try_auto_merge(&self, record: &ConflictRecord) -> Option<ParkingEntry> {
        if record.kind != ConflictKind::UpdateUpdate {
            return None;
        }
        let (local, remote) = (record.local.entry(), record.remote.entry());
        if !self.within_window(local, remote) {
            return None;
        }
        self.policy.merge(local, remote)
    }

    /// Detects, then merges or records the conflict for manual resolution.
    ///
    /// A new manual conflict for an entry replaces any older pending one.
    pub fn evaluate(
        &self,
        local: &EntryVersion,
        remote: &EntryVersion,
        remote_id: Option<RemoteId>,
    ) -> SyncResult<Verdict> {
        let Some(mut record) = self.detect(local, remote) else {
            return Ok(Verdict::NoConflict);
        };
        record.remote_id = remote_id;

        let mut state = self.lock()?;
        state.detected += 1;

        if let Some(merged) = self.try_auto_merge(&record) {
            state.auto_resolved += 1;
            record.merged = Some(merged.clone());
            record.resolution = Some(Resolution::Merged(merged.clone()));
            record.notes = Some(format!("auto-merged by {}", self.policy.rule_names().join(", ")));
            log::info!("Auto-merged {} conflict for entry {}", record.kind, record.entry_id());
            return Ok(Verdict::AutoMerged { record, merged });
        }

        let entry_id = record.entry_id();
        state.pending.retain(|_, existing| existing.entry_id() != entry_id);
        state.pending.insert(record.id, record.clone());
        log::warn!(
            "Conflict {} ({}) on entry {} needs manual resolution",
            record.id,
            record.kind,
            entry_id
        );
        Ok(Verdict::Manual(record))
    }

    /// Marks a pending conflict resolved and removes it from the pending set
    pub fn manual_resolve(
        &self,
        conflict_id: ConflictId,
        resolution: Resolution,
        notes: Option<String>,
    ) -> SyncResult<ConflictRecord> {
        let mut state = self.lock()?;
        let mut record = state
            .pending
            .remove(&conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        state.manually_resolved += 1;
        record.resolution = Some(resolution);
        record.notes = notes;
        Ok(record)
    }

    /// A pending conflict
    pub fn get(&self, conflict_id: ConflictId) -> SyncResult<ConflictRecord> {
        self.lock()?
            .pending
            .get(&conflict_id)
            .cloned()
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))
    }

    /// Pending conflicts, oldest first
    pub fn pending_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        let mut pending: Vec<_> = self.lock()?.pending.values().cloned().collect();
        pending.sort_by_key(|r| r.detected_at);
        Ok(pending)
    }

    pub fn pending_for(&self, entry_id: EntryId) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self
            .pending_conflicts()?
            .into_iter()
            .filter(|r| r.entry_id() == entry_id)
            .collect())
    }

    /// Drops pending conflicts of an entry whose versions converged on their own
    pub fn dismiss_for(&self, entry_id: EntryId) -> SyncResult<usize> {
        let mut state = self.lock()?;
        let before = state.pending.len();
        state.pending.retain(|_, record| record.entry_id() != entry_id);
        Ok(before - state.pending.len())
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Candidate resolutions for a pending conflict, best first
    pub fn resolution_suggestions(
        &self,
        conflict_id: ConflictId,
    ) -> SyncResult<Vec<ResolutionSuggestion>> {
        let record = self.get(conflict_id)?;
        let suggest = |resolution, reason: &str| ResolutionSuggestion {
            resolution,
            reason: reason.to_string(),
        };

        let mut suggestions = Vec::new();
        if let Some(merged) = self.policy.merge(record.local.entry(), record.remote.entry()) {
            if !record.local.is_deleted() && !record.remote.is_deleted() {
                suggestions.push(suggest(
                    Resolution::Merged(merged),
                    "merge rules cover every differing field",
                ));
            }
        }

        match record.kind {
            ConflictKind::DeleteUpdate => {
                suggestions.push(suggest(Resolution::UseRemote, "the remote record is still in use"));
                suggestions.push(suggest(Resolution::UseLocal, "confirm the local deletion"));
            }
            ConflictKind::UpdateDelete => {
                suggestions.push(suggest(Resolution::UseLocal, "restore the record with local changes"));
                suggestions.push(suggest(Resolution::UseRemote, "accept the remote deletion"));
            }
            ConflictKind::CreateCreate | ConflictKind::UpdateUpdate => {
                let local_newer =
                    record.local.last_modified() >= record.remote.last_modified();
                if local_newer {
                    suggestions.push(suggest(Resolution::UseLocal, "local version is newer"));
                    suggestions.push(suggest(Resolution::UseRemote, "remote version is older"));
                } else {
                    suggestions.push(suggest(Resolution::UseRemote, "remote version is newer"));
                    suggestions.push(suggest(Resolution::UseLocal, "local version is older"));
                }
            }
        }
        Ok(suggestions)
    }

    pub fn statistics(&self) -> ConflictStatistics {
        let Ok(state) = self.state.lock() else {
            return ConflictStatistics::default();
        };
        let auto_resolution_rate = if state.detected == 0 {
            0.0
        } else {
            state.auto_resolved as f64 * 100.0 / state.detected as f64
        };
        ConflictStatistics {
            detected: state.detected,
            auto_resolved: state.auto_resolved,
            manually_resolved: state.manually_resolved,
            pending: state.pending.len() as u64,
            auto_resolution_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotkeeper_core::{Money, Timestamp};

    const MINUTE: i64 = 60_000;

    fn base(modified: i64) -> ParkingEntry {
        let mut entry = ParkingEntry::new("Carrier", "Trailer", "TEST123", Timestamp::from_millis(0));
        entry.remote_id = Some(RemoteId::new("r-1"));
        entry.last_modified = Timestamp::from_millis(modified);
        entry
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(Duration::from_secs(15 * 60))
    }

    #[test]
    fn test_identical_versions_do_not_conflict() {
        let resolver = resolver();
        let entry = EntryVersion::Live(base(100 * MINUTE));
        assert!(resolver.detect(&entry, &entry).is_none());

        let mut later = base(200 * MINUTE);
        later.id = EntryId::new();
        assert!(resolver
            .detect(&entry, &EntryVersion::Live(later))
            .is_none());
    }

    #[test]
    fn test_classification() {
        let resolver = resolver();
        let live = EntryVersion::Live(base(0));
        let mut gone = base(0);
        gone.deleted_at = Some(Timestamp::from_millis(10));
        let gone = EntryVersion::from_entry(gone);

        assert_eq!(resolver.detect(&gone, &live).unwrap().kind, ConflictKind::DeleteUpdate);
        assert_eq!(resolver.detect(&live, &gone).unwrap().kind, ConflictKind::UpdateDelete);
        assert!(resolver.detect(&gone, &gone).is_none());

        let mut unlinked = base(0);
        unlinked.remote_id = None;
        let mut other = base(0);
        other.notes = "remote note".into();
        assert_eq!(
            resolver
                .detect(&EntryVersion::Live(unlinked), &EntryVersion::Live(other.clone()))
                .unwrap()
                .kind,
            ConflictKind::CreateCreate
        );
        assert_eq!(
            resolver.detect(&live, &EntryVersion::Live(other)).unwrap().kind,
            ConflictKind::UpdateUpdate
        );
    }

    #[test]
    fn test_exited_higher_fee_auto_merges() {
        let resolver = resolver();
        let t = 1_000 * MINUTE;

        let mut local = base(t);
        local.status = EntryStatus::Exited;
        local.exit_time = Some(Timestamp::from_millis(t));
        local.parking_fee = Money::from_major(225);

        let mut remote = base(t - 5 * MINUTE);
        remote.parking_fee = Money::from_major(200);

        let verdict = resolver
            .evaluate(&EntryVersion::Live(local), &EntryVersion::Live(remote), None)
            .unwrap();
        let Verdict::AutoMerged { merged, record } = verdict else {
            panic!("expected auto merge");
        };
        assert_eq!(merged.status, EntryStatus::Exited);
        assert_eq!(merged.parking_fee, Money::from_major(225));
        assert_eq!(merged.exit_time, Some(Timestamp::from_millis(t)));
        assert!(record.is_resolved());

        let stats = resolver.statistics();
        assert_eq!(stats.detected, 1);
        assert_eq!(stats.auto_resolved, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.auto_resolution_rate, 100.0);
    }

    #[test]
    fn test_remote_paid_side_wins_payment_fields() {
        let mut local = base(0);
        local.payment_status = PaymentStatus::Pending;
        local.payment_type = Some("Cash".into());
        let mut remote = base(MINUTE);
        remote.payment_status = PaymentStatus::Paid;
        remote.payment_type = Some("UPI".into());

        let merged = MergePolicy::default().merge(&local, &remote).unwrap();
        assert_eq!(merged.payment_status, PaymentStatus::Paid);
        assert_eq!(merged.payment_type.as_deref(), Some("UPI"));
        assert_eq!(merged.last_modified, Timestamp::from_millis(MINUTE));
    }

    #[test]
    fn test_uncovered_field_requires_manual_resolution() {
        let resolver = resolver();
        let local = base(0);
        let mut remote = base(MINUTE);
        remote.driver_name = Some("Someone".into());

        let verdict = resolver
            .evaluate(&EntryVersion::Live(local), &EntryVersion::Live(remote), None)
            .unwrap();
        assert!(matches!(verdict, Verdict::Manual(_)));
        assert_eq!(resolver.pending_count(), 1);
    }

    #[test]
    fn test_refunded_is_not_merged() {
        let mut local = base(0);
        local.payment_status = PaymentStatus::Refunded;
        let mut remote = base(0);
        remote.payment_status = PaymentStatus::Paid;
        assert!(MergePolicy::default().merge(&local, &remote).is_none());
    }

    #[test]
    fn test_window_miss_requires_manual_resolution() {
        let resolver = resolver();
        let mut local = base(100 * MINUTE);
        local.parking_fee = Money::from_major(300);
        let remote = base(0);

        let verdict = resolver
            .evaluate(&EntryVersion::Live(local), &EntryVersion::Live(remote), None)
            .unwrap();
        assert!(matches!(verdict, Verdict::Manual(_)));
    }

    #[test]
    fn test_empty_policy_never_merges() {
        let resolver = ConflictResolver::with_policy(Duration::from_secs(900), MergePolicy::none());
        let local = base(0);
        let mut remote = base(0);
        remote.parking_fee = Money::from_major(1);
        let verdict = resolver
            .evaluate(&EntryVersion::Live(local), &EntryVersion::Live(remote), None)
            .unwrap();
        assert!(matches!(verdict, Verdict::Manual(_)));
    }

    #[test]
    fn test_manual_resolve_removes_from_pending() {
        let resolver = resolver();
        let local = base(0);
        let mut remote = base(0);
        remote.notes = "different".into();

        let Verdict::Manual(record) = resolver
            .evaluate(&EntryVersion::Live(local), &EntryVersion::Live(remote), None)
            .unwrap()
        else {
            panic!("expected manual conflict");
        };
        assert_eq!(resolver.pending_for(record.entry_id()).unwrap().len(), 1);
        assert!(!resolver.resolution_suggestions(record.id).unwrap().is_empty());

        let resolved = resolver
            .manual_resolve(record.id, Resolution::UseRemote, Some("checked ticket".into()))
            .unwrap();
        assert_eq!(resolved.resolution, Some(Resolution::UseRemote));
        assert_eq!(resolver.pending_count(), 0);

        let again = resolver.manual_resolve(record.id, Resolution::UseLocal, None);
        assert!(matches!(again, Err(SyncError::ConflictNotFound(_))));

        let stats = resolver.statistics();
        assert_eq!(stats.manually_resolved, 1);
        assert_eq!(stats.auto_resolution_rate, 0.0);
    }

    #[test]
    fn test_newer_conflict_replaces_pending_for_same_entry() {
        let resolver = resolver();
        let local = base(0);
        let mut first = base(0);
        first.notes = "one".into();
        let mut second = base(0);
        second.notes = "two".into();

        resolver
            .evaluate(&EntryVersion::Live(local.clone()), &EntryVersion::Live(first), None)
            .unwrap();
        resolver
            .evaluate(&EntryVersion::Live(local.clone()), &EntryVersion::Live(second), None)
            .unwrap();

        let pending = resolver.pending_for(local.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].remote.entry().notes, "two");
    }

    #[test]
    fn test_empty_statistics() {
        let stats = resolver().statistics();
        assert_eq!(stats.detected, 0);
        assert_eq!(stats.auto_resolution_rate, 0.0);
    }
}
