//! # Audit Ledger
//!
//! A single append-only chain shared by every escrow. The ledger is cheap to
//! clone (an `Arc` around one mutex) and is handed to every component that
//! records transitions.
//!
//! ## Concurrency
//!
//! Appends serialize on the ledger mutex. Reads take a snapshot (`Arc` of the
//! entry vector) under the lock and release it immediately; a snapshot held
//! by a reader is never mutated because appends go through
//! [`Arc::make_mut`], which copies when a snapshot is outstanding.
//!
//! ## Failure Semantics
//!
//! An append is all-or-nothing. Entries are sealed on a scratch list,
//! written to the sink (if any), and only then pushed onto the chain. When
//! the sink fails, the chain is untouched and the caller gets
//! [`LedgerError::StorageUnavailable`].

use std::path::Path;
use std::sync::Arc;

use mesc_core::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::entry::{AuditLogEntry, EventType, NewEvent, GENESIS_HASH};
use crate::error::LedgerError;
use crate::sink::{JsonlFileSink, LedgerSink};

// ---------------------------------------------------------------------------
// ChainReport
// ---------------------------------------------------------------------------

/// Outcome of a successful chain verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Always true; a broken chain is reported as an error instead.
    pub valid: bool,
    /// Number of entries verified.
    pub entries: usize,
    /// `current_hash` of the last entry, or the genesis hash when empty.
    pub tail_hash: String,
    /// When verification ran.
    pub verified_at: Timestamp,
}

/// Verify an exported chain from genesis.
///
/// Checks, for every entry in order: its `sequence` equals its position, its
/// `previous_hash` equals the prior entry's `current_hash` (genesis for the
/// first), and its `current_hash` equals the recomputed hash. The first
/// failure is reported; entries after it are not inspected.
///
/// # Errors
///
/// Returns [`LedgerError::TamperDetected`] with the index of the first bad
/// entry.
pub fn verify_chain(entries: &[AuditLogEntry]) -> Result<ChainReport, LedgerError> {
    let mut expected_prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        if entry.sequence != index as u64 {
            return Err(LedgerError::TamperDetected {
                at_index: index,
                expected: format!("sequence {index}"),
                actual: format!("sequence {}", entry.sequence),
            });
        }
        if entry.previous_hash != expected_prev {
            return Err(LedgerError::TamperDetected {
                at_index: index,
                expected: expected_prev,
                actual: entry.previous_hash.clone(),
            });
        }
        // A payload that no longer canonicalizes was not what got sealed.
        let recomputed = entry
            .compute_hash()
            .unwrap_or_else(|e| format!("<uncanonicalizable: {e}>"));
        if recomputed != entry.current_hash {
            return Err(LedgerError::TamperDetected {
                at_index: index,
                expected: recomputed,
                actual: entry.current_hash.clone(),
            });
        }
        expected_prev = entry.current_hash.clone();
    }
    Ok(ChainReport {
        valid: true,
        entries: entries.len(),
        tail_hash: expected_prev,
        verified_at: Timestamp::now(),
    })
}

// ---------------------------------------------------------------------------
// LedgerFilter / LedgerView
// ---------------------------------------------------------------------------

/// Conjunctive filter over entries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    /// Only entries for this entity.
    pub entity_id: Option<String>,
    /// Only entries of this type.
    pub event_type: Option<EventType>,
    /// Only entries by this actor.
    pub actor_id: Option<String>,
}

impl LedgerFilter {
    /// A filter that matches every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one entity.
    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Restrict to one event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Restrict to one actor.
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Does `entry` pass the filter?
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.entity_id.as_deref().map_or(true, |id| entry.entity_id == id)
            && self.event_type.map_or(true, |et| entry.event_type == et)
            && self.actor_id.as_deref().map_or(true, |id| entry.actor_id == id)
    }
}

/// A read-only, restartable view over a ledger snapshot.
///
/// The view is detached from the live ledger: appends made after it was
/// taken are not visible through it.
#[derive(Debug, Clone)]
pub struct LedgerView {
    snapshot: Arc<Vec<AuditLogEntry>>,
    filter: LedgerFilter,
}

impl LedgerView {
    /// Iterate matching entries in append order. May be called repeatedly.
    pub fn iter(&self) -> impl Iterator<Item = &AuditLogEntry> + '_ {
        self.snapshot.iter().filter(move |e| self.filter.matches(e))
    }

    /// Number of matching entries.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// One page of matching entries.
    pub fn page(&self, skip: usize, limit: usize) -> Vec<AuditLogEntry> {
        self.iter().skip(skip).take(limit).cloned().collect()
    }

    /// All matching entries.
    pub fn to_vec(&self) -> Vec<AuditLogEntry> {
        self.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// AuditLedger
// ---------------------------------------------------------------------------

struct LedgerState {
    entries: Arc<Vec<AuditLogEntry>>,
    sink: Option<Box<dyn LedgerSink>>,
}

impl LedgerState {
    fn tail_hash(&self) -> String {
        self.entries
            .last()
            .map(|e| e.current_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }
}

/// The shared, append-only, hash-chained audit log.
#[derive(Clone)]
pub struct AuditLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("AuditLedger")
            .field("entries", &state.entries.len())
            .field("durable", &state.sink.is_some())
            .finish()
    }
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl AuditLedger {
    /// An empty ledger with no durable sink.
    pub fn in_memory() -> Self {
        Self::build(Vec::new(), None)
    }

    /// Rebuild an in-memory ledger from previously exported entries.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TamperDetected`] if the entries do not form a
    /// valid chain.
    pub fn from_entries(entries: Vec<AuditLogEntry>) -> Result<Self, LedgerError> {
        verify_chain(&entries)?;
        Ok(Self::build(entries, None))
    }

    /// A ledger that persists every append through `sink`, seeded with the
    /// entries the sink already holds.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TamperDetected`] if `existing` is not a valid
    /// chain; nothing will be appended on top of a broken chain.
    pub fn with_sink(
        sink: impl LedgerSink,
        existing: Vec<AuditLogEntry>,
    ) -> Result<Self, LedgerError> {
        verify_chain(&existing)?;
        Ok(Self::build(existing, Some(Box::new(sink))))
    }

    /// Open (or create) a JSON-lines ledger file, verifying its chain.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageUnavailable`] or
    /// [`LedgerError::Malformed`] if the file cannot be read, and
    /// [`LedgerError::TamperDetected`] if its chain is broken.
    pub fn open_jsonl(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let (sink, existing) = JsonlFileSink::open(path.as_ref())?;
        let ledger = Self::with_sink(sink, existing)?;
        tracing::info!(
            path = %path.as_ref().display(),
            entries = ledger.len(),
            "durable audit ledger opened and verified"
        );
        Ok(ledger)
    }

    fn build(entries: Vec<AuditLogEntry>, sink: Option<Box<dyn LedgerSink>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerState {
                entries: Arc::new(entries),
                sink,
            })),
        }
    }

    /// Append one event.
    ///
    /// # Errors
    ///
    /// See [`AuditLedger::append_batch`].
    pub fn append(&self, event: NewEvent) -> Result<AuditLogEntry, LedgerError> {
        let mut sealed = self.append_batch(vec![event])?;
        sealed
            .pop()
            .ok_or_else(|| LedgerError::StorageUnavailable("append produced no entry".into()))
    }

    /// Append several events atomically: either all are chained and persisted,
    /// or none are. Every entry in the batch carries the same timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Canonicalization`] if any payload contains a
    /// float, or [`LedgerError::StorageUnavailable`] if the sink write fails.
    pub fn append_batch(&self, events: Vec<NewEvent>) -> Result<Vec<AuditLogEntry>, LedgerError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.inner.lock();
        let timestamp = Timestamp::now();
        let mut previous_hash = state.tail_hash();
        let mut sequence = state.entries.len() as u64;

        let mut sealed = Vec::with_capacity(events.len());
        for event in events {
            let entry = AuditLogEntry::seal(event, sequence, previous_hash, timestamp)?;
            previous_hash = entry.current_hash.clone();
            sequence += 1;
            sealed.push(entry);
        }

        if let Some(sink) = state.sink.as_mut() {
            if let Err(e) = sink.persist(&sealed) {
                tracing::error!(error = %e, batch = sealed.len(), "audit ledger sink write failed");
                return Err(e);
            }
        }

        Arc::make_mut(&mut state.entries).extend(sealed.iter().cloned());
        drop(state);

        for entry in &sealed {
            metrics::counter!("mesc_ledger_appends_total", "event_type" => entry.event_type.as_str())
                .increment(1);
            tracing::debug!(
                sequence = entry.sequence,
                entity_id = %entry.entity_id,
                event_type = %entry.event_type,
                "audit entry appended"
            );
        }
        Ok(sealed)
    }

    /// Verify the whole chain from genesis. Never mutates the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TamperDetected`] at the first bad entry.
    pub fn verify(&self) -> Result<ChainReport, LedgerError> {
        let snapshot = self.snapshot();
        verify_chain(&snapshot).map_err(|e| {
            if let LedgerError::TamperDetected { at_index, .. } = &e {
                metrics::counter!("mesc_ledger_tamper_detected_total").increment(1);
                tracing::warn!(at_index, "audit ledger tamper detected");
            }
            e
        })
    }

    /// A filtered, read-only view over the current entries.
    pub fn list(&self, filter: LedgerFilter) -> LedgerView {
        LedgerView {
            snapshot: self.snapshot(),
            filter,
        }
    }

    /// The current entries as an immutable snapshot.
    pub fn snapshot(&self) -> Arc<Vec<AuditLogEntry>> {
        Arc::clone(&self.inner.lock().entries)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `current_hash` of the last entry, or the genesis hash.
    pub fn tail_hash(&self) -> String {
        self.inner.lock().tail_hash()
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, index: usize, f: impl FnOnce(&mut AuditLogEntry)) {
        let mut state = self.inner.lock();
        if let Some(entry) = Arc::make_mut(&mut state.entries).get_mut(index) {
            f(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(entity: &str, event_type: EventType, actor: &str) -> NewEvent {
        NewEvent::new(entity, event_type, actor, "AGENT", json!({"note": entity}))
    }

    struct FailingSink;

    impl LedgerSink for FailingSink {
        fn persist(&mut self, _entries: &[AuditLogEntry]) -> Result<(), LedgerError> {
            Err(LedgerError::StorageUnavailable("disk detached".into()))
        }
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let ledger = AuditLedger::in_memory();
        let entry = ledger
            .append(event("e1", EventType::EscrowCreated, "alice"))
            .unwrap();
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.previous_hash, GENESIS_HASH);
        assert_eq!(ledger.tail_hash(), entry.current_hash);
    }

    #[test]
    fn entries_chain_in_append_order() {
        let ledger = AuditLedger::in_memory();
        let a = ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        let b = ledger.append(event("e1", EventType::FundsConfirmed, "carol")).unwrap();
        assert_eq!(b.previous_hash, a.current_hash);
        assert_eq!(b.sequence, 1);
        let report = ledger.verify().unwrap();
        assert_eq!(report.entries, 2);
        assert_eq!(report.tail_hash, b.current_hash);
    }

    #[test]
    fn empty_ledger_verifies_with_genesis_tail() {
        let report = AuditLedger::in_memory().verify().unwrap();
        assert_eq!(report.entries, 0);
        assert_eq!(report.tail_hash, GENESIS_HASH);
    }

    #[test]
    fn batch_is_contiguous_and_shares_timestamp() {
        let ledger = AuditLedger::in_memory();
        ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        let batch = ledger
            .append_batch(vec![
                event("e1", EventType::MilestoneCreated, "alice"),
                event("e1", EventType::MilestoneCreated, "alice"),
                event("e1", EventType::TemplateApplied, "alice"),
            ])
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].sequence, 1);
        assert_eq!(batch[2].sequence, 3);
        assert!(batch.iter().all(|e| e.timestamp == batch[0].timestamp));
        assert_eq!(ledger.len(), 4);
        ledger.verify().unwrap();
    }

    #[test]
    fn tampered_event_data_is_detected_at_its_index() {
        let ledger = AuditLedger::in_memory();
        for i in 0..5 {
            ledger
                .append(NewEvent::new(
                    "e1",
                    EventType::EvidenceAttached,
                    "pat",
                    "CONTRACTOR",
                    json!({"n": i}),
                ))
                .unwrap();
        }
        ledger.tamper(2, |e| e.event_data = json!({"n": 99}));
        match ledger.verify() {
            Err(LedgerError::TamperDetected { at_index, .. }) => assert_eq!(at_index, 2),
            other => panic!("expected tamper at 2, got {other:?}"),
        }
    }

    #[test]
    fn rewritten_hash_breaks_next_link() {
        let ledger = AuditLedger::in_memory();
        for _ in 0..3 {
            ledger.append(event("e1", EventType::EvidenceAttached, "pat")).unwrap();
        }
        // Re-seal entry 1 consistently with its new payload: the break moves
        // to entry 2, whose previous_hash no longer matches.
        ledger.tamper(1, |e| {
            e.actor_id = "mallory".into();
            e.current_hash = e.compute_hash().unwrap();
        });
        match ledger.verify() {
            Err(LedgerError::TamperDetected { at_index, .. }) => assert_eq!(at_index, 2),
            other => panic!("expected tamper at 2, got {other:?}"),
        }
    }

    #[test]
    fn float_in_stored_payload_is_tamper_not_panic() {
        let ledger = AuditLedger::in_memory();
        ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        ledger.tamper(0, |e| e.event_data = json!({"amount": 1.5}));
        assert!(ledger.verify().unwrap_err().is_tamper());
    }

    #[test]
    fn failing_sink_leaves_chain_untouched() {
        let ledger = AuditLedger::with_sink(FailingSink, Vec::new()).unwrap();
        let err = ledger
            .append(event("e1", EventType::EscrowCreated, "alice"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert!(ledger.is_empty());
        assert_eq!(ledger.tail_hash(), GENESIS_HASH);
    }

    #[test]
    fn float_payload_rejected_without_partial_batch() {
        let ledger = AuditLedger::in_memory();
        let err = ledger
            .append_batch(vec![
                event("e1", EventType::MilestoneCreated, "alice"),
                NewEvent::new("e1", EventType::TemplateApplied, "alice", "AGENT", json!({"x": 0.1})),
            ])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Canonicalization(_)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn filters_are_conjunctive_and_ordered() {
        let ledger = AuditLedger::in_memory();
        ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        ledger.append(event("e2", EventType::EscrowCreated, "alice")).unwrap();
        ledger.append(event("e1", EventType::FundsConfirmed, "carol")).unwrap();
        ledger.append(event("e1", EventType::EvidenceAttached, "pat")).unwrap();

        let e1 = ledger.list(LedgerFilter::all().entity("e1"));
        let seqs: Vec<u64> = e1.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 2, 3]);

        let created = ledger.list(LedgerFilter::all().event_type(EventType::EscrowCreated));
        assert_eq!(created.count(), 2);

        let carol_e1 = ledger.list(LedgerFilter::all().entity("e1").actor("carol"));
        assert_eq!(carol_e1.count(), 1);
        assert!(ledger.list(LedgerFilter::all().actor("nobody")).to_vec().is_empty());
    }

    #[test]
    fn view_is_a_detached_restartable_snapshot() {
        let ledger = AuditLedger::in_memory();
        ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        let view = ledger.list(LedgerFilter::all());
        ledger.append(event("e1", EventType::FundsConfirmed, "carol")).unwrap();
        assert_eq!(view.count(), 1);
        assert_eq!(view.iter().count(), view.iter().count());
        assert_eq!(ledger.list(LedgerFilter::all()).count(), 2);
        assert_eq!(ledger.list(LedgerFilter::all()).page(1, 10).len(), 1);
    }

    #[test]
    fn from_entries_rejects_broken_chain() {
        let ledger = AuditLedger::in_memory();
        ledger.append(event("e1", EventType::EscrowCreated, "alice")).unwrap();
        ledger.append(event("e1", EventType::FundsConfirmed, "carol")).unwrap();
        let mut exported = ledger.snapshot().as_ref().clone();
        assert!(AuditLedger::from_entries(exported.clone()).is_ok());
        exported.remove(0);
        assert!(AuditLedger::from_entries(exported).unwrap_err().is_tamper());
    }

    #[test]
    fn concurrent_appends_form_one_valid_chain() {
        let ledger = AuditLedger::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        ledger
                            .append(event(&format!("e{t}"), EventType::EvidenceAttached, "pat"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.verify().unwrap().entries, 200);
    }
}
