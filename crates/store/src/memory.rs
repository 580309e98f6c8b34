//! In-memory store with the same semantics as [`crate::SqliteStore`].
//!
//! Used by tests and by hosts that do not need durability.

use crate::error::{Result, StoreError};
use crate::outbox::{OutboxRow, OutboxStatus, OutboxStore, Transition};
use crate::state::{cursor_is_ahead, CursorStore, EntityStore, PublicationEntry, PublicationQueue};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use waymark_domain::{Endorsement, EntityKind, EntityRecord, Envelope, Report, Transport};

#[derive(Default)]
struct MemoryState {
    outbox: HashMap<String, OutboxRow>,
    entities: BTreeMap<String, EntityRecord>,
    endorsements: BTreeMap<(String, String), Endorsement>,
    reports: BTreeMap<(String, String), Report>,
    cursors: HashMap<String, String>,
    queue: Vec<PublicationEntry>,
    history: Vec<(String, i64)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Every outbox row, oldest first.
    pub fn outbox_rows(&self) -> Result<Vec<OutboxRow>> {
        let state = self.lock()?;
        let mut rows: Vec<OutboxRow> = state.outbox.values().cloned().collect();
        rows.sort_by(|a, b| (a.created_at, &a.event_id).cmp(&(b.created_at, &b.event_id)));
        Ok(rows)
    }
}

impl OutboxStore for MemoryStore {
    fn enqueue(&self, envelope: &Envelope, transports: &[Transport], now: i64) -> Result<bool> {
        let mut state = self.lock()?;
        if state.outbox.contains_key(&envelope.event_id) {
            return Ok(false);
        }
        let row = OutboxRow::new(envelope.clone(), transports, now);
        state.outbox.insert(row.event_id.clone(), row);
        Ok(true)
    }

    fn load_due(&self, limit: usize, now: i64) -> Result<Vec<OutboxRow>> {
        let state = self.lock()?;
        let mut due: Vec<OutboxRow> = state
            .outbox
            .values()
            .filter(|row| row.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| (a.created_at, &a.event_id).cmp(&(b.created_at, &b.event_id)));
        due.truncate(limit);
        Ok(due)
    }

    fn get(&self, event_id: &str) -> Result<Option<OutboxRow>> {
        Ok(self.lock()?.outbox.get(event_id).cloned())
    }

    fn transition(
        &self,
        event_id: &str,
        transport: Transport,
        transition: Transition,
        now: i64,
    ) -> Result<OutboxStatus> {
        let mut state = self.lock()?;
        let row = state
            .outbox
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound {
                event_id: event_id.to_string(),
            })?;
        if !row.apply(transport, &transition, now) {
            warn!(event_id, transport = %transport, "Transition for a transport without a lane ignored");
        }
        Ok(row.status)
    }

    fn fail_all(&self, event_id: &str, code: &str, now: i64) -> Result<()> {
        let mut state = self.lock()?;
        let row = state
            .outbox
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound {
                event_id: event_id.to_string(),
            })?;
        row.fail_all(code, now);
        Ok(())
    }

    fn discard(&self, event_id: &str) -> Result<()> {
        self.lock()?.outbox.remove(event_id);
        Ok(())
    }

    fn prune_delivered(&self, before: i64) -> Result<usize> {
        let mut state = self.lock()?;
        let len = state.outbox.len();
        state
            .outbox
            .retain(|_, row| !(row.status == OutboxStatus::Delivered && row.updated_at < before));
        Ok(len - state.outbox.len())
    }
}

impl EntityStore for MemoryStore {
    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        Ok(self.lock()?.entities.get(entity_id).cloned())
    }

    fn put_entity(&self, record: &EntityRecord) -> Result<()> {
        self.lock()?
            .entities
            .insert(record.entity_id.clone(), record.clone());
        Ok(())
    }

    fn entities_of_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        Ok(self
            .lock()?
            .entities
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn entities_by_author(&self, author_pubkey: &str) -> Result<Vec<EntityRecord>> {
        Ok(self
            .lock()?
            .entities
            .values()
            .filter(|r| r.author_pubkey == author_pubkey)
            .cloned()
            .collect())
    }

    fn get_endorsement(&self, entity_id: &str, actor: &str) -> Result<Option<Endorsement>> {
        Ok(self
            .lock()?
            .endorsements
            .get(&(entity_id.to_string(), actor.to_string()))
            .cloned())
    }

    fn put_endorsement(&self, endorsement: &Endorsement) -> Result<()> {
        self.lock()?.endorsements.insert(
            (endorsement.entity_id.clone(), endorsement.actor.clone()),
            endorsement.clone(),
        );
        Ok(())
    }

    fn endorsements_for(&self, entity_id: &str) -> Result<Vec<Endorsement>> {
        Ok(self
            .lock()?
            .endorsements
            .values()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn get_report(&self, entity_id: &str, actor: &str) -> Result<Option<Report>> {
        Ok(self
            .lock()?
            .reports
            .get(&(entity_id.to_string(), actor.to_string()))
            .cloned())
    }

    fn put_report(&self, report: &Report) -> Result<()> {
        self.lock()?.reports.insert(
            (report.entity_id.clone(), report.actor.clone()),
            report.clone(),
        );
        Ok(())
    }

    fn reports_for(&self, entity_id: &str) -> Result<Vec<Report>> {
        Ok(self
            .lock()?
            .reports
            .values()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn max_lamport(&self) -> Result<u64> {
        Ok(self
            .lock()?
            .entities
            .values()
            .map(|r| r.lamport_clock)
            .max()
            .unwrap_or(0))
    }
}

impl CursorStore for MemoryStore {
    fn get_cursor(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.cursors.get(key).cloned())
    }

    fn advance_cursor(&self, key: &str, position: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if !cursor_is_ahead(state.cursors.get(key).map(String::as_str), position) {
            return Ok(false);
        }
        state.cursors.insert(key.to_string(), position.to_string());
        Ok(true)
    }
}

impl PublicationQueue for MemoryStore {
    fn push_publication(&self, entry: &PublicationEntry) -> Result<()> {
        let mut state = self.lock()?;
        state.queue.retain(|e| e.entry_id != entry.entry_id);
        state.queue.push(entry.clone());
        Ok(())
    }

    fn pending_publications(&self, limit: usize) -> Result<Vec<PublicationEntry>> {
        let mut pending = self.lock()?.queue.clone();
        pending.sort_by(|a, b| (a.queued_at, &a.entry_id).cmp(&(b.queued_at, &b.entry_id)));
        pending.truncate(limit);
        Ok(pending)
    }

    fn remove_publication(&self, entry_id: &str) -> Result<()> {
        self.lock()?.queue.retain(|e| e.entry_id != entry_id);
        Ok(())
    }

    fn record_publication(
        &self,
        entry: &PublicationEntry,
        _accepted: bool,
        _reasons: &[String],
        processed_at: i64,
    ) -> Result<()> {
        self.lock()?
            .history
            .push((entry.author_pubkey.clone(), processed_at));
        Ok(())
    }

    fn publications_since(&self, author_pubkey: &str, since: i64) -> Result<usize> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|(author, at)| author == author_pubkey && *at >= since)
            .count())
    }
}
