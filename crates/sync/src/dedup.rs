//! Outbox deduplication before transport.
//!
//! Several queued rows may describe the same logical write, e.g. three
//! offline edits of one pin. Only the newest needs to travel.

use std::collections::HashMap;
use waymark_domain::{Envelope, EventType};
use waymark_store::OutboxRow;

/// Identity of a logical write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Create, update or retract of one entity
    Lifecycle {
        event_type: EventType,
        entity_id: String,
    },
    /// One actor's endorsement or report of one entity
    Actor {
        event_type: EventType,
        entity_id: String,
        author: String,
    },
    Event(String),
}

impl DedupKey {
    pub fn of(envelope: &Envelope) -> Self {
        let event_type = envelope.event_type;
        if event_type.is_actor_scoped() {
            DedupKey::Actor {
                event_type,
                entity_id: envelope.entity_id.clone(),
                author: envelope.author_pubkey.clone(),
            }
        } else if event_type.is_lifecycle() {
            DedupKey::Lifecycle {
                event_type,
                entity_id: envelope.entity_id.clone(),
            }
        } else {
            DedupKey::Event(envelope.event_id.clone())
        }
    }
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Rows to submit, in their original order
    pub survivors: Vec<OutboxRow>,
    /// Event ids of rows to discard from the outbox
    pub superseded: Vec<String>,
}

fn rank(row: &OutboxRow) -> (i64, u64, i64) {
    (
        row.envelope.created_at,
        row.envelope.lamport_clock,
        row.created_at,
    )
}

/// Collapse due rows to one per [`DedupKey`], keeping the newest.
pub fn dedup_due(rows: Vec<OutboxRow>) -> DedupOutcome {
    let mut winners: HashMap<DedupKey, usize> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let key = DedupKey::of(&row.envelope);
        match winners.get(&key) {
            Some(&current) if rank(&rows[current]) >= rank(row) => {}
            _ => {
                winners.insert(key, idx);
            }
        }
    }

    let mut outcome = DedupOutcome::default();
    for (idx, row) in rows.into_iter().enumerate() {
        if winners.get(&DedupKey::of(&row.envelope)) == Some(&idx) {
            outcome.survivors.push(row);
        } else {
            outcome.superseded.push(row.event_id);
        }
    }
    outcome
}
