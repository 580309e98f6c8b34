//! Publication gate: promotes personal entities to network scope.
//!
//! Each queued entry is scored by the quality evaluator. Accepted entities
//! switch to network scope and a fresh create envelope is authored for them;
//! rejected ones stay personal and the reasons go back to the author. Either
//! way the entry leaves the queue and lands in the publication history.

use crate::error::Result;
use crate::local::LocalAuthor;
use std::sync::Arc;
use tracing::{info, warn};
use waymark_domain::{EntityRecord, Scope};
use waymark_store::{PublicationEntry, SyncStore};
use waymark_trust::{QualityEvaluator, QualityInput};

const RATE_WINDOW_SECS: i64 = 86_400;
const PROCESS_BATCH: usize = 50;

/// Neutral trust for authors without any scored entity.
const DEFAULT_AUTHOR_TRUST: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationOutcome {
    pub entry_id: String,
    pub entity_id: String,
    pub accepted: bool,
    pub reasons: Vec<String>,
}

pub struct PublicationGate {
    store: Arc<dyn SyncStore>,
    evaluator: QualityEvaluator,
    author: Arc<LocalAuthor>,
}

impl PublicationGate {
    pub fn new(store: Arc<dyn SyncStore>, evaluator: QualityEvaluator, author: Arc<LocalAuthor>) -> Self {
        Self {
            store,
            evaluator,
            author,
        }
    }

    /// Process queued entries, oldest first.
    pub fn process_pending(&self) -> Result<Vec<PublicationOutcome>> {
        let pending = self.store.pending_publications(PROCESS_BATCH)?;
        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            outcomes.push(self.process(&entry)?);
        }
        Ok(outcomes)
    }

    fn process(&self, entry: &PublicationEntry) -> Result<PublicationOutcome> {
        let now = self.author.now();
        let mut reasons = match self.store.get_entity(&entry.entity_id)? {
            None => vec!["unknown_entity".to_string()],
            Some(record) if record.retracted => vec!["entity_retracted".to_string()],
            Some(record) => self.evaluate(entry, &record, now)?,
        };
        if reasons.is_empty() && !self.publish(&entry.entity_id)? {
            reasons.push("entity_retracted".to_string());
        }
        let accepted = reasons.is_empty();

        if accepted {
            info!(entry_id = %entry.entry_id, entity_id = %entry.entity_id, "Entity published to network");
        } else {
            warn!(
                entry_id = %entry.entry_id,
                entity_id = %entry.entity_id,
                reasons = ?reasons,
                "Publication held back"
            );
        }

        self.store
            .record_publication(entry, accepted, &reasons, now)?;
        self.store.remove_publication(&entry.entry_id)?;

        Ok(PublicationOutcome {
            entry_id: entry.entry_id.clone(),
            entity_id: entry.entity_id.clone(),
            accepted,
            reasons,
        })
    }

    fn evaluate(
        &self,
        entry: &PublicationEntry,
        record: &EntityRecord,
        now: i64,
    ) -> Result<Vec<String>> {
        let neighbors: Vec<EntityRecord> = self
            .store
            .entities_of_kind(record.kind)?
            .into_iter()
            .filter(|other| other.scope == Scope::Network)
            .collect();
        let recent = self
            .store
            .publications_since(&entry.author_pubkey, now - RATE_WINDOW_SECS)?;
        let author_trust = self.author_trust(&entry.author_pubkey)?;

        let assessment = self.evaluator.evaluate(&QualityInput {
            record,
            photos: &entry.photos,
            author_trust,
            recent_submissions: recent,
            neighbors: &neighbors,
        });
        Ok(assessment.reason_codes())
    }

    /// Mean trust score over the author's scored entities.
    fn author_trust(&self, author_pubkey: &str) -> Result<u8> {
        let scores: Vec<u32> = self
            .store
            .entities_by_author(author_pubkey)?
            .iter()
            .filter_map(|record| record.trust_score.map(u32::from))
            .collect();
        if scores.is_empty() {
            return Ok(DEFAULT_AUTHOR_TRUST);
        }
        let mean = scores.iter().sum::<u32>() / scores.len() as u32;
        Ok(mean.min(100) as u8)
    }

    /// Promote the entity as it stands now and author a create for it.
    /// Returns false if the entity was retracted after evaluation.
    fn publish(&self, entity_id: &str) -> Result<bool> {
        let Some(record) = self.author.promote(entity_id)? else {
            return Ok(false);
        };

        let mut fields = record.fields;
        fields.remove("updated_at");
        self.author
            .author(record.kind.create_event(), &record.entity_id, fields)?;
        Ok(true)
    }
}
