//! Merge engine: applies envelopes to local state with last-write-wins.
//!
//! The decision for lifecycle writes is a pure function of the stored and
//! incoming `updated_at` (incoming wins ties), so any delivery order of the
//! same envelopes converges to the same record. A stale envelope is still a
//! committed outcome (`applied = true`) and leaves state untouched.

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use waymark_domain::{
    validate, Action, Authenticity, Endorsement, EntityRecord, Envelope, LamportClock, Report,
    Scope, ValidationContext, ValidationFailure,
};
use waymark_store::{StoreError, SyncStore};
use waymark_trust::TrustScorer;

/// Outcome of applying one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub applied: bool,
    /// `"<category>:<reason>"` when not applied
    pub reason: Option<String>,
}

impl ApplyResult {
    pub fn committed() -> Self {
        Self {
            applied: true,
            reason: None,
        }
    }

    pub fn rejected(failure: &ValidationFailure) -> Self {
        Self {
            applied: false,
            reason: Some(failure.tag()),
        }
    }
}

pub struct MergeEngine {
    store: Arc<dyn SyncStore>,
    scorer: TrustScorer,
    lamport: Option<Arc<LamportClock>>,
    write_lock: Mutex<()>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self {
            store,
            scorer: TrustScorer::new(),
            lamport: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_scorer(mut self, scorer: TrustScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Fold inbound Lamport values into the local device clock.
    pub fn with_lamport(mut self, lamport: Arc<LamportClock>) -> Self {
        self.lamport = Some(lamport);
        self
    }

    /// Apply an inbound envelope. New entities land in network scope.
    pub fn apply(
        &self,
        envelope: &Envelope,
        ctx: &ValidationContext,
    ) -> Result<ApplyResult, StoreError> {
        self.apply_scoped(envelope, ctx, Scope::Network)
    }

    /// Apply an envelope; `new_scope` is used only if the entity is new.
    pub fn apply_scoped(
        &self,
        envelope: &Envelope,
        ctx: &ValidationContext,
        new_scope: Scope,
    ) -> Result<ApplyResult, StoreError> {
        let authenticity = match validate(envelope, ctx) {
            Ok(authenticity) => authenticity,
            Err(failure) => {
                debug!(
                    event_id = %envelope.event_id,
                    entity_id = %envelope.entity_id,
                    reason = %failure,
                    "Envelope failed validation"
                );
                return Ok(ApplyResult::rejected(&failure));
            }
        };

        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;

        if let Some(lamport) = &self.lamport {
            lamport.observe(envelope.lamport_clock);
        }

        match envelope.event_type.action() {
            Action::Create | Action::Update | Action::Retract | Action::Issue => {
                self.apply_lifecycle(envelope, new_scope, ctx.now)
            }
            Action::Endorse => self.apply_endorsement(envelope, authenticity, ctx.now),
            Action::Report => self.apply_report(envelope, authenticity, ctx.now),
            Action::Settle => self.apply_settlement(envelope),
        }
    }

    /// Switch a live entity to network scope. Runs under the write lock so
    /// a concurrent apply is never overwritten by a stale copy. Returns the
    /// stored record, or `None` if the entity is missing or retracted.
    pub fn promote(&self, entity_id: &str) -> Result<Option<EntityRecord>, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let Some(mut record) = self.live_parent(entity_id)? else {
            return Ok(None);
        };
        if record.scope != Scope::Network {
            record.scope = Scope::Network;
            self.store.put_entity(&record)?;
            debug!(entity_id = %entity_id, "Entity promoted to network scope");
        }
        Ok(Some(record))
    }

    fn apply_lifecycle(
        &self,
        envelope: &Envelope,
        new_scope: Scope,
        now: i64,
    ) -> Result<ApplyResult, StoreError> {
        let record = match self.store.get_entity(&envelope.entity_id)? {
            None => EntityRecord::from_envelope(envelope, new_scope),
            Some(stored) if stored.last_event_id == envelope.event_id => {
                return Ok(ApplyResult::committed());
            }
            Some(stored) if envelope.updated_at() < stored.updated_at => {
                debug!(
                    event_id = %envelope.event_id,
                    entity_id = %envelope.entity_id,
                    incoming = envelope.updated_at(),
                    stored = stored.updated_at,
                    "Stale envelope discarded"
                );
                return Ok(ApplyResult::committed());
            }
            Some(mut stored) => {
                stored.overwrite(envelope);
                stored
            }
        };

        let record = self.rescore(record, now)?;
        self.store.put_entity(&record)?;
        debug!(
            event_id = %envelope.event_id,
            entity_id = %envelope.entity_id,
            event_type = %envelope.event_type,
            "Envelope applied"
        );
        Ok(ApplyResult::committed())
    }

    fn apply_settlement(&self, envelope: &Envelope) -> Result<ApplyResult, StoreError> {
        let Some(mut promise) = self.live_parent(&envelope.entity_id)? else {
            return Ok(ApplyResult::rejected(&ValidationFailure::policy(
                "unknown_parent",
            )));
        };
        if promise.last_event_id == envelope.event_id || envelope.updated_at() < promise.updated_at
        {
            return Ok(ApplyResult::committed());
        }

        promise.fields.extend(envelope.payload.clone());
        promise
            .fields
            .insert("status".to_string(), "settled".to_string());
        promise.updated_at = envelope.updated_at();
        promise.last_event_id = envelope.event_id.clone();
        promise.lamport_clock = envelope.lamport_clock;
        self.store.put_entity(&promise)?;
        Ok(ApplyResult::committed())
    }

    fn apply_endorsement(
        &self,
        envelope: &Envelope,
        authenticity: Authenticity,
        now: i64,
    ) -> Result<ApplyResult, StoreError> {
        let Some(parent) = self.live_parent(&envelope.entity_id)? else {
            return Ok(ApplyResult::rejected(&ValidationFailure::policy(
                "unknown_parent",
            )));
        };

        let actor = &envelope.author_pubkey;
        if let Some(existing) = self.store.get_endorsement(&envelope.entity_id, actor)? {
            if existing.event_id == envelope.event_id || envelope.updated_at() < existing.created_at
            {
                return Ok(ApplyResult::committed());
            }
        }

        let score = envelope
            .payload
            .get("score")
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(0);
        self.store.put_endorsement(&Endorsement {
            entity_id: envelope.entity_id.clone(),
            actor: actor.clone(),
            score,
            comment: envelope.payload.get("comment").cloned(),
            created_at: envelope.updated_at(),
            event_id: envelope.event_id.clone(),
            authenticated: authenticity.is_authenticated(),
        })?;

        let parent = self.rescore(parent, now)?;
        self.store.put_entity(&parent)?;
        Ok(ApplyResult::committed())
    }

    fn apply_report(
        &self,
        envelope: &Envelope,
        authenticity: Authenticity,
        now: i64,
    ) -> Result<ApplyResult, StoreError> {
        let Some(parent) = self.live_parent(&envelope.entity_id)? else {
            return Ok(ApplyResult::rejected(&ValidationFailure::policy(
                "unknown_parent",
            )));
        };

        let actor = &envelope.author_pubkey;
        if let Some(existing) = self.store.get_report(&envelope.entity_id, actor)? {
            if existing.event_id == envelope.event_id || envelope.updated_at() < existing.created_at
            {
                return Ok(ApplyResult::committed());
            }
        }

        self.store.put_report(&Report {
            entity_id: envelope.entity_id.clone(),
            actor: actor.clone(),
            reason: envelope.payload.get("reason").cloned().unwrap_or_default(),
            created_at: envelope.updated_at(),
            event_id: envelope.event_id.clone(),
            authenticated: authenticity.is_authenticated(),
        })?;

        let parent = self.rescore(parent, now)?;
        self.store.put_entity(&parent)?;
        Ok(ApplyResult::committed())
    }

    fn live_parent(&self, entity_id: &str) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self
            .store
            .get_entity(entity_id)?
            .filter(|record| !record.retracted))
    }

    /// Recompute trust for routes and services; other kinds pass through.
    fn rescore(&self, mut record: EntityRecord, now: i64) -> Result<EntityRecord, StoreError> {
        if !record.kind.is_scored() {
            return Ok(record);
        }
        let endorsements = self.store.endorsements_for(&record.entity_id)?;
        let reports = self.store.reports_for(&record.entity_id)?;
        match self.scorer.compute(&record, &endorsements, &reports, now) {
            Some(score) => {
                record.trust_score = Some(score.score);
                record.trust_tier = score.tier;
            }
            None => warn!(entity_id = %record.entity_id, "Scored kind produced no trust score"),
        }
        Ok(record)
    }
}
