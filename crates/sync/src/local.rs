//! Authoring path for envelopes created on this device.
//!
//! A local write is applied through the merge engine before it is queued,
//! so the local view never waits on the network. Entities kept in personal
//! scope stay off the outbox until the publication gate promotes them.

use crate::error::{Result, SyncError};
use crate::merge::{ApplyResult, MergeEngine};
use std::sync::Arc;
use tracing::{debug, info};
use waymark_domain::{
    new_entity_id, Action, EntityKind, EntityRecord, Envelope, EnvelopeFactory, EventType, Payload,
    PhotoMeta, Scope, Transport, ValidationContext,
};
use waymark_store::{PublicationEntry, SyncStore};

/// Result of a local write.
#[derive(Debug, Clone)]
pub struct AuthoredEvent {
    pub envelope: Envelope,
    pub outcome: ApplyResult,
    /// Whether the envelope was placed in the outbox
    pub enqueued: bool,
}

pub struct LocalAuthor {
    factory: EnvelopeFactory,
    merge: Arc<MergeEngine>,
    store: Arc<dyn SyncStore>,
    transports: Vec<Transport>,
}

impl LocalAuthor {
    /// `transports` are the enabled transports new outbox rows get lanes for.
    pub fn new(
        factory: EnvelopeFactory,
        merge: Arc<MergeEngine>,
        store: Arc<dyn SyncStore>,
        transports: Vec<Transport>,
    ) -> Self {
        Self {
            factory,
            merge,
            store,
            transports,
        }
    }

    pub fn author_pubkey(&self) -> String {
        self.factory.author_pubkey()
    }

    pub fn now(&self) -> i64 {
        self.factory.clock().now_secs()
    }

    /// Create a new network-scope entity of `kind`.
    pub fn create(&self, kind: EntityKind, payload: Payload) -> Result<AuthoredEvent> {
        let entity_id = new_entity_id(kind);
        self.author(kind.create_event(), &entity_id, payload)
    }

    /// Create a new entity that stays on this device until published.
    pub fn create_personal(&self, kind: EntityKind, payload: Payload) -> Result<AuthoredEvent> {
        let entity_id = new_entity_id(kind);
        let envelope = self.factory.build(kind.create_event(), &entity_id, payload);
        self.commit(envelope, Scope::Personal)
    }

    pub fn author(
        &self,
        event_type: EventType,
        entity_id: &str,
        payload: Payload,
    ) -> Result<AuthoredEvent> {
        self.author_expiring(event_type, entity_id, payload, None)
    }

    pub fn author_expiring(
        &self,
        event_type: EventType,
        entity_id: &str,
        payload: Payload,
        expires_at: Option<i64>,
    ) -> Result<AuthoredEvent> {
        let envelope = self
            .factory
            .build_expiring(event_type, entity_id, payload, expires_at);
        self.commit(envelope, Scope::Network)
    }

    fn commit(&self, envelope: Envelope, new_scope: Scope) -> Result<AuthoredEvent> {
        let ctx = ValidationContext::local(self.now());
        let outcome = self.merge.apply_scoped(&envelope, &ctx, new_scope)?;
        if !outcome.applied {
            let reason = outcome.reason.unwrap_or_else(|| "unknown".to_string());
            debug!(event_id = %envelope.event_id, reason = %reason, "Local write rejected");
            return Err(SyncError::Rejected { reason });
        }

        let enqueued = if self.is_network_bound(&envelope)? {
            self.store
                .enqueue(&envelope, &self.transports, self.now())?
        } else {
            false
        };

        debug!(
            event_id = %envelope.event_id,
            entity_id = %envelope.entity_id,
            event_type = %envelope.event_type,
            signed = envelope.is_signed(),
            enqueued,
            "Local envelope committed"
        );
        Ok(AuthoredEvent {
            envelope,
            outcome,
            enqueued,
        })
    }

    /// Lifecycle writes, endorsements and reports follow the scope of the
    /// entity they target. Promise events always travel.
    fn is_network_bound(&self, envelope: &Envelope) -> Result<bool> {
        match envelope.event_type.action() {
            Action::Create
            | Action::Update
            | Action::Retract
            | Action::Endorse
            | Action::Report => Ok(self
                .store
                .get_entity(&envelope.entity_id)?
                .map_or(false, |record| record.scope == Scope::Network)),
            Action::Issue | Action::Settle => Ok(true),
        }
    }

    /// Move an entity to network scope through the merge engine.
    pub fn promote(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        Ok(self.merge.promote(entity_id)?)
    }

    /// Queue a personal entity for the publication gate.
    pub fn request_publication(&self, entity_id: &str, photos: Vec<PhotoMeta>) -> Result<String> {
        let record = self
            .store
            .get_entity(entity_id)?
            .ok_or_else(|| SyncError::UnknownEntity(entity_id.to_string()))?;

        let entry = PublicationEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            entity_id: record.entity_id,
            author_pubkey: self.author_pubkey(),
            photos,
            queued_at: self.now(),
        };
        self.store.push_publication(&entry)?;
        info!(entry_id = %entry.entry_id, entity_id = %entry.entity_id, "Publication requested");
        Ok(entry.entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_core::ManualClock;
    use waymark_domain::LamportClock;
    use waymark_store::{EntityStore, MemoryStore, OutboxStore, PublicationQueue};

    const NOW: i64 = 1_700_000_000;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn author() -> (Arc<MemoryStore>, LocalAuthor) {
        let store = Arc::new(MemoryStore::new());
        let merge = Arc::new(MergeEngine::new(store.clone()));
        let factory = EnvelopeFactory::new(
            None,
            "device-1",
            Arc::new(LamportClock::default()),
            Arc::new(ManualClock::new(NOW)),
        );
        let author = LocalAuthor::new(
            factory,
            merge,
            store.clone(),
            vec![Transport::Relay, Transport::Hub],
        );
        (store, author)
    }

    #[test]
    fn test_network_create_is_applied_and_queued() {
        let (store, author) = author();
        let authored = author
            .create(EntityKind::Pin, payload(&[("name", "Tap"), ("lat", "45.5"), ("lon", "-122.6")]))
            .unwrap();

        assert!(authored.enqueued);
        assert!(store.get_entity(&authored.envelope.entity_id).unwrap().is_some());
        let row = store.get(&authored.envelope.event_id).unwrap().unwrap();
        assert_eq!(row.lanes.len(), 2);
    }

    #[test]
    fn test_personal_create_stays_local() {
        let (store, author) = author();
        let authored = author
            .create_personal(EntityKind::Bulletin, payload(&[("title", "Lost cat"), ("body", "Grey")]))
            .unwrap();

        assert!(!authored.enqueued);
        assert!(store.get(&authored.envelope.event_id).unwrap().is_none());

        let update = author
            .author(
                EventType::BulletinUpdate,
                &authored.envelope.entity_id,
                payload(&[("title", "Found cat"), ("body", "Grey")]),
            )
            .unwrap();
        assert!(!update.enqueued);
        let record = store.get_entity(&authored.envelope.entity_id).unwrap().unwrap();
        assert_eq!(record.scope, Scope::Personal);
        assert_eq!(record.name(), Some("Found cat"));
    }

    #[test]
    fn test_activity_on_personal_entity_stays_local() {
        let (store, author) = author();
        let personal = author
            .create_personal(EntityKind::Route, payload(&[("name", "Night bus")]))
            .unwrap();
        let shared = author
            .create(EntityKind::Route, payload(&[("name", "Line 4")]))
            .unwrap();

        let endorse = author
            .author(
                EventType::RouteEndorse,
                &personal.envelope.entity_id,
                payload(&[("score", "4")]),
            )
            .unwrap();
        let report = author
            .author(
                EventType::RouteReport,
                &personal.envelope.entity_id,
                payload(&[("reason", "cancelled")]),
            )
            .unwrap();
        assert!(!endorse.enqueued);
        assert!(!report.enqueued);
        assert_eq!(store.endorsements_for(&personal.envelope.entity_id).unwrap().len(), 1);

        let shared_endorse = author
            .author(
                EventType::RouteEndorse,
                &shared.envelope.entity_id,
                payload(&[("score", "5")]),
            )
            .unwrap();
        assert!(shared_endorse.enqueued);

        let queued: Vec<String> = store
            .outbox_rows()
            .unwrap()
            .into_iter()
            .map(|row| row.event_id)
            .collect();
        assert_eq!(queued.len(), 2);
        assert!(queued.contains(&shared.envelope.event_id));
        assert!(queued.contains(&shared_endorse.envelope.event_id));
    }

    #[test]
    fn test_invalid_local_write_is_rejected() {
        let (store, author) = author();
        let err = author
            .create(EntityKind::Pin, payload(&[("name", "No place")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Rejected { ref reason } if reason == "policy_rejected:missing_field:lat"
        ));
        assert!(store.outbox_rows().unwrap().is_empty());
    }

    #[test]
    fn test_promise_gets_hub_lane_only() {
        let (store, author) = author();
        let authored = author
            .author_expiring(
                EventType::PromiseIssue,
                "promise:p1",
                payload(&[("amount", "3"), ("currency", "USD"), ("payee", "ana")]),
                Some(NOW + 3600),
            )
            .unwrap();

        let row = store.get(&authored.envelope.event_id).unwrap().unwrap();
        assert_eq!(row.lanes.len(), 1);
        assert!(row.lane(Transport::Hub).is_some());
    }

    #[test]
    fn test_request_publication() {
        let (store, author) = author();
        assert!(matches!(
            author.request_publication("pin:missing", Vec::new()),
            Err(SyncError::UnknownEntity(_))
        ));

        let authored = author
            .create_personal(EntityKind::Pin, payload(&[("name", "Tap"), ("lat", "1"), ("lon", "1")]))
            .unwrap();
        let entry_id = author
            .request_publication(&authored.envelope.entity_id, Vec::new())
            .unwrap();

        let pending = store.pending_publications(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entry_id, entry_id);
        assert_eq!(pending[0].author_pubkey, author.author_pubkey());
    }
}
