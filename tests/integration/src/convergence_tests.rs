//! Replicas converge whatever order envelopes reach them in.

use crate::test_utils::{payload, Replica, RemoteLog, ScriptedTransport, T0};
use std::sync::Arc;
use waymark_core::ManualClock;
use waymark_crypto::SchnorrIdentity;
use waymark_domain::{
    EntityKind, Envelope, EnvelopeFactory, EventType, LamportClock, Origin, Transport,
    ValidationContext,
};
use waymark_store::{EntityStore, MemoryStore, OutboxStore};
use waymark_sync::{MergeEngine, TransportErrorKind};

fn remote_author(start: i64) -> (Arc<ManualClock>, EnvelopeFactory) {
    let clock = Arc::new(ManualClock::new(start));
    let factory = EnvelopeFactory::new(
        Some(Arc::new(SchnorrIdentity::generate())),
        "remote",
        Arc::new(LamportClock::default()),
        clock.clone(),
    );
    (clock, factory)
}

fn pin_edit(factory: &EnvelopeFactory, name: &str, updated_at: i64) -> Envelope {
    factory.build(
        EventType::PinUpdate,
        "pin:fountain",
        payload(&[
            ("name", name),
            ("lat", "45.52"),
            ("lon", "-122.68"),
            ("updated_at", &updated_at.to_string()),
        ]),
    )
}

fn permutations(items: &[Envelope]) -> Vec<Vec<Envelope>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn test_every_delivery_order_converges() {
    let (_clock, factory) = remote_author(T0);
    let edits = vec![
        pin_edit(&factory, "First", 10),
        pin_edit(&factory, "Third", 30),
        pin_edit(&factory, "Second", 20),
    ];
    let ctx = ValidationContext::inbound(Origin::Hub, None, T0);

    let mut finals = Vec::new();
    for order in permutations(&edits) {
        let store = Arc::new(MemoryStore::new());
        let merge = MergeEngine::new(store.clone());
        for envelope in &order {
            assert!(merge.apply(envelope, &ctx).unwrap().applied);
        }
        // replaying the whole set changes nothing
        for envelope in &order {
            assert!(merge.apply(envelope, &ctx).unwrap().applied);
        }
        finals.push(store.get_entity("pin:fountain").unwrap().unwrap());
    }

    assert_eq!(finals.len(), 6);
    for record in &finals {
        assert_eq!(record, &finals[0]);
    }
    assert_eq!(finals[0].name(), Some("Third"));
    assert_eq!(finals[0].updated_at, 30);
}

#[tokio::test]
async fn test_offline_edit_replay() {
    let log = RemoteLog::new();
    let hub_a = ScriptedTransport::new(Transport::Hub, log.clone());
    let hub_b = ScriptedTransport::new(Transport::Hub, log.clone());
    let a = Replica::new("device-a", vec![hub_a.clone()]);
    let b = Replica::new("device-b", vec![hub_b]);

    let created = a
        .author
        .create(
            EntityKind::Pin,
            payload(&[("name", "Fountain"), ("lat", "45.52"), ("lon", "-122.68"), ("updated_at", "50")]),
        )
        .unwrap();
    let pin_id = created.envelope.entity_id.clone();
    a.tick().await;
    b.tick().await;
    assert_eq!(
        b.store.get_entity(&pin_id).unwrap().unwrap().name(),
        Some("Fountain")
    );

    // Two edits while the hub is unreachable.
    hub_a.go_down(TransportErrorKind::Network);
    let first = a
        .author
        .author(
            EventType::PinUpdate,
            &pin_id,
            payload(&[("name", "Fountain (dry)"), ("lat", "45.52"), ("lon", "-122.68"), ("updated_at", "100")]),
        )
        .unwrap();
    a.clock.advance(60);
    let second = a
        .author
        .author(
            EventType::PinUpdate,
            &pin_id,
            payload(&[("name", "Fountain (working)"), ("lat", "45.52"), ("lon", "-122.68"), ("updated_at", "200")]),
        )
        .unwrap();

    // The peer saw the first edit some other way.
    let peer_ctx = ValidationContext::inbound(Origin::Relay, None, T0);
    assert!(b.merge.apply(&first.envelope, &peer_ctx).unwrap().applied);
    assert_eq!(
        b.store.get_entity(&pin_id).unwrap().unwrap().updated_at,
        100
    );

    // Still offline: the older edit is superseded, the newer one backs off.
    let offline = a.tick().await;
    assert_eq!(offline.superseded, 1);
    assert_eq!(offline.retried, 1);
    assert!(a.store.get(&first.envelope.event_id).unwrap().is_none());

    hub_a.restore();
    a.clock.advance(5);
    let report = a.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(
        hub_a.pushed().last().cloned(),
        Some(vec![second.envelope.event_id.clone()])
    );
    assert!(!log.event_ids().contains(&first.envelope.event_id));

    b.tick().await;
    let on_b = b.store.get_entity(&pin_id).unwrap().unwrap();
    let on_a = a.store.get_entity(&pin_id).unwrap().unwrap();
    assert_eq!(on_b.updated_at, 200);
    assert_eq!(on_b.name(), Some("Fountain (working)"));
    assert_eq!(on_b.fields, on_a.fields);
    assert_eq!(on_b.last_event_id, on_a.last_event_id);
}

#[tokio::test]
async fn test_stale_remote_write_rejected() {
    let log = RemoteLog::new();
    let hub = ScriptedTransport::new(Transport::Hub, log.clone());
    let local = Replica::new("device-a", vec![hub]);

    let created = local
        .author
        .create(
            EntityKind::Bulletin,
            payload(&[("title", "Repair cafe"), ("body", "Sunday"), ("updated_at", "500")]),
        )
        .unwrap();
    let bulletin_id = created.envelope.entity_id.clone();
    let before = local.store.get_entity(&bulletin_id).unwrap().unwrap();

    let (_clock, remote) = remote_author(T0);
    let stale = remote.build(
        EventType::BulletinUpdate,
        &bulletin_id,
        payload(&[("title", "Repair cafe (old)"), ("body", "Saturday"), ("updated_at", "300")]),
    );
    log.publish(stale.clone());

    let ctx = ValidationContext::inbound(Origin::Hub, None, T0);
    let outcome = local.merge.apply(&stale, &ctx).unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.reason, None);
    assert_eq!(local.store.get_entity(&bulletin_id).unwrap().unwrap(), before);

    // Same result when it arrives through a pull.
    let report = local.tick().await;
    assert_eq!(report.rejected_inbound, 0);
    assert_eq!(local.store.get_entity(&bulletin_id).unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_equal_timestamps_later_applied_wins() {
    let (_clock, remote) = remote_author(T0);
    let one = pin_edit(&remote, "One", 70);
    let two = pin_edit(&remote, "Two", 70);

    let store = Arc::new(MemoryStore::new());
    let merge = MergeEngine::new(store.clone());
    let ctx = ValidationContext::inbound(Origin::Hub, None, T0);
    merge.apply(&one, &ctx).unwrap();
    merge.apply(&two, &ctx).unwrap();

    let record = store.get_entity("pin:fountain").unwrap().unwrap();
    assert_eq!(record.name(), Some("Two"));
    assert_eq!(record.last_event_id, two.event_id);
}

#[tokio::test]
async fn test_endorsements_travel_and_rescore() {
    let log = RemoteLog::new();
    let owner = Replica::new("owner", vec![ScriptedTransport::new(Transport::Hub, log.clone())]);
    let rider_a = Replica::new("rider-a", vec![ScriptedTransport::new(Transport::Hub, log.clone())]);
    let rider_b = Replica::new("rider-b", vec![ScriptedTransport::new(Transport::Hub, log.clone())]);

    let route = owner
        .author
        .create(EntityKind::Route, payload(&[("name", "Night bus 9"), ("base_reliability", "40")]))
        .unwrap();
    let route_id = route.envelope.entity_id.clone();
    owner.tick().await;

    for rider in [&rider_a, &rider_b] {
        rider.tick().await;
        rider
            .author
            .author(EventType::RouteEndorse, &route_id, payload(&[("score", "5")]))
            .unwrap();
        rider.tick().await;
    }

    owner.tick().await;
    let record = owner.store.get_entity(&route_id).unwrap().unwrap();
    // 40 + min(35, 5 * 4 + 2 * 3)
    assert_eq!(record.trust_score, Some(66));
    assert_eq!(record.trust_tier, 1);
    assert_eq!(owner.store.endorsements_for(&route_id).unwrap().len(), 2);
}
