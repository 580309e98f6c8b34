//! Outbox delivery against scripted hubs and relays.

use crate::test_utils::{payload, Answer, Replica, RemoteLog, ScriptedTransport, T0};
use std::sync::Arc;
use waymark_core::Clock;
use waymark_domain::{EntityKind, FailureCategory, Transport};
use waymark_store::{CursorStore, OutboxStatus, OutboxStore, SqliteStore};
use waymark_sync::TransportErrorKind;

fn bulletin(replica: &Replica, title: &str) -> String {
    replica
        .author
        .create(
            EntityKind::Bulletin,
            payload(&[("title", title), ("body", "details inside")]),
        )
        .unwrap()
        .envelope
        .event_id
}

#[tokio::test]
async fn test_partial_batch_outcomes_per_event() {
    let hub = ScriptedTransport::new(Transport::Hub, RemoteLog::new());
    let replica = Replica::new("device-a", vec![hub.clone()]);

    let accepted = bulletin(&replica, "Accepted");
    let refused = bulletin(&replica, "Refused");
    let busy = bulletin(&replica, "Busy");
    let silent = bulletin(&replica, "Silent");
    hub.answer(
        &refused,
        Answer::Reject(
            FailureCategory::ProtocolInvalid,
            "hub-protocol_invalid:signature_invalid".to_string(),
        ),
    );
    hub.answer(
        &busy,
        Answer::Reject(
            FailureCategory::TransportFailed,
            "hub-transport_failed:overloaded".to_string(),
        ),
    );
    hub.answer(&silent, Answer::Silent);

    let report = replica.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 2);
    assert_eq!(hub.pushed().len(), 1);
    assert_eq!(hub.pushed()[0].len(), 4);

    let row = replica.store.get(&accepted).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Delivered);

    let row = replica.store.get(&refused).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(
        row.last_error.as_deref(),
        Some("hub-protocol_invalid:signature_invalid")
    );

    let row = replica.store.get(&busy).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Retry);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.next_retry_at, Some(T0 + 1));

    let row = replica.store.get(&silent).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Retry);
    assert_eq!(row.last_error.as_deref(), Some("hub-no-ack"));

    // Only the two retryable rows go out again.
    hub.answer(&busy, Answer::Accept);
    hub.answer(&silent, Answer::Accept);
    replica.clock.advance(1);
    let report = replica.tick().await;
    assert_eq!(report.delivered, 2);
    let mut resent = hub.pushed()[1].clone();
    resent.sort();
    let mut expected = vec![busy, silent];
    expected.sort();
    assert_eq!(resent, expected);
}

#[tokio::test]
async fn test_lanes_retry_independently() {
    let hub = ScriptedTransport::new(Transport::Hub, RemoteLog::new());
    let relay = ScriptedTransport::new(Transport::Relay, RemoteLog::new());
    let replica = Replica::new("device-a", vec![hub.clone(), relay.clone()]);
    relay.go_down(TransportErrorKind::Timeout);

    let event_id = bulletin(&replica, "Two lanes");
    let report = replica.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.retried, 1);

    let row = replica.store.get(&event_id).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Retry);
    assert_eq!(
        row.lane(Transport::Hub).unwrap().status,
        OutboxStatus::Delivered
    );
    let relay_lane = row.lane(Transport::Relay).unwrap();
    assert_eq!(relay_lane.status, OutboxStatus::Retry);
    assert_eq!(relay_lane.last_error.as_deref(), Some("nostr-timeout"));

    // Backoff not elapsed: nothing goes out.
    replica.tick().await;
    assert_eq!(relay.pushed().len(), 0);
    assert_eq!(hub.pushed().len(), 1);

    relay.restore();
    replica.clock.advance(1);
    let report = replica.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(relay.pushed(), vec![vec![event_id.clone()]]);
    assert_eq!(hub.pushed().len(), 1);
    assert_eq!(
        replica.store.get(&event_id).unwrap().unwrap().status,
        OutboxStatus::Delivered
    );
}

#[tokio::test]
async fn test_trust_sensitive_events_give_up_early() {
    let hub = ScriptedTransport::new(Transport::Hub, RemoteLog::new());
    let replica = Replica::new("device-a", vec![hub.clone()]);
    hub.go_down(TransportErrorKind::Network);

    let event_id = replica
        .author
        .create(EntityKind::Route, payload(&[("name", "Ferry")]))
        .unwrap()
        .envelope
        .event_id;

    for (attempt, delay) in [(1u32, 20i64), (2, 40), (3, 80)] {
        replica.tick().await;
        let row = replica.store.get(&event_id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Retry);
        assert_eq!(row.attempts, attempt);
        assert_eq!(row.next_retry_at, Some(replica.clock.now_secs() + delay));
        replica.clock.advance(delay);
    }

    replica.tick().await;
    let row = replica.store.get(&event_id).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempts, 4);
    assert_eq!(row.last_error.as_deref(), Some("hub-network"));
    assert_eq!(hub.pushed().len(), 0);
}

#[tokio::test]
async fn test_outbox_and_cursor_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("waymark.db");
    let log = RemoteLog::new();

    let event_id = {
        let hub = ScriptedTransport::new(Transport::Hub, log.clone());
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let replica = Replica::with_store("device-a", store, vec![hub.clone()]);
        hub.go_down(TransportErrorKind::Http(503));

        let event_id = bulletin(&replica, "Before restart");
        replica.tick().await;
        let row = replica.store.get(&event_id).unwrap().unwrap();
        assert_eq!(row.last_error.as_deref(), Some("hub-http-503"));
        event_id
    };

    let hub = ScriptedTransport::new(Transport::Hub, log.clone());
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let replica = Replica::with_store("device-a", store, vec![hub.clone()]);

    let row = replica.store.get(&event_id).unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Retry);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.next_retry_at, Some(T0 + 1));

    replica.clock.advance(1);
    let report = replica.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(log.event_ids(), vec![event_id.clone()]);
    assert_eq!(
        replica.store.get_cursor(Transport::Hub.as_str()).unwrap().as_deref(),
        Some("1")
    );
    drop(replica);

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(
        reopened.get_cursor(Transport::Hub.as_str()).unwrap().as_deref(),
        Some("1")
    );
    assert_eq!(
        reopened.get(&event_id).unwrap().unwrap().status,
        OutboxStatus::Delivered
    );
}
