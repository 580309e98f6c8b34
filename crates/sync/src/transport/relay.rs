//! Relay transport: envelopes as signed notes over WebSocket relays.
//!
//! Every event is routed by a precision-5 geohash: its own coordinates, else
//! the parent entity's, else an anchor cell picked from the entity id. Pushes
//! go to the relays nearest that cell; pulls query the relays nearest home
//! and each anchor.

use super::nostr::{Note, NOTE_KIND, SYNC_TAG};
use super::{
    InboundEnvelope, PullBatch, PushReport, SyncTransport, TransportError, TransportErrorKind,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use waymark_core::{Clock, RelayConfig};
use waymark_crypto::{sha256, SigningIdentity};
use waymark_domain::geo::{self, RELAY_GEOHASH_PRECISION};
use waymark_domain::{Coordinates, Envelope, FailureCategory, Transport};
use waymark_store::EntityStore;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PULL_DEADLINE: Duration = Duration::from_secs(8);

/// Backward pages requested from one relay in a single pull.
const MAX_PULL_PAGES: usize = 8;

#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    pub url: String,
    pub geohash: String,
    center: Coordinates,
}

/// Known relays and the anchor cells used for unlocated events.
#[derive(Debug, Clone, Default)]
pub struct RelayDirectory {
    endpoints: Vec<RelayEndpoint>,
    nearest: usize,
    anchors: Vec<String>,
}

impl RelayDirectory {
    pub fn from_config(config: &RelayConfig) -> Self {
        let mut endpoints = Vec::with_capacity(config.relays.len());
        for relay in &config.relays {
            match geo::decode(&relay.geohash) {
                Ok(center) => endpoints.push(RelayEndpoint {
                    url: relay.url.clone(),
                    geohash: relay.geohash.clone(),
                    center,
                }),
                Err(e) => warn!(url = %relay.url, geohash = %relay.geohash, error = %e, "Relay with invalid geohash ignored"),
            }
        }

        let anchors = config
            .anchor_geohashes
            .iter()
            .filter(|hash| {
                let valid = geo::decode(hash).is_ok();
                if !valid {
                    warn!(geohash = %hash, "Invalid anchor geohash ignored");
                }
                valid
            })
            .cloned()
            .collect();

        Self {
            endpoints,
            nearest: config.nearest_relays.max(1),
            anchors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn anchors(&self) -> &[String] {
        &self.anchors
    }

    /// Up to N relays ordered by distance from `point`.
    pub fn nearest_to(&self, point: &Coordinates) -> Vec<&RelayEndpoint> {
        let mut ranked: Vec<(f64, &RelayEndpoint)> = self
            .endpoints
            .iter()
            .map(|endpoint| (endpoint.center.distance_m(point), endpoint))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked
            .into_iter()
            .take(self.nearest)
            .map(|(_, endpoint)| endpoint)
            .collect()
    }

    /// Relays serving a geohash cell; the first N if the cell is unknown.
    pub fn for_geohash(&self, geohash: Option<&str>) -> Vec<&RelayEndpoint> {
        match geohash.and_then(|hash| geo::decode(hash).ok()) {
            Some(center) => self.nearest_to(&center),
            None => self.endpoints.iter().take(self.nearest).collect(),
        }
    }

    /// Deterministic anchor cell for an entity without coordinates.
    pub fn anchor_for(&self, entity_id: &str) -> Option<&str> {
        if self.anchors.is_empty() {
            return None;
        }
        let idx = sha256(entity_id.as_bytes())[0] as usize % self.anchors.len();
        Some(self.anchors[idx].as_str())
    }
}

/// Looks up stored coordinates of a parent entity.
pub trait GeoResolver: Send + Sync {
    fn coordinates_of(&self, entity_id: &str) -> Option<Coordinates>;
}

pub struct StoreGeoResolver {
    store: Arc<dyn EntityStore>,
}

impl StoreGeoResolver {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

impl GeoResolver for StoreGeoResolver {
    fn coordinates_of(&self, entity_id: &str) -> Option<Coordinates> {
        match self.store.get_entity(entity_id) {
            Ok(record) => record.and_then(|r| r.coordinates()),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Parent lookup failed during relay routing");
                None
            }
        }
    }
}

/// A frame received from a relay.
#[derive(Debug, Clone, PartialEq)]
enum RelayFrame {
    Ok {
        note_id: String,
        accepted: bool,
        message: String,
    },
    Event {
        subscription: String,
        note: Box<Note>,
    },
    Eose {
        subscription: String,
    },
    Closed {
        subscription: String,
    },
    Notice(String),
}

impl RelayFrame {
    fn parse(text: &str) -> Option<Self> {
        let frame: Vec<Value> = serde_json::from_str(text).ok()?;
        let label = frame.first()?.as_str()?;
        let text_at = |i: usize| frame.get(i).and_then(Value::as_str).map(str::to_string);
        match label {
            "OK" => Some(RelayFrame::Ok {
                note_id: text_at(1)?,
                accepted: frame.get(2)?.as_bool()?,
                message: text_at(3).unwrap_or_default(),
            }),
            "EVENT" => Some(RelayFrame::Event {
                subscription: text_at(1)?,
                note: Box::new(serde_json::from_value(frame.get(2)?.clone()).ok()?),
            }),
            "EOSE" => Some(RelayFrame::Eose {
                subscription: text_at(1)?,
            }),
            "CLOSED" => Some(RelayFrame::Closed {
                subscription: text_at(1)?,
            }),
            "NOTICE" => Some(RelayFrame::Notice(text_at(1).unwrap_or_default())),
            _ => None,
        }
    }
}

/// Map a relay's `OK false` message to a rejection category and code.
fn classify_refusal(message: &str) -> (FailureCategory, String) {
    let prefix = message
        .split_once(':')
        .map(|(prefix, _)| prefix.trim())
        .filter(|prefix| !prefix.is_empty() && !prefix.contains(' '))
        .unwrap_or("error");
    let category = match prefix {
        "invalid" => FailureCategory::ProtocolInvalid,
        "blocked" | "restricted" => FailureCategory::PolicyRejected,
        _ => FailureCategory::TransportFailed,
    };
    (category, format!("nostr-{prefix}"))
}

fn network_error(detail: impl Into<String>) -> TransportError {
    TransportError::new(Transport::Relay, TransportErrorKind::Network, detail)
}

fn timeout_error(detail: impl Into<String>) -> TransportError {
    TransportError::new(Transport::Relay, TransportErrorKind::Timeout, detail)
}

pub struct RelayClient {
    directory: RelayDirectory,
    identity: Option<Arc<dyn SigningIdentity>>,
    resolver: Option<Arc<dyn GeoResolver>>,
    home: Option<Coordinates>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    pull_deadline: Duration,
}

impl RelayClient {
    pub fn new(
        directory: RelayDirectory,
        identity: Option<Arc<dyn SigningIdentity>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            identity,
            resolver: None,
            home: None,
            clock,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pull_deadline: DEFAULT_PULL_DEADLINE,
        }
    }

    pub fn from_config(
        config: &RelayConfig,
        identity: Option<Arc<dyn SigningIdentity>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(RelayDirectory::from_config(config), identity, clock)
            .with_timeouts(config.request_timeout(), config.pull_deadline())
    }

    pub fn with_home(mut self, home: Coordinates) -> Self {
        self.home = Some(home);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, pull_deadline: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.pull_deadline = pull_deadline;
        self
    }

    /// Routing cell for an envelope.
    pub fn routing_geohash(&self, envelope: &Envelope) -> Option<String> {
        if let Ok(Some(coords)) = envelope.coordinates() {
            return Some(coords.geohash(RELAY_GEOHASH_PRECISION));
        }
        if let Some(coords) = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.coordinates_of(&envelope.entity_id))
        {
            return Some(coords.geohash(RELAY_GEOHASH_PRECISION));
        }
        self.directory
            .anchor_for(&envelope.entity_id)
            .map(str::to_string)
    }

    fn pull_targets(&self) -> Vec<&RelayEndpoint> {
        let mut targets: Vec<&RelayEndpoint> = Vec::new();
        if let Some(home) = &self.home {
            targets.extend(self.directory.nearest_to(home));
        }
        for anchor in self.directory.anchors() {
            targets.extend(self.directory.for_geohash(Some(anchor)));
        }
        if targets.is_empty() {
            targets.extend(self.directory.for_geohash(None));
        }
        let mut seen = HashSet::new();
        targets.retain(|endpoint| seen.insert(endpoint.url.clone()));
        targets
    }

    /// Send notes to one relay and collect `OK` answers until the timeout.
    async fn publish(
        &self,
        url: &str,
        notes: &[Note],
    ) -> Result<Vec<(String, bool, String)>, TransportError> {
        let deadline = Instant::now() + self.request_timeout;
        let (mut ws, _) = timeout_at(deadline, connect_async(url))
            .await
            .map_err(|_| timeout_error(format!("connect to {url} timed out")))?
            .map_err(|e| network_error(format!("connect to {url} failed: {e}")))?;

        for note in notes {
            let frame = json!(["EVENT", note]).to_string();
            ws.send(Message::Text(frame))
                .await
                .map_err(|e| network_error(format!("send to {url} failed: {e}")))?;
        }

        let mut pending: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        let mut acks = Vec::new();
        while !pending.is_empty() {
            let message = match timeout_at(deadline, ws.next()).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    debug!(url = %url, error = %e, "Relay read failed");
                    break;
                }
                Ok(None) | Err(_) => break,
            };
            let Message::Text(text) = message else {
                continue;
            };
            match RelayFrame::parse(&text) {
                Some(RelayFrame::Ok {
                    note_id,
                    accepted,
                    message,
                }) => {
                    if pending.remove(note_id.as_str()) {
                        acks.push((note_id, accepted, message));
                    }
                }
                Some(RelayFrame::Notice(notice)) => debug!(url = %url, notice = %notice, "Relay notice"),
                _ => {}
            }
        }

        let _ = ws.close(None).await;
        Ok(acks)
    }

    /// Subscribe on one relay and collect notes until EOSE or the deadline.
    /// The flag is true only when the relay signalled EOSE.
    async fn collect(
        &self,
        url: &str,
        subscription: &str,
        filter: &Value,
        deadline: Instant,
    ) -> Result<(Vec<Note>, bool), TransportError> {
        let (mut ws, _) = timeout_at(deadline, connect_async(url))
            .await
            .map_err(|_| timeout_error(format!("connect to {url} timed out")))?
            .map_err(|e| network_error(format!("connect to {url} failed: {e}")))?;

        ws.send(Message::Text(json!(["REQ", subscription, filter]).to_string()))
            .await
            .map_err(|e| network_error(format!("subscribe on {url} failed: {e}")))?;

        let mut notes = Vec::new();
        let mut complete = false;
        loop {
            let message = match timeout_at(deadline, ws.next()).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    debug!(url = %url, error = %e, "Relay read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(url = %url, collected = notes.len(), "Relay pull deadline reached");
                    break;
                }
            };
            let Message::Text(text) = message else {
                continue;
            };
            match RelayFrame::parse(&text) {
                Some(RelayFrame::Event {
                    subscription: sub,
                    note,
                }) if sub == subscription => notes.push(*note),
                Some(RelayFrame::Eose { subscription: sub }) if sub == subscription => {
                    complete = true;
                    break;
                }
                Some(RelayFrame::Closed { subscription: sub }) if sub == subscription => break,
                _ => {}
            }
        }

        let _ = ws
            .send(Message::Text(json!(["CLOSE", subscription]).to_string()))
            .await;
        let _ = ws.close(None).await;
        Ok((notes, complete))
    }

    /// Page backwards through one relay's window with `until` until a page
    /// comes back short. Relays answer a `limit` filter with the newest
    /// matches, so a full page means older notes may still be waiting.
    async fn sweep(
        &self,
        url: &str,
        subscription: &str,
        filter: &Value,
        limit: usize,
        deadline: Instant,
    ) -> Result<Sweep, TransportError> {
        let mut sweep = Sweep::default();
        let mut seen = HashSet::new();
        let mut until: Option<i64> = None;

        for page in 0..MAX_PULL_PAGES {
            let mut page_filter = filter.clone();
            if let Some(until) = until {
                page_filter["until"] = json!(until);
            }
            let (notes, eose) = match self.collect(url, subscription, &page_filter, deadline).await {
                Ok(collected) => collected,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    debug!(url = %url, page, error = %e, "Relay page failed");
                    return Ok(sweep);
                }
            };

            let full = notes.len() >= limit.max(1);
            let mut fresh = 0usize;
            for note in notes {
                sweep.oldest = Some(sweep.oldest.map_or(note.created_at, |o| o.min(note.created_at)));
                if seen.insert(note.id.clone()) {
                    fresh += 1;
                    sweep.notes.push(note);
                }
            }

            if !eose {
                return Ok(sweep);
            }
            if !full {
                sweep.complete = true;
                return Ok(sweep);
            }
            if fresh == 0 {
                debug!(url = %url, until = ?until, "Relay page made no progress");
                return Ok(sweep);
            }
            until = sweep.oldest;
        }

        debug!(url = %url, pages = MAX_PULL_PAGES, "Relay page budget spent");
        Ok(sweep)
    }
}

/// Notes gathered from one relay across its pages.
#[derive(Debug, Default)]
struct Sweep {
    notes: Vec<Note>,
    /// Oldest `created_at` seen on any page
    oldest: Option<i64>,
    /// The whole window down to `since` was read
    complete: bool,
}

impl Sweep {
    /// Position the cursor must stay at or below. Everything newer than it
    /// was read; below it the relay may still hold unread notes.
    fn ceiling(&self, since: Option<i64>) -> Option<i64> {
        if self.complete {
            return None;
        }
        Some(self.oldest.or(since).unwrap_or(0))
    }
}

#[async_trait]
impl SyncTransport for RelayClient {
    fn kind(&self) -> Transport {
        Transport::Relay
    }

    async fn push(&self, envelopes: &[Envelope]) -> Result<PushReport, TransportError> {
        let mut report = PushReport::new();
        if envelopes.is_empty() {
            return Ok(report);
        }
        if self.directory.is_empty() {
            for envelope in envelopes {
                report.reject(
                    envelope.event_id.clone(),
                    FailureCategory::TransportFailed,
                    "nostr-no-relays",
                );
            }
            return Ok(report);
        }
        let identity = self.identity.as_ref().ok_or_else(|| {
            TransportError::new(
                Transport::Relay,
                TransportErrorKind::NoIdentity,
                "relay notes need a signing identity",
            )
        })?;

        let now = self.clock.now_secs();
        let mut note_to_event: HashMap<String, String> = HashMap::new();
        let mut groups: BTreeMap<String, Vec<Note>> = BTreeMap::new();
        for envelope in envelopes {
            let geohash = self.routing_geohash(envelope);
            let note = Note::for_envelope(envelope, geohash.as_deref(), identity.as_ref(), now)
                .map_err(|e| {
                    TransportError::new(
                        Transport::Relay,
                        TransportErrorKind::NoIdentity,
                        e.to_string(),
                    )
                })?;
            note_to_event.insert(note.id.clone(), envelope.event_id.clone());
            for endpoint in self.directory.for_geohash(geohash.as_deref()) {
                groups
                    .entry(endpoint.url.clone())
                    .or_default()
                    .push(note.clone());
            }
        }

        let attempts = groups
            .iter()
            .map(|(url, notes)| async move { (url, self.publish(url, notes).await) });
        let results = join_all(attempts).await;

        let mut last_error = None;
        let mut reached = 0usize;
        for (url, result) in results {
            match result {
                Ok(acks) => {
                    reached += 1;
                    for (note_id, accepted, message) in acks {
                        let Some(event_id) = note_to_event.get(&note_id) else {
                            continue;
                        };
                        if accepted {
                            report.accept(event_id.clone());
                        } else {
                            let (category, code) = classify_refusal(&message);
                            debug!(url = %url, event_id = %event_id, message = %message, "Relay refused note");
                            report.reject(event_id.clone(), category, code);
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Relay push failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if reached == 0 => Err(e),
            _ => Ok(report),
        }
    }

    async fn pull(&self, cursor: Option<&str>, limit: usize) -> Result<PullBatch, TransportError> {
        if self.directory.is_empty() {
            return Err(TransportError::new(
                Transport::Relay,
                TransportErrorKind::NoRelays,
                "no relays configured",
            ));
        }

        let mut filter = json!({
            "kinds": [NOTE_KIND],
            "#t": [SYNC_TAG],
            "limit": limit,
        });
        let since = cursor.and_then(|c| c.trim().parse::<i64>().ok());
        if let Some(since) = since {
            filter["since"] = json!(since);
        }

        let subscription = format!("waymark-{}", uuid::Uuid::new_v4().simple());
        let deadline = Instant::now() + self.pull_deadline;
        let targets = self.pull_targets();
        let results = join_all(targets.iter().map(|endpoint| {
            self.sweep(&endpoint.url, &subscription, &filter, limit, deadline)
        }))
        .await;

        let now = self.clock.now_secs();
        let mut last_error = None;
        let mut reached = 0usize;
        let mut ceiling: Option<i64> = None;
        let mut notes = Vec::new();
        for (endpoint, result) in targets.iter().zip(results) {
            match result {
                Ok(sweep) => {
                    reached += 1;
                    if let Some(relay_ceiling) = sweep.ceiling(since) {
                        debug!(url = %endpoint.url, ceiling = relay_ceiling, "Relay window left partly unread");
                        ceiling = Some(ceiling.map_or(relay_ceiling, |c| c.min(relay_ceiling)));
                    }
                    notes.extend(sweep.notes);
                }
                Err(e) => {
                    warn!(url = %endpoint.url, error = %e, "Relay pull failed");
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error.filter(|_| reached == 0) {
            return Err(e);
        }

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for note in notes {
            if !seen.insert(note.id.clone()) {
                continue;
            }
            if let Err(e) = note.verify() {
                warn!(note_id = %note.id, error = %e, "Relay note failed verification");
                continue;
            }
            match note.decode_envelope() {
                Ok(envelope) => items.push(InboundEnvelope {
                    envelope,
                    position: note.created_at.min(now).to_string(),
                    signer: Some(note.pubkey.clone()),
                }),
                Err(e) => warn!(note_id = %note.id, error = %e, "Relay note skipped"),
            }
        }

        Ok(PullBatch {
            items,
            next_cursor: None,
            ceiling: ceiling.map(|c| c.min(now).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Verdict;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use waymark_core::{ManualClock, RelayEndpointConfig};
    use waymark_crypto::SchnorrIdentity;
    use waymark_domain::{build, EventType, Payload};

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct FakeRelay {
        stored: Mutex<Vec<Note>>,
        refuse: Mutex<HashMap<String, String>>,
        withhold_eose: bool,
    }

    impl FakeRelay {
        /// Stored notes inside `since..=until`, newest first, cut to `limit`.
        fn matching(&self, filter: &Value) -> Vec<Note> {
            let since = filter["since"].as_i64().unwrap_or(i64::MIN);
            let until = filter["until"].as_i64().unwrap_or(i64::MAX);
            let limit = filter["limit"].as_u64().map_or(usize::MAX, |l| l as usize);
            let mut notes: Vec<Note> = self
                .stored
                .lock()
                .unwrap()
                .iter()
                .filter(|note| (since..=until).contains(&note.created_at))
                .cloned()
                .collect();
            notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            notes.truncate(limit);
            notes
        }

        fn seed(&self, identity: &SchnorrIdentity, times: impl IntoIterator<Item = i64>) {
            let mut stored = self.stored.lock().unwrap();
            for at in times {
                stored.push(Note::for_envelope(&pin(&format!("n{at}")), None, identity, at).unwrap());
            }
        }
    }

    async fn spawn_relay(relay: Arc<FakeRelay>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let relay = relay.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else { continue };
                        let frame: Vec<Value> = serde_json::from_str(&text).unwrap();
                        match frame[0].as_str() {
                            Some("EVENT") => {
                                let note: Note = serde_json::from_value(frame[1].clone()).unwrap();
                                let event_id = note.tag_value("event_id").unwrap().to_string();
                                let refusal = relay.refuse.lock().unwrap().get(&event_id).cloned();
                                let reply = match refusal {
                                    Some(message) => json!(["OK", note.id, false, message]),
                                    None => {
                                        relay.stored.lock().unwrap().push(note.clone());
                                        json!(["OK", note.id, true, ""])
                                    }
                                };
                                ws.send(Message::Text(reply.to_string())).await.unwrap();
                            }
                            Some("REQ") => {
                                let sub = frame[1].as_str().unwrap().to_string();
                                let notes = relay.matching(&frame[2]);
                                for note in notes {
                                    let frame = json!(["EVENT", sub, note]).to_string();
                                    ws.send(Message::Text(frame)).await.unwrap();
                                }
                                if !relay.withhold_eose {
                                    let eose = json!(["EOSE", sub]).to_string();
                                    ws.send(Message::Text(eose)).await.unwrap();
                                }
                            }
                            _ => {}
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    fn config(urls: &[&str]) -> RelayConfig {
        RelayConfig {
            relays: urls
                .iter()
                .map(|url| RelayEndpointConfig {
                    url: url.to_string(),
                    geohash: "c20fb".to_string(),
                })
                .collect(),
            ..RelayConfig::default()
        }
    }

    fn client(config: &RelayConfig) -> RelayClient {
        RelayClient::from_config(
            config,
            Some(Arc::new(SchnorrIdentity::generate())),
            Arc::new(ManualClock::new(NOW)),
        )
        .with_timeouts(Duration::from_secs(3), Duration::from_secs(1))
    }

    fn pin(name: &str) -> Envelope {
        let payload: Payload = [("name", name), ("lat", "45.52"), ("lon", "-122.68")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        build(EventType::PinCreate, &format!("pin:{name}"), payload, None, &"aa".repeat(32), NOW, 1)
    }

    #[test]
    fn test_directory_orders_by_distance() {
        let config = RelayConfig {
            relays: vec![
                RelayEndpointConfig { url: "wss://far".into(), geohash: "u4pru".into() },
                RelayEndpointConfig { url: "wss://near".into(), geohash: "c20fb".into() },
                RelayEndpointConfig { url: "wss://broken".into(), geohash: "!!".into() },
            ],
            nearest_relays: 1,
            ..RelayConfig::default()
        };
        let directory = RelayDirectory::from_config(&config);
        let portland = Coordinates::new(45.52, -122.68).unwrap();

        let nearest = directory.nearest_to(&portland);
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].url, "wss://near");
    }

    #[test]
    fn test_routing_falls_back_to_stable_anchor() {
        let client = client(&config(&["wss://a"]));
        let unlocated = build(
            EventType::BulletinCreate,
            "bulletin:b1",
            Payload::new(),
            None,
            &"aa".repeat(32),
            NOW,
            1,
        );
        let first = client.routing_geohash(&unlocated).unwrap();
        assert!(RelayConfig::default().anchor_geohashes.contains(&first));
        assert_eq!(client.routing_geohash(&unlocated), Some(first));

        assert_eq!(client.routing_geohash(&pin("tap")).as_deref(), Some("c20fb"));
    }

    #[test]
    fn test_routing_uses_parent_coordinates() {
        struct Parent;
        impl GeoResolver for Parent {
            fn coordinates_of(&self, _entity_id: &str) -> Option<Coordinates> {
                Coordinates::new(57.64911, 10.40744).ok()
            }
        }
        let client = client(&config(&["wss://a"])).with_resolver(Arc::new(Parent));
        let endorse = build(
            EventType::RouteEndorse,
            "route:r1",
            Payload::new(),
            None,
            &"aa".repeat(32),
            NOW,
            1,
        );
        assert_eq!(client.routing_geohash(&endorse).as_deref(), Some("u4pru"));
    }

    #[test]
    fn test_refusal_classification() {
        assert_eq!(
            classify_refusal("invalid: bad signature"),
            (FailureCategory::ProtocolInvalid, "nostr-invalid".to_string())
        );
        assert_eq!(
            classify_refusal("blocked: spam"),
            (FailureCategory::PolicyRejected, "nostr-blocked".to_string())
        );
        assert_eq!(
            classify_refusal("rate-limited: slow down"),
            (FailureCategory::TransportFailed, "nostr-rate-limited".to_string())
        );
        assert_eq!(
            classify_refusal("something odd"),
            (FailureCategory::TransportFailed, "nostr-error".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_relays_rejects_every_event() {
        let client = client(&RelayConfig::default());
        let envelopes = vec![pin("a"), pin("b")];
        let report = client.push(&envelopes).await.unwrap();
        for envelope in &envelopes {
            assert_eq!(
                report.verdict(&envelope.event_id),
                Some(&Verdict::Rejected {
                    category: FailureCategory::TransportFailed,
                    code: "nostr-no-relays".to_string(),
                })
            );
        }
        assert!(client.pull(None, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_identity_is_whole_push_error() {
        let client = RelayClient::from_config(
            &config(&["ws://127.0.0.1:1"]),
            None,
            Arc::new(ManualClock::new(NOW)),
        );
        let err = client.push(&[pin("a")]).await.unwrap_err();
        assert_eq!(err.code(), "nostr-no-identity");
    }

    #[tokio::test]
    async fn test_push_then_pull_round_trip() {
        let relay = Arc::new(FakeRelay::default());
        let url = spawn_relay(relay.clone()).await;
        let client = client(&config(&[&url]));

        let accepted = pin("accepted");
        let refused = pin("refused");
        relay
            .refuse
            .lock()
            .unwrap()
            .insert(refused.event_id.clone(), "blocked: not welcome".to_string());

        let report = client.push(&[accepted.clone(), refused.clone()]).await.unwrap();
        assert_eq!(report.verdict(&accepted.event_id), Some(&Verdict::Accepted));
        assert_eq!(
            report.verdict(&refused.event_id),
            Some(&Verdict::Rejected {
                category: FailureCategory::PolicyRejected,
                code: "nostr-blocked".to_string(),
            })
        );

        let batch = client.pull(None, 50).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        let item = &batch.items[0];
        assert_eq!(item.envelope, accepted);
        assert_eq!(item.position, NOW.to_string());
        assert!(item.signer.is_some());
        assert_ne!(item.signer.as_deref(), Some(accepted.author_pubkey.as_str()));
    }

    #[tokio::test]
    async fn test_pull_deadline_keeps_collected_notes() {
        let relay = Arc::new(FakeRelay {
            withhold_eose: true,
            ..FakeRelay::default()
        });
        let identity = SchnorrIdentity::generate();
        relay
            .stored
            .lock()
            .unwrap()
            .push(Note::for_envelope(&pin("slow"), None, &identity, NOW).unwrap());
        let url = spawn_relay(relay).await;

        let batch = client(&config(&[&url])).pull(Some("0"), 50).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].signer, Some(identity.public_key_hex()));
        assert_eq!(batch.ceiling, Some(NOW.to_string()));
    }

    fn positions(batch: &PullBatch) -> Vec<i64> {
        let mut positions: Vec<i64> = batch
            .items
            .iter()
            .map(|item| item.position.parse().unwrap())
            .collect();
        positions.sort_unstable();
        positions
    }

    #[tokio::test]
    async fn test_pull_pages_back_through_full_windows() {
        let relay = Arc::new(FakeRelay::default());
        relay.seed(&SchnorrIdentity::generate(), 101..=400);
        let url = spawn_relay(relay).await;

        let batch = client(&config(&[&url])).pull(Some("100"), 100).await.unwrap();
        assert_eq!(positions(&batch), (101..=400).collect::<Vec<i64>>());
        assert_eq!(batch.ceiling, None);
    }

    #[tokio::test]
    async fn test_pull_page_budget_caps_cursor() {
        let relay = Arc::new(FakeRelay::default());
        relay.seed(&SchnorrIdentity::generate(), 1..=200);
        let url = spawn_relay(relay).await;

        let batch = client(&config(&[&url])).pull(None, 5).await.unwrap();
        let positions = positions(&batch);
        let ceiling: i64 = batch.ceiling.as_deref().unwrap().parse().unwrap();
        assert!(ceiling > 1);
        assert_eq!(positions[0], ceiling);
        assert_eq!(positions, (ceiling..=200).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_slow_relay_holds_back_fast_relay_cursor() {
        let identity = SchnorrIdentity::generate();
        let fast = Arc::new(FakeRelay::default());
        fast.seed(&identity, [300]);
        let slow = Arc::new(FakeRelay {
            withhold_eose: true,
            ..FakeRelay::default()
        });
        slow.seed(&identity, [150]);
        let fast_url = spawn_relay(fast).await;
        let slow_url = spawn_relay(slow).await;

        let batch = client(&config(&[&fast_url, &slow_url]))
            .pull(Some("100"), 50)
            .await
            .unwrap();
        assert_eq!(positions(&batch), vec![150, 300]);
        assert_eq!(batch.ceiling, Some("150".to_string()));
    }

    #[tokio::test]
    async fn test_forged_notes_dropped_on_pull() {
        let relay = Arc::new(FakeRelay::default());
        let identity = SchnorrIdentity::generate();
        let mut forged = Note::for_envelope(&pin("forged"), None, &identity, NOW).unwrap();
        forged.content = format!("{}{}", crate::transport::nostr::CONTENT_PREFIX, "e30");
        relay.stored.lock().unwrap().push(forged);
        let url = spawn_relay(relay).await;

        let batch = client(&config(&[&url])).pull(None, 50).await.unwrap();
        assert!(batch.items.is_empty());
    }
}
