//! Replica fixtures and scripted transports for sync scenarios.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use waymark_core::{logging, ManualClock, SyncConfig};
use waymark_crypto::SchnorrIdentity;
use waymark_domain::{
    Envelope, EnvelopeFactory, FailureCategory, LamportClock, Payload, Transport,
};
use waymark_store::{MemoryStore, SyncStore};
use waymark_sync::{
    InboundEnvelope, LocalAuthor, MergeEngine, PullBatch, PushReport, SyncOrchestrator,
    SyncTransport, TickReport, TransportError, TransportErrorKind,
};

/// Fixed start time for every scenario.
pub const T0: i64 = 1_700_000_000;

/// Build a payload from string pairs.
pub fn payload(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// How a scripted remote answers one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Accept,
    Reject(FailureCategory, String),
    /// Never acknowledge
    Silent,
}

/// Shared remote log. Positions are 1-based indexes into the log.
#[derive(Default)]
pub struct RemoteLog {
    envelopes: Mutex<Vec<Envelope>>,
}

impl RemoteLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, envelope: Envelope) {
        let mut log = self.envelopes.lock().unwrap();
        if !log.iter().any(|e| e.event_id == envelope.event_id) {
            log.push(envelope);
        }
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.envelopes
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory transport over a [`RemoteLog`], with per-event scripts.
pub struct ScriptedTransport {
    kind: Transport,
    log: Arc<RemoteLog>,
    answers: Mutex<HashMap<String, Answer>>,
    outage: Mutex<Option<TransportErrorKind>>,
    pushed: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(kind: Transport, log: Arc<RemoteLog>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            log,
            answers: Mutex::new(HashMap::new()),
            outage: Mutex::new(None),
            pushed: Mutex::new(Vec::new()),
        })
    }

    pub fn answer(&self, event_id: &str, answer: Answer) {
        self.answers
            .lock()
            .unwrap()
            .insert(event_id.to_string(), answer);
    }

    /// Fail every request until [`ScriptedTransport::restore`].
    pub fn go_down(&self, kind: TransportErrorKind) {
        *self.outage.lock().unwrap() = Some(kind);
    }

    pub fn restore(&self) {
        *self.outage.lock().unwrap() = None;
    }

    /// Event ids of every push batch seen, in order.
    pub fn pushed(&self) -> Vec<Vec<String>> {
        self.pushed.lock().unwrap().clone()
    }

    fn check_outage(&self) -> Result<(), TransportError> {
        match self.outage.lock().unwrap().clone() {
            Some(kind) => Err(TransportError::new(self.kind, kind, "scripted outage")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    fn kind(&self) -> Transport {
        self.kind
    }

    async fn push(&self, envelopes: &[Envelope]) -> Result<PushReport, TransportError> {
        self.check_outage()?;
        self.pushed
            .lock()
            .unwrap()
            .push(envelopes.iter().map(|e| e.event_id.clone()).collect());

        let mut report = PushReport::new();
        for envelope in envelopes {
            let answer = self
                .answers
                .lock()
                .unwrap()
                .get(&envelope.event_id)
                .cloned()
                .unwrap_or(Answer::Accept);
            match answer {
                Answer::Accept => {
                    self.log.publish(envelope.clone());
                    report.accept(envelope.event_id.clone());
                }
                Answer::Reject(category, code) => {
                    report.reject(envelope.event_id.clone(), category, code)
                }
                Answer::Silent => {}
            }
        }
        Ok(report)
    }

    async fn pull(&self, cursor: Option<&str>, limit: usize) -> Result<PullBatch, TransportError> {
        self.check_outage()?;
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let items = self
            .log
            .envelopes
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(idx, envelope)| InboundEnvelope {
                envelope: envelope.clone(),
                position: (idx + 1).to_string(),
                signer: None,
            })
            .collect();
        Ok(PullBatch {
            items,
            next_cursor: None,
            ceiling: None,
        })
    }
}

/// A device: store, clock, signed author and orchestrator.
pub struct Replica {
    pub store: Arc<dyn SyncStore>,
    pub clock: Arc<ManualClock>,
    pub merge: Arc<MergeEngine>,
    pub author: Arc<LocalAuthor>,
    pub orchestrator: SyncOrchestrator,
}

impl Replica {
    /// Memory-backed replica that pulls on every tick.
    pub fn new(device_id: &str, transports: Vec<Arc<ScriptedTransport>>) -> Self {
        Self::with_store(device_id, Arc::new(MemoryStore::new()), transports)
    }

    pub fn with_store(
        device_id: &str,
        store: Arc<dyn SyncStore>,
        transports: Vec<Arc<ScriptedTransport>>,
    ) -> Self {
        logging::try_init_for_tests();

        let clock = Arc::new(ManualClock::new(T0));
        let lamport = Arc::new(LamportClock::default());
        let merge = Arc::new(MergeEngine::new(store.clone()).with_lamport(lamport.clone()));
        let factory = EnvelopeFactory::new(
            Some(Arc::new(SchnorrIdentity::generate())),
            device_id,
            lamport,
            clock.clone(),
        );
        let kinds = transports.iter().map(|t| t.kind()).collect();
        let author = Arc::new(LocalAuthor::new(factory, merge.clone(), store.clone(), kinds));

        let config = SyncConfig {
            pull_every_n_ticks: 1,
            ..SyncConfig::default()
        };
        let mut orchestrator = SyncOrchestrator::new(store.clone(), merge.clone(), clock.clone(), config);
        for transport in transports {
            orchestrator = orchestrator.with_transport(transport);
        }

        Self {
            store,
            clock,
            merge,
            author,
            orchestrator,
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.orchestrator.tick().await.unwrap()
    }
}
