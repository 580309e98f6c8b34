//! Sync orchestrator: the periodic push/pull tick.
//!
//! A tick runs the publication gate, pushes due outbox lanes to every
//! transport, pulls on every Nth tick and prunes delivered rows. Ticks never
//! overlap; a tick requested while another runs is reported as skipped.

use crate::dedup::{dedup_due, DedupOutcome};
use crate::error::Result;
use crate::merge::MergeEngine;
use crate::publication::PublicationGate;
use crate::transport::{SyncTransport, Verdict};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use waymark_core::{Clock, SyncConfig};
use waymark_domain::{validate, Envelope, Origin, Transport, ValidationContext};
use waymark_store::{cursor_is_ahead, SyncStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Publishing,
    Pushing,
    Pulling(Transport),
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Another tick was already running
    pub skipped: bool,
    pub published: usize,
    pub superseded: usize,
    pub locally_failed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub pulled: usize,
    pub applied: usize,
    pub rejected_inbound: usize,
    pub pruned: usize,
    /// Set when the publication gate failed; push and pull still ran
    pub publication_error: Option<String>,
}

/// Clears the syncing flag when a tick ends, however it ends.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
    phase: &'a Mutex<SyncPhase>,
}

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool, phase: &'a Mutex<SyncPhase>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, phase })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = SyncPhase::Idle;
        }
        self.flag.store(false, Ordering::Release);
    }
}

fn origin_of(transport: Transport) -> Origin {
    match transport {
        Transport::Relay => Origin::Relay,
        Transport::Hub => Origin::Hub,
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    merge: Arc<MergeEngine>,
    transports: Vec<Arc<dyn SyncTransport>>,
    publication: Option<Arc<PublicationGate>>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    is_syncing: AtomicBool,
    tick_count: AtomicU64,
    phase: Mutex<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        merge: Arc<MergeEngine>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            merge,
            transports: Vec::new(),
            publication: None,
            clock,
            config,
            is_syncing: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Register a transport. Relay runs before hub regardless of order here.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transports.push(transport);
        self.transports.sort_by_key(|t| t.kind());
        self
    }

    pub fn with_publication(mut self, gate: Arc<PublicationGate>) -> Self {
        self.publication = Some(gate);
        self
    }

    pub fn transports(&self) -> Vec<Transport> {
        self.transports.iter().map(|t| t.kind()).collect()
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or(SyncPhase::Idle)
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Run one sync tick.
    pub async fn tick(&self) -> Result<TickReport> {
        let Some(_guard) = SyncGuard::acquire(&self.is_syncing, &self.phase) else {
            debug!("Sync tick skipped, previous tick still running");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        if let Some(gate) = &self.publication {
            self.set_phase(SyncPhase::Publishing);
            match gate.process_pending() {
                Ok(outcomes) => {
                    report.published = outcomes.iter().filter(|o| o.accepted).count();
                }
                Err(e) => {
                    error!(error = %e, "Publication gate failed, continuing with push and pull");
                    report.publication_error = Some(e.to_string());
                }
            }
        }

        self.push(&mut report).await?;

        if (tick - 1) % self.config.pull_every_n_ticks.max(1) == 0 {
            self.pull(&mut report).await;
        }

        let cutoff = self.clock.now_secs() - self.config.delivered_retention_secs;
        report.pruned = self.store.prune_delivered(cutoff)?;

        info!(
            tick = report.tick,
            published = report.published,
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed + report.locally_failed,
            superseded = report.superseded,
            pulled = report.pulled,
            applied = report.applied,
            rejected_inbound = report.rejected_inbound,
            pruned = report.pruned,
            publication_failed = report.publication_error.is_some(),
            "Sync tick complete"
        );
        Ok(report)
    }

    async fn push(&self, report: &mut TickReport) -> Result<()> {
        let now = self.clock.now_secs();
        let due = self.store.load_due(self.config.push_batch_limit, now)?;
        if due.is_empty() {
            return Ok(());
        }

        let DedupOutcome {
            survivors,
            superseded,
        } = dedup_due(due);
        for event_id in &superseded {
            self.store.discard(event_id)?;
        }
        report.superseded = superseded.len();

        let local = ValidationContext::local(now);
        let mut ready = Vec::with_capacity(survivors.len());
        for row in survivors {
            match validate(&row.envelope, &local) {
                Ok(_) => ready.push(row),
                Err(failure) => {
                    let code = format!("local-validation-{}", failure.tag());
                    warn!(
                        event_id = %row.event_id,
                        entity_id = %row.envelope.entity_id,
                        code = %code,
                        "Queued envelope failed local validation"
                    );
                    self.store.fail_all(&row.event_id, &code, now)?;
                    report.locally_failed += 1;
                }
            }
        }

        let submissions: Vec<(Arc<dyn SyncTransport>, Vec<Envelope>)> = self
            .transports
            .iter()
            .filter_map(|transport| {
                let envelopes: Vec<Envelope> = ready
                    .iter()
                    .filter(|row| row.is_due_for(transport.kind(), now))
                    .map(|row| row.envelope.clone())
                    .collect();
                (!envelopes.is_empty()).then(|| (transport.clone(), envelopes))
            })
            .collect();
        if submissions.is_empty() {
            return Ok(());
        }

        self.set_phase(SyncPhase::Pushing);
        let results = join_all(
            submissions
                .iter()
                .map(|(transport, envelopes)| transport.push(envelopes)),
        )
        .await;

        let now = self.clock.now_secs();
        for ((transport, envelopes), result) in submissions.iter().zip(results) {
            let kind = transport.kind();
            match result {
                Ok(push_report) => {
                    for envelope in envelopes {
                        let event_id = envelope.event_id.as_str();
                        match push_report.verdict(event_id) {
                            Some(Verdict::Accepted) => {
                                self.store.mark_delivered(event_id, kind, now)?;
                                report.delivered += 1;
                            }
                            Some(Verdict::Rejected { category, code })
                                if category.is_retryable() =>
                            {
                                self.store.mark_retry(event_id, kind, code, now)?;
                                report.retried += 1;
                            }
                            Some(Verdict::Rejected { code, .. }) => {
                                self.store.mark_failed(event_id, kind, code, now)?;
                                report.failed += 1;
                            }
                            None => {
                                self.store
                                    .mark_retry(event_id, kind, &transport.no_ack_code(), now)?;
                                report.retried += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    let code = e.code();
                    warn!(transport = %kind, code = %code, error = %e, count = envelopes.len(), "Push failed");
                    for envelope in envelopes {
                        self.store.mark_retry(&envelope.event_id, kind, &code, now)?;
                        report.retried += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn pull(&self, report: &mut TickReport) {
        for transport in &self.transports {
            let kind = transport.kind();
            self.set_phase(SyncPhase::Pulling(kind));
            if let Err(e) = self.pull_from(transport.as_ref(), report).await {
                warn!(transport = %kind, error = %e, "Pull failed, cursor kept");
            }
        }
    }

    /// Pull one batch and apply it. The cursor moves only after the whole
    /// batch has been applied, and never past the batch ceiling.
    async fn pull_from(&self, transport: &dyn SyncTransport, report: &mut TickReport) -> Result<()> {
        let kind = transport.kind();
        let cursor = self.store.get_cursor(kind.as_str())?;
        let batch = transport
            .pull(cursor.as_deref(), self.config.pull_limit)
            .await?;

        let now = self.clock.now_secs();
        let mut seen = HashSet::new();
        let mut furthest: Option<String> = None;
        for item in batch.items {
            if cursor_is_ahead(furthest.as_deref(), &item.position) {
                furthest = Some(item.position.clone());
            }
            if !seen.insert(item.envelope.event_id.clone()) {
                continue;
            }
            report.pulled += 1;

            let ctx = ValidationContext::inbound(origin_of(kind), item.signer, now);
            let outcome = self.merge.apply(&item.envelope, &ctx)?;
            if outcome.applied {
                report.applied += 1;
            } else {
                report.rejected_inbound += 1;
                warn!(
                    transport = %kind,
                    event_id = %item.envelope.event_id,
                    entity_id = %item.envelope.entity_id,
                    reason = outcome.reason.as_deref().unwrap_or("unknown"),
                    "Inbound envelope rejected"
                );
            }
        }

        if let Some(next) = batch.next_cursor {
            if cursor_is_ahead(furthest.as_deref(), &next) {
                furthest = Some(next);
            }
        }
        if let Some(ceiling) = batch.ceiling {
            let past = furthest
                .as_deref()
                .is_some_and(|position| cursor_is_ahead(Some(&ceiling), position));
            if past {
                debug!(transport = %kind, ceiling = %ceiling, "Cursor held at ceiling");
                furthest = Some(ceiling);
            }
        }
        if let Some(position) = furthest {
            if self.store.advance_cursor(kind.as_str(), &position)? {
                debug!(transport = %kind, cursor = %position, "Cursor advanced");
            }
        }
        Ok(())
    }

    /// Drive ticks until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.tick_interval_secs,
            transports = ?self.transports(),
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Sync tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Sync loop stopped");
    }
}
