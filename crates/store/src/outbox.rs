//! Outbox rows, per-transport retry lanes and the retry policy.
//!
//! Each row carries one lane per transport that will deliver it. Lanes move
//! independently (`pending -> retry -> failed`, or `-> delivered`); the
//! row-level status, attempt count and next retry time are always derived
//! from the lanes by [`OutboxRow::refresh`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use waymark_domain::{Envelope, EventType, Transport};

/// Error code recorded on rows that no enabled transport may carry.
pub const NO_ELIGIBLE_TRANSPORT: &str = "no-eligible-transport";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Retry,
    Failed,
    Delivered,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Retry => "retry",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OutboxStatus::Pending),
            "retry" => Some(OutboxStatus::Retry),
            "failed" => Some(OutboxStatus::Failed),
            "delivered" => Some(OutboxStatus::Delivered),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Failed | OutboxStatus::Delivered)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt ceiling and exponential backoff for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ceiling: u32,
    pub base_secs: i64,
    pub cap_secs: i64,
}

impl RetryPolicy {
    /// Trust-sensitive lifecycle events back off hard and give up early.
    pub const TRUST_SENSITIVE: RetryPolicy = RetryPolicy {
        ceiling: 4,
        base_secs: 20,
        cap_secs: 600,
    };

    pub const STANDARD: RetryPolicy = RetryPolicy {
        ceiling: 10,
        base_secs: 1,
        cap_secs: 300,
    };

    pub fn for_event(event_type: EventType) -> Self {
        if event_type.is_trust_sensitive() {
            Self::TRUST_SENSITIVE
        } else {
            Self::STANDARD
        }
    }

    /// `base × 2^attempts`, capped. `attempts` counts failures before this one.
    pub fn delay_secs(&self, attempts: u32) -> i64 {
        let factor = 1i64.checked_shl(attempts.min(62)).unwrap_or(i64::MAX);
        self.base_secs.saturating_mul(factor).min(self.cap_secs)
    }
}

/// Outcome of one delivery attempt on one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Delivered,
    Retry { code: String },
    Failed { code: String },
}

/// Retry state of one row on one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub transport: Transport,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl Lane {
    pub fn new(transport: Transport, now: i64) -> Self {
        Self {
            transport,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        !self.status.is_terminal() && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Terminal lanes never move again.
    fn apply(&mut self, transition: &Transition, policy: RetryPolicy, now: i64) {
        if self.status.is_terminal() {
            return;
        }
        match transition {
            Transition::Delivered => {
                self.status = OutboxStatus::Delivered;
                self.next_retry_at = None;
            }
            Transition::Retry { code } => {
                let delay = policy.delay_secs(self.attempts);
                self.attempts = self.attempts.saturating_add(1);
                if self.attempts >= policy.ceiling {
                    self.status = OutboxStatus::Failed;
                    self.next_retry_at = None;
                } else {
                    self.status = OutboxStatus::Retry;
                    self.next_retry_at = Some(now + delay);
                }
                self.last_error = Some(code.clone());
            }
            Transition::Failed { code } => {
                self.attempts = self.attempts.saturating_add(1);
                self.status = OutboxStatus::Failed;
                self.next_retry_at = None;
                self.last_error = Some(code.clone());
            }
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub event_id: String,
    pub envelope: Envelope,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub lanes: Vec<Lane>,
}

impl OutboxRow {
    /// New row with a lane for every transport that may carry the event.
    ///
    /// With no eligible transport the row starts out `failed`.
    pub fn new(envelope: Envelope, transports: &[Transport], now: i64) -> Self {
        let mut lanes: Vec<Lane> = transports
            .iter()
            .filter(|t| t.carries(envelope.event_type))
            .map(|t| Lane::new(*t, now))
            .collect();
        lanes.sort_by_key(|lane| lane.transport);
        lanes.dedup_by_key(|lane| lane.transport);

        let mut row = Self {
            event_id: envelope.event_id.clone(),
            envelope,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            lanes,
        };
        row.refresh(now);
        row
    }

    pub fn lane(&self, transport: Transport) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.transport == transport)
    }

    pub fn is_due_for(&self, transport: Transport, now: i64) -> bool {
        self.lane(transport).map_or(false, |lane| lane.is_due(now))
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.lanes.iter().any(|lane| lane.is_due(now))
    }

    /// Apply a transition to one lane. Returns false when the row has no
    /// lane for that transport.
    pub fn apply(&mut self, transport: Transport, transition: &Transition, now: i64) -> bool {
        let policy = RetryPolicy::for_event(self.envelope.event_type);
        let Some(lane) = self.lanes.iter_mut().find(|l| l.transport == transport) else {
            return false;
        };
        lane.apply(transition, policy, now);
        self.refresh(now);
        true
    }

    /// Terminally fail every open lane without counting an attempt.
    pub fn fail_all(&mut self, code: &str, now: i64) {
        for lane in self.lanes.iter_mut().filter(|l| !l.status.is_terminal()) {
            lane.status = OutboxStatus::Failed;
            lane.next_retry_at = None;
            lane.last_error = Some(code.to_string());
            lane.updated_at = now;
        }
        if self.lanes.is_empty() {
            self.last_error = Some(code.to_string());
        }
        self.refresh(now);
    }

    /// Re-derive the row-level fields from the lanes.
    pub fn refresh(&mut self, now: i64) {
        self.updated_at = now;

        if self.lanes.is_empty() {
            self.status = OutboxStatus::Failed;
            self.next_retry_at = None;
            if self.last_error.is_none() {
                self.last_error = Some(NO_ELIGIBLE_TRANSPORT.to_string());
            }
            return;
        }

        let all_terminal = self.lanes.iter().all(|l| l.status.is_terminal());
        let any_delivered = self
            .lanes
            .iter()
            .any(|l| l.status == OutboxStatus::Delivered);
        let any_attempted = self.lanes.iter().any(|l| l.attempts > 0);

        self.status = match (all_terminal, any_delivered) {
            (true, true) => OutboxStatus::Delivered,
            (true, false) => OutboxStatus::Failed,
            (false, _) if any_attempted => OutboxStatus::Retry,
            (false, _) => OutboxStatus::Pending,
        };

        self.attempts = self.lanes.iter().map(|l| l.attempts).max().unwrap_or(0);

        let open: Vec<&Lane> = self
            .lanes
            .iter()
            .filter(|l| !l.status.is_terminal())
            .collect();
        self.next_retry_at = if open.iter().any(|l| l.next_retry_at.is_none()) {
            None
        } else {
            open.iter().filter_map(|l| l.next_retry_at).min()
        };

        if let Some(lane) = self
            .lanes
            .iter()
            .filter(|l| l.last_error.is_some())
            .max_by_key(|l| l.updated_at)
        {
            self.last_error = lane.last_error.clone();
        }
    }
}

/// Durable queue of locally authored envelopes awaiting delivery.
pub trait OutboxStore: Send + Sync {
    /// Insert a row. Returns false if the event id is already queued.
    fn enqueue(&self, envelope: &Envelope, transports: &[Transport], now: i64) -> Result<bool>;

    /// Rows with at least one due lane, oldest first.
    fn load_due(&self, limit: usize, now: i64) -> Result<Vec<OutboxRow>>;

    fn get(&self, event_id: &str) -> Result<Option<OutboxRow>>;

    /// Apply a lane transition and return the derived row status.
    fn transition(
        &self,
        event_id: &str,
        transport: Transport,
        transition: Transition,
        now: i64,
    ) -> Result<OutboxStatus>;

    fn mark_delivered(&self, event_id: &str, transport: Transport, now: i64) -> Result<OutboxStatus> {
        self.transition(event_id, transport, Transition::Delivered, now)
    }

    fn mark_retry(
        &self,
        event_id: &str,
        transport: Transport,
        code: &str,
        now: i64,
    ) -> Result<OutboxStatus> {
        self.transition(
            event_id,
            transport,
            Transition::Retry {
                code: code.to_string(),
            },
            now,
        )
    }

    fn mark_failed(
        &self,
        event_id: &str,
        transport: Transport,
        code: &str,
        now: i64,
    ) -> Result<OutboxStatus> {
        self.transition(
            event_id,
            transport,
            Transition::Failed {
                code: code.to_string(),
            },
            now,
        )
    }

    /// Terminally fail every open lane (local validation failure).
    fn fail_all(&self, event_id: &str, code: &str, now: i64) -> Result<()>;

    /// Remove a row outright (superseded by dedup).
    fn discard(&self, event_id: &str) -> Result<()>;

    /// Delete delivered rows last touched before `before`.
    fn prune_delivered(&self, before: i64) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waymark_core::ManualClock;
    use waymark_domain::{EnvelopeFactory, LamportClock, Payload};

    fn envelope(event_type: EventType, entity_id: &str) -> Envelope {
        let factory = EnvelopeFactory::new(
            None,
            "dev",
            Arc::new(LamportClock::default()),
            Arc::new(ManualClock::new(1_000)),
        );
        factory.build(event_type, entity_id, Payload::new())
    }

    fn retry(code: &str) -> Transition {
        Transition::Retry {
            code: code.to_string(),
        }
    }

    #[test]
    fn test_standard_backoff_sequence() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinUpdate, "pin:p"),
            &[Transport::Hub],
            0,
        );
        let mut now = 0;
        let mut delays = Vec::new();
        for _ in 0..9 {
            row.apply(Transport::Hub, &retry("hub-timeout"), now);
            let next = row.next_retry_at.unwrap();
            delays.push(next - now);
            now = next;
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128, 256]);
        assert_eq!(row.status, OutboxStatus::Retry);

        row.apply(Transport::Hub, &retry("hub-timeout"), now);
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.attempts, 10);
        assert_eq!(row.next_retry_at, None);
    }

    #[test]
    fn test_trust_sensitive_backoff_sequence() {
        let mut row = OutboxRow::new(
            envelope(EventType::RouteUpdate, "route:r"),
            &[Transport::Hub],
            0,
        );
        let mut delays = Vec::new();
        for _ in 0..3 {
            row.apply(Transport::Hub, &retry("hub-no-ack"), 0);
            delays.push(row.next_retry_at.unwrap());
        }
        assert_eq!(delays, vec![20, 40, 80]);

        row.apply(Transport::Hub, &retry("hub-no-ack"), 0);
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.last_error.as_deref(), Some("hub-no-ack"));
    }

    #[test]
    fn test_delay_caps_and_never_overflows() {
        assert_eq!(RetryPolicy::STANDARD.delay_secs(9), 300);
        assert_eq!(RetryPolicy::TRUST_SENSITIVE.delay_secs(5), 600);
        assert_eq!(RetryPolicy::STANDARD.delay_secs(u32::MAX), 300);
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinCreate, "pin:p"),
            &[Transport::Relay, Transport::Hub],
            0,
        );
        assert_eq!(row.status, OutboxStatus::Pending);

        row.apply(Transport::Relay, &Transition::Delivered, 5);
        assert_eq!(row.status, OutboxStatus::Pending);
        assert!(!row.is_due_for(Transport::Relay, 5));
        assert!(row.is_due_for(Transport::Hub, 5));

        row.apply(Transport::Hub, &retry("hub-http-503"), 6);
        assert_eq!(row.status, OutboxStatus::Retry);
        assert_eq!(row.next_retry_at, Some(7));

        row.apply(Transport::Hub, &Transition::Delivered, 7);
        assert_eq!(row.status, OutboxStatus::Delivered);
    }

    #[test]
    fn test_failed_only_when_no_lane_delivered() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinCreate, "pin:p"),
            &[Transport::Relay, Transport::Hub],
            0,
        );
        row.apply(
            Transport::Relay,
            &Transition::Failed {
                code: "nostr-policy_rejected:blocked".into(),
            },
            1,
        );
        assert_eq!(row.status, OutboxStatus::Retry);
        row.apply(
            Transport::Hub,
            &Transition::Failed {
                code: "hub-policy_rejected:spam".into(),
            },
            2,
        );
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.last_error.as_deref(), Some("hub-policy_rejected:spam"));
    }

    #[test]
    fn test_terminal_lane_is_sticky() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinCreate, "pin:p"),
            &[Transport::Hub],
            0,
        );
        row.apply(Transport::Hub, &Transition::Delivered, 1);
        row.apply(Transport::Hub, &retry("late"), 2);
        assert_eq!(row.status, OutboxStatus::Delivered);
        assert_eq!(row.attempts, 0);
    }

    #[test]
    fn test_promise_gets_no_relay_lane() {
        let row = OutboxRow::new(
            envelope(EventType::PromiseIssue, "promise:x"),
            &[Transport::Relay, Transport::Hub],
            0,
        );
        assert_eq!(row.lanes.len(), 1);
        assert_eq!(row.lanes[0].transport, Transport::Hub);

        let stranded = OutboxRow::new(
            envelope(EventType::PromiseIssue, "promise:y"),
            &[Transport::Relay],
            0,
        );
        assert_eq!(stranded.status, OutboxStatus::Failed);
        assert_eq!(stranded.last_error.as_deref(), Some(NO_ELIGIBLE_TRANSPORT));
        assert!(!stranded.is_due(0));
    }

    #[test]
    fn test_fail_all_does_not_count_attempt() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinCreate, "pin:p"),
            &[Transport::Relay, Transport::Hub],
            0,
        );
        row.fail_all("local-validation-policy_rejected:missing_field:name", 3);
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.attempts, 0);
        assert!(row.lanes.iter().all(|l| l.status == OutboxStatus::Failed));
    }

    #[test]
    fn test_unknown_lane_is_ignored() {
        let mut row = OutboxRow::new(
            envelope(EventType::PinCreate, "pin:p"),
            &[Transport::Hub],
            0,
        );
        assert!(!row.apply(Transport::Relay, &Transition::Delivered, 1));
        assert_eq!(row.status, OutboxStatus::Pending);
    }
}
