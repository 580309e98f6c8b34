//! Trust Scoring Module
//!
//! Computes trust scores for routes and services from the endorsement and
//! report side tables. Only authenticated entries count; placeholder-signed
//! ones are stored by the merge engine but never reach the formula.

use serde::{Deserialize, Serialize};
use waymark_domain::{Endorsement, EntityKind, EntityRecord, Report};

const SECS_PER_DAY: i64 = 86_400;

/// Per-kind constants of the trust formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustParams {
    /// Penalty per report
    pub report_weight: f64,
    /// Days without an update before the recency penalty starts
    pub grace_days: i64,
}

/// Trust computation constants
#[derive(Debug, Clone)]
pub struct TrustComputationConfig {
    /// Cap on the endorsement bonus
    pub max_endorsement_bonus: f64,
    /// Multiplier for the average endorsement score (1..=5)
    pub avg_score_multiplier: f64,
    /// Bonus per endorsement
    pub per_endorsement_bonus: f64,
    /// Cap on the report penalty
    pub max_report_penalty: f64,
    /// Cap on the recency penalty
    pub max_recency_penalty: f64,

    pub route: TrustParams,
    pub service: TrustParams,
}

impl Default for TrustComputationConfig {
    fn default() -> Self {
        Self {
            max_endorsement_bonus: 35.0,
            avg_score_multiplier: 4.0,
            per_endorsement_bonus: 3.0,
            max_report_penalty: 45.0,
            max_recency_penalty: 25.0,
            route: TrustParams {
                report_weight: 9.0,
                grace_days: 30,
            },
            service: TrustParams {
                report_weight: 8.0,
                grace_days: 45,
            },
        }
    }
}

impl TrustComputationConfig {
    fn params(&self, kind: EntityKind) -> Option<TrustParams> {
        match kind {
            EntityKind::Route => Some(self.route),
            EntityKind::Service => Some(self.service),
            EntityKind::Pin
            | EntityKind::Business
            | EntityKind::Bulletin
            | EntityKind::Promise => None,
        }
    }
}

/// Trust score for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScore {
    pub entity_id: String,
    /// 0..=100
    pub score: u8,
    /// 0..=3
    pub tier: u8,
    pub endorsement_count: usize,
    pub report_count: usize,
}

/// Source tier: any report drops to 0, otherwise thresholds on endorsements.
pub fn source_tier(endorsement_count: usize, report_count: usize) -> u8 {
    if report_count > 0 {
        return 0;
    }
    match endorsement_count {
        n if n >= 10 => 3,
        n if n >= 5 => 2,
        n if n >= 2 => 1,
        _ => 0,
    }
}

/// Trust scorer
#[derive(Debug, Clone, Default)]
pub struct TrustScorer {
    computation_config: TrustComputationConfig,
}

impl TrustScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(computation_config: TrustComputationConfig) -> Self {
        Self { computation_config }
    }

    /// Compute the trust score of a route or service.
    ///
    /// Returns `None` for kinds that carry no trust score. The result never
    /// drops below the record's stored base score.
    pub fn compute(
        &self,
        record: &EntityRecord,
        endorsements: &[Endorsement],
        reports: &[Report],
        now: i64,
    ) -> Option<TrustScore> {
        let cfg = &self.computation_config;
        let params = cfg.params(record.kind)?;

        let scored: Vec<&Endorsement> = endorsements.iter().filter(|e| e.authenticated).collect();
        let report_count = reports.iter().filter(|r| r.authenticated).count();
        let endorsement_count = scored.len();

        let endorsement_bonus = if endorsement_count == 0 {
            0.0
        } else {
            let avg = scored.iter().map(|e| f64::from(e.score)).sum::<f64>()
                / endorsement_count as f64;
            (avg * cfg.avg_score_multiplier + endorsement_count as f64 * cfg.per_endorsement_bonus)
                .min(cfg.max_endorsement_bonus)
        };
        let report_penalty =
            (report_count as f64 * params.report_weight).min(cfg.max_report_penalty);

        let age_days = (now - record.updated_at).max(0) / SECS_PER_DAY;
        let recency_penalty = ((age_days - params.grace_days).max(0) as f64).min(cfg.max_recency_penalty);

        let base = f64::from(record.base_score);
        let raw = (base + endorsement_bonus - report_penalty - recency_penalty).clamp(0.0, 100.0);
        let score = (raw.round() as u8).max(record.base_score);

        Some(TrustScore {
            entity_id: record.entity_id.clone(),
            score,
            tier: source_tier(endorsement_count, report_count),
            endorsement_count,
            report_count,
        })
    }
}
