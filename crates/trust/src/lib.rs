//! Trust and contribution-quality scoring.
//!
//! - [`trust`]: 0-100 trust score and 0-3 source tier for routes and
//!   services, derived from authenticated endorsements and reports
//! - [`quality`]: flag-based gate deciding whether a personal entity may be
//!   published network-wide

pub mod quality;
pub mod trust;

pub use quality::{QualityAssessment, QualityEvaluator, QualityFlag, QualityInput};
pub use trust::{source_tier, TrustComputationConfig, TrustParams, TrustScore, TrustScorer};
