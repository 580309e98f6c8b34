//! Contribution quality gate for personal-to-network publication.
//!
//! Starts at 100 and deducts a fixed weight per triggered flag. An entity
//! is accepted only when no flag fires; the score is informational.

use std::collections::HashSet;
use std::fmt;
use waymark_core::QualityConfig;
use waymark_domain::{CoordinateError, Coordinates, EntityRecord, PhotoMeta};

/// A reason a contribution was held back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityFlag {
    MissingField(String),
    CoordinatesOutOfBounds,
    PossibleDuplicate(String),
    TooManyPhotos,
    PhotoResolutionLow,
    PhotoTooLarge,
    PhotoDuplicateHash,
    LowAuthorTrust,
    RateLimited,
}

impl QualityFlag {
    /// Machine-readable code surfaced to the author.
    pub fn code(&self) -> String {
        match self {
            QualityFlag::MissingField(field) => format!("missing_field:{field}"),
            QualityFlag::CoordinatesOutOfBounds => "coordinates_out_of_bounds".to_string(),
            QualityFlag::PossibleDuplicate(entity_id) => format!("possible_duplicate:{entity_id}"),
            QualityFlag::TooManyPhotos => "too_many_photos".to_string(),
            QualityFlag::PhotoResolutionLow => "photo_resolution_low".to_string(),
            QualityFlag::PhotoTooLarge => "photo_too_large".to_string(),
            QualityFlag::PhotoDuplicateHash => "photo_duplicate_hash".to_string(),
            QualityFlag::LowAuthorTrust => "low_author_trust".to_string(),
            QualityFlag::RateLimited => "rate_limited".to_string(),
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            QualityFlag::MissingField(_) => 20,
            QualityFlag::CoordinatesOutOfBounds => 40,
            QualityFlag::PossibleDuplicate(_) => 35,
            QualityFlag::TooManyPhotos => 10,
            QualityFlag::PhotoResolutionLow => 10,
            QualityFlag::PhotoTooLarge => 10,
            QualityFlag::PhotoDuplicateHash => 15,
            QualityFlag::LowAuthorTrust => 25,
            QualityFlag::RateLimited => 50,
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Everything the gate looks at for one candidate.
#[derive(Debug, Clone)]
pub struct QualityInput<'a> {
    pub record: &'a EntityRecord,
    pub photos: &'a [PhotoMeta],
    /// Average trust of the author's existing entities
    pub author_trust: u8,
    /// Queue entries by this author in the last 24 hours, this one excluded
    pub recent_submissions: usize,
    /// Other entities of the same kind to check for duplicates
    pub neighbors: &'a [EntityRecord],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityAssessment {
    pub score: u32,
    pub flags: Vec<QualityFlag>,
}

impl QualityAssessment {
    pub fn accepted(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn reason_codes(&self) -> Vec<String> {
        self.flags.iter().map(QualityFlag::code).collect()
    }
}

pub struct QualityEvaluator {
    config: QualityConfig,
}

impl QualityEvaluator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, input: &QualityInput<'_>) -> QualityAssessment {
        let mut flags = Vec::new();
        let record = input.record;

        for field in record.kind.create_event().required_fields() {
            let present = record
                .fields
                .get(*field)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                flags.push(QualityFlag::MissingField(field.to_string()));
            }
        }

        let coordinates = match Coordinates::from_payload(&record.fields) {
            Ok(coordinates) => coordinates,
            Err(CoordinateError::Malformed | CoordinateError::OutOfRange) => {
                flags.push(QualityFlag::CoordinatesOutOfBounds);
                None
            }
            // A lone lat or lon already shows up as a missing field.
            Err(CoordinateError::Missing) => None,
        };

        if let Some(duplicate) = self.find_duplicate(record, coordinates, input.neighbors) {
            flags.push(QualityFlag::PossibleDuplicate(duplicate));
        }

        flags.extend(self.photo_flags(input.photos));

        if input.author_trust < self.config.min_author_trust {
            flags.push(QualityFlag::LowAuthorTrust);
        }
        if input.recent_submissions >= self.config.rate_limit_per_day {
            flags.push(QualityFlag::RateLimited);
        }

        let deductions: u32 = flags.iter().map(QualityFlag::weight).sum();
        QualityAssessment {
            score: 100u32.saturating_sub(deductions),
            flags,
        }
    }

    fn find_duplicate(
        &self,
        record: &EntityRecord,
        coordinates: Option<Coordinates>,
        neighbors: &[EntityRecord],
    ) -> Option<String> {
        let coordinates = coordinates?;
        let name = normalize(record.name()?);
        let category = record.fields.get("category").map(|c| normalize(c));

        neighbors
            .iter()
            .filter(|other| {
                other.entity_id != record.entity_id && other.kind == record.kind && !other.retracted
            })
            .filter(|other| other.name().map(normalize).as_deref() == Some(name.as_str()))
            .filter(|other| {
                match (&category, other.fields.get("category").map(|c| normalize(c))) {
                    (Some(mine), Some(theirs)) => *mine == theirs,
                    _ => true,
                }
            })
            .find(|other| {
                other
                    .coordinates()
                    .map(|c| c.distance_m(&coordinates) <= self.config.duplicate_radius_m)
                    .unwrap_or(false)
            })
            .map(|other| other.entity_id.clone())
    }

    fn photo_flags(&self, photos: &[PhotoMeta]) -> Vec<QualityFlag> {
        let mut flags = Vec::new();
        if photos.len() > self.config.max_photos {
            flags.push(QualityFlag::TooManyPhotos);
        }
        if photos
            .iter()
            .any(|p| p.width.min(p.height) < self.config.min_photo_edge_px)
        {
            flags.push(QualityFlag::PhotoResolutionLow);
        }
        if photos.iter().any(|p| p.bytes > self.config.max_photo_bytes) {
            flags.push(QualityFlag::PhotoTooLarge);
        }
        let mut seen = HashSet::new();
        if photos
            .iter()
            .any(|p| !seen.insert(p.sha256.to_ascii_lowercase()))
        {
            flags.push(QualityFlag::PhotoDuplicateHash);
        }
        flags
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
