//! Replicated event types.
//!
//! The set is closed: every consumer matches on [`EventType`] exhaustively,
//! so adding a kind or action is a compile-time change everywhere it
//! matters (validation, merge, retry policy, transport routing).

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity an event targets. Doubles as the entity id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pin,
    Business,
    Bulletin,
    Route,
    Service,
    Promise,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Pin,
        EntityKind::Business,
        EntityKind::Bulletin,
        EntityKind::Route,
        EntityKind::Service,
        EntityKind::Promise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Pin => "pin",
            EntityKind::Business => "business",
            EntityKind::Bulletin => "bulletin",
            EntityKind::Route => "route",
            EntityKind::Service => "service",
            EntityKind::Promise => "promise",
        }
    }

    /// Kind encoded in an `"<kind>:<uuid>"` entity id, if well-formed.
    pub fn from_entity_id(entity_id: &str) -> Option<Self> {
        let (prefix, rest) = entity_id.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        prefix.parse().ok()
    }

    /// Entities that must carry valid coordinates.
    pub fn is_place_bound(&self) -> bool {
        matches!(self, EntityKind::Pin | EntityKind::Business)
    }

    /// Entities with a computed trust score.
    pub fn is_scored(&self) -> bool {
        matches!(self, EntityKind::Route | EntityKind::Service)
    }

    /// Event type that publishes an entity of this kind to the network.
    pub fn create_event(&self) -> EventType {
        match self {
            EntityKind::Pin => EventType::PinCreate,
            EntityKind::Business => EventType::BusinessCreate,
            EntityKind::Bulletin => EventType::BulletinCreate,
            EntityKind::Route => EventType::RouteCreate,
            EntityKind::Service => EventType::ServiceCreate,
            EntityKind::Promise => EventType::PromiseIssue,
        }
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| DomainError::UnknownEntityKind(value.to_string()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Retract,
    Endorse,
    Report,
    Issue,
    Settle,
}

/// Replicated event type, wire form `"<kind>.<action>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "pin.create")]
    PinCreate,
    #[serde(rename = "pin.update")]
    PinUpdate,
    #[serde(rename = "pin.retract")]
    PinRetract,
    #[serde(rename = "business.create")]
    BusinessCreate,
    #[serde(rename = "business.update")]
    BusinessUpdate,
    #[serde(rename = "business.retract")]
    BusinessRetract,
    #[serde(rename = "bulletin.create")]
    BulletinCreate,
    #[serde(rename = "bulletin.update")]
    BulletinUpdate,
    #[serde(rename = "bulletin.retract")]
    BulletinRetract,
    #[serde(rename = "route.create")]
    RouteCreate,
    #[serde(rename = "route.update")]
    RouteUpdate,
    #[serde(rename = "route.retract")]
    RouteRetract,
    #[serde(rename = "route.endorse")]
    RouteEndorse,
    #[serde(rename = "route.report")]
    RouteReport,
    #[serde(rename = "service.create")]
    ServiceCreate,
    #[serde(rename = "service.update")]
    ServiceUpdate,
    #[serde(rename = "service.retract")]
    ServiceRetract,
    #[serde(rename = "service.endorse")]
    ServiceEndorse,
    #[serde(rename = "service.report")]
    ServiceReport,
    #[serde(rename = "promise.issue")]
    PromiseIssue,
    #[serde(rename = "promise.settle")]
    PromiseSettle,
}

impl EventType {
    pub const ALL: [EventType; 21] = [
        EventType::PinCreate,
        EventType::PinUpdate,
        EventType::PinRetract,
        EventType::BusinessCreate,
        EventType::BusinessUpdate,
        EventType::BusinessRetract,
        EventType::BulletinCreate,
        EventType::BulletinUpdate,
        EventType::BulletinRetract,
        EventType::RouteCreate,
        EventType::RouteUpdate,
        EventType::RouteRetract,
        EventType::RouteEndorse,
        EventType::RouteReport,
        EventType::ServiceCreate,
        EventType::ServiceUpdate,
        EventType::ServiceRetract,
        EventType::ServiceEndorse,
        EventType::ServiceReport,
        EventType::PromiseIssue,
        EventType::PromiseSettle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PinCreate => "pin.create",
            EventType::PinUpdate => "pin.update",
            EventType::PinRetract => "pin.retract",
            EventType::BusinessCreate => "business.create",
            EventType::BusinessUpdate => "business.update",
            EventType::BusinessRetract => "business.retract",
            EventType::BulletinCreate => "bulletin.create",
            EventType::BulletinUpdate => "bulletin.update",
            EventType::BulletinRetract => "bulletin.retract",
            EventType::RouteCreate => "route.create",
            EventType::RouteUpdate => "route.update",
            EventType::RouteRetract => "route.retract",
            EventType::RouteEndorse => "route.endorse",
            EventType::RouteReport => "route.report",
            EventType::ServiceCreate => "service.create",
            EventType::ServiceUpdate => "service.update",
            EventType::ServiceRetract => "service.retract",
            EventType::ServiceEndorse => "service.endorse",
            EventType::ServiceReport => "service.report",
            EventType::PromiseIssue => "promise.issue",
            EventType::PromiseSettle => "promise.settle",
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EventType::PinCreate | EventType::PinUpdate | EventType::PinRetract => EntityKind::Pin,
            EventType::BusinessCreate | EventType::BusinessUpdate | EventType::BusinessRetract => {
                EntityKind::Business
            }
            EventType::BulletinCreate | EventType::BulletinUpdate | EventType::BulletinRetract => {
                EntityKind::Bulletin
            }
            EventType::RouteCreate
            | EventType::RouteUpdate
            | EventType::RouteRetract
            | EventType::RouteEndorse
            | EventType::RouteReport => EntityKind::Route,
            EventType::ServiceCreate
            | EventType::ServiceUpdate
            | EventType::ServiceRetract
            | EventType::ServiceEndorse
            | EventType::ServiceReport => EntityKind::Service,
            EventType::PromiseIssue | EventType::PromiseSettle => EntityKind::Promise,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            EventType::PinCreate
            | EventType::BusinessCreate
            | EventType::BulletinCreate
            | EventType::RouteCreate
            | EventType::ServiceCreate => Action::Create,
            EventType::PinUpdate
            | EventType::BusinessUpdate
            | EventType::BulletinUpdate
            | EventType::RouteUpdate
            | EventType::ServiceUpdate => Action::Update,
            EventType::PinRetract
            | EventType::BusinessRetract
            | EventType::BulletinRetract
            | EventType::RouteRetract
            | EventType::ServiceRetract => Action::Retract,
            EventType::RouteEndorse | EventType::ServiceEndorse => Action::Endorse,
            EventType::RouteReport | EventType::ServiceReport => Action::Report,
            EventType::PromiseIssue => Action::Issue,
            EventType::PromiseSettle => Action::Settle,
        }
    }

    /// create / update / retract
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.action(),
            Action::Create | Action::Update | Action::Retract
        )
    }

    /// endorse / report: one live entry per (entity, actor)
    pub fn is_actor_scoped(&self) -> bool {
        matches!(self.action(), Action::Endorse | Action::Report)
    }

    /// Route and service lifecycle events get the slow retry policy.
    pub fn is_trust_sensitive(&self) -> bool {
        self.kind().is_scored() && self.is_lifecycle()
    }

    /// Whether the event may travel over the public relay network.
    pub fn is_broadcast(&self) -> bool {
        self.kind() != EntityKind::Promise
    }

    /// Only promise events carry an expiry.
    pub fn allows_expiry(&self) -> bool {
        self.kind() == EntityKind::Promise
    }

    /// Payload fields that must be present and non-blank.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EventType::PinCreate | EventType::PinUpdate => &["name", "lat", "lon"],
            EventType::BusinessCreate | EventType::BusinessUpdate => {
                &["name", "category", "lat", "lon"]
            }
            EventType::BulletinCreate | EventType::BulletinUpdate => &["title", "body"],
            EventType::RouteCreate
            | EventType::RouteUpdate
            | EventType::ServiceCreate
            | EventType::ServiceUpdate => &["name"],
            EventType::RouteEndorse | EventType::ServiceEndorse => &["score"],
            EventType::RouteReport | EventType::ServiceReport => &["reason"],
            EventType::PromiseIssue => &["amount", "currency", "payee"],
            EventType::PinRetract
            | EventType::BusinessRetract
            | EventType::BulletinRetract
            | EventType::RouteRetract
            | EventType::ServiceRetract
            | EventType::PromiseSettle => &[],
        }
    }
}

impl FromStr for EventType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == value)
            .ok_or_else(|| DomainError::UnknownEventType(value.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
