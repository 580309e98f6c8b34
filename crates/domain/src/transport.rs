//! Transport identifiers.

use crate::event_type::EventType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two interchangeable delivery paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Gossip relay network reached by topic and geohash
    Relay,
    /// Optional centralized aggregator
    Hub,
}

impl Transport {
    /// Push order within a tick.
    pub const ALL: [Transport; 2] = [Transport::Relay, Transport::Hub];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Relay => "relay",
            Transport::Hub => "hub",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "relay" => Some(Transport::Relay),
            "hub" => Some(Transport::Hub),
            _ => None,
        }
    }

    /// Whether this transport is allowed to carry the event type.
    pub fn carries(&self, event_type: EventType) -> bool {
        match self {
            Transport::Relay => event_type.is_broadcast(),
            Transport::Hub => true,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_never_carries_promises() {
        assert!(!Transport::Relay.carries(EventType::PromiseIssue));
        assert!(Transport::Hub.carries(EventType::PromiseIssue));
        assert!(Transport::Relay.carries(EventType::PinUpdate));
    }

    #[test]
    fn test_parse_round_trip() {
        for transport in Transport::ALL {
            assert_eq!(Transport::parse(transport.as_str()), Some(transport));
        }
        assert_eq!(Transport::parse("mesh"), None);
    }
}
