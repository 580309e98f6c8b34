//! Hub transport: batch push and cursor feed over HTTPS.

use super::{
    InboundEnvelope, PullBatch, PushReport, SyncTransport, TransportError, TransportErrorKind,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use waymark_core::HubConfig;
use waymark_domain::{Envelope, FailureCategory, Transport};

const BATCH_PATH: &str = "/chat/api/envelopes/batch";
const FEED_PATH: &str = "/chat/api/envelopes/feed";

#[derive(Serialize)]
struct BatchRequest<'a> {
    envelopes: &'a [Envelope],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AcceptedRef {
    Id(String),
    Entry { event_id: String },
}

impl AcceptedRef {
    fn event_id(self) -> String {
        match self {
            AcceptedRef::Id(id) => id,
            AcceptedRef::Entry { event_id } => event_id,
        }
    }
}

#[derive(Deserialize)]
struct RejectedEntry {
    event_id: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_category: Option<String>,
}

#[derive(Deserialize)]
struct BatchResponse {
    success: bool,
    #[serde(default)]
    accepted: Vec<AcceptedRef>,
    #[serde(default)]
    rejected: Vec<RejectedEntry>,
}

#[derive(Deserialize)]
struct FeedEvent {
    seq: serde_json::Value,
    envelope: serde_json::Value,
}

#[derive(Deserialize)]
struct FeedResponse {
    success: bool,
    #[serde(default)]
    next_cursor: Option<serde_json::Value>,
    #[serde(default)]
    events: Vec<FeedEvent>,
}

/// Numbers and strings become cursor strings; anything else is dropped.
fn position_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HubClient {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TransportError::new(Transport::Hub, TransportErrorKind::Network, e.to_string())
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn from_config(config: &HubConfig) -> Result<Self, TransportError> {
        Self::new(
            &config.base_url,
            config.auth_token.clone(),
            config.request_timeout(),
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = self.authorize(request).send().await.map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                Transport::Hub,
                TransportErrorKind::Http(status.as_u16()),
                format!("hub answered {status}"),
            ));
        }
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                map_reqwest(e)
            } else {
                TransportError::new(Transport::Hub, TransportErrorKind::BadResponse, e.to_string())
            }
        })
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if let Some(status) = err.status() {
        TransportErrorKind::Http(status.as_u16())
    } else {
        TransportErrorKind::Network
    };
    TransportError::new(Transport::Hub, kind, err.to_string())
}

/// Unknown categories are treated as terminal.
fn rejection_category(raw: Option<&str>) -> FailureCategory {
    raw.and_then(FailureCategory::parse)
        .unwrap_or(FailureCategory::ProtocolInvalid)
}

#[async_trait]
impl SyncTransport for HubClient {
    fn kind(&self) -> Transport {
        Transport::Hub
    }

    async fn push(&self, envelopes: &[Envelope]) -> Result<PushReport, TransportError> {
        let mut report = PushReport::new();
        if envelopes.is_empty() {
            return Ok(report);
        }

        let url = format!("{}{}", self.base_url, BATCH_PATH);
        let body: BatchResponse = self
            .send(self.http.post(&url).json(&BatchRequest { envelopes }))
            .await?;
        if !body.success {
            return Err(TransportError::new(
                Transport::Hub,
                TransportErrorKind::BadResponse,
                "batch response reported success=false",
            ));
        }

        for accepted in body.accepted {
            report.accept(accepted.event_id());
        }
        for rejected in body.rejected {
            let category = rejection_category(rejected.error_category.as_deref());
            let code = rejected.error_code.as_deref().unwrap_or("unspecified");
            debug!(
                event_id = %rejected.event_id,
                category = %category,
                code = %code,
                message = rejected.error.as_deref().unwrap_or(""),
                "Hub rejected envelope"
            );
            let code = format!("hub-{}:{}", category.as_str(), code);
            report.reject(rejected.event_id, category, code);
        }
        Ok(report)
    }

    async fn pull(&self, cursor: Option<&str>, limit: usize) -> Result<PullBatch, TransportError> {
        let url = format!("{}{}", self.base_url, FEED_PATH);
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let body: FeedResponse = self.send(self.http.get(&url).query(&query)).await?;
        if !body.success {
            return Err(TransportError::new(
                Transport::Hub,
                TransportErrorKind::BadResponse,
                "feed response reported success=false",
            ));
        }

        let mut items = Vec::with_capacity(body.events.len());
        for event in body.events {
            let Some(position) = position_of(&event.seq) else {
                warn!("Hub feed item without a usable seq skipped");
                continue;
            };
            match serde_json::from_value::<Envelope>(event.envelope) {
                Ok(envelope) => items.push(InboundEnvelope {
                    envelope,
                    position,
                    signer: None,
                }),
                Err(e) => warn!(seq = %position, error = %e, "Undecodable hub envelope skipped"),
            }
        }

        Ok(PullBatch {
            items,
            next_cursor: body.next_cursor.as_ref().and_then(position_of),
            ceiling: None,
        })
    }
}
