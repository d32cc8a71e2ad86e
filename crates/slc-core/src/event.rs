//! Canonical event envelope and normalization.
//!
//! Every event entering the reconciler, whether pulled from the durable
//! stream or received over HTTP, is normalized into a [`CanonicalEvent`]: a
//! CloudEvents v1.0 JSON envelope. Normalization is body-first: a message
//! that already carries a well-formed envelope passes through unchanged, a
//! partially-formed envelope is completed from transport headers, and
//! anything else is wrapped as an `application/json` payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The CloudEvents specification version emitted by this crate.
pub const SPEC_VERSION: &str = "1.0";

/// Event type of the synthetic event published on every transition.
pub const TRANSITIONING_EVENT_TYPE: &str = "com.decombine.slc.transitioning";

/// Source attribute of the synthetic transitioning event.
pub const TRANSITIONING_EVENT_SOURCE: &str = "decombine";

/// Content type applied to wrapped payloads.
pub const APPLICATION_JSON: &str = "application/json";

/// How missing or malformed transport headers are treated during
/// normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderPolicy {
    /// Substitute a fresh value for a missing or malformed header.
    #[default]
    Lenient,
    /// Surface a [`Error::MalformedHeader`] instead.
    Strict,
}

/// A CloudEvents v1.0 envelope.
///
/// Deserialization is permissive (every attribute defaults) so that
/// partially-formed envelopes can be inspected and completed; the normalizer
/// decides what counts as well-formed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Unique event identifier.
    #[serde(default)]
    pub id: String,
    /// Event origin.
    #[serde(default)]
    pub source: String,
    /// CloudEvents specification version.
    #[serde(default)]
    pub specversion: String,
    /// Event type.
    #[serde(rename = "type", default)]
    pub event_type: String,
    /// Event timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Content type of the data attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CanonicalEvent {
    /// Creates a new event of the given type and source with a fresh ID and
    /// the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when `event_type` is empty.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(Error::serialization("event type cannot be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            specversion: SPEC_VERSION.into(),
            event_type,
            time: Some(Utc::now()),
            datacontenttype: None,
            data: None,
        })
    }

    /// Creates the synthetic transitioning event published to the stream so
    /// peer services can observe state changes. Carries no data.
    #[must_use]
    pub fn transitioning() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: TRANSITIONING_EVENT_SOURCE.into(),
            specversion: SPEC_VERSION.into(),
            event_type: TRANSITIONING_EVENT_TYPE.into(),
            time: Some(Utc::now()),
            datacontenttype: None,
            data: None,
        }
    }

    /// Returns the payload as the guard input value.
    ///
    /// Events without data yield an empty string, the default guard input.
    #[must_use]
    pub fn data_value(&self) -> serde_json::Value {
        self.data
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(String::new()))
    }

    fn is_well_formed(&self) -> bool {
        !self.event_type.is_empty() && !self.id.is_empty() && !self.specversion.is_empty()
    }
}

/// Normalizes a raw stream message into a [`CanonicalEvent`].
///
/// 1. A body that parses as a well-formed envelope is used as-is.
/// 2. A body that parses with a non-empty `type` is treated as an envelope
///    with missing attributes, completed from headers.
/// 3. Anything else is wrapped: the body becomes the `data` attribute with
///    content type `application/json`.
///
/// Header fallbacks, applied when the attribute was not set from the body:
/// the `time` header parsed as RFC 3339 (lenient: now; strict: error) and the
/// `id` header (lenient: fresh UUID; strict: error).
///
/// # Errors
///
/// Returns [`Error::MalformedHeader`] in strict mode when a fallback header
/// is missing or malformed.
pub fn normalize(
    payload: &[u8],
    headers: &HashMap<String, String>,
    policy: HeaderPolicy,
) -> Result<CanonicalEvent> {
    if let Ok(event) = serde_json::from_slice::<CanonicalEvent>(payload) {
        if event.is_well_formed() {
            return Ok(event);
        }
        if !event.event_type.is_empty() {
            return apply_header_fallbacks(event, headers, policy);
        }
    }

    let data = serde_json::from_slice(payload)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()));

    let event = CanonicalEvent {
        datacontenttype: Some(APPLICATION_JSON.into()),
        data: Some(data),
        ..CanonicalEvent::default()
    };
    apply_header_fallbacks(event, headers, policy)
}

fn apply_header_fallbacks(
    mut event: CanonicalEvent,
    headers: &HashMap<String, String>,
    policy: HeaderPolicy,
) -> Result<CanonicalEvent> {
    if event.time.is_none() {
        let parsed = headers
            .get("time")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));
        event.time = match (parsed, policy) {
            (Some(time), _) => Some(time),
            (None, HeaderPolicy::Lenient) => Some(Utc::now()),
            (None, HeaderPolicy::Strict) => {
                return Err(Error::MalformedHeader { header: "time" });
            }
        };
    }

    if event.id.is_empty() {
        match headers.get("id").filter(|id| !id.is_empty()) {
            Some(id) => event.id = id.clone(),
            None => match policy {
                HeaderPolicy::Lenient => event.id = Uuid::new_v4().to_string(),
                HeaderPolicy::Strict => {
                    return Err(Error::MalformedHeader { header: "id" });
                }
            },
        }
    }

    event.specversion = SPEC_VERSION.into();
    Ok(event)
}
