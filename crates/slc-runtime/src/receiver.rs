//! CloudEvents HTTP receiver.
//!
//! Accepts CloudEvents over HTTP in both the structured
//! (`application/cloudevents+json`) and binary (`ce-*` headers) modes of the
//! protocol binding, and places accepted events onto the reconciler's event
//! channel. The enqueue happens on a helper task so a busy event loop never
//! blocks the HTTP response.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use slc_core::event::{CanonicalEvent, APPLICATION_JSON, SPEC_VERSION};

use crate::error::{Error, Result};

/// Content type of structured-mode CloudEvents.
const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// Configuration for the CloudEvents HTTP receiver.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address the receiver listens on.
    pub addr: SocketAddr,
    /// Path events are posted to.
    pub path: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/".to_string(),
        }
    }
}

/// Serves the receiver until the cancellation token fires.
///
/// # Errors
///
/// Returns [`Error::Receiver`] when the listener cannot bind or the server
/// fails.
pub async fn serve(
    config: ReceiverConfig,
    events: mpsc::Sender<CanonicalEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(&config.path, events);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| Error::receiver(format!("failed to bind {}: {e}", config.addr)))?;

    tracing::debug!(addr = %config.addr, "cloudevent receiver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::receiver(format!("server error: {e}")))
}

/// Builds the receiver router.
#[must_use]
pub fn router(path: &str, events: mpsc::Sender<CanonicalEvent>) -> Router {
    Router::new()
        .route(path, post(receive_handler))
        .with_state(events)
}

async fn receive_handler(
    State(events): State<mpsc::Sender<CanonicalEvent>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    match decode_event(&headers, &body) {
        Ok(event) => {
            tracing::debug!(
                event_type = %event.event_type,
                id = %event.id,
                "received cloudevent over http"
            );
            tokio::spawn(async move {
                if events.send(event).await.is_err() {
                    tracing::warn!("event channel closed; dropping received event");
                }
            });
            StatusCode::ACCEPTED
        }
        Err(err) => {
            tracing::warn!(error = %err, "rejecting malformed cloudevent");
            StatusCode::BAD_REQUEST
        }
    }
}

fn decode_event(headers: &HeaderMap, body: &[u8]) -> Result<CanonicalEvent> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with(CLOUDEVENTS_JSON) {
        decode_structured(body)
    } else {
        decode_binary(headers, body, content_type)
    }
}

/// Structured mode: the body is the complete envelope.
fn decode_structured(body: &[u8]) -> Result<CanonicalEvent> {
    let mut event: CanonicalEvent = serde_json::from_slice(body)
        .map_err(|e| Error::receiver(format!("invalid cloudevents envelope: {e}")))?;
    if event.event_type.is_empty() {
        return Err(Error::receiver("cloudevents envelope is missing type"));
    }
    if event.id.is_empty() {
        event.id = Uuid::new_v4().to_string();
    }
    if event.specversion.is_empty() {
        event.specversion = SPEC_VERSION.into();
    }
    Ok(event)
}

/// Binary mode: attributes travel in `ce-*` headers, the body is the data.
fn decode_binary(headers: &HeaderMap, body: &[u8], content_type: &str) -> Result<CanonicalEvent> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let event_type = header("ce-type")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::receiver("binary cloudevent is missing the ce-type header"))?;

    let data = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
        }))
    };

    Ok(CanonicalEvent {
        id: header("ce-id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        source: header("ce-source").unwrap_or_default(),
        specversion: header("ce-specversion").unwrap_or_else(|| SPEC_VERSION.into()),
        event_type,
        time: header("ce-time")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|time| time.with_timezone(&Utc)),
        datacontenttype: if content_type.is_empty() {
            Some(APPLICATION_JSON.into())
        } else {
            Some(content_type.to_string())
        },
        data,
    })
}
