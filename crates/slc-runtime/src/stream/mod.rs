//! Durable event stream abstraction.
//!
//! This module provides:
//!
//! - [`EventStream`]: trait for publishing events to the stream
//! - [`MessageSource`]: trait for pulling inbound messages
//! - [`StreamMessage`]: an inbound message with headers and an ack handle
//! - [`memory`]: in-memory implementations for testing
//! - [`nats`]: the JetStream adapter (behind the default `nats` feature)
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: the reconciler sees the same interface for
//!   JetStream and the in-memory test stream
//! - **Explicit acknowledgement**: messages carry their own ack handle
//! - **Durable position**: the real backend names its consumer after the
//!   contract so the position survives restarts

pub mod memory;

#[cfg(feature = "nats")]
pub mod nats;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Stream name used when the caller supplies no configuration.
pub const DEFAULT_STREAM_NAME: &str = "default";

/// Maximum length of a durable consumer name in the underlying transport.
pub const MAX_CONSUMER_NAME_LEN: usize = 32;

/// Formats the durable consumer name for a contract.
///
/// The contract name is uppercased, the contract ID (when non-empty) is
/// appended after a dash, spaces become dashes, and the result is truncated
/// to [`MAX_CONSUMER_NAME_LEN`] characters. Pure and deterministic: the same
/// `(name, id)` always yields the same string.
#[must_use]
pub fn format_consumer_name(name: &str, id: &str) -> String {
    let mut formatted = name.to_uppercase();
    if !id.is_empty() {
        formatted.push('-');
        formatted.push_str(id);
    }
    formatted
        .replace(' ', "-")
        .chars()
        .take(MAX_CONSUMER_NAME_LEN)
        .collect()
}

/// Configuration for the stream the reconciler attaches to.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Stream name; defaults to [`DEFAULT_STREAM_NAME`] when unset.
    pub name: Option<String>,
    /// Subjects bound to the stream when it is created.
    pub subjects: Vec<String>,
}

impl StreamOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stream name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the subjects bound to the stream.
    #[must_use]
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Returns the effective stream name.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_STREAM_NAME)
    }
}

/// Acknowledgement of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// The stream that stored the message.
    pub stream: String,
    /// The stream sequence assigned to the message.
    pub sequence: u64,
}

/// A publisher to the durable event stream.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Publishes a payload to the given subject.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::StreamPublish`] when the broker
    /// rejects or cannot store the message.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck>;
}

/// Acknowledges a consumed message back to the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement cannot be delivered.
    async fn ack(&self) -> Result<()>;
}

/// An inbound message pulled from the stream.
pub struct StreamMessage {
    payload: Bytes,
    headers: HashMap<String, String>,
    acker: Option<Box<dyn Acker>>,
}

impl std::fmt::Debug for StreamMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMessage")
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .field("has_acker", &self.acker.is_some())
            .finish()
    }
}

impl StreamMessage {
    /// Creates a message without an ack handle (acknowledgement is a no-op).
    #[must_use]
    pub fn new(payload: Bytes, headers: HashMap<String, String>) -> Self {
        Self {
            payload,
            headers,
            acker: None,
        }
    }

    /// Attaches an ack handle.
    #[must_use]
    pub fn with_acker(mut self, acker: Box<dyn Acker>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Returns the message payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the transport headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Acknowledges the message to the broker.
    ///
    /// # Errors
    ///
    /// Returns an error when the acknowledgement cannot be delivered.
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

/// A pull iterator over inbound stream messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Pulls the next message, blocking until one is available.
    ///
    /// Returns `Ok(None)` when the consumer has closed.
    ///
    /// # Errors
    ///
    /// Returns an error when the pull fails; the caller may continue
    /// pulling.
    async fn next(&mut self) -> Result<Option<StreamMessage>>;
}
