//! In-memory stream implementations for testing.
//!
//! [`InMemoryStream`] records published messages; [`channel_source`] builds a
//! [`MessageSource`] fed through a tokio channel so tests can inject inbound
//! messages. Neither is suitable for production: nothing is durable and
//! nothing crosses process boundaries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Acker, EventStream, MessageSource, PublishAck, StreamMessage};
use crate::error::{Error, Result};

/// Converts a lock poison error to a stream error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::stream_connect("in-memory stream lock poisoned")
}

/// A published message captured by the in-memory stream.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    /// The subject the message was published to.
    pub subject: String,
    /// The message payload.
    pub payload: Bytes,
}

/// In-memory event stream for testing.
#[derive(Debug, Default)]
pub struct InMemoryStream {
    published: Mutex<Vec<PublishedMessage>>,
    fail_publishes: bool,
}

impl InMemoryStream {
    /// Creates a new in-memory stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream whose publishes always fail, simulating an
    /// unreachable broker.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_publishes: true,
        }
    }

    /// Returns all published messages in publish order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn published(&self) -> Result<Vec<PublishedMessage>> {
        let published = self.published.lock().map_err(poison_err)?;
        Ok(published.clone())
    }
}

#[async_trait]
impl EventStream for InMemoryStream {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        if self.fail_publishes {
            return Err(Error::stream_publish(subject, "broker unreachable"));
        }

        let mut published = self.published.lock().map_err(poison_err)?;
        published.push(PublishedMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(PublishAck {
            stream: "memory".to_string(),
            sequence: published.len() as u64,
        })
    }
}

/// A message source backed by a tokio channel.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::Receiver<StreamMessage>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next(&mut self) -> Result<Option<StreamMessage>> {
        Ok(self.receiver.recv().await)
    }
}

/// Creates a channel-backed message source with the given capacity.
///
/// The source yields `None` once every sender is dropped, which the
/// reconciler treats as the consumer closing.
#[must_use]
pub fn channel_source(capacity: usize) -> (mpsc::Sender<StreamMessage>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, ChannelSource { receiver })
}

/// An ack handle that counts acknowledgements, for asserting ack behavior in
/// tests.
#[derive(Debug, Clone, Default)]
pub struct CountingAcker {
    acks: Arc<AtomicUsize>,
}

impl CountingAcker {
    /// Creates a new counting acker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of acknowledgements delivered.
    #[must_use]
    pub fn count(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acker for CountingAcker {
    async fn ack(&self) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
