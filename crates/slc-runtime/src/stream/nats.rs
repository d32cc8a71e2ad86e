//! JetStream adapter for the durable event stream.
//!
//! Connects to the contract's event URL, creates or attaches the configured
//! stream, and creates-or-updates a durable explicit-ack pull consumer named
//! after the contract. Only compiled with the default `nats` feature:
//!
//! ```toml
//! [dependencies]
//! slc-runtime = { version = "0.1", features = ["nats"] }
//! ```

use std::collections::HashMap;

use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use slc_core::Contract;

use super::{format_consumer_name, Acker, EventStream, MessageSource, PublishAck, StreamMessage, StreamOptions};
use crate::error::{Error, Result};

/// A JetStream-backed publisher.
#[derive(Clone)]
pub struct NatsStream {
    context: jetstream::Context,
}

impl std::fmt::Debug for NatsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsStream").finish_non_exhaustive()
    }
}

/// A JetStream-backed pull message source.
pub struct NatsSource {
    messages: jetstream::consumer::pull::Stream,
}

impl std::fmt::Debug for NatsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsSource").finish_non_exhaustive()
    }
}

/// Connects to the contract's event stream.
///
/// Creates or attaches the stream named by `options` (default `"default"`)
/// and creates-or-updates a durable explicit-ack pull consumer named via
/// [`format_consumer_name`]. Messages are pulled in batches of at most
/// `max_messages`.
///
/// # Errors
///
/// Returns [`Error::StreamConnect`] when the broker, stream, or consumer
/// cannot be reached or created.
pub async fn connect(
    contract: &Contract,
    options: StreamOptions,
    max_messages: usize,
) -> Result<(NatsStream, NatsSource)> {
    let client = async_nats::connect(&contract.network.event_url)
        .await
        .map_err(|e| Error::stream_connect(format!("failed to connect to broker: {e}")))?;
    let context = jetstream::new(client);

    let mut config = jetstream::stream::Config {
        name: options.stream_name().to_string(),
        ..jetstream::stream::Config::default()
    };
    if !options.subjects.is_empty() {
        config.subjects = options.subjects.clone();
    }

    let stream = context
        .get_or_create_stream(config)
        .await
        .map_err(|e| Error::stream_connect(format!("failed to create stream: {e}")))?;

    let durable = format_consumer_name(&contract.name, &contract.id);
    let consumer = stream
        .get_or_create_consumer(
            &durable,
            jetstream::consumer::pull::Config {
                durable_name: Some(durable.clone()),
                ack_policy: jetstream::consumer::AckPolicy::Explicit,
                ..jetstream::consumer::pull::Config::default()
            },
        )
        .await
        .map_err(|e| Error::stream_connect(format!("failed to create consumer {durable}: {e}")))?;

    let messages = consumer
        .stream()
        .max_messages_per_batch(max_messages)
        .messages()
        .await
        .map_err(|e| Error::stream_connect(format!("failed to open pull iterator: {e}")))?;

    Ok((NatsStream { context }, NatsSource { messages }))
}

#[async_trait]
impl EventStream for NatsStream {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        let ack = self
            .context
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::stream_publish(subject, e.to_string()))?
            .await
            .map_err(|e| Error::stream_publish(subject, e.to_string()))?;
        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }
}

#[async_trait]
impl MessageSource for NatsSource {
    async fn next(&mut self) -> Result<Option<StreamMessage>> {
        match self.messages.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(Error::stream_connect(format!("pull failed: {e}"))),
            Some(Ok(message)) => {
                let mut headers = HashMap::new();
                if let Some(header_map) = message.headers.as_ref() {
                    // Only the normalization fallbacks are forwarded.
                    for name in ["time", "id"] {
                        if let Some(value) = header_map.get(name) {
                            headers.insert(name.to_string(), value.as_str().to_string());
                        }
                    }
                }
                let payload = message.payload.clone();
                Ok(Some(
                    StreamMessage::new(payload, headers)
                        .with_acker(Box::new(NatsAcker { message })),
                ))
            }
        }
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| Error::stream_connect(format!("failed to ack message: {e}")))
    }
}
