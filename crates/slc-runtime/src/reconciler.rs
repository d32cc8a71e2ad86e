//! The per-contract reconciler.
//!
//! A reconciler owns one contract, its compiled state machine, a durable
//! stream position, and (optionally) an orchestration client and a
//! CloudEvents HTTP receiver. Inbound messages fan through a bounded worker
//! pool onto a single event channel; the main loop dispatches each event to
//! the machine, reconciles actions on state changes, and publishes a
//! transitioning event so peer services can observe progress.
//!
//! FSM mutations are serialized: the machine is touched only from the main
//! loop, one dispatch at a time. Workers are parallel, so no global ordering
//! across messages is provided; ordering between two events is the order in
//! which their workers reach the event channel.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use slc_core::contract::{Contract, State};
use slc_core::event::{normalize, CanonicalEvent, HeaderPolicy};
use slc_core::machine::{StateMachine, TransitionContext};

use crate::actions::{reconcile_action, OrchestrationApi};
use crate::error::Result;
use crate::receiver::{self, ReceiverConfig};
use crate::stream::{EventStream, MessageSource};

/// Configuration for a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Whether to start the CloudEvents HTTP receiver.
    pub use_cloud_event_receiver: bool,
    /// Receiver configuration, passed through to the HTTP transport.
    pub receiver: ReceiverConfig,
    /// Subject transitioning events are published to; unset disables
    /// publishing.
    pub publish_subject: Option<String>,
    /// Number of workers processing inbound messages.
    pub workers: usize,
    /// Maximum messages pulled from the stream per batch.
    pub max_messages: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            use_cloud_event_receiver: false,
            receiver: ReceiverConfig::default(),
            publish_subject: None,
            workers: 4,
            max_messages: 16,
        }
    }
}

/// A long-lived event-driven process executing one Smart Legal Contract.
pub struct Reconciler {
    config: ReconcilerConfig,
    contract: Arc<Contract>,
    machine: StateMachine,
    stream: Arc<dyn EventStream>,
    source: Option<Box<dyn MessageSource>>,
    orchestration: Option<Arc<dyn OrchestrationApi>>,
    state_tx: watch::Sender<String>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("contract", &self.contract.name)
            .field("state", &self.machine.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over a compiled machine, a stream publisher, and
    /// a pull message source.
    #[must_use]
    pub fn new(
        contract: Arc<Contract>,
        machine: StateMachine,
        stream: Arc<dyn EventStream>,
        source: Box<dyn MessageSource>,
        config: ReconcilerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(machine.state().to_string());
        Self {
            config,
            contract,
            machine,
            stream,
            source: Some(source),
            orchestration: None,
            state_tx,
        }
    }

    /// Attaches an orchestration client; entry and exit actions are only
    /// reconciled when one is present.
    #[must_use]
    pub fn with_orchestration(mut self, api: Arc<dyn OrchestrationApi>) -> Self {
        self.orchestration = Some(api);
        self
    }

    /// Returns a watch over the machine's current state name.
    ///
    /// The watch updates after every successful transition.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<String> {
        self.state_tx.subscribe()
    }

    /// Runs the reconciler until the cancellation token fires.
    ///
    /// Startup resolves the current state, reconciles its entry action when
    /// an orchestration client is present, installs the transition publish
    /// hook, and spawns the worker-pool driver and (optionally) the HTTP
    /// receiver. Startup failures abort; per-event failures are logged and
    /// the loop continues.
    ///
    /// # Errors
    ///
    /// Returns an error when the current state cannot be resolved or entry
    /// reconciliation fails at startup.
    pub async fn start(mut self, cancel: CancellationToken) -> Result<()> {
        let state = self.machine.state().to_string();
        let current = self.contract.state(&state)?.clone();

        tracing::info!(
            contract = %self.contract.name,
            state = %current.name,
            "starting smart legal contract reconciler"
        );

        if let Some(api) = self.orchestration.clone() {
            tracing::info!("orchestration client connected; synchronizing entry workloads");
            reconcile_action(api.as_ref(), &current.entry).await?;
        }

        self.install_transition_hook();

        let (events_tx, mut events_rx) = mpsc::channel::<CanonicalEvent>(self.config.workers.max(1));

        let source = self
            .source
            .take()
            .ok_or_else(|| crate::error::Error::configuration("reconciler already started"))?;
        tokio::spawn(drive_source(
            source,
            events_tx.clone(),
            self.config.workers,
            cancel.child_token(),
        ));

        if self.config.use_cloud_event_receiver {
            tracing::debug!("cloud event receiver being activated");
            let receiver_config = self.config.receiver.clone();
            let receiver_events = events_tx.clone();
            let receiver_cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(err) =
                    receiver::serve(receiver_config, receiver_events, receiver_cancel).await
                {
                    tracing::error!(error = %err, "cloud event receiver failed");
                }
            });
        }

        drop(events_tx);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(contract = %self.contract.name, "reconciler stopping");
                    return Ok(());
                }
                maybe_event = events_rx.recv() => {
                    let Some(event) = maybe_event else {
                        tracing::info!("event sources closed; reconciler stopping");
                        return Ok(());
                    };
                    tracing::info!(
                        event_type = %event.event_type,
                        source = %event.source,
                        id = %event.id,
                        "received event"
                    );
                    self.dispatch(&event).await;
                }
            }
        }
    }

    /// Registers the hook that publishes a transitioning event for every
    /// successful transition. Publishing is best-effort: failures are logged
    /// and never abort the transition.
    fn install_transition_hook(&mut self) {
        let stream = Arc::clone(&self.stream);
        let subject = self.config.publish_subject.clone();
        self.machine.on_transitioning(move |record| {
            let stream = Arc::clone(&stream);
            let subject = subject.clone();
            Box::pin(async move {
                let Some(subject) = subject else {
                    tracing::info!(
                        "no publish subject configured; skipping transitioning event"
                    );
                    return;
                };
                let event = CanonicalEvent::transitioning();
                let payload = match serde_json::to_vec(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to encode transitioning event");
                        return;
                    }
                };
                match stream.publish(&subject, Bytes::from(payload)).await {
                    Ok(ack) => tracing::info!(
                        stream = %ack.stream,
                        sequence = ack.sequence,
                        from = %record.from,
                        to = %record.to,
                        "published transitioning event"
                    ),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to publish transitioning event");
                    }
                }
            })
        });
    }

    /// Dispatches one event against the transitions eligible from the
    /// machine's current state.
    ///
    /// Every candidate sharing the event's type is attempted: transitions
    /// may share a trigger and differ only in guards. Guard denials and
    /// evaluation errors are logged, never propagated.
    async fn dispatch(&mut self, event: &CanonicalEvent) {
        let current = match self.contract.state(self.machine.state()) {
            Ok(state) => state.clone(),
            Err(err) => {
                tracing::error!(error = %err, "current state is not declared by the contract");
                return;
            }
        };

        let ctx = TransitionContext::from_event(event);
        for transition in &current.transitions {
            // An empty trigger is the sentinel for "no event".
            if transition.on.is_empty() || transition.on != event.event_type {
                continue;
            }
            tracing::info!(
                event_type = %event.event_type,
                to = %transition.to,
                "event triggers candidate transition"
            );
            match self.machine.fire(&transition.on, &ctx).await {
                Ok(record) => {
                    tracing::info!(from = %record.from, to = %record.to, "transition successful");
                    self.state_tx.send_replace(record.to.clone());
                    self.reconcile_state_change(&current, &record.to).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "transition failed");
                }
            }
        }
    }

    /// Reconciles actions after a successful transition: the exited state's
    /// Exit first, then the entered state's Entry. Failures are logged; the
    /// loop continues.
    async fn reconcile_state_change(&self, exited: &State, entered: &str) {
        let Some(api) = self.orchestration.as_ref() else {
            return;
        };

        if !exited.exit.kubernetes_actions.is_empty() {
            tracing::info!(state = %exited.name, "reconciling exit actions");
            if let Err(err) = reconcile_action(api.as_ref(), &exited.exit).await {
                tracing::error!(error = %err, "failed to reconcile exit actions");
            }
        }

        match self.contract.state(entered) {
            Ok(state) => {
                if !state.entry.kubernetes_actions.is_empty() {
                    tracing::info!(state = %state.name, "reconciling entry actions");
                    if let Err(err) = reconcile_action(api.as_ref(), &state.entry).await {
                        tracing::error!(error = %err, "failed to reconcile entry actions");
                    }
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "entered state is not declared by the contract");
            }
        }
    }
}

/// Pulls messages from the source and processes them on a bounded worker
/// pool.
///
/// One slot of the semaphore is held per in-flight message; acquiring blocks
/// when the pool is saturated, which is the backpressure mechanism. Each
/// worker normalizes its message, pushes the event onto the channel, and
/// acks. The ack lands before dispatch completes: stream durability covers
/// transport, while FSM progression is deterministic from the event set and
/// is the reconciler's own responsibility.
async fn drive_source(
    mut source: Box<dyn MessageSource>,
    events: mpsc::Sender<CanonicalEvent>,
    workers: usize,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    loop {
        let permit = tokio::select! {
            () = cancel.cancelled() => return,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                }
            }
        };

        let message = tokio::select! {
            () = cancel.cancelled() => return,
            message = source.next() => message,
        };

        match message {
            Err(err) => {
                tracing::warn!(error = %err, "failed to pull message from stream");
                drop(permit);
            }
            Ok(None) => {
                tracing::info!("consumer closed; stopping worker driver");
                return;
            }
            Ok(Some(message)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match normalize(
                        message.payload().as_ref(),
                        message.headers(),
                        HeaderPolicy::default(),
                    ) {
                        Ok(event) => {
                            if events.send(event).await.is_err() {
                                tracing::warn!("event channel closed; dropping message");
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to normalize message");
                        }
                    }
                    if let Err(err) = message.ack().await {
                        tracing::warn!(error = %err, "failed to ack message");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sensible() {
        let config = ReconcilerConfig::default();
        assert!(!config.use_cloud_event_receiver);
        assert!(config.publish_subject.is_none());
        assert!(config.workers > 0);
        assert!(config.max_messages > 0);
    }
}
