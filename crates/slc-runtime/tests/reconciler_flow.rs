//! End-to-end reconciler tests over the in-memory stream.
//!
//! These drive the full loop: messages enter through the channel-backed
//! source, fan through the worker pool, and dispatch against a machine
//! guarded by a real Rego policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use slc_core::document::{parse_contract, ContractFormat};
use slc_core::machine::StateMachine;
use slc_core::policy::StaticPolicyStore;
use slc_core::prelude::Contract;

use slc_runtime::actions::{InMemoryOrchestration, OrchestrationApi};
use slc_runtime::error::Result;
use slc_runtime::reconciler::{Reconciler, ReconcilerConfig};
use slc_runtime::stream::memory::{channel_source, InMemoryStream};
use slc_runtime::stream::{EventStream, StreamMessage};

const SIGN_EVENT: &str = "com.decombine.signature.sign";
const ARCHIVE_EVENT: &str = "com.decombine.archive";
const TRANSITIONING_EVENT: &str = "com.decombine.slc.transitioning";

const SIGNING_POLICY: &str = r#"
package signing

default allow = false

allow = true {
    input.user == "admin"
}
"#;

const CONTRACT_YAML: &str = r#"
name: Supply Agreement
id: abc
version: 0.1.0
policy:
  url: https://github.com/decombine/policies
  branch: main
  directory: policies
state:
  initial: Draft
  url: https://example.com/state
  states:
    - name: Draft
      entry:
        kubernetesAction:
          - name: draft-entry
            namespace: contracts
            kustomizationSpec:
              interval: 5m
              path: ./draft
      exit:
        kubernetesAction:
          - name: draft-cleanup
            namespace: contracts
            kustomizationSpec:
              interval: 5m
              path: ./cleanup
      transitions:
        - name: sign
          to: Signed
          "on": com.decombine.signature.sign
          conditions:
            - name: signing
              value: data.signing.allow
              path: signing/allow.rego
    - name: Signed
      entry:
        kubernetesAction:
          - name: signed-workload
            namespace: contracts
            kustomizationSpec:
              interval: 5m
              path: ./deploy
      transitions:
        - name: archive
          to: Archived
          "on": com.decombine.archive
    - name: Archived
      transitions: []
"#;

fn contract() -> Contract {
    parse_contract(CONTRACT_YAML.as_bytes(), ContractFormat::Yaml).expect("contract parses")
}

fn event_message(event_type: &str, id: &str, data: serde_json::Value) -> StreamMessage {
    let envelope = serde_json::json!({
        "type": event_type,
        "id": id,
        "specversion": "1.0",
        "source": "tests",
        "data": data,
    });
    StreamMessage::new(
        Bytes::from(serde_json::to_vec(&envelope).expect("envelope encodes")),
        HashMap::new(),
    )
}

struct Harness {
    sender: mpsc::Sender<StreamMessage>,
    states: watch::Receiver<String>,
    orchestration: Arc<InMemoryOrchestration>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl Harness {
    fn start(stream: Arc<InMemoryStream>, publish_subject: Option<String>) -> Self {
        let contract = Arc::new(contract());
        let policies = Arc::new(StaticPolicyStore::new().with_policy(
            "signing/allow.rego",
            SIGNING_POLICY,
        ));
        let machine = StateMachine::build(&contract, &contract.state.initial, policies)
            .expect("machine builds");

        let (sender, source) = channel_source(8);
        let orchestration = Arc::new(InMemoryOrchestration::new());

        let config = ReconcilerConfig {
            publish_subject,
            workers: 2,
            ..ReconcilerConfig::default()
        };

        let reconciler = Reconciler::new(
            Arc::clone(&contract),
            machine,
            Arc::clone(&stream) as Arc<dyn EventStream>,
            Box::new(source),
            config,
        )
        .with_orchestration(Arc::clone(&orchestration) as Arc<dyn OrchestrationApi>);

        let states = reconciler.state_watch();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconciler.start(cancel.clone()));

        Self {
            sender,
            states,
            orchestration,
            cancel,
            handle,
        }
    }

    async fn wait_for_state(&mut self, expected: &str) {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.states.wait_for(|state| state.as_str() == expected),
        )
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {expected}"))
        .expect("state watch closed");
    }

    async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.handle.await.expect("reconciler task panicked")
    }
}

#[tokio::test]
async fn denied_guard_does_not_advance() -> Result<()> {
    let mut harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "bob"})))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*harness.states.borrow(), "Draft");

    harness.shutdown().await
}

#[tokio::test]
async fn allowed_guard_advances_to_signed() -> Result<()> {
    let mut harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");

    harness.wait_for_state("Signed").await;
    harness.shutdown().await
}

#[tokio::test]
async fn multi_hop_transitions_use_the_new_state() -> Result<()> {
    let mut harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");
    harness.wait_for_state("Signed").await;

    // The archive transition is declared on Signed, not Draft; it only
    // fires if eligibility is recomputed after the first hop.
    harness
        .sender
        .send(event_message(ARCHIVE_EVENT, "evt-2", serde_json::json!({})))
        .await
        .expect("send");
    harness.wait_for_state("Archived").await;

    harness.shutdown().await
}

#[tokio::test]
async fn unregistered_events_are_ignored() -> Result<()> {
    let mut harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    harness
        .sender
        .send(event_message(
            "com.decombine.unrelated",
            "evt-1",
            serde_json::json!({}),
        ))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*harness.states.borrow(), "Draft");

    harness.shutdown().await
}

#[tokio::test]
async fn actions_reconcile_across_the_transition() -> Result<()> {
    let mut harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    // Draft's entry action reconciles at startup.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness
        .orchestration
        .get("draft-entry", "contracts")
        .await?
        .is_some());

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");
    harness.wait_for_state("Signed").await;

    // Exit of the source state and entry of the destination.
    assert!(harness
        .orchestration
        .get("draft-cleanup", "contracts")
        .await?
        .is_some());
    assert!(harness
        .orchestration
        .get("signed-workload", "contracts")
        .await?
        .is_some());
    assert_eq!(harness.orchestration.create_calls(), 3);

    harness.shutdown().await
}

#[tokio::test]
async fn transition_publishes_to_configured_subject() -> Result<()> {
    let stream = Arc::new(InMemoryStream::new());
    let mut harness = Harness::start(Arc::clone(&stream), Some("slc.transitions".to_string()));

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");
    harness.wait_for_state("Signed").await;

    let published = stream.published()?;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, "slc.transitions");

    let event: serde_json::Value =
        serde_json::from_slice(&published[0].payload).expect("payload parses");
    assert_eq!(event["type"], TRANSITIONING_EVENT);
    assert_eq!(event["source"], "decombine");
    assert_eq!(event["specversion"], "1.0");

    harness.shutdown().await
}

#[tokio::test]
async fn no_publish_subject_still_transitions() -> Result<()> {
    let stream = Arc::new(InMemoryStream::new());
    let mut harness = Harness::start(Arc::clone(&stream), None);

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");
    harness.wait_for_state("Signed").await;

    assert!(stream.published()?.is_empty());
    harness.shutdown().await
}

#[tokio::test]
async fn unreachable_broker_does_not_abort_the_loop() -> Result<()> {
    let mut harness = Harness::start(
        Arc::new(InMemoryStream::unreachable()),
        Some("slc.transitions".to_string()),
    );

    harness
        .sender
        .send(event_message(SIGN_EVENT, "evt-1", serde_json::json!({"user": "admin"})))
        .await
        .expect("send");
    harness.wait_for_state("Signed").await;

    // The loop keeps dispatching after the failed publish.
    harness
        .sender
        .send(event_message(ARCHIVE_EVENT, "evt-2", serde_json::json!({})))
        .await
        .expect("send");
    harness.wait_for_state("Archived").await;

    harness.shutdown().await
}

#[tokio::test]
async fn cancellation_stops_the_loop() -> Result<()> {
    let harness = Harness::start(Arc::new(InMemoryStream::new()), None);
    harness.shutdown().await
}

#[tokio::test]
async fn closing_the_source_stops_the_loop() -> Result<()> {
    let harness = Harness::start(Arc::new(InMemoryStream::new()), None);

    let Harness { sender, handle, .. } = harness;
    drop(sender);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reconciler stopped")
        .expect("reconciler task panicked")
}
