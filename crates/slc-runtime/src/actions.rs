//! Reconciliation of contract actions against the orchestration plane.
//!
//! Entry and Exit actions carry Kustomizations handed off to an external
//! cluster controller. Reconciliation is create-if-absent: fetch the object
//! by `(name, namespace)`, create it when missing, and leave it alone when
//! present, since the controller owns subsequent convergence. The discipline
//! is idempotent across repeated state entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use slc_core::contract::Action;

use crate::error::{Error, Result};

/// Converts a lock poison error to an orchestration error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::orchestration("orchestration lock poisoned")
}

/// A Kustomization as seen by the orchestration API.
///
/// The spec is opaque payload: the runtime forwards it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizationObject {
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// The Kustomization spec.
    pub spec: serde_json::Value,
}

/// A Kubernetes-style typed client for orchestration objects.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// Fetches an object by name and namespace.
    ///
    /// Returns `Ok(None)` when the object does not exist; any other failure
    /// is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Orchestration`] for API failures other than
    /// not-found.
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<KustomizationObject>>;

    /// Creates an object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Orchestration`] when the API rejects the create.
    async fn create(&self, object: KustomizationObject) -> Result<()>;
}

/// Reconciles an action's Kustomizations with create-if-absent semantics.
///
/// Actions without a spec are skipped. Existing objects are not updated; the
/// external controller owns them after creation.
///
/// # Errors
///
/// Returns the first orchestration error encountered.
pub async fn reconcile_action(api: &dyn OrchestrationApi, action: &Action) -> Result<()> {
    for kubernetes_action in &action.kubernetes_actions {
        let Some(spec) = kubernetes_action.kustomization_spec.as_ref() else {
            continue;
        };
        if api
            .get(&kubernetes_action.name, &kubernetes_action.namespace)
            .await?
            .is_some()
        {
            continue;
        }
        tracing::info!(
            kustomization = %kubernetes_action.name,
            namespace = %kubernetes_action.namespace,
            "creating kustomization"
        );
        api.create(KustomizationObject {
            name: kubernetes_action.name.clone(),
            namespace: kubernetes_action.namespace.clone(),
            spec: spec.clone(),
        })
        .await?;
    }
    Ok(())
}

/// In-memory orchestration API for testing.
///
/// Tracks created objects and counts create calls so tests can assert the
/// create-if-absent discipline.
#[derive(Debug, Default)]
pub struct InMemoryOrchestration {
    objects: Mutex<HashMap<(String, String), KustomizationObject>>,
    create_calls: AtomicUsize,
}

impl InMemoryOrchestration {
    /// Creates an empty API.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, object: KustomizationObject) -> Result<()> {
        let mut objects = self.objects.lock().map_err(poison_err)?;
        objects.insert((object.name.clone(), object.namespace.clone()), object);
        Ok(())
    }

    /// Returns the number of create calls observed.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrchestrationApi for InMemoryOrchestration {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<KustomizationObject>> {
        let objects = self.objects.lock().map_err(poison_err)?;
        Ok(objects.get(&(name.to_string(), namespace.to_string())).cloned())
    }

    async fn create(&self, object: KustomizationObject) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().map_err(poison_err)?;
        objects.insert((object.name.clone(), object.namespace.clone()), object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slc_core::contract::KubernetesAction;

    fn deploy_action() -> Action {
        Action {
            action_type: "kubernetes".into(),
            kubernetes_actions: vec![KubernetesAction {
                name: "signed-workload".into(),
                namespace: "contracts".into(),
                kustomization_spec: Some(serde_json::json!({
                    "interval": "5m",
                    "path": "./deploy",
                })),
            }],
        }
    }

    #[tokio::test]
    async fn creates_absent_object_exactly_once() -> Result<()> {
        let api = InMemoryOrchestration::new();
        let action = deploy_action();

        reconcile_action(&api, &action).await?;
        assert_eq!(api.create_calls(), 1);

        let created = api.get("signed-workload", "contracts").await?;
        assert!(created.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn re_entry_does_not_recreate() -> Result<()> {
        let api = InMemoryOrchestration::new();
        let action = deploy_action();

        reconcile_action(&api, &action).await?;
        reconcile_action(&api, &action).await?;
        assert_eq!(api.create_calls(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn existing_object_is_left_alone() -> Result<()> {
        let api = InMemoryOrchestration::new();
        api.insert(KustomizationObject {
            name: "signed-workload".into(),
            namespace: "contracts".into(),
            spec: serde_json::json!({"interval": "1m"}),
        })?;

        reconcile_action(&api, &deploy_action()).await?;
        assert_eq!(api.create_calls(), 0);

        let existing = api.get("signed-workload", "contracts").await?.expect("exists");
        assert_eq!(existing.spec, serde_json::json!({"interval": "1m"}));

        Ok(())
    }

    #[tokio::test]
    async fn action_without_spec_is_skipped() -> Result<()> {
        let api = InMemoryOrchestration::new();
        let action = Action {
            action_type: "kubernetes".into(),
            kubernetes_actions: vec![KubernetesAction {
                name: "no-spec".into(),
                namespace: "contracts".into(),
                kustomization_spec: None,
            }],
        };

        reconcile_action(&api, &action).await?;
        assert_eq!(api.create_calls(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn empty_action_is_a_no_op() -> Result<()> {
        let api = InMemoryOrchestration::new();
        reconcile_action(&api, &Action::default()).await?;
        assert_eq!(api.create_calls(), 0);
        Ok(())
    }
}
