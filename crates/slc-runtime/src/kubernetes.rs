//! Kubernetes-backed orchestration API.
//!
//! Implements [`OrchestrationApi`] against a live cluster using dynamic
//! typing for the Flux `kustomize.toolkit.fluxcd.io/v1` `Kustomization`
//! resource, so the opaque spec payload never needs a generated type. Only
//! compiled with the `kubernetes` feature:
//!
//! ```toml
//! [dependencies]
//! slc-runtime = { version = "0.1", features = ["kubernetes"] }
//! ```

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, PostParams};
use kube::core::GroupVersionKind;

use crate::actions::{KustomizationObject, OrchestrationApi};
use crate::error::{Error, Result};

/// API group of the Kustomization resource.
pub const KUSTOMIZE_GROUP: &str = "kustomize.toolkit.fluxcd.io";

/// API version of the Kustomization resource.
pub const KUSTOMIZE_VERSION: &str = "v1";

/// Kind of the Kustomization resource.
pub const KUSTOMIZE_KIND: &str = "Kustomization";

/// An [`OrchestrationApi`] backed by a Kubernetes cluster.
#[derive(Clone)]
pub struct KubeOrchestration {
    client: kube::Client,
    resource: ApiResource,
}

impl std::fmt::Debug for KubeOrchestration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeOrchestration")
            .field("resource", &self.resource.kind)
            .finish_non_exhaustive()
    }
}

impl KubeOrchestration {
    /// Creates a new orchestration client over an existing Kubernetes
    /// client.
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        let gvk = GroupVersionKind::gvk(KUSTOMIZE_GROUP, KUSTOMIZE_VERSION, KUSTOMIZE_KIND);
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl OrchestrationApi for KubeOrchestration {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<KustomizationObject>> {
        match self.api(namespace).get(name).await {
            Ok(object) => Ok(Some(KustomizationObject {
                name: name.to_string(),
                namespace: namespace.to_string(),
                spec: object
                    .data
                    .get("spec")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            })),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(Error::orchestration(format!(
                "failed to get {KUSTOMIZE_KIND} {namespace}/{name}: {e}"
            ))),
        }
    }

    async fn create(&self, object: KustomizationObject) -> Result<()> {
        let mut dynamic =
            DynamicObject::new(&object.name, &self.resource).within(&object.namespace);
        dynamic.data = serde_json::json!({ "spec": object.spec });

        self.api(&object.namespace)
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| {
                Error::orchestration(format!(
                    "failed to create {KUSTOMIZE_KIND} {}/{}: {e}",
                    object.namespace, object.name
                ))
            })?;
        Ok(())
    }
}
