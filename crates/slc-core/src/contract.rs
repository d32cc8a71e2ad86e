//! Typed model of a Decombine Smart Legal Contract (SLC).
//!
//! A contract is a declarative document describing a named state machine:
//! its states, the events each state accepts, the policy conditions guarding
//! each transition, and the orchestration actions executed on state entry and
//! exit. The model is immutable after validation; the runtime shares it
//! read-only.
//!
//! Field names follow the document wire format (`camelCase`), so a contract
//! serialized by any conforming implementation parses here unchanged.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::CanonicalEvent;

/// The version of the SLC schema this crate understands.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// The definition of a Decombine Smart Legal Contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// The unique identifier (UUID) of the SLC. Typically assigned by the
    /// Network managing the SLC.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// The friendly name of the SLC.
    #[serde(default)]
    pub name: String,
    /// The version of the SLC schema (semver).
    #[serde(default)]
    pub version: String,
    /// The natural-language text of the SLC.
    #[serde(default)]
    pub text: ContractText,
    /// The Git source of the SLC definition.
    #[serde(default)]
    pub source: GitSource,
    /// The policy source backing transition conditions.
    #[serde(default)]
    pub policy: PolicySource,
    /// The state configuration dictating the state machine.
    #[serde(default)]
    pub state: StateConfiguration,
    /// The Network operating the SLC.
    #[serde(default)]
    pub network: Network,
    /// Runtime status of the SLC.
    #[serde(default)]
    pub status: Status,
}

/// A reference for remote authentication, authorization, and state management.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// The name of the Network, e.g. `decombine`.
    #[serde(default)]
    pub name: String,
    /// The API hostname of the Network, e.g. `api.decombine.com`.
    #[serde(default)]
    pub api: String,
    /// The informational URL of the Network.
    #[serde(default)]
    pub url: String,
    /// The URL of the event stream.
    #[serde(default)]
    pub event_url: String,
    /// The OIDC client ID of the Network.
    #[serde(default)]
    pub client_id: String,
    /// The OIDC relying-party issuer.
    #[serde(default)]
    pub issuer: String,
    /// The OIDC discovery endpoint.
    #[serde(default)]
    pub discovery_endpoint: String,
}

/// The natural-language text reference of a contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractText {
    /// Text URL of the Smart Legal Contract.
    #[serde(default)]
    pub url: String,
}

/// A named external text resource, e.g. a Concerto model or a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSource {
    /// Name of the text source.
    #[serde(default)]
    pub name: String,
    /// Kind of the text source, e.g. `concerto`, `markdown`, `pdf`.
    #[serde(default)]
    pub kind: String,
    /// URL of the resource.
    #[serde(default)]
    pub url: String,
}

/// A policy reference guarding a state transition.
///
/// A condition names a policy module, the query to evaluate against it, and
/// where the module source lives relative to [`PolicySource::directory`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Name of the condition (policy module identifier).
    #[serde(default)]
    pub name: String,
    /// The policy query expression, e.g. `data.policy.allow`.
    #[serde(default)]
    pub value: String,
    /// Path to the policy source, relative to the policy directory.
    #[serde(default)]
    pub path: String,
}

/// A Git repository source for a contract definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// The type of the source.
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub source_type: String,
    /// The URL of the Git repository.
    #[serde(default)]
    pub url: String,
    /// The branch of the Git repository.
    #[serde(default)]
    pub branch: String,
    /// The path to the contract definition file.
    #[serde(default)]
    pub path: String,
}

/// The source of the policy modules referenced by conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySource {
    /// The branch of the policy repository.
    #[serde(default)]
    pub branch: String,
    /// The directory containing the policy modules.
    #[serde(default)]
    pub directory: String,
    /// The URL of the policy repository.
    #[serde(default)]
    pub url: String,
}

/// A configured state of a contract, based on the UML state machine model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// The name of the state.
    #[serde(default)]
    pub name: String,
    /// Actions executed when the state is entered.
    #[serde(default)]
    pub entry: Action,
    /// Actions executed when the state is exited.
    #[serde(default)]
    pub exit: Action,
    /// Variables associated with the state, substituted into policy sources.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Transitions possible from this state.
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// A named value substituted into policy source text before compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Name of the variable. `$Name` tokens in policy text are replaced.
    #[serde(default)]
    pub name: String,
    /// The type of the variable, e.g. `string`, `int`, `bool`.
    #[serde(default, rename = "type")]
    pub value_type: String,
    /// Default value of the variable.
    #[serde(default)]
    pub default: String,
    /// Reference to a specific source populating the variable.
    #[serde(default, rename = "ref")]
    pub reference: String,
    /// Kind is a string value representing the REST resource of the object.
    #[serde(default)]
    pub kind: String,
}

/// The collection of states defining the state machine of a contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfiguration {
    /// The initial state of the contract.
    #[serde(default)]
    pub initial: String,
    /// The URL of the state configuration.
    #[serde(default)]
    pub url: String,
    /// The states comprising the contract.
    #[serde(default)]
    pub states: Vec<State>,
}

/// A bundle of orchestration objects dispatched on state entry or exit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// The type of the action.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    /// Kubernetes orchestration objects to reconcile.
    #[serde(default, rename = "kubernetesAction", skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_actions: Vec<KubernetesAction>,
}

/// A single Kustomization handed off to the cluster controller.
///
/// The spec payload is opaque to the runtime; it is forwarded to the
/// orchestration API unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesAction {
    /// Object name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Object namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// The Kustomization spec, forwarded opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomization_spec: Option<serde_json::Value>,
}

/// A change from one state to another, triggered by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// The name of the transition.
    #[serde(default)]
    pub name: String,
    /// The state the transition leads to.
    #[serde(default)]
    pub to: String,
    /// The event type that triggers the transition.
    #[serde(default)]
    pub on: String,
    /// Guard conditions that must all be satisfied for the transition to fire.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Runtime status of a contract, maintained by the operating runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The current state of the contract.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_state: String,
    /// The source state of the contract.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_state: String,
    /// The policy state of the contract.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_state: String,
    /// The workload state of the contract.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workload_state: String,
}

impl Contract {
    /// Returns the declared state with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateNotFound`] when the contract does not declare
    /// a state with that name.
    pub fn state(&self, name: &str) -> Result<&State> {
        self.state
            .states
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::StateNotFound { name: name.into() })
    }

    /// Returns the variables of the named state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateNotFound`] when the contract does not declare
    /// a state with that name.
    pub fn variables(&self, name: &str) -> Result<&[Variable]> {
        Ok(&self.state(name)?.variables)
    }

    /// Returns every event type registered by a transition, in declaration
    /// order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.state
            .states
            .iter()
            .flat_map(|s| s.transitions.iter().map(|t| t.on.clone()))
            .collect()
    }

    /// Returns true when the event's type is registered by some transition.
    #[must_use]
    pub fn is_event_registered(&self, event: &CanonicalEvent) -> bool {
        self.state
            .states
            .iter()
            .flat_map(|s| &s.transitions)
            .any(|t| t.on == event.event_type)
    }
}

/// Recursively extracts every JSON object carrying a `$class` key from a
/// Concerto payload.
///
/// Concerto serializes typed models as JSON objects tagged with their fully
/// qualified class name under `$class`; this walks arrays and nested objects
/// and returns each tagged object in document order.
#[must_use]
pub fn extract_concerto_objects(
    payload: &serde_json::Value,
) -> Vec<serde_json::Map<String, serde_json::Value>> {
    let mut results = Vec::new();
    collect_concerto_objects(payload, &mut results);
    results
}

fn collect_concerto_objects(
    value: &serde_json::Value,
    results: &mut Vec<serde_json::Map<String, serde_json::Value>>,
) {
    match value {
        serde_json::Value::Object(map) => {
            if map.contains_key("$class") {
                results.push(map.clone());
            }
            for nested in map.values() {
                collect_concerto_objects(nested, results);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_concerto_objects(item, results);
            }
        }
        _ => {}
    }
}
