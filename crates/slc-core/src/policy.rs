//! Policy compilation and evaluation for transition guards.
//!
//! Conditions reference Rego policy modules; this module prepares an
//! evaluable query from `(module, query, source, variables)` and evaluates it
//! against an event payload. The Rego runtime itself is embedded
//! ([`regorus`]), not implemented here.
//!
//! ## Variable substitution
//!
//! Before compilation, every `$Name` token in the module source is replaced
//! by the variable's default value. A token only matches when the following
//! character is not an identifier character, so `$NameFoo` is not rewritten
//! by a variable named `Name`. Substitutions are applied sequentially and
//! feed forward.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::contract::Variable;
use crate::error::{Error, Result};

/// A source of policy module text.
///
/// Implementations encapsulate where modules live (a local directory, a
/// remote Git repository); `path` is the condition's path relative to the
/// configured policy directory.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Retrieves the policy module source at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyFetch`] when the source cannot be retrieved.
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// An in-memory policy store, keyed by path.
///
/// Useful for tests and for callers that resolve policy sources ahead of
/// time.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyStore {
    policies: HashMap<String, String>,
}

impl StaticPolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a policy module under the given path.
    #[must_use]
    pub fn with_policy(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.policies.insert(path.into(), source.into());
        self
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn fetch(&self, path: &str) -> Result<String> {
        self.policies
            .get(path)
            .cloned()
            .ok_or_else(|| Error::policy_fetch(path, "no policy registered under this path"))
    }
}

/// Substitutes `$Name` tokens in a policy source with variable defaults.
///
/// # Errors
///
/// Returns [`Error::PolicyVariable`] when a variable has an empty name or
/// type.
pub fn substitute_variables(source: &str, variables: &[Variable]) -> Result<String> {
    let mut substituted = source.to_string();
    for variable in variables {
        if variable.name.is_empty() || variable.value_type.is_empty() {
            return Err(Error::PolicyVariable {
                name: variable.name.clone(),
            });
        }
        let token = format!("${}", variable.name);
        tracing::debug!(
            variable = %variable.name,
            value = %variable.default,
            "substituting policy variable"
        );
        substituted = replace_token(&substituted, &token, &variable.default);
    }
    Ok(substituted)
}

/// Replaces `token` with `value` wherever the token is not followed by an
/// identifier character.
fn replace_token(source: &str, token: &str, value: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(index) = rest.find(token) {
        let after = &rest[index + token.len()..];
        let at_boundary = after
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_');
        out.push_str(&rest[..index]);
        out.push_str(if at_boundary { value } else { token });
        rest = after;
    }
    out.push_str(rest);
    out
}

/// A compiled policy query, ready for repeated evaluation.
pub struct PreparedPolicy {
    module: String,
    query: String,
    engine: regorus::Engine,
}

impl std::fmt::Debug for PreparedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPolicy")
            .field("module", &self.module)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl PreparedPolicy {
    /// Prepares a policy query from a module source, substituting the given
    /// variables first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyVariable`] for malformed variables and
    /// [`Error::PolicyCompile`] when the module does not compile.
    pub fn prepare(
        module: &str,
        query: &str,
        source: &str,
        variables: &[Variable],
    ) -> Result<Self> {
        let source = substitute_variables(source, variables)?;
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(module.to_string(), source)
            .map_err(|e| Error::policy_compile(module, e.to_string()))?;
        Ok(Self {
            module: module.into(),
            query: query.into(),
            engine,
        })
    }

    /// Evaluates the query against the given input, returning whether the
    /// policy allows it.
    ///
    /// Runtime errors in the policy are surfaced rather than treated as a
    /// deny: they indicate a malformed policy, not a denied input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyEval`] when evaluation fails or the query does
    /// not produce a boolean.
    pub fn eval(&mut self, input: &serde_json::Value) -> Result<bool> {
        let encoded = serde_json::to_string(input)
            .map_err(|e| Error::serialization(format!("failed to encode policy input: {e}")))?;
        let value = regorus::Value::from_json_str(&encoded)
            .map_err(|e| Error::policy_eval(&self.module, e.to_string()))?;
        self.engine.set_input(value);
        self.engine
            .eval_bool_query(self.query.clone(), false)
            .map_err(|e| Error::policy_eval(&self.module, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN_POLICY: &str = r#"
package signing

default allow = false

allow = true {
    input.user == "admin"
}
"#;

    const THRESHOLD_POLICY: &str = r#"
package approval

default allow = false

allow = true {
    input.amount <= $Limit
}
"#;

    fn variable(name: &str, value_type: &str, default: &str) -> Variable {
        Variable {
            name: name.into(),
            value_type: value_type.into(),
            default: default.into(),
            ..Variable::default()
        }
    }

    #[test]
    fn allows_matching_input() {
        let mut policy =
            PreparedPolicy::prepare("signing", "data.signing.allow", ADMIN_POLICY, &[])
                .expect("compiles");

        let allowed = policy
            .eval(&serde_json::json!({"user": "admin"}))
            .expect("evaluates");
        assert!(allowed);
    }

    #[test]
    fn denies_non_matching_input() {
        let mut policy =
            PreparedPolicy::prepare("signing", "data.signing.allow", ADMIN_POLICY, &[])
                .expect("compiles");

        let allowed = policy
            .eval(&serde_json::json!({"user": "bob"}))
            .expect("evaluates");
        assert!(!allowed);
    }

    #[test]
    fn denies_default_input() {
        let mut policy =
            PreparedPolicy::prepare("signing", "data.signing.allow", ADMIN_POLICY, &[])
                .expect("compiles");

        let allowed = policy
            .eval(&serde_json::Value::String(String::new()))
            .expect("evaluates");
        assert!(!allowed);
    }

    #[test]
    fn substitution_rewrites_token() {
        let vars = vec![variable("Limit", "int", "100")];
        let mut policy =
            PreparedPolicy::prepare("approval", "data.approval.allow", THRESHOLD_POLICY, &vars)
                .expect("compiles");

        assert!(policy
            .eval(&serde_json::json!({"amount": 50}))
            .expect("evaluates"));
        assert!(!policy
            .eval(&serde_json::json!({"amount": 500}))
            .expect("evaluates"));
    }

    #[test]
    fn substitution_respects_identifier_boundary() {
        let vars = vec![variable("Name", "string", "replaced")];
        let source = "x := \"$Name\"\ny := \"$NameFoo\"";
        let substituted = substitute_variables(source, &vars).expect("substitutes");
        assert!(substituted.contains("\"replaced\""));
        assert!(substituted.contains("\"$NameFoo\""));
    }

    #[test]
    fn substitution_applies_sequentially() {
        let vars = vec![
            variable("A", "string", "$B"),
            variable("B", "string", "final"),
        ];
        let substituted = substitute_variables("value := \"$A\"", &vars).expect("substitutes");
        assert_eq!(substituted, "value := \"final\"");
    }

    #[test]
    fn substitution_rejects_unnamed_variable() {
        let vars = vec![variable("", "string", "x")];
        let err = substitute_variables("source", &vars).expect_err("must fail");
        assert!(matches!(err, Error::PolicyVariable { .. }));
    }

    #[test]
    fn substitution_rejects_untyped_variable() {
        let vars = vec![variable("Limit", "", "x")];
        let err = substitute_variables("source", &vars).expect_err("must fail");
        assert!(matches!(err, Error::PolicyVariable { .. }));
    }

    #[test]
    fn compile_error_surfaces() {
        let err = PreparedPolicy::prepare("broken", "data.broken.allow", "not rego at all {", &[])
            .expect_err("must fail");
        assert!(matches!(err, Error::PolicyCompile { .. }));
    }

    #[tokio::test]
    async fn static_store_round_trips() {
        let store = StaticPolicyStore::new().with_policy("signing/allow.rego", ADMIN_POLICY);

        let source = store.fetch("signing/allow.rego").await.expect("fetches");
        assert!(source.contains("package signing"));

        let err = store.fetch("missing.rego").await.expect_err("must fail");
        assert!(matches!(err, Error::PolicyFetch { .. }));
    }
}
