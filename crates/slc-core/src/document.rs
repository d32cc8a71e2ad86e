//! Contract document parsing and validation.
//!
//! Contract documents are accepted as JSON, YAML, or TOML, detected by path
//! suffix. Parsing is followed by validation: structural checks on required
//! fields plus referential checks across the state configuration. A contract
//! returned from this module is safe to hand to the machine builder.

use std::collections::HashSet;

use crate::contract::Contract;
use crate::error::{Error, Result};

/// The document formats a contract can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFormat {
    /// JSON (`.json`).
    Json,
    /// YAML (`.yaml`).
    Yaml,
    /// TOML (`.toml`).
    Toml,
}

impl ContractFormat {
    /// Detects the format from a path suffix.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".json") {
            Some(Self::Json)
        } else if path.ends_with(".yaml") {
            Some(Self::Yaml)
        } else if path.ends_with(".toml") {
            Some(Self::Toml)
        } else {
            None
        }
    }
}

/// Parses and validates a contract document in the given format.
///
/// # Errors
///
/// Returns [`Error::ContractSchema`] when the document does not parse or
/// fails validation.
pub fn parse_contract(input: &[u8], format: ContractFormat) -> Result<Contract> {
    let contract = match format {
        ContractFormat::Json => serde_json::from_slice(input)
            .map_err(|e| Error::contract_schema(format!("cannot unmarshal contract json: {e}")))?,
        ContractFormat::Yaml => serde_yaml::from_slice(input)
            .map_err(|e| Error::contract_schema(format!("cannot unmarshal contract yaml: {e}")))?,
        ContractFormat::Toml => {
            let text = std::str::from_utf8(input).map_err(|e| {
                Error::contract_schema(format!("cannot unmarshal contract toml: {e}"))
            })?;
            toml::from_str(text).map_err(|e| {
                Error::contract_schema(format!("cannot unmarshal contract toml: {e}"))
            })?
        }
    };
    validate_contract(&contract)?;
    Ok(contract)
}

/// Validates a contract against the document schema.
///
/// Structural requirements: non-empty `name`, semver `version`, non-empty
/// `state.initial`, valid `state.url`, at least one state, and a valid
/// `policy.url`. Referential requirements: unique state names, the initial
/// state declared, every transition naming a declared target with a
/// non-empty trigger, and no duplicate `(from, on, to)` triples.
///
/// # Errors
///
/// Returns [`Error::ContractSchema`] describing the first violation found.
pub fn validate_contract(contract: &Contract) -> Result<()> {
    if contract.name.is_empty() {
        return Err(Error::contract_schema("name is required"));
    }
    semver::Version::parse(&contract.version)
        .map_err(|e| Error::contract_schema(format!("version must be semver: {e}")))?;

    if contract.state.initial.is_empty() {
        return Err(Error::contract_schema("state.initial is required"));
    }
    url::Url::parse(&contract.state.url)
        .map_err(|e| Error::contract_schema(format!("state.url must be a valid URL: {e}")))?;
    url::Url::parse(&contract.policy.url)
        .map_err(|e| Error::contract_schema(format!("policy.url must be a valid URL: {e}")))?;

    let states = &contract.state.states;
    if states.is_empty() {
        return Err(Error::contract_schema("state.states requires at least one state"));
    }

    let mut names = HashSet::new();
    for state in states {
        if state.name.is_empty() {
            return Err(Error::contract_schema("state name is required"));
        }
        if !names.insert(state.name.as_str()) {
            return Err(Error::contract_schema(format!(
                "duplicate state name: {}",
                state.name
            )));
        }
    }

    if !names.contains(contract.state.initial.as_str()) {
        return Err(Error::contract_schema(format!(
            "initial state {} is not declared",
            contract.state.initial
        )));
    }

    let mut triples = HashSet::new();
    for state in states {
        for transition in &state.transitions {
            if transition.name.is_empty() {
                return Err(Error::contract_schema(format!(
                    "transition in state {} requires a name",
                    state.name
                )));
            }
            if transition.on.is_empty() {
                return Err(Error::contract_schema(format!(
                    "transition {} requires an event type",
                    transition.name
                )));
            }
            if !names.contains(transition.to.as_str()) {
                return Err(Error::contract_schema(format!(
                    "transition {} targets undeclared state {}",
                    transition.name, transition.to
                )));
            }
            if !triples.insert((state.name.as_str(), transition.on.as_str(), transition.to.as_str()))
            {
                return Err(Error::contract_schema(format!(
                    "duplicate transition ({}, {}, {})",
                    state.name, transition.on, transition.to
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_OK_YAML: &str = r#"
name: minimal_ok
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
      transitions:
        - name: sign
          to: Signed
          "on": com.decombine.signature.sign
    - name: Signed
      transitions: []
"#;

    fn minimal_contract() -> Contract {
        parse_contract(MINIMAL_OK_YAML.as_bytes(), ContractFormat::Yaml).expect("parses")
    }

    #[test]
    fn format_detection_by_suffix() {
        assert_eq!(
            ContractFormat::from_path("contract.json"),
            Some(ContractFormat::Json)
        );
        assert_eq!(
            ContractFormat::from_path("contract.yaml"),
            Some(ContractFormat::Yaml)
        );
        assert_eq!(
            ContractFormat::from_path("contract.toml"),
            Some(ContractFormat::Toml)
        );
        assert_eq!(ContractFormat::from_path("contract.txt"), None);
    }

    #[test]
    fn minimal_yaml_contract_parses() {
        let contract = minimal_contract();
        assert_eq!(contract.name, "minimal_ok");
        assert_eq!(contract.state.initial, "Draft");
        assert_eq!(contract.state.states.len(), 2);
    }

    #[test]
    fn contracts_round_trip_across_formats() {
        let contract = minimal_contract();

        let json = serde_json::to_vec(&contract).expect("to json");
        let from_json = parse_contract(&json, ContractFormat::Json).expect("from json");
        assert_eq!(from_json, contract);

        let yaml = serde_yaml::to_string(&contract).expect("to yaml");
        let from_yaml =
            parse_contract(yaml.as_bytes(), ContractFormat::Yaml).expect("from yaml");
        assert_eq!(from_yaml, contract);

        let toml = toml::to_string(&contract).expect("to toml");
        let from_toml =
            parse_contract(toml.as_bytes(), ContractFormat::Toml).expect("from toml");
        assert_eq!(from_toml, contract);
    }

    #[test]
    fn missing_name_is_rejected() {
        let mut contract = minimal_contract();
        contract.name.clear();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn non_semver_version_is_rejected() {
        let mut contract = minimal_contract();
        contract.version = "one".into();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("semver"));
    }

    #[test]
    fn undeclared_initial_state_is_rejected() {
        let mut contract = minimal_contract();
        contract.state.initial = "Nonexistent".into();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("Nonexistent"));
    }

    #[test]
    fn transition_to_undeclared_state_is_rejected() {
        let mut contract = minimal_contract();
        contract.state.states[0].transitions[0].to = "Missing".into();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("undeclared state"));
    }

    #[test]
    fn empty_trigger_is_rejected() {
        let mut contract = minimal_contract();
        contract.state.states[0].transitions[0].on.clear();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("event type"));
    }

    #[test]
    fn duplicate_transition_triple_is_rejected() {
        let mut contract = minimal_contract();
        let duplicate = contract.state.states[0].transitions[0].clone();
        contract.state.states[0].transitions.push(duplicate);
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("duplicate transition"));
    }

    #[test]
    fn invalid_policy_url_is_rejected() {
        let mut contract = minimal_contract();
        contract.policy.url = "not a url".into();
        let err = validate_contract(&contract).expect_err("must fail");
        assert!(err.to_string().contains("policy.url"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = parse_contract(b"{not json", ContractFormat::Json).expect_err("must fail");
        assert!(matches!(err, Error::ContractSchema { .. }));
    }
}
