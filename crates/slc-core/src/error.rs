//! Error types for the contract domain.

/// The result type used throughout slc-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, compiling, or executing a contract.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A contract document failed structural validation.
    #[error("invalid contract schema: {message}")]
    ContractSchema {
        /// Description of the schema violation.
        message: String,
    },

    /// The state configuration cannot be compiled into a machine.
    #[error("invalid state configuration: {message}")]
    StateConfiguration {
        /// Description of what makes the configuration invalid.
        message: String,
    },

    /// A state name was looked up that the contract does not declare.
    #[error("state not found: {name}")]
    StateNotFound {
        /// The state name that was looked up.
        name: String,
    },

    /// A policy variable is missing its name or type.
    #[error("invalid policy variable: {name} (name and type must be specified)")]
    PolicyVariable {
        /// The offending variable name (may be empty).
        name: String,
    },

    /// A policy module failed to compile.
    #[error("policy compile error in {module}: {message}")]
    PolicyCompile {
        /// The policy module identifier.
        module: String,
        /// Description of the compilation failure.
        message: String,
    },

    /// A policy evaluation failed at runtime.
    #[error("policy evaluation error in {module}: {message}")]
    PolicyEval {
        /// The policy module identifier.
        module: String,
        /// Description of the evaluation failure.
        message: String,
    },

    /// A policy source could not be retrieved.
    #[error("failed to fetch policy {path}: {message}")]
    PolicyFetch {
        /// The policy path that was requested.
        path: String,
        /// Description of the retrieval failure.
        message: String,
    },

    /// A stream message header was missing or malformed in strict mode.
    #[error("malformed {header} header")]
    MalformedHeader {
        /// The header name.
        header: &'static str,
    },

    /// A trigger did not fire: no matching transition or a guard denied it.
    #[error("transition rejected in state {state} for trigger {trigger}")]
    TransitionRejected {
        /// The state the machine was in.
        state: String,
        /// The trigger that was fired.
        trigger: String,
    },

    /// A proposed transition is not legal for the current state.
    #[error("transition not valid: {message}")]
    TransitionInvalid {
        /// Description of why the transition is not legal.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new contract schema error.
    #[must_use]
    pub fn contract_schema(message: impl Into<String>) -> Self {
        Self::ContractSchema {
            message: message.into(),
        }
    }

    /// Creates a new state configuration error.
    #[must_use]
    pub fn state_configuration(message: impl Into<String>) -> Self {
        Self::StateConfiguration {
            message: message.into(),
        }
    }

    /// Creates a new policy compile error.
    #[must_use]
    pub fn policy_compile(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyCompile {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new policy evaluation error.
    #[must_use]
    pub fn policy_eval(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyEval {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new policy fetch error.
    #[must_use]
    pub fn policy_fetch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyFetch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new transition invalid error.
    #[must_use]
    pub fn transition_invalid(message: impl Into<String>) -> Self {
        Self::TransitionInvalid {
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display() {
        let err = Error::contract_schema("name is required");
        assert!(err.to_string().contains("invalid contract schema"));
        assert!(err.to_string().contains("name is required"));
    }

    #[test]
    fn policy_errors_carry_module() {
        let err = Error::policy_compile("signing", "unexpected token");
        assert!(err.to_string().contains("signing"));

        let err = Error::policy_eval("signing", "type mismatch");
        assert!(err.to_string().contains("signing"));
    }

    #[test]
    fn transition_rejected_display() {
        let err = Error::TransitionRejected {
            state: "Draft".into(),
            trigger: "com.decombine.signature.sign".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Draft"));
        assert!(msg.contains("com.decombine.signature.sign"));
    }
}
