//! # slc-core
//!
//! Core abstractions for executing Decombine Smart Legal Contracts (SLCs).
//!
//! An SLC is a declarative document describing a named state machine whose
//! transitions are gated by externally authored Rego policies and whose
//! state changes trigger orchestration actions. This crate provides:
//!
//! - **Contract Model**: the typed document and its validation
//! - **Policy Evaluation**: variable substitution, compilation, and guarded
//!   evaluation of Rego conditions
//! - **State Machine**: an executable machine compiled from a contract,
//!   positioned at any declared state for recovery
//! - **Canonical Events**: CloudEvents v1.0 envelopes and normalization of
//!   raw stream messages
//!
//! The runtime half (durable stream, HTTP receiver, orchestration actions,
//! the reconciler loop) lives in `slc-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use slc_core::document::{parse_contract, ContractFormat};
//! use slc_core::machine::StateMachine;
//! use slc_core::policy::StaticPolicyStore;
//!
//! # fn main() -> slc_core::error::Result<()> {
//! let document = br#"{
//!     "name": "minimal_ok",
//!     "version": "0.1.0",
//!     "policy": {"url": "https://github.com/decombine/policies"},
//!     "state": {
//!         "initial": "Draft",
//!         "url": "https://example.com/state",
//!         "states": [{"name": "Draft", "transitions": []}]
//!     }
//! }"#;
//!
//! let contract = parse_contract(document, ContractFormat::Json)?;
//! let machine = StateMachine::build(
//!     &contract,
//!     &contract.state.initial,
//!     Arc::new(StaticPolicyStore::new()),
//! )?;
//! assert_eq!(machine.state(), "Draft");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod contract;
pub mod document;
pub mod error;
pub mod event;
pub mod machine;
pub mod observability;
pub mod policy;
pub mod transition;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::contract::{
        Action, Condition, Contract, KubernetesAction, Network, PolicySource, State,
        StateConfiguration, Status, Transition, Variable,
    };
    pub use crate::document::{parse_contract, validate_contract, ContractFormat};
    pub use crate::error::{Error, Result};
    pub use crate::event::{normalize, CanonicalEvent, HeaderPolicy};
    pub use crate::machine::{StateMachine, TransitionContext, TransitionRecord};
    pub use crate::policy::{PolicyStore, PreparedPolicy, StaticPolicyStore};
    pub use crate::transition::validate_transition;
}

// Re-export key types at crate root for ergonomics
pub use contract::{Contract, State, Transition};
pub use error::{Error, Result};
pub use event::CanonicalEvent;
pub use machine::{StateMachine, TransitionContext, TransitionRecord};
pub use observability::{init_logging, LogFormat};
pub use policy::{PolicyStore, StaticPolicyStore};
