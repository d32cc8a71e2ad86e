//! # slc-runtime
//!
//! Event-driven reconciler runtime for Decombine Smart Legal Contracts.
//!
//! This crate wires the `slc-core` contract machinery to the outside world:
//!
//! - **Stream Adapter**: durable pull consumption and publishing over
//!   JetStream, behind a backend-agnostic trait
//! - **CloudEvents Receiver**: inbound events over the HTTP protocol binding
//! - **Action Reconciler**: create-if-absent dispatch of Kustomizations to
//!   the orchestration plane
//! - **Reconciler**: the per-contract event loop coordinating all of it
//! - **Sources**: contract and policy retrieval from the filesystem or a
//!   Git host
//! - **Network**: OAuth2 JWT-profile authenticated HTTP clients
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use slc_core::machine::StateMachine;
//! use slc_runtime::error::Result;
//! use slc_runtime::reconciler::{Reconciler, ReconcilerConfig};
//! use slc_runtime::sources::{contract_from_path, FsPolicyStore};
//! use slc_runtime::stream::{nats, StreamOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<()> {
//! let contract = Arc::new(contract_from_path("contract.yaml")?);
//! let policies = Arc::new(FsPolicyStore::new("./policies"));
//! let machine = StateMachine::build(&contract, &contract.state.initial, policies)?;
//!
//! let config = ReconcilerConfig::default();
//! let (stream, source) =
//!     nats::connect(&contract, StreamOptions::new(), config.max_messages).await?;
//!
//! let reconciler = Reconciler::new(
//!     contract,
//!     machine,
//!     Arc::new(stream),
//!     Box::new(source),
//!     config,
//! );
//! reconciler.start(CancellationToken::new()).await
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod actions;
pub mod error;
pub mod network;
pub mod receiver;
pub mod reconciler;
pub mod sources;
pub mod stream;

#[cfg(feature = "kubernetes")]
pub mod kubernetes;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::actions::{
        reconcile_action, InMemoryOrchestration, KustomizationObject, OrchestrationApi,
    };
    pub use crate::error::{Error, Result};
    pub use crate::receiver::ReceiverConfig;
    pub use crate::reconciler::{Reconciler, ReconcilerConfig};
    pub use crate::sources::{
        contract_from_git, contract_from_path, FsPolicyStore, GitHubClient, GitPolicyStore,
    };
    pub use crate::stream::{
        format_consumer_name, EventStream, MessageSource, PublishAck, StreamMessage,
        StreamOptions,
    };
}

// Re-export key types at crate root for ergonomics
pub use actions::{InMemoryOrchestration, KustomizationObject, OrchestrationApi};
pub use error::{Error, Result};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use stream::{format_consumer_name, EventStream, MessageSource, StreamOptions};
