//! Offline transition validation.
//!
//! [`validate_transition`] answers "would this transition be legal now?" for
//! callers outside the event loop, such as an API validating a request
//! before enqueueing it. It builds a fresh machine at the caller's current
//! state, checks the proposal against both the contract declaration and the
//! machine's permitted triggers, and fires it on success so the caller can
//! inspect the resulting state.

use std::sync::Arc;

use crate::contract::{Contract, Transition};
use crate::error::{Error, Result};
use crate::machine::{StateMachine, TransitionContext};
use crate::policy::PolicyStore;

/// Validates a proposed transition against the contract at `current`.
///
/// The proposal is legal when the current state declares a transition with
/// the proposed `(on, to)` pair and the machine lists the trigger as
/// permitted under the default input. When the caller sits at the contract's
/// initial state there is no event history to consult, so the declaration
/// check is the only source of truth; the permitted-trigger check still
/// applies for completeness.
///
/// # Errors
///
/// Returns [`Error::StateConfiguration`] when the machine cannot be built,
/// [`Error::StateNotFound`] when `current` is not declared, and
/// [`Error::TransitionInvalid`] when the proposal is not legal.
pub async fn validate_transition(
    current: &str,
    contract: &Contract,
    proposed: &Transition,
    policies: Arc<dyn PolicyStore>,
) -> Result<StateMachine> {
    let mut machine = StateMachine::build(contract, current, policies)?;
    let ctx = TransitionContext::default();

    let declared = contract
        .state(current)?
        .transitions
        .iter()
        .any(|t| t.on == proposed.on && t.to == proposed.to);
    let permitted = machine
        .permitted_triggers(&ctx)
        .await
        .iter()
        .any(|trigger| trigger == &proposed.on);

    if declared && permitted {
        machine.fire(&proposed.on, &ctx).await?;
        return Ok(machine);
    }

    Err(Error::transition_invalid(format!(
        "({}, {}) is not a legal transition from {current}",
        proposed.on, proposed.to
    )))
}
