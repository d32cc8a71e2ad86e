//! The guarded state machine compiled from a contract.
//!
//! [`StateMachine::build`] compiles a validated contract into an executable
//! machine positioned at an arbitrary declared state, which allows recovery
//! from stream replay: the machine starts where the caller says, not at the
//! contract's initial state.
//!
//! Each transition carries one guard per condition. A guard retrieves the
//! policy module through the [`PolicyStore`], compiles it with the source
//! state's variables, and evaluates it against the transition input. All
//! guards of a transition must allow for the transition to fire.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::event::CanonicalEvent;
use crate::policy::{PolicyStore, PreparedPolicy};

/// The input bundle passed through guard evaluation for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionContext {
    /// The JSON-decoded event payload.
    pub input: serde_json::Value,
}

impl Default for TransitionContext {
    fn default() -> Self {
        Self {
            input: serde_json::Value::String(String::new()),
        }
    }
}

impl TransitionContext {
    /// Creates a context carrying the given input.
    #[must_use]
    pub fn new(input: serde_json::Value) -> Self {
        Self { input }
    }

    /// Creates a context from an event's payload.
    #[must_use]
    pub fn from_event(event: &CanonicalEvent) -> Self {
        Self {
            input: event.data_value(),
        }
    }
}

/// A transition observed by the machine: source, destination, and trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    /// The state the machine left.
    pub from: String,
    /// The state the machine entered.
    pub to: String,
    /// The trigger that fired.
    pub trigger: String,
}

type GuardFn = Arc<dyn Fn(TransitionContext) -> BoxFuture<'static, Result<bool>> + Send + Sync>;
type HookFn = Arc<dyn Fn(TransitionRecord) -> BoxFuture<'static, ()> + Send + Sync>;

struct CompiledTransition {
    trigger: String,
    to: String,
    guards: Vec<GuardFn>,
}

/// A state machine with policy-guarded transitions.
pub struct StateMachine {
    current: String,
    transitions: HashMap<String, Vec<CompiledTransition>>,
    hooks: Vec<HookFn>,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("states", &self.transitions.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl StateMachine {
    /// Compiles a contract into a machine positioned at `current`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConfiguration`] when the contract declares no
    /// states or when the initial or current state is not declared.
    pub fn build(
        contract: &Contract,
        current: &str,
        policies: Arc<dyn PolicyStore>,
    ) -> Result<Self> {
        let states = &contract.state.states;
        if states.is_empty() {
            return Err(Error::state_configuration("no states found"));
        }

        let declared = |name: &str| states.iter().any(|s| s.name == name);
        if !declared(&contract.state.initial) || !declared(current) {
            return Err(Error::state_configuration(
                "initial or current state not found",
            ));
        }

        let mut transitions: HashMap<String, Vec<CompiledTransition>> = HashMap::new();
        for state in states {
            let compiled = state
                .transitions
                .iter()
                .map(|transition| CompiledTransition {
                    trigger: transition.on.clone(),
                    to: transition.to.clone(),
                    guards: transition
                        .conditions
                        .iter()
                        .map(|condition| {
                            // Bind the condition and the source state's
                            // variables by value; the guard must not observe
                            // later mutations of the iteration.
                            policy_guard(
                                Arc::clone(&policies),
                                condition.clone(),
                                state.variables.clone(),
                            )
                        })
                        .collect(),
                })
                .collect();
            transitions.insert(state.name.clone(), compiled);
        }

        Ok(Self {
            current: current.to_string(),
            transitions,
            hooks: Vec::new(),
        })
    }

    /// Returns the machine's current state name.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.current
    }

    /// Registers a hook invoked once per successful transition, before the
    /// state mutates.
    pub fn on_transitioning<F>(&mut self, hook: F)
    where
        F: Fn(TransitionRecord) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    /// Fires a trigger with the given input.
    ///
    /// Candidate transitions on the current state that share the trigger are
    /// attempted in declaration order; the first whose guards all allow
    /// fires. Hooks run exactly once per successful fire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransitionRejected`] when no candidate fires, or the
    /// guard's policy error when a guard fails to evaluate. A panic inside a
    /// guard is caught and reported as a policy evaluation error; it never
    /// propagates.
    pub async fn fire(
        &mut self,
        trigger: &str,
        ctx: &TransitionContext,
    ) -> Result<TransitionRecord> {
        let candidates: Vec<(String, Vec<GuardFn>)> = self
            .transitions
            .get(&self.current)
            .map(|transitions| {
                transitions
                    .iter()
                    .filter(|t| t.trigger == trigger)
                    .map(|t| (t.to.clone(), t.guards.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            return Err(Error::TransitionRejected {
                state: self.current.clone(),
                trigger: trigger.to_string(),
            });
        }

        for (to, guards) in candidates {
            if evaluate_guards(&guards, ctx).await? {
                let record = TransitionRecord {
                    from: self.current.clone(),
                    to: to.clone(),
                    trigger: trigger.to_string(),
                };
                for hook in &self.hooks {
                    hook(record.clone()).await;
                }
                self.current = to;
                return Ok(record);
            }
        }

        Err(Error::TransitionRejected {
            state: self.current.clone(),
            trigger: trigger.to_string(),
        })
    }

    /// Returns the triggers permitted from the current state under the given
    /// input: a trigger is permitted iff some transition carrying it has all
    /// guards allowing.
    ///
    /// A guard that fails to evaluate makes its transition not permitted; the
    /// failure is logged rather than surfaced, since enumeration is advisory.
    pub async fn permitted_triggers(&self, ctx: &TransitionContext) -> Vec<String> {
        let Some(transitions) = self.transitions.get(&self.current) else {
            return Vec::new();
        };

        let mut permitted = Vec::new();
        for transition in transitions {
            match evaluate_guards(&transition.guards, ctx).await {
                Ok(true) => {
                    if !permitted.contains(&transition.trigger) {
                        permitted.push(transition.trigger.clone());
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        trigger = %transition.trigger,
                        error = %err,
                        "guard evaluation failed while enumerating triggers"
                    );
                }
            }
        }
        permitted
    }
}

/// Evaluates all guards of one transition; every guard must allow.
///
/// Panics inside a guard are caught and reported as evaluation errors so a
/// misbehaving policy cannot tear down the reconciler.
async fn evaluate_guards(guards: &[GuardFn], ctx: &TransitionContext) -> Result<bool> {
    for guard in guards {
        let outcome = AssertUnwindSafe(guard(ctx.clone())).catch_unwind().await;
        match outcome {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Ok(false),
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::policy_eval("guard", "guard panicked during evaluation"));
            }
        }
    }
    Ok(true)
}

fn policy_guard(
    policies: Arc<dyn PolicyStore>,
    condition: crate::contract::Condition,
    variables: Vec<crate::contract::Variable>,
) -> GuardFn {
    Arc::new(move |ctx: TransitionContext| {
        let policies = Arc::clone(&policies);
        let condition = condition.clone();
        let variables = variables.clone();
        Box::pin(async move {
            let source = policies.fetch(&condition.path).await?;
            let mut policy =
                PreparedPolicy::prepare(&condition.name, &condition.value, &source, &variables)?;
            policy.eval(&ctx.input)
        })
    })
}
