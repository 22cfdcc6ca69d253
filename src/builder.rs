//! Fluent configuration surface for state machines
//!
//! [`StateMachine::configure`] hands out a [`StateConfiguration`] bound
//! to one state's node. Every method is a pure registration call that
//! returns the handle for chaining; rules are validated lazily when
//! triggers fire, not here. The one exception is
//! [`StateConfiguration::super_state`], which rejects a direct
//! two-state cycle at configuration time.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use futures_core::future::BoxFuture;

use crate::error::{ActionResult, Error};
use crate::state::{ContinuationEffect, ContinuationRule, Outcome, StateNode, TriggerRule};
use crate::StateMachine;

/// Fluent handle for configuring one state.
pub struct StateConfiguration<'a, S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Hash + Eq + Clone + Send + Debug + 'static,
{
    machine: &'a mut StateMachine<S, T>,
    state: S,
}

impl<S, T> Debug for StateConfiguration<'_, S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Hash + Eq + Clone + Send + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateConfiguration")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a, S, T> StateConfiguration<'a, S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Hash + Eq + Clone + Send + Debug + 'static,
{
    pub(crate) fn new(machine: &'a mut StateMachine<S, T>, state: S) -> Self {
        Self { machine, state }
    }

    fn node(&mut self) -> &mut StateNode<S, T> {
        self.machine.node_mut(self.state.clone())
    }

    /// Permit a trigger, transitioning to `destination` when fired.
    pub fn permit(self, trigger: T, destination: S) -> Self {
        self.permit_if(trigger, destination, || true)
    }

    /// Permit a trigger only while `guard` evaluates true.
    pub fn permit_if<G>(mut self, trigger: T, destination: S, guard: G) -> Self
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        self.node().add_trigger(TriggerRule {
            trigger,
            destination: Some(destination),
            guard: Box::new(guard),
        });
        self
    }

    /// Recognize a trigger but do nothing when it fires.
    pub fn ignore(self, trigger: T) -> Self {
        self.ignore_if(trigger, || true)
    }

    /// Recognize-and-discard a trigger only while `guard` evaluates true.
    pub fn ignore_if<G>(mut self, trigger: T, guard: G) -> Self
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        self.node().add_trigger(TriggerRule {
            trigger,
            destination: None,
            guard: Box::new(guard),
        });
        self
    }

    /// Automatically fire `trigger` after a transition into this state
    /// resolves with `outcome`.
    pub fn continue_on(self, outcome: Outcome, trigger: T) -> Self {
        self.continue_on_if(outcome, trigger, || true)
    }

    /// Guarded form of [`StateConfiguration::continue_on`].
    pub fn continue_on_if<G>(mut self, outcome: Outcome, trigger: T, guard: G) -> Self
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        self.node().add_continuation(ContinuationRule {
            outcome,
            trigger,
            guard: Box::new(guard),
        });
        self
    }

    /// Run a side-effect whenever a continuation fires for `outcome`.
    /// Effects run before the chained trigger, in registration order,
    /// and are not guarded.
    pub fn continue_effect<F>(mut self, outcome: Outcome, effect: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.node().add_continuation_effect(ContinuationEffect {
            outcome,
            effect: Box::new(effect),
        });
        self
    }

    /// Run an action each time this state is entered.
    pub fn entry_action<F>(mut self, action: F) -> Self
    where
        F: FnMut() -> ActionResult + Send + 'static,
    {
        self.node().add_entry_action(Box::new(action));
        self
    }

    /// Run an action each time this state is exited.
    pub fn exit_action<F>(mut self, action: F) -> Self
    where
        F: FnMut() -> ActionResult + Send + 'static,
    {
        self.node().add_exit_action(Box::new(action));
        self
    }

    /// Await an asynchronous action each time this state is entered.
    /// A state carrying any async action can only be driven through
    /// [`StateMachine::fire_async`].
    pub fn async_entry_action<F, Fut>(mut self, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.node()
            .add_async_entry_action(Box::new(move || -> BoxFuture<'static, ActionResult> {
                Box::pin(action())
            }));
        self
    }

    /// Await an asynchronous action each time this state is exited.
    pub fn async_exit_action<F, Fut>(mut self, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.node()
            .add_async_exit_action(Box::new(move || -> BoxFuture<'static, ActionResult> {
                Box::pin(action())
            }));
        self
    }

    /// Make this state a descendant of `super_state`: triggers the
    /// superstate permits apply here too, unless shadowed by a rule of
    /// this state's own.
    ///
    /// # Errors
    /// [`Error::CyclicSuperState`] when `super_state`'s own superstate
    /// is this state. The check is deliberately shallow; cycles through
    /// three or more states are the caller's responsibility.
    pub fn super_state(mut self, super_state: S) -> Result<Self, Error<S, T>> {
        let grandparent = self.machine.node_mut(super_state.clone()).super_state();
        if grandparent == Some(&self.state) {
            return Err(Error::CyclicSuperState {
                state: self.state.clone(),
                super_state,
            });
        }
        self.node().set_super_state(super_state);
        Ok(self)
    }
}
