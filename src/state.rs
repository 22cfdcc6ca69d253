//! Per-state rule storage: trigger rules, continuation rules, and
//! entry/exit actions in their registered order.

use std::fmt::Debug;
use std::hash::Hash;

use futures_core::future::BoxFuture;

use crate::error::{ActionResult, Error};

/// Zero-argument predicate gating a trigger or continuation rule.
pub type Guard = Box<dyn Fn() -> bool + Send + Sync>;

/// Synchronous entry/exit action.
pub type Action = Box<dyn FnMut() -> ActionResult + Send>;

/// Asynchronous entry/exit action.
pub type AsyncAction = Box<dyn FnMut() -> BoxFuture<'static, ActionResult> + Send>;

/// Side-effect run when a continuation fires. Effects cannot fail.
pub type Effect = Box<dyn FnMut() + Send>;

/// How the action phase of a transition resolved.
///
/// Selects which continuation rules and effects apply once a transition
/// has run its exit and entry actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// All exit and entry actions completed
    Succeed,
    /// An exit or entry action returned an error
    Fail,
}

/// One permitted (or explicitly ignored) trigger for a state.
pub(crate) struct TriggerRule<S, T> {
    pub(crate) trigger: T,
    /// `None` models an ignore rule: the trigger is consumed but inert.
    pub(crate) destination: Option<S>,
    pub(crate) guard: Guard,
}

impl<S, T> TriggerRule<S, T> {
    pub(crate) fn allows_transition(&self) -> bool {
        self.destination.is_some()
    }
}

/// An automatic follow-on trigger, selected by transition outcome.
pub(crate) struct ContinuationRule<T> {
    pub(crate) outcome: Outcome,
    pub(crate) trigger: T,
    pub(crate) guard: Guard,
}

/// A side-effect tied to a continuation outcome. Unconditional: guards
/// do not apply to effects.
pub(crate) struct ContinuationEffect {
    pub(crate) outcome: Outcome,
    pub(crate) effect: Effect,
}

/// Everything the machine knows about one state: its rules, actions,
/// and optional superstate.
///
/// Nodes are created once per identifier on first reference and only
/// ever accrete configuration; nothing is removed or replaced.
pub(crate) struct StateNode<S, T> {
    id: S,
    super_state: Option<S>,
    triggers: Vec<TriggerRule<S, T>>,
    continuations: Vec<ContinuationRule<T>>,
    continuation_effects: Vec<ContinuationEffect>,
    entry_actions: Vec<Action>,
    exit_actions: Vec<Action>,
    async_entry_actions: Vec<AsyncAction>,
    async_exit_actions: Vec<AsyncAction>,
}

impl<S, T> StateNode<S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Eq + Clone + Send + Debug + 'static,
{
    pub(crate) fn new(id: S) -> Self {
        Self {
            id,
            super_state: None,
            triggers: Vec::new(),
            continuations: Vec::new(),
            continuation_effects: Vec::new(),
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            async_entry_actions: Vec::new(),
            async_exit_actions: Vec::new(),
        }
    }

    pub(crate) fn super_state(&self) -> Option<&S> {
        self.super_state.as_ref()
    }

    pub(crate) fn set_super_state(&mut self, super_state: S) {
        self.super_state = Some(super_state);
    }

    pub(crate) fn add_trigger(&mut self, rule: TriggerRule<S, T>) {
        self.triggers.push(rule);
    }

    pub(crate) fn add_continuation(&mut self, rule: ContinuationRule<T>) {
        self.continuations.push(rule);
    }

    pub(crate) fn add_continuation_effect(&mut self, effect: ContinuationEffect) {
        self.continuation_effects.push(effect);
    }

    pub(crate) fn add_entry_action(&mut self, action: Action) {
        self.entry_actions.push(action);
    }

    pub(crate) fn add_exit_action(&mut self, action: Action) {
        self.exit_actions.push(action);
    }

    pub(crate) fn add_async_entry_action(&mut self, action: AsyncAction) {
        self.async_entry_actions.push(action);
    }

    pub(crate) fn add_async_exit_action(&mut self, action: AsyncAction) {
        self.async_exit_actions.push(action);
    }

    /// Find the single trigger rule whose guard currently holds.
    ///
    /// Two simultaneously-true rules for the same trigger are a
    /// configuration defect, reported lazily at resolution time. Does
    /// not consult the superstate; the machine walks parents itself.
    pub(crate) fn matching_trigger(
        &self,
        trigger: &T,
    ) -> Result<Option<&TriggerRule<S, T>>, Error<S, T>> {
        let mut found = None;
        for rule in &self.triggers {
            if rule.trigger != *trigger || !(rule.guard)() {
                continue;
            }
            if found.is_some() {
                return Err(Error::AmbiguousTrigger {
                    state: self.id.clone(),
                    trigger: trigger.clone(),
                });
            }
            found = Some(rule);
        }
        Ok(found)
    }

    /// Find the single continuation for an outcome whose guard holds.
    ///
    /// Continuations are local to the exact state reached, never
    /// inherited from a superstate.
    pub(crate) fn matching_continuation(
        &self,
        outcome: Outcome,
    ) -> Result<Option<&ContinuationRule<T>>, Error<S, T>> {
        let mut found = None;
        for rule in &self.continuations {
            if rule.outcome != outcome || !(rule.guard)() {
                continue;
            }
            if found.is_some() {
                return Err(Error::AmbiguousContinuation {
                    state: self.id.clone(),
                    outcome,
                });
            }
            found = Some(rule);
        }
        Ok(found)
    }

    /// Run every effect registered for the outcome, in insertion order.
    pub(crate) fn run_continuation_effects(&mut self, outcome: Outcome) {
        for entry in &mut self.continuation_effects {
            if entry.outcome == outcome {
                (entry.effect)();
            }
        }
    }

    /// Run the synchronous entry actions. Rejects if any async entry
    /// action is registered, so async work is never silently skipped.
    pub(crate) fn enter(&mut self) -> Result<(), Error<S, T>> {
        if !self.async_entry_actions.is_empty() {
            return Err(Error::InvalidMode {
                state: self.id.clone(),
            });
        }
        for action in &mut self.entry_actions {
            action().map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run the synchronous exit actions. Rejects if any async exit
    /// action is registered.
    pub(crate) fn exit(&mut self) -> Result<(), Error<S, T>> {
        if !self.async_exit_actions.is_empty() {
            return Err(Error::InvalidMode {
                state: self.id.clone(),
            });
        }
        for action in &mut self.exit_actions {
            action().map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run synchronous entry actions in order, then await each async
    /// entry action in order. The two families never interleave.
    pub(crate) async fn enter_async(&mut self) -> Result<(), Error<S, T>> {
        for action in &mut self.entry_actions {
            action().map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        for action in &mut self.async_entry_actions {
            action().await.map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Async counterpart of [`StateNode::exit`].
    pub(crate) async fn exit_async(&mut self) -> Result<(), Error<S, T>> {
        for action in &mut self.exit_actions {
            action().map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        for action in &mut self.async_exit_actions {
            action().await.map_err(|source| Error::Action {
                state: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
