//! The state machine engine: trigger resolution with superstate
//! delegation, the synchronous and asynchronous firing drivers, and
//! continuation chaining.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::builder::StateConfiguration;
use crate::error::Error;
use crate::state::{Outcome, StateNode, TriggerRule};

/// Handle returned by [`StateMachine::observe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<S> = Box<dyn FnMut(&S) + Send>;

/// A runtime-configured finite state machine.
///
/// States and triggers are plain data: callers declare which triggers a
/// state permits or ignores, guard predicates, entry/exit actions, an
/// optional superstate, and continuations that chain further triggers
/// once a transition succeeds or fails. Nodes are created lazily on
/// first reference and only ever accrete configuration.
///
/// The machine is a single-owner value. Configuration and firing are
/// expected to be serialized by the caller; there is no internal
/// locking.
///
/// # Type Parameters
/// - `S`: State identifier. Must implement `Hash`, `Eq`, `Clone`,
///   `Send`, and `Debug`.
/// - `T`: Trigger identifier, with the same bounds.
pub struct StateMachine<S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Hash + Eq + Clone + Send + Debug + 'static,
{
    states: HashMap<S, StateNode<S, T>>,
    state: S,
    observers: Vec<(ObserverId, Observer<S>)>,
    next_observer: u64,
}

impl<S, T> StateMachine<S, T>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    T: Hash + Eq + Clone + Send + Debug + 'static,
{
    /// Create a machine sitting in `initial_state` with no rules.
    pub fn new(initial_state: S) -> Self {
        Self {
            states: HashMap::new(),
            state: initial_state,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// The state the machine is currently in.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Open a fluent configuration handle bound to one state's node,
    /// creating the node if this is its first reference.
    pub fn configure(&mut self, state: S) -> StateConfiguration<'_, S, T> {
        self.node_mut(state.clone());
        StateConfiguration::new(self, state)
    }

    /// Subscribe to current-state changes. The callback runs with the
    /// new state each time the value actually changes; assigning an
    /// equal value is a silent no-op.
    pub fn observe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&S) + Send + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    /// Whether the current state (or a superstate) has a rule for the
    /// trigger whose guard currently holds. Ignore rules count.
    ///
    /// # Errors
    /// [`Error::AmbiguousTrigger`] if more than one rule matches.
    pub fn can_fire(&self, trigger: &T) -> Result<bool, Error<S, T>> {
        Ok(self.resolve_trigger(trigger)?.is_some())
    }

    /// Whether the trigger is matched by an ignore rule: recognized as
    /// valid, but firing it produces no transition.
    ///
    /// # Errors
    /// [`Error::AmbiguousTrigger`] if more than one rule matches.
    pub fn is_ignored(&self, trigger: &T) -> Result<bool, Error<S, T>> {
        Ok(self
            .resolve_trigger(trigger)?
            .is_some_and(|rule| !rule.allows_transition()))
    }

    /// Fire a trigger, running exit and entry actions synchronously and
    /// chaining any configured continuations.
    ///
    /// One external call may traverse several states: after each hop
    /// the machine resolves a continuation for the hop's outcome on the
    /// node it currently sits in and, if one matches, runs that
    /// outcome's effects and fires the continuation's trigger as the
    /// next hop. An action error is captured once and either consumed
    /// by a matching `Fail` continuation or returned from this call.
    ///
    /// # Errors
    /// - [`Error::UnhandledTrigger`] when no rule (own or inherited)
    ///   matches a fired trigger.
    /// - [`Error::InvalidMode`] when a traversed node carries async
    ///   actions; use [`StateMachine::fire_async`] instead.
    /// - [`Error::Action`] for an uncontinued action failure.
    /// - [`Error::AmbiguousTrigger`] / [`Error::AmbiguousContinuation`]
    ///   on defective rule tables.
    pub fn fire(&mut self, trigger: T) -> Result<(), Error<S, T>> {
        let mut trigger = trigger;
        loop {
            let destination = match self.resolve_destination(trigger)? {
                Hop::Ignored => return Ok(()),
                Hop::Transition(destination) => destination,
            };

            let failure = match self.node_mut(self.state.clone()).exit() {
                Ok(()) => {
                    self.set_state(destination.clone());
                    self.node_mut(destination).enter().err()
                }
                // Exit failed: the state never changed and entry never ran.
                Err(err) => Some(err),
            };

            match self.next_hop(failure)? {
                Some(next) => trigger = next,
                None => return Ok(()),
            }
        }
    }

    /// Asynchronous counterpart of [`StateMachine::fire`].
    ///
    /// Each traversed node runs its synchronous actions first, in
    /// registered order, then awaits its asynchronous actions in
    /// registered order. Resolution and continuation chaining are
    /// identical to the synchronous driver. There is no timeout or
    /// cancellation: an action that never completes stalls the call.
    pub async fn fire_async(&mut self, trigger: T) -> Result<(), Error<S, T>> {
        let mut trigger = trigger;
        loop {
            let destination = match self.resolve_destination(trigger)? {
                Hop::Ignored => return Ok(()),
                Hop::Transition(destination) => destination,
            };

            let failure = match self.node_mut(self.state.clone()).exit_async().await {
                Ok(()) => {
                    self.set_state(destination.clone());
                    self.node_mut(destination).enter_async().await.err()
                }
                Err(err) => Some(err),
            };

            match self.next_hop(failure)? {
                Some(next) => trigger = next,
                None => return Ok(()),
            }
        }
    }

    /// Get or create the node for a state. The registry is append-only:
    /// a node is created exactly once per identifier and never removed.
    pub(crate) fn node_mut(&mut self, id: S) -> &mut StateNode<S, T> {
        self.states
            .entry(id)
            .or_insert_with_key(|id| StateNode::new(id.clone()))
    }

    /// Resolve a trigger against the current node, walking up the
    /// superstate chain while a node has no matching rule of its own.
    /// A state that shadows an inherited trigger with a guarded rule
    /// wins over its ancestors.
    fn resolve_trigger(&self, trigger: &T) -> Result<Option<&TriggerRule<S, T>>, Error<S, T>> {
        let mut cursor = Some(&self.state);
        while let Some(id) = cursor {
            let Some(node) = self.states.get(id) else {
                break;
            };
            if let Some(rule) = node.matching_trigger(trigger)? {
                return Ok(Some(rule));
            }
            cursor = node.super_state();
        }
        Ok(None)
    }

    /// Shared resolution step of both firing drivers.
    fn resolve_destination(&self, trigger: T) -> Result<Hop<S>, Error<S, T>> {
        match self.resolve_trigger(&trigger)? {
            None => Err(Error::UnhandledTrigger {
                state: self.state.clone(),
                trigger,
            }),
            Some(rule) => match &rule.destination {
                // Consumed but inert: no actions, no continuation check.
                None => Ok(Hop::Ignored),
                Some(destination) => Ok(Hop::Transition(destination.clone())),
            },
        }
    }

    /// Shared continuation step of both firing drivers.
    ///
    /// Resolves a continuation for the hop's outcome against whatever
    /// node the machine now sits in (the destination on success; still
    /// the source if its exit failed). A match runs the outcome's
    /// effects and yields the trigger for the next hop, consuming any
    /// captured failure; no match propagates the failure, exactly once.
    fn next_hop(&mut self, failure: Option<Error<S, T>>) -> Result<Option<T>, Error<S, T>> {
        let outcome = if failure.is_some() {
            Outcome::Fail
        } else {
            Outcome::Succeed
        };

        let continuation = match self.states.get(&self.state) {
            Some(node) => node
                .matching_continuation(outcome)?
                .map(|rule| rule.trigger.clone()),
            None => None,
        };

        match continuation {
            Some(next) => {
                if let Some(node) = self.states.get_mut(&self.state) {
                    node.run_continuation_effects(outcome);
                }
                Ok(Some(next))
            }
            None => match failure {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Assign the current state, notifying observers only on an actual
    /// change. All mutation flows through the firing protocol.
    fn set_state(&mut self, next: S) {
        if self.state == next {
            return;
        }
        self.state = next;
        for (_, observer) in &mut self.observers {
            observer(&self.state);
        }
    }
}

/// What a resolved trigger rule asks of the firing loop.
enum Hop<S> {
    /// Ignore rule matched: consume the trigger, change nothing.
    Ignored,
    /// Transition to this state.
    Transition(S),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    type Machine = StateMachine<&'static str, &'static str>;

    fn log_to(log: &Arc<Mutex<Vec<&'static str>>>, entry: &'static str) {
        log.lock().unwrap().push(entry);
    }

    #[test]
    fn configure_registers_trigger() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");

        assert!(sm.can_fire(&"t1").unwrap());
        assert!(!sm.can_fire(&"t2").unwrap());
    }

    #[test]
    fn false_guard_blocks_trigger() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit_if("t1", "s2", || false);

        assert!(!sm.can_fire(&"t1").unwrap());
    }

    #[test]
    fn ignore_counts_as_handled() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").ignore("t1");

        assert!(sm.can_fire(&"t1").unwrap());
        assert!(sm.is_ignored(&"t1").unwrap());
        assert!(!sm.is_ignored(&"t2").unwrap());
    }

    #[test]
    fn guarded_ignore_blocks_when_false() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").ignore_if("t1", || false);

        assert!(!sm.can_fire(&"t1").unwrap());
    }

    #[test]
    fn fire_moves_to_destination() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");

        assert_eq!(sm.state(), &"s1");
        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s2");
        // s2 does not permit t1 itself
        assert!(!sm.can_fire(&"t1").unwrap());
    }

    #[test]
    fn fire_ignored_trigger_keeps_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exit_log = Arc::clone(&log);

        let mut sm = Machine::new("s1");
        sm.configure("s1").ignore("t1").exit_action(move || {
            log_to(&exit_log, "exit:s1");
            Ok(())
        });

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s1");
        // the trigger is consumed but inert, no actions run
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unhandled_trigger_is_reported() {
        let mut sm = Machine::new("s1");

        let err = sm.fire("t1").unwrap_err();
        assert!(matches!(
            err,
            Error::UnhandledTrigger {
                state: "s1",
                trigger: "t1"
            }
        ));
        assert_eq!(sm.state(), &"s1");
    }

    #[test]
    fn ambiguous_trigger_is_a_configuration_error() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2").permit("t1", "s3");

        assert!(matches!(
            sm.can_fire(&"t1"),
            Err(Error::AmbiguousTrigger {
                state: "s1",
                trigger: "t1"
            })
        ));
        assert!(sm.fire("t1").is_err());
        assert_eq!(sm.state(), &"s1");
    }

    #[test]
    fn guards_disambiguate_rules_at_fire_time() {
        let take_high = Arc::new(AtomicBool::new(false));

        let mut sm = Machine::new("s1");
        let high = Arc::clone(&take_high);
        let low = Arc::clone(&take_high);
        sm.configure("s1")
            .permit_if("t1", "high", move || high.load(Ordering::SeqCst))
            .permit_if("t1", "low", move || !low.load(Ordering::SeqCst));

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"low");

        take_high.store(true, Ordering::SeqCst);
        let mut sm = Machine::new("s1");
        let high = Arc::clone(&take_high);
        let low = Arc::clone(&take_high);
        sm.configure("s1")
            .permit_if("t1", "high", move || high.load(Ordering::SeqCst))
            .permit_if("t1", "low", move || !low.load(Ordering::SeqCst));
        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"high");
    }

    #[test]
    fn exit_runs_before_entry_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exit_log = Arc::clone(&log);
        let entry_log = Arc::clone(&log);

        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2").exit_action(move || {
            log_to(&exit_log, "exit:s1");
            Ok(())
        });
        sm.configure("s2").entry_action(move || {
            log_to(&entry_log, "enter:s2");
            Ok(())
        });

        sm.fire("t1").unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["exit:s1", "enter:s2"]);
    }

    #[test]
    fn succeed_continuation_chains_in_one_call() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .permit("t2", "s3")
            .continue_on(Outcome::Succeed, "t2");

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s3");
    }

    #[test]
    fn continuation_effects_run_before_chained_hop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let effect_log = Arc::clone(&log);
        let fail_log = Arc::clone(&log);
        let entry_log = Arc::clone(&log);

        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .permit("t2", "s3")
            .continue_on(Outcome::Succeed, "t2")
            .continue_effect(Outcome::Succeed, move || log_to(&effect_log, "effect"))
            .continue_effect(Outcome::Fail, move || log_to(&fail_log, "fail-effect"));
        sm.configure("s3").entry_action(move || {
            log_to(&entry_log, "enter:s3");
            Ok(())
        });

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s3");
        // Fail effects must not run on a Succeed outcome
        assert_eq!(*log.lock().unwrap(), vec!["effect", "enter:s3"]);
    }

    #[test]
    fn fail_continuation_consumes_the_error() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .entry_action(|| Err("entry blew up".into()))
            .permit("t2", "s3")
            .continue_on(Outcome::Fail, "t2");

        // the error is rerouted, never reaching the caller
        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s3");
    }

    #[test]
    fn uncontinued_action_error_propagates_once() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2").entry_action(|| Err("entry blew up".into()));

        let err = sm.fire("t1").unwrap_err();
        assert!(matches!(err, Error::Action { state: "s2", .. }));
        // state had already changed before the entry actions ran
        assert_eq!(sm.state(), &"s2");
    }

    #[test]
    fn exit_failure_leaves_state_unchanged() {
        let mut sm = Machine::new("s1");
        sm.configure("s1")
            .permit("t1", "s2")
            .exit_action(|| Err("exit blew up".into()));

        let err = sm.fire("t1").unwrap_err();
        assert!(matches!(err, Error::Action { state: "s1", .. }));
        assert_eq!(sm.state(), &"s1");
    }

    #[test]
    fn exit_failure_reroutes_through_source_continuation() {
        // the exit action fails only on the first pass, so the Fail
        // continuation's recovery hop can leave the state
        let fired = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&fired);

        let mut sm = Machine::new("s1");
        sm.configure("s1")
            .permit("t1", "s2")
            .permit("recover", "safe")
            .exit_action(move || {
                if fired.swap(true, Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err("exit blew up".into())
                }
            })
            .continue_on(Outcome::Fail, "recover");

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"safe");
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn superstate_rules_apply_to_descendants() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2").super_state("s1").unwrap();

        assert!(sm.can_fire(&"t1").unwrap());
        sm.fire("t1").unwrap();
        // s2 inherits t1 from its superstate s1
        assert!(sm.can_fire(&"t1").unwrap());
        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s2");
    }

    #[test]
    fn own_rule_shadows_superstate_rule() {
        let mut sm = Machine::new("child");
        sm.configure("parent").permit("t1", "from-parent");
        sm.configure("child")
            .permit("t1", "from-child")
            .super_state("parent")
            .unwrap();

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"from-child");
    }

    #[test]
    fn direct_superstate_cycle_is_rejected() {
        let mut sm = Machine::new("a");
        sm.configure("a").super_state("b").unwrap();

        let err = sm.configure("b").super_state("a").unwrap_err();
        assert!(matches!(
            err,
            Error::CyclicSuperState {
                state: "b",
                super_state: "a"
            }
        ));
    }

    #[test]
    fn self_transition_runs_actions_without_notification() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exit_log = Arc::clone(&log);
        let entry_log = Arc::clone(&log);
        let notified = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&notified);

        let mut sm = Machine::new("s1");
        sm.configure("s1")
            .permit("t1", "s1")
            .exit_action(move || {
                log_to(&exit_log, "exit:s1");
                Ok(())
            })
            .entry_action(move || {
                log_to(&entry_log, "enter:s1");
                Ok(())
            });
        sm.observe(move |_| seen.store(true, Ordering::SeqCst));

        sm.fire("t1").unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["exit:s1", "enter:s1"]);
        assert!(!notified.load(Ordering::SeqCst));
    }

    #[test]
    fn observers_see_each_actual_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2").permit("t2", "s3");
        let id = sm.observe(move |state| sink.lock().unwrap().push(*state));

        sm.fire("t1").unwrap();
        sm.fire("t2").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["s2", "s3"]);

        assert!(sm.unobserve(id));
        assert!(!sm.unobserve(id));

        sm.configure("s3").permit("t3", "s1");
        sm.fire("t3").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["s2", "s3"]);
    }

    #[test]
    fn sync_fire_rejects_async_actions() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2").async_entry_action(|| async { Ok(()) });

        let err = sm.fire("t1").unwrap_err();
        assert!(matches!(err, Error::InvalidMode { state: "s2" }));
    }

    #[test]
    fn async_fire_runs_sync_actions_before_async_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync_log = Arc::clone(&log);
        let async_log = Arc::clone(&log);

        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .async_entry_action(move || {
                let log = Arc::clone(&async_log);
                async move {
                    log.lock().unwrap().push("async-enter:s2");
                    Ok(())
                }
            })
            .entry_action(move || {
                log_to(&sync_log, "enter:s2");
                Ok(())
            });

        tokio_test::block_on(sm.fire_async("t1")).unwrap();
        assert_eq!(sm.state(), &"s2");
        assert_eq!(*log.lock().unwrap(), vec!["enter:s2", "async-enter:s2"]);
    }

    #[tokio::test]
    async fn async_fail_continuation_consumes_the_error() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .async_entry_action(|| async { Err("async entry blew up".into()) })
            .permit("t2", "s3")
            .continue_on(Outcome::Fail, "t2");

        sm.fire_async("t1").await.unwrap();
        assert_eq!(sm.state(), &"s3");
    }

    #[test]
    fn ambiguous_continuation_is_a_configuration_error() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .permit("t2", "s3")
            .continue_on(Outcome::Succeed, "t2")
            .continue_on(Outcome::Succeed, "t2");

        let err = sm.fire("t1").unwrap_err();
        assert!(matches!(
            err,
            Error::AmbiguousContinuation {
                state: "s2",
                outcome: Outcome::Succeed
            }
        ));
    }

    #[test]
    fn guarded_continuation_is_skipped_when_false() {
        let mut sm = Machine::new("s1");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2")
            .permit("t2", "s3")
            .continue_on_if(Outcome::Succeed, "t2", || false);

        sm.fire("t1").unwrap();
        assert_eq!(sm.state(), &"s2");
    }

    #[test]
    fn continuations_are_not_inherited_from_superstate() {
        let mut sm = Machine::new("s1");
        sm.configure("parent")
            .permit("t2", "s3")
            .continue_on(Outcome::Succeed, "t2");
        sm.configure("s1").permit("t1", "s2");
        sm.configure("s2").super_state("parent").unwrap();

        sm.fire("t1").unwrap();
        // s2 inherits parent's t2 rule but not its continuation
        assert_eq!(sm.state(), &"s2");
        assert!(sm.can_fire(&"t2").unwrap());
    }
}
