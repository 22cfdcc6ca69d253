//! Error types for the state machine

use std::fmt::Debug;
use thiserror::Error;

use crate::Outcome;

/// Boxed error raised by an entry or exit action.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Result of running a single entry or exit action.
pub type ActionResult = Result<(), ActionError>;

/// Result type alias for state machine operations
pub type FsmResult<V, S, T> = std::result::Result<V, Error<S, T>>;

/// Errors that can occur during configuration or firing
#[derive(Error, Debug)]
pub enum Error<S: Debug, T: Debug> {
    /// The trigger is not configured for the current state or any of its superstates
    #[error("no trigger {trigger:?} configured for state {state:?}")]
    UnhandledTrigger {
        /// State the machine was in when the trigger was fired
        state: S,
        /// The unconfigured trigger
        trigger: T,
    },

    /// More than one rule for the same trigger has a true guard in the same state
    #[error("multiple rules match trigger {trigger:?} in state {state:?}")]
    AmbiguousTrigger {
        /// State carrying the conflicting rules
        state: S,
        /// The over-configured trigger
        trigger: T,
    },

    /// More than one continuation for the same outcome has a true guard in the same state
    #[error("multiple {outcome:?} continuations configured for state {state:?}")]
    AmbiguousContinuation {
        /// State carrying the conflicting continuations
        state: S,
        /// The over-configured outcome
        outcome: Outcome,
    },

    /// Synchronous firing attempted through a state with asynchronous actions
    #[error("state {state:?} has async actions configured, use fire_async")]
    InvalidMode {
        /// State carrying the async actions
        state: S,
    },

    /// Setting this superstate would create a direct two-state cycle
    #[error("state {state:?} and superstate {super_state:?} would form a cycle")]
    CyclicSuperState {
        /// State being configured
        state: S,
        /// The rejected superstate
        super_state: S,
    },

    /// An entry or exit action failed during a transition
    #[error("action failed in state {state:?}: {source}")]
    Action {
        /// State whose action failed
        state: S,
        /// The error the action returned
        #[source]
        source: ActionError,
    },
}
