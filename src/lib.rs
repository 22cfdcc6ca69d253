//! # Chain FSM
//!
//! A finite state machine configured at runtime: declare which triggers
//! each state permits or ignores, guard predicates, entry/exit actions
//! (sync or async), superstates whose rules descendants inherit, and
//! continuations that automatically fire a follow-on trigger once a
//! transition succeeds or fails.
//!
//! ## Features
//!
//! - 🔀 **Guarded triggers**: rules apply only while their predicate holds
//! - 🏗️ **Superstate delegation**: descendants inherit a parent's trigger rules
//! - 🔁 **Continuation chaining**: one fired trigger can traverse several states
//! - 🧯 **Outcome branching**: action failures can be rerouted by `Fail` continuations
//! - ⚙️ **Sync and async firing**: blocking `fire` or suspending `fire_async`
//! - 🔔 **Change notification**: observe every actual current-state change
//!
//! ## Quick Start
//!
//! ```rust
//! use chain_fsm::{Outcome, StateMachine};
//!
//! # fn main() -> Result<(), chain_fsm::Error<&'static str, &'static str>> {
//! let mut sm = StateMachine::new("red");
//!
//! sm.configure("red").permit("go", "green");
//! sm.configure("green")
//!     .permit("caution", "amber")
//!     .ignore("stop");
//! sm.configure("amber")
//!     .permit("halt", "red")
//!     // one fired trigger carries the machine straight through amber
//!     .continue_on(Outcome::Succeed, "halt");
//!
//! sm.fire("go")?;
//! assert_eq!(sm.state(), &"green");
//!
//! sm.fire("stop")?; // recognized but inert
//! assert_eq!(sm.state(), &"green");
//!
//! sm.fire("caution")?; // green -> amber, then the continuation -> red
//! assert_eq!(sm.state(), &"red");
//! # Ok(())
//! # }
//! ```
//!
//! States with asynchronous entry or exit actions must be driven with
//! [`StateMachine::fire_async`]; the synchronous path refuses them
//! rather than skip registered async work.

#![warn(missing_docs)]

mod builder;
mod error;
mod fsm;
mod state;

pub use builder::StateConfiguration;
pub use error::{ActionError, ActionResult, Error, FsmResult};
pub use fsm::{ObserverId, StateMachine};
pub use state::Outcome;

pub mod prelude {
    //! Prelude module for convenient imports
    pub use crate::{Error, FsmResult, Outcome, StateConfiguration, StateMachine};
}
