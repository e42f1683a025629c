//! Lifecycle of one supervised run: provision a session, capture and ship
//! concurrently, then drain and reconcile.

pub mod context;
pub mod runner;
pub mod state;

pub use context::RunContext;
pub use runner::{RunError, RunOutcome, SessionRunner};
pub use state::{Lifecycle, SessionState, TransitionError};
