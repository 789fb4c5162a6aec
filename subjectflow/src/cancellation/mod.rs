//! Cooperative cancellation of runs.
//!
//! Cancelling a run stops further dispatch. Nodes already running are
//! allowed to finish and everything not yet dispatched is skipped.

mod token;

pub use token::CancellationToken;
