//! Event sink system for observability.
//!
//! The scheduler reports node and run lifecycle transitions as
//! [`RunEvent`]s to the [`EventSink`] held by the run context.

mod event;
mod sink;

pub use event::RunEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
