//! # Temporal Operators
//!
//! Operators are [`Operator`] strategies run by the generic [`TemporalPipe`]
//! node, which implements the shared timestamp, heartbeat and completion
//! protocol. Sources and sinks implement the node traits directly.
//!
//! | Operator | Inputs | State |
//! |----------|--------|-------|
//! | [`TemporalFilter`], [`TemporalMapper`] | 1 | none |
//! | [`TemporalWindow`] | 1 | none |
//! | [`TemporalUnion`] | any | start-keyed buffer |
//! | [`TemporalJoin`] | 2 | one sweep area per side |
//! | [`TemporalDifference`] | 2 | one sweep area per side |
//!
//! The functions at the bottom wrap an operator in its pipe in one call.

mod core;
mod difference;
mod filter;
mod join;
mod sinks;
mod sources;
mod union;
mod window;

pub use self::core::{Emitter, Operator, OperatorCore, TemporalPipe};
pub use difference::TemporalDifference;
pub use filter::{ElementPredicate, TemporalFilter, TemporalMapper};
pub use join::TemporalJoin;
pub use sinks::{CollectSink, LoggingSink};
pub use sources::CursorSource;
pub use union::TemporalUnion;
pub use window::{TemporalWindow, WindowKind};

use crate::config::SweepAreaConfig;
use crate::error::SweepAreaError;
use crate::time::{Payload, TemporalObject};

/// Pipe running a [`TemporalDifference`].
pub type DifferencePipe<P> = TemporalPipe<P, TemporalDifference<P>>;
/// Pipe running a [`TemporalJoin`].
pub type JoinPipe<P> = TemporalPipe<P, TemporalJoin<P>>;
/// Pipe running a [`TemporalUnion`].
pub type UnionPipe<P> = TemporalPipe<P, TemporalUnion<P>>;

/// Difference pipe reading the left side on input 0 and the right on 1.
///
/// # Errors
///
/// Propagates sweep area construction errors.
pub fn difference<P: Payload>(
  name: impl Into<String>,
  config: &SweepAreaConfig,
) -> Result<DifferencePipe<P>, SweepAreaError> {
  Ok(TemporalPipe::new(name, TemporalDifference::new(config)?))
}

/// Union pipe.
///
/// # Errors
///
/// Propagates sweep area construction errors.
pub fn union<P: Payload>(
  name: impl Into<String>,
  config: &SweepAreaConfig,
) -> Result<UnionPipe<P>, SweepAreaError> {
  Ok(TemporalPipe::new(name, TemporalUnion::new(config)?))
}

/// Filter pipe.
pub fn filter<P: Payload>(
  name: impl Into<String>,
  predicate: impl Fn(&TemporalObject<P>) -> bool + Send + 'static,
) -> TemporalPipe<P, TemporalFilter<P>> {
  TemporalPipe::new(name, TemporalFilter::new(predicate))
}

/// Sliding window pipe.
pub fn sliding_window<P: Payload>(name: impl Into<String>, size: u64) -> TemporalPipe<P, TemporalWindow> {
  TemporalPipe::new(name, TemporalWindow::sliding(size))
}
