//! Ordered n-ary union.

use super::core::{Emitter, Operator};
use crate::config::SweepAreaConfig;
use crate::error::{NodeError, SweepAreaError};
use crate::metadata::{OperatorDescriptor, STATEFUL_METADATA};
use crate::node::InputId;
use crate::sweep_area::{HeapSweepArea, ReorganizeMode, SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::time::{Payload, TemporalObject, Timestamp, starts_at_or_before};
use std::sync::Arc;

static UNION: OperatorDescriptor = OperatorDescriptor::new("temporal-union", STATEFUL_METADATA);

/// Merges any number of inputs into one start-ordered output.
///
/// Elements wait in a start-keyed heap until the minimum timestamp over all
/// inputs reaches their start; completion flushes the rest.
pub struct TemporalUnion<P: Payload> {
  buffer: HeapSweepArea<TemporalObject<P>>,
}

impl<P: Payload> TemporalUnion<P> {
  /// Creates the union.
  ///
  /// # Errors
  ///
  /// Propagates sweep area construction errors.
  pub fn new(config: &SweepAreaConfig) -> Result<Self, SweepAreaError> {
    let predicates: SweepAreaPredicates<TemporalObject<P>> = SweepAreaPredicates::uniform(
      1,
      Arc::new(|a: &TemporalObject<P>, b: &TemporalObject<P>| a == b),
      Arc::new(|_: &TemporalObject<P>, _: &TemporalObject<P>| false),
      Arc::new(starts_at_or_before::<P>),
    )?;
    let settings = SweepAreaSettings::owned_by(0)
      .with_config(config)
      .with_mode(ReorganizeMode::Lazy);
    let buffer = HeapSweepArea::new(
      predicates,
      settings,
      Arc::new(|element: &TemporalObject<P>| element.start()),
    )?;
    Ok(Self { buffer })
  }

  /// Elements waiting for release.
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }
}

impl<P: Payload> Operator<P> for TemporalUnion<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &UNION
  }

  fn process_object(
    &mut self,
    _emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    _input: InputId,
  ) -> Result<(), NodeError> {
    self.buffer.insert(element)?;
    Ok(())
  }

  fn process_heartbeat(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    for element in self.buffer.expire(&min, 0)? {
      emitter.transfer(element);
    }
    Ok(Some(self.buffer.peek().map_or(min, |next| next.start().min(min))))
  }

  fn on_all_done(&mut self, emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    for element in self.buffer.drain()? {
      emitter.transfer(element);
    }
    Ok(())
  }

  fn state_size(&self) -> usize {
    self.buffer.len()
  }

  fn memory_usage(&self) -> usize {
    self.buffer.memory_usage()
  }

  fn close(&mut self) {
    self.buffer.close();
  }
}
