//! Stateless element-wise operators.

use super::core::{Emitter, Operator};
use crate::error::NodeError;
use crate::metadata::{BASE_METADATA, OperatorDescriptor};
use crate::node::InputId;
use crate::time::{Payload, TemporalObject};

static FILTER: OperatorDescriptor = OperatorDescriptor::new("temporal-filter", BASE_METADATA);
static MAPPER: OperatorDescriptor = OperatorDescriptor::new("temporal-mapper", BASE_METADATA);

/// Boxed element predicate.
pub type ElementPredicate<P> = Box<dyn Fn(&TemporalObject<P>) -> bool + Send>;

/// Forwards the elements satisfying a predicate, unchanged.
pub struct TemporalFilter<P> {
  predicate: ElementPredicate<P>,
}

impl<P: Payload> TemporalFilter<P> {
  /// Creates the filter.
  pub fn new(predicate: impl Fn(&TemporalObject<P>) -> bool + Send + 'static) -> Self {
    Self {
      predicate: Box::new(predicate),
    }
  }

  /// Filters on the payload only.
  pub fn on_payload(predicate: impl Fn(&P) -> bool + Send + 'static) -> Self {
    Self::new(move |element| predicate(element.payload()))
  }
}

impl<P: Payload> Operator<P> for TemporalFilter<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &FILTER
  }

  fn accepts_input(&self, input: InputId) -> bool {
    input == 0
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    _input: InputId,
  ) -> Result<(), NodeError> {
    if (self.predicate)(&element) {
      emitter.transfer(element);
    }
    Ok(())
  }
}

/// Rewrites payloads, keeping intervals.
pub struct TemporalMapper<P> {
  map: Box<dyn Fn(P) -> P + Send>,
}

impl<P: Payload> TemporalMapper<P> {
  /// Creates the mapper.
  pub fn new(map: impl Fn(P) -> P + Send + 'static) -> Self {
    Self { map: Box::new(map) }
  }
}

impl<P: Payload> Operator<P> for TemporalMapper<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &MAPPER
  }

  fn accepts_input(&self, input: InputId) -> bool {
    input == 0
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    _input: InputId,
  ) -> Result<(), NodeError> {
    emitter.transfer(element.map(&self.map));
    Ok(())
  }
}
