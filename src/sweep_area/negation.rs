use super::{SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::error::SweepAreaError;
use crate::time::Timestamp;

/// An element tagged as an insertion or a retraction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Signed<E> {
  /// Adds the element.
  Positive(E),
  /// Retracts one equal element.
  Negative(E),
}

/// Sweep area over positive/negative streams.
///
/// Positive elements are stored; a negative element retracts one stored
/// element equal to it. Liveness is decided by retraction alone, so
/// [`expire`](SweepArea::expire) and [`reorganize`](SweepArea::reorganize)
/// always fail with [`SweepAreaError::Unsupported`].
pub struct NegationSweepArea<E, S = Timestamp> {
  positives: Vec<E>,
  predicates: SweepAreaPredicates<E, S>,
  settings: SweepAreaSettings,
  closed: bool,
}

impl<E: Clone + Send, S> NegationSweepArea<E, S> {
  /// Creates the area.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::InvalidArgument`] if the owner lies outside
  /// the predicates' dimension.
  pub fn new(
    predicates: SweepAreaPredicates<E, S>,
    settings: SweepAreaSettings,
  ) -> Result<Self, SweepAreaError> {
    settings.validate(predicates.dimension())?;
    Ok(Self {
      positives: Vec::new(),
      predicates,
      settings,
      closed: false,
    })
  }

  /// Inserts a positive element or retracts a negative one. Returns false
  /// for a retraction that found nothing to cancel.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::Closed`] after close.
  pub fn apply(&mut self, signed: Signed<E>) -> Result<bool, SweepAreaError> {
    match signed {
      Signed::Positive(element) => self.insert(element).map(|()| true),
      Signed::Negative(element) => self.remove(&element),
    }
  }

  fn ensure_open(&self) -> Result<(), SweepAreaError> {
    if self.closed {
      Err(SweepAreaError::Closed)
    } else {
      Ok(())
    }
  }

  fn unsupported(operation: &'static str) -> SweepAreaError {
    SweepAreaError::Unsupported {
      area: "NegationSweepArea",
      operation,
    }
  }
}

impl<E: Clone + Send, S> SweepArea<E, S> for NegationSweepArea<E, S> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.ensure_open()?;
    self.positives.push(element);
    Ok(())
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    Ok(
      self
        .positives
        .iter()
        .filter(|stored| self.predicates.matches(stored, probe, input))
        .cloned()
        .collect(),
    )
  }

  fn expire(&mut self, _status: &S, _input: usize) -> Result<Vec<E>, SweepAreaError> {
    Err(Self::unsupported("expire"))
  }

  fn reorganize(&mut self, _status: &S, _input: usize) -> Result<(), SweepAreaError> {
    Err(Self::unsupported("reorganize"))
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    self.ensure_open()?;
    let position = self
      .positives
      .iter()
      .position(|stored| self.predicates.equals(stored, element));
    if let Some(at) = position {
      self.positives.remove(at);
    }
    Ok(position.is_some())
  }

  fn clear(&mut self) {
    self.positives.clear();
  }

  fn close(&mut self) {
    self.positives.clear();
    self.closed = true;
  }

  fn len(&self) -> usize {
    self.positives.len()
  }

  fn peek(&self) -> Option<&E> {
    self.positives.first()
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    Ok(std::mem::take(&mut self.positives))
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    self.ensure_open()?;
    Ok(Box::new(self.positives.iter()))
  }

  fn memory_usage(&self) -> usize {
    self.settings.object_size * self.positives.len()
  }

  fn dimension(&self) -> usize {
    self.predicates.dimension()
  }
}
