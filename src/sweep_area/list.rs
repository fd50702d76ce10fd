use super::{OrderFn, ReorganizeMode, SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::error::SweepAreaError;
use crate::time::Timestamp;
use std::collections::VecDeque;

/// List-backed sweep area.
///
/// With an order, elements are kept sorted (ties in insertion order) and
/// queries return matches in that order. Lazy expiration then removes a
/// prefix, which is exact whenever the remove predicate is monotone in the
/// order (e.g. `end <= bound` on start-sorted point or equal-length objects)
/// and conservative otherwise.
pub struct ListSweepArea<E, S = Timestamp> {
  elements: VecDeque<E>,
  predicates: SweepAreaPredicates<E, S>,
  order: Option<OrderFn<E>>,
  settings: SweepAreaSettings,
  closed: bool,
}

impl<E: Clone + Send, S> ListSweepArea<E, S> {
  /// Creates an area that keeps elements in insertion order.
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
      elements: VecDeque::new(),
      predicates,
      order: None,
      settings,
      closed: false,
    })
  }

  /// Creates an area kept sorted by `order`.
  ///
  /// # Errors
  ///
  /// Same as [`new`](Self::new).
  pub fn sorted(
    predicates: SweepAreaPredicates<E, S>,
    settings: SweepAreaSettings,
    order: OrderFn<E>,
  ) -> Result<Self, SweepAreaError> {
    let mut area = Self::new(predicates, settings)?;
    area.order = Some(order);
    Ok(area)
  }

  fn ensure_open(&self) -> Result<(), SweepAreaError> {
    if self.closed {
      Err(SweepAreaError::Closed)
    } else {
      Ok(())
    }
  }
}

impl<E: Clone + Send, S> SweepArea<E, S> for ListSweepArea<E, S> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.ensure_open()?;
    match &self.order {
      Some(order) => {
        let at = self
          .elements
          .partition_point(|stored| order(stored, &element).is_le());
        self.elements.insert(at, element);
      }
      None => self.elements.push_back(element),
    }
    Ok(())
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    Ok(
      self
        .elements
        .iter()
        .filter(|stored| self.predicates.matches(stored, probe, input))
        .cloned()
        .collect(),
    )
  }

  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    if !self.settings.honors(input) {
      return Ok(Vec::new());
    }
    let mut expired = Vec::new();
    match self.settings.mode {
      ReorganizeMode::Lazy => {
        while let Some(front) = self.elements.front() {
          if !self.predicates.is_dead(front, status, input) {
            break;
          }
          if let Some(front) = self.elements.pop_front() {
            expired.push(front);
          }
        }
      }
      ReorganizeMode::SaveMemory => {
        let mut kept = VecDeque::with_capacity(self.elements.len());
        for stored in self.elements.drain(..) {
          if self.predicates.is_dead(&stored, status, input) {
            expired.push(stored);
          } else {
            kept.push_back(stored);
          }
        }
        self.elements = kept;
      }
    }
    Ok(expired)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    self.ensure_open()?;
    let position = self
      .elements
      .iter()
      .position(|stored| self.predicates.equals(stored, element));
    Ok(match position {
      Some(at) => self.elements.remove(at).is_some(),
      None => false,
    })
  }

  fn clear(&mut self) {
    self.elements.clear();
  }

  fn close(&mut self) {
    self.elements.clear();
    self.closed = true;
  }

  fn len(&self) -> usize {
    self.elements.len()
  }

  fn peek(&self) -> Option<&E> {
    self.elements.front()
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    Ok(self.elements.drain(..).collect())
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    self.ensure_open()?;
    Ok(Box::new(self.elements.iter()))
  }

  fn memory_usage(&self) -> usize {
    self.settings.object_size * self.elements.len()
  }

  fn dimension(&self) -> usize {
    self.predicates.dimension()
  }
}
