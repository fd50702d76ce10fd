use super::{ReorganizeMode, SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::error::SweepAreaError;
use crate::time::Timestamp;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Priority of an element in a [`HeapSweepArea`]; lower comes first.
pub type PriorityFn<E> = Arc<dyn Fn(&E) -> u64 + Send + Sync>;

struct Keyed<E> {
  priority: u64,
  sequence: u64,
  element: E,
}

impl<E> Keyed<E> {
  fn key(&self) -> (u64, u64) {
    (self.priority, self.sequence)
  }
}

impl<E> PartialEq for Keyed<E> {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl<E> Eq for Keyed<E> {}

impl<E> PartialOrd for Keyed<E> {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl<E> Ord for Keyed<E> {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key().cmp(&other.key())
  }
}

/// Heap-backed sweep area ordered by a user priority, ties first-in
/// first-out.
///
/// Lazy expiration pops from the top while the remove predicate holds, which
/// makes the area a natural reorder buffer: with `priority = start` and the
/// remove predicate `start <= bound` it releases elements in start order.
/// [`iter`](SweepArea::iter) is not supported.
pub struct HeapSweepArea<E, S = Timestamp> {
  heap: BinaryHeap<Reverse<Keyed<E>>>,
  priority: PriorityFn<E>,
  predicates: SweepAreaPredicates<E, S>,
  settings: SweepAreaSettings,
  sequence: u64,
  closed: bool,
}

impl<E: Clone + Send, S> HeapSweepArea<E, S> {
  /// Creates the area.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::InvalidArgument`] if the owner lies outside
  /// the predicates' dimension.
  pub fn new(
    predicates: SweepAreaPredicates<E, S>,
    settings: SweepAreaSettings,
    priority: PriorityFn<E>,
  ) -> Result<Self, SweepAreaError> {
    settings.validate(predicates.dimension())?;
    Ok(Self {
      heap: BinaryHeap::new(),
      priority,
      predicates,
      settings,
      sequence: 0,
      closed: false,
    })
  }

  fn ensure_open(&self) -> Result<(), SweepAreaError> {
    if self.closed {
      Err(SweepAreaError::Closed)
    } else {
      Ok(())
    }
  }
}

impl<E: Clone + Send, S> SweepArea<E, S> for HeapSweepArea<E, S> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.ensure_open()?;
    let priority = (self.priority)(&element);
    self.heap.push(Reverse(Keyed {
      priority,
      sequence: self.sequence,
      element,
    }));
    self.sequence += 1;
    Ok(())
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    let mut matches: Vec<&Keyed<E>> = self
      .heap
      .iter()
      .map(|Reverse(keyed)| keyed)
      .filter(|keyed| self.predicates.matches(&keyed.element, probe, input))
      .collect();
    matches.sort();
    Ok(matches.into_iter().map(|keyed| keyed.element.clone()).collect())
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
        while let Some(Reverse(top)) = self.heap.peek() {
          if !self.predicates.is_dead(&top.element, status, input) {
            break;
          }
          if let Some(Reverse(top)) = self.heap.pop() {
            expired.push(top.element);
          }
        }
      }
      ReorganizeMode::SaveMemory => {
        let mut all = std::mem::take(&mut self.heap).into_sorted_vec();
        // Ascending in `Reverse` means descending keys.
        all.reverse();
        for Reverse(keyed) in all {
          if self.predicates.is_dead(&keyed.element, status, input) {
            expired.push(keyed.element);
          } else {
            self.heap.push(Reverse(keyed));
          }
        }
      }
    }
    Ok(expired)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    self.ensure_open()?;
    let mut entries = std::mem::take(&mut self.heap).into_vec();
    let position = entries
      .iter()
      .position(|Reverse(keyed)| self.predicates.equals(&keyed.element, element));
    if let Some(at) = position {
      entries.swap_remove(at);
    }
    self.heap = BinaryHeap::from(entries);
    Ok(position.is_some())
  }

  fn clear(&mut self) {
    self.heap.clear();
  }

  fn close(&mut self) {
    self.heap.clear();
    self.closed = true;
  }

  fn len(&self) -> usize {
    self.heap.len()
  }

  fn peek(&self) -> Option<&E> {
    self.heap.peek().map(|Reverse(keyed)| &keyed.element)
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    let mut drained = Vec::with_capacity(self.heap.len());
    while let Some(Reverse(keyed)) = self.heap.pop() {
      drained.push(keyed.element);
    }
    Ok(drained)
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    Err(SweepAreaError::Unsupported {
      area: "HeapSweepArea",
      operation: "iter",
    })
  }

  fn memory_usage(&self) -> usize {
    self.settings.object_size * self.heap.len()
  }

  fn dimension(&self) -> usize {
    self.predicates.dimension()
  }
}
