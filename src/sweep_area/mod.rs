//! # Sweep Areas
//!
//! A sweep area holds the live state of a stateful operator: elements that may
//! still match future input. It supports four data operations:
//!
//! - `insert` stores an element.
//! - `query(probe, input)` returns the stored elements matching a probe that
//!   arrived on `input`, using that input's query predicate.
//! - `expire(status, input)` removes and returns every stored element the
//!   remove predicate of `input` deems dead given the status probe (typically
//!   a timestamp lower bound).
//! - `reorganize(status, input)` does the same but drops the elements.
//!
//! Elements removed by `expire`, `reorganize`, `remove` or `clear` never come
//! back from a later `query`, and expiring again with the same or an older
//! status returns nothing new.
//!
//! ## Implementors
//!
//! | Type | Backing | Notes |
//! |---|---|---|
//! | [`ListSweepArea`] | `VecDeque`, optionally kept sorted | linear scan |
//! | [`HashSweepArea`] | buckets keyed by a user hash | O(1) expected probe |
//! | [`HeapSweepArea`] | binary heap on a user priority | cheapest-first expiration |
//! | [`NegationSweepArea`] | `Vec` of positives | `expire`/`reorganize` unsupported |
//!
//! [`CountingSweepArea`] and [`DelegatingSweepArea`] wrap any of them without
//! changing semantics.
//!
//! ## Ownership
//!
//! Sweep areas are not thread-safe containers; the owning operator serializes
//! access behind its own mutex and closes the areas when it closes.

mod decorators;
mod hash;
mod heap;
mod list;
mod negation;

pub use decorators::{CountingSweepArea, DelegatingSweepArea, SweepAreaCounts};
pub use hash::{HashFn, HashSweepArea};
pub use heap::{HeapSweepArea, PriorityFn};
pub use list::ListSweepArea;
pub use negation::{NegationSweepArea, Signed};

use crate::config::SweepAreaConfig;
use crate::error::SweepAreaError;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Equality used by value-based removal.
pub type EqualsFn<E> = Arc<dyn Fn(&E, &E) -> bool + Send + Sync>;
/// `(stored, probe) -> matches`.
pub type QueryFn<E> = Arc<dyn Fn(&E, &E) -> bool + Send + Sync>;
/// `(stored, status) -> dead`.
pub type RemoveFn<E, S> = Arc<dyn Fn(&E, &S) -> bool + Send + Sync>;
/// Total order on stored elements.
pub type OrderFn<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// How expiration walks the stored elements.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorganizeMode {
  /// Stop at the first live element in storage order. Exact for areas sorted
  /// consistently with the remove predicate; may keep dead elements longer
  /// otherwise.
  #[default]
  Lazy,
  /// Scan every element.
  SaveMemory,
}

/// Per-input predicates of a sweep area.
pub struct SweepAreaPredicates<E, S = Timestamp> {
  equals: EqualsFn<E>,
  query: Vec<QueryFn<E>>,
  remove: Vec<RemoveFn<E, S>>,
}

impl<E, S> Clone for SweepAreaPredicates<E, S> {
  fn clone(&self) -> Self {
    Self {
      equals: Arc::clone(&self.equals),
      query: self.query.clone(),
      remove: self.remove.clone(),
    }
  }
}

impl<E, S> SweepAreaPredicates<E, S> {
  /// Creates predicates with one query and one remove predicate per input.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::InvalidArgument`] if the lists are empty or
  /// differ in length.
  pub fn new(
    equals: EqualsFn<E>,
    query: Vec<QueryFn<E>>,
    remove: Vec<RemoveFn<E, S>>,
  ) -> Result<Self, SweepAreaError> {
    if query.is_empty() {
      return Err(SweepAreaError::InvalidArgument(
        "at least one query predicate is required".to_string(),
      ));
    }
    if query.len() != remove.len() {
      return Err(SweepAreaError::InvalidArgument(format!(
        "{} query predicates but {} remove predicates",
        query.len(),
        remove.len()
      )));
    }
    Ok(Self {
      equals,
      query,
      remove,
    })
  }

  /// Uses the same query and remove predicate for all `dimension` inputs.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::InvalidArgument`] if `dimension` is zero.
  pub fn uniform(
    dimension: usize,
    equals: EqualsFn<E>,
    query: QueryFn<E>,
    remove: RemoveFn<E, S>,
  ) -> Result<Self, SweepAreaError> {
    Self::new(equals, vec![query; dimension], vec![remove; dimension])
  }

  /// Number of inputs the predicates cover.
  pub fn dimension(&self) -> usize {
    self.query.len()
  }

  /// Equality predicate.
  pub fn equals(&self, a: &E, b: &E) -> bool {
    (self.equals)(a, b)
  }

  /// Query predicate of `input`.
  pub fn matches(&self, stored: &E, probe: &E, input: usize) -> bool {
    (self.query[input])(stored, probe)
  }

  /// Remove predicate of `input`.
  pub fn is_dead(&self, stored: &E, status: &S, input: usize) -> bool {
    (self.remove[input])(stored, status)
  }

  fn check_input(&self, input: usize) -> Result<(), SweepAreaError> {
    if input < self.dimension() {
      Ok(())
    } else {
      Err(SweepAreaError::InputOutOfRange {
        input,
        dimension: self.dimension(),
      })
    }
  }
}

/// Ownership and accounting settings shared by all implementors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepAreaSettings {
  /// Input whose elements this area stores.
  pub owner: usize,
  /// Whether expire/reorganize probes from `owner` itself are honored.
  pub self_reorganize: bool,
  /// Expiration walk.
  pub mode: ReorganizeMode,
  /// Bytes accounted per stored element.
  pub object_size: usize,
}

impl Default for SweepAreaSettings {
  fn default() -> Self {
    Self {
      owner: 0,
      self_reorganize: true,
      mode: ReorganizeMode::Lazy,
      object_size: 0,
    }
  }
}

impl SweepAreaSettings {
  /// Settings for an area owned by `owner`.
  pub fn owned_by(owner: usize) -> Self {
    Self {
      owner,
      ..Self::default()
    }
  }

  /// Applies the configured reorganize mode and object size.
  pub fn with_config(mut self, config: &SweepAreaConfig) -> Self {
    self.mode = config.reorganize_mode;
    if let Some(size) = config.object_size {
      self.object_size = size;
    }
    self
  }

  /// Sets [`self_reorganize`](Self::self_reorganize).
  pub fn with_self_reorganize(mut self, self_reorganize: bool) -> Self {
    self.self_reorganize = self_reorganize;
    self
  }

  /// Sets the expiration walk.
  pub fn with_mode(mut self, mode: ReorganizeMode) -> Self {
    self.mode = mode;
    self
  }

  /// Sets the per-element size.
  pub fn with_object_size(mut self, object_size: usize) -> Self {
    self.object_size = object_size;
    self
  }

  fn validate(&self, dimension: usize) -> Result<(), SweepAreaError> {
    if self.owner >= dimension {
      return Err(SweepAreaError::InvalidArgument(format!(
        "owner input {} outside dimension {}",
        self.owner, dimension
      )));
    }
    Ok(())
  }

  /// Returns false when a probe from `input` must be ignored.
  fn honors(&self, input: usize) -> bool {
    self.self_reorganize || input != self.owner
  }
}

/// A bounded, query- and expire-capable container of operator state.
///
/// `E` is the element type, `S` the status probe type passed to
/// expiration (a timestamp for temporal operators).
pub trait SweepArea<E, S = Timestamp>: Send {
  /// Stores `element`.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::Closed`] after [`close`](SweepArea::close).
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError>;

  /// Returns clones of the stored elements matching `probe` under the query
  /// predicate of `input`, in storage order.
  ///
  /// # Errors
  ///
  /// Fails when closed or when `input` is outside the dimension.
  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError>;

  /// Removes and returns the elements that are dead given `status`.
  ///
  /// Probes from the owning input are ignored unless self-reorganization is
  /// enabled.
  ///
  /// # Errors
  ///
  /// Fails when closed, when `input` is outside the dimension, or when the
  /// implementor does not support expiration.
  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError>;

  /// Like [`expire`](SweepArea::expire) but discards the removed elements.
  ///
  /// # Errors
  ///
  /// Same as [`expire`](SweepArea::expire).
  fn reorganize(&mut self, status: &S, input: usize) -> Result<(), SweepAreaError> {
    self.expire(status, input).map(drop)
  }

  /// Removes one stored element equal to `element`. Returns whether one was
  /// found.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::Closed`] after [`close`](SweepArea::close).
  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError>;

  /// Drops every stored element.
  fn clear(&mut self);

  /// Drops every stored element and rejects further use.
  fn close(&mut self);

  /// Number of stored elements.
  fn len(&self) -> usize;

  /// Returns true if nothing is stored.
  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// First element in the area's order, if any.
  fn peek(&self) -> Option<&E>;

  /// Removes and returns every element in the area's order.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::Closed`] after [`close`](SweepArea::close).
  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError>;

  /// Iterates the stored elements.
  ///
  /// # Errors
  ///
  /// Fails when closed, or for implementors without a cheap iteration order.
  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError>;

  /// Estimated bytes held.
  fn memory_usage(&self) -> usize;

  /// Number of inputs the area's predicates cover.
  fn dimension(&self) -> usize;
}

impl<E, S> SweepArea<E, S> for Box<dyn SweepArea<E, S>> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    (**self).insert(element)
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    (**self).query(probe, input)
  }

  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError> {
    (**self).expire(status, input)
  }

  fn reorganize(&mut self, status: &S, input: usize) -> Result<(), SweepAreaError> {
    (**self).reorganize(status, input)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    (**self).remove(element)
  }

  fn clear(&mut self) {
    (**self).clear()
  }

  fn close(&mut self) {
    (**self).close()
  }

  fn len(&self) -> usize {
    (**self).len()
  }

  fn peek(&self) -> Option<&E> {
    (**self).peek()
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    (**self).drain()
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    (**self).iter()
  }

  fn memory_usage(&self) -> usize {
    (**self).memory_usage()
  }

  fn dimension(&self) -> usize {
    (**self).dimension()
  }
}
