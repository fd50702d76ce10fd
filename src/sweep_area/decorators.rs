use super::SweepArea;
use crate::error::SweepAreaError;
use serde::Serialize;
use std::cell::Cell;

/// Forwards every call to a boxed sweep area that can be swapped at run time.
pub struct DelegatingSweepArea<E, S> {
  inner: Box<dyn SweepArea<E, S>>,
}

impl<E, S> DelegatingSweepArea<E, S> {
  /// Wraps `inner`.
  pub fn new(inner: Box<dyn SweepArea<E, S>>) -> Self {
    Self { inner }
  }

  /// The wrapped area.
  pub fn inner(&self) -> &dyn SweepArea<E, S> {
    self.inner.as_ref()
  }

  /// Replaces the wrapped area and returns the previous one.
  pub fn replace(&mut self, inner: Box<dyn SweepArea<E, S>>) -> Box<dyn SweepArea<E, S>> {
    std::mem::replace(&mut self.inner, inner)
  }

  /// Unwraps the decorator.
  pub fn into_inner(self) -> Box<dyn SweepArea<E, S>> {
    self.inner
  }
}

impl<E, S> SweepArea<E, S> for DelegatingSweepArea<E, S> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.inner.insert(element)
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.inner.query(probe, input)
  }

  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.inner.expire(status, input)
  }

  fn reorganize(&mut self, status: &S, input: usize) -> Result<(), SweepAreaError> {
    self.inner.reorganize(status, input)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    self.inner.remove(element)
  }

  fn clear(&mut self) {
    self.inner.clear()
  }

  fn close(&mut self) {
    self.inner.close()
  }

  fn len(&self) -> usize {
    self.inner.len()
  }

  fn peek(&self) -> Option<&E> {
    self.inner.peek()
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.inner.drain()
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    self.inner.iter()
  }

  fn memory_usage(&self) -> usize {
    self.inner.memory_usage()
  }

  fn dimension(&self) -> usize {
    self.inner.dimension()
  }
}

/// Call counts recorded by a [`CountingSweepArea`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SweepAreaCounts {
  /// `insert` calls.
  pub inserts: u64,
  /// `query` calls.
  pub queries: u64,
  /// Elements returned by `query`.
  pub query_results: u64,
  /// `expire` calls.
  pub expires: u64,
  /// Elements returned by `expire`.
  pub expired: u64,
  /// `reorganize` calls.
  pub reorganizes: u64,
  /// Successful `remove` calls.
  pub removes: u64,
  /// `clear` calls.
  pub clears: u64,
}

/// Counts the calls made to the wrapped area.
pub struct CountingSweepArea<A> {
  inner: A,
  counts: SweepAreaCounts,
  queries: Cell<u64>,
  query_results: Cell<u64>,
}

impl<A> CountingSweepArea<A> {
  /// Wraps `inner` with zeroed counts.
  pub fn new(inner: A) -> Self {
    Self {
      inner,
      counts: SweepAreaCounts::default(),
      queries: Cell::new(0),
      query_results: Cell::new(0),
    }
  }

  /// Counts so far.
  pub fn counts(&self) -> SweepAreaCounts {
    SweepAreaCounts {
      queries: self.queries.get(),
      query_results: self.query_results.get(),
      ..self.counts
    }
  }

  /// Zeroes the counts.
  pub fn reset_counts(&mut self) {
    self.counts = SweepAreaCounts::default();
    self.queries.set(0);
    self.query_results.set(0);
  }

  /// The wrapped area.
  pub fn inner(&self) -> &A {
    &self.inner
  }

  /// Unwraps the decorator.
  pub fn into_inner(self) -> A {
    self.inner
  }
}

impl<E, S, A: SweepArea<E, S>> SweepArea<E, S> for CountingSweepArea<A> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.counts.inserts += 1;
    self.inner.insert(element)
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.queries.set(self.queries.get() + 1);
    let results = self.inner.query(probe, input)?;
    self.query_results.set(self.query_results.get() + results.len() as u64);
    Ok(results)
  }

  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.counts.expires += 1;
    let expired = self.inner.expire(status, input)?;
    self.counts.expired += expired.len() as u64;
    Ok(expired)
  }

  fn reorganize(&mut self, status: &S, input: usize) -> Result<(), SweepAreaError> {
    self.counts.reorganizes += 1;
    self.inner.reorganize(status, input)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    let removed = self.inner.remove(element)?;
    if removed {
      self.counts.removes += 1;
    }
    Ok(removed)
  }

  fn clear(&mut self) {
    self.counts.clears += 1;
    self.inner.clear()
  }

  fn close(&mut self) {
    self.inner.close()
  }

  fn len(&self) -> usize {
    self.inner.len()
  }

  fn peek(&self) -> Option<&E> {
    self.inner.peek()
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.inner.drain()
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    self.inner.iter()
  }

  fn memory_usage(&self) -> usize {
    self.inner.memory_usage()
  }

  fn dimension(&self) -> usize {
    self.inner.dimension()
  }
}
