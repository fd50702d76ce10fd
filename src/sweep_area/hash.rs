use super::{OrderFn, SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::error::SweepAreaError;
use crate::time::Timestamp;
use std::collections::HashMap;
use std::sync::Arc;

/// Hash function partitioning a [`HashSweepArea`].
pub type HashFn<E> = Arc<dyn Fn(&E) -> u64 + Send + Sync>;

/// Hash-partitioned sweep area.
///
/// Elements land in buckets keyed by a user hash; a query only visits the
/// probe's bucket, so the query predicate must imply equal hashes (an
/// equi-join key, for instance). Expiration always scans every bucket; with an
/// order the expired elements are returned sorted.
pub struct HashSweepArea<E, S = Timestamp> {
  buckets: HashMap<u64, Vec<E>>,
  hash: HashFn<E>,
  order: Option<OrderFn<E>>,
  predicates: SweepAreaPredicates<E, S>,
  settings: SweepAreaSettings,
  len: usize,
  closed: bool,
}

impl<E: Clone + Send, S> HashSweepArea<E, S> {
  /// Creates the area.
  ///
  /// # Errors
  ///
  /// Returns [`SweepAreaError::InvalidArgument`] if the owner lies outside
  /// the predicates' dimension.
  pub fn new(
    predicates: SweepAreaPredicates<E, S>,
    settings: SweepAreaSettings,
    hash: HashFn<E>,
  ) -> Result<Self, SweepAreaError> {
    settings.validate(predicates.dimension())?;
    Ok(Self {
      buckets: HashMap::new(),
      hash,
      order: None,
      predicates,
      settings,
      len: 0,
      closed: false,
    })
  }

  /// Orders expired and drained elements by `order`.
  pub fn with_order(mut self, order: OrderFn<E>) -> Self {
    self.order = Some(order);
    self
  }

  /// Number of non-empty buckets.
  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  fn ensure_open(&self) -> Result<(), SweepAreaError> {
    if self.closed {
      Err(SweepAreaError::Closed)
    } else {
      Ok(())
    }
  }

  fn sort(&self, elements: &mut [E]) {
    if let Some(order) = &self.order {
      elements.sort_by(|a, b| order(a, b));
    }
  }
}

impl<E: Clone + Send, S> SweepArea<E, S> for HashSweepArea<E, S> {
  fn insert(&mut self, element: E) -> Result<(), SweepAreaError> {
    self.ensure_open()?;
    let key = (self.hash)(&element);
    self.buckets.entry(key).or_default().push(element);
    self.len += 1;
    Ok(())
  }

  fn query(&self, probe: &E, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    let key = (self.hash)(probe);
    Ok(
      self
        .buckets
        .get(&key)
        .map(|bucket| {
          bucket
            .iter()
            .filter(|stored| self.predicates.matches(stored, probe, input))
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn expire(&mut self, status: &S, input: usize) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    self.predicates.check_input(input)?;
    if !self.settings.honors(input) {
      return Ok(Vec::new());
    }
    let mut expired = Vec::new();
    for bucket in self.buckets.values_mut() {
      let mut kept = Vec::with_capacity(bucket.len());
      for stored in bucket.drain(..) {
        if self.predicates.is_dead(&stored, status, input) {
          expired.push(stored);
        } else {
          kept.push(stored);
        }
      }
      *bucket = kept;
    }
    self.buckets.retain(|_, bucket| !bucket.is_empty());
    self.len -= expired.len();
    self.sort(&mut expired);
    Ok(expired)
  }

  fn remove(&mut self, element: &E) -> Result<bool, SweepAreaError> {
    self.ensure_open()?;
    let key = (self.hash)(element);
    let Some(bucket) = self.buckets.get_mut(&key) else {
      return Ok(false);
    };
    let Some(at) = bucket
      .iter()
      .position(|stored| self.predicates.equals(stored, element))
    else {
      return Ok(false);
    };
    bucket.remove(at);
    if bucket.is_empty() {
      self.buckets.remove(&key);
    }
    self.len -= 1;
    Ok(true)
  }

  fn clear(&mut self) {
    self.buckets.clear();
    self.len = 0;
  }

  fn close(&mut self) {
    self.clear();
    self.closed = true;
  }

  fn len(&self) -> usize {
    self.len
  }

  fn peek(&self) -> Option<&E> {
    let mut all = self.buckets.values().flatten();
    match &self.order {
      Some(order) => all.min_by(|a, b| order(a, b)),
      None => all.next(),
    }
  }

  fn drain(&mut self) -> Result<Vec<E>, SweepAreaError> {
    self.ensure_open()?;
    let mut all: Vec<E> = self.buckets.drain().flat_map(|(_, bucket)| bucket).collect();
    self.len = 0;
    self.sort(&mut all);
    Ok(all)
  }

  fn iter(&self) -> Result<Box<dyn Iterator<Item = &E> + '_>, SweepAreaError> {
    self.ensure_open()?;
    Ok(Box::new(self.buckets.values().flatten()))
  }

  fn memory_usage(&self) -> usize {
    self.settings.object_size * self.len
  }

  fn dimension(&self) -> usize {
    self.predicates.dimension()
  }
}
