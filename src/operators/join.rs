//! Symmetric temporal join.

use super::core::{Emitter, Operator};
use crate::config::SweepAreaConfig;
use crate::error::{NodeError, SweepAreaError};
use crate::metadata::{OperatorDescriptor, STATEFUL_METADATA};
use crate::node::InputId;
use crate::sweep_area::{
  HeapSweepArea, ListSweepArea, QueryFn, ReorganizeMode, SweepArea, SweepAreaPredicates,
  SweepAreaSettings,
};
use crate::time::{Payload, TemporalObject, Timestamp, ends_before, start_order, starts_at_or_before};
use std::sync::Arc;

static JOIN: OperatorDescriptor = OperatorDescriptor::new("temporal-join", STATEFUL_METADATA);

type Area<P> = ListSweepArea<TemporalObject<P>>;

/// Joins two inputs on overlapping validity and a payload predicate.
///
/// Each input keeps a start-sorted area. An element from one side probes the
/// other side's area, and every match produces `combine(left, right)` valid
/// on the intersection of both intervals. Results pass through a start-keyed
/// heap and leave once the minimum timestamp reaches their start, so output
/// stays start-ordered. Input 0 is the left side, input 1 the right.
pub struct TemporalJoin<P: Payload> {
  areas: [Area<P>; 2],
  results: HeapSweepArea<TemporalObject<P>>,
  combine: Box<dyn Fn(&P, &P) -> P + Send>,
}

impl<P: Payload> TemporalJoin<P> {
  /// Creates the join.
  ///
  /// `matches(left, right)` decides whether two overlapping payloads join.
  ///
  /// # Errors
  ///
  /// Propagates sweep area construction errors.
  pub fn new(
    config: &SweepAreaConfig,
    matches: impl Fn(&P, &P) -> bool + Send + Sync + 'static,
    combine: impl Fn(&P, &P) -> P + Send + 'static,
  ) -> Result<Self, SweepAreaError> {
    let matches = Arc::new(matches);
    let from_left = Arc::clone(&matches);
    let from_right = matches;
    let probe_left: QueryFn<TemporalObject<P>> = Arc::new(move |stored: &TemporalObject<P>, probe: &TemporalObject<P>| {
      stored.interval().overlaps(probe.interval()) && from_left(probe.payload(), stored.payload())
    });
    let probe_right: QueryFn<TemporalObject<P>> = Arc::new(move |stored: &TemporalObject<P>, probe: &TemporalObject<P>| {
      stored.interval().overlaps(probe.interval()) && from_right(stored.payload(), probe.payload())
    });
    let predicates: SweepAreaPredicates<TemporalObject<P>> = SweepAreaPredicates::new(
      Arc::new(|a: &TemporalObject<P>, b: &TemporalObject<P>| a == b),
      vec![probe_left, probe_right],
      vec![Arc::new(ends_before::<P>), Arc::new(ends_before::<P>)],
    )?;
    let area = |owner: usize| {
      ListSweepArea::sorted(
        predicates.clone(),
        SweepAreaSettings::owned_by(owner)
          .with_config(config)
          .with_self_reorganize(false),
        Arc::new(start_order::<P>),
      )
    };
    let release: SweepAreaPredicates<TemporalObject<P>> = SweepAreaPredicates::uniform(
      1,
      Arc::new(|a: &TemporalObject<P>, b: &TemporalObject<P>| a == b),
      Arc::new(|_: &TemporalObject<P>, _: &TemporalObject<P>| false),
      Arc::new(starts_at_or_before::<P>),
    )?;
    let results = HeapSweepArea::new(
      release,
      SweepAreaSettings::owned_by(0)
        .with_config(config)
        .with_mode(ReorganizeMode::Lazy),
      Arc::new(|element: &TemporalObject<P>| element.start()),
    )?;
    Ok(Self {
      areas: [area(0)?, area(1)?],
      results,
      combine: Box::new(combine),
    })
  }

  /// Elements held per side.
  pub fn area_sizes(&self) -> [usize; 2] {
    [self.areas[0].len(), self.areas[1].len()]
  }
}

impl<P: Payload> Operator<P> for TemporalJoin<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &JOIN
  }

  fn accepts_input(&self, input: InputId) -> bool {
    input < 2
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let j = input as usize;
    let k = 1 - j;
    self.areas[k].reorganize(&element.start(), j)?;
    for stored in self.areas[k].query(&element, j)? {
      let Some(interval) = stored.interval().intersect(element.interval()) else {
        continue;
      };
      let (left, right) = if j == 0 { (&element, &stored) } else { (&stored, &element) };
      let payload = (self.combine)(left.payload(), right.payload());
      self.results.insert(TemporalObject::new(payload, interval))?;
    }
    if !emitter.received_done(k as InputId) {
      self.areas[j].insert(element)?;
    }
    Ok(())
  }

  fn process_heartbeat(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    self.areas[0].reorganize(&min, 1)?;
    self.areas[1].reorganize(&min, 0)?;
    for result in self.results.expire(&min, 0)? {
      emitter.transfer(result);
    }
    Ok(Some(self.results.peek().map_or(min, |next| next.start().min(min))))
  }

  fn on_input_done(&mut self, _emitter: &mut Emitter<'_, '_, P>, input: InputId) -> Result<(), NodeError> {
    // Nothing will probe the finished side's counterpart any more.
    let other = 1 - input as usize;
    self.areas[other].clear();
    Ok(())
  }

  fn on_all_done(&mut self, emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    for result in self.results.drain()? {
      emitter.transfer(result);
    }
    Ok(())
  }

  fn state_size(&self) -> usize {
    self.areas[0].len() + self.areas[1].len() + self.results.len()
  }

  fn memory_usage(&self) -> usize {
    self.areas[0].memory_usage() + self.areas[1].memory_usage() + self.results.memory_usage()
  }

  fn close(&mut self) {
    for area in &mut self.areas {
      area.close();
    }
    self.results.close();
  }
}
