//! Temporal set difference.
//!
//! `left - right` over temporal objects: at every instant `t` and for every
//! payload `p`, the output is valid `max(0, a - b)` times, where `a` and `b`
//! count the left and right objects with payload `p` valid at `t`.
//!
//! ## Algorithm
//!
//! Each input has a start-sorted sweep area holding the parts of its elements
//! not yet cancelled by the other side. The two areas never both cover the
//! same payload at the same instant.
//!
//! An arriving object `o` from input `j` queries the other area `k` for
//! value-equal, overlapping candidates in start order. `o` is tracked as a
//! list of pending pieces; each candidate that still overlaps a piece is
//! removed from area `k`, the overlap is cut out of both, and the candidate's
//! leftovers return to area `k`. Whatever is pending at the end goes into area
//! `j`.
//!
//! After every event the left area expires (and emits) the pieces ending at or
//! before the minimum timestamp: no future right element can overlap them.
//! The right area merely drops such pieces. The forwarded heartbeat is capped
//! by the start of the oldest pending left piece.
//!
//! Once the left input is done and its area is empty, nothing can be emitted
//! any more and the operator completes without waiting for the right input.

use super::core::{Emitter, Operator};
use crate::config::SweepAreaConfig;
use crate::error::{NodeError, SweepAreaError};
use crate::metadata::{OperatorDescriptor, STATEFUL_METADATA};
use crate::node::InputId;
use crate::sweep_area::{ListSweepArea, ReorganizeMode, SweepArea, SweepAreaPredicates, SweepAreaSettings};
use crate::time::{Payload, TemporalObject, Timestamp, ends_before, interval_overlap, start_order, value_equivalent};
use std::sync::Arc;
use tracing::trace;

static DIFFERENCE: OperatorDescriptor = OperatorDescriptor::new("temporal-difference", STATEFUL_METADATA);

const LEFT: usize = 0;
const RIGHT: usize = 1;

type Area<P> = ListSweepArea<TemporalObject<P>>;

/// Temporal difference of two inputs.
pub struct TemporalDifference<P: Payload> {
  inputs: [InputId; 2],
  areas: [Area<P>; 2],
}

impl<P: Payload> TemporalDifference<P> {
  /// Creates the operator reading the left side on input 0 and the right side
  /// on input 1.
  ///
  /// The left area always expires lazily in start order, which keeps the
  /// output ordered; the configured reorganize mode applies to the right
  /// area.
  ///
  /// # Errors
  ///
  /// Propagates sweep area construction errors.
  pub fn new(config: &SweepAreaConfig) -> Result<Self, SweepAreaError> {
    let predicates: SweepAreaPredicates<TemporalObject<P>> = SweepAreaPredicates::uniform(
      2,
      Arc::new(|a: &TemporalObject<P>, b: &TemporalObject<P>| a == b),
      Arc::new(|stored: &TemporalObject<P>, probe: &TemporalObject<P>| {
        value_equivalent(stored, probe) && interval_overlap(stored, probe)
      }),
      Arc::new(ends_before::<P>),
    )?;
    let left = ListSweepArea::sorted(
      predicates.clone(),
      SweepAreaSettings::owned_by(LEFT)
        .with_config(config)
        .with_mode(ReorganizeMode::Lazy),
      Arc::new(start_order::<P>),
    )?;
    let right = ListSweepArea::sorted(
      predicates,
      SweepAreaSettings::owned_by(RIGHT).with_config(config),
      Arc::new(start_order::<P>),
    )?;
    Ok(Self {
      inputs: [0, 1],
      areas: [left, right],
    })
  }

  /// Reads the left and right sides from the given input ids instead.
  pub fn with_inputs(mut self, left: InputId, right: InputId) -> Self {
    self.inputs = [left, right];
    self
  }

  /// Pieces held per side, `[left, right]`.
  pub fn area_sizes(&self) -> [usize; 2] {
    [self.areas[LEFT].len(), self.areas[RIGHT].len()]
  }

  fn side(&self, input: InputId) -> Option<usize> {
    self.inputs.iter().position(|candidate| *candidate == input)
  }

  /// Cancels `element` from side `j` against the other side and stores the
  /// rest.
  fn subtract(&mut self, element: TemporalObject<P>, j: usize) -> Result<(), SweepAreaError> {
    let k = 1 - j;
    let candidates = self.areas[k].query(&element, j)?;
    let mut pending = vec![element];
    for candidate in candidates {
      if pending.is_empty() {
        break;
      }
      if !pending
        .iter()
        .any(|piece| piece.interval().overlaps(candidate.interval()))
      {
        continue;
      }
      self.areas[k].remove(&candidate)?;
      let mut leftovers = vec![*candidate.interval()];
      let mut next = Vec::with_capacity(pending.len() + 1);
      for piece in pending {
        if !piece.interval().overlaps(candidate.interval()) {
          next.push(piece);
          continue;
        }
        leftovers = leftovers
          .iter()
          .flat_map(|part| part.difference(piece.interval()))
          .collect();
        for part in piece.interval().difference(candidate.interval()) {
          next.push(piece.clone().with_interval(part));
        }
      }
      pending = next;
      for part in leftovers {
        self.areas[k].insert(candidate.clone().with_interval(part))?;
      }
    }
    for piece in pending {
      self.areas[j].insert(piece)?;
    }
    Ok(())
  }
}

impl<P: Payload> Operator<P> for TemporalDifference<P> {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &DIFFERENCE
  }

  fn accepts_input(&self, input: InputId) -> bool {
    self.side(input).is_some()
  }

  fn process_object(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    element: TemporalObject<P>,
    input: InputId,
  ) -> Result<(), NodeError> {
    let j = self.side(input).ok_or(NodeError::UnknownInput {
      node: emitter.node_id(),
      input,
    })?;
    if j == RIGHT && emitter.received_done(self.inputs[LEFT]) && self.areas[LEFT].is_empty() {
      trace!("TemporalDifference::process_object(node={}) right element with nothing left to cancel", emitter.node_id());
      return Ok(());
    }
    if j == LEFT && emitter.received_done(self.inputs[RIGHT]) && self.areas[RIGHT].is_empty() {
      self.areas[LEFT].insert(element)?;
      return Ok(());
    }
    self.subtract(element, j)?;
    Ok(())
  }

  fn process_heartbeat(
    &mut self,
    emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    for piece in self.areas[LEFT].expire(&min, RIGHT)? {
      emitter.transfer(piece);
    }
    self.areas[RIGHT].reorganize(&min, LEFT)?;
    if emitter.received_done(self.inputs[LEFT]) && self.areas[LEFT].is_empty() {
      emitter.request_done();
    }
    Ok(Some(
      self.areas[LEFT]
        .peek()
        .map_or(min, |oldest| oldest.start().min(min)),
    ))
  }

  fn on_input_done(&mut self, emitter: &mut Emitter<'_, '_, P>, input: InputId) -> Result<(), NodeError> {
    // Right pieces keep cancelling later left elements after the right input
    // finishes, so only a finished and drained left side completes early.
    if self.side(input) == Some(LEFT) && self.areas[LEFT].is_empty() {
      emitter.request_done();
    }
    Ok(())
  }

  fn on_all_done(&mut self, emitter: &mut Emitter<'_, '_, P>) -> Result<(), NodeError> {
    for piece in self.areas[LEFT].drain()? {
      emitter.transfer(piece);
    }
    self.areas[RIGHT].clear();
    Ok(())
  }

  fn state_size(&self) -> usize {
    self.areas[LEFT].len() + self.areas[RIGHT].len()
  }

  fn memory_usage(&self) -> usize {
    self.areas[LEFT].memory_usage() + self.areas[RIGHT].memory_usage()
  }

  fn close(&mut self) {
    for area in &mut self.areas {
      area.close();
    }
  }
}
