//! Time-based windows: rewrite each element's validity to the window it
//! belongs to.

use super::core::{Emitter, Operator};
use crate::error::NodeError;
use crate::metadata::{BASE_METADATA, OperatorDescriptor};
use crate::node::InputId;
use crate::time::{Payload, TemporalObject, TimeInterval, Timestamp};
use serde::{Deserialize, Serialize};

static WINDOW: OperatorDescriptor = OperatorDescriptor::new("temporal-window", BASE_METADATA);

/// Window shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WindowKind {
  /// An element starting at `t` stays valid on `[t, t + size + 1)`: it is
  /// visible at its own instant and the `size` instants after it.
  Sliding {
    /// Extent past the start instant.
    size: Timestamp,
  },
  /// Tumbling windows `[offset + k * size, offset + (k + 1) * size)`; an
  /// element becomes valid on the window containing its start.
  Fixed {
    /// Window length, at least 1.
    size: Timestamp,
    /// Alignment of window boundaries.
    offset: Timestamp,
  },
}

impl WindowKind {
  /// Interval assigned to an element starting at `start`.
  pub fn assign(&self, start: Timestamp) -> TimeInterval {
    match *self {
      WindowKind::Sliding { size } => {
        let end = start.saturating_add(size).saturating_add(1);
        TimeInterval::new(start, end).unwrap_or_else(|_| TimeInterval::open_ended(start))
      }
      WindowKind::Fixed { size, offset } => {
        let size = size.max(1);
        let phase = offset % size;
        let rest = start % size;
        let into_window = if rest >= phase { rest - phase } else { size - (phase - rest) };
        let window_start = start.saturating_sub(into_window);
        let end = start.saturating_add(size - into_window);
        TimeInterval::new(window_start, end).unwrap_or_else(|_| TimeInterval::open_ended(window_start))
      }
    }
  }
}

/// Assigns elements to windows.
///
/// Sliding windows keep start timestamps, so the output order and the
/// forwarded heartbeat equal the input's. Fixed windows move starts back to
/// the window boundary, so the forwarded heartbeat is the boundary of the
/// window containing the minimum timestamp.
pub struct TemporalWindow {
  kind: WindowKind,
}

impl TemporalWindow {
  /// Sliding window of extent `size`.
  pub fn sliding(size: Timestamp) -> Self {
    Self {
      kind: WindowKind::Sliding { size },
    }
  }

  /// Tumbling window of length `size` (clamped to at least 1) aligned at
  /// `offset`.
  pub fn fixed(size: Timestamp, offset: Timestamp) -> Self {
    Self {
      kind: WindowKind::Fixed {
        size: size.max(1),
        offset,
      },
    }
  }

  /// Window shape.
  pub fn kind(&self) -> WindowKind {
    self.kind
  }
}

impl<P: Payload> Operator<P> for TemporalWindow {
  fn descriptor(&self) -> &'static OperatorDescriptor {
    &WINDOW
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
    let interval = self.kind.assign(element.start());
    emitter.transfer(element.with_interval(interval));
    Ok(())
  }

  fn process_heartbeat(
    &mut self,
    _emitter: &mut Emitter<'_, '_, P>,
    min: Timestamp,
  ) -> Result<Option<Timestamp>, NodeError> {
    Ok(Some(match self.kind {
      WindowKind::Sliding { .. } => min,
      WindowKind::Fixed { .. } => self.kind.assign(min).start(),
    }))
  }
}
