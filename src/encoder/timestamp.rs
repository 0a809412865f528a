//! Presentation timestamp sequencing
//!
//! Timestamps come from a monotonic clock read at drain time, measured from
//! the session epoch shared by every track of one container.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Fold `candidate` forward so it lands strictly after `previous`.
///
/// A candidate at or before the previous timestamp is mirrored across it
/// (`previous + (previous - candidate)`), with a minimum step of 1 µs so a
/// repeated clock reading still advances.
pub fn fold_forward(previous: i64, candidate: i64) -> i64 {
    if candidate > previous {
        candidate
    } else {
        previous + (previous - candidate).max(1)
    }
}

/// Per-track strictly increasing timestamp generator
#[derive(Debug)]
pub struct PtsSequencer {
    epoch: Instant,
    previous_output_us: AtomicI64,
}

impl PtsSequencer {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            previous_output_us: AtomicI64::new(0),
        }
    }

    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Timestamp for an input buffer.
    ///
    /// Clamped against the last written sample but not recorded.
    pub fn input_pts(&self) -> i64 {
        let previous = self.previous_output_us.load(Ordering::Acquire);
        fold_forward(previous, self.now_us())
    }

    /// Timestamp for the next sample written to the container.
    pub fn next_output_pts(&self) -> i64 {
        self.advance(self.now_us())
    }

    /// Record `candidate` (folded forward if needed) as the latest output timestamp.
    pub fn advance(&self, candidate: i64) -> i64 {
        let previous = self.previous_output_us.load(Ordering::Acquire);
        let pts = fold_forward(previous, candidate);
        self.previous_output_us.store(pts, Ordering::Release);
        pts
    }

    pub fn last_output_pts(&self) -> i64 {
        self.previous_output_us.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_forward_passes_increasing_values() {
        assert_eq!(fold_forward(100, 150), 150);
    }

    #[test]
    fn test_fold_forward_mirrors_backward_jump() {
        assert_eq!(fold_forward(100, 80), 120);
    }

    #[test]
    fn test_fold_forward_advances_on_repeat() {
        assert_eq!(fold_forward(100, 100), 101);
    }

    #[test]
    fn test_sequencer_strictly_increasing_on_jittery_clock() {
        let sequencer = PtsSequencer::new(Instant::now());
        let readings = [10, 20, 20, 15, 40, 39, 39, 100, 0, 101];
        let mut last = i64::MIN;
        for reading in readings {
            let pts = sequencer.advance(reading);
            assert!(pts > last, "{pts} not after {last}");
            last = pts;
        }
        assert_eq!(sequencer.last_output_pts(), last);
    }

    #[test]
    fn test_input_pts_does_not_record() {
        let sequencer = PtsSequencer::new(Instant::now());
        sequencer.advance(5_000_000);
        let input = sequencer.input_pts();
        assert!(input > 5_000_000);
        assert_eq!(sequencer.last_output_pts(), 5_000_000);
    }

    #[test]
    fn test_next_output_pts_is_monotonic() {
        let sequencer = PtsSequencer::new(Instant::now());
        let a = sequencer.next_output_pts();
        let b = sequencer.next_output_pts();
        let c = sequencer.next_output_pts();
        assert!(a < b && b < c);
    }
}
