//! Counted handshake for multi-point range sweeps.
//!
//! The device brackets each sweep with `SWEEP_START`/`SWEEP_DONE`. The host
//! counts the measurement records in between and, only when the count equals
//! the expected value armed by the operator's point-count entry, commits the
//! staged records and acknowledges with `STORE_OK`. A withheld
//! acknowledgement is the retry signal: the device re-runs the sweep and
//! re-emits a fresh start/done pair. The host keeps no retry count and no
//! backoff of its own.

use crate::measurement::MeasurementRecord;

/// Largest accepted increment-count entry. The firmware re-prompts for
/// anything outside `1..=MAX_INCREMENTS`, so the host takes no corrective
/// action itself.
pub const MAX_INCREMENTS: u32 = 100;

#[derive(Debug)]
enum Phase {
    Idle,
    /// Armed with an expected point count, waiting for the start token.
    AwaitingBoundary { expected: u32 },
    /// Between boundary tokens, staging records.
    InSweep {
        expected: Option<u32>,
        staged: Vec<MeasurementRecord>,
    },
}

/// Resolution of one start/done pair.
#[derive(Debug, PartialEq)]
pub enum SweepVerdict {
    /// Count matched: commit these records and acknowledge.
    Accepted(Vec<MeasurementRecord>),
    /// Count mismatched (or never armed): records dropped, no
    /// acknowledgement, the device will retry.
    Rejected { expected: Option<u32>, received: u32 },
}

pub struct SweepTracker {
    phase: Phase,
}

impl SweepTracker {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Arm the handshake from the operator's increment-count entry.
    ///
    /// Stores `expected = increments + 1` (a sweep covers both endpoints).
    /// Entries outside `1..=100` leave the tracker unarmed and return false.
    pub fn arm(&mut self, increments: u32) -> bool {
        if !(1..=MAX_INCREMENTS).contains(&increments) {
            log::warn!("increment count {increments} out of range, handshake not armed");
            return false;
        }
        let expected = increments + 1;
        log::info!("sweep handshake armed, expecting {expected} points");
        match &mut self.phase {
            // Arming mid-sweep re-targets the pending sweep's comparison.
            Phase::InSweep { expected: e, .. } => *e = Some(expected),
            phase => *phase = Phase::AwaitingBoundary { expected },
        }
        true
    }

    /// Start token: unconditionally open a fresh staging buffer.
    ///
    /// A second start while already in a sweep means the previous one never
    /// resolved; its partial data is dropped rather than merged.
    pub fn on_sweep_start(&mut self) {
        let expected = match &self.phase {
            Phase::AwaitingBoundary { expected } => Some(*expected),
            Phase::InSweep { expected, staged } => {
                log::warn!(
                    "sweep restarted with {} staged points, discarding them",
                    staged.len()
                );
                *expected
            }
            Phase::Idle => None,
        };
        self.phase = Phase::InSweep {
            expected,
            staged: Vec::new(),
        };
    }

    /// Stage one record. Returns false (record not consumed) outside a sweep.
    pub fn on_record(&mut self, record: MeasurementRecord) -> bool {
        match &mut self.phase {
            Phase::InSweep { staged, .. } => {
                staged.push(record);
                true
            }
            _ => false,
        }
    }

    /// Done token: resolve the handshake and go idle.
    ///
    /// Returns `None` when no sweep was open. The comparison is exact; there
    /// is no tolerance window. The expectation is consumed either way.
    pub fn on_sweep_done(&mut self) -> Option<SweepVerdict> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::InSweep { expected, staged } => {
                let received = staged.len() as u32;
                if expected == Some(received) {
                    Some(SweepVerdict::Accepted(staged))
                } else {
                    Some(SweepVerdict::Rejected { expected, received })
                }
            }
            phase => {
                // Stray done token; put the armed state back if there was one.
                self.phase = phase;
                None
            }
        }
    }

    /// Drop any in-flight sweep (device reset mid-sweep). Returns how many
    /// staged records were discarded.
    pub fn discard(&mut self) -> usize {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::InSweep { staged, .. } => staged.len(),
            _ => 0,
        }
    }

    pub fn in_sweep(&self) -> bool {
        matches!(self.phase, Phase::InSweep { .. })
    }
}

impl Default for SweepTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Coordinate, RawValue, Reading};

    fn record(freq: u64) -> MeasurementRecord {
        MeasurementRecord {
            frequency_hz: freq,
            real: RawValue::measured(1),
            imag: RawValue::measured(-1),
            magnitude: Reading::measured(100.0),
            phase_deg: 0.0,
            resistance: Reading::measured(100.0),
            reactance: Reading::measured(0.0),
            coord: Coordinate::Unknown,
        }
    }

    fn run_sweep(tracker: &mut SweepTracker, points: u64) -> SweepVerdict {
        tracker.on_sweep_start();
        for f in 0..points {
            assert!(tracker.on_record(record(f)));
        }
        tracker.on_sweep_done().expect("sweep was open")
    }

    #[test]
    fn exact_count_is_accepted() {
        let mut tracker = SweepTracker::new();
        assert!(tracker.arm(10));

        match run_sweep(&mut tracker, 11) {
            SweepVerdict::Accepted(staged) => assert_eq!(staged.len(), 11),
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert!(!tracker.in_sweep());
    }

    #[test]
    fn short_and_long_sweeps_are_rejected() {
        for points in [10, 12] {
            let mut tracker = SweepTracker::new();
            assert!(tracker.arm(10));
            match run_sweep(&mut tracker, points) {
                SweepVerdict::Rejected { expected, received } => {
                    assert_eq!(expected, Some(11));
                    assert_eq!(received, points as u32);
                }
                other => panic!("expected rejection, got {other:?}"),
            }
            // Staging is gone either way.
            assert!(!tracker.in_sweep());
            assert_eq!(tracker.discard(), 0);
        }
    }

    #[test]
    fn unarmed_sweep_is_rejected() {
        let mut tracker = SweepTracker::new();
        match run_sweep(&mut tracker, 5) {
            SweepVerdict::Rejected { expected, received } => {
                assert_eq!(expected, None);
                assert_eq!(received, 5);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn expectation_is_consumed_by_resolution() {
        let mut tracker = SweepTracker::new();
        assert!(tracker.arm(4));
        match run_sweep(&mut tracker, 5) {
            SweepVerdict::Accepted(_) => {}
            other => panic!("expected acceptance, got {other:?}"),
        }
        // Next sweep runs against a cleared expectation.
        match run_sweep(&mut tracker, 5) {
            SweepVerdict::Rejected { expected: None, .. } => {}
            other => panic!("expected unarmed rejection, got {other:?}"),
        }
    }

    #[test]
    fn restart_discards_partial_data() {
        let mut tracker = SweepTracker::new();
        assert!(tracker.arm(2));

        tracker.on_sweep_start();
        assert!(tracker.on_record(record(1)));
        assert!(tracker.on_record(record(2)));

        // Device retried without a done token; stale points must not merge.
        tracker.on_sweep_start();
        for f in 0..3 {
            assert!(tracker.on_record(record(f)));
        }
        match tracker.on_sweep_done().expect("sweep was open") {
            SweepVerdict::Accepted(staged) => assert_eq!(staged.len(), 3),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_entries_do_not_arm() {
        let mut tracker = SweepTracker::new();
        assert!(!tracker.arm(0));
        assert!(!tracker.arm(101));
        match run_sweep(&mut tracker, 1) {
            SweepVerdict::Rejected { expected: None, .. } => {}
            other => panic!("expected unarmed rejection, got {other:?}"),
        }
        assert!(tracker.arm(100));
    }

    #[test]
    fn records_outside_a_sweep_are_not_staged() {
        let mut tracker = SweepTracker::new();
        assert!(!tracker.on_record(record(1)));
        assert!(tracker.on_sweep_done().is_none());
    }

    #[test]
    fn stray_done_keeps_armed_state() {
        let mut tracker = SweepTracker::new();
        assert!(tracker.arm(1));
        assert!(tracker.on_sweep_done().is_none());
        match run_sweep(&mut tracker, 2) {
            SweepVerdict::Accepted(staged) => assert_eq!(staged.len(), 2),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn reset_discard_reports_dropped_points() {
        let mut tracker = SweepTracker::new();
        tracker.arm(5);
        tracker.on_sweep_start();
        tracker.on_record(record(1));
        tracker.on_record(record(2));
        assert_eq!(tracker.discard(), 2);
        assert!(!tracker.in_sweep());
    }
}
