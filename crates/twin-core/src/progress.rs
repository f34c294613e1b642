//! Load progress accounting.
//!
//! Progress is reported in percent and is monotonically non-decreasing for
//! the duration of one load. It is capped below 100 until the load actually
//! succeeds, so the loading indicator never shows "done" for a load that is
//! about to fail.

use std::sync::Arc;

use crate::registry::SessionRegistry;

/// Highest value progress can reach before the load completes.
pub const IN_FLIGHT_CEILING: f64 = 99.0;

/// Share of the bar covered by artifact fetching; instantiation covers the
/// rest up to [`IN_FLIGHT_CEILING`].
pub const FETCH_SHARE: f64 = 80.0;

/// Monotonic progress counter for one load.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressTracker {
    percent: f64,
}

impl ProgressTracker {
    /// Current value in percent.
    pub const fn percent(&self) -> f64 {
        self.percent
    }

    /// Move forward to `percent`, clamped to `[current, IN_FLIGHT_CEILING]`.
    ///
    /// Returns `true` if the value changed. Non-finite input is ignored.
    pub fn advance_to(&mut self, percent: f64) -> bool {
        if !percent.is_finite() {
            return false;
        }
        let next = percent.min(IN_FLIGHT_CEILING);
        if next > self.percent {
            self.percent = next;
            true
        } else {
            false
        }
    }

    /// Mark the load complete (100%).
    pub const fn complete(&mut self) {
        self.percent = 100.0;
    }

    /// Start over for a new load.
    pub const fn reset(&mut self) {
        self.percent = 0.0;
    }
}

/// `done / total` as a fraction, `1.0` for an empty total.
pub fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    let to_f64 = |n: usize| u32::try_from(n).map_or(f64::from(u32::MAX), f64::from);
    (to_f64(done) / to_f64(total)).clamp(0.0, 1.0)
}

/// Reports sub-phase progress into the session registry.
///
/// A sink covers the span `[base, base + span]` of the overall bar; the
/// phase reports fractions in `[0, 1]` of its own work.
#[derive(Clone)]
pub struct ProgressSink {
    registry: Arc<SessionRegistry>,
    base: f64,
    span: f64,
}

impl ProgressSink {
    /// Create a sink for the span starting at `base` percent.
    pub const fn new(registry: Arc<SessionRegistry>, base: f64, span: f64) -> Self {
        Self {
            registry,
            base,
            span,
        }
    }

    /// Report that `fraction` of this phase is done.
    pub fn report(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let clamped = fraction.clamp(0.0, 1.0);
        self.registry.report_progress(self.base + clamped * self.span);
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("base", &self.base)
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_moves_backwards() {
        let mut tracker = ProgressTracker::default();
        assert!(tracker.advance_to(40.0));
        assert!(!tracker.advance_to(20.0));
        assert!((tracker.percent() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn capped_until_complete() {
        let mut tracker = ProgressTracker::default();
        tracker.advance_to(250.0);
        assert!((tracker.percent() - IN_FLIGHT_CEILING).abs() < f64::EPSILON);
        tracker.complete();
        assert!((tracker.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ignores_nan() {
        let mut tracker = ProgressTracker::default();
        assert!(!tracker.advance_to(f64::NAN));
        assert!(tracker.percent().abs() < f64::EPSILON);
    }

    #[test]
    fn fraction_handles_empty_total() {
        assert!((fraction(0, 0) - 1.0).abs() < f64::EPSILON);
        assert!((fraction(1, 4) - 0.25).abs() < f64::EPSILON);
    }
}
