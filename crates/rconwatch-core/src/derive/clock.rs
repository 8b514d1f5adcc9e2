//! Server-to-local clock mapping.
//!
//! Raw log lines carry server epoch seconds; snapshots carry the local wall
//! clock. Every poll that returns log lines also yields an estimate of the
//! server clock at fetch time (line time plus its reported age), which pairs
//! with the snapshot's local time as a calibration point. Server times are
//! mapped to local time by the line through the two most recent points.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

/// Slopes outside this band are treated as measurement noise.
const MIN_SLOPE: f64 = 0.5;
const MAX_SLOPE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CalibrationPoint {
    server_ms: i64,
    local: DateTime<Utc>,
}

/// Linear server-to-local clock mapping.
///
/// # Invariants
///
/// - At most two points are retained.
/// - Retained points are strictly increasing in both coordinates.
#[derive(Debug, Clone, Default)]
pub struct ClockCalibration {
    points: VecDeque<CalibrationPoint>,
}

impl ClockCalibration {
    /// Calibration with no points (identity mapping).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Record that the server clock read `server_ms` at local time `local`.
    ///
    /// Points that do not move both clocks forward are ignored.
    pub fn observe(&mut self, server_ms: i64, local: DateTime<Utc>) {
        if let Some(last) = self.points.back() {
            if server_ms <= last.server_ms || local <= last.local {
                return;
            }
        }
        self.points.push_back(CalibrationPoint { server_ms, local });
        while self.points.len() > 2 {
            self.points.pop_front();
        }
    }

    /// Map server epoch seconds to local wall-clock time.
    pub fn map_secs(&self, server_secs: i64) -> DateTime<Utc> {
        self.map_ms(server_secs.saturating_mul(1000))
    }

    /// Map server epoch milliseconds to local wall-clock time.
    ///
    /// With no points the server clock is taken at face value; with one point
    /// (or two that imply an implausible rate) the clocks are assumed to tick
    /// at the same rate with a fixed offset.
    pub fn map_ms(&self, server_ms: i64) -> DateTime<Utc> {
        let Some(anchor) = self.points.back().copied() else {
            return DateTime::from_timestamp_millis(server_ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        };

        let slope = self.slope().unwrap_or(1.0);
        let offset_ms = (server_ms.saturating_sub(anchor.server_ms)) as f64 * slope;
        let offset = TimeDelta::try_milliseconds(offset_ms.round() as i64).unwrap_or(TimeDelta::zero());
        anchor.local.checked_add_signed(offset).unwrap_or(anchor.local)
    }

    fn slope(&self) -> Option<f64> {
        let (first, last) = (self.points.front()?, self.points.back()?);
        let server_span = last.server_ms - first.server_ms;
        if server_span <= 0 {
            return None;
        }
        let local_span = (last.local - first.local).num_milliseconds();
        let slope = local_span as f64 / server_span as f64;
        (MIN_SLOPE..=MAX_SLOPE).contains(&slope).then_some(slope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn no_points_is_identity() {
        let clock = ClockCalibration::new();
        assert_eq!(clock.map_secs(1_700_000_000), local(1_700_000_000_000));
    }

    #[test]
    fn single_point_applies_offset() {
        let mut clock = ClockCalibration::new();
        // Server runs 5 s behind local.
        clock.observe(1_000_000, local(1_005_000));
        assert_eq!(clock.map_ms(1_002_000), local(1_007_000));
    }

    #[test]
    fn two_points_interpolate() {
        let mut clock = ClockCalibration::new();
        clock.observe(0, local(10_000));
        // Local clock runs 10% fast relative to server.
        clock.observe(10_000, local(21_000));
        assert_eq!(clock.map_ms(5_000), local(15_500));
        assert_eq!(clock.len(), 2);
    }

    #[test]
    fn implausible_slope_falls_back_to_offset() {
        let mut clock = ClockCalibration::new();
        clock.observe(0, local(10_000));
        clock.observe(1_000, local(60_000));
        assert_eq!(clock.map_ms(2_000), local(61_000));
    }

    #[test]
    fn non_monotonic_points_ignored() {
        let mut clock = ClockCalibration::new();
        clock.observe(5_000, local(5_000));
        clock.observe(4_000, local(6_000));
        clock.observe(6_000, local(5_000));
        assert_eq!(clock.len(), 1);
    }

    #[test]
    fn keeps_two_most_recent() {
        let mut clock = ClockCalibration::new();
        clock.observe(0, local(0));
        clock.observe(1_000, local(1_000));
        clock.observe(2_000, local(2_000));
        assert_eq!(clock.len(), 2);
        assert_eq!(clock.map_ms(3_000), local(3_000));
    }
}
