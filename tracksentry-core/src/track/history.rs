//! Track History Storage
//!
//! Bounded position history per track (ring buffer), queried by area,
//! gate and kinematic conditions.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::geo::{LatLong, Velocity};
use crate::shapes::{GateDirection, ShapeKind};

/// A single point in a track's history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    /// Unix timestamp in milliseconds
    pub time_ms: u64,
    pub position: LatLong,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
}

/// History settings shared by all tracks of a database
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySettings {
    /// Maximum points per track (for memory management)
    pub max_points: usize,
    /// Minimum interval between points in milliseconds
    pub min_interval_ms: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            max_points: 600,
            min_interval_ms: 1000,
        }
    }
}

/// History for a single track (circular buffer, newest at back)
#[derive(Debug, Clone)]
pub struct TrackHistory {
    points: VecDeque<HistoryPoint>,
    settings: HistorySettings,
}

impl TrackHistory {
    pub fn new(settings: HistorySettings) -> Self {
        TrackHistory {
            points: VecDeque::with_capacity(settings.max_points.min(64)),
            settings,
        }
    }

    /// Add a point. Returns false if rate-limited.
    pub fn add_point(&mut self, point: HistoryPoint) -> bool {
        if let Some(last) = self.points.back() {
            if point.time_ms < last.time_ms
                || point.time_ms - last.time_ms < self.settings.min_interval_ms
            {
                return false;
            }
        }
        while self.points.len() >= self.settings.max_points.max(1) {
            self.points.pop_front();
        }
        self.points.push_back(point);
        true
    }

    /// Points, oldest first
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &HistoryPoint> + ExactSizeIterator {
        self.points.iter()
    }

    pub fn clear_history(&mut self) {
        self.points.clear();
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Seconds the track has been continuously inside `area` up to `now_ms`,
    /// or `None` if the newest point is outside.
    pub fn time_in_area(&self, area: &ShapeKind, now_ms: u64) -> Option<f64> {
        let mut entered = None;
        for p in self.points.iter().rev() {
            if !area.contains(&p.position) {
                break;
            }
            entered = Some(p.time_ms);
        }
        entered.map(|t| now_ms.saturating_sub(t) as f64 / 1000.0)
    }

    /// Has any point since `since_ms` (or ever, if `None`) been inside `area`
    pub fn was_in_area(&self, area: &ShapeKind, since_ms: Option<u64>) -> bool {
        self.points
            .iter()
            .rev()
            .take_while(|p| since_ms.map_or(true, |s| p.time_ms >= s))
            .any(|p| area.contains(&p.position))
    }

    /// Has the track stayed inside `area` for at least `secs`, with the
    /// recorded history covering that whole period.
    pub fn lingered_in_area(&self, area: &ShapeKind, secs: f64, now_ms: u64) -> bool {
        let Some(oldest) = self.points.front() else {
            return false;
        };
        if (now_ms.saturating_sub(oldest.time_ms) as f64) / 1000.0 < secs {
            return false;
        }
        self.time_in_area(area, now_ms).is_some_and(|t| t >= secs)
    }

    /// Was the first recorded point inside `area`
    pub fn started_in_area(&self, area: &ShapeKind) -> bool {
        self.points
            .front()
            .is_some_and(|p| area.contains(&p.position))
    }

    /// Gate crossings made by consecutive points, newest first. Only moves
    /// ending at or after `since_ms` are considered; with `None` only the
    /// most recent move is.
    pub fn gate_crossings(
        &self,
        gate: &ShapeKind,
        since_ms: Option<u64>,
    ) -> Vec<(u64, GateDirection)> {
        let n = self.points.len();
        if n < 2 {
            return Vec::new();
        }
        let moves = match since_ms {
            Some(_) => n - 1,
            None => 1,
        };
        (1..n)
            .rev()
            .take(moves)
            .map(|i| (&self.points[i - 1], &self.points[i]))
            .take_while(|(_, to)| since_ms.map_or(true, |s| to.time_ms >= s))
            .filter_map(|(from, to)| {
                gate.gate_crossing(&from.position, &to.position)
                    .map(|d| (to.time_ms, d))
            })
            .collect()
    }

    pub fn is_gate_crossed(
        &self,
        gate: &ShapeKind,
        direction: Option<GateDirection>,
        since_ms: Option<u64>,
    ) -> bool {
        self.gate_crossings(gate, since_ms)
            .iter()
            .any(|(_, d)| direction.map_or(true, |want| *d == want))
    }

    /// Two newest points carrying velocity that are at least one second apart
    fn velocity_pair(&self) -> Option<(&HistoryPoint, &HistoryPoint, f64)> {
        let mut with_velocity = self.points.iter().rev().filter(|p| p.velocity.is_some());
        let newest = with_velocity.next()?;
        let older = with_velocity.find(|p| newest.time_ms.saturating_sub(p.time_ms) >= 1000)?;
        let dt = (newest.time_ms - older.time_ms) as f64 / 1000.0;
        Some((older, newest, dt))
    }

    /// Estimated acceleration in m/s², positive when speeding up
    pub fn acceleration(&self) -> Option<f64> {
        let (older, newest, dt) = self.velocity_pair()?;
        let v0 = older.velocity?.speed_mps;
        let v1 = newest.velocity?.speed_mps;
        Some((v1 - v0) / dt)
    }

    /// Estimated rate of turn in degrees per second, positive to starboard
    pub fn rate_of_turn(&self) -> Option<f64> {
        let (older, newest, dt) = self.velocity_pair()?;
        let mut d = newest.velocity?.course_degs - older.velocity?.course_degs;
        if d > 180.0 {
            d -= 360.0;
        } else if d < -180.0 {
            d += 360.0;
        }
        Some(d / dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(o: LatLong) -> ShapeKind {
        ShapeKind::Polygon {
            points: vec![
                o,
                o.offset_by(1000.0, 0.0),
                o.offset_by(1000.0, 1000.0),
                o.offset_by(0.0, 1000.0),
            ],
        }
    }

    fn point(time_ms: u64, position: LatLong) -> HistoryPoint {
        HistoryPoint {
            time_ms,
            position,
            velocity: None,
        }
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let mut h = TrackHistory::new(HistorySettings {
            max_points: 3,
            min_interval_ms: 0,
        });
        for i in 0..5 {
            h.add_point(point(i * 1000, LatLong::new(0.0, i as f64 * 0.001)));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.history().next().map(|p| p.time_ms), Some(2000));
        h.clear_history();
        assert!(h.is_empty());
    }

    #[test]
    fn test_rate_limited() {
        let mut h = TrackHistory::new(HistorySettings::default());
        assert!(h.add_point(point(1000, LatLong::new(0.0, 0.0))));
        assert!(!h.add_point(point(1500, LatLong::new(0.0, 0.0))));
        assert!(h.add_point(point(2000, LatLong::new(0.0, 0.0))));
        // Out of order
        assert!(!h.add_point(point(100, LatLong::new(0.0, 0.0))));
    }

    #[test]
    fn test_area_queries() {
        let o = LatLong::new(50.0, 0.0);
        let area = square(o);
        let mut h = TrackHistory::new(HistorySettings::default());
        h.add_point(point(0, o.offset_by(-500.0, 500.0)));
        h.add_point(point(10_000, o.offset_by(100.0, 500.0)));
        h.add_point(point(20_000, o.offset_by(200.0, 500.0)));

        assert!(!h.started_in_area(&area));
        assert!(h.was_in_area(&area, None));
        assert!(!h.was_in_area(&area, Some(25_000)));
        assert_eq!(h.time_in_area(&area, 30_000), Some(20.0));
        assert!(h.lingered_in_area(&area, 15.0, 30_000));
        assert!(!h.lingered_in_area(&area, 25.0, 30_000));
    }

    #[test]
    fn test_gate_crossings() {
        let o = LatLong::new(10.0, 10.0);
        let gate = ShapeKind::Gate {
            points: vec![o, o.offset_by(0.0, 1000.0)],
        };
        let mut h = TrackHistory::new(HistorySettings::default());
        h.add_point(point(0, o.offset_by(-100.0, 500.0)));
        h.add_point(point(5_000, o.offset_by(100.0, 500.0)));
        h.add_point(point(10_000, o.offset_by(300.0, 500.0)));

        // Latest move does not cross
        assert!(!h.is_gate_crossed(&gate, None, None));
        // Within the last 10 seconds it crossed forward
        assert!(h.is_gate_crossed(&gate, Some(GateDirection::Forward), Some(0)));
        assert!(!h.is_gate_crossed(&gate, Some(GateDirection::Reverse), Some(0)));
        // Window excludes the crossing move
        assert!(!h.is_gate_crossed(&gate, None, Some(6_000)));
    }

    #[test]
    fn test_kinematics() {
        let mut h = TrackHistory::new(HistorySettings::default());
        let p = LatLong::new(0.0, 0.0);
        h.add_point(HistoryPoint {
            time_ms: 0,
            position: p,
            velocity: Some(Velocity::new(10.0, 350.0)),
        });
        h.add_point(HistoryPoint {
            time_ms: 10_000,
            position: p,
            velocity: Some(Velocity::new(15.0, 10.0)),
        });
        assert!((h.acceleration().unwrap() - 0.5).abs() < 1e-9);
        assert!((h.rate_of_turn().unwrap() - 2.0).abs() < 1e-9);
    }
}
