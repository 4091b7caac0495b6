//! Shape Database
//!
//! Named geographic shapes referenced by area, gate, proximity and CPA
//! conditions. Conditions hold shapes by name and cache the resolved ID;
//! every mutation of the database returns a [`ShapeEvent`] that the
//! engine forwards so those cached IDs never dangle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::geo::LatLong;

pub type ShapeId = u32;

/// Shape geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShapeKind {
    /// Closed polygon area (last point joins the first)
    Polygon { points: Vec<LatLong> },
    /// Circular area
    #[serde(rename_all = "camelCase")]
    Circle { centre: LatLong, radius_metres: f64 },
    /// Open polyline gate. Crossing from the left-hand side to the
    /// right-hand side, looking from the first point towards the last,
    /// is a forward crossing.
    Gate { points: Vec<LatLong> },
    /// Single point
    Point { position: LatLong },
}

/// Direction a track crossed a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDirection {
    Forward,
    Reverse,
}

impl ShapeKind {
    pub fn is_area(&self) -> bool {
        matches!(self, ShapeKind::Polygon { .. } | ShapeKind::Circle { .. })
    }

    pub fn is_gate(&self) -> bool {
        matches!(self, ShapeKind::Gate { .. })
    }

    pub fn is_point(&self) -> bool {
        matches!(self, ShapeKind::Point { .. })
    }

    /// Representative position (centre, first vertex or the point itself)
    pub fn reference(&self) -> Option<LatLong> {
        match self {
            ShapeKind::Polygon { points } | ShapeKind::Gate { points } => points.first().copied(),
            ShapeKind::Circle { centre, .. } => Some(*centre),
            ShapeKind::Point { position } => Some(*position),
        }
    }

    /// Check if a position lies inside this shape. Only areas have an inside.
    pub fn contains(&self, p: &LatLong) -> bool {
        match self {
            ShapeKind::Polygon { points } => {
                if points.len() < 3 {
                    return false;
                }
                let origin = points[0];
                let (px, py) = p.local_offset_from(&origin);
                let verts: Vec<(f64, f64)> =
                    points.iter().map(|v| v.local_offset_from(&origin)).collect();

                // Ray casting towards +x
                let mut inside = false;
                let mut j = verts.len() - 1;
                for i in 0..verts.len() {
                    let (xi, yi) = verts[i];
                    let (xj, yj) = verts[j];
                    if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
            ShapeKind::Circle {
                centre,
                radius_metres,
            } => centre.distance_to(p) <= *radius_metres,
            ShapeKind::Gate { .. } | ShapeKind::Point { .. } => false,
        }
    }

    /// Distance in metres from a position to the shape.
    /// Zero when inside an area.
    pub fn distance_to(&self, p: &LatLong) -> f64 {
        match self {
            ShapeKind::Point { position } => position.distance_to(p),
            ShapeKind::Circle {
                centre,
                radius_metres,
            } => (centre.distance_to(p) - radius_metres).max(0.0),
            ShapeKind::Polygon { points } => {
                if self.contains(p) {
                    0.0
                } else {
                    distance_to_segments(points, p, true)
                }
            }
            ShapeKind::Gate { points } => distance_to_segments(points, p, false),
        }
    }

    /// Direction of a gate crossing made by moving from `from` to `to`,
    /// or `None` if the move does not cross this gate.
    pub fn gate_crossing(&self, from: &LatLong, to: &LatLong) -> Option<GateDirection> {
        let ShapeKind::Gate { points } = self else {
            return None;
        };
        let origin = *from;
        let a = (0.0, 0.0);
        let b = to.local_offset_from(&origin);

        for seg in points.windows(2) {
            let p = seg[0].local_offset_from(&origin);
            let q = seg[1].local_offset_from(&origin);

            let side_a = cross(p, q, a);
            let side_b = cross(p, q, b);
            let side_p = cross(a, b, p);
            let side_q = cross(a, b, q);

            // Starting exactly on the gate is not a crossing; ending on it is
            if side_a == 0.0 {
                continue;
            }
            if side_a.signum() != side_b.signum() && side_p.signum() != side_q.signum() {
                return Some(if side_a > 0.0 {
                    GateDirection::Forward
                } else {
                    GateDirection::Reverse
                });
            }
        }
        None
    }
}

/// z-component of (q - p) x (r - p); positive when r is left of p->q
fn cross(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
    (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
}

fn distance_to_segments(points: &[LatLong], p: &LatLong, closed: bool) -> f64 {
    match points.len() {
        0 => return f64::INFINITY,
        1 => return points[0].distance_to(p),
        _ => {}
    }
    let (px, py) = (0.0, 0.0);
    let local: Vec<(f64, f64)> = points.iter().map(|v| v.local_offset_from(p)).collect();
    let mut edges: Vec<((f64, f64), (f64, f64))> = local.windows(2).map(|w| (w[0], w[1])).collect();
    if closed {
        edges.push((local[local.len() - 1], local[0]));
    }

    edges
        .into_iter()
        .map(|((ax, ay), (bx, by))| {
            let (dx, dy) = (bx - ax, by - ay);
            let len_sq = dx * dx + dy * dy;
            let t = if len_sq > 0.0 {
                (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (cx, cy) = (ax + t * dx, ay + t * dy);
            ((cx - px).powi(2) + (cy - py).powi(2)).sqrt()
        })
        .fold(f64::INFINITY, f64::min)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    pub name: String,
    pub kind: ShapeKind,
}

/// Change notification for conditions referencing shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeEvent {
    Delete(ShapeId),
    DeleteAll,
    ReloadAll,
}

#[derive(Debug, Default)]
pub struct ShapeDatabase {
    shapes: BTreeMap<ShapeId, Shape>,
    next_id: ShapeId,
}

impl ShapeDatabase {
    pub fn new() -> Self {
        ShapeDatabase {
            shapes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Add a shape. Names are the persistent key, so a shape with the same
    /// name is replaced (and keeps its ID).
    pub fn add_shape(&mut self, name: &str, kind: ShapeKind) -> ShapeId {
        if let Some(existing) = self.shapes.values_mut().find(|s| s.name == name) {
            existing.kind = kind;
            return existing.id;
        }
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.shapes.insert(
            id,
            Shape {
                id,
                name: name.to_string(),
                kind,
            },
        );
        id
    }

    pub fn remove_shape(&mut self, id: ShapeId) -> Option<ShapeEvent> {
        self.shapes.remove(&id).map(|_| ShapeEvent::Delete(id))
    }

    pub fn clear(&mut self) -> ShapeEvent {
        self.shapes.clear();
        ShapeEvent::DeleteAll
    }

    /// Replace every shape. IDs are reassigned, so conditions must
    /// re-resolve their shape names.
    pub fn reload(&mut self, shapes: Vec<(String, ShapeKind)>) -> ShapeEvent {
        self.shapes.clear();
        for (name, kind) in shapes {
            self.add_shape(&name, kind);
        }
        ShapeEvent::ReloadAll
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn shape_by_name(&self, name: &str) -> Option<&Shape> {
        self.shapes.values().find(|s| s.name == name)
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> ShapeKind {
        let o = LatLong::new(50.0, -1.0);
        ShapeKind::Polygon {
            points: vec![
                o,
                o.offset_by(1000.0, 0.0),
                o.offset_by(1000.0, 1000.0),
                o.offset_by(0.0, 1000.0),
            ],
        }
    }

    #[test]
    fn test_polygon_contains() {
        let o = LatLong::new(50.0, -1.0);
        let shape = square();
        assert!(shape.contains(&o.offset_by(500.0, 500.0)));
        assert!(!shape.contains(&o.offset_by(1500.0, 500.0)));
        assert!(!shape.contains(&o.offset_by(500.0, -10.0)));
    }

    #[test]
    fn test_polygon_distance() {
        let o = LatLong::new(50.0, -1.0);
        let shape = square();
        assert_eq!(shape.distance_to(&o.offset_by(500.0, 500.0)), 0.0);
        let d = shape.distance_to(&o.offset_by(1200.0, 500.0));
        assert!((d - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_circle() {
        let c = LatLong::new(0.0, 0.0);
        let shape = ShapeKind::Circle {
            centre: c,
            radius_metres: 500.0,
        };
        assert!(shape.contains(&c.offset_by(300.0, 0.0)));
        assert!(!shape.contains(&c.offset_by(600.0, 0.0)));
        assert!((shape.distance_to(&c.offset_by(0.0, 800.0)) - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_gate_crossing_direction() {
        // Gate runs south to north; its left-hand side is west
        let o = LatLong::new(10.0, 10.0);
        let gate = ShapeKind::Gate {
            points: vec![o, o.offset_by(0.0, 1000.0)],
        };
        let west = o.offset_by(-100.0, 500.0);
        let east = o.offset_by(100.0, 500.0);

        assert_eq!(gate.gate_crossing(&west, &east), Some(GateDirection::Forward));
        assert_eq!(gate.gate_crossing(&east, &west), Some(GateDirection::Reverse));
        // Parallel move, no crossing
        assert_eq!(gate.gate_crossing(&west, &o.offset_by(-100.0, 900.0)), None);
        // Passing beyond the end of the gate
        let north_w = o.offset_by(-100.0, 1500.0);
        let north_e = o.offset_by(100.0, 1500.0);
        assert_eq!(gate.gate_crossing(&north_w, &north_e), None);
    }

    #[test]
    fn test_database_events() {
        let mut db = ShapeDatabase::new();
        let id = db.add_shape("harbour", square());
        assert_eq!(db.shape_by_name("harbour").map(|s| s.id), Some(id));
        // Same name replaces
        assert_eq!(db.add_shape("harbour", square()), id);
        assert_eq!(db.len(), 1);

        assert_eq!(db.remove_shape(id), Some(ShapeEvent::Delete(id)));
        assert_eq!(db.remove_shape(id), None);

        db.add_shape("a", square());
        assert_eq!(
            db.reload(vec![("b".to_string(), square())]),
            ShapeEvent::ReloadAll
        );
        assert!(db.shape_by_name("a").is_none());
        assert_eq!(db.clear(), ShapeEvent::DeleteAll);
        assert!(db.is_empty());
    }
}
