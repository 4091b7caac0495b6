//! CPA/TCPA Calculation
//!
//! Computes Closest Point of Approach (CPA) and Time to CPA (TCPA)
//! between two moving (or stationary) objects under straight-line
//! extrapolation.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::geo::{LatLong, Velocity};

/// Position plus velocity of one participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub position: LatLong,
    pub velocity: Velocity,
}

impl Motion {
    pub fn new(position: LatLong, velocity: Velocity) -> Self {
        Motion { position, velocity }
    }

    pub fn stationary(position: LatLong) -> Self {
        Motion {
            position,
            velocity: Velocity::default(),
        }
    }
}

/// Result of CPA/TCPA calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpaResult {
    /// Closest Point of Approach in meters
    pub cpa_metres: f64,
    /// Time to Closest Point of Approach in seconds
    /// Positive = future, Negative = past
    pub tcpa_secs: f64,
    /// Approach vector of the first object (now, and at CPA)
    pub start1: LatLong,
    pub end1: LatLong,
    /// Approach vector of the second object (now, and at CPA)
    pub start2: LatLong,
    pub end2: LatLong,
}

/// Calculate CPA and TCPA between two objects
///
/// Uses relative velocity method in a flat projection centred on `a`:
/// 1. Compute relative position (b - a)
/// 2. Compute relative velocity (vb - va)
/// 3. TCPA = -(r · v) / |v|², CPA = |r + v * TCPA|
///
/// The approach vectors end at the predicted positions at TCPA, or at the
/// current positions when the closest approach is already in the past.
pub fn calculate_cpa(a: &Motion, b: &Motion) -> CpaResult {
    let (rx, ry) = b.position.local_offset_from(&a.position);
    let r = Vector2::new(rx, ry);

    let (ax, ay) = a.velocity.components();
    let (bx, by) = b.velocity.components();
    let va = Vector2::new(ax, ay);
    let vb = Vector2::new(bx, by);
    let v = vb - va;

    let v_sq = v.norm_squared();

    // Same course and speed (or both stationary): separation never changes
    let tcpa = if v_sq < 1e-6 { 0.0 } else { -r.dot(&v) / v_sq };
    let cpa = (r + v * tcpa).norm();

    let t = tcpa.max(0.0);
    let end_a = va * t;
    let end_b = r + vb * t;

    CpaResult {
        cpa_metres: cpa,
        tcpa_secs: tcpa,
        start1: a.position,
        end1: a.position.offset_by(end_a.x, end_a.y),
        start2: b.position,
        end2: a.position.offset_by(end_b.x, end_b.y),
    }
}
