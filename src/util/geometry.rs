//! Planar points, segments and the orientation/intersection predicates
//!
//! Everything here is pure: no allocation, no shared state. The sweep index
//! and the collision resolver are built on top of these predicates.

use serde::{Deserialize, Serialize};

/// Values of the orientation determinant with `|val| <= COLLINEAR_EPSILON`
/// are treated as collinear.
///
/// Exact zero matches the historical behavior. Near-zero determinants from
/// floating noise are then classified as turns, which can miss a collinear
/// touch; use [`orientation_with_epsilon`] where that matters.
pub const COLLINEAR_EPSILON: f64 = 0.0;

/// A point in the arena plane. For players this is `(x, z)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Lexicographic order by x, then y. Used to order sweep events.
    ///
    /// `-0.0` and `0.0` compare equal; rounding produces both.
    #[inline]
    pub fn sweep_cmp(&self, other: &Point) -> std::cmp::Ordering {
        (self.x + 0.0)
            .total_cmp(&(other.x + 0.0))
            .then_with(|| (self.y + 0.0).total_cmp(&(other.y + 0.0)))
    }
}

/// A line segment. Direction is kept for trail bookkeeping but is irrelevant
/// for intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    #[inline]
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn from_coords(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            start: Point::new(x1, y1),
            end: Point::new(x2, y2),
        }
    }

    /// True when both endpoints coincide
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    /// Endpoints ordered for a left-to-right sweep: `(first, last)`
    #[inline]
    pub fn sweep_endpoints(&self) -> (Point, Point) {
        if self.start.sweep_cmp(&self.end).is_le() {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        }
    }

    /// Whether this segment intersects `other`
    #[inline]
    pub fn intersects(&self, other: &Segment) -> bool {
        intersects(self, other)
    }
}

/// Turn direction of an ordered point triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

/// Orientation of `(p, q, r)` with the default exact-zero tolerance
#[inline]
pub fn orientation(p: Point, q: Point, r: Point) -> Orientation {
    orientation_with_epsilon(p, q, r, COLLINEAR_EPSILON)
}

/// Orientation of `(p, q, r)`: sign of `(q - p) x (r - q)`.
///
/// A positive determinant is clockwise in a y-up frame.
#[inline]
pub fn orientation_with_epsilon(p: Point, q: Point, r: Point, epsilon: f64) -> Orientation {
    let val = (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y);
    if val.abs() <= epsilon {
        Orientation::Collinear
    } else if val > 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::CounterClockwise
    }
}

/// True if `q` lies inside the bounding box of `p` and `r` (inclusive).
///
/// Only meaningful once `orientation(p, q, r)` is collinear.
#[inline]
pub fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// Four-orientation segment intersection test, including collinear
/// touching and overlapping cases.
pub fn intersects(a: &Segment, b: &Segment) -> bool {
    let (p1, q1) = (a.start, a.end);
    let (p2, q2) = (b.start, b.end);

    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == Orientation::Collinear && on_segment(p1, p2, q1))
        || (o2 == Orientation::Collinear && on_segment(p1, q2, q1))
        || (o3 == Orientation::Collinear && on_segment(p2, p1, q2))
        || (o4 == Orientation::Collinear && on_segment(p2, q1, q2))
}

/// Round to four decimal places
#[inline]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
