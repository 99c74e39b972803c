//! Polygon region filter.
//!
//! [`PolygonFilter`] classifies boxes (usually tile extents) against a simple
//! polygon. The classification is deliberately coarse: a box that contains
//! the polygon's bounds is reported as [`Classification::ContainsBox`] even
//! when parts of it lie outside the polygon, and a box whose centre lies in
//! the polygon is accepted even if the boundary crosses it. Callers needing
//! exact containment must refine the result downstream.
//!
//! All arithmetic happens in the fixed-point integer space of the vertices.
//! Products are widened to `i128` so that cross products of world-spanning
//! segments cannot overflow.

use std::io::BufRead;

use geo::Coord;
use thiserror::Error;

use crate::{BoundingBox, QuadtreeKey, coordinate_as_integer};

/// Fractional buffer applied to tile extents before testing them.
pub const TILE_BUFFER: f64 = 0.05;

/// Outcome of [`PolygonFilter::test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The box and polygon share no points.
    Disjoint,
    /// The box contains the polygon's bounds, or lies wholly inside the
    /// polygon.
    ContainsBox,
    /// The box centre lies inside the polygon but the boundary crosses the
    /// box.
    BoxContainsCenterInside,
    /// The polygon boundary crosses one of the box edges.
    BoundaryIntersects,
}

impl Classification {
    /// Whether the classification selects the box.
    #[must_use]
    pub const fn accepts(self) -> bool {
        !matches!(self, Self::Disjoint)
    }
}

/// Errors raised when building a [`PolygonFilter`].
#[derive(Debug, Error)]
pub enum PolygonError {
    /// The vertices do not describe an area.
    #[error("invalid polygon: {reason}")]
    InvalidPolygon {
        /// Why the vertices were rejected.
        reason: String,
    },
    /// Reading a polygon file failed.
    #[error("failed to read polygon: {source}")]
    Read {
        /// Underlying read failure.
        #[source]
        source: std::io::Error,
    },
}

/// Simple polygon with cached bounds.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use tilesync_core::{BoundingBox, Classification, PolygonFilter};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let square = PolygonFilter::new(vec![
///     Coord { x: 0, y: 0 },
///     Coord { x: 0, y: 10 },
///     Coord { x: 10, y: 10 },
///     Coord { x: 10, y: 0 },
/// ])?;
/// let inside = BoundingBox::new(2, 2, 8, 8)?;
/// assert!(square.accept(&inside));
/// let outside = BoundingBox::new(100, 100, 110, 110)?;
/// assert_eq!(square.test(&outside), Classification::Disjoint);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonFilter {
    vertices: Vec<Coord<i64>>,
    bounds: BoundingBox,
}

impl PolygonFilter {
    /// Build a filter from vertices; the ring closes implicitly.
    ///
    /// # Errors
    ///
    /// Returns [`PolygonError::InvalidPolygon`] for fewer than three vertices
    /// or vertices that all coincide.
    pub fn new(vertices: Vec<Coord<i64>>) -> Result<Self, PolygonError> {
        if vertices.len() < 3 {
            return Err(PolygonError::InvalidPolygon {
                reason: format!("expected at least 3 vertices, found {}", vertices.len()),
            });
        }
        let bounds = BoundingBox::enclosing(vertices.iter().copied()).ok_or_else(|| {
            PolygonError::InvalidPolygon {
                reason: "no vertices".to_owned(),
            }
        })?;
        if bounds.is_point() {
            return Err(PolygonError::InvalidPolygon {
                reason: format!("all vertices collapse to ({}, {})", bounds.min_x(), bounds.min_y()),
            });
        }
        Ok(Self { vertices, bounds })
    }

    /// Read a polygon from text holding one `lon lat` pair (degrees) per line.
    ///
    /// Lines that do not parse as exactly two numbers, such as the section
    /// names and `END` markers of Osmosis `.poly` files, are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PolygonError::Read`] when reading fails and
    /// [`PolygonError::InvalidPolygon`] when the vertices are rejected.
    pub fn read_poly<R: BufRead>(reader: R) -> Result<Self, PolygonError> {
        let mut vertices = Vec::new();
        for read in reader.lines() {
            let line = read.map_err(|source| PolygonError::Read { source })?;
            if let Some(vertex) = parse_vertex(&line) {
                vertices.push(vertex);
            }
        }
        Self::new(vertices)
    }

    /// The polygon's vertices in ring order.
    #[must_use]
    pub fn vertices(&self) -> &[Coord<i64>] {
        &self.vertices
    }

    /// Bounding box of the vertices.
    #[must_use]
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Classify `query` against the polygon.
    #[must_use]
    pub fn test(&self, query: &BoundingBox) -> Classification {
        if !self.bounds.overlaps(query) {
            return Classification::Disjoint;
        }
        if query.contains_box(&self.bounds) {
            return Classification::ContainsBox;
        }
        let crosses = self.intersects_box_edges(query);
        if self.contains_point(query.center()) {
            // With the centre inside and no crossing, the box edges never
            // leave the polygon.
            if !crosses && self.strictly_contains(query) {
                return Classification::ContainsBox;
            }
            return Classification::BoxContainsCenterInside;
        }
        if crosses {
            return Classification::BoundaryIntersects;
        }
        Classification::Disjoint
    }

    /// Whether `query` is anything other than [`Classification::Disjoint`].
    #[must_use]
    pub fn accept(&self, query: &BoundingBox) -> bool {
        self.test(query).accepts()
    }

    /// Classify the buffered extent of a quadtree tile.
    #[must_use]
    pub fn test_tile(&self, key: QuadtreeKey) -> Classification {
        self.test(&key.bbox(TILE_BUFFER))
    }

    /// Even-odd ray casting test. Points exactly on the boundary may land on
    /// either side.
    #[must_use]
    pub fn contains_point(&self, point: Coord<i64>) -> bool {
        let mut inside = false;
        for (current, previous) in self.edges() {
            if (current.y > point.y) != (previous.y > point.y)
                && crosses_to_the_right(point, current, previous)
            {
                inside = !inside;
            }
        }
        inside
    }

    /// Each vertex paired with its predecessor, the first with the last.
    fn edges(&self) -> impl Iterator<Item = (Coord<i64>, Coord<i64>)> + '_ {
        let previous = self
            .vertices
            .iter()
            .copied()
            .cycle()
            .skip(self.vertices.len().saturating_sub(1));
        self.vertices.iter().copied().zip(previous)
    }

    fn intersects_box_edges(&self, query: &BoundingBox) -> bool {
        let (min_x, min_y, max_x, max_y) = query.to_tuple();
        let bottom_left = Coord { x: min_x, y: min_y };
        let top_left = Coord { x: min_x, y: max_y };
        let bottom_right = Coord { x: max_x, y: min_y };
        let top_right = Coord { x: max_x, y: max_y };

        // Only box edges strictly inside the polygon's bounds are tested.
        (min_x > self.bounds.min_x() && self.crosses_segment(bottom_left, top_left))
            || (min_y > self.bounds.min_y() && self.crosses_segment(bottom_left, bottom_right))
            || (max_x < self.bounds.max_x() && self.crosses_segment(bottom_right, top_right))
            || (max_y < self.bounds.max_y() && self.crosses_segment(top_left, top_right))
    }

    fn strictly_contains(&self, query: &BoundingBox) -> bool {
        query.min_x() > self.bounds.min_x()
            && query.min_y() > self.bounds.min_y()
            && query.max_x() < self.bounds.max_x()
            && query.max_y() < self.bounds.max_y()
    }

    fn crosses_segment(&self, start: Coord<i64>, end: Coord<i64>) -> bool {
        self.edges()
            .any(|(a, b)| segments_intersect(a, b, start, end))
    }
}

/// Whether the horizontal ray from `point` towards +x crosses the edge
/// `a`-`b`. The caller guarantees the edge straddles `point.y`, so the edge
/// is not horizontal.
fn crosses_to_the_right(point: Coord<i64>, a: Coord<i64>, b: Coord<i64>) -> bool {
    // point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x, without
    // the division.
    let dy = i128::from(b.y) - i128::from(a.y);
    let lhs = (i128::from(point.x) - i128::from(a.x)) * dy;
    let rhs = (i128::from(b.x) - i128::from(a.x)) * (i128::from(point.y) - i128::from(a.y));
    if dy > 0 { lhs < rhs } else { lhs > rhs }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

fn orientation(p: Coord<i64>, q: Coord<i64>, r: Coord<i64>) -> Orientation {
    let value = (i128::from(q.y) - i128::from(p.y)) * (i128::from(r.x) - i128::from(q.x))
        - (i128::from(q.x) - i128::from(p.x)) * (i128::from(r.y) - i128::from(q.y));
    match value.signum() {
        0 => Orientation::Collinear,
        1 => Orientation::Clockwise,
        _ => Orientation::CounterClockwise,
    }
}

/// Whether `q` lies within the bounding rectangle of `p`-`r`; only meaningful
/// when the three points are collinear.
fn on_segment(p: Coord<i64>, q: Coord<i64>, r: Coord<i64>) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

fn segments_intersect(p1: Coord<i64>, q1: Coord<i64>, p2: Coord<i64>, q2: Coord<i64>) -> bool {
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

fn parse_vertex(line: &str) -> Option<Coord<i64>> {
    let mut parts = line.split_whitespace();
    let lon = parts.next()?.parse::<f64>().ok()?;
    let lat = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Coord {
        x: coordinate_as_integer(lon),
        y: coordinate_as_integer(lat),
    })
}
