//! Axis-aligned boxes in fixed-point longitude/latitude units.
//!
//! Coordinates are stored as `i64` multiples of 1e-7 degrees, the same
//! representation OpenStreetMap uses for node positions. Boxes are closed:
//! a point lying on an edge is inside, and two boxes sharing an edge overlap.

use std::{fmt, str::FromStr};

use geo::{Coord, Rect};
use thiserror::Error;

/// Fixed-point units per degree.
pub const UNITS_PER_DEGREE: f64 = 10_000_000.0;

/// Convert a coordinate in degrees into fixed-point units, rounding half away
/// from zero.
///
/// Values beyond the `i64` range saturate.
///
/// # Examples
/// ```
/// use tilesync_core::coordinate_as_integer;
///
/// assert_eq!(coordinate_as_integer(1.5), 15_000_000);
/// assert_eq!(coordinate_as_integer(-0.00000005), -1);
/// ```
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "degrees are scaled to fixed point; `as` saturates out-of-range values"
)]
pub fn coordinate_as_integer(value: f64) -> i64 {
    if value > 0.0 {
        (value * UNITS_PER_DEGREE + 0.5) as i64
    } else {
        (value * UNITS_PER_DEGREE - 0.5) as i64
    }
}

/// Convert fixed-point units back into degrees.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "coordinates stay below 2^52 units, so the conversion is exact"
)]
pub fn coordinate_as_float(value: i64) -> f64 {
    value as f64 / UNITS_PER_DEGREE
}

/// Errors raised when constructing or parsing a [`BoundingBox`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundingBoxError {
    /// A minimum exceeded the matching maximum.
    #[error("inverted bounds: ({min_x}, {min_y}) is not below ({max_x}, {max_y})")]
    Inverted {
        /// Requested western edge.
        min_x: i64,
        /// Requested southern edge.
        min_y: i64,
        /// Requested eastern edge.
        max_x: i64,
        /// Requested northern edge.
        max_y: i64,
    },
    /// A textual box could not be parsed.
    #[error("invalid bounding box {input:?}: {reason}")]
    Parse {
        /// The rejected text.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Closed, axis-aligned box in fixed-point units.
///
/// The minimum corner never exceeds the maximum one; every constructor and
/// deserialisation checks it.
///
/// # Examples
/// ```
/// use tilesync_core::BoundingBox;
///
/// # fn main() -> Result<(), tilesync_core::BoundingBoxError> {
/// let outer = BoundingBox::new(0, 0, 100, 100)?;
/// let inner = BoundingBox::new(10, 10, 20, 20)?;
/// assert!(outer.contains_box(&inner));
/// assert!(outer.overlaps(&inner));
/// assert_eq!(inner.max_x(), 20);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawBounds")
)]
pub struct BoundingBox {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

/// Unchecked wire form of [`BoundingBox`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawBounds {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawBounds> for BoundingBox {
    type Error = BoundingBoxError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        Self::new(raw.min_x, raw.min_y, raw.max_x, raw.max_y)
    }
}

impl BoundingBox {
    /// Validate and construct a box.
    ///
    /// # Errors
    ///
    /// Returns [`BoundingBoxError::Inverted`] when a minimum exceeds its
    /// maximum.
    pub const fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Result<Self, BoundingBoxError> {
        if min_x > max_x || min_y > max_y {
            return Err(BoundingBoxError::Inverted {
                min_x,
                min_y,
                max_x,
                max_y,
            });
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// The whole world, `[-180, -90, 180, 90]` degrees.
    #[must_use]
    pub const fn planet() -> Self {
        Self {
            min_x: -1_800_000_000,
            min_y: -900_000_000,
            max_x: 1_800_000_000,
            max_y: 900_000_000,
        }
    }

    /// A degenerate box covering a single point.
    #[must_use]
    pub const fn from_point(x: i64, y: i64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Build a box from coordinates in degrees.
    ///
    /// # Errors
    ///
    /// Returns [`BoundingBoxError::Inverted`] when a minimum exceeds its
    /// maximum.
    pub fn from_degrees(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Self, BoundingBoxError> {
        Self::new(
            coordinate_as_integer(min_lon),
            coordinate_as_integer(min_lat),
            coordinate_as_integer(max_lon),
            coordinate_as_integer(max_lat),
        )
    }

    /// Smallest box covering every point, or `None` for an empty iterator.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Coord<i64>>,
    {
        let mut rest = points.into_iter();
        let first = rest.next()?;
        let mut bounds = Self::from_point(first.x, first.y);
        for point in rest {
            bounds.expand_point(point.x, point.y);
        }
        Some(bounds)
    }

    /// Western edge.
    #[must_use]
    pub const fn min_x(&self) -> i64 {
        self.min_x
    }

    /// Southern edge.
    #[must_use]
    pub const fn min_y(&self) -> i64 {
        self.min_y
    }

    /// Eastern edge.
    #[must_use]
    pub const fn max_x(&self) -> i64 {
        self.max_x
    }

    /// Northern edge.
    #[must_use]
    pub const fn max_y(&self) -> i64 {
        self.max_y
    }

    /// Grow the box to include `(x, y)`.
    pub fn expand_point(&mut self, x: i64, y: i64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Grow the box to include `other`.
    pub fn expand(&mut self, other: &Self) {
        self.expand_point(other.min_x, other.min_y);
        self.expand_point(other.max_x, other.max_y);
    }

    /// Whether the two boxes share at least one point.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && self.min_y <= other.max_y
            && other.min_x <= self.max_x
            && other.min_y <= self.max_y
    }

    /// Whether `other` lies entirely within this box.
    #[must_use]
    pub const fn contains_box(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Whether `(x, y)` lies inside or on the edge of the box.
    #[must_use]
    pub const fn contains_point(&self, x: i64, y: i64) -> bool {
        x >= self.min_x && y >= self.min_y && x <= self.max_x && y <= self.max_y
    }

    /// Whether the box covers the whole world.
    #[must_use]
    pub const fn is_planet(&self) -> bool {
        self.contains_box(&Self::planet())
    }

    /// Integer midpoint, truncated towards the minimum corner.
    #[must_use]
    #[expect(
        clippy::integer_division,
        reason = "the midpoint is defined as truncating towards the minimum corner"
    )]
    pub const fn center(&self) -> Coord<i64> {
        Coord {
            x: self.min_x + (self.max_x - self.min_x) / 2,
            y: self.min_y + (self.max_y - self.min_y) / 2,
        }
    }

    /// Whether the box has zero width and height.
    #[must_use]
    pub const fn is_point(&self) -> bool {
        self.min_x == self.max_x && self.min_y == self.max_y
    }

    /// The bounds as `(min_x, min_y, max_x, max_y)`.
    #[must_use]
    pub const fn to_tuple(&self) -> (i64, i64, i64, i64) {
        (self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "box{{{:>10}, {:>10}, {:>10}, {:>10}}}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl From<BoundingBox> for Rect<i64> {
    fn from(value: BoundingBox) -> Self {
        Rect::new(
            Coord {
                x: value.min_x,
                y: value.min_y,
            },
            Coord {
                x: value.max_x,
                y: value.max_y,
            },
        )
    }
}

impl From<Rect<i64>> for BoundingBox {
    fn from(value: Rect<i64>) -> Self {
        // `Rect` normalises its corners, so the bounds are never inverted.
        let (min, max) = (value.min(), value.max());
        Self {
            min_x: min.x,
            min_y: min.y,
            max_x: max.x,
            max_y: max.y,
        }
    }
}

/// Parse `minlon,minlat,maxlon,maxlat` in degrees.
impl FromStr for BoundingBox {
    type Err = BoundingBoxError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parse_error = |reason| BoundingBoxError::Parse {
            input: input.to_owned(),
            reason,
        };
        let values = input
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| parse_error("expected decimal degrees"))?;
        let [min_lon, min_lat, max_lon, max_lat] = values.as_slice() else {
            return Err(parse_error("expected four comma-separated values"));
        };
        Self::from_degrees(*min_lon, *min_lat, *max_lon, *max_lat)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bx(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> BoundingBox {
        BoundingBox::new(min_x, min_y, max_x, max_y).expect("valid test box")
    }

    #[rstest]
    fn rejects_inverted_bounds() {
        let err = BoundingBox::new(10, 0, 0, 10).expect_err("inverted x should fail");
        assert!(matches!(err, BoundingBoxError::Inverted { .. }));
    }

    #[rstest]
    #[case(bx(0, 0, 10, 10), bx(10, 10, 20, 20), true)]
    #[case(bx(0, 0, 10, 10), bx(11, 0, 20, 10), false)]
    #[case(bx(0, 0, 10, 10), bx(2, 2, 3, 3), true)]
    #[case(bx(0, 0, 10, 10), bx(0, 11, 10, 20), false)]
    fn overlap_is_inclusive(
        #[case] left: BoundingBox,
        #[case] right: BoundingBox,
        #[case] expected: bool,
    ) {
        assert_eq!(left.overlaps(&right), expected);
        assert_eq!(right.overlaps(&left), expected);
    }

    #[rstest]
    fn containment_accepts_equal_boxes() {
        let a = bx(-5, -5, 5, 5);
        assert!(a.contains_box(&a));
        assert!(!bx(-4, -5, 5, 5).contains_box(&a));
    }

    #[rstest]
    #[case(bx(0, 0, 10, 10), Coord { x: 5, y: 5 })]
    #[case(bx(0, 0, 5, 5), Coord { x: 2, y: 2 })]
    #[case(bx(-5, -5, 0, 0), Coord { x: -3, y: -3 })]
    fn center_truncates_towards_minimum(#[case] input: BoundingBox, #[case] expected: Coord<i64>) {
        assert_eq!(input.center(), expected);
    }

    #[rstest]
    fn parses_degrees() {
        let parsed: BoundingBox = "-0.5, 51.25,0.25,51.75".parse().expect("box should parse");
        assert_eq!(parsed.to_tuple(), (-5_000_000, 512_500_000, 2_500_000, 517_500_000));
    }

    #[rstest]
    #[case("1,2,3")]
    #[case("a,b,c,d")]
    fn rejects_malformed_text(#[case] input: &str) {
        let err = input.parse::<BoundingBox>().expect_err("malformed box");
        assert!(matches!(err, BoundingBoxError::Parse { .. }));
    }

    #[rstest]
    fn enclosing_covers_all_points() {
        let points = [Coord { x: 3, y: -1 }, Coord { x: -2, y: 4 }, Coord { x: 0, y: 0 }];
        let bounds = BoundingBox::enclosing(points).expect("non-empty input");
        assert_eq!(bounds.to_tuple(), (-2, -1, 3, 4));
        assert!(BoundingBox::enclosing(std::iter::empty()).is_none());
    }

    #[rstest]
    fn planet_is_planet() {
        assert!(BoundingBox::planet().is_planet());
        assert!(!bx(0, 0, 1, 1).is_planet());
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn deserialising_checks_the_corners() {
        let valid: BoundingBox =
            serde_json::from_str(r#"{"min_x": -7, "min_y": 3, "max_x": 12, "max_y": 40}"#)
                .expect("valid box");
        assert_eq!(valid, bx(-7, 3, 12, 40));
        let inverted =
            serde_json::from_str::<BoundingBox>(r#"{"min_x": 12, "min_y": 3, "max_x": -7, "max_y": 40}"#);
        assert!(inverted.is_err());
    }

    #[rstest]
    fn converts_through_geo_rect() {
        let original = bx(-7, 3, 12, 40);
        let rect: Rect<i64> = original.into();
        assert_eq!(BoundingBox::from(rect), original);
    }
}
