//! Regions of interest used to select tiles.

use crate::{BoundingBox, PolygonFilter, QuadtreeKey, polygon::TILE_BUFFER};

/// Closed set of region shapes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Region {
    /// Every tile.
    #[default]
    Planet,
    /// Tiles whose buffered extent overlaps the box.
    Box(BoundingBox),
    /// Tiles accepted by the polygon filter.
    Polygon(PolygonFilter),
}

impl Region {
    /// Geographic bounds of the region.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Self::Planet => BoundingBox::planet(),
            Self::Box(bounds) => *bounds,
            Self::Polygon(polygon) => *polygon.bounds(),
        }
    }

    /// Whether the tile identified by `key` should be read.
    ///
    /// Invalid keys are never accepted, even for [`Region::Planet`].
    #[must_use]
    pub fn accepts_tile(&self, key: QuadtreeKey) -> bool {
        if !key.is_valid() {
            return false;
        }
        match self {
            Self::Planet => true,
            Self::Box(bounds) => bounds.overlaps(&key.bbox(TILE_BUFFER)),
            Self::Polygon(polygon) => polygon.test_tile(key).accepts(),
        }
    }
}

impl From<BoundingBox> for Region {
    fn from(value: BoundingBox) -> Self {
        if value.is_planet() {
            Self::Planet
        } else {
            Self::Box(value)
        }
    }
}

impl From<PolygonFilter> for Region {
    fn from(value: PolygonFilter) -> Self {
        Self::Polygon(value)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail fast on invalid fixtures")]
mod tests {
    use super::*;
    use geo::Coord;
    use rstest::rstest;

    fn key(path: &str) -> QuadtreeKey {
        QuadtreeKey::from_path(path).expect("valid path")
    }

    #[rstest]
    fn planet_accepts_every_valid_tile() {
        let region = Region::Planet;
        assert!(region.accepts_tile(QuadtreeKey::ROOT));
        assert!(region.accepts_tile(key("DCBA")));
        assert!(!region.accepts_tile(QuadtreeKey(-1)));
    }

    #[rstest]
    fn box_region_selects_overlapping_quadrants() {
        // A small box in the north-east quadrant.
        let region = Region::from(BoundingBox::from_degrees(10.0, 10.0, 20.0, 20.0).expect("box"));
        assert!(region.accepts_tile(key("B")));
        assert!(!region.accepts_tile(key("C")));
        assert!(region.accepts_tile(QuadtreeKey::ROOT));
    }

    #[rstest]
    fn planet_box_collapses_to_planet() {
        assert_eq!(Region::from(BoundingBox::planet()), Region::Planet);
    }

    #[rstest]
    fn polygon_region_uses_filter() {
        let degrees = |x: i64, y: i64| Coord {
            x: x * 10_000_000,
            y: y * 10_000_000,
        };
        let polygon = PolygonFilter::new(vec![
            degrees(-20, -20),
            degrees(-20, -10),
            degrees(-10, -10),
            degrees(-10, -20),
        ])
        .expect("valid polygon");
        let region = Region::from(polygon);
        assert!(region.accepts_tile(key("C")));
        assert!(!region.accepts_tile(key("B")));
        assert_eq!(region.bounds().min_x(), -200_000_000);
    }
}
