//! Quadtree tile keys.
//!
//! A key packs a path of quadrant choices and its depth into one `i64`:
//! bits 0-4 hold the depth and each level `i` stores its quadrant in the two
//! bits starting at `61 - 2i`. Quadrants are numbered `0` (north-west), `1`
//! (north-east), `2` (south-west) and `3` (south-east); the latitude axis is
//! split in spherical mercator space.

use std::{collections::BTreeMap, f64::consts::PI, fmt};

use crate::bbox::{BoundingBox, coordinate_as_integer};

/// Deepest level a key can describe.
pub const MAX_DEPTH: u32 = 24;

const DEPTH_MASK: i64 = 31;

/// Packed quadtree key.
///
/// # Examples
/// ```
/// use tilesync_core::QuadtreeKey;
///
/// let key = QuadtreeKey::from_path("BDA").expect("valid path");
/// assert_eq!(key.depth(), 3);
/// assert_eq!(key.to_string(), "BDA");
/// assert_eq!(key.parent().map(|p| p.to_string()), Some("BD".to_owned()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct QuadtreeKey(pub i64);

impl QuadtreeKey {
    /// The world tile.
    pub const ROOT: Self = Self(0);

    /// Build a key from an `A`-`D` path string.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        if path.len() > MAX_DEPTH as usize {
            return None;
        }
        let mut value = 0_i64;
        for (level, letter) in path.bytes().enumerate() {
            let quadrant = match letter {
                b'A'..=b'D' => i64::from(letter - b'A'),
                _ => return None,
            };
            value |= quadrant << (61 - 2 * level);
        }
        Some(Self(value + i64::try_from(path.len()).ok()?))
    }

    /// Whether the key encodes a tile. Negative keys mark "no tile".
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Number of quadrant levels below the root.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "the depth mask keeps the value within 0..=31"
    )]
    pub const fn depth(self) -> u32 {
        (self.0 & DEPTH_MASK) as u32
    }

    /// Quadrant (`0..=3`) chosen at `level`.
    #[must_use]
    pub const fn quadrant(self, level: u32) -> i64 {
        (self.0 >> (61 - 2 * level)) & 3
    }

    /// Ancestor of this key at `level`; keys shallower than `level` are
    /// returned unchanged.
    #[must_use]
    pub const fn round(self, level: u32) -> Self {
        if self.depth() < level {
            return self;
        }
        let shift = 63 - 2 * level;
        let truncated = (self.0 >> shift) << shift;
        Self(truncated + level as i64)
    }

    /// Immediate ancestor, `None` for the root.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self.depth() {
            0 => None,
            depth => Some(self.round(depth - 1)),
        }
    }

    /// Geographic extent of the tile, widened by `buffer` times its size on
    /// each side.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "tile extents are halved in degree space before fixing the result"
    )]
    pub fn bbox(self, buffer: f64) -> BoundingBox {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (-180.0_f64, -90.0_f64, 180.0_f64, 90.0_f64);
        for level in 0..self.depth() {
            let quadrant = self.quadrant(level);
            if quadrant == 0 || quadrant == 2 {
                max_x -= (max_x - min_x) / 2.0;
            } else {
                min_x += (max_x - min_x) / 2.0;
            }
            if quadrant == 2 || quadrant == 3 {
                max_y -= (max_y - min_y) / 2.0;
            } else {
                min_y += (max_y - min_y) / 2.0;
            }
        }

        min_y = latitude_un_mercator(min_y);
        max_y = latitude_un_mercator(max_y);

        if buffer > 0.0 {
            let dx = (max_x - min_x) * buffer;
            let dy = (max_y - min_y) * buffer;
            min_x -= dx;
            min_y -= dy;
            max_x += dx;
            max_y += dy;
        }

        let mut bounds =
            BoundingBox::from_point(coordinate_as_integer(min_x), coordinate_as_integer(min_y));
        bounds.expand_point(coordinate_as_integer(max_x), coordinate_as_integer(max_y));
        bounds
    }

    /// Tile column, row and depth.
    #[must_use]
    pub fn to_tuple(self) -> (i64, i64, u32) {
        let depth = self.depth();
        let (mut x, mut y) = (0_i64, 0_i64);
        for level in 0..depth {
            let quadrant = self.quadrant(level);
            x = (x << 1) | (quadrant & 1);
            y = (y << 1) | ((quadrant >> 1) & 1);
        }
        (x, y, depth)
    }
}

impl fmt::Display for QuadtreeKey {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "quadrants are always 0..=3"
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("NULL");
        }
        for level in 0..self.depth() {
            let letter = char::from(b'A' + self.quadrant(level) as u8);
            write!(f, "{letter}")?;
        }
        Ok(())
    }
}

/// Undo the mercator scaling applied to the latitude axis.
#[expect(clippy::float_arithmetic, reason = "inverse mercator projection")]
fn latitude_un_mercator(value: f64) -> f64 {
    ((value * PI / 90.0).exp().atan() * 4.0 / PI - 1.0) * 90.0
}

/// Nearest key present in `tiles` that is `key` or one of its ancestors.
///
/// The walk is iterative: each step computes the ancestor at the next
/// shallower depth directly. Returns `None` when not even the root exists.
#[must_use]
pub fn nearest_tile<T>(tiles: &BTreeMap<QuadtreeKey, T>, key: QuadtreeKey) -> Option<QuadtreeKey> {
    let start = if key.is_valid() { key.depth() } else { 0 };
    (0..=start)
        .rev()
        .map(|level| key.round(level).clamp_invalid())
        .find(|candidate| tiles.contains_key(candidate))
}

/// Like [`nearest_tile`] but inserts the root tile, built by `make_root`,
/// when no ancestor is present.
pub fn find_tile<T, F>(tiles: &mut BTreeMap<QuadtreeKey, T>, key: QuadtreeKey, make_root: F) -> QuadtreeKey
where
    F: FnOnce() -> T,
{
    if let Some(found) = nearest_tile(tiles, key) {
        return found;
    }
    log::debug!("adding root tile for {key}");
    tiles.insert(QuadtreeKey::ROOT, make_root());
    QuadtreeKey::ROOT
}

impl QuadtreeKey {
    const fn clamp_invalid(self) -> Self {
        if self.is_valid() { self } else { Self::ROOT }
    }
}
