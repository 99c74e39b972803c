//! Core spatial types for tilesync.
//!
//! Coordinates are fixed-point integers (1e-7 degrees). Constructors return
//! `Result` so invalid boxes and polygons are rejected at the edge instead of
//! producing surprising classifications later.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bbox;
pub mod element_store;
pub mod polygon;
pub mod progress;
pub mod quadtree;
pub mod region;

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;

pub use bbox::{
    BoundingBox, BoundingBoxError, UNITS_PER_DEGREE, coordinate_as_float, coordinate_as_integer,
};
pub use element_store::{
    ElementStore, ElementStoreError, MergeReport, MergeRequest, TileIndexEntry,
};
pub use polygon::{Classification, PolygonError, PolygonFilter};
pub use progress::{LogProgress, NoProgress, ProgressReporter, fraction};
pub use quadtree::{MAX_DEPTH, QuadtreeKey, find_tile, nearest_tile};
pub use region::Region;
