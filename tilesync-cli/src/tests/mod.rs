//! Shared test harness modules for the tilesync CLI.
#![expect(
    clippy::expect_used,
    reason = "tests fail fast when fixtures or commands misbehave"
)]

use super::*;

mod unit;
