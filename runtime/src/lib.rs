//! Towerline: trace power transmission lines across satellite imagery.
//!
//! Starting from a facility coordinate, the tracer stitches a chip of
//! slippy-map tiles, detects transmission towers in it, converts each
//! detection back to a coordinate and keeps walking from there.

pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod facilities;
pub mod geo;
pub mod logging;
pub mod proxy;
pub mod region;
pub mod tiles;
pub mod trace;
