//! Spatial indexing utilities.
//!
//! Uniform grid over the horizontal (X/Z) plane, rebuilt every tick.

mod grid;

pub use grid::{CellCoord, SpatialGrid};
