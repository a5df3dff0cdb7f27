//! Uniform grid for candidate lookups.
//!
//! Entities are bucketed by `floor(coord / cell_size)` on the X and Z axes.
//! The Y axis is not indexed. A query returns every id stored in the cells
//! overlapping the query square, so results are a superset of the exact
//! radius set and callers are expected to filter by distance.

use protocol::{EntityId, Position};
use std::collections::HashMap;

/// Grid cell key on the X/Z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

/// Uniform spatial hash grid.
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, Vec<EntityId>>,
    /// Number of ids inserted by the last rebuild.
    count: usize,
}

impl SpatialGrid {
    /// Create an empty grid. A non-positive (or NaN) cell size yields a grid
    /// that stores nothing and answers every query with an empty set.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::with_capacity(256),
            count: 0,
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    fn is_usable(&self) -> bool {
        self.cell_size > 0.0
    }

    /// Cell index for a single coordinate. Saturates at the i32 range.
    #[inline]
    fn axis_cell(&self, coord: f32) -> i32 {
        (coord / self.cell_size).floor() as i32
    }

    /// Cell containing the given point, or `None` for an unusable grid.
    #[inline]
    pub fn cell_of(&self, x: f32, z: f32) -> Option<CellCoord> {
        self.is_usable().then(|| CellCoord {
            x: self.axis_cell(x),
            z: self.axis_cell(z),
        })
    }

    /// Clear and reinsert every entity.
    pub fn rebuild<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = (EntityId, Position)>,
    {
        // Keep bucket allocations around between ticks.
        for bucket in self.cells.values_mut() {
            bucket.clear();
        }
        self.count = 0;

        if self.is_usable() {
            for (id, pos) in entities {
                let key = CellCoord {
                    x: self.axis_cell(pos.x),
                    z: self.axis_cell(pos.z),
                };
                self.cells.entry(key).or_default().push(id);
                self.count += 1;
            }
        }

        self.cells.retain(|_, bucket| !bucket.is_empty());
    }

    /// Candidate ids near `(x, z)`: the contents of every cell overlapping
    /// the square of half-width `radius` centred on the point.
    pub fn query(&self, x: f32, z: f32, radius: f32) -> Vec<EntityId> {
        if !self.is_usable() || radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }

        let min_x = self.axis_cell(x - radius);
        let max_x = self.axis_cell(x + radius);
        let min_z = self.axis_cell(z - radius);
        let max_z = self.axis_cell(z + radius);

        let mut result = Vec::with_capacity(64);

        let span_x = (max_x as i64 - min_x as i64 + 1) as u128;
        let span_z = (max_z as i64 - min_z as i64 + 1) as u128;
        if span_x * span_z > self.cells.len() as u128 {
            // Query covers more cells than are occupied; walk the occupied ones.
            for (cell, bucket) in &self.cells {
                if (min_x..=max_x).contains(&cell.x) && (min_z..=max_z).contains(&cell.z) {
                    result.extend_from_slice(bucket);
                }
            }
            return result;
        }

        for cx in min_x..=max_x {
            for cz in min_z..=max_z {
                if let Some(bucket) = self.cells.get(&CellCoord { x: cx, z: cz }) {
                    result.extend_from_slice(bucket);
                }
            }
        }
        result
    }

    /// Number of ids inserted by the last rebuild.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of non-empty cells.
    #[inline]
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }
}

impl std::fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialGrid")
            .field("cell_size", &self.cell_size)
            .field("entities", &self.count)
            .field("cells", &self.cells.len())
            .finish()
    }
}
