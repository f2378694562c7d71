use crate::types::*;
use cgmath::InnerSpace;
use std::collections::HashMap;

/// Edge length of a grid cell. Must be at least the largest match threshold so that
/// every candidate lives in the 27 cells around a query point.
pub const CELL_SIZE: Real = 1.0 / 32.0;

type Cell = (i64, i64, i64);

/// Uniform grid over a table of points or vectors, used to find near duplicates.
#[derive(Debug, Clone, Default)]
pub struct PointGrid {
    cells: HashMap<Cell, Vec<u32>>,
    len: usize,
}

fn cell_of(p: &Point3) -> Cell {
    (
        (p.x / CELL_SIZE).floor() as i64,
        (p.y / CELL_SIZE).floor() as i64,
        (p.z / CELL_SIZE).floor() as i64,
    )
}

impl PointGrid {
    pub fn from_table(table: &[Point3]) -> Self {
        let mut grid = PointGrid::default();
        for (i, p) in table.iter().enumerate() {
            grid.insert(p, i);
        }
        grid
    }

    /// Number of table entries the grid indexes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }

    pub fn insert(&mut self, p: &Point3, index: usize) {
        self.cells.entry(cell_of(p)).or_default().push(index as u32);
        self.len = self.len.max(index + 1);
    }

    /// Lowest table index whose entry is within `thresh` of `p` on every axis.
    pub fn find(&self, table: &[Point3], p: &Point3, thresh: Real) -> Option<usize> {
        self.find_by(table, p, |candidate| points_are_near(candidate, p, thresh))
    }

    /// Lowest table index whose entry lies strictly closer than `radius` to `p`.
    /// `radius` must not exceed `CELL_SIZE`.
    pub fn find_within(&self, table: &[Point3], p: &Point3, radius: Real) -> Option<usize> {
        self.find_by(table, p, |candidate| (candidate - p).magnitude2() < radius * radius)
    }

    fn find_by<F>(&self, table: &[Point3], p: &Point3, matches: F) -> Option<usize>
    where
        F: Fn(&Point3) -> bool,
    {
        let (cx, cy, cz) = cell_of(p);
        let mut best: Option<usize> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &index in bucket {
                        let index = index as usize;
                        if best.map_or(false, |b| b <= index) {
                            continue;
                        }
                        if let Some(candidate) = table.get(index) {
                            if matches(candidate) {
                                best = Some(index);
                            }
                        }
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::vec3;

    #[test]
    fn finds_lowest_match_across_cells() {
        let table = vec![
            vec3(5.0, 5.0, 5.0),
            vec3(0.031, 0.0, 0.0),
            vec3(0.032, 0.0, 0.0),
        ];
        let grid = PointGrid::from_table(&table);
        assert_eq!(grid.len(), 3);
        // Straddles the cell boundary at 1/32.
        assert_eq!(grid.find(&table, &vec3(0.0315, 0.0, 0.0), 0.002), Some(1));
        assert_eq!(grid.find(&table, &vec3(0.5, 0.0, 0.0), 0.002), None);
    }

    #[test]
    fn radius_search_is_euclidean() {
        let table = vec![vec3(0.0, 0.0, 0.0), vec3(0.007, 0.007, 0.0)];
        let grid = PointGrid::from_table(&table);
        // Inside the axis box of 0.008 but 0.0099 away.
        assert_eq!(grid.find(&table, &vec3(0.007, 0.007, 0.0), 0.008), Some(0));
        assert_eq!(grid.find_within(&table, &vec3(0.007, 0.007, 0.0), 0.009), Some(1));
        assert_eq!(grid.find_within(&table, &vec3(0.007, 0.007, 0.0), 0.01), Some(0));
    }
}
