//! Regular voxel grid over the MNI bounding box.

use std::collections::{HashSet, VecDeque};

/// Lower corner of the MNI152 bounding box, in millimetres
pub const MNI_MIN: [f64; 3] = [-90.0, -126.0, -72.0];
/// Upper corner of the MNI152 bounding box, in millimetres
pub const MNI_MAX: [f64; 3] = [90.0, 90.0, 108.0];

/// Axis-aligned grid of cubic voxels, indexed in C order (x slowest)
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    origin: [f64; 3],
    voxel_size: f64,
    shape: [usize; 3],
}

impl Grid {
    pub fn new(origin: [f64; 3], voxel_size: f64, shape: [usize; 3]) -> Self {
        Self {
            origin,
            voxel_size,
            shape,
        }
    }

    /// Grid covering the MNI bounding box at `voxel_size` millimetres
    pub fn mni(voxel_size: f64) -> Self {
        let mut shape = [0usize; 3];
        for (axis, extent) in shape.iter_mut().enumerate() {
            *extent = ((MNI_MAX[axis] - MNI_MIN[axis]) / voxel_size).floor() as usize + 1;
        }
        Self::new(MNI_MIN, voxel_size, shape)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, [i, j, k]: [usize; 3]) -> usize {
        (i * self.shape[1] + j) * self.shape[2] + k
    }

    pub fn ijk(&self, index: usize) -> [usize; 3] {
        let k = index % self.shape[2];
        let rest = index / self.shape[2];
        [rest / self.shape[1], rest % self.shape[1], k]
    }

    /// Voxel nearest to `xyz`, or `None` outside the grid
    pub fn voxel_of(&self, xyz: [f64; 3]) -> Option<[usize; 3]> {
        let mut ijk = [0usize; 3];
        for axis in 0..3 {
            let position = ((xyz[axis] - self.origin[axis]) / self.voxel_size).round();
            if !position.is_finite() || position < 0.0 || position >= self.shape[axis] as f64 {
                return None;
            }
            ijk[axis] = position as usize;
        }
        Some(ijk)
    }

    pub fn index_of(&self, xyz: [f64; 3]) -> Option<usize> {
        self.voxel_of(xyz).map(|ijk| self.index(ijk))
    }

    pub fn to_mm(&self, ijk: [usize; 3]) -> [f64; 3] {
        let mut xyz = [0.0; 3];
        for axis in 0..3 {
            xyz[axis] = self.origin[axis] + ijk[axis] as f64 * self.voxel_size;
        }
        xyz
    }

    pub fn index_to_mm(&self, index: usize) -> [f64; 3] {
        self.to_mm(self.ijk(index))
    }

    /// Voxel shifted by `offset`, if it stays inside the grid
    pub fn offset(&self, ijk: [usize; 3], offset: [isize; 3]) -> Option<usize> {
        let mut shifted = [0usize; 3];
        for axis in 0..3 {
            let position = ijk[axis] as isize + offset[axis];
            if position < 0 || position >= self.shape[axis] as isize {
                return None;
            }
            shifted[axis] = position as usize;
        }
        Some(self.index(shifted))
    }

    /// 26-connected neighbours of a voxel
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let ijk = self.ijk(index);
        (-1isize..=1)
            .flat_map(|di| (-1isize..=1).flat_map(move |dj| (-1isize..=1).map(move |dk| [di, dj, dk])))
            .filter(|offset| *offset != [0, 0, 0])
            .filter_map(move |offset| self.offset(ijk, offset))
    }

    /// 26-connected components of the voxels in `members`, largest first
    pub fn clusters(&self, members: &[usize]) -> Vec<Vec<usize>> {
        let mut remaining: HashSet<usize> = members.iter().copied().collect();
        let mut clusters = Vec::new();
        let mut queue = VecDeque::new();
        for &seed in members {
            if !remaining.remove(&seed) {
                continue;
            }
            queue.push_back(seed);
            let mut cluster = Vec::new();
            while let Some(voxel) = queue.pop_front() {
                cluster.push(voxel);
                for neighbor in self.neighbors(voxel) {
                    if remaining.remove(&neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
            clusters.push(cluster);
        }
        clusters.sort_by(|a, b| b.len().cmp(&a.len()));
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mni_shape() {
        assert_eq!(Grid::mni(2.0).shape(), [91, 109, 91]);
        assert_eq!(Grid::mni(4.0).shape(), [46, 55, 46]);
    }

    #[test]
    fn test_index_round_trip() {
        let grid = Grid::mni(8.0);
        for index in [0, 1, 17, grid.len() / 2, grid.len() - 1] {
            assert_eq!(grid.index(grid.ijk(index)), index);
            assert_eq!(grid.index_of(grid.index_to_mm(index)), Some(index));
        }
    }

    #[test]
    fn test_voxel_of_bounds() {
        let grid = Grid::mni(2.0);
        assert_eq!(grid.voxel_of([-90.0, -126.0, -72.0]), Some([0, 0, 0]));
        assert_eq!(grid.voxel_of([0.0, 0.0, 0.0]), Some([45, 63, 36]));
        assert_eq!(grid.voxel_of([0.9, -0.9, 0.0]), Some([45, 63, 36]));
        assert_eq!(grid.voxel_of([-100.0, 0.0, 0.0]), None);
        assert_eq!(grid.voxel_of([0.0, 95.0, 0.0]), None);
    }

    #[test]
    fn test_neighbors_at_corner_and_center() {
        let grid = Grid::new([0.0; 3], 1.0, [3, 3, 3]);
        assert_eq!(grid.neighbors(grid.index([0, 0, 0])).count(), 7);
        assert_eq!(grid.neighbors(grid.index([1, 1, 1])).count(), 26);
    }

    #[test]
    fn test_clusters_are_26_connected() {
        let grid = Grid::new([0.0; 3], 1.0, [5, 5, 5]);
        let members = vec![
            grid.index([0, 0, 0]),
            grid.index([1, 1, 1]),
            grid.index([2, 2, 2]),
            grid.index([4, 4, 0]),
        ];
        let clusters = grid.clusters(&members);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[1], vec![grid.index([4, 4, 0])]);
    }
}
