//! Pyramid level planning and chunk-shape cost search (C3).
//!
//! Pure, deterministic, thread-free — grounded on `bpOptimalBlockLayout.cxx`.

use crate::geometry::Vec3;
use crate::math::{ceil_log_2, floor_log_2};

/// Default voxel budget per pyramid level (stop reducing once a level's
/// voxel count falls at or below this).
pub const DEFAULT_LEVEL_VOXEL_BUDGET: u64 = 1024 * 1024;

/// Default voxel budget per chunk (the product of a chunk's X*Y*Z).
pub const DEFAULT_CHUNK_VOXEL_BUDGET: u64 = 1024 * 1024;

/// Computes the image pyramid: level 0 is `size` unchanged, each following
/// level halves the axes whose `(10*size)^2 > product of the other two axes`
/// - unless `pin_z` is set, in which case Z never reduces (the
/// `force_file_block_size_z1` client option). Stops once the level's voxel
/// count is at or below `voxel_budget`, or once no axis qualifies.
pub fn levels(size: Vec3, pin_z: bool, voxel_budget: u64) -> Vec<Vec3> {
    let mut levels = vec![size];

    loop {
        let current = *levels.last().unwrap();
        if current.product() <= voxel_budget {
            break;
        }

        let reduce_x = should_reduce(current.x, current.y * current.z);
        let reduce_y = should_reduce(current.y, current.x * current.z);
        let reduce_z = !pin_z && should_reduce(current.z, current.x * current.y);

        if !reduce_x && !reduce_y && !reduce_z {
            break;
        }

        let next = Vec3::new(
            if reduce_x { (current.x / 2).max(1) } else { current.x },
            if reduce_y { (current.y / 2).max(1) } else { current.y },
            if reduce_z { (current.z / 2).max(1) } else { current.z },
        );

        if next == current {
            break;
        }

        levels.push(next);
    }

    levels
}

/// Honors the `disable_pyramid` option literally: a single-level pyramid.
pub fn single_level(size: Vec3) -> Vec<Vec3> {
    vec![size]
}

fn should_reduce(axis_size: u32, other_product: u32) -> bool {
    axis_size > 1 && {
        let scaled = u64::from(axis_size) * 10;
        scaled * scaled > u64::from(other_product)
    }
}

/// Chooses a chunk shape for one pyramid level given the level's image size
/// and (for levels after the first) the previous level's chunk shape plus
/// which axes reduced going into this level.
pub fn block_sizes(level_sizes: &[Vec3], is_3d: bool, chunk_budget: u64) -> Vec<Vec3> {
    let mut out = Vec::with_capacity(level_sizes.len());
    let mut previous_chunk: Option<Vec3> = None;
    let mut previous_size: Option<Vec3> = None;

    for &size in level_sizes {
        let lower_bound = match (previous_chunk, previous_size) {
            (Some(chunk), Some(prev_size)) => Vec3::new(
                halve_if_reduced(chunk.x, prev_size.x, size.x),
                halve_if_reduced(chunk.y, prev_size.y, size.y),
                halve_if_reduced(chunk.z, prev_size.z, size.z),
            ),
            _ => Vec3::splat(1),
        };

        let chosen = best_chunk_shape(size, is_3d, chunk_budget, lower_bound);
        previous_chunk = Some(chosen);
        previous_size = Some(size);
        out.push(chosen);
    }

    out
}

fn halve_if_reduced(chunk_axis: u32, prev_axis: u32, current_axis: u32) -> u32 {
    if current_axis < prev_axis {
        (chunk_axis / 2).max(1)
    } else {
        chunk_axis
    }
}

fn best_chunk_shape(size: Vec3, is_3d: bool, chunk_budget: u64, lower_bound: Vec3) -> Vec3 {
    let max_log = ceil_log_2(chunk_budget.max(1) as u32).min(20);

    let mut best: Option<(Cost, Vec3)> = None;

    for lx in 0..=max_log {
        for ly in 0..=max_log {
            for lz in 0..=max_log {
                let shape = Vec3::new(1 << lx, 1 << ly, 1 << lz);
                if shape.product() > chunk_budget {
                    continue;
                }
                if shape.x < lower_bound.x || shape.y < lower_bound.y || shape.z < lower_bound.z {
                    continue;
                }
                if !is_admissible(shape, is_3d) {
                    continue;
                }

                let cost = Cost::of(shape, size);
                if cost.waste_ratio > 2.0 {
                    continue;
                }

                let is_better = match &best {
                    Some((best_cost, _)) => cost < *best_cost,
                    None => true,
                };
                if is_better {
                    best = Some((cost, shape));
                }
            }
        }
    }

    best.map(|(_, shape)| shape).unwrap_or_else(|| fallback_shape(size, chunk_budget, lower_bound))
}

fn is_admissible(shape: Vec3, is_3d: bool) -> bool {
    if is_3d {
        shape.x == shape.y && shape.z > 2
    } else {
        shape.x <= 4 * shape.y && shape.y <= 4 * shape.x && shape.z == 1
    }
}

/// Even log2 split, used only when the cost search finds nothing admissible.
fn fallback_shape(size: Vec3, chunk_budget: u64, lower_bound: Vec3) -> Vec3 {
    let total_log = floor_log_2(chunk_budget.max(1) as u32);
    let per_axis = total_log / 3;
    Vec3::new(
        (1u32 << per_axis).max(lower_bound.x).min(size.x.max(1)),
        (1u32 << per_axis).max(lower_bound.y).min(size.y.max(1)),
        (1u32 << per_axis).max(lower_bound.z).min(size.z.max(1)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Cost {
    slice_cost: f64,
    surface_area: f64,
    waste_ratio: f64,
}

impl Cost {
    fn of(shape: Vec3, image_size: Vec3) -> Self {
        let grid = image_size.div_ceil(shape);
        let padded = grid.zip_map(shape, |g, s| g * s);
        let waste_ratio = padded.product() as f64 / image_size.product().max(1) as f64;

        // cost of rendering one XY slice: number of chunks touched per slice
        let slice_cost = f64::from(grid.x) * f64::from(grid.y);
        let surface_area = 2.0 * (f64::from(shape.x) * f64::from(shape.y)
            + f64::from(shape.y) * f64::from(shape.z)
            + f64::from(shape.x) * f64::from(shape.z));

        Cost { slice_cost, surface_area, waste_ratio }
    }
}

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.slice_cost
            .partial_cmp(&other.slice_cost)
            .unwrap()
            .then_with(|| self.surface_area.partial_cmp(&other.surface_area).unwrap())
            .then_with(|| self.waste_ratio.partial_cmp(&other.waste_ratio).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pyramid_stops_under_budget() {
        let levels = levels(Vec3::new(4096, 4096, 64), false, DEFAULT_LEVEL_VOXEL_BUDGET);
        assert_eq!(levels[0], Vec3::new(4096, 4096, 64));
        assert!(levels.last().unwrap().product() <= DEFAULT_LEVEL_VOXEL_BUDGET);
        assert!(levels.len() > 1);
    }

    #[test]
    fn pinned_z_never_reduces() {
        let levels = levels(Vec3::new(2048, 2048, 37), true, DEFAULT_LEVEL_VOXEL_BUDGET);
        assert!(levels.iter().all(|level| level.z == 37));
    }

    #[test]
    fn single_level_pyramid_has_one_entry() {
        assert_eq!(single_level(Vec3::new(10, 10, 10)).len(), 1);
    }

    #[test]
    fn block_sizes_are_admissible_and_shrink_with_level() {
        let levels = levels(Vec3::new(1024, 1024, 128), false, DEFAULT_LEVEL_VOXEL_BUDGET);
        let shapes = block_sizes(&levels, true, DEFAULT_CHUNK_VOXEL_BUDGET);
        for shape in &shapes {
            assert!(is_admissible(*shape, true));
            assert!(shape.product() <= DEFAULT_CHUNK_VOXEL_BUDGET);
        }
    }
}
