//! Multi-resolution engine (C6): drives ingress, completion detection, the
//! downsampling cascade, and histogram/writer dispatch. Grounded on
//! `bpMultiresolutionImsImage.cxx`.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::compression::Compression;
use crate::container::{Attribute, ContainerBackend, Path};
use crate::error::{Error, Result};
use crate::geometry::{div_ceil_u32, Vec3, Voxel};
use crate::histogram::Histogram;
use crate::image5d::Image5D;
use crate::pool::Pool;
use crate::pyramid;
use crate::writer::WriterPipeline;

/// One pyramid level's image plus the per-level geometry needed to
/// translate voxel coordinates into chunk coordinates.
struct Level<T: Voxel> {
    size: Vec3,
    chunk_shape: Vec3,
    image: Image5D<T>,
}

/// Drives the whole conversion: owns every pyramid level's chunked image,
/// the writer pipeline, and the container backend.
pub struct Engine<T: Voxel> {
    levels: Vec<Level<T>>,
    pool: Pool<T>,
    writer: WriterPipeline,
    backend: Arc<Mutex<dyn ContainerBackend>>,
    compression: Compression,
    channels: u32,
    time_points: u32,
    disable_pyramid: bool,
}

impl<T: Voxel> Engine<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image_size: Vec3,
        channels: u32,
        time_points: u32,
        pin_z: bool,
        disable_pyramid: bool,
        compression: Compression,
        thread_count: usize,
        max_buffer_bytes: i64,
        file_block_size: Vec3,
        backend: Arc<Mutex<dyn ContainerBackend>>,
    ) -> Result<Self> {
        let level_sizes = if disable_pyramid {
            pyramid::single_level(image_size)
        } else {
            pyramid::levels(image_size, pin_z, pyramid::DEFAULT_LEVEL_VOXEL_BUDGET)
        };

        let is_3d = image_size.z > 1;
        let chunk_shapes = pyramid::block_sizes(&level_sizes, is_3d, pyramid::DEFAULT_CHUNK_VOXEL_BUDGET);

        let pool = Pool::new();
        let mut levels: Vec<Level<T>> = level_sizes
            .iter()
            .zip(chunk_shapes.iter())
            .map(|(&size, &chunk_shape)| Level {
                size,
                chunk_shape,
                image: Image5D::new(pool.clone(), time_points, channels, size, chunk_shape),
            })
            .collect();

        // Level 0's chunk grid comes from the pyramid/block-size planner,
        // chosen from the image size alone; the client's file-block grid is
        // an independent constructor parameter. The two routinely disagree
        // (many small file blocks commonly tile one larger planner chunk, or
        // the reverse), so a chunk's remaining-contributions count is the
        // number of file-block-grid cells that actually overlap it.
        let level0_counts = overlap_counts(level_sizes[0], chunk_shapes[0], file_block_size);
        for time_point in 0..time_points {
            for channel in 0..channels {
                let image = levels[0].image.image_mut(time_point, channel);
                for (chunk_index, &count) in level0_counts.iter().enumerate() {
                    image.set_remaining(chunk_index, count);
                }
            }
        }

        // Levels above 0 receive their only contributions from the cascade
        // resample of the level below. The same independence applies there:
        // each level's chunk shape comes from its own cost search, so a
        // halving stride can fold more than one lower-level chunk into a
        // single chunk one level up.
        for level in 0..levels.len().saturating_sub(1) {
            let stride = cascade_stride(chunk_shapes[level], chunk_shapes[level + 1]);
            let lower_grid = level_sizes[level].div_ceil(chunk_shapes[level]);
            let parent_grid = level_sizes[level + 1].div_ceil(chunk_shapes[level + 1]);
            let counts = cascade_remaining_counts(lower_grid, stride, parent_grid);

            for time_point in 0..time_points {
                for channel in 0..channels {
                    let image = levels[level + 1].image.image_mut(time_point, channel);
                    for (chunk_index, &count) in counts.iter().enumerate() {
                        image.set_remaining(chunk_index, count);
                    }
                }
            }
        }

        let writer = WriterPipeline::new(thread_count, max_buffer_bytes)?;

        Ok(Self { levels, pool, writer, backend, compression, channels, time_points, disable_pyramid })
    }

    pub fn level_sizes(&self) -> Vec<Vec3> {
        self.levels.iter().map(|level| level.size).collect()
    }

    pub fn chunk_shapes(&self) -> Vec<Vec3> {
        self.levels.iter().map(|level| level.chunk_shape).collect()
    }

    /// Ingresses one whole client file block at level 0: a
    /// `width`x`height`x`depth` box at voxel origin `(x0, y0, z0)`, row-major
    /// with `src_row_stride` elements between the start of consecutive rows
    /// and `src_plane_stride` elements between the start of consecutive Z
    /// planes in `src`. The file-block grid and the chunk grid are
    /// independent, so this one block can overlap more than one chunk (or
    /// share a chunk with other file blocks); every chunk the block's box
    /// overlaps gets decremented exactly once, never more, regardless of how
    /// many Z planes the block spans.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_data(
        &mut self,
        time_point: u32,
        channel: u32,
        z0: u32,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        depth: u32,
        src: &[T],
        src_row_stride: u32,
        src_plane_stride: u32,
    ) -> Result<()> {
        let chunk_indices = {
            let image = self.levels[0].image.image_mut(time_point, channel);

            for dz in 0..depth {
                let plane_start = dz as usize * src_plane_stride as usize;
                for row in 0..height {
                    let start = plane_start + (row * src_row_stride) as usize;
                    image.copy_row(z0 + dz, y0 + row, x0, &src[start..start + width as usize]);
                }
            }

            image.chunk_indices_overlapping(Vec3::new(x0, y0, z0), Vec3::new(width, height, depth))
        };

        debug!(level = 0, time_point, channel, x0, y0, z0, depth, chunks = chunk_indices.len(), "ingested file block");

        let completed_chunks: Vec<usize> = {
            let image = self.levels[0].image.image_mut(time_point, channel);
            chunk_indices.into_iter().filter(|&chunk_index| image.decrement(chunk_index)).collect()
        };

        for chunk_index in completed_chunks {
            self.on_chunk_complete(0, time_point, channel, chunk_index)?;
        }

        Ok(())
    }

    /// Notification fired when a memory block's completion counter reaches
    /// zero: pads the border, releases the buffer, cascades the resample to
    /// the next level (as the writer pipeline's pre-function), adds the
    /// block to its histogram partition in a separate pass, and hands the
    /// buffer to the writer.
    pub fn on_chunk_complete(&mut self, level: usize, time_point: u32, channel: u32, chunk_index: usize) -> Result<()> {
        {
            let image = self.levels[level].image.image_mut(time_point, channel);
            image.pad_border_chunk(chunk_index);
        }

        let voxel_count = self.levels[level].chunk_shape.product() as usize;
        let (values_for_histogram, buffer_for_writer) = {
            let image = self.levels[level].image.image_mut(time_point, channel);
            let buffer = image.take_buffer(chunk_index);
            let values = buffer.as_slice().to_vec();
            (values, buffer)
        };

        {
            let image = self.levels[level].image.image_mut(time_point, channel);
            image.add_histogram_values(chunk_index, &values_for_histogram);
        }

        if !self.disable_pyramid && level + 1 < self.levels.len() {
            self.cascade_resample(level, time_point, channel, chunk_index, &values_for_histogram)?;
        }

        let voxel_size = std::mem::size_of::<T>();
        let chunk_shape = self.levels[level].chunk_shape;
        let backend = self.backend.clone();
        let compression = self.compression;
        let coord = coord_of(chunk_index, self.levels[level].image.image(time_point, channel).grid());
        let origin = coord.zip_map(chunk_shape, |c, s| c * s);
        let path_owned = format!("DataSet/ResolutionLevel {level}/TimePoint {time_point}/Channel {channel}/Data");

        let data_bytes = voxel_bytes(buffer_for_writer.as_slice());

        self.writer.start_write(
            data_bytes,
            voxel_size,
            compression,
            None,
            Box::new(move |compressed| {
                let mut backend = backend.lock().unwrap();
                let segments: Vec<&str> = path_owned.split('/').collect();
                backend.write_chunk(&segments, origin, compressed)
            }),
        );

        Ok(())
    }

    fn cascade_resample(
        &mut self,
        level: usize,
        time_point: u32,
        channel: u32,
        chunk_index: usize,
        values: &[T],
    ) -> Result<()> {
        let chunk_shape = self.levels[level].chunk_shape;
        let next_shape = self.levels[level + 1].chunk_shape;
        let stride = cascade_stride(chunk_shape, next_shape);

        let grid = self.levels[level].image.image(time_point, channel).grid();
        let coord = coord_of(chunk_index, grid);
        let next_grid = self.levels[level + 1].image.image(time_point, channel).grid();
        let next_coord = coord.zip_map(stride, |c, s| c / s);

        if next_coord.x >= next_grid.x || next_coord.y >= next_grid.y || next_coord.z >= next_grid.z {
            return Err(Error::Layout);
        }

        let resampled = resample_average(values, chunk_shape, stride);
        let next_origin = next_coord.zip_map(next_shape, |c, s| c * s);

        let next_index = {
            let next_image = self.levels[level + 1].image.image_mut(time_point, channel);
            let next_index = next_image.chunk_index(next_coord);

            for z in 0..next_shape.z {
                for y in 0..next_shape.y {
                    let row_start = (z as usize * next_shape.y as usize + y as usize) * next_shape.x as usize;
                    let row = &resampled[row_start..row_start + next_shape.x as usize];
                    next_image.copy_row(next_origin.z + z, next_origin.y + y, next_origin.x, row);
                }
            }

            next_index
        };

        let completed = {
            let next_image = self.levels[level + 1].image.image_mut(time_point, channel);
            next_image.decrement(next_index)
        };

        if completed {
            self.on_chunk_complete(level + 1, time_point, channel, next_index)?;
        }

        Ok(())
    }

    /// Drains every queue, flushes all histograms, and closes the container.
    pub fn finish_write(self) -> Result<()> {
        info!("finishing write, draining writer pipeline");
        self.writer.finish()?;
        self.backend.lock().unwrap().close()?;
        Ok(())
    }

    /// Level-0 histogram for a channel, aggregated across time points onto
    /// a shared (min,max) range and resampled to at most 1024 bins.
    pub fn channel_histogram(&self, channel: u32) -> Histogram {
        let level0 = &self.levels[0];
        let mut merged: Option<Histogram> = None;

        for time_point in 0..self.time_points {
            let histogram = level0.image.image(time_point, channel).histogram(None);
            merged = Some(match merged {
                None => histogram,
                Some(existing) => merge_on_shared_range(existing, histogram),
            });
        }

        let histogram = merged.unwrap_or(Histogram { min: 0.0, max: 0.0, bins: vec![0; 256] });
        if histogram.bins.len() > 1024 {
            histogram.resampled(1024)
        } else {
            histogram
        }
    }

    pub fn write_attributes(&self, path: Path<'_>, attributes: &[Attribute]) -> Result<()> {
        self.backend.lock().unwrap().write_attributes(path, attributes)
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }
}

/// Per-axis ratio between a level's chunk shape and the next level's,
/// clamped to the single halving step the resample cascade performs.
fn cascade_stride(chunk_shape: Vec3, next_shape: Vec3) -> Vec3 {
    Vec3::new(
        (chunk_shape.x / next_shape.x).max(1).min(2),
        (chunk_shape.y / next_shape.y).max(1).min(2),
        (chunk_shape.z / next_shape.z).max(1).min(2),
    )
}

/// For each cell of a `chunk_shape` grid over `image_size`, the number of
/// cells of an independent `block_shape` grid over the same image that
/// overlap it. Both grids are regular and clipped at the same image
/// boundary, so the count is separable into a per-axis interval overlap.
fn overlap_counts(image_size: Vec3, chunk_shape: Vec3, block_shape: Vec3) -> Vec<u32> {
    let grid = image_size.div_ceil(chunk_shape);
    let counts_x = axis_overlap_counts(image_size.x, chunk_shape.x, block_shape.x);
    let counts_y = axis_overlap_counts(image_size.y, chunk_shape.y, block_shape.y);
    let counts_z = axis_overlap_counts(image_size.z, chunk_shape.z, block_shape.z);

    let mut out = vec![0u32; grid.product() as usize];
    for cz in 0..grid.z {
        for cy in 0..grid.y {
            for cx in 0..grid.x {
                let index = (cx + cy * grid.x + cz * grid.x * grid.y) as usize;
                out[index] = counts_x[cx as usize] * counts_y[cy as usize] * counts_z[cz as usize];
            }
        }
    }
    out
}

/// Along one axis, how many `block_len`-wide cells (tiling `0..axis_size`,
/// clipped at the boundary) overlap each `chunk_len`-wide cell of the other
/// grid over the same axis.
fn axis_overlap_counts(axis_size: u32, chunk_len: u32, block_len: u32) -> Vec<u32> {
    let chunk_len = chunk_len.max(1);
    let block_len = block_len.max(1);
    let grid_len = div_ceil_u32(axis_size, chunk_len);
    let block_grid_len = div_ceil_u32(axis_size, block_len).max(1);

    (0..grid_len)
        .map(|c| {
            let start = c * chunk_len;
            let end = ((c + 1) * chunk_len).min(axis_size).max(start + 1);
            let start_block = start / block_len;
            let end_block = ((end - 1) / block_len).min(block_grid_len - 1);
            end_block - start_block + 1
        })
        .collect()
}

/// For each parent-grid cell, how many `lower_grid` cells map into it under
/// `coord / stride` - the same mapping [`Engine::cascade_resample`] uses at
/// runtime, so the remaining-contributions count matches exactly how many
/// times that chunk will actually be decremented.
fn cascade_remaining_counts(lower_grid: Vec3, stride: Vec3, parent_grid: Vec3) -> Vec<u32> {
    let stride = Vec3::new(stride.x.max(1), stride.y.max(1), stride.z.max(1));
    let mut out = vec![0u32; parent_grid.product() as usize];

    for cz in 0..lower_grid.z {
        for cy in 0..lower_grid.y {
            for cx in 0..lower_grid.x {
                let parent = Vec3::new(cx / stride.x, cy / stride.y, cz / stride.z);
                if parent.x < parent_grid.x && parent.y < parent_grid.y && parent.z < parent_grid.z {
                    let index = (parent.x + parent.y * parent_grid.x + parent.z * parent_grid.x * parent_grid.y) as usize;
                    out[index] += 1;
                }
            }
        }
    }

    out
}

fn coord_of(index: usize, grid: Vec3) -> Vec3 {
    let x = index % grid.x as usize;
    let y = (index / grid.x as usize) % grid.y as usize;
    let z = index / (grid.x as usize * grid.y as usize);
    Vec3::new(x as u32, y as u32, z as u32)
}

/// Averages `stride`-sized cubes of `values` (laid out `chunk_shape`-shaped)
/// down to one voxel each, accumulating in `f32` and casting back to `T`.
fn resample_average<T: Voxel>(values: &[T], chunk_shape: Vec3, stride: Vec3) -> Vec<T> {
    let out_shape = chunk_shape.zip_map(stride, |s, d| (s / d).max(1));
    let mut out = vec![T::default(); out_shape.product() as usize];
    let divisor = (stride.x * stride.y * stride.z).max(1) as f32;

    for oz in 0..out_shape.z {
        for oy in 0..out_shape.y {
            for ox in 0..out_shape.x {
                let mut sum = 0.0f32;
                for dz in 0..stride.z {
                    for dy in 0..stride.y {
                        for dx in 0..stride.x {
                            let x = ox * stride.x + dx;
                            let y = oy * stride.y + dy;
                            let z = oz * stride.z + dz;
                            let index = (z as usize * chunk_shape.y as usize + y as usize) * chunk_shape.x as usize + x as usize;
                            sum += values[index].to_f32();
                        }
                    }
                }
                let out_index = (oz as usize * out_shape.y as usize + oy as usize) * out_shape.x as usize + ox as usize;
                out[out_index] = T::from_f32_saturating(sum / divisor);
            }
        }
    }

    out
}

fn merge_on_shared_range(a: Histogram, b: Histogram) -> Histogram {
    let min = a.min.min(b.min);
    let max = a.max.max(b.max);
    let bin_count = a.bins.len().max(b.bins.len()).max(1);
    let mut bins = vec![0u64; bin_count];

    for source in [&a, &b] {
        let width = (source.max - source.min) / source.bins.len().max(1) as f32;
        for (i, &count) in source.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let value = source.min + (i as f32 + 0.5) * width;
            let j = if max > min {
                (((value - min) / (max - min)) * bin_count as f32) as usize
            } else {
                0
            };
            bins[j.min(bin_count - 1)] += count;
        }
    }

    Histogram { min, max, bins }
}

fn voxel_bytes<T: Voxel>(values: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<T>());
    for &value in values {
        value.write_le_bytes(&mut bytes);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_average_halves_each_axis() {
        let chunk_shape = Vec3::new(2, 2, 2);
        let values: Vec<u8> = vec![10, 20, 30, 40, 10, 20, 30, 40];
        let resampled = resample_average(&values, chunk_shape, Vec3::new(2, 2, 2));
        assert_eq!(resampled.len(), 1);
        assert_eq!(resampled[0], 25);
    }

    #[test]
    fn overlap_counts_match_many_small_blocks_tiling_one_chunk() {
        // A single 1024x1024x1 chunk tiled by 256x256x1 file blocks: every
        // axis has 4 file blocks per chunk, so each chunk should wait for
        // 4*4 = 16 of them, not 1.
        let counts = overlap_counts(Vec3::new(1024, 1024, 1), Vec3::new(1024, 1024, 1), Vec3::new(256, 256, 1));
        assert_eq!(counts, vec![16]);
    }

    #[test]
    fn overlap_counts_match_one_block_spanning_many_chunks() {
        // The reverse: one 1024x1024x1 file block tiling a grid of
        // 256x256x1 chunks - each chunk should wait for exactly 1 block.
        let counts = overlap_counts(Vec3::new(1024, 1024, 1), Vec3::new(256, 256, 1), Vec3::new(1024, 1024, 1));
        assert!(counts.iter().all(|&count| count == 1));
        assert_eq!(counts.len(), 16);
    }

    #[test]
    fn cascade_remaining_counts_fold_multiple_children_into_one_parent() {
        // A 4x4x1 lower-level chunk grid cascading into a 2x2x1 grid one
        // level up with a stride of 2 on each axis: every parent receives
        // exactly 4 children.
        let counts = cascade_remaining_counts(Vec3::new(4, 4, 1), Vec3::new(2, 2, 1), Vec3::new(2, 2, 1));
        assert_eq!(counts, vec![4, 4, 4, 4]);
    }
}
