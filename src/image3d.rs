//! Chunked 3D image (C4): a grid of same-shape memory blocks with a
//! completion counter and a set of hash-partitioned histogram builders.
//! Grounded on `bpImsImage3D.cxx` / `bpImsImageBlock.cxx`.

use crate::geometry::{Vec3, Voxel};
use crate::histogram::{Histogram, HistogramBuilder};
use crate::pool::{Pool, PooledBuffer};

/// Maximum number of histogram partitions, matching the original's cap.
const MAX_HISTOGRAM_PARTITIONS: usize = 16;

pub fn histogram_partition_count(chunk_count: usize) -> usize {
    MAX_HISTOGRAM_PARTITIONS.min(chunk_count.div_ceil(64).max(1))
}

/// Hash-partitions a chunk coordinate to a histogram builder index. Kept
/// unchanged from the original; arbitrary but stable - tests must not
/// assume any particular chunk lands in a particular partition.
pub fn partition_of(chunk: Vec3, partitions: usize) -> usize {
    ((chunk.x as usize) + 4 * (chunk.y as usize) + 3 * (chunk.z as usize)) % partitions.max(1)
}

struct Chunk<T: Voxel> {
    buffer: Option<PooledBuffer<T>>,
    remaining: u32,
}

/// A chunked 3D grid of memory blocks covering one (resolution level,
/// channel, time point) slice of the image.
pub struct ChunkedImage3D<T: Voxel> {
    pool: Pool<T>,
    image_size: Vec3,
    chunk_shape: Vec3,
    grid: Vec3,
    chunks: Vec<Chunk<T>>,
    histograms: Vec<T::Hist>,
}

impl<T: Voxel> ChunkedImage3D<T> {
    pub fn new(pool: Pool<T>, image_size: Vec3, chunk_shape: Vec3) -> Self {
        let grid = image_size.div_ceil(chunk_shape);
        let chunk_count = grid.product() as usize;
        let chunks = (0..chunk_count).map(|_| Chunk { buffer: None, remaining: 0 }).collect();
        let partitions = histogram_partition_count(chunk_count);

        Self {
            pool,
            image_size,
            chunk_shape,
            grid,
            chunks,
            histograms: (0..partitions).map(|_| T::Hist::default()).collect(),
        }
    }

    pub fn grid(&self) -> Vec3 {
        self.grid
    }

    pub fn chunk_shape(&self) -> Vec3 {
        self.chunk_shape
    }

    pub fn chunk_index(&self, coord: Vec3) -> usize {
        coord.x as usize + coord.y as usize * self.grid.x as usize + coord.z as usize * (self.grid.x * self.grid.y) as usize
    }

    pub fn chunk_coord(&self, index: usize) -> Vec3 {
        let x = index % self.grid.x as usize;
        let y = (index / self.grid.x as usize) % self.grid.y as usize;
        let z = index / (self.grid.x as usize * self.grid.y as usize);
        Vec3::new(x as u32, y as u32, z as u32)
    }

    /// Every chunk index whose box overlaps the voxel box at `origin` with
    /// the given `extent`. A single ingress (a client file block, or a
    /// cascade resample write) can span more than one chunk when its grid
    /// does not align with this image's chunk grid.
    pub fn chunk_indices_overlapping(&self, origin: Vec3, extent: Vec3) -> Vec<usize> {
        let last = Vec3::new(
            (origin.x + extent.x.saturating_sub(1)).min(self.image_size.x.saturating_sub(1)),
            (origin.y + extent.y.saturating_sub(1)).min(self.image_size.y.saturating_sub(1)),
            (origin.z + extent.z.saturating_sub(1)).min(self.image_size.z.saturating_sub(1)),
        );
        let first_chunk = Vec3::new(origin.x / self.chunk_shape.x, origin.y / self.chunk_shape.y, origin.z / self.chunk_shape.z);
        let last_chunk = Vec3::new(last.x / self.chunk_shape.x, last.y / self.chunk_shape.y, last.z / self.chunk_shape.z);

        let mut indices = Vec::new();
        for cz in first_chunk.z..=last_chunk.z {
            for cy in first_chunk.y..=last_chunk.y {
                for cx in first_chunk.x..=last_chunk.x {
                    indices.push(self.chunk_index(Vec3::new(cx, cy, cz)));
                }
            }
        }
        indices
    }

    /// Sets the remaining-contributions counter for a chunk (called once
    /// during engine initialization from the geometry, before any ingress).
    pub fn set_remaining(&mut self, chunk_index: usize, remaining: u32) {
        self.chunks[chunk_index].remaining = remaining;
    }

    fn ensure_allocated(&mut self, chunk_index: usize) -> &mut [T] {
        let voxel_count = self.chunk_shape.product() as usize;
        let pool = self.pool.clone();
        let chunk = &mut self.chunks[chunk_index];
        if chunk.buffer.is_none() {
            chunk.buffer = Some(pool.get(voxel_count));
        }
        chunk.buffer.as_mut().unwrap().as_mut_slice()
    }

    /// Writes one XY row of voxels (length `row.len()`) into the chunk(s)
    /// covering `(z, y, x0..x0+row.len())`, splitting the row across chunk
    /// boundaries as needed.
    pub fn copy_row(&mut self, z: u32, y: u32, x0: u32, row: &[T]) {
        let mut remaining = row;
        let mut x = x0;

        while !remaining.is_empty() {
            let chunk_coord = Vec3::new(x / self.chunk_shape.x, y / self.chunk_shape.y, z / self.chunk_shape.z);
            let index = self.chunk_index(chunk_coord);
            let local_x = (x % self.chunk_shape.x) as usize;
            let local_y = (y % self.chunk_shape.y) as usize;
            let local_z = (z % self.chunk_shape.z) as usize;

            let take = (self.chunk_shape.x as usize - local_x).min(remaining.len());
            let shape = self.chunk_shape;
            let dest = self.ensure_allocated(index);
            let plane = shape.x as usize * shape.y as usize;
            let offset = local_z * plane + local_y * shape.x as usize + local_x;
            dest[offset..offset + take].copy_from_slice(&remaining[..take]);

            remaining = &remaining[take..];
            x += take as u32;
        }
    }

    /// Decrements the completion counter for a chunk; returns `true` when
    /// this call brought it to zero (the chunk is now complete).
    pub fn decrement(&mut self, chunk_index: usize) -> bool {
        let chunk = &mut self.chunks[chunk_index];
        debug_assert!(chunk.remaining > 0, "decremented a chunk with no remaining contributions");
        chunk.remaining -= 1;
        chunk.remaining == 0
    }

    /// Zero-pads the overhanging part of a boundary chunk whose nominal
    /// extent exceeds the image size. Returns whether padding changed
    /// anything (there was overhang on at least one axis).
    pub fn pad_border_chunk(&mut self, chunk_index: usize) -> bool {
        let coord = self.chunk_coord(chunk_index);
        let origin = coord.zip_map(self.chunk_shape, |c, s| c * s);
        let overhang = Vec3::new(
            origin.x.saturating_add(self.chunk_shape.x).saturating_sub(self.image_size.x),
            origin.y.saturating_add(self.chunk_shape.y).saturating_sub(self.image_size.y),
            origin.z.saturating_add(self.chunk_shape.z).saturating_sub(self.image_size.z),
        );

        if overhang == Vec3::splat(0) {
            return false;
        }

        let shape = self.chunk_shape;
        let data = self.ensure_allocated(chunk_index);
        let plane = shape.x as usize * shape.y as usize;

        for z in 0..shape.z {
            for y in 0..shape.y {
                let row_start = z as usize * plane + y as usize * shape.x as usize;
                let valid_x = (shape.x - overhang.x) as usize;
                let valid_y = y < shape.y - overhang.y;
                let valid_z = z < shape.z - overhang.z;
                if overhang.x > 0 && valid_y && valid_z {
                    for value in &mut data[row_start + valid_x..row_start + shape.x as usize] {
                        *value = T::default();
                    }
                }
                if !valid_y || !valid_z {
                    for value in &mut data[row_start..row_start + shape.x as usize] {
                        *value = T::default();
                    }
                }
            }
        }

        true
    }

    /// Releases a complete chunk's buffer (handing ownership to the caller,
    /// typically the writer pipeline) and records it into the appropriate
    /// histogram partition.
    pub fn take_buffer(&mut self, chunk_index: usize) -> PooledBuffer<T> {
        self.chunks[chunk_index].buffer.take().expect("chunk has no buffer to release")
    }

    pub fn add_histogram_values(&mut self, chunk_index: usize, values: &[T]) {
        let coord = self.chunk_coord(chunk_index);
        let partition = partition_of(coord, self.histograms.len());
        let builder = &mut self.histograms[partition];
        for &value in values {
            builder.add(value);
        }
    }

    pub fn histogram(&self, max_bins: Option<usize>) -> Histogram {
        let mut merged = self.histograms[0].finish();
        for builder in &self.histograms[1..] {
            let finished = builder.finish();
            merged = merge_histograms(merged, finished);
        }

        match max_bins {
            Some(bins) if bins < merged.bins.len() => merged.resampled(bins),
            _ => merged,
        }
    }
}

fn merge_histograms(a: Histogram, b: Histogram) -> Histogram {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }

    let min = a.min.min(b.min);
    let max = a.max.max(b.max);
    let bin_count = a.bins.len().max(b.bins.len());
    let mut bins = vec![0u64; bin_count];

    for (source, count) in [(&a, a.bins.len()), (&b, b.bins.len())] {
        let width = (source.max - source.min) / count.max(1) as f32;
        for (i, &c) in source.bins.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let value = source.min + (i as f32 + 0.5) * width;
            let j = (((value - min) / ((max - min) / bin_count as f32)) as usize).min(bin_count - 1);
            bins[j] += c;
        }
    }

    Histogram { min, max, bins }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_u8_image() -> ChunkedImage3D<u8> {
        let pool = Pool::new();
        ChunkedImage3D::new(pool, Vec3::new(4, 4, 2), Vec3::new(2, 2, 2))
    }

    #[test]
    fn chunk_index_round_trips_through_chunk_coord() {
        let image = small_u8_image();
        for index in 0..image.chunks.len() {
            let coord = image.chunk_coord(index);
            assert_eq!(image.chunk_index(coord), index);
        }
    }

    #[test]
    fn copy_row_lands_in_the_right_chunk() {
        let mut image = small_u8_image();
        image.copy_row(0, 0, 0, &[1, 2, 3, 4]);
        let chunk0 = image.ensure_allocated(0);
        assert_eq!(chunk0[0], 1);
        assert_eq!(chunk0[1], 2);
        let chunk1_index = image.chunk_index(Vec3::new(1, 0, 0));
        let chunk1 = image.ensure_allocated(chunk1_index);
        assert_eq!(chunk1[0], 3);
        assert_eq!(chunk1[1], 4);
    }

    #[test]
    fn decrement_reports_completion() {
        let mut image = small_u8_image();
        image.set_remaining(0, 2);
        assert!(!image.decrement(0));
        assert!(image.decrement(0));
    }
}
