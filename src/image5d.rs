//! 5D image (C5): one [`ChunkedImage3D`] per (time point, channel) pair.
//! Grounded on `bpImsImage5D.cxx`.

use crate::geometry::{Vec3, Voxel};
use crate::image3d::ChunkedImage3D;
use crate::pool::Pool;

pub struct Image5D<T: Voxel> {
    time_points: u32,
    channels: u32,
    images: Vec<ChunkedImage3D<T>>,
}

impl<T: Voxel> Image5D<T> {
    pub fn new(pool: Pool<T>, time_points: u32, channels: u32, image_size: Vec3, chunk_shape: Vec3) -> Self {
        let count = (time_points * channels) as usize;
        let images = (0..count)
            .map(|_| ChunkedImage3D::new(pool.clone(), image_size, chunk_shape))
            .collect();

        Self { time_points, channels, images }
    }

    pub fn index_of(&self, time_point: u32, channel: u32) -> usize {
        debug_assert!(time_point < self.time_points && channel < self.channels);
        (time_point * self.channels + channel) as usize
    }

    pub fn image(&self, time_point: u32, channel: u32) -> &ChunkedImage3D<T> {
        &self.images[self.index_of(time_point, channel)]
    }

    pub fn image_mut(&mut self, time_point: u32, channel: u32) -> &mut ChunkedImage3D<T> {
        let index = self.index_of(time_point, channel);
        &mut self.images[index]
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn time_points(&self) -> u32 {
        self.time_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_are_unique_per_time_and_channel() {
        let pool = Pool::new();
        let image: Image5D<u8> = Image5D::new(pool, 3, 2, Vec3::new(4, 4, 4), Vec3::new(2, 2, 2));
        let mut seen = std::collections::HashSet::new();
        for t in 0..3 {
            for c in 0..2 {
                assert!(seen.insert(image.index_of(t, c)));
            }
        }
    }
}
