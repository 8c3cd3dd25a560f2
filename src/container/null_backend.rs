//! A backend that records every call but writes nothing, used by the
//! engine's own unit tests so they can run without linking libhdf5.

use super::{Attribute, ContainerBackend, Path};
use crate::compression::Compression;
use crate::error::Result;
use crate::geometry::Vec3;

#[derive(Debug, Default)]
pub struct NullBackend {
    pub groups_created: Vec<String>,
    pub attributes_written: Vec<(String, usize)>,
    pub datasets_created: Vec<String>,
    pub chunks_written: usize,
    pub histograms_written: usize,
    pub thumbnail_written: bool,
    pub closed: bool,
}

fn join(path: Path<'_>) -> String {
    path.join("/")
}

impl ContainerBackend for NullBackend {
    fn create_group(&mut self, path: Path<'_>) -> Result<()> {
        self.groups_created.push(join(path));
        Ok(())
    }

    fn write_attributes(&mut self, path: Path<'_>, attributes: &[Attribute]) -> Result<()> {
        self.attributes_written.push((join(path), attributes.len()));
        Ok(())
    }

    fn create_dataset(&mut self, path: Path<'_>, _size: Vec3, _chunk_shape: Vec3, _compression: Compression) -> Result<()> {
        self.datasets_created.push(join(path));
        Ok(())
    }

    fn write_chunk(&mut self, _path: Path<'_>, _origin: Vec3, _compressed: &[u8]) -> Result<()> {
        self.chunks_written += 1;
        Ok(())
    }

    fn write_histogram(&mut self, _path: Path<'_>, _bins: &[u64]) -> Result<()> {
        self.histograms_written += 1;
        Ok(())
    }

    fn write_thumbnail(&mut self, _size_x: u32, _size_y: u32, _rgba: &[u8]) -> Result<()> {
        self.thumbnail_written = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
