//! Container backend adapter (C10): the hierarchical directory/attribute/
//! chunk contract, grounded on `bpWriterHDF5.cxx`, plus the name-encoding
//! helper supplemented from `bpImsUtils.cxx`.

mod naming;
mod null_backend;

#[cfg(feature = "hdf5")]
mod hdf5_backend;

pub use naming::encode_name;
pub use null_backend::NullBackend;

#[cfg(feature = "hdf5")]
pub use hdf5_backend::Hdf5Backend;

use crate::compression::Compression;
use crate::error::Result;
use crate::geometry::Vec3;

/// A path to a group or dataset inside the container, e.g.
/// `["DataSet", "ResolutionLevel 0", "TimePoint 0", "Channel 0"]`.
pub type Path<'a> = &'a [&'a str];

/// A typed attribute value; the contract only requires strings (see §4.7),
/// numeric attributes are stored as their decimal string form.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// The container-facing operations the engine needs: open, build the group
/// tree, write attributes, write raw (already-compressed) chunks, write
/// histogram/thumbnail datasets, and close.
pub trait ContainerBackend: Send {
    fn create_group(&mut self, path: Path<'_>) -> Result<()>;

    fn write_attributes(&mut self, path: Path<'_>, attributes: &[Attribute]) -> Result<()>;

    /// Creates the chunked dataset for one (level, time, channel) image,
    /// registering the compression filter it will receive chunks in.
    fn create_dataset(&mut self, path: Path<'_>, size: Vec3, chunk_shape: Vec3, compression: Compression) -> Result<()>;

    /// Writes one already-compressed chunk at `origin` (voxel coordinates,
    /// Z/Y/X order) into the dataset at `path`.
    fn write_chunk(&mut self, path: Path<'_>, origin: Vec3, compressed: &[u8]) -> Result<()>;

    fn write_histogram(&mut self, path: Path<'_>, bins: &[u64]) -> Result<()>;

    fn write_thumbnail(&mut self, size_x: u32, size_y: u32, rgba: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
