//! HDF5-backed [`ContainerBackend`], grounded on `bpWriterHDF5.cxx`'s group
//! tree and dataset/attribute layout, implemented on top of the real
//! `hdf5` bindings rather than re-deriving the file format.

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};

use super::{Attribute, ContainerBackend, Path};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::geometry::Vec3;

/// HDF5 filter id for LZ4, registered once per file when needed.
const LZ4_FILTER_ID: i32 = 32004;

pub struct Hdf5Backend {
    file: File,
}

impl Hdf5Backend {
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = File::create(path).map_err(to_io_error)?;
        Ok(Self { file })
    }

    /// Looks up the group at `path`, creating any segment that doesn't exist
    /// yet. `Converter` only pre-creates the `DataSet` subtree up front;
    /// `DataSetInfo`/`Thumbnail` are created lazily the first time something
    /// is written under them.
    fn open_group(&self, path: Path<'_>) -> Result<Group> {
        let mut group = self.file.as_group().map_err(to_io_error)?;
        for segment in path {
            let name = super::encode_name(segment);
            group = match group.group(&name) {
                Ok(existing) => existing,
                Err(_) => group.create_group(&name).map_err(to_io_error)?,
            };
        }
        Ok(group)
    }
}

fn to_io_error(error: hdf5::Error) -> Error {
    Error::Io(std::io::Error::other(error.to_string()))
}

impl ContainerBackend for Hdf5Backend {
    fn create_group(&mut self, path: Path<'_>) -> Result<()> {
        let mut group = self.file.as_group().map_err(to_io_error)?;
        for segment in path {
            let name = super::encode_name(segment);
            group = match group.group(&name) {
                Ok(existing) => existing,
                Err(_) => group.create_group(&name).map_err(to_io_error)?,
            };
        }
        Ok(())
    }

    fn write_attributes(&mut self, path: Path<'_>, attributes: &[Attribute]) -> Result<()> {
        let group = self.open_group(path)?;
        for attribute in attributes {
            let value: VarLenUnicode = attribute.value.parse().map_err(|_| Error::internal("invalid attribute string".into()))?;
            group
                .new_attr::<VarLenUnicode>()
                .create(attribute.name.as_str())
                .and_then(|attr| attr.write_scalar(&value))
                .map_err(to_io_error)?;
        }
        Ok(())
    }

    fn create_dataset(&mut self, path: Path<'_>, size: Vec3, chunk_shape: Vec3, compression: Compression) -> Result<()> {
        let (parent_path, name) = path.split_at(path.len() - 1);
        let group = self.open_group(parent_path)?;

        let shape = (size.z as usize, size.y as usize, size.x as usize);
        let chunk = (chunk_shape.z as usize, chunk_shape.y as usize, chunk_shape.x as usize);

        let builder = group.new_dataset::<u8>().shape(shape).chunk(chunk);
        let builder = match compression {
            Compression::None => builder,
            Compression::Gzip(level) | Compression::ShuffleGzip(level) => builder.deflate(level),
            Compression::Lz4 | Compression::ShuffleLz4 => builder.filter(LZ4_FILTER_ID, &[]),
        };
        let builder = match compression {
            Compression::ShuffleGzip(_) | Compression::ShuffleLz4 => builder.shuffle(),
            _ => builder,
        };

        builder.create(super::encode_name(name[0]).as_str()).map_err(to_io_error)?;
        Ok(())
    }

    fn write_chunk(&mut self, path: Path<'_>, origin: Vec3, compressed: &[u8]) -> Result<()> {
        let (parent_path, name) = path.split_at(path.len() - 1);
        let group = self.open_group(parent_path)?;
        let dataset = group.dataset(&super::encode_name(name[0])).map_err(to_io_error)?;
        dataset
            .write_raw_chunk((origin.z as usize, origin.y as usize, origin.x as usize), compressed)
            .map_err(to_io_error)
    }

    fn write_histogram(&mut self, path: Path<'_>, bins: &[u64]) -> Result<()> {
        let (parent_path, name) = path.split_at(path.len() - 1);
        let group = self.open_group(parent_path)?;
        group
            .new_dataset::<u64>()
            .shape(bins.len())
            .create(super::encode_name(name[0]).as_str())
            .and_then(|dataset| dataset.write(bins))
            .map_err(to_io_error)
    }

    fn write_thumbnail(&mut self, size_x: u32, size_y: u32, rgba: &[u8]) -> Result<()> {
        let group = self.open_group(&["Thumbnail"])?;
        group
            .new_dataset::<u8>()
            .shape((size_y as usize, size_x as usize * 4))
            .create("Data")
            .and_then(|dataset| dataset.write(rgba))
            .map_err(to_io_error)
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush().map_err(to_io_error)
    }
}
