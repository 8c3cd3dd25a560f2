#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::pedantic,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    trivial_numeric_casts,
    redundant_semicolon
)]

#![forbid(unsafe_code)]

// TODO #![warn(missing_docs)]

pub mod color;
pub mod compression;
pub mod container;
pub mod converter;
pub mod datetime;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod histogram;
pub mod image3d;
pub mod image5d;
pub mod math;
pub mod pool;
pub mod pyramid;
pub mod thumbnail;
pub mod writer;

/// Re-exports of the types most client code needs for a simple conversion.
pub mod prelude {
    pub use crate::compression::Compression;
    pub use crate::container::{ContainerBackend, NullBackend};
    pub use crate::converter::{ColorInfo, Converter, ConverterOptions, ImageExtent, Parameters, TimeInfo};
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{Axis, AxisOrder, BlockIndex, Vec2, Vec3, Voxel};

    #[cfg(feature = "hdf5")]
    pub use crate::container::Hdf5Backend;
}
