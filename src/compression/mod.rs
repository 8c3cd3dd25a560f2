//! Compression codecs (C2): deflate, LZ4, and an optional byte-shuffle
//! pre-filter, matching the wire-compatible encoding of the original format.

mod deflate;
mod lz4;
mod shuffle;

use crate::error::{Error, Result};

/// The compression chosen for a dataset, wire-compatible with the persisted
/// numeric encoding (`to_wire_value`/`from_wire_value`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Compression {
    None,
    Gzip(u8),
    ShuffleGzip(u8),
    Lz4,
    ShuffleLz4,
}

impl Compression {
    pub fn to_wire_value(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip(level) => u32::from(level),
            Compression::ShuffleGzip(level) => 10 + u32::from(level),
            Compression::Lz4 => 21,
            Compression::ShuffleLz4 => 31,
        }
    }

    pub fn from_wire_value(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1..=9 => Ok(Compression::Gzip(value as u8)),
            11..=19 => Ok(Compression::ShuffleGzip((value - 10) as u8)),
            21 => Ok(Compression::Lz4),
            31 => Ok(Compression::ShuffleLz4),
            other => Err(Error::config(format!("unsupported compression value {other}"))),
        }
    }

    /// Byte width of the element this compression's shuffle pre-filter
    /// operates on; `0` means "no shuffle, pass through unchanged".
    fn shuffle_element_size(self, voxel_size: usize) -> usize {
        match self {
            Compression::ShuffleGzip(_) | Compression::ShuffleLz4 if voxel_size == 2 || voxel_size == 4 => voxel_size,
            _ => 0,
        }
    }
}

/// A single compression algorithm, independent of the shuffle pre-filter.
pub trait Codec: Send + Sync {
    fn max_compressed_size(&self, input_len: usize) -> usize;
    fn compress(&self, source: &[u8], destination: &mut Vec<u8>) -> Result<()>;
}

/// Compresses `source` (raw little-endian voxel bytes, `voxel_size` bytes
/// per element) into `destination` according to `compression`, applying the
/// shuffle pre-filter first when applicable.
pub fn compress(compression: Compression, voxel_size: usize, source: &[u8], destination: &mut Vec<u8>) -> Result<()> {
    let shuffled;
    let payload = match compression.shuffle_element_size(voxel_size) {
        0 => source,
        width => {
            shuffled = shuffle::shuffle(source, width);
            &shuffled
        }
    };

    match compression {
        Compression::None => {
            destination.clear();
            destination.extend_from_slice(payload);
            Ok(())
        }
        Compression::Gzip(level) | Compression::ShuffleGzip(level) => deflate::Deflate::new(level).compress(payload, destination),
        Compression::Lz4 | Compression::ShuffleLz4 => lz4::Lz4.compress(payload, destination),
    }
}

/// Upper bound on the compressed size for `source_len` raw bytes, used to
/// size the writer pipeline's destination allocation up front.
pub fn max_compressed_size(compression: Compression, voxel_size: usize, source_len: usize) -> usize {
    let shuffle_scratch = if compression.shuffle_element_size(voxel_size) > 0 { source_len } else { 0 };

    let codec_bound = match compression {
        Compression::None => source_len,
        Compression::Gzip(level) | Compression::ShuffleGzip(level) => deflate::Deflate::new(level).max_compressed_size(source_len),
        Compression::Lz4 | Compression::ShuffleLz4 => lz4::Lz4.max_compressed_size(source_len),
    };

    codec_bound + shuffle_scratch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_value_round_trip() {
        for level in 1..=9u8 {
            let gzip = Compression::Gzip(level);
            assert_eq!(Compression::from_wire_value(gzip.to_wire_value()).unwrap(), gzip);

            let shuffle_gzip = Compression::ShuffleGzip(level);
            assert_eq!(Compression::from_wire_value(shuffle_gzip.to_wire_value()).unwrap(), shuffle_gzip);
        }

        assert_eq!(Compression::from_wire_value(0).unwrap(), Compression::None);
        assert_eq!(Compression::from_wire_value(21).unwrap(), Compression::Lz4);
        assert_eq!(Compression::from_wire_value(31).unwrap(), Compression::ShuffleLz4);
        assert!(Compression::from_wire_value(99).is_err());
    }

    #[test]
    fn none_compression_is_a_copy() {
        let mut out = Vec::new();
        compress(Compression::None, 2, &[1, 2, 3, 4], &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
