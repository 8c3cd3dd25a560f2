//! Deflate compression at levels 1-9, via `miniz_oxide` (kept from the
//! teacher, which uses it for its own pxr24 codec).

use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec;

use super::Codec;
use crate::error::{Error, Result};

pub struct Deflate {
    level: u8,
}

impl Deflate {
    pub fn new(level: u8) -> Self {
        debug_assert!((1..=9).contains(&level));
        Self { level }
    }
}

impl Codec for Deflate {
    fn max_compressed_size(&self, input_len: usize) -> usize {
        // deflate's worst case is the input plus a small fixed overhead per
        // 32KiB block; this bound is intentionally generous.
        input_len + (input_len / 1000) + 128
    }

    fn compress(&self, source: &[u8], destination: &mut Vec<u8>) -> Result<()> {
        destination.clear();
        destination.extend_from_slice(&compress_to_vec(source, self.level));
        Ok(())
    }
}

/// Used only by round-trip tests; the writer never reads compressed data back.
#[cfg(test)]
pub fn decompress(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    decompress_to_vec(compressed).map_err(|error| Error::codec(format!("{error:?}"))).map(|data| {
        debug_assert_eq!(data.len(), expected_len);
        data
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let source: Vec<u8> = (0..4096u32).map(|value| value as u8).collect();
        let mut compressed = Vec::new();
        Deflate::new(6).compress(&source, &mut compressed).unwrap();
        let restored = decompress(&compressed, source.len()).unwrap();
        assert_eq!(restored, source);
    }
}
