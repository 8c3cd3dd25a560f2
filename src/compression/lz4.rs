//! LZ4 compression with the 16-byte header format of the original writer:
//! an 8-byte original size, a 4-byte original size (again), and a 4-byte
//! compressed size, all big-endian, ahead of the raw LZ4 block.

use lz4_flex::block::compress_into;

use super::Codec;
use crate::error::Result;

const HEADER_LEN: usize = 16;

pub struct Lz4;

impl Codec for Lz4 {
    fn max_compressed_size(&self, input_len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(input_len) + HEADER_LEN
    }

    fn compress(&self, source: &[u8], destination: &mut Vec<u8>) -> Result<()> {
        destination.clear();
        destination.resize(self.max_compressed_size(source.len()), 0);

        let compressed_len = compress_into(source, &mut destination[HEADER_LEN..])
            .map_err(|error| crate::error::Error::codec(error.to_string()))?;

        write_be(&mut destination[0..8], source.len() as u64);
        write_be(&mut destination[8..12], source.len() as u64);
        write_be(&mut destination[12..16], compressed_len as u64);

        destination.truncate(HEADER_LEN + compressed_len);
        Ok(())
    }
}

fn write_be(dest: &mut [u8], value: u64) {
    let n = dest.len();
    for (index, byte) in dest.iter_mut().enumerate() {
        let shift = 8 * (n - 1 - index);
        *byte = ((value >> shift) & 0xff) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_original_layout() {
        let source = vec![7u8; 300];
        let mut out = Vec::new();
        Lz4.compress(&source, &mut out).unwrap();

        let original_size_a = u64::from_be_bytes(out[0..8].try_into().unwrap());
        let original_size_b = u32::from_be_bytes(out[8..12].try_into().unwrap());
        let compressed_size = u32::from_be_bytes(out[12..16].try_into().unwrap());

        assert_eq!(original_size_a, 300);
        assert_eq!(original_size_b, 300);
        assert_eq!(compressed_size as usize, out.len() - HEADER_LEN);
    }
}
