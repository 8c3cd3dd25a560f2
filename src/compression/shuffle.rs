//! Byte-plane shuffle pre-filter: de-interleaves each element's bytes into
//! separate planes so the following entropy coder sees long runs of
//! similar bytes. Mirrors the original's 2-byte and 4-byte specializations.

pub fn shuffle(source: &[u8], element_size: usize) -> Vec<u8> {
    debug_assert!(element_size == 2 || element_size == 4);
    debug_assert_eq!(source.len() % element_size, 0);

    let count = source.len() / element_size;
    let mut destination = vec![0u8; source.len()];

    for plane in 0..element_size {
        for index in 0..count {
            destination[plane * count + index] = source[index * element_size + plane];
        }
    }

    destination
}

pub fn unshuffle(source: &[u8], element_size: usize) -> Vec<u8> {
    debug_assert!(element_size == 2 || element_size == 4);
    debug_assert_eq!(source.len() % element_size, 0);

    let count = source.len() / element_size;
    let mut destination = vec![0u8; source.len()];

    for plane in 0..element_size {
        for index in 0..count {
            destination[index * element_size + plane] = source[plane * count + index];
        }
    }

    destination
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_is_invertible_for_2_byte_elements() {
        let source: Vec<u8> = (0..64u8).collect();
        let shuffled = shuffle(&source, 2);
        assert_eq!(unshuffle(&shuffled, 2), source);
    }

    #[test]
    fn shuffle_is_invertible_for_4_byte_elements() {
        let source: Vec<u8> = (0..64u8).collect();
        let shuffled = shuffle(&source, 4);
        assert_eq!(unshuffle(&shuffled, 4), source);
    }
}
