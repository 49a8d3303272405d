/// Mask/unmask a frame payload in place.
///
/// XOR masking is an involution, so the same call both masks and unmasks.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes(chunk.try_into().unwrap()) ^ mask_u32;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_mask_naive(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }
    }

    #[test]
    fn matches_naive_masking_at_every_length() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let data = [
            0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00, 0x17, 0x74, 0xf9,
            0x12, 0x03,
        ];

        for len in 0..=data.len() {
            let mut fast = data[..len].to_vec();
            let mut naive = data[..len].to_vec();
            apply_mask(&mut fast, mask);
            apply_mask_naive(&mut naive, mask);
            assert_eq!(fast, naive, "length {len}");
        }
    }

    #[test]
    fn masking_twice_restores_the_payload() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let original = b"Hello, World! This message has a length that is not a multiple of 4.";

        let mut data = original.to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data[..], &original[..]);
        apply_mask(&mut data, mask);
        assert_eq!(&data[..], &original[..]);
    }
}
