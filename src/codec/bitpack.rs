// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width bit packing, the primitive underneath `TABLE` ordinals and
//! the PFOR-family codecs.
//!
//! The reference engine relies on SSE/SIMD intrinsics to pack 128 lanes at
//! a time. This is a portable scalar implementation of the same bit layout
//! (values packed LSB-first into a little-endian byte stream); a SIMD
//! backend could replace the inner loop without changing the format.

/// Bits needed to represent `max` (0 needs 0 bits: every value is 0).
#[must_use]
pub fn bits_for_max(max: u64) -> u32 {
    64 - max.leading_zeros()
}

/// Packs `values` using `bit_width` bits per lane, zero-padding the final
/// byte. `values` longer than one 128-lane group are packed in successive
/// 128-lane groups, the last zero-padded to 128 lanes (spec §4.1).
#[must_use]
pub fn bitpack128(values: &[u32], bit_width: u32) -> Vec<u8> {
    if bit_width == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for group in values.chunks(128) {
        pack_group(group, 128, bit_width, &mut out);
    }
    out
}

fn pack_group(group: &[u32], lanes: usize, bit_width: u32, out: &mut Vec<u8>) {
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for i in 0..lanes {
        let v = u64::from(group.get(i).copied().unwrap_or(0));
        acc |= v << acc_bits;
        acc_bits += bit_width;

        while acc_bits >= 8 {
            #[allow(clippy::cast_possible_truncation)]
            out.push(acc as u8);
            acc >>= 8;
            acc_bits -= 8;
        }
    }

    if acc_bits > 0 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(acc as u8);
    }
}

/// Inverse of [`bitpack128`]. `count` is the true number of values (may be
/// less than a multiple of 128; trailing padding lanes are dropped).
#[must_use]
pub fn bitunpack128(bytes: &[u8], bit_width: u32, count: usize) -> Vec<u32> {
    if bit_width == 0 {
        return vec![0; count];
    }

    let mut out = Vec::with_capacity(count);
    let group_byte_len = (128 * bit_width as usize).div_ceil(8);

    for group_bytes in bytes.chunks(group_byte_len) {
        let remaining = count - out.len();
        let lanes = remaining.min(128);
        unpack_group(group_bytes, lanes, bit_width, &mut out);
        if out.len() >= count {
            break;
        }
    }

    out.truncate(count);
    out
}

fn unpack_group(bytes: &[u8], lanes: usize, bit_width: u32, out: &mut Vec<u32>) {
    let mask: u64 = if bit_width >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    };

    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;
    let mut byte_pos = 0;

    for _ in 0..lanes {
        while acc_bits < bit_width && byte_pos < bytes.len() {
            acc |= u64::from(bytes[byte_pos]) << acc_bits;
            acc_bits += 8;
            byte_pos += 1;
        }

        #[allow(clippy::cast_possible_truncation)]
        out.push((acc & mask) as u32);
        acc >>= bit_width;
        acc_bits = acc_bits.saturating_sub(bit_width);
    }
}
