// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! StreamVByte: one 2-bit length code per value (1..=4 bytes), packed 4 to
//! a control byte, followed by the tightly-packed data bytes. 32-bit only
//! (spec §4.2: "`libstreamvbyte` selects a delta-aware StreamVByte path for
//! 32-bit streams" — delta is applied by the caller before encoding).

use crate::error::{Error, Result};

fn len_code(v: u32) -> u8 {
    if v < (1 << 8) {
        0
    } else if v < (1 << 16) {
        1
    } else if v < (1 << 24) {
        2
    } else {
        3
    }
}

/// Encodes a slice of `u32` values.
#[must_use]
pub fn encode(values: &[u32]) -> Vec<u8> {
    let control_len = values.len().div_ceil(4);
    let mut control = vec![0u8; control_len];
    let mut data = Vec::with_capacity(values.len() * 2);

    for (i, &v) in values.iter().enumerate() {
        let code = len_code(v);
        control[i / 4] |= code << ((i % 4) * 2);
        data.extend_from_slice(&v.to_le_bytes()[..usize::from(code) + 1]);
    }

    let mut out = Vec::with_capacity(4 + control.len() + data.len());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    out.extend_from_slice(&control);
    out.extend_from_slice(&data);
    out
}

/// Decodes a StreamVByte-encoded buffer back into `u32` values.
pub fn decode(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() < 4 {
        return Err(Error::ResidualCodecInput);
    }
    #[allow(clippy::expect_used)]
    let count = u32::from_le_bytes(bytes[0..4].try_into().expect("checked length")) as usize;
    let control_len = count.div_ceil(4);

    let control = bytes
        .get(4..4 + control_len)
        .ok_or(Error::ResidualCodecInput)?;
    let mut data = bytes.get(4 + control_len..).ok_or(Error::ResidualCodecInput)?;

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let code = (control[i / 4] >> ((i % 4) * 2)) & 0b11;
        let n = usize::from(code) + 1;
        let chunk = data.get(..n).ok_or(Error::ResidualCodecInput)?;
        let mut buf = [0u8; 4];
        buf[..n].copy_from_slice(chunk);
        out.push(u32::from_le_bytes(buf));
        data = &data[n..];
    }

    if !data.is_empty() {
        return Err(Error::ResidualCodecInput);
    }

    Ok(out)
}
