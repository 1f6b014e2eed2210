//! Length-normalization bytes
//!
//! Each `(doc, field)` of an indexed field carries one byte:
//! `encode_norm(boost · lengthNorm(numTokens))`, with
//! `lengthNorm = 1/√numTokens`. The byte is an 8-bit float (3-bit
//! mantissa, excess-15 exponent); decoding goes through a 256-entry
//! table built once. Docs missing the field keep byte 0, which decodes
//! to 0.0 and scores nothing.

use once_cell::sync::Lazy;

/// Decode table: all 256 byte values expanded to f32.
static NORM_TABLE: Lazy<[f32; 256]> = Lazy::new(|| {
    let mut table = [0.0f32; 256];
    for (b, slot) in table.iter_mut().enumerate().skip(1) {
        let bits = ((b as u32) << 21).wrapping_add(((63 - 15) as u32) << 24);
        *slot = f32::from_bits(bits);
    }
    table
});

/// Compress a norm value to one byte.
///
/// Values too small for the format round up to the smallest positive
/// encoding (never to zero), so a tiny boost still distinguishes a doc
/// from one missing the field entirely.
pub fn encode_norm(f: f32) -> u8 {
    let bits = f.to_bits() as i32;
    let small = bits >> 21;
    if small <= (63 - 15) << 3 {
        return if bits <= 0 { 0 } else { 1 };
    }
    if small >= ((63 - 15) << 3) + 0x100 {
        return 0xFF;
    }
    (small - ((63 - 15) << 3)) as u8
}

/// Expand a norm byte back to f32 via the lookup table.
pub fn decode_norm(b: u8) -> f32 {
    NORM_TABLE[b as usize]
}

/// Default length normalization: `1/√numTokens`.
pub fn length_norm(num_tokens: u32) -> f32 {
    if num_tokens == 0 {
        0.0
    } else {
        1.0 / (num_tokens as f32).sqrt()
    }
}
