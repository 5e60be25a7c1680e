//! Byte layout of cached vectors: magic `RF01`, little-endian `u32` dimension, little-endian `f32` values.

const MAGIC: &[u8; 4] = b"RF01";

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + vector.len() * 4);
    out.extend_from_slice(MAGIC);
    let dim = u32::try_from(vector.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&dim.to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// `None` for foreign or truncated payloads, which callers treat as a miss.
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < 8 || &bytes[0..4] != MAGIC {
        return None;
    }
    let dim = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    if dim == 0 || bytes.len() != 8usize.saturating_add(dim.saturating_mul(4)) {
        return None;
    }
    bytes[8..]
        .chunks_exact(4)
        .map(|b| b.try_into().ok().map(f32::from_le_bytes))
        .collect()
}
