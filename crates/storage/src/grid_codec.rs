//! Raw little-endian `f32` grid payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use radar_common::{RadarError, RadarResult};

/// Encode a grid as consecutive little-endian `f32` values.
pub fn encode_grid(data: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() * 4);
    for v in data {
        buf.put_f32_le(*v);
    }
    buf.freeze()
}

/// Decode a payload written by [`encode_grid`], checking the value count.
pub fn decode_grid(mut payload: &[u8], expected_len: usize) -> RadarResult<Vec<f32>> {
    if payload.len() != expected_len * 4 {
        return Err(RadarError::cache(format!(
            "grid payload is {} bytes, expected {}",
            payload.len(),
            expected_len * 4
        )));
    }

    let mut data = Vec::with_capacity(expected_len);
    while payload.has_remaining() {
        data.push(payload.get_f32_le());
    }
    Ok(data)
}
