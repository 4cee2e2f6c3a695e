//! Frame encoding and the size limits shared by both directions.
//!
//! A frame is a little-endian `u32` payload length followed by the payload.

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes
pub const LEN_PREFIX_SIZE: usize = 4;

/// Maximum payload size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum payload size limit (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encode one payload into a standalone frame.
pub fn encode(payload: &[u8], max_frame_size: usize) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    encode_into(payload, max_frame_size, &mut buf)?;
    Ok(buf.freeze())
}

/// Append one framed payload to an outbound buffer.
///
/// Nothing is written when the payload is over the limit.
pub fn encode_into(
    payload: &[u8],
    max_frame_size: usize,
    buf: &mut BytesMut,
) -> Result<(), WireError> {
    let max = max_frame_size.min(HARD_MAX_FRAME_SIZE);
    if payload.len() > max {
        return Err(WireError::Size {
            len: payload.len(),
            max,
        });
    }

    buf.reserve(LEN_PREFIX_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(())
}

/// Peek at the payload length announced at the front of `buf`.
///
/// Returns `None` until the whole prefix is present.
pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < LEN_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_little_endian() {
        let frame = encode(&[0xAA; 0x0102], DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(&frame[..4], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(frame.len(), 4 + 0x0102);
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(&[], DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        let err = encode_into(&[0u8; 17], 16, &mut buf).unwrap_err();
        assert_eq!(err, WireError::Size { len: 17, max: 16 });
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(b"ab", DEFAULT_MAX_FRAME_SIZE, &mut buf).unwrap();
        encode_into(b"c", DEFAULT_MAX_FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"\x02\x00\x00\x00ab\x01\x00\x00\x00c");
    }

    #[test]
    fn test_peek_frame_len() {
        assert_eq!(peek_frame_len(&[1, 0, 0]), None);
        assert_eq!(peek_frame_len(&[8, 0, 0, 0, 0xFF]), Some(8));
    }
}
