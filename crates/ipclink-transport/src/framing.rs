use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Frame header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "IL" (0x49 0x4C).
pub const MAGIC: [u8; 2] = [0x49, 0x4C];

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Encode one whole message into the wire format.
///
/// Wire format: magic (2B) + length (4B LE) + payload. The byte stream is
/// opaque to everything above this layer; message boundaries are the only
/// thing it restores.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(TransportError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one whole message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_message {
        return Err(TransportError::MessageTooLarge {
            size: payload_len,
            max: max_message,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_message(b"hello, ipclink!", &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 15);

        let message = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        assert_eq!(message.as_ref(), b"hello, ipclink!");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_needs_more_data() {
        let mut buf = BytesMut::from(&MAGIC[..]);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().is_none());
    }

    #[test]
    fn incomplete_payload_needs_more_data() {
        let mut buf = BytesMut::new();
        encode_message(b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().is_none());
    }

    #[test]
    fn invalid_magic_is_rejected() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0, 0, 0, 0][..]);
        let err = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap_err();
        assert!(matches!(err, TransportError::InvalidMagic));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32);

        let err = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
    }

    #[test]
    fn multiple_messages_decode_in_order() {
        let mut buf = BytesMut::new();
        encode_message(b"first", &mut buf).unwrap();
        encode_message(b"second", &mut buf).unwrap();

        let m1 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        let m2 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();

        assert_eq!(m1.as_ref(), b"first");
        assert_eq!(m2.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_message_roundtrips() {
        let mut buf = BytesMut::new();
        encode_message(b"", &mut buf).unwrap();

        let message = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        assert!(message.is_empty());
    }
}
