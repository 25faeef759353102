//! RFC 6455 frame codec.
//!
//! Decoding is a pure function over a byte buffer: it never performs I/O and
//! never buffers on its own. A short buffer yields `Ok(None)` so the caller
//! can read more bytes and try again.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CloseCode, WsError, WsResult};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl Opcode {
    /// Parse an opcode nibble. Reserved values are a protocol error.
    pub fn from_u8(value: u8) -> WsResult<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(WsError::protocol(format!("reserved opcode 0x{other:X}"))),
        }
    }

    /// Get the wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, ping and pong are control frames.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bits, in order RSV1..RSV3. Always zero after a successful decode.
    pub rsv: [bool; 3],
    /// Frame opcode.
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Declared payload length.
    pub payload_length: u64,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            fin: true,
            rsv: [false; 3],
            opcode,
            masked: false,
            payload_length: payload.len() as u64,
            payload,
        }
    }

    /// Encode this frame server-side (unmasked).
    pub fn encode(&self) -> Bytes {
        encode_frame_with(self.fin, self.opcode, &self.payload, None)
    }
}

/// XOR `payload` with the 4-byte masking key. Masking is its own inverse.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame, or
/// the frame together with the number of bytes it occupied.
pub fn decode_frame(buf: &[u8], max_message_size: usize) -> WsResult<Option<(Frame, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & 0x80 != 0;
    let rsv = [b0 & 0x40 != 0, b0 & 0x20 != 0, b0 & 0x10 != 0];
    let opcode = Opcode::from_u8(b0 & 0x0F)?;
    let masked = b1 & 0x80 != 0;

    if rsv.iter().any(|bit| *bit) {
        return Err(WsError::protocol("reserved bits set without a negotiated extension"));
    }

    let mut offset = 2;
    let payload_length = match b1 & 0x7F {
        126 => {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let len = u64::from(u16::from_be_bytes([buf[2], buf[3]]));
            offset += 2;
            len
        }
        127 => {
            if buf.len() < offset + 8 {
                return Ok(None);
            }
            let mut raw = &buf[2..10];
            let len = raw.get_u64();
            offset += 8;
            if len & (1 << 63) != 0 {
                return Err(WsError::protocol("64-bit payload length has its high bit set"));
            }
            len
        }
        len => u64::from(len),
    };

    if opcode.is_control() {
        if !fin {
            return Err(WsError::protocol("fragmented control frame"));
        }
        if payload_length > MAX_CONTROL_PAYLOAD as u64 {
            return Err(WsError::protocol(format!(
                "control frame payload of {payload_length} bytes exceeds {MAX_CONTROL_PAYLOAD}"
            )));
        }
    }

    // Checked before waiting on the payload so an oversized frame is never buffered.
    if payload_length > max_message_size as u64 {
        return Err(WsError::message_too_large(payload_length, max_message_size));
    }

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    // Bounded by max_message_size above, so this fits in usize.
    let len = payload_length as usize;
    if buf.len() < offset + len {
        return Ok(None);
    }

    let mut payload = BytesMut::from(&buf[offset..offset + len]);
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    let frame = Frame {
        fin,
        rsv,
        opcode,
        masked,
        payload_length,
        payload: payload.freeze(),
    };
    Ok(Some((frame, offset + len)))
}

/// Drain every complete frame from the front of `buf`.
///
/// Consumed bytes are removed from the buffer; a trailing partial frame is
/// left in place.
pub fn decode_all(buf: &mut BytesMut, max_message_size: usize) -> WsResult<Vec<Frame>> {
    let mut frames = Vec::new();
    while let Some((frame, consumed)) = decode_frame(buf, max_message_size)? {
        buf.advance(consumed);
        frames.push(frame);
    }
    Ok(frames)
}

/// Encode a final, unmasked frame (server role).
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Bytes {
    encode_frame_with(true, opcode, payload, None)
}

/// Encode a final frame masked with `key` (client role).
pub fn encode_masked(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Bytes {
    encode_frame_with(true, opcode, payload, Some(key))
}

/// Encode a frame with explicit FIN and optional masking key.
pub fn encode_frame_with(fin: bool, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let len = payload.len();
    let mut buf = BytesMut::with_capacity(len + 14);

    buf.put_u8(if fin { 0x80 } else { 0x00 } | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        buf.put_u8(mask_bit | len as u8);
    } else if u16::try_from(len).is_ok() {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(payload),
    }

    buf.freeze()
}

/// Build a close frame payload: 2-byte big-endian code followed by the reason.
///
/// The reason is truncated on a character boundary so the payload fits in a
/// control frame.
pub fn encode_close_payload(code: u16, reason: &str) -> Bytes {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut buf = BytesMut::with_capacity(2 + end);
    buf.put_u16(code);
    buf.put_slice(&reason.as_bytes()[..end]);
    buf.freeze()
}

/// Parse a close frame payload into its code and reason.
///
/// An empty payload carries no status and yields `None`.
pub fn parse_close_payload(payload: &[u8]) -> WsResult<Option<(u16, String)>> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(WsError::protocol("close payload of one byte")),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !CloseCode::is_sendable(code) {
                return Err(WsError::protocol(format!("invalid close code {code}")));
            }
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| WsError::protocol("close reason is not valid UTF-8"))?;
            Ok(Some((code, reason.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAX: usize = 1024 * 1024;
    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn decode_one(bytes: &[u8]) -> (Frame, usize) {
        decode_frame(bytes, MAX).unwrap().expect("complete frame")
    }

    #[test]
    fn test_encode_small_text() {
        let encoded = encode_frame(Opcode::Text, b"Hello");
        assert_eq!(&encoded[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_decode_rfc_masked_hello() {
        // RFC 6455 §5.7 single-frame masked text message
        let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_length_tiers_round_trip() {
        for opcode in [Opcode::Continuation, Opcode::Text, Opcode::Binary] {
            for (len, header) in [(0usize, 2usize), (125, 2), (126, 4), (65535, 4), (65536, 10)] {
                let payload = vec![b'a'; len];
                let encoded = encode_frame(opcode, &payload);
                assert_eq!(encoded.len(), header + len, "{opcode:?} header size for {len}");

                let (frame, consumed) = decode_one(&encoded);
                assert_eq!(consumed, encoded.len());
                assert!(frame.fin);
                assert_eq!(frame.opcode, opcode);
                assert_eq!(frame.payload_length, len as u64);
                assert_eq!(&frame.payload[..], &payload[..]);
            }
        }
    }

    #[test]
    fn test_control_frames_round_trip() {
        let mut close_payload = vec![0x03, 0xE8];
        close_payload.resize(MAX_CONTROL_PAYLOAD, b'x');

        for opcode in [Opcode::Ping, Opcode::Pong, Opcode::Close] {
            let full = if opcode == Opcode::Close {
                close_payload.clone()
            } else {
                vec![0x5A; MAX_CONTROL_PAYLOAD]
            };
            for payload in [Vec::new(), full] {
                let encoded = encode_frame(opcode, &payload);
                assert_eq!(encoded.len(), 2 + payload.len());

                let (frame, consumed) = decode_one(&encoded);
                assert_eq!(consumed, encoded.len());
                assert!(frame.fin);
                assert_eq!(frame.opcode, opcode);
                assert_eq!(&frame.payload[..], &payload[..]);
            }
        }
    }

    #[test]
    fn test_incomplete_buffers() {
        assert!(decode_frame(&[], MAX).unwrap().is_none());
        assert!(decode_frame(&[0x81], MAX).unwrap().is_none());
        // 16-bit length missing its second byte
        assert!(decode_frame(&[0x82, 126, 0x01], MAX).unwrap().is_none());
        // payload not fully buffered
        let encoded = encode_frame(Opcode::Text, b"Hello");
        assert!(decode_frame(&encoded[..4], MAX).unwrap().is_none());
        // mask key cut short
        let masked = encode_masked(Opcode::Text, b"Hi", KEY);
        assert!(decode_frame(&masked[..4], MAX).unwrap().is_none());
    }

    #[test]
    fn test_oversized_rejected_before_payload() {
        // header only: claims 2048 bytes, none supplied
        let header = [0x82, 126, 0x08, 0x00];
        let err = decode_frame(&header, 1024).unwrap_err();
        assert!(matches!(err, WsError::MessageTooLarge { size: 2048, max: 1024 }));
        assert_eq!(err.close_code(), CloseCode::MessageTooBig);
    }

    #[test]
    fn test_64_bit_length_high_bit() {
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let err = decode_frame(&bytes, MAX).unwrap_err();
        assert_eq!(err.close_code(), CloseCode::Protocol);
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        let err = decode_frame(&[0x83, 0x00], MAX).unwrap_err();
        assert_eq!(err.close_code(), CloseCode::Protocol);
        let err = decode_frame(&[0x8B, 0x00], MAX).unwrap_err();
        assert_eq!(err.close_code(), CloseCode::Protocol);
    }

    #[test]
    fn test_rsv_bits_rejected() {
        let err = decode_frame(&[0xC1, 0x00], MAX).unwrap_err();
        assert!(matches!(err, WsError::ProtocolError(_)));
    }

    #[test]
    fn test_control_frame_rules() {
        // ping without FIN
        let err = decode_frame(&[0x09, 0x00], MAX).unwrap_err();
        assert!(matches!(err, WsError::ProtocolError(_)));

        // ping with 126-byte payload
        let encoded = encode_frame(Opcode::Ping, &[0u8; 126]);
        let err = decode_frame(&encoded, MAX).unwrap_err();
        assert!(matches!(err, WsError::ProtocolError(_)));
    }

    #[test]
    fn test_decode_all_leaves_partial_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_masked(Opcode::Text, b"one", KEY));
        buf.extend_from_slice(&encode_masked(Opcode::Text, b"two", KEY));
        let third = encode_masked(Opcode::Binary, b"three", KEY);
        buf.extend_from_slice(&third[..3]);

        let frames = decode_all(&mut buf, MAX).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].payload[..], b"one");
        assert_eq!(&frames[1].payload[..], b"two");
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_fragment_flags() {
        let first = encode_frame_with(false, Opcode::Text, b"Hel", None);
        let rest = encode_frame_with(true, Opcode::Continuation, b"lo", None);
        assert_eq!(first[0], 0x01);
        assert_eq!(rest[0], 0x80);
        let (frame, _) = decode_one(&first);
        assert!(!frame.fin);
    }

    #[test]
    fn test_close_payload() {
        let payload = encode_close_payload(1000, "bye");
        assert_eq!(&payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(
            parse_close_payload(&payload).unwrap(),
            Some((1000, "bye".to_string()))
        );
        assert_eq!(parse_close_payload(&[]).unwrap(), None);
        assert!(parse_close_payload(&[0x03]).is_err());
        assert!(parse_close_payload(&[0x03, 0xED]).is_err()); // 1005 is not sendable
        assert!(parse_close_payload(&[0x03, 0xE8, 0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let payload = encode_close_payload(1000, &reason);
        assert!(payload.len() <= MAX_CONTROL_PAYLOAD);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    proptest! {
        #[test]
        fn prop_masked_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..70_000), key in any::<[u8; 4]>()) {
            let encoded = encode_masked(Opcode::Binary, &payload, key);
            let (frame, consumed) = decode_frame(&encoded, MAX).unwrap().unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert!(frame.masked);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }

        #[test]
        fn prop_mask_is_involution(mut payload in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            let original = payload.clone();
            apply_mask(&mut payload, key);
            apply_mask(&mut payload, key);
            prop_assert_eq!(payload, original);
        }

        #[test]
        fn prop_truncated_frames_are_incomplete(payload in proptest::collection::vec(any::<u8>(), 1..300), cut in 0usize..300) {
            let encoded = encode_masked(Opcode::Text, &payload, KEY);
            let cut = cut % encoded.len();
            prop_assert!(decode_frame(&encoded[..cut], MAX).unwrap().is_none());
        }
    }
}
