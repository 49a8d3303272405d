//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! Two representations are provided:
//!
//! - [`Frame`]: the mutable wire-level frame carrying the FIN flag, the RSV1
//!   compression bit, an optional masking key and the raw payload. This is
//!   what the codec reads and writes.
//! - [`FrameView`]: an immutable `(opcode, payload)` view handed to and taken
//!   from the application once masking, fragmentation and compression have
//!   been dealt with.
//!
//! Frames with the reserved opcodes 0x3-0x7 and 0xB-0xF are rejected during
//! decoding per RFC 6455.

use bytes::{Bytes, BytesMut};

use crate::WebSocketError;

/// Frame type identifier, 4 bits on the wire.
///
/// Data frames (`Continuation`, `Text`, `Binary`) carry application payload;
/// control frames (`Close`, `Ping`, `Pong`) manage the connection and must
/// not be fragmented.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// An immutable view of a complete frame: opcode plus unmasked,
/// decompressed payload.
#[derive(Debug, Clone)]
pub struct FrameView {
    /// The frame type.
    pub opcode: OpCode,
    /// The payload, already unmasked if it arrived masked.
    pub payload: Bytes,
}

impl FrameView {
    /// Creates a text frame view with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary frame view with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a ping frame view. The payload must not exceed 125 bytes on
    /// the wire.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a pong frame view in response to a ping.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Creates a close frame view with a raw payload.
    ///
    /// The payload structure (status code plus reason) is not validated;
    /// close-frame semantics are left to the caller.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Borrows the payload as UTF-8 text.
    ///
    /// # Panics
    /// Panics if the payload is not valid UTF-8; intended for frames known to
    /// carry text.
    #[inline]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.payload).expect("utf8")
    }
}

impl From<(OpCode, Bytes)> for FrameView {
    fn from((opcode, payload): (OpCode, Bytes)) -> Self {
        Self { opcode, payload }
    }
}

impl From<(OpCode, BytesMut)> for FrameView {
    fn from((opcode, payload): (OpCode, BytesMut)) -> Self {
        Self {
            opcode,
            payload: payload.freeze(),
        }
    }
}

impl From<Frame> for FrameView {
    fn from(value: Frame) -> Self {
        Self::from((value.opcode, value.payload))
    }
}

/// Largest possible frame header: 2 fixed bytes, 8 extended-length bytes and
/// a 4-byte masking key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A wire-level WebSocket frame.
///
/// Produced by the decoder with the masking key still attached; the
/// connection read path unmasks it before the payload is interpreted.
/// Server-to-client frames are written without a mask.
#[derive(Debug)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// The frame type.
    pub opcode: OpCode,
    /// RSV1: payload compressed with permessage-deflate.
    pub(crate) is_compressed: bool,
    /// Masking key, present on client-to-server frames.
    mask: Option<[u8; 4]>,
    /// Raw payload bytes, masked if `mask` is set.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a frame with the given header fields and payload.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
            is_compressed: false,
        }
    }

    /// Creates a frame whose payload has already been deflate-compressed;
    /// RSV1 will be set on the wire.
    pub(crate) fn compressed(fin: bool, opcode: OpCode, payload: impl Into<BytesMut>) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload: payload.into(),
            is_compressed: true,
        }
    }

    /// Whether a masking key is attached.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Removes the masking key and restores the payload, if the frame was
    /// masked. No-op otherwise.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// Formats the frame header into `head` and returns the number of bytes
    /// written.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        let rsv1 = u8::from(self.is_compressed);
        head[0] = (self.fin as u8) << 7 | rsv1 << 6 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

impl From<FrameView> for Frame {
    fn from(value: FrameView) -> Self {
        Frame::new(true, value.opcode, None, value.payload.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_opcodes() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());

        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn opcode_byte_conversions() {
        for code in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::try_from(u8::from(code)).unwrap(), code);
        }
    }

    #[test]
    fn reserved_opcodes_are_rejected() {
        for byte in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::try_from(byte),
                Err(WebSocketError::InvalidOpCode(b)) if b == byte
            ));
        }
    }

    #[test]
    fn unmask_restores_payload_and_drops_key() {
        let payload = BytesMut::from(&b"Mask me"[..]);
        let mut masked = payload.clone();
        crate::mask::apply_mask(&mut masked, [0x01, 0x02, 0x03, 0x04]);

        let mut frame = Frame::new(true, OpCode::Binary, Some([0x01, 0x02, 0x03, 0x04]), masked);
        assert!(frame.is_masked());

        frame.unmask();
        assert_eq!(frame.payload, payload);
        assert!(!frame.is_masked());

        // a second unmask must not re-apply the key
        frame.unmask();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn short_header_layout() {
        let frame = Frame::new(true, OpCode::Text, None, &b"Header test"[..]);

        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        assert_eq!(size, 2);
        assert_eq!(head[0], 0x81); // FIN=1, RSV=0, opcode=Text
        assert_eq!(head[1], 11);
    }

    #[test]
    fn masked_header_carries_the_key() {
        let key = [0xAA, 0xBB, 0xCC, 0xDD];
        let frame = Frame::new(true, OpCode::Text, Some(key), &b"Header test"[..]);

        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        assert_eq!(size, 6);
        assert_eq!(head[1], 0x80 | 11);
        assert_eq!(&head[2..6], &key);
    }

    #[test]
    fn extended_header_lengths() {
        let mut head = [0u8; MAX_HEAD_SIZE];

        let frame = Frame::new(true, OpCode::Binary, None, vec![0u8; 300].as_slice());
        assert_eq!(frame.fmt_head(&mut head), 4);
        assert_eq!(head[1], 126);
        assert_eq!(u16::from_be_bytes([head[2], head[3]]), 300);

        let frame = Frame::new(true, OpCode::Binary, None, vec![0u8; 70_000].as_slice());
        assert_eq!(frame.fmt_head(&mut head), 10);
        assert_eq!(head[1], 127);
        assert_eq!(u64::from_be_bytes(head[2..10].try_into().unwrap()), 70_000);
    }

    #[test]
    fn compressed_frame_sets_rsv1() {
        let frame = Frame::compressed(true, OpCode::Text, &b"deflated"[..]);

        let mut head = [0u8; MAX_HEAD_SIZE];
        frame.fmt_head(&mut head);
        assert_eq!(head[0] & 0b0100_0000, 0b0100_0000);
    }

    #[test]
    fn view_constructors() {
        assert_eq!(FrameView::text("hi").opcode, OpCode::Text);
        assert_eq!(FrameView::binary(vec![1, 2, 3]).opcode, OpCode::Binary);
        assert_eq!(FrameView::ping("p").opcode, OpCode::Ping);
        assert_eq!(FrameView::pong("p").opcode, OpCode::Pong);
        assert_eq!(
            FrameView::close_raw(&[0x03, 0xE8][..]).opcode,
            OpCode::Close
        );

        let view = FrameView::text("Hello");
        assert_eq!(view.as_str(), "Hello");
    }
}
