//! Frame codec for [`tokio_util::codec::Framed`] transports.
//!
//! Decoding is staged: the two fixed header bytes first, then the extended
//! length and masking key, then the payload. Partial input leaves the stage
//! parked in the decoder so the next read resumes where the previous one
//! stopped. Protocol violations (reserved bits, fragmented control frames,
//! oversized pings, payloads above the configured read limit) surface as
//! [`WebSocketError`]s before any payload is buffered.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, MAX_HEAD_SIZE},
    OpCode, WebSocketError,
};

/// Decoding progress for the frame currently being read.
enum ReadState {
    /// Fixed header parsed; waiting for the extended length and mask bytes.
    Header(Header),
    /// Full header parsed; waiting for the payload.
    Payload(PendingPayload),
}

/// Fields recovered from the two fixed header bytes.
struct Header {
    fin: bool,
    rsv1: bool,
    masked: bool,
    opcode: OpCode,
    /// Bytes of extended payload length still to read (0, 2 or 8).
    extra: usize,
    /// The 7-bit length code from the second header byte.
    length_code: u8,
    /// Remaining header bytes: `extra` plus 4 for the mask if present.
    header_size: usize,
}

/// Header plus mask, parked while the payload arrives.
struct PendingPayload {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Decoder half of the codec; enforces the read payload limit.
pub struct Decoder {
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a decoder rejecting payloads larger than `max_payload_size`.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0b1000_0000 != 0;
                    let rsv1 = src[0] & 0b0100_0000 != 0;

                    // RSV2/RSV3 have no negotiable meaning here
                    if src[0] & 0b0011_0000 != 0 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }

                    let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        rsv1,
                        masked,
                        opcode,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        8 => match usize::try_from(src.get_u64()) {
                            Ok(length) => length,
                            Err(_) => return Err(WebSocketError::FrameTooLarge),
                        },
                        _ => unreachable!(),
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if header.opcode.is_control() && !header.fin {
                        return Err(WebSocketError::ControlFrameFragmented);
                    }
                    if header.opcode == OpCode::Ping && payload_len > 125 {
                        return Err(WebSocketError::PingFrameTooLarge);
                    }
                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(PendingPayload {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(pending)) => {
                    if src.remaining() < pending.payload_len {
                        self.state = Some(ReadState::Payload(pending));
                        return Ok(None);
                    }

                    let payload = src.split_to(pending.payload_len);
                    let mut frame =
                        Frame::new(pending.header.fin, pending.header.opcode, pending.mask, payload);
                    frame.is_compressed = pending.header.rsv1;

                    break Ok(Some(frame));
                }
            }
        }
    }
}

/// Encoder half of the codec: header bytes followed by the payload, as-is.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}

/// Combined codec driving both directions of a framed transport.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec whose decoder rejects payloads larger than
    /// `max_payload_size`.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload_size),
            encoder: Encoder,
        }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    fn decode_all(codec: &mut Codec, bytes: &[u8]) -> crate::Result<Option<Frame>> {
        let mut src = BytesMut::from(bytes);
        codec.decode(&mut src)
    }

    #[test]
    fn decodes_a_masked_text_frame() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut payload = b"Hello".to_vec();
        crate::mask::apply_mask(&mut payload, mask);

        let mut bytes = vec![0x81, 0x85];
        bytes.extend_from_slice(&mask);
        bytes.extend_from_slice(&payload);

        let mut codec = Codec::new(1024);
        let mut frame = decode_all(&mut codec, &bytes).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.is_masked());

        frame.unmask();
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn resumes_across_partial_reads() {
        let mut codec = Codec::new(1024);
        let mut src = BytesMut::new();

        // header only
        src.extend_from_slice(&[0x82, 0x03]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        // partial payload
        src.extend_from_slice(&[0x01, 0x02]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&[0x03]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(&frame.payload[..], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn decodes_extended_16bit_length() {
        let payload = vec![0xAB; 300];
        let mut bytes = vec![0x82, 126];
        bytes.extend_from_slice(&300u16.to_be_bytes());
        bytes.extend_from_slice(&payload);

        let mut codec = Codec::new(1024);
        let frame = decode_all(&mut codec, &bytes).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut codec = Codec::new(1024);
        let err = decode_all(&mut codec, &[0x91, 0x00]).unwrap_err();
        assert!(matches!(err, WebSocketError::ReservedBitsNotZero));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut codec = Codec::new(1024);
        let err = decode_all(&mut codec, &[0x83, 0x00]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidOpCode(0x3)));
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        // Ping without FIN
        let mut codec = Codec::new(1024);
        let err = decode_all(&mut codec, &[0x09, 0x00]).unwrap_err();
        assert!(matches!(err, WebSocketError::ControlFrameFragmented));
    }

    #[test]
    fn rejects_oversized_ping() {
        let mut bytes = vec![0x89, 126];
        bytes.extend_from_slice(&200u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 200]);

        let mut codec = Codec::new(1024);
        let err = decode_all(&mut codec, &bytes).unwrap_err();
        assert!(matches!(err, WebSocketError::PingFrameTooLarge));
    }

    #[test]
    fn enforces_the_read_payload_limit() {
        let mut bytes = vec![0x82, 126];
        bytes.extend_from_slice(&600u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 600]);

        let mut codec = Codec::new(512);
        let err = decode_all(&mut codec, &bytes).unwrap_err();
        assert!(matches!(err, WebSocketError::FrameTooLarge));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = Codec::new(1024);

        let mut wire = BytesMut::new();
        codec
            .encode(Frame::new(true, OpCode::Text, None, &b"round trip"[..]), &mut wire)
            .unwrap();

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"round trip");
        assert!(wire.is_empty());
    }
}
