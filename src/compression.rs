//! Permessage-deflate negotiation and payload transforms (RFC 7692).
//!
//! Negotiation is all-or-nothing: the extension is enabled when the client's
//! `Sec-WebSocket-Extensions` offer contains the bare `permessage-deflate`
//! token, and the response echoes exactly that token. Extension parameters
//! are neither parsed nor negotiated; both sides run with the defaults, which
//! keep the deflate context across messages in each direction.
//!
//! The transforms wrap `flate2`'s raw streams. Per RFC 7692 §7.2.1/7.2.2 a
//! complete message ends with an implicit `00 00 FF FF` block: the compressor
//! strips it after a sync flush and the decompressor appends it before
//! draining.

use std::io;

use bytes::BytesMut;
use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};

/// The only extension token this engine negotiates.
pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Tail every complete deflate message implicitly ends with.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Decides whether compression is enabled for a connection.
///
/// Splits the client's offer on `;` and accepts if any token, with
/// surrounding ASCII whitespace trimmed, is exactly `permessage-deflate`.
pub(crate) fn negotiate(offer: Option<&str>) -> bool {
    offer.is_some_and(|value| {
        value
            .split(';')
            .any(|token| token.trim() == PERMESSAGE_DEFLATE)
    })
}

/// Compresses outgoing message payloads, keeping the deflate context across
/// messages.
pub(crate) struct Compressor {
    output: BytesMut,
    compress: Compress,
}

impl Compressor {
    pub(crate) fn new() -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            compress: Compress::new(flate2::Compression::default(), false),
        }
    }

    /// Compresses one complete message payload.
    pub(crate) fn compress(&mut self, mut input: &[u8]) -> io::Result<BytesMut> {
        while !input.is_empty() {
            let consumed = self.run(input, FlushCompress::None)?;
            input = &input[consumed..];
        }

        // sync-flush, then drain until the stream stops producing
        self.run(&[], FlushCompress::Sync)?;
        loop {
            let before_out = self.compress.total_out();
            self.run(&[], FlushCompress::None)?;
            if self.compress.total_out() == before_out {
                break;
            }
        }

        let output = &mut self.output;
        if output.ends_with(&DEFLATE_TAIL) {
            output.truncate(output.len() - DEFLATE_TAIL.len());
        }
        Ok(output.split())
    }

    /// Feeds `input` once, appending whatever the stream produces; returns the
    /// number of input bytes consumed.
    fn run(&mut self, input: &[u8], flush: FlushCompress) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];

        let before_in = self.compress.total_in();
        let before_out = self.compress.total_out();

        let status = self
            .compress
            .compress(input, &mut chunk, flush)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let produced = (self.compress.total_out() - before_out) as usize;
        self.output.extend_from_slice(&chunk[..produced]);

        match status {
            Status::Ok | Status::BufError => Ok((self.compress.total_in() - before_in) as usize),
            Status::StreamEnd => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unexpected deflate stream end",
            )),
        }
    }

}

/// Decompresses incoming message payloads, keeping the deflate context across
/// messages.
pub(crate) struct Decompressor {
    output: BytesMut,
    decompress: Decompress,
}

impl Decompressor {
    pub(crate) fn new() -> Self {
        Self {
            output: BytesMut::with_capacity(1024),
            decompress: Decompress::new(false),
        }
    }

    /// Decompresses one complete message payload (all fragments
    /// concatenated).
    pub(crate) fn decompress(&mut self, input: &[u8]) -> io::Result<BytesMut> {
        self.feed(input)?;
        self.feed(&DEFLATE_TAIL)?;

        // drain whatever the sync point released
        loop {
            let before_out = self.decompress.total_out();
            self.run(&[], FlushDecompress::Sync)?;
            if self.decompress.total_out() == before_out {
                break;
            }
        }
        Ok(self.output.split())
    }

    fn feed(&mut self, mut input: &[u8]) -> io::Result<()> {
        while !input.is_empty() {
            let consumed = self.run(input, FlushDecompress::None)?;
            input = &input[consumed..];
        }
        Ok(())
    }

    fn run(&mut self, input: &[u8], flush: FlushDecompress) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];

        let before_in = self.decompress.total_in();
        let before_out = self.decompress.total_out();

        self.decompress
            .decompress(input, &mut chunk, flush)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream"))?;

        let produced = (self.decompress.total_out() - before_out) as usize;
        self.output.extend_from_slice(&chunk[..produced]);

        Ok((self.decompress.total_in() - before_in) as usize)
    }
}
