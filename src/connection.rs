//! The live connection produced by a successful upgrade.

use std::{
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use bytes::BytesMut;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use crate::{
    codec::Codec,
    compression::{Compressor, Decompressor},
    frame::{Frame, FrameView, OpCode},
    pool::BufferPool,
    server::EventHandler,
    session::SessionMap,
    Result, WebSocketError,
};

/// Reassembly state for a fragmented message in progress.
struct Fragment {
    opcode: OpCode,
    /// RSV1 of the first fragment applies to the whole message.
    compressed: bool,
    buffer: BytesMut,
}

/// An established WebSocket connection.
///
/// Owns the hijacked socket fused with its pooled read buffer and one codec
/// instance, the per-connection session store, and the deflate transforms
/// when permessage-deflate was negotiated. Nothing else touches the pooled
/// buffer until [`Connection::close`] returns it.
///
/// The connection implements [`Stream`] of incoming [`FrameView`]s and
/// [`Sink`] of outgoing ones. The read path unmasks client frames,
/// reassembles fragmented messages and inflates compressed ones; control
/// frames pass straight through to the caller. The write path enforces the
/// configured write payload limit and deflates data frames when compression
/// is on; server frames are never masked.
///
/// # Teardown
/// [`Connection::close`] flushes nothing extra, recycles the pooled read
/// buffer exactly once, notifies the event handler, and shuts the socket
/// down. It is idempotent; after the first call the connection answers every
/// operation with [`WebSocketError::ConnectionClosed`]. Dropping an unclosed
/// connection still recycles the buffer.
pub struct Connection<S> {
    /// Emptied on teardown so reuse is detectable instead of corrupting.
    framed: Option<Framed<S, Codec>>,
    session: Arc<SessionMap>,
    handler: Arc<dyn EventHandler>,
    pool: Arc<BufferPool>,
    compressor: Option<Compressor>,
    decompressor: Option<Decompressor>,
    fragment: Option<Fragment>,
    max_read_payload: usize,
    max_write_payload: usize,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.framed.is_none())
            .field("compression_enabled", &self.compressor.is_some())
            .field("max_read_payload", &self.max_read_payload)
            .field("max_write_payload", &self.max_write_payload)
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        framed: Framed<S, Codec>,
        session: Arc<SessionMap>,
        handler: Arc<dyn EventHandler>,
        pool: Arc<BufferPool>,
        compression: bool,
        max_read_payload: usize,
        max_write_payload: usize,
    ) -> Self {
        Self {
            framed: Some(framed),
            session,
            handler,
            pool,
            compressor: compression.then(Compressor::new),
            decompressor: compression.then(Decompressor::new),
            fragment: None,
            max_read_payload,
            max_write_payload,
        }
    }

    /// The per-connection session store populated during the upgrade.
    pub fn session(&self) -> &Arc<SessionMap> {
        &self.session
    }

    /// The event handler bound at [`Upgrader`](crate::Upgrader) construction.
    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    /// Whether permessage-deflate was negotiated for this connection.
    pub fn compression_enabled(&self) -> bool {
        self.compressor.is_some()
    }

    /// Effective read payload limit, in bytes.
    pub fn max_read_payload(&self) -> usize {
        self.max_read_payload
    }

    /// Effective write payload limit, in bytes.
    pub fn max_write_payload(&self) -> usize {
        self.max_write_payload
    }

    /// Borrows the raw socket, unless the connection was closed.
    pub fn get_ref(&self) -> Option<&S> {
        self.framed.as_ref().map(|framed| framed.get_ref())
    }

    /// Whether teardown already ran.
    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }

    /// Applies unmasking, fragmentation and decompression to one wire frame.
    ///
    /// Returns `None` while a fragmented message is still incomplete.
    fn on_frame(&mut self, mut frame: Frame) -> Result<Option<FrameView>> {
        frame.unmask();

        if frame.is_compressed && self.decompressor.is_none() {
            return Err(WebSocketError::CompressionNotSupported);
        }

        match frame.opcode {
            OpCode::Close | OpCode::Ping | OpCode::Pong => Ok(Some(FrameView::from(frame))),
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }
                if frame.fin {
                    let payload = self.finish_message(frame.payload, frame.is_compressed)?;
                    Ok(Some(FrameView::from((frame.opcode, payload))))
                } else {
                    self.fragment = Some(Fragment {
                        opcode: frame.opcode,
                        compressed: frame.is_compressed,
                        buffer: frame.payload,
                    });
                    Ok(None)
                }
            }
            OpCode::Continuation => {
                let Some(fragment) = self.fragment.as_mut() else {
                    return Err(WebSocketError::InvalidContinuationFrame);
                };
                fragment.buffer.extend_from_slice(&frame.payload);
                if fragment.buffer.len() > self.max_read_payload {
                    self.fragment = None;
                    return Err(WebSocketError::FrameTooLarge);
                }
                if frame.fin {
                    let fragment = self.fragment.take().expect("fragment in progress");
                    let payload = self.finish_message(fragment.buffer, fragment.compressed)?;
                    Ok(Some(FrameView::from((fragment.opcode, payload))))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn finish_message(&mut self, payload: BytesMut, compressed: bool) -> Result<BytesMut> {
        if !compressed {
            return Ok(payload);
        }
        let Some(decompressor) = self.decompressor.as_mut() else {
            return Err(WebSocketError::CompressionNotSupported);
        };
        let payload = decompressor.decompress(&payload)?;
        if payload.len() > self.max_read_payload {
            return Err(WebSocketError::FrameTooLarge);
        }
        Ok(payload)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Receives the next complete frame.
    ///
    /// Resolves to [`WebSocketError::ConnectionClosed`] once the peer ends
    /// the stream or after teardown.
    pub async fn next_frame(&mut self) -> Result<FrameView> {
        match self.next().await {
            Some(result) => result,
            None => Err(WebSocketError::ConnectionClosed),
        }
    }

    /// Sends one frame and flushes it.
    pub async fn send(&mut self, frame: FrameView) -> Result<()> {
        SinkExt::send(self, frame).await
    }

    /// Tears the connection down: recycles the pooled read buffer, notifies
    /// the event handler, and shuts the raw socket down.
    ///
    /// Idempotent — a second call returns `Ok(())` without touching the pool
    /// again.
    pub async fn close(&mut self) -> Result<()> {
        let Some(framed) = self.framed.take() else {
            return Ok(());
        };

        let parts = framed.into_parts();
        self.pool.release(parts.read_buf);

        let mut io = parts.io;
        let shutdown = io.shutdown().await;

        self.handler.on_close(&self.session);
        shutdown.map_err(Into::into)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Stream for Connection<S> {
    type Item = Result<FrameView>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(framed) = this.framed.as_mut() else {
                return Poll::Ready(None);
            };
            let frame = match ready!(framed.poll_next_unpin(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => return Poll::Ready(None),
            };
            match this.on_frame(frame) {
                Ok(Some(view)) => return Poll::Ready(Some(Ok(view))),
                Ok(None) => continue,
                Err(err) => return Poll::Ready(Some(Err(err))),
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Sink<FrameView> for Connection<S> {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.get_mut().framed.as_mut() {
            Some(framed) => framed.poll_ready_unpin(cx),
            None => Poll::Ready(Err(WebSocketError::ConnectionClosed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, view: FrameView) -> Result<()> {
        let this = self.get_mut();

        if view.payload.len() > this.max_write_payload {
            return Err(WebSocketError::FrameTooLarge);
        }

        let frame = match (&mut this.compressor, view.opcode) {
            (Some(compressor), OpCode::Text | OpCode::Binary) if !view.payload.is_empty() => {
                let deflated = compressor.compress(&view.payload)?;
                Frame::compressed(true, view.opcode, deflated)
            }
            _ => Frame::from(view),
        };

        match this.framed.as_mut() {
            Some(framed) => framed.start_send_unpin(frame),
            None => Err(WebSocketError::ConnectionClosed),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.get_mut().framed.as_mut() {
            Some(framed) => framed.poll_flush_unpin(cx),
            None => Poll::Ready(Err(WebSocketError::ConnectionClosed)),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.get_mut().framed.as_mut() {
            Some(framed) => framed.poll_close_unpin(cx),
            None => Poll::Ready(Err(WebSocketError::ConnectionClosed)),
        }
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        // a connection dropped without close() must not leak its buffer
        if let Some(framed) = self.framed.take() {
            self.pool.release(framed.into_parts().read_buf);
        }
    }
}
