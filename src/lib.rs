//! # upsock
//! Server-side WebSocket upgrade engine implementing the RFC 6455 opening
//! handshake with permessage-deflate negotiation (RFC 7692).
//!
//! The crate owns the hard, one-shot part of running a WebSocket server: taking
//! an in-flight HTTP request, validating it against the opening-handshake
//! grammar, negotiating compression, seizing the underlying transport, writing
//! the `101 Switching Protocols` response directly to the raw socket, and
//! handing back a live, framed [`Connection`]. Once [`Upgrader::upgrade`]
//! succeeds, the transport belongs to the returned connection; the HTTP layer
//! must not touch it again.
//!
//! Buffered readers are pooled: every connection borrows a read buffer from a
//! shared [`pool::BufferPool`] sized by [`ServerOptions::with_reader_buf_size`],
//! and returns it when the connection is closed. A per-connection
//! [`SessionMap`] is created before the handshake runs, so a pre-upgrade hook
//! can stash authentication state that survives into the established
//! connection.
//!
//! # Features
//! - `logging`: emits `log` debug records for negotiation decisions.
//! - `zlib`: switches the deflate backend used for permessage-deflate.
//!
//! # Server Example
//! ```no_run
//! use http::Request;
//! use tokio::net::TcpStream;
//! use upsock::{ServerOptions, Upgrader};
//!
//! async fn accept(request: Request<()>, socket: TcpStream) -> upsock::Result<()> {
//!     let upgrader = Upgrader::new(ServerOptions::default());
//!     let mut conn = upgrader.upgrade(&request, socket).await?;
//!
//!     while let Ok(frame) = conn.next_frame().await {
//!         conn.send(frame).await?;
//!     }
//!     conn.close().await
//! }
//! ```

pub mod codec;
mod compression;
pub mod frame;
mod handshake;
mod mask;
pub mod pool;
mod session;

mod connection;
mod server;

use thiserror::Error;

pub use connection::Connection;
pub use frame::{Frame, FrameView, OpCode};
pub use handshake::accept_key;
pub use server::{
    EventHandler, Hijack, HttpRequest, PreUpgradeHook, ServerOptions, Upgrader,
    DEFAULT_READER_BUF_SIZE, MAX_PAYLOAD_READ, MAX_PAYLOAD_WRITE,
};
pub use session::{SessionFactory, SessionMap};

/// A result type for upgrade and connection operations, using
/// [`WebSocketError`] as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Boxed error type accepted from pre-upgrade hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while upgrading a connection or exchanging frames on an
/// established one.
///
/// The variants fall into the classes the upgrade path distinguishes:
///
/// - Pre-handshake rejection ([`WebSocketError::PreUpgrade`]) — raised before
///   any transport ownership changes hands; the request could still be
///   answered over HTTP by the caller's own stack.
/// - Capability failure ([`WebSocketError::UpgradeUnsupported`]) — the
///   transport cannot surrender its raw stream; a server misconfiguration.
/// - Handshake failures (`InvalidMethod` through `MissingSecWebSocketKey`) —
///   the request is not a conforming WebSocket opening handshake. The socket
///   has been hijacked by the time these are detected and is closed before the
///   error is returned.
/// - Transport failures ([`WebSocketError::IoError`]) — the socket itself
///   failed during hijack, response write, or frame exchange.
/// - Frame-level protocol violations — raised by the codec and the connection
///   read path after the handshake completed.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The pre-upgrade hook rejected the request before the transport was
    /// touched.
    #[error("pre-upgrade hook rejected the request")]
    PreUpgrade(#[source] BoxError),

    /// The transport cannot hand over exclusive ownership of its raw stream.
    #[error("transport does not support hijacking")]
    UpgradeUnsupported,

    /// The opening handshake used a method other than GET.
    #[error("handshake request method must be GET")]
    InvalidMethod,

    /// The HTTP `Connection` header is missing or does not carry the required
    /// `Upgrade` token.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The HTTP `Upgrade` header is missing or does not carry the required
    /// `websocket` token.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The `Sec-WebSocket-Version` header is not set to 13.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// The required `Sec-WebSocket-Key` header is missing or empty.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// Returned when operating on a connection after it was closed, or when
    /// the peer ended the stream.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A frame carried an opcode outside the set RFC 6455 defines.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Reserved header bits were set without a negotiated extension claiming
    /// them.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame arrived without the FIN bit set.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A ping frame exceeded the 125-byte control-frame payload limit.
    #[error("Ping frame too large")]
    PingFrameTooLarge,

    /// A frame or reassembled message exceeded the configured payload limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A new data frame started while a fragmented message was still being
    /// reassembled.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived with no fragmented message in progress.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// A compressed frame arrived on a connection that did not negotiate
    /// permessage-deflate.
    #[error("Received compressed frame on stream that doesn't support compression")]
    CompressionNotSupported,

    /// I/O failure on the underlying transport.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
