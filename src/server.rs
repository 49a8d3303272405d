//! Upgrade orchestration: configuration, the hijack capability, the 101
//! response writer and [`Upgrader`] itself.

use std::sync::Arc;

use bytes::BytesMut;
use http::header;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    codec::Codec,
    compression,
    connection::Connection,
    frame::Frame,
    handshake,
    pool::BufferPool,
    session::{SessionFactory, SessionMap},
    BoxError, Result, WebSocketError,
};

/// The request value an upgrade is validated against: method plus headers,
/// no body.
pub type HttpRequest = http::Request<()>;

/// Hook invoked with the request and the fresh session store before any
/// transport ownership changes hands. An error aborts the upgrade cleanly.
pub type PreUpgradeHook =
    Arc<dyn Fn(&HttpRequest, &SessionMap) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Default capacity of pooled read buffers, in bytes.
pub const DEFAULT_READER_BUF_SIZE: usize = 4 * 1024;

/// Default maximum payload size for incoming frames and reassembled
/// messages, 1 MiB.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Default maximum payload size for outgoing frames, 1 MiB.
pub const MAX_PAYLOAD_WRITE: usize = 1024 * 1024;

/// Application callbacks bound to an [`Upgrader`].
///
/// The engine invokes `on_open` once a connection object has been
/// constructed and `on_close` during teardown. Everything in between —
/// dispatching received frames, replying to pings, interpreting close
/// payloads — belongs to the caller's read loop, which can reach the handler
/// again through [`Connection::handler`].
pub trait EventHandler: Send + Sync {
    /// A connection finished its handshake.
    fn on_open(&self, session: &SessionMap) {
        let _ = session;
    }

    /// A connection was torn down and its pooled reader recycled.
    fn on_close(&self, session: &SessionMap) {
        let _ = session;
    }
}

/// Handler used when the caller does not bind one.
pub(crate) struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Capability to take exclusive raw ownership of a transport away from the
/// HTTP layer that accepted it.
///
/// The capability is consumed by value, so a transport can be hijacked at
/// most once; a transport type that cannot surrender its stream simply does
/// not implement the trait, which turns the capability check into a compile
/// time property rather than a per-request runtime probe. Implementations
/// that can fail to detach (for example a wrapper whose inner stream was
/// already taken) report [`WebSocketError::UpgradeUnsupported`].
pub trait Hijack {
    /// The raw bidirectional byte stream handed over.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Surrenders the raw stream.
    ///
    /// Any reader the HTTP layer kept on top of this stream is abandoned
    /// with the capability; the pooled reader replaces it, so implementations
    /// must not have consumed bytes beyond the request head.
    fn hijack(self) -> Result<Self::Stream>;
}

impl Hijack for tokio::net::TcpStream {
    type Stream = Self;

    fn hijack(self) -> Result<Self> {
        Ok(self)
    }
}

/// In-memory transports participate too; used by in-process servers and
/// tests.
impl Hijack for tokio::io::DuplexStream {
    type Stream = Self;

    fn hijack(self) -> Result<Self> {
        Ok(self)
    }
}

/// Server configuration, immutable once an [`Upgrader`] is built from it.
///
/// Unset fields (and zero sizes) fall back to the crate defaults when
/// [`Upgrader::new`] resolves the options — exactly once, before any request
/// traffic, so concurrent upgrades read the configuration without locking.
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Capacity of pooled read buffers; [`DEFAULT_READER_BUF_SIZE`] if unset.
    pub reader_buf_size: Option<usize>,
    /// Maximum incoming payload size; [`MAX_PAYLOAD_READ`] if unset.
    pub max_read_payload: Option<usize>,
    /// Maximum outgoing payload size; [`MAX_PAYLOAD_WRITE`] if unset.
    pub max_write_payload: Option<usize>,
    /// Factory for per-connection session stores; an empty concurrent store
    /// if unset.
    pub session_factory: Option<SessionFactory>,
    /// Hook run before the transport is touched; a no-op if unset.
    pub pre_upgrade: Option<PreUpgradeHook>,
}

impl ServerOptions {
    /// Sets the capacity of pooled read buffers.
    pub fn with_reader_buf_size(self, size: usize) -> Self {
        Self {
            reader_buf_size: Some(size),
            ..self
        }
    }

    /// Sets the maximum payload size accepted from the peer.
    pub fn with_max_read_payload(self, size: usize) -> Self {
        Self {
            max_read_payload: Some(size),
            ..self
        }
    }

    /// Sets the maximum payload size handed to the peer.
    pub fn with_max_write_payload(self, size: usize) -> Self {
        Self {
            max_write_payload: Some(size),
            ..self
        }
    }

    /// Sets the factory producing one session store per connection attempt.
    pub fn with_session_factory(self, factory: SessionFactory) -> Self {
        Self {
            session_factory: Some(factory),
            ..self
        }
    }

    /// Sets the pre-upgrade hook.
    pub fn with_pre_upgrade(
        self,
        hook: impl Fn(&HttpRequest, &SessionMap) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            pre_upgrade: Some(Arc::new(hook)),
            ..self
        }
    }
}

/// Fully-resolved configuration shared by all upgrades of one server.
struct Shared {
    max_read_payload: usize,
    max_write_payload: usize,
    session_factory: SessionFactory,
    pre_upgrade: Option<PreUpgradeHook>,
    handler: Arc<dyn EventHandler>,
    pool: Arc<BufferPool>,
}

/// Drives the HTTP → WebSocket protocol transition.
///
/// One upgrader serves an entire listener: it binds the resolved
/// [`ServerOptions`] and the application's [`EventHandler`], and is cheap to
/// clone into every accept task. Each [`Upgrader::upgrade`] call runs
/// independently; the buffer pool is the only state shared between them.
#[derive(Clone)]
pub struct Upgrader {
    shared: Arc<Shared>,
}

impl Upgrader {
    /// Builds an upgrader with a no-op event handler.
    pub fn new(options: ServerOptions) -> Self {
        Self::with_handler(options, Arc::new(NoopHandler))
    }

    /// Builds an upgrader bound to the given event handler.
    ///
    /// Defaults are resolved here, once; the returned upgrader never mutates
    /// its configuration again.
    pub fn with_handler(options: ServerOptions, handler: Arc<dyn EventHandler>) -> Self {
        let reader_buf_size = options
            .reader_buf_size
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_READER_BUF_SIZE);
        let max_read_payload = options
            .max_read_payload
            .filter(|&size| size > 0)
            .unwrap_or(MAX_PAYLOAD_READ);
        let max_write_payload = options
            .max_write_payload
            .filter(|&size| size > 0)
            .unwrap_or(MAX_PAYLOAD_WRITE);
        let session_factory = options
            .session_factory
            .unwrap_or_else(|| Arc::new(|| Arc::new(SessionMap::new())));

        Self {
            shared: Arc::new(Shared {
                max_read_payload,
                max_write_payload,
                session_factory,
                pre_upgrade: options.pre_upgrade,
                handler,
                pool: Arc::new(BufferPool::new(reader_buf_size)),
            }),
        }
    }

    /// The event handler this upgrader was built with.
    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.shared.handler
    }

    /// Upgrades one HTTP request into a WebSocket connection.
    ///
    /// Runs the full sequence: session-store construction, pre-upgrade hook,
    /// transport hijack, handshake validation, extension negotiation, the
    /// 101 response written directly to the raw socket, and connection
    /// construction.
    ///
    /// A failure is terminal for the request. Before the hijack the abort is
    /// clean — nothing was written and the transport is simply dropped. After
    /// the hijack, the pooled buffer is released and the raw socket is shut
    /// down before the error is returned, so no failure path leaves an open,
    /// unmanaged socket behind. On success the socket belongs exclusively to
    /// the returned [`Connection`].
    pub async fn upgrade<T: Hijack>(
        &self,
        request: &HttpRequest,
        transport: T,
    ) -> Result<Connection<T::Stream>> {
        let shared = &self.shared;

        // the hook may populate the session even if the handshake later fails
        let session = (shared.session_factory)();
        if let Some(hook) = &shared.pre_upgrade {
            hook(request, &session).map_err(WebSocketError::PreUpgrade)?;
        }

        let mut stream = transport.hijack()?;
        let read_buf = shared.pool.acquire();

        let accept = match handshake::validate(request) {
            Ok(key) => handshake::accept_key(key.as_bytes()),
            Err(err) => return Err(abort(stream, read_buf, &shared.pool, err).await),
        };

        let offer = request
            .headers()
            .get(header::SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|value| value.to_str().ok());
        let compression = compression::negotiate(offer);

        #[cfg(feature = "logging")]
        log::debug!("websocket handshake accepted, compression={compression}");

        let mut response = ResponseWriter::new();
        response.add_header("Sec-WebSocket-Accept", &accept);
        if compression {
            response.add_header("Sec-WebSocket-Extensions", compression::PERMESSAGE_DEFLATE);
        }
        if let Err(err) = response.send(&mut stream).await {
            return Err(abort(stream, read_buf, &shared.pool, err.into()).await);
        }

        let mut parts = FramedParts::new::<Frame>(stream, Codec::new(shared.max_read_payload));
        parts.read_buf = read_buf;

        let conn = Connection::new(
            Framed::from_parts(parts),
            session,
            Arc::clone(&shared.handler),
            Arc::clone(&shared.pool),
            compression,
            shared.max_read_payload,
            shared.max_write_payload,
        );
        shared.handler.on_open(conn.session());
        Ok(conn)
    }
}

/// Post-hijack failure path: give the pooled buffer back and close the raw
/// socket before surfacing the error.
async fn abort<S: AsyncWrite + Unpin>(
    mut stream: S,
    read_buf: BytesMut,
    pool: &BufferPool,
    err: WebSocketError,
) -> WebSocketError {
    pool.release(read_buf);
    let _ = stream.shutdown().await;
    err
}

/// Serializer for the `101 Switching Protocols` response.
///
/// The response goes straight onto the raw hijacked socket; the HTTP layer's
/// own buffered writer is out of the picture by the time this runs. The
/// buffer is owned by the writer and freed on every exit path; a failed
/// write surfaces the underlying error to the caller.
struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    fn new() -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.extend_from_slice(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
        );
        Self { buf }
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(b": ");
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    async fn send<S: AsyncWrite + Unpin>(mut self, stream: &mut S) -> std::io::Result<()> {
        self.buf.extend_from_slice(b"\r\n");
        stream.write_all(&self.buf).await?;
        stream.flush().await
    }
}
