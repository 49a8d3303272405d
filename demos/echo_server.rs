//! A WebSocket echo server built on the upsock upgrade engine.
//!
//! Reads the opening HTTP request straight off each accepted TCP socket,
//! upgrades it, then echoes every text or binary message back to the client.
//! Try it with a browser console: `new WebSocket("ws://127.0.0.1:8080")`.

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use upsock::{Connection, FrameView, OpCode, ServerOptions, Upgrader, WebSocketError};

/// Reads the request head (up to the blank line) and parses the request line
/// plus headers into an `http::Request`.
///
/// This is deliberately minimal: the upgrade engine only needs the method and
/// the header map, and an opening handshake is a bodyless GET.
async fn read_request(stream: &mut TcpStream) -> anyhow::Result<upsock::HttpRequest> {
    // byte-at-a-time so no bytes belonging to the frame stream are consumed
    let mut raw = Vec::with_capacity(1024);
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        anyhow::ensure!(raw.len() < 16 * 1024, "request head too large");
        let n = stream.read(&mut byte).await?;
        anyhow::ensure!(n > 0, "connection closed mid-request");
        raw.push(byte[0]);
    }

    let head = std::str::from_utf8(&raw).context("request head is not UTF-8")?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().context("missing request line")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing method")?;
    let uri = parts.next().context("missing request target")?;

    let mut builder = http::Request::builder().method(method).uri(uri);
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').context("malformed header line")?;
        builder = builder.header(name.trim(), value.trim());
    }

    Ok(builder.body(())?)
}

async fn handle_client(upgrader: Upgrader, mut stream: TcpStream) -> anyhow::Result<()> {
    let request = read_request(&mut stream).await?;
    let mut conn: Connection<TcpStream> = upgrader.upgrade(&request, stream).await?;

    loop {
        let frame = match conn.next_frame().await {
            Ok(frame) => frame,
            Err(WebSocketError::ConnectionClosed) => break,
            Err(err) => {
                conn.close().await.ok();
                return Err(err.into());
            }
        };

        match frame.opcode {
            OpCode::Close => break,
            OpCode::Ping => conn.send(FrameView::pong(frame.payload)).await?,
            OpCode::Text | OpCode::Binary => conn.send(frame).await?,
            _ => {}
        }
    }

    conn.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let upgrader = Upgrader::new(
        ServerOptions::default()
            .with_max_read_payload(16 * 1024 * 1024)
            .with_pre_upgrade(|request, session| {
                session.insert("path", request.uri().path().to_string());
                Ok(())
            }),
    );

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    println!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let upgrader = upgrader.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_client(upgrader, stream).await {
                eprintln!("{peer}: {err:#}");
            }
        });
    }
}
