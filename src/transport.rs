//! Transport abstraction so the gateway/feedback state machines are
//! independently testable without a live TLS handshake.
//!
//! Mirrors the `ReadWrite` blanket-trait pattern used for swappable device
//! transports elsewhere in the async Rust ecosystem: any type that is both
//! `AsyncRead` and `AsyncWrite` (and safe to move across tasks) can stand in
//! for the TLS stream. Production code plugs in
//! `tokio_rustls::client::TlsStream<TcpStream>`; tests plug in
//! `tokio::io::DuplexStream`.

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex, unpin, send-able byte stream: either a real TLS connection or
/// an in-process stand-in for one.
pub trait ApsStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ApsStream for T {}
