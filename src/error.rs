use crate::codec::ApsStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the gateway, feedback, and client layers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `deliver()` was called before `connect()` succeeded.
    #[error("not connected")]
    NotConnected,

    /// `connect()` was called on a session that already has a live stream.
    #[error("already connected")]
    AlreadyConnected,

    /// `connect()` was called without a client certificate configured.
    #[error("TLS credentials not available")]
    TlsNotAvailable,

    /// A `deliver` future was dropped before its frame reached the wire.
    #[error("delivery cancelled")]
    Cancelled,

    /// The underlying TCP/TLS connection failed.
    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    /// The gateway connection closed while this send's outcome was still
    /// indeterminate, or `close()` was called with sends in flight.
    #[error("session closed")]
    SessionClosed,

    /// APS rejected a send with an explicit error-response status.
    #[error("APS rejected the notification: {0:?}")]
    Aps(ApsStatus),

    /// A frame on the wire did not match the expected layout.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// The base64 device token did not decode to exactly 32 bytes.
    #[error("invalid device token length")]
    InvalidTokenLength,

    /// `add_extra` was called with the reserved key `"aps"`.
    #[error(r#"the "aps" key is reserved and cannot be used as an extra"#)]
    ReservedKey,

    /// The device token or payload failed to base64/JSON round-trip.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The configured client certificate or key could not be parsed.
    #[error("invalid TLS credentials: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid TLS credentials: {0}")]
    InvalidPem(String),

    /// The configured endpoint host name could not be used for TLS
    /// server-name verification.
    #[error("invalid endpoint host name: {0}")]
    InvalidEndpoint(String),
}
