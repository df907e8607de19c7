//! Device identity: an opaque device token, held as the base64 text
//! the caller provided.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::codec::TOKEN_LEN;
use crate::error::{Error, Result};

/// A device token, identified by the base64 text a caller supplies (or that
/// the feedback/error-response readers synthesise from raw wire bytes).
///
/// Construction never decodes; [`Identity::decoded`] does, and fails with
/// [`Error::InvalidTokenLength`] unless the base64 text decodes to exactly
/// 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Creates an `Identity` from caller-provided base64 text. Does not
    /// validate the token length eagerly; see [`Identity::decoded`].
    pub fn new(token_text: impl Into<String>) -> Self {
        Self(token_text.into())
    }

    /// Builds an `Identity` from raw 32-byte device-token bytes, as produced
    /// by the feedback reader and the gateway's `INVALID_TOKEN` handler.
    pub fn from_raw_token(token: &[u8; TOKEN_LEN]) -> Self {
        Self(STANDARD.encode(token))
    }

    /// The base64 device-token text, exactly as the caller (or the wire
    /// reader) provided it.
    pub fn device_token(&self) -> &str {
        &self.0
    }

    /// Decodes the base64 text to the 32 raw device-token bytes, failing
    /// with [`Error::InvalidTokenLength`] if the decoded length isn't
    /// exactly 32.
    pub fn decoded(&self) -> Result<[u8; TOKEN_LEN]> {
        let bytes = STANDARD.decode(&self.0)?;
        let bytes: [u8; TOKEN_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidTokenLength)?;
        Ok(bytes)
    }
}

impl From<String> for Identity {
    fn from(token_text: String) -> Self {
        Self::new(token_text)
    }
}

impl From<&str> for Identity {
    fn from(token_text: &str) -> Self {
        Self::new(token_text.to_owned())
    }
}
