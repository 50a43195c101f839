//! Error types for tether-sender.

use std::{fmt, io};

use thiserror::Error;

use tether_mtproto::authentication;
use tether_mtproto::transport::TransportError;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server in response to an RPC call.
///
/// A numeric part embedded in the name is moved into [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
///
/// `FILE_PART_5_MISSING` → `RpcError { code: 400, name: "FILE_PART_MISSING", value: Some(5) }`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with the number removed.
    pub name: String,
    /// Number extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    ///
    /// The first all-digit `_`-separated segment becomes the value.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        let mut value = None;
        let mut parts = Vec::new();
        for part in message.split('_') {
            if value.is_none() && !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(v) = part.parse::<u32>() {
                    value = Some(v);
                    continue;
                }
            }
            parts.push(part);
        }
        match value {
            Some(_) => Self { code, name: parts.join("_"), value },
            None => Self { code, name: message.to_string(), value: None },
        }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Returns the flood-wait duration in seconds, if this is a FLOOD_WAIT error.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.code == 420 && self.name == "FLOOD_WAIT" {
            self.value.map(|v| v as u64)
        } else {
            None
        }
    }

    /// The DC to migrate to for `*_MIGRATE_X` errors.
    pub fn migrate_dc(&self) -> Option<i32> {
        if self.code == 303 && self.name.ends_with("_MIGRATE") {
            self.value.map(|v| v as i32)
        } else {
            None
        }
    }
}

// ─── ConnectionError ──────────────────────────────────────────────────────────

/// Failure of the underlying byte stream or its framing.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// The peer closed the stream, or the connection was shut down locally.
    #[error("connection closed")]
    Closed,
    #[error("connecting timed out")]
    Timeout,
    /// A bare status word instead of a message, e.g. `-404` for an unknown
    /// auth key.
    #[error("transport status {code}")]
    Status { code: i32 },
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any [`crate::Sender`] method that talks to the
/// server.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The server rejected the request.
    #[error("{0}")]
    Rpc(#[from] RpcError),
    /// The connection failed and could not be re-established.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// The connection dropped while the request was in flight and the request
    /// was not marked for resending.
    #[error("connection lost before the request completed")]
    ConnectionLost,
    /// The server kept rejecting the message with `bad_msg_notification`.
    #[error("bad message notification (code {code})")]
    BadMessage { code: i32 },
    /// The request body can never fit in a message.
    #[error("request of {len} bytes exceeds the message size limit")]
    TooLarge { len: usize },
    /// A server frame failed authentication.
    #[error("security check failed: {0}")]
    Security(#[from] tether_mtproto::DecryptError),
    /// The auth key handshake failed.
    #[error("auth key handshake failed: {0}")]
    Handshake(#[from] authentication::Error),
    /// Response deserialization failed.
    #[error("deserialize error: {0}")]
    Deserialize(#[from] tether_tl::deserialize::Error),
    /// A `gzip_packed` payload did not inflate.
    #[error("corrupt gzip_packed payload: {0}")]
    Gzip(#[source] io::Error),
    /// Malformed plaintext frame during the handshake.
    #[error("plaintext frame: {0}")]
    Plaintext(#[from] tether_mtproto::message::Error),
    /// Connecting or the handshake took too long.
    #[error("timed out")]
    Timeout,
    /// Reading or writing the persisted session failed.
    #[error("session storage: {0}")]
    Storage(#[source] io::Error),
    /// The configuration cannot work, e.g. obfuscating the Full transport.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    /// The sender was shut down before the request completed.
    #[error("request dropped")]
    Dropped,
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _ => false,
        }
    }

    /// If this is a FLOOD_WAIT error, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _ => None,
        }
    }

    /// Whether a server message or handshake answer failed an integrity check.
    pub fn is_security(&self) -> bool {
        match self {
            Self::Security(e) => e.is_security(),
            Self::Handshake(e) => e.is_security(),
            _ => false,
        }
    }

    /// Whether the failure was in the transport rather than the request.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionLost | Self::Timeout)
    }
}
