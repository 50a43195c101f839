//! # tether-sender
//!
//! Async MTProto sender built on the sans-IO pieces in `tether-mtproto`.
//!
//! ## Features
//! - Abridged, Intermediate and Full transports, optionally obfuscated
//!   (with MTProxy secrets)
//! - Auth key negotiation on first connect, persisted through a
//!   [`SessionBackend`]
//! - Request batching into containers, acks, keep-alive pings
//! - Server salt, clock and sequence resync
//! - Automatic reconnection with capped exponential backoff
//! - Opt-in `FLOOD_WAIT` retry policies
//!
//! ```rust,no_run
//! use tether_sender::{Config, Sender};
//! use tether_tl::functions;
//!
//! # async fn run() -> Result<(), tether_sender::InvocationError> {
//! let (sender, _updates) = Sender::connect(Config::default()).await?;
//! let pong = sender.invoke(&functions::Ping { ping_id: 7 }).await?;
//! println!("{pong:?}");
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

pub mod connection;
mod errors;
mod retry;
mod sender;
pub mod session_backend;

pub use connection::Connection;
pub use errors::{ConnectionError, InvocationError, RpcError};
pub use retry::{AutoSleep, NoRetries, RetryContext, RetryPolicy};
pub use sender::{MAX_RESYNC_RETRIES, Sender, SenderState, UpdateStream};
pub use session_backend::{BinaryFileBackend, InMemoryBackend, PersistedSession, SessionBackend};
#[cfg(feature = "sqlite-session")]
pub use session_backend::SqliteBackend;

use std::sync::Arc;
use std::time::Duration;

use tether_crypto::rsa::KeyStore;
use tether_mtproto::transport::obfuscated::ProxyParams;
use tether_mtproto::transport::{Abridged, Full, Intermediate, Transport};

// ─── Transport selection ──────────────────────────────────────────────────────

/// Which framing to speak on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// One length byte for most packets. The smallest overhead.
    #[default]
    Abridged,
    /// 4-byte length prefix.
    Intermediate,
    /// Length, sequence number and CRC32 on every packet.
    Full,
}

impl TransportKind {
    pub(crate) fn build(self) -> Box<dyn Transport> {
        match self {
            Self::Abridged => Box::new(Abridged::new()),
            Self::Intermediate => Box::new(Intermediate::new()),
            Self::Full => Box::new(Full::new()),
        }
    }
}

/// Obfuscation layered over the chosen transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Obfuscation {
    /// Random-looking stream, no proxy.
    Plain,
    /// Through an MTProxy with the given secret, reaching `dc_id`.
    Proxy { secret: [u8; 16], dc_id: i16 },
}

impl Obfuscation {
    pub(crate) fn proxy_params(self) -> Option<ProxyParams> {
        match self {
            Self::Plain => None,
            Self::Proxy { secret, dc_id } => Some(ProxyParams { secret, dc_id }),
        }
    }
}

// ─── Policies ─────────────────────────────────────────────────────────────────

/// How hard to try getting a lost connection back.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReconnectPolicy {
    /// Attempts before giving up; `0` disables reconnection.
    pub max_attempts:  u32,
    /// Delay before the first attempt. Doubles on every failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay:     Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts:  5,
            initial_delay: Duration::from_millis(500),
            max_delay:     Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Fail everything as soon as the connection drops.
    pub fn never() -> Self {
        Self { max_attempts: 0, ..Self::default() }
    }

    /// Delay before reconnection attempt number `attempt` (starting at 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-request knobs for [`Sender::invoke_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    /// Send the request again on the new connection if the old one dropped
    /// before a reply arrived. Turn off for calls that must not run twice.
    pub resend_on_reconnect: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { resend_on_reconnect: true }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Everything [`Sender::connect`] needs.
#[derive(Clone)]
pub struct Config {
    /// DC the persisted session belongs to.
    pub dc_id:             i32,
    pub server_address:    String,
    pub port:              u16,
    pub transport:         TransportKind,
    pub obfuscation:       Option<Obfuscation>,
    pub session_backend:   Arc<dyn SessionBackend>,
    /// Server keys the handshake may encrypt to.
    pub rsa_keys:          Arc<KeyStore>,
    pub connect_timeout:   Duration,
    pub handshake_timeout: Duration,
    /// Keep-alive ping period.
    pub ping_interval:     Duration,
    pub reconnect:         ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dc_id:             2,
            server_address:    "149.154.167.51".into(),
            port:              443,
            transport:         TransportKind::default(),
            obfuscation:       None,
            session_backend:   Arc::new(InMemoryBackend::new()),
            rsa_keys:          Arc::new(KeyStore::telegram()),
            connect_timeout:   Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            ping_interval:     Duration::from_secs(60),
            reconnect:         ReconnectPolicy::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("dc_id", &self.dc_id)
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .field("transport", &self.transport)
            .field("obfuscation", &self.obfuscation.map(|o| match o {
                Obfuscation::Plain => "plain",
                Obfuscation::Proxy { .. } => "proxy",
            }))
            .field("session_backend", &self.session_backend.name())
            .field("rsa_keys", &self.rsa_keys.len())
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl Config {
    /// Reject combinations that cannot work.
    pub fn validate(&self) -> Result<(), InvocationError> {
        if self.obfuscation.is_some() && self.transport.build().obfuscation_tag().is_none() {
            return Err(InvocationError::Config("the Full transport cannot be obfuscated"));
        }
        if self.rsa_keys.is_empty() {
            return Err(InvocationError::Config("no RSA keys to negotiate an auth key with"));
        }
        if self.ping_interval.is_zero() {
            return Err(InvocationError::Config("ping interval must be positive"));
        }
        Ok(())
    }
}
