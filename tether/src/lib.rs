//! # tether: Telegram MTProto client core
//!
//! `tether` wires four focused sub-crates together:
//!
//! | Sub-crate        | Role                                                     |
//! |------------------|----------------------------------------------------------|
//! | `tether-tl`      | TL binary codec and the MTProto service schema           |
//! | `tether-crypto`  | AES-IGE/CTR, SHA, RSA, PQ factorization, `AuthKey`       |
//! | `tether-mtproto` | Key exchange, session state, packing, transport codecs   |
//! | `tether-sender`  | Async connection, dispatch, reconnection, persistence    |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tether::tl::{enums, functions};
//! use tether::{Config, Sender};
//!
//! # async fn run() -> Result<(), tether::InvocationError> {
//! let (sender, mut updates) = Sender::connect(Config::default()).await?;
//!
//! let enums::Pong::Pong(pong) = sender.invoke(&functions::Ping { ping_id: 1 }).await?;
//! println!("pong for {:#x}", pong.msg_id);
//!
//! while let Some(update) = updates.next().await {
//!     println!("{} bytes of update", update.len());
//! }
//! # Ok(()) }
//! ```
//!
//! ## Sans-IO use
//!
//! Everything below [`Sender`] works without an async runtime: drive
//! [`authentication`] and [`EncryptedSession`] over your own I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`tether_tl`]: TL types, functions and the binary codec.
pub use tether_tl as tl;

/// Re-export of [`tether_crypto`]: AES, SHA, RSA, factorize, AuthKey.
pub use tether_crypto as crypto;

/// Re-export of [`tether_mtproto`]: session, packing, transports, key exchange.
pub use tether_mtproto as mtproto;

/// Re-export of [`tether_sender`]: the async request engine.
pub use tether_sender as sender;

// ─── Convenience re-exports ───────────────────────────────────────────────────

pub use tether_tl::{Deserializable, Identifiable, RemoteCall, Serializable};

pub use tether_crypto::AuthKey;
pub use tether_mtproto::authentication::{self, Finished};
pub use tether_mtproto::{EncryptedSession, Session};

pub use tether_sender::{
    AutoSleep, BinaryFileBackend, Config, InMemoryBackend, InvocationError, NoRetries, Obfuscation,
    PersistedSession, ReconnectPolicy, RequestOptions, RetryPolicy, RpcError, Sender, SenderState,
    SessionBackend, TransportKind, UpdateStream,
};
#[cfg(feature = "sqlite-session")]
pub use tether_sender::SqliteBackend;
