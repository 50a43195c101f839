//! Pluggable session storage backend.
//!
//! The [`SessionBackend`] trait abstracts over session persistence so that
//! callers can swap in an SQLite store, a binary file, an in-memory store,
//! or anything else.
//!
//! Built-in backends:
//! * [`BinaryFileBackend`]: a compact binary file.
//! * [`InMemoryBackend`]: nothing touches the disk.
//! * [`SqliteBackend`]: SQLite (requires the `sqlite-session` Cargo feature).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Format tag at the start of a binary session file.
const MAGIC: [u8; 4] = *b"TTS1";

// ─── PersistedSession ─────────────────────────────────────────────────────────

/// Everything needed to resume talking to a server without a new handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub dc_id:          i32,
    pub server_address: String,
    pub port:           u16,
    pub auth_key:       Option<[u8; 256]>,
    pub salt:           i64,
    pub time_offset:    i32,
}

impl std::fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedSession")
            .field("dc_id", &self.dc_id)
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .field("auth_key", &self.auth_key.map(|_| "<256 bytes>"))
            .field("salt", &self.salt)
            .field("time_offset", &self.time_offset)
            .finish()
    }
}

impl PersistedSession {
    /// Encode in the binary session format. Fails if the server address is
    /// longer than 255 bytes.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let addr = self.server_address.as_bytes();
        let addr_len = u8::try_from(addr.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "server address longer than 255 bytes")
        })?;

        let mut b = Vec::with_capacity(4 + 4 + 2 + 1 + 256 + 8 + 4 + 1 + self.server_address.len());
        b.extend_from_slice(&MAGIC);
        b.extend_from_slice(&self.dc_id.to_le_bytes());
        b.extend_from_slice(&self.port.to_le_bytes());
        match &self.auth_key {
            Some(k) => { b.push(1); b.extend_from_slice(k); }
            None    => { b.push(0); }
        }
        b.extend_from_slice(&self.salt.to_le_bytes());
        b.extend_from_slice(&self.time_offset.to_le_bytes());
        b.push(addr_len);
        b.extend_from_slice(addr);
        Ok(b)
    }

    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        let mut p = 0usize;
        macro_rules! r {
            ($n:expr) => {{
                if p + $n > buf.len() {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated session"));
                }
                let s = &buf[p..p + $n];
                p += $n;
                s
            }};
        }
        macro_rules! le {
            ($ty:ty) => {{
                let mut a = [0u8; std::mem::size_of::<$ty>()];
                a.copy_from_slice(r!(std::mem::size_of::<$ty>()));
                <$ty>::from_le_bytes(a)
            }};
        }

        if r!(4) != &MAGIC[..] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a session file"));
        }
        let dc_id    = le!(i32);
        let port     = le!(u16);
        let auth_key = match r!(1)[0] {
            0 => None,
            1 => {
                let mut k = [0u8; 256];
                k.copy_from_slice(r!(256));
                Some(k)
            }
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "bad auth key flag")),
        };
        let salt        = le!(i64);
        let time_offset = le!(i32);
        let len         = r!(1)[0] as usize;
        let server_address = String::from_utf8(r!(len).to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if p != buf.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes after session"));
        }
        Ok(Self { dc_id, server_address, port, auth_key, salt, time_offset })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        // Written beside the target, then renamed over it.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_bytes()?)?;
        std::fs::rename(&tmp, path)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// An abstraction over where and how session data is persisted.
pub trait SessionBackend: Send + Sync {
    /// Persist the given session.
    fn save(&self, session: &PersistedSession) -> io::Result<()>;

    /// Load a previously persisted session, or return `None` if none exists.
    fn load(&self) -> io::Result<Option<PersistedSession>>;

    /// Remove the stored session.
    fn delete(&self) -> io::Result<()>;

    /// Human-readable name of this backend (for log messages).
    fn name(&self) -> &str;
}

// ─── BinaryFileBackend ────────────────────────────────────────────────────────

/// The default session backend: one small binary file.
pub struct BinaryFileBackend {
    path: PathBuf,
}

impl BinaryFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl SessionBackend for BinaryFileBackend {
    fn save(&self, session: &PersistedSession) -> io::Result<()> {
        session.save(&self.path)
    }

    fn load(&self) -> io::Result<Option<PersistedSession>> {
        match PersistedSession::load(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str { "binary-file" }
}

// ─── InMemoryBackend ─────────────────────────────────────────────────────────

/// An ephemeral session backend that stores nothing on disk.
///
/// Useful for tests, or for clients that should always start fresh.
#[derive(Default)]
pub struct InMemoryBackend {
    data: Mutex<Option<PersistedSession>>,
}

impl InMemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Start out with `session` already stored.
    pub fn with_session(session: PersistedSession) -> Self {
        Self { data: Mutex::new(Some(session)) }
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Option<PersistedSession>>> {
        self.data.lock().map_err(|_| io::Error::other("session lock poisoned"))
    }
}

impl SessionBackend for InMemoryBackend {
    fn save(&self, session: &PersistedSession) -> io::Result<()> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<PersistedSession>> {
        Ok(self.lock()?.clone())
    }

    fn delete(&self) -> io::Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}

// ─── SqliteBackend ────────────────────────────────────────────────────────────

#[cfg(feature = "sqlite-session")]
pub use sqlite_backend::SqliteBackend;

#[cfg(feature = "sqlite-session")]
mod sqlite_backend {
    use super::*;
    use rusqlite::{Connection, OptionalExtension, params};

    fn to_io(e: rusqlite::Error) -> io::Error {
        io::Error::other(e)
    }

    /// SQLite-backed session store.
    ///
    /// Keeps a single row in a `session` table, created if missing.
    ///
    /// Enable with the `sqlite-session` Cargo feature:
    /// ```toml
    /// [dependencies]
    /// tether-sender = { version = "*", features = ["sqlite-session"] }
    /// ```
    pub struct SqliteBackend {
        path: PathBuf,
    }

    impl SqliteBackend {
        pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
            let path = path.into();
            // Open and initialise the schema now so errors surface early.
            let conn = Connection::open(&path).map_err(to_io)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS session (
                    id             INTEGER PRIMARY KEY CHECK (id = 0),
                    dc_id          INTEGER NOT NULL,
                    server_address TEXT    NOT NULL,
                    port           INTEGER NOT NULL,
                    auth_key       BLOB,
                    salt           INTEGER NOT NULL DEFAULT 0,
                    time_offset    INTEGER NOT NULL DEFAULT 0
                );",
            ).map_err(to_io)?;
            Ok(Self { path })
        }
    }

    impl SessionBackend for SqliteBackend {
        fn save(&self, session: &PersistedSession) -> io::Result<()> {
            let conn = Connection::open(&self.path).map_err(to_io)?;
            conn.execute(
                "INSERT OR REPLACE INTO session
                    (id, dc_id, server_address, port, auth_key, salt, time_offset)
                 VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.dc_id,
                    session.server_address,
                    session.port,
                    session.auth_key.map(|k| k.to_vec()),
                    session.salt,
                    session.time_offset,
                ],
            ).map_err(to_io)?;
            Ok(())
        }

        fn load(&self) -> io::Result<Option<PersistedSession>> {
            let conn = Connection::open(&self.path).map_err(to_io)?;
            conn.query_row(
                "SELECT dc_id, server_address, port, auth_key, salt, time_offset FROM session WHERE id = 0",
                [],
                |row| {
                    let key_blob: Option<Vec<u8>> = row.get(3)?;
                    Ok(PersistedSession {
                        dc_id:          row.get(0)?,
                        server_address: row.get(1)?,
                        port:           row.get(2)?,
                        auth_key:       key_blob.and_then(|k| <[u8; 256]>::try_from(k).ok()),
                        salt:           row.get(4)?,
                        time_offset:    row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(to_io)
        }

        fn delete(&self) -> io::Result<()> {
            let conn = Connection::open(&self.path).map_err(to_io)?;
            conn.execute("DELETE FROM session", []).map_err(to_io)?;
            Ok(())
        }

        fn name(&self) -> &str { "sqlite" }
    }
}
