//! MTProto client session state.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-connection session bookkeeping: message ids, sequence numbers, the
/// current server salt and the clock offset to the server.
///
/// A `Session` is cheap to create and is [`reset`](Session::reset) on
/// reconnect.
///
/// # Example
///
/// ```rust
/// use tether_mtproto::Session;
///
/// let mut session = Session::new();
/// let a = session.new_msg_id();
/// let b = session.new_msg_id();
/// assert!(b > a && b % 4 == 0);
/// assert_eq!(session.next_seq_no(true), 1);
/// assert_eq!(session.next_seq_no(false), 2);
/// ```
#[derive(Debug)]
pub struct Session {
    session_id: i64,
    salt: i64,
    time_offset: i32,
    /// Number of content-related messages sent so far.
    sequence: i32,
    last_msg_id: i64,
    /// The id [`reset`](Session::reset) replaced, if any.
    previous_session_id: Option<i64>,
}

fn random_i64() -> i64 {
    i64::from_le_bytes(tether_crypto::random_array())
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

impl Session {
    /// Create a fresh session with a random id, no salt and no clock offset.
    pub fn new() -> Self {
        Self::with_state(0, 0)
    }

    /// Create a fresh session that continues with a known salt and offset,
    /// e.g. from persisted state or a just-finished handshake.
    pub fn with_state(salt: i64, time_offset: i32) -> Self {
        Self {
            session_id: random_i64(),
            salt,
            time_offset,
            sequence: 0,
            last_msg_id: 0,
            previous_session_id: None,
        }
    }

    pub fn session_id(&self) -> i64 { self.session_id }

    /// Id of the session this one replaced. The server may still answer
    /// messages sent there.
    pub fn previous_session_id(&self) -> Option<i64> { self.previous_session_id }

    pub fn salt(&self) -> i64 { self.salt }

    pub fn set_salt(&mut self, salt: i64) { self.salt = salt; }

    /// Server time minus local time, in seconds.
    pub fn time_offset(&self) -> i32 { self.time_offset }

    pub fn set_time_offset(&mut self, offset: i32) { self.time_offset = offset; }

    /// Allocate a new message id from the system clock.
    pub fn new_msg_id(&mut self) -> i64 {
        self.new_msg_id_at(now())
    }

    /// Allocate a new message id as if the local clock read `now` (time since
    /// the Unix epoch).
    ///
    /// The high 32 bits are the corrected Unix time in seconds; the low bits
    /// hold the milliseconds and a random field, with the lowest two bits
    /// clear. Ids are strictly increasing even if the clock goes backwards.
    pub fn new_msg_id_at(&mut self, now: Duration) -> i64 {
        let secs = (now.as_secs() as i64).wrapping_add(self.time_offset as i64);
        let millis = now.subsec_millis() as i64;
        let random = random_i64() & 0xf_ffff;
        let mut id = (secs << 32) | (millis << 22) | (random << 2);
        if id <= self.last_msg_id {
            id = self.last_msg_id + 4;
        }
        self.last_msg_id = id;
        id
    }

    /// Sequence number for the next message.
    ///
    /// Content-related messages get `2 * count + 1` and bump the count; the
    /// rest get `2 * count`.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence * 2 + 1;
            self.sequence += 1;
            n
        } else {
            self.sequence * 2
        }
    }

    /// Shift the content-related counter after the server complained about
    /// our sequence numbers (`bad_msg_notification` codes 32 and 33).
    pub fn correct_sequence(&mut self, delta: i32) {
        self.sequence = (self.sequence + delta).max(0);
    }

    /// Re-derive the clock offset from a server-issued message id.
    ///
    /// Ids from before the correction may be far off, so the last id is
    /// forgotten and a new session is started: the server never sees an id
    /// lower than one it already has in the same session. Returns the new
    /// offset.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) -> i32 {
        self.update_time_offset_at(correct_msg_id, now())
    }

    pub fn update_time_offset_at(&mut self, correct_msg_id: i64, now: Duration) -> i32 {
        let server_secs = correct_msg_id >> 32;
        let old = self.time_offset;
        self.time_offset = (server_secs - now.as_secs() as i64) as i32;
        if old != self.time_offset {
            log::info!("[tether] clock offset corrected: {old}s -> {}s", self.time_offset);
        }
        self.last_msg_id = 0;
        self.reset();
        self.time_offset
    }

    /// Start a new server-side session: fresh id and sequence counter.
    ///
    /// Salt, clock offset and the last message id carry over.
    pub fn reset(&mut self) {
        self.previous_session_id = Some(self.session_id);
        self.session_id = random_i64();
        self.sequence = 0;
    }
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}
