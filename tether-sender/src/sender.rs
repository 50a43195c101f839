//! The request/response engine.
//!
//! [`Sender`] is a cheap, cloneable handle. All protocol state (the encrypted
//! session, the outgoing queue, requests awaiting a reply) lives in one driver
//! task, so it is never shared or locked. Handles talk to the driver over an
//! unbounded channel and wait on a oneshot for their reply.

use std::collections::HashMap;
use std::io::Read;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tether_crypto::AuthKey;
use tether_crypto::rsa::KeyStore;
use tether_mtproto::authentication::{self, Finished};
use tether_mtproto::packer::{MessagePacker, Packable, Popped};
use tether_mtproto::transport::status_code;
use tether_mtproto::{EncryptedSession, Message, Session};
use tether_tl::{Deserializable, Identifiable, RemoteCall, Serializable, enums, functions, types};

use crate::connection::Connection;
use crate::errors::{ConnectionError, InvocationError, RpcError};
use crate::retry::{RetryContext, RetryPolicy};
use crate::session_backend::PersistedSession;
use crate::{Config, RequestOptions};

/// How many times one request is resent after `bad_msg_notification` or
/// `bad_server_salt` before it fails with [`InvocationError::BadMessage`].
pub const MAX_RESYNC_RETRIES: u32 = 5;

/// Transport status for an auth key the server does not know.
const STATUS_UNKNOWN_KEY: i32 = -404;

/// `bad_server_salt` reuses the `bad_msg_notification` code space.
const CODE_BAD_SALT: i32 = 48;

type Reply = Result<Vec<u8>, InvocationError>;

// ─── State ────────────────────────────────────────────────────────────────────

/// Connection state, observable through [`Sender::watch_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderState {
    Disconnected,
    Connecting,
    /// Negotiating a new auth key.
    Authenticating,
    Connected,
    /// Waiting before, or performing, reconnection attempt `attempt`.
    Reconnecting { attempt: u32 },
}

// ─── Queued work ──────────────────────────────────────────────────────────────

enum Origin {
    Caller { handle: u64, tx: oneshot::Sender<Reply>, options: RequestOptions },
    Ping,
    Ack,
}

struct Job {
    body:    Vec<u8>,
    origin:  Origin,
    resyncs: u32,
}

impl Job {
    fn new(body: Vec<u8>, origin: Origin) -> Self {
        Self { body, origin, resyncs: 0 }
    }

    fn handle(&self) -> Option<u64> {
        match self.origin {
            Origin::Caller { handle, .. } => Some(handle),
            _ => None,
        }
    }

    fn awaits_reply(&self) -> bool {
        !matches!(self.origin, Origin::Ack)
    }

    fn resolve(self, reply: Reply) {
        match self.origin {
            Origin::Caller { tx, .. } => {
                let _ = tx.send(reply);
            }
            Origin::Ping => tracing::trace!("pong"),
            Origin::Ack => {}
        }
    }

    fn fail(self, error: InvocationError) {
        self.resolve(Err(error));
    }
}

impl Packable for Job {
    fn body(&self) -> &[u8] { &self.body }

    fn content_related(&self) -> bool { self.awaits_reply() }

    fn is_cancelled(&self) -> bool {
        matches!(&self.origin, Origin::Caller { tx, .. } if tx.is_closed())
    }
}

/// A job on the wire, waiting for its reply.
struct Sent {
    job:          Job,
    container_id: Option<i64>,
}

enum Command {
    Invoke { handle: u64, body: Vec<u8>, options: RequestOptions, tx: oneshot::Sender<Reply> },
    Cancel(u64),
    Snapshot(oneshot::Sender<PersistedSession>),
    Save(oneshot::Sender<Result<(), InvocationError>>),
}

// ─── Sender ───────────────────────────────────────────────────────────────────

/// Handle to a running MTProto session.
///
/// Clones share the same connection. The session shuts down when
/// [`disconnect`](Self::disconnect) is called or every clone is dropped.
#[derive(Clone)]
pub struct Sender {
    commands:    mpsc::UnboundedSender<Command>,
    state:       watch::Receiver<SenderState>,
    shutdown:    CancellationToken,
    next_handle: Arc<AtomicU64>,
}

/// Server messages the protocol layer does not consume itself, still
/// serialized.
pub struct UpdateStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl UpdateStream {
    /// Next update, or `None` once the sender has shut down.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Sender {
    /// Connect, negotiating an auth key if the session backend has none, and
    /// start serving requests.
    ///
    /// Returns once the session is usable, or with the first error.
    pub async fn connect(config: Config) -> Result<(Self, UpdateStream), InvocationError> {
        config.validate()?;
        let enc = load_session(&config)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SenderState::Disconnected);
        let shutdown = CancellationToken::new();

        let mut driver = Driver {
            config,
            enc,
            packer:   MessagePacker::new(),
            sent:     HashMap::new(),
            acks:     Vec::new(),
            commands: command_rx,
            updates:  update_tx,
            state:    state_tx,
            shutdown: shutdown.clone(),
        };

        driver.set_state(SenderState::Connecting);
        let conn = match driver.establish().await {
            Ok(conn) => conn,
            Err(e) => {
                driver.set_state(SenderState::Disconnected);
                return Err(e);
            }
        };
        tokio::spawn(driver.run(conn));

        let sender = Self {
            commands:    command_tx,
            state:       state_rx,
            shutdown,
            next_handle: Arc::new(AtomicU64::new(1)),
        };
        Ok((sender, UpdateStream { rx: update_rx }))
    }

    /// Send a typed request and deserialize its reply.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.invoke_raw(request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Send an already-serialized request and return the raw reply.
    pub async fn invoke_raw(&self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        self.invoke_with(body, RequestOptions::default()).await
    }

    /// Like [`invoke_raw`](Self::invoke_raw) with explicit options.
    ///
    /// Dropping the returned future cancels the request: it is taken off the
    /// queue if still there, and a late reply is discarded.
    pub async fn invoke_with(&self, body: Vec<u8>, options: RequestOptions) -> Result<Vec<u8>, InvocationError> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Invoke { handle, body, options, tx })
            .map_err(|_| InvocationError::Dropped)?;

        let mut guard = CancelOnDrop { commands: &self.commands, handle: Some(handle) };
        let reply = rx.await.unwrap_or(Err(InvocationError::Dropped));
        guard.handle = None;
        reply
    }

    /// [`invoke`](Self::invoke), retried for as long as `policy` says so.
    pub async fn invoke_with_retry<R: RemoteCall>(
        &self,
        request: &R,
        policy:  &dyn RetryPolicy,
    ) -> Result<R::Return, InvocationError> {
        let mut fail_count = NonZeroU32::MIN;
        let mut slept_so_far = std::time::Duration::ZERO;
        loop {
            let error = match self.invoke(request).await {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };
            let ctx = RetryContext { fail_count, slept_so_far, error };
            match policy.should_retry(&ctx) {
                ControlFlow::Continue(delay) => {
                    tokio::time::sleep(delay).await;
                    slept_so_far += delay;
                    fail_count = fail_count.saturating_add(1);
                }
                ControlFlow::Break(()) => return Err(ctx.error),
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> SenderState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SenderState> {
        self.state.clone()
    }

    /// The session as it would be persisted right now.
    pub async fn snapshot(&self) -> Result<PersistedSession, InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).map_err(|_| InvocationError::Dropped)?;
        rx.await.map_err(|_| InvocationError::Dropped)
    }

    /// Write the current key, salt and clock offset to the session backend.
    pub async fn save_session(&self) -> Result<(), InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Save(tx)).map_err(|_| InvocationError::Dropped)?;
        rx.await.map_err(|_| InvocationError::Dropped)?
    }

    /// Shut the session down. Outstanding requests fail with
    /// [`InvocationError::Dropped`]. Calling this more than once is harmless.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }
}

struct CancelOnDrop<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    handle:   Option<u64>,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(Command::Cancel(handle));
        }
    }
}

fn load_session(config: &Config) -> Result<Option<EncryptedSession>, InvocationError> {
    let stored = config.session_backend.load().map_err(InvocationError::Storage)?;
    Ok(match stored {
        Some(s) if s.dc_id == config.dc_id => {
            tracing::debug!("loaded session for DC {} from {}", s.dc_id, config.session_backend.name());
            s.auth_key
                .map(|key| EncryptedSession::new(AuthKey::from_bytes(key), s.salt, s.time_offset))
        }
        Some(s) => {
            tracing::warn!("stored session is for DC {}, not DC {}; ignoring it", s.dc_id, config.dc_id);
            None
        }
        None => None,
    })
}

// ─── Handshake ────────────────────────────────────────────────────────────────

async fn negotiate(conn: &mut Connection, keys: Arc<KeyStore>) -> Result<Finished, InvocationError> {
    let mut plain = Session::new();

    let (request, step1) = authentication::step1()?;
    let res_pq = plain_call(conn, &mut plain, &request).await?;

    let (request, step2) = blocking(move || authentication::step2(step1, res_pq, &keys)).await?;
    let dh_params = plain_call(conn, &mut plain, &request).await?;

    let (request, step3) = blocking(move || authentication::step3(step2, dh_params)).await?;
    let answer = plain_call(conn, &mut plain, &request).await?;

    let done = authentication::finish(step3, answer)?;
    tracing::info!("auth key negotiated, clock offset {}s", done.time_offset);
    Ok(done)
}

/// Run handshake math off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, InvocationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, authentication::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|_| InvocationError::Dropped)?.map_err(Into::into)
}

async fn plain_call<R: RemoteCall>(
    conn:    &mut Connection,
    session: &mut Session,
    request: &R,
) -> Result<R::Return, InvocationError> {
    let message = Message::plaintext(session.new_msg_id(), request.to_bytes());
    conn.send(message.to_plaintext_bytes())?;
    let frame = conn.recv().await?;
    if let Some(code) = status_code(&frame) {
        return Err(ConnectionError::Status { code }.into());
    }
    let reply = Message::from_plaintext_bytes(&frame)?;
    Ok(R::Return::from_bytes(&reply.body)?)
}

// ─── Driver ───────────────────────────────────────────────────────────────────

enum Exit {
    Shutdown,
    Lost(InvocationError),
}

struct Driver {
    config:   Config,
    /// `None` until a key exists, and again after the server forgets it.
    enc:      Option<EncryptedSession>,
    packer:   MessagePacker<Job>,
    sent:     HashMap<i64, Sent>,
    /// Server messages to acknowledge in the next batch.
    acks:     Vec<i64>,
    commands: mpsc::UnboundedReceiver<Command>,
    updates:  mpsc::UnboundedSender<Vec<u8>>,
    state:    watch::Sender<SenderState>,
    shutdown: CancellationToken,
}

impl Driver {
    fn set_state(&self, state: SenderState) {
        let old = self.state.send_replace(state);
        if old != state {
            tracing::debug!("state: {old:?} -> {state:?}");
        }
    }

    /// Open a connection and make sure it has a usable encrypted session.
    async fn establish(&mut self) -> Result<Connection, InvocationError> {
        let cfg = &self.config;
        let mut conn = Connection::connect(
            &cfg.server_address,
            cfg.port,
            cfg.transport,
            cfg.obfuscation,
            cfg.connect_timeout,
        )
        .await?;

        if let Some(enc) = self.enc.as_mut() {
            enc.session.reset();
        } else {
            self.set_state(SenderState::Authenticating);
            let keys = Arc::clone(&self.config.rsa_keys);
            let done = tokio::time::timeout(self.config.handshake_timeout, negotiate(&mut conn, keys))
                .await
                .map_err(|_| InvocationError::Timeout)??;
            self.enc = Some(EncryptedSession::new(done.auth_key, done.first_salt, done.time_offset));
            if let Err(e) = self.persist().await {
                tracing::warn!("could not save the new auth key: {e}");
            }
        }

        self.set_state(SenderState::Connected);
        Ok(conn)
    }

    async fn run(mut self, mut conn: Connection) {
        loop {
            let error = match self.serve(&mut conn).await {
                Exit::Shutdown => break,
                Exit::Lost(e) => e,
            };
            conn.disconnect();
            tracing::warn!("connection lost: {error}");
            self.requeue_after_disconnect();

            match self.reconnect().await {
                Some(c) => conn = c,
                None if self.shutdown.is_cancelled() => break,
                None => {
                    tracing::error!("giving up after {} reconnection attempts", self.config.reconnect.max_attempts);
                    self.fail_all(|| InvocationError::ConnectionLost);
                    self.set_state(SenderState::Disconnected);
                    return;
                }
            }
        }

        conn.disconnect();
        self.fail_all(|| InvocationError::Dropped);
        self.set_state(SenderState::Disconnected);
    }

    async fn reconnect(&mut self) -> Option<Connection> {
        let policy = self.config.reconnect.clone();
        for attempt in 1..=policy.max_attempts {
            self.set_state(SenderState::Reconnecting { attempt });
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(policy.delay(attempt)) => {}
            }
            match self.establish().await {
                Ok(conn) => {
                    tracing::info!("reconnected on attempt {attempt}");
                    return Some(conn);
                }
                Err(e) => tracing::warn!("reconnection attempt {attempt} failed: {e}"),
            }
        }
        None
    }

    async fn serve(&mut self, conn: &mut Connection) -> Exit {
        let period = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Err(e) = self.flush(conn) {
                return Exit::Lost(e.into());
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Exit::Shutdown,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.on_command(command);
                        // Drain whatever else is ready so it shares a container.
                        while let Ok(command) = self.commands.try_recv() {
                            self.on_command(command);
                        }
                    }
                    None => return Exit::Shutdown,
                },
                frame = conn.recv() => match frame {
                    Ok(frame) => {
                        if let Err(e) = self.on_frame(&frame) {
                            return Exit::Lost(e);
                        }
                    }
                    Err(e) => return Exit::Lost(e.into()),
                },
                _ = ping.tick() => self.enqueue_ping(),
            }
        }
    }

    /// Pack and send everything queued.
    fn flush(&mut self, conn: &Connection) -> Result<(), ConnectionError> {
        let Some(enc) = self.enc.as_mut() else { return Ok(()) };

        if !self.acks.is_empty() {
            let ack = types::MsgsAck { msg_ids: std::mem::take(&mut self.acks) };
            self.packer.push(Job::new(ack.to_bytes(), Origin::Ack));
        }

        loop {
            let Popped { batch, rejected } = self.packer.pop_batch(&mut enc.session);
            for job in rejected {
                let len = job.body.len();
                job.fail(InvocationError::TooLarge { len });
            }
            let Some(batch) = batch else { break };

            let container_id = batch.container_id;
            for packed in batch.items {
                if packed.item.awaits_reply() {
                    self.sent.insert(packed.msg_id, Sent { job: packed.item, container_id });
                }
            }
            tracing::trace!("sending message {:#x} ({} bytes)", batch.message.id, batch.message.body.len());
            conn.send(enc.encrypt(&batch.message))?;
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Invoke { handle, body, options, tx } => {
                self.packer.push(Job::new(body, Origin::Caller { handle, tx, options }));
            }
            Command::Cancel(handle) => {
                let queued = self.packer.take_where(|job| job.handle() == Some(handle)).len();
                let before = self.sent.len();
                self.sent.retain(|_, sent| sent.job.handle() != Some(handle));
                tracing::debug!("request {handle} cancelled ({queued} queued, {} in flight)", before - self.sent.len());
            }
            Command::Snapshot(tx) => {
                let _ = tx.send(self.snapshot());
            }
            Command::Save(tx) => {
                let save = self.persist();
                tokio::spawn(async move {
                    let _ = tx.send(save.await.map_err(InvocationError::Storage));
                });
            }
        }
    }

    fn on_frame(&mut self, frame: &[u8]) -> Result<(), InvocationError> {
        if let Some(code) = status_code(frame) {
            if code == STATUS_UNKNOWN_KEY && self.enc.take().is_some() {
                tracing::warn!("server does not know our auth key; a new one will be negotiated");
                if let Err(e) = self.config.session_backend.delete() {
                    tracing::warn!("could not delete the stale session: {e}");
                }
            }
            return Err(ConnectionError::Status { code }.into());
        }

        let Some(enc) = self.enc.as_ref() else { return Ok(()) };
        let message = match enc.decrypt(frame) {
            Ok(message) => message,
            Err(e) if e.is_security() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("dropping undecryptable frame: {e}");
                return Ok(());
            }
        };
        self.handle_message(message.msg_id, message.seq_no, message.body);
        Ok(())
    }

    fn handle_message(&mut self, msg_id: i64, seq_no: i32, body: Vec<u8>) {
        if seq_no & 1 == 1 {
            self.acks.push(msg_id);
        }
        self.dispatch(msg_id, body);
    }

    fn dispatch(&mut self, msg_id: i64, body: Vec<u8>) {
        use enums::ServiceMessage as S;

        let message = match S::from_bytes(&body) {
            Ok(message) => message,
            Err(tether_tl::deserialize::Error::UnexpectedConstructor { id }) => {
                tracing::trace!("update {id:#010x} ({} bytes)", body.len());
                let _ = self.updates.send(body);
                return;
            }
            Err(e) => {
                tracing::warn!("dropping malformed message {msg_id:#x}: {e}");
                return;
            }
        };

        match message {
            S::RpcResult(result) => {
                let reply = unwrap_result(result.result);
                if let Err(InvocationError::Rpc(e)) = &reply {
                    tracing::debug!("request {:#x} failed: {e}", result.req_msg_id);
                }
                self.resolve(result.req_msg_id, reply);
            }
            S::MsgContainer(container) => {
                for inner in container.messages {
                    self.handle_message(inner.msg_id, inner.seqno, inner.body);
                }
            }
            S::GzipPacked(packed) => match gunzip(&packed.packed_data) {
                Ok(inner) => self.dispatch(msg_id, inner),
                Err(e) => tracing::warn!("dropping message {msg_id:#x}: {e}"),
            },
            S::Pong(pong) => self.resolve(pong.msg_id, Ok(body)),
            S::BadServerSalt(bad) => {
                tracing::info!("server salt changed; resending {:#x}", bad.bad_msg_id);
                if let Some(enc) = self.enc.as_mut() {
                    enc.session.set_salt(bad.new_server_salt);
                }
                let jobs = self.take_sent(bad.bad_msg_id);
                self.retry(jobs, CODE_BAD_SALT);
            }
            S::BadMsgNotification(bad) => self.on_bad_msg(msg_id, bad),
            S::NewSessionCreated(created) => {
                tracing::debug!("new session created, first message {:#x}", created.first_msg_id);
                if let Some(enc) = self.enc.as_mut() {
                    enc.session.set_salt(created.server_salt);
                }
            }
            S::MsgsAck(ack) => tracing::trace!("server acknowledged {:?}", ack.msg_ids),
            S::FutureSalts(salts) => self.resolve(salts.req_msg_id, Ok(body)),
            S::MsgDetailedInfo(info) => self.acks.push(info.answer_msg_id),
            S::MsgNewDetailedInfo(info) => self.acks.push(info.answer_msg_id),
            S::MsgsStateReq(req) => tracing::debug!("server asked for the state of {:?}", req.msg_ids),
            S::MsgResendReq(req) => tracing::debug!("server asked to resend {:?}", req.msg_ids),
        }
    }

    fn on_bad_msg(&mut self, server_msg_id: i64, bad: types::BadMsgNotification) {
        let code = bad.error_code;
        tracing::warn!("bad_msg_notification {code} for {:#x}", bad.bad_msg_id);
        let jobs = self.take_sent(bad.bad_msg_id);

        let Some(enc) = self.enc.as_mut() else { return };
        match code {
            // msg_id too low / too high: our clock is off. The correction
            // starts a new session; replies still due in the old one are
            // accepted.
            16 | 17 => {
                enc.session.update_time_offset(server_msg_id);
            }
            // seq_no too low / too high.
            32 => enc.session.correct_sequence(32),
            33 => enc.session.correct_sequence(-8),
            _ => {
                for job in jobs {
                    job.fail(InvocationError::BadMessage { code });
                }
                return;
            }
        }
        self.retry(jobs, code);
    }

    fn resolve(&mut self, msg_id: i64, reply: Reply) {
        match self.sent.remove(&msg_id) {
            Some(sent) => sent.job.resolve(reply),
            None => tracing::debug!("reply to unknown message {msg_id:#x}"),
        }
    }

    /// Remove the sent jobs carried by `msg_id`, either directly or inside the
    /// container with that id, oldest first.
    fn take_sent(&mut self, msg_id: i64) -> Vec<Job> {
        let mut ids: Vec<i64> = self
            .sent
            .iter()
            .filter(|(id, sent)| **id == msg_id || sent.container_id == Some(msg_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.sent.remove(&id)).map(|sent| sent.job).collect()
    }

    fn retry(&mut self, jobs: Vec<Job>, code: i32) {
        let mut again = Vec::with_capacity(jobs.len());
        for mut job in jobs {
            job.resyncs += 1;
            if job.resyncs > MAX_RESYNC_RETRIES {
                job.fail(InvocationError::BadMessage { code });
            } else {
                again.push(job);
            }
        }
        self.requeue(again);
    }

    /// Put `jobs` back at the front of the queue, keeping their order.
    fn requeue(&mut self, jobs: Vec<Job>) {
        for job in jobs.into_iter().rev() {
            self.packer.push_front(job);
        }
    }

    fn enqueue_ping(&mut self) {
        self.sent.retain(|_, sent| !matches!(sent.job.origin, Origin::Ping));
        let ping = functions::PingDelayDisconnect {
            ping_id:          i64::from_le_bytes(tether_crypto::random_array()),
            disconnect_delay: self.config.ping_interval.as_secs().saturating_add(15).min(i32::MAX as u64) as i32,
        };
        self.packer.push(Job::new(ping.to_bytes(), Origin::Ping));
    }

    /// Sort out in-flight work after the connection dropped: requests that may
    /// be resent go back on the queue, the rest fail.
    fn requeue_after_disconnect(&mut self) {
        self.acks.clear();
        self.packer.take_where(|job| !matches!(job.origin, Origin::Caller { .. }));

        let mut ids: Vec<i64> = self.sent.keys().copied().collect();
        ids.sort_unstable();
        let mut resend = Vec::new();
        for id in ids {
            let Some(Sent { job, .. }) = self.sent.remove(&id) else { continue };
            match &job.origin {
                Origin::Caller { options, .. } if options.resend_on_reconnect => resend.push(job),
                Origin::Caller { .. } => job.fail(InvocationError::ConnectionLost),
                _ => {}
            }
        }
        tracing::debug!("{} requests will be resent", resend.len());
        self.requeue(resend);
    }

    fn fail_all(&mut self, error: impl Fn() -> InvocationError) {
        for (_, sent) in self.sent.drain() {
            sent.job.fail(error());
        }
        for job in self.packer.drain() {
            job.fail(error());
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Invoke { tx, .. } = command {
                let _ = tx.send(Err(error()));
            }
        }
    }

    fn snapshot(&self) -> PersistedSession {
        PersistedSession {
            dc_id:          self.config.dc_id,
            server_address: self.config.server_address.clone(),
            port:           self.config.port,
            auth_key:       self.enc.as_ref().map(|enc| enc.auth_key().to_bytes()),
            salt:           self.enc.as_ref().map_or(0, |enc| enc.session.salt()),
            time_offset:    self.enc.as_ref().map_or(0, |enc| enc.session.time_offset()),
        }
    }

    /// Write the current session to the backend on the blocking pool.
    fn persist(&self) -> impl Future<Output = std::io::Result<()>> + Send + 'static {
        let backend = Arc::clone(&self.config.session_backend);
        let snapshot = self.snapshot();
        async move {
            tokio::task::spawn_blocking(move || backend.save(&snapshot))
                .await
                .map_err(std::io::Error::other)?
        }
    }
}

// ─── Envelope helpers ─────────────────────────────────────────────────────────

/// Turn the `result` of an `rpc_result` into the caller's reply.
fn unwrap_result(result: Vec<u8>) -> Reply {
    let id = match result.get(..4) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => return Ok(result),
    };
    if id == types::RpcError::CONSTRUCTOR_ID {
        let e = types::RpcError::from_bytes(&result[4..])?;
        Err(RpcError::from_telegram(e.error_code, &e.error_message).into())
    } else if id == types::GzipPacked::CONSTRUCTOR_ID {
        let packed = types::GzipPacked::from_bytes(&result[4..])?;
        unwrap_result(gunzip(&packed.packed_data)?)
    } else {
        Ok(result)
    }
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, InvocationError> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut out).map_err(InvocationError::Gzip)?;
    Ok(out)
}
