//! End-to-end behaviour of `Sender` against a scripted loopback server.

mod common;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use common::{
    Incoming, PATIENCE, Peer, SEEDED_KEY, Server, config, ping_id, pong, rpc_result, seeded_backend,
    skewed_backend, unix_secs,
};
use tether_sender::{
    InMemoryBackend, InvocationError, MAX_RESYNC_RETRIES, PersistedSession, RequestOptions, Sender,
    SenderState, SessionBackend, UpdateStream,
};
use tether_tl::{Serializable, enums, functions, types};

type PingResult = Result<enums::Pong, InvocationError>;

async fn connect_seeded(server: &Server) -> (Sender, UpdateStream) {
    let backend = seeded_backend(server.port());
    timeout(PATIENCE, Sender::connect(config(server.port(), backend)))
        .await
        .unwrap()
        .unwrap()
}

fn spawn_ping(sender: &Sender, ping_id: i64) -> JoinHandle<PingResult> {
    let sender = sender.clone();
    tokio::spawn(async move { sender.invoke(&functions::Ping { ping_id }).await })
}

async fn answer(peer: &mut Peer, msgs: &[Incoming]) {
    for m in msgs {
        peer.reply(m.msg_id, &pong(m.msg_id, ping_id(m))).await;
    }
}

async fn outcome(call: JoinHandle<PingResult>) -> PingResult {
    timeout(PATIENCE, call).await.expect("call never finished").unwrap()
}

fn pong_id(result: PingResult) -> i64 {
    let enums::Pong::Pong(pong) = result.unwrap();
    pong.ping_id
}

async fn wait_for_state(sender: &Sender, want: SenderState) {
    let mut rx = sender.watch_state();
    timeout(PATIENCE, rx.wait_for(|s| *s == want)).await.unwrap().unwrap();
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

#[tokio::test]
async fn ping_gets_its_pong() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;
    assert_eq!(sender.state(), SenderState::Connected);

    let call = spawn_ping(&sender, 42);
    let msgs = peer.recv().await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(ping_id(&msgs[0]), 42);
    assert_eq!(peer.last_salt, 0x0102_0304);
    answer(&mut peer, &msgs).await;

    assert_eq!(pong_id(outcome(call).await), 42);
}

#[tokio::test]
async fn replies_inside_a_container_reach_their_callers() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let first = spawn_ping(&sender, 1);
    let second = spawn_ping(&sender, 2);
    let msgs = peer.recv_n(2).await;

    let mut messages = Vec::new();
    for (i, m) in msgs.iter().rev().enumerate() {
        messages.push(types::ContainerMessage {
            msg_id: peer.next_msg_id(),
            seqno:  i as i32 * 2 + 1,
            body:   rpc_result(m.msg_id, &pong(m.msg_id, ping_id(m))),
        });
    }
    let container = types::MsgContainer { messages }.to_bytes();
    let id = peer.next_msg_id();
    peer.send_message(id, 0, &container).await;

    assert_eq!(pong_id(outcome(first).await), 1);
    assert_eq!(pong_id(outcome(second).await), 2);
}

#[tokio::test]
async fn gzip_packed_message_is_inflated() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 8);
    let m = peer.recv().await.remove(0);
    let inner = rpc_result(m.msg_id, &pong(m.msg_id, 8));
    peer.send(&types::GzipPacked { packed_data: gzip(&inner) }.to_bytes()).await;

    assert_eq!(pong_id(outcome(call).await), 8);
}

#[tokio::test]
async fn rpc_error_reaches_the_caller() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 3);
    let m = peer.recv().await.remove(0);
    let error = types::RpcError { error_code: 420, error_message: "FLOOD_WAIT_3".into() }.to_bytes();
    peer.reply(m.msg_id, &error).await;

    let err = outcome(call).await.unwrap_err();
    assert!(err.is("FLOOD_WAIT"));
    assert_eq!(err.flood_wait_seconds(), Some(3));
}

#[tokio::test]
async fn bad_server_salt_resends_with_the_new_salt() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 5);
    let first = peer.recv().await.remove(0);
    let bad = types::BadServerSalt {
        bad_msg_id:      first.msg_id,
        bad_msg_seqno:   first.seq_no,
        error_code:      48,
        new_server_salt: 0x7777,
    };
    peer.send(&bad.to_bytes()).await;

    let again = peer.recv().await;
    assert_eq!(again.len(), 1);
    assert_ne!(again[0].msg_id, first.msg_id);
    assert_eq!(ping_id(&again[0]), 5);
    assert_eq!(peer.last_salt, 0x7777);
    answer(&mut peer, &again).await;

    assert_eq!(pong_id(outcome(call).await), 5);
}

#[tokio::test]
async fn low_seq_no_is_corrected_and_resent() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 6);
    let first = peer.recv().await.remove(0);
    let bad = types::BadMsgNotification { bad_msg_id: first.msg_id, bad_msg_seqno: first.seq_no, error_code: 32 };
    peer.send(&bad.to_bytes()).await;

    let again = peer.recv().await;
    assert_eq!(ping_id(&again[0]), 6);
    assert!(again[0].seq_no >= first.seq_no + 64, "{} -> {}", first.seq_no, again[0].seq_no);
    answer(&mut peer, &again).await;

    assert_eq!(pong_id(outcome(call).await), 6);
}

#[tokio::test]
async fn unfixable_bad_msg_fails_the_request() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 7);
    let first = peer.recv().await.remove(0);
    let bad = types::BadMsgNotification { bad_msg_id: first.msg_id, bad_msg_seqno: first.seq_no, error_code: 64 };
    peer.send(&bad.to_bytes()).await;

    assert!(matches!(outcome(call).await, Err(InvocationError::BadMessage { code: 64 })));
}

async fn connect_skewed(server: &Server, time_offset: i32) -> (Sender, UpdateStream) {
    let backend = skewed_backend(server.port(), time_offset);
    timeout(PATIENCE, Sender::connect(config(server.port(), backend)))
        .await
        .unwrap()
        .unwrap()
}

fn bad_msg(m: &Incoming, error_code: i32) -> Vec<u8> {
    types::BadMsgNotification { bad_msg_id: m.msg_id, bad_msg_seqno: m.seq_no, error_code }.to_bytes()
}

/// Seconds between the time encoded in `msg_id` and the local clock.
fn skew(msg_id: i64) -> i64 {
    (msg_id >> 32) - unix_secs()
}

/// Start with a clock `offset` seconds off, get `code`, and check the
/// resend carries server time in a fresh session.
async fn clock_is_resynced(offset: i32, code: i32) {
    let server = Server::bind().await;
    let (sender, _updates) = connect_skewed(&server, offset).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, code as i64);
    let first = peer.recv().await.remove(0);
    assert!((skew(first.msg_id) - offset as i64).abs() <= 2, "first id is {}s off", skew(first.msg_id));
    let old_session = peer.session_id;
    peer.send(&bad_msg(&first, code)).await;

    let again = peer.recv().await;
    assert_eq!(again.len(), 1);
    assert_eq!(ping_id(&again[0]), code as i64);
    assert!(skew(again[0].msg_id).abs() <= 2, "resent id is {}s off", skew(again[0].msg_id));
    assert_ne!(peer.session_id, old_session);
    answer(&mut peer, &again).await;

    assert_eq!(pong_id(outcome(call).await), code as i64);
    assert!(sender.snapshot().await.unwrap().time_offset.abs() <= 2);
}

#[tokio::test]
async fn msg_id_too_low_is_corrected_and_resent() {
    clock_is_resynced(-600, 16).await;
}

#[tokio::test]
async fn msg_id_too_high_is_corrected_and_resent() {
    clock_is_resynced(600, 17).await;
}

#[tokio::test]
async fn reply_in_the_replaced_session_still_arrives() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_skewed(&server, 600).await;
    let mut peer = server.accept_seeded().await;

    let early = spawn_ping(&sender, 1);
    let early_msg = peer.recv().await.remove(0);
    let old_session = peer.session_id;

    let late = spawn_ping(&sender, 2);
    let late_msg = peer.recv().await.remove(0);
    peer.send(&bad_msg(&late_msg, 17)).await;
    let again = peer.recv().await;
    assert_eq!(ping_id(&again[0]), 2);

    // Answer the untouched request in the session it was sent in.
    let new_session = peer.session_id;
    peer.session_id = old_session;
    answer(&mut peer, &[early_msg]).await;
    peer.session_id = new_session;
    answer(&mut peer, &again).await;

    assert_eq!(pong_id(outcome(early).await), 1);
    assert_eq!(pong_id(outcome(late).await), 2);
    assert_eq!(sender.state(), SenderState::Connected);
}

#[tokio::test]
async fn repeated_bad_msgs_give_up_after_the_retry_limit() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 19);
    let mut last = peer.recv().await.remove(0);
    for _ in 0..MAX_RESYNC_RETRIES {
        peer.send(&bad_msg(&last, 16)).await;
        last = peer.recv().await.remove(0);
        assert_eq!(ping_id(&last), 19);
    }
    peer.send(&bad_msg(&last, 16)).await;

    assert!(matches!(outcome(call).await, Err(InvocationError::BadMessage { code: 16 })));
}

#[tokio::test]
async fn unknown_constructors_go_to_the_update_stream() {
    let server = Server::bind().await;
    let (sender, mut updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 9);
    let msgs = peer.recv().await;
    let update = vec![0x11, 0x22, 0x33, 0x44, 1, 0, 0, 0];
    peer.send(&update).await;
    answer(&mut peer, &msgs).await;

    assert_eq!(pong_id(outcome(call).await), 9);
    assert_eq!(timeout(PATIENCE, updates.next()).await.unwrap(), Some(update));
}

#[tokio::test]
async fn late_reply_to_a_dropped_request_is_ignored() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let gave_up = timeout(Duration::from_millis(100), sender.invoke(&functions::Ping { ping_id: 1 })).await;
    assert!(gave_up.is_err());

    let call = spawn_ping(&sender, 2);
    loop {
        let msgs = peer.recv().await;
        answer(&mut peer, &msgs).await;
        if msgs.iter().any(|m| ping_id(m) == 2) {
            break;
        }
    }
    assert_eq!(pong_id(outcome(call).await), 2);
}

#[tokio::test]
async fn in_flight_request_is_resent_after_reconnect() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 11);
    let first = peer.recv().await;
    assert_eq!(ping_id(&first[0]), 11);
    let old_session = peer.session_id;
    drop(peer);

    let mut peer = server.accept_seeded().await;
    let again = peer.recv().await;
    assert_eq!(ping_id(&again[0]), 11);
    assert_ne!(peer.session_id, old_session);
    answer(&mut peer, &again).await;

    assert_eq!(pong_id(outcome(call).await), 11);
    assert_eq!(sender.state(), SenderState::Connected);
}

#[tokio::test]
async fn request_not_marked_for_resend_fails_on_disconnect() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let peer_task = {
        let mut peer = server.accept_seeded().await;
        tokio::spawn(async move {
            peer.recv().await;
        })
    };

    let body = functions::Ping { ping_id: 12 }.to_bytes();
    let options = RequestOptions { resend_on_reconnect: false };
    let result = timeout(PATIENCE, sender.invoke_with(body, options)).await.unwrap();
    assert!(matches!(result, Err(InvocationError::ConnectionLost)));
    peer_task.await.unwrap();
}

#[tokio::test]
async fn giving_up_on_reconnect_fails_everything() {
    let server = Server::bind().await;
    let port = server.port();
    let mut cfg = config(port, seeded_backend(port));
    cfg.reconnect.max_attempts = 1;
    let (sender, _updates) = timeout(PATIENCE, Sender::connect(cfg)).await.unwrap().unwrap();
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 13);
    peer.recv().await;
    drop(peer);
    drop(server);

    assert!(matches!(outcome(call).await, Err(InvocationError::ConnectionLost)));
    wait_for_state(&sender, SenderState::Disconnected).await;
    assert!(matches!(
        sender.invoke(&functions::Ping { ping_id: 14 }).await,
        Err(InvocationError::Dropped)
    ));
}

#[tokio::test]
async fn disconnect_fails_pending_requests() {
    let server = Server::bind().await;
    let (sender, _updates) = connect_seeded(&server).await;
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 15);
    peer.recv().await;
    sender.disconnect();

    assert!(matches!(outcome(call).await, Err(InvocationError::Dropped)));
    wait_for_state(&sender, SenderState::Disconnected).await;
    assert!(peer.try_recv().await.is_none());
}

#[tokio::test]
async fn first_connect_negotiates_and_saves_a_key() {
    let server = Server::bind().await;
    let port = server.port();
    let backend = Arc::new(InMemoryBackend::new());

    let server_side = tokio::spawn(async move {
        let mut peer = server.accept(None).await;
        let key = peer.handshake().await;
        let msgs = peer.recv().await;
        answer(&mut peer, &msgs).await;
        (key, peer)
    });

    let (sender, _updates) = timeout(PATIENCE, Sender::connect(config(port, backend.clone())))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pong_id(outcome(spawn_ping(&sender, 21)).await), 21);

    let (key, _peer) = server_side.await.unwrap();
    let stored = backend.load().unwrap().unwrap();
    assert_eq!(stored.dc_id, common::DC_ID);
    assert_eq!(stored.auth_key, Some(key.to_bytes()));
    assert_eq!(sender.snapshot().await.unwrap().auth_key, Some(key.to_bytes()));
}

#[tokio::test]
async fn unknown_key_status_renegotiates() {
    let server = Server::bind().await;
    let port = server.port();
    let backend = seeded_backend(port);
    let (sender, _updates) = timeout(PATIENCE, Sender::connect(config(port, backend.clone())))
        .await
        .unwrap()
        .unwrap();
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 31);
    peer.recv().await;
    peer.send_status(-404).await;

    let mut fresh = server.accept(None).await;
    let key = fresh.handshake().await;
    let again = fresh.recv().await;
    assert_eq!(ping_id(&again[0]), 31);
    answer(&mut fresh, &again).await;

    assert_eq!(pong_id(outcome(call).await), 31);
    let stored = backend.load().unwrap().unwrap().auth_key.unwrap();
    assert_eq!(stored, key.to_bytes());
    assert_ne!(stored, SEEDED_KEY);
}

#[tokio::test]
async fn save_session_writes_the_current_salt() {
    let server = Server::bind().await;
    let port = server.port();
    let backend = seeded_backend(port);
    let (sender, _updates) = timeout(PATIENCE, Sender::connect(config(port, backend.clone())))
        .await
        .unwrap()
        .unwrap();
    let mut peer = server.accept_seeded().await;

    let call = spawn_ping(&sender, 41);
    let first = peer.recv().await.remove(0);
    let bad = types::BadServerSalt {
        bad_msg_id:      first.msg_id,
        bad_msg_seqno:   first.seq_no,
        error_code:      48,
        new_server_salt: 0x4242,
    };
    peer.send(&bad.to_bytes()).await;
    let again = peer.recv().await;
    answer(&mut peer, &again).await;
    outcome(call).await.unwrap();

    sender.save_session().await.unwrap();
    let stored = backend.load().unwrap().unwrap();
    assert_eq!(stored.salt, 0x4242);
    assert_eq!(stored.auth_key, Some(SEEDED_KEY));
}

#[derive(Default)]
struct ThreadRecordingBackend {
    inner:    InMemoryBackend,
    saved_on: Mutex<Vec<ThreadId>>,
}

impl SessionBackend for ThreadRecordingBackend {
    fn save(&self, session: &PersistedSession) -> io::Result<()> {
        self.saved_on.lock().unwrap().push(std::thread::current().id());
        self.inner.save(session)
    }

    fn load(&self) -> io::Result<Option<PersistedSession>> {
        self.inner.load()
    }

    fn delete(&self) -> io::Result<()> {
        self.inner.delete()
    }

    fn name(&self) -> &str {
        "thread-recording"
    }
}

#[tokio::test]
async fn session_writes_run_off_the_runtime_thread() {
    let server = Server::bind().await;
    let port = server.port();
    let backend = Arc::new(ThreadRecordingBackend::default());

    let server_side = tokio::spawn(async move {
        let mut peer = server.accept(None).await;
        peer.handshake().await;
        peer
    });
    let (sender, _updates) = timeout(PATIENCE, Sender::connect(config(port, backend.clone())))
        .await
        .unwrap()
        .unwrap();
    let _peer = server_side.await.unwrap();
    sender.save_session().await.unwrap();

    let runtime_thread = std::thread::current().id();
    let saved_on = backend.saved_on.lock().unwrap();
    assert_eq!(saved_on.len(), 2);
    assert!(saved_on.iter().all(|t| *t != runtime_thread));
    assert!(backend.load().unwrap().unwrap().auth_key.is_some());
}
