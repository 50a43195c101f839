use std::time::Duration;

use tether_mtproto::{Message, Session};

#[test]
fn session_seq_no_increments() {
    let mut s = Session::new();
    let a = s.next_seq_no(true);
    let b = s.next_seq_no(true);
    assert!(a & 1 == 1, "content-related seq_no must be odd");
    assert!(b & 1 == 1);
    assert_eq!(b, a + 2);
}

#[test]
fn session_unrelated_seq_no_is_even_and_stable() {
    let mut s = Session::new();
    s.next_seq_no(true);
    let n = s.next_seq_no(false);
    assert_eq!(n, 2);
    assert_eq!(s.next_seq_no(false), 2, "unrelated messages must not advance the counter");
    assert_eq!(s.next_seq_no(true), 3);
}

#[test]
fn msg_ids_survive_clock_rollback() {
    let mut s = Session::new();
    let t0 = Duration::from_secs(1_700_000_000) + Duration::from_millis(500);
    let mut last = 0;
    for i in 0..50 {
        let id = s.new_msg_id_at(t0 + Duration::from_millis(i));
        assert!(id > last);
        assert_eq!(id % 4, 0);
        last = id;
    }
    // Clock jumps back a full minute.
    for i in 0..50 {
        let id = s.new_msg_id_at(t0 - Duration::from_secs(60) + Duration::from_millis(i));
        assert!(id > last, "msg_id went backwards after clock rollback");
        assert_eq!(id % 4, 0);
        last = id;
    }
}

#[test]
fn msg_id_high_bits_follow_corrected_clock() {
    let mut s = Session::new();
    s.set_time_offset(-100);
    let id = s.new_msg_id_at(Duration::from_secs(1_700_000_000));
    assert_eq!(id >> 32, 1_700_000_000 - 100);
}

#[test]
fn time_offset_update_moves_ids_to_server_time() {
    let mut s = Session::new();
    let now = Duration::from_secs(1_700_000_000);
    s.set_time_offset(600);
    s.next_seq_no(true);
    let old_session = s.session_id();
    let before = s.new_msg_id_at(now);
    assert_eq!(before >> 32, 1_700_000_600);

    // Our offset claims we are 10 minutes ahead; the server is 30 s behind us.
    let server_msg_id = (1_699_999_970i64) << 32;
    assert_eq!(s.update_time_offset_at(server_msg_id, now), -30);

    let after = s.new_msg_id_at(now);
    assert_eq!(after >> 32, 1_699_999_970);
    assert_eq!(after % 4, 0);
    assert_ne!(s.session_id(), old_session);
    assert_eq!(s.previous_session_id(), Some(old_session));
    assert_eq!(s.next_seq_no(true), 1);
}

#[test]
fn reset_starts_a_new_session() {
    let mut s = Session::with_state(99, 5);
    s.next_seq_no(true);
    let id = s.session_id();
    s.reset();
    assert_ne!(s.session_id(), id);
    assert_eq!(s.previous_session_id(), Some(id));
    assert_eq!(s.next_seq_no(true), 1);
    assert_eq!(s.salt(), 99);
    assert_eq!(s.time_offset(), 5);
}

#[test]
fn sequence_correction_is_clamped() {
    let mut s = Session::new();
    s.correct_sequence(64);
    assert_eq!(s.next_seq_no(true), 129);
    s.correct_sequence(-1000);
    assert_eq!(s.next_seq_no(false), 0);
}

#[test]
fn message_plaintext_bytes_layout() {
    let mut s = Session::new();
    let id = s.new_msg_id();
    let msg = Message::plaintext(id, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    let wire = msg.to_plaintext_bytes();

    // auth_key_id (8 bytes) + msg_id (8 bytes) + length (4 bytes) + body
    assert_eq!(wire.len(), 8 + 8 + 4 + 4);
    assert_eq!(&wire[..8], &[0u8; 8]);
    assert_eq!(u32::from_le_bytes(wire[16..20].try_into().unwrap()), 4);
    assert_eq!(&wire[20..], &[0xAA, 0xBB, 0xCC, 0xDD]);
}
