//! A scripted MTProto server over loopback TCP, speaking the Intermediate
//! transport.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use num_bigint::BigUint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tether_crypto::rsa::{Key, KeyStore};
use tether_crypto::{AuthKey, Side, aes, decrypt_data, encrypt_data, generate_key_data_from_nonce, sha1};
use tether_mtproto::Message;
use tether_mtproto::transport::{Intermediate, Transport};
use tether_sender::{
    Config, InMemoryBackend, PersistedSession, ReconnectPolicy, SessionBackend, TransportKind,
};
use tether_tl::{Cursor, Deserializable, Identifiable, Serializable, functions, types};

const DH_PRIME: &str = "c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c3720fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f642477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b";

const TEST_N: &str = "aae5de7b5f956415c636d2cc5c1ec61e6de2a45edf005f9777f1e88232d1642badd96943548e211f17cc5a48e7e32a78e18c178e74260beab60bf8827ee4f2d95a9cfee94c3e0bb6cde7a3cb5cc7200b98ee582b5fdf7dfea7583c16e4edc4e75a4d8a80fa36efe1c339c08a5e1c0bb4bd61ec575c1f6b5bd6e8b3e0d7d5f5c42f24d05fa5b0002c3f241944584d3e01e01c395e1809d5d7b5337ed39b249f96c855efcdd38fbd7dc0ed477ccd19728665b7ed814b546bcfac559c20af0b9e99a192e8c20b64be8cc32f816d4b065770937deb9a9b261178e2ea7055db2fc13870f137c85c0387a9b687bd85ecfd2ca83087513dc5d6769e81a2cf8545fb6545";
const TEST_D: &str = "2677d7bcada7530013be03753cc7309168eabb551f9d55e72278b17d9d32c4f990088049479f36956925f6acb285cfe9a5db82f1edf3227b92bedf1180bec86b649a3247118265e0a038a40602bc4fda4c725a26694e456e2cfd0f8997be6db425ff8e4dba04e3ba4dd7921f934f7cd3124e1885119780f30b4d16306665230cc7a2666ab008af9ec54034b70e458384d43178919f6215221a2819b98055b4262d84f41a4d4f5082f4bd429c211bfae06e8f4db85e3cd1a7f358084737dfade727b52dec3094f3d81bb52dd74f4a730ab7234713054b6f125968cb55944ac58b7e32cabc4144cd81948028e95a18639cd33be7c3294d1c0ebff28ae65101479";
const TEST_FINGERPRINT: i64 = 7039125139554388887;

const PQ: u64 = 1470626929934143021;
const INTERMEDIATE_TAG: [u8; 4] = [0xee; 4];

pub const SEEDED_KEY: [u8; 256] = [0x5a; 256];
pub const DC_ID: i32 = 2;

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(5);

fn hex(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 16).unwrap()
}

fn be(v: &BigUint, width: usize) -> Vec<u8> {
    let raw = v.to_bytes_be();
    let mut out = vec![0u8; width - raw.len()];
    out.extend(raw);
    out
}

fn unix_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap()
}

pub fn unix_secs() -> i64 {
    unix_now().as_secs() as i64
}

pub fn constructor_id(body: &[u8]) -> u32 {
    u32::from_le_bytes(body[..4].try_into().unwrap())
}

pub fn test_keys() -> KeyStore {
    KeyStore::new([Key::from_components(hex(TEST_N), BigUint::from(65537u32))])
}

/// A session backend that already holds [`SEEDED_KEY`].
pub fn seeded_backend(port: u16) -> Arc<InMemoryBackend> {
    skewed_backend(port, 0)
}

/// Like [`seeded_backend`], with a stored clock offset of `time_offset`
/// seconds.
pub fn skewed_backend(port: u16, time_offset: i32) -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::with_session(PersistedSession {
        dc_id:          DC_ID,
        server_address: "127.0.0.1".into(),
        port,
        auth_key:       Some(SEEDED_KEY),
        salt:           0x0102_0304,
        time_offset,
    }))
}

pub fn config(port: u16, backend: Arc<dyn SessionBackend>) -> Config {
    Config {
        dc_id: DC_ID,
        server_address: "127.0.0.1".into(),
        port,
        transport: TransportKind::Intermediate,
        obfuscation: None,
        session_backend: backend,
        rsa_keys: Arc::new(test_keys()),
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: PATIENCE,
        ping_interval: Duration::from_secs(600),
        reconnect: ReconnectPolicy {
            max_attempts:  3,
            initial_delay: Duration::from_millis(10),
            max_delay:     Duration::from_millis(50),
        },
    }
}

// ─── Server ───────────────────────────────────────────────────────────────────

pub struct Server {
    listener: TcpListener,
    pub addr: SocketAddr,
}

impl Server {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Accept one client that already shares `key` with us.
    pub async fn accept(&self, key: Option<AuthKey>) -> Peer {
        let (mut stream, _) = self.listener.accept().await.unwrap();
        let mut tag = [0u8; 4];
        stream.read_exact(&mut tag).await.unwrap();
        assert_eq!(tag, INTERMEDIATE_TAG);
        Peer {
            stream,
            codec: Intermediate::new(),
            buf: BytesMut::new(),
            key,
            session_id: 0,
            last_salt: 0,
            counter: 0,
            seq: 0,
        }
    }

    pub async fn accept_seeded(&self) -> Peer {
        self.accept(Some(AuthKey::from_bytes(SEEDED_KEY))).await
    }
}

/// One message from the client, after unwrapping containers.
#[derive(Debug)]
pub struct Incoming {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body:   Vec<u8>,
}

impl Incoming {
    pub fn id(&self) -> u32 {
        constructor_id(&self.body)
    }
}

pub struct Peer {
    stream:         TcpStream,
    codec:          Intermediate,
    buf:            BytesMut,
    pub key:        Option<AuthKey>,
    pub session_id: i64,
    pub last_salt:  i64,
    counter:        i64,
    seq:            i32,
}

impl Peer {
    async fn read_packet(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buf).unwrap() {
                return Some(packet);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn write_packet(&mut self, payload: &[u8]) {
        let mut out = BytesMut::new();
        self.codec.encode(payload, &mut out);
        // The client may already be gone; tests assert on its side.
        let _ = self.stream.write_all(&out).await;
    }

    pub fn next_msg_id(&mut self) -> i64 {
        self.counter += 1;
        ((unix_now().as_secs() as i64) << 32) | (self.counter << 2) | 1
    }

    /// Content messages from the next packet(s), skipping pure acks.
    /// `None` once the client hangs up.
    pub async fn try_recv(&mut self) -> Option<Vec<Incoming>> {
        loop {
            let packet = self.read_packet().await?;
            let key = self.key.as_ref().expect("no auth key yet");
            let plain = decrypt_data(&packet, key, Side::Client).unwrap();
            self.last_salt = i64::from_le_bytes(plain[..8].try_into().unwrap());
            self.session_id = i64::from_le_bytes(plain[8..16].try_into().unwrap());
            let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
            let seq_no = i32::from_le_bytes(plain[24..28].try_into().unwrap());

            let mut out = Vec::new();
            flatten(msg_id, seq_no, plain[32..].to_vec(), &mut out);
            out.retain(|m| m.id() != types::MsgsAck::CONSTRUCTOR_ID);
            if !out.is_empty() {
                return Some(out);
            }
        }
    }

    pub async fn recv(&mut self) -> Vec<Incoming> {
        self.try_recv().await.expect("client hung up")
    }

    /// Keep reading until `n` content messages have arrived.
    pub async fn recv_n(&mut self, n: usize) -> Vec<Incoming> {
        let mut all = Vec::new();
        while all.len() < n {
            all.extend(self.recv().await);
        }
        all
    }

    /// Send a content-related message to the client.
    pub async fn send(&mut self, body: &[u8]) {
        let msg_id = self.next_msg_id();
        self.seq += 1;
        let seq_no = self.seq * 2 + 1;
        self.send_message(msg_id, seq_no, body).await;
    }

    pub async fn send_message(&mut self, msg_id: i64, seq_no: i32, body: &[u8]) {
        let mut plain = Vec::new();
        plain.extend(self.last_salt.to_le_bytes());
        plain.extend(self.session_id.to_le_bytes());
        plain.extend(msg_id.to_le_bytes());
        plain.extend(seq_no.to_le_bytes());
        plain.extend((body.len() as u32).to_le_bytes());
        plain.extend_from_slice(body);
        let key = self.key.as_ref().expect("no auth key yet");
        let packet = encrypt_data(&plain, key, Side::Server);
        self.write_packet(&packet).await;
    }

    pub async fn reply(&mut self, req_msg_id: i64, result: &[u8]) {
        self.send(&rpc_result(req_msg_id, result)).await;
    }

    /// Send a bare transport status word instead of a message.
    pub async fn send_status(&mut self, code: i32) {
        self.write_packet(&code.to_le_bytes()).await;
    }

    async fn read_plain(&mut self) -> Vec<u8> {
        let packet = self.read_packet().await.expect("client hung up during handshake");
        Message::from_plaintext_bytes(&packet).unwrap().body
    }

    async fn write_plain(&mut self, body: Vec<u8>) {
        let id = self.next_msg_id();
        let packet = Message::plaintext(id, body).to_plaintext_bytes();
        self.write_packet(&packet).await;
    }

    /// Play the server side of the auth key exchange.
    pub async fn handshake(&mut self) -> AuthKey {
        let p = hex(DH_PRIME);
        let a = BigUint::from_bytes_be(&[0x3c; 256]);
        let server_nonce = [0x5e; 16];

        let body = self.read_plain().await;
        assert_eq!(constructor_id(&body), functions::ReqPqMulti::CONSTRUCTOR_ID);
        let nonce: [u8; 16] = body[4..20].try_into().unwrap();
        self.write_plain(
            types::ResPq {
                nonce,
                server_nonce,
                pq: PQ.to_be_bytes().to_vec(),
                server_public_key_fingerprints: vec![TEST_FINGERPRINT],
            }
            .to_bytes(),
        )
        .await;

        let body = self.read_plain().await;
        assert_eq!(constructor_id(&body), functions::ReqDhParams::CONSTRUCTOR_ID);
        let mut cur = Cursor::from_slice(&body[4..]);
        <[u8; 32]>::deserialize(&mut cur).unwrap();
        Vec::<u8>::deserialize(&mut cur).unwrap();
        Vec::<u8>::deserialize(&mut cur).unwrap();
        assert_eq!(i64::deserialize(&mut cur).unwrap(), TEST_FINGERPRINT);
        let encrypted = Vec::<u8>::deserialize(&mut cur).unwrap();
        let block = be(&BigUint::from_bytes_be(&encrypted).modpow(&hex(TEST_D), &hex(TEST_N)), 255);
        assert_eq!(constructor_id(&block[20..]), types::PQInnerData::CONSTRUCTOR_ID);
        let new_nonce = types::PQInnerData::from_bytes(&block[24..]).unwrap().new_nonce;

        let g_a = BigUint::from(3u32).modpow(&a, &p);
        let inner = types::ServerDhInnerData {
            nonce,
            server_nonce,
            g: 3,
            dh_prime: be(&p, 256),
            g_a: be(&g_a, 256),
            server_time: unix_now().as_secs() as i32,
        }
        .to_bytes();
        let mut answer = sha1!(&inner).to_vec();
        answer.extend(&inner);
        aes::pad_to_block(&mut answer, &[0; 16]);
        let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
        aes::ige_encrypt(&mut answer, &key, &iv);
        self.write_plain(
            types::ServerDhParamsOk { nonce, server_nonce, encrypted_answer: answer }.to_bytes(),
        )
        .await;

        let body = self.read_plain().await;
        assert_eq!(constructor_id(&body), functions::SetClientDhParams::CONSTRUCTOR_ID);
        let mut cur = Cursor::from_slice(&body[4..]);
        <[u8; 32]>::deserialize(&mut cur).unwrap();
        let mut plain = Vec::<u8>::deserialize(&mut cur).unwrap();
        aes::ige_decrypt(&mut plain, &key, &iv);
        assert_eq!(constructor_id(&plain[20..]), types::ClientDhInnerData::CONSTRUCTOR_ID);
        let client = types::ClientDhInnerData::from_bytes(&plain[24..]).unwrap();

        let g_b = BigUint::from_bytes_be(&client.g_b);
        let auth_key = AuthKey::from_bytes(be(&g_b.modpow(&a, &p), 256).try_into().unwrap());
        self.write_plain(
            types::DhGenOk {
                nonce,
                server_nonce,
                new_nonce_hash1: auth_key.calc_new_nonce_hash(&new_nonce, 1),
            }
            .to_bytes(),
        )
        .await;

        self.key = Some(auth_key.clone());
        auth_key
    }
}

fn flatten(msg_id: i64, seq_no: i32, body: Vec<u8>, out: &mut Vec<Incoming>) {
    if constructor_id(&body) == types::MsgContainer::CONSTRUCTOR_ID {
        let container = types::MsgContainer::from_bytes(&body[4..]).unwrap();
        for m in container.messages {
            flatten(m.msg_id, m.seqno, m.body, out);
        }
    } else {
        out.push(Incoming { msg_id, seq_no, body });
    }
}

pub fn rpc_result(req_msg_id: i64, result: &[u8]) -> Vec<u8> {
    types::RpcResult { req_msg_id, result: result.to_vec() }.to_bytes()
}

pub fn pong(msg_id: i64, ping_id: i64) -> Vec<u8> {
    types::Pong { msg_id, ping_id }.to_bytes()
}

/// The `ping_id` of a `ping` request.
pub fn ping_id(m: &Incoming) -> i64 {
    assert_eq!(m.id(), functions::Ping::CONSTRUCTOR_ID);
    i64::from_le_bytes(m.body[4..12].try_into().unwrap())
}
