//! Bare MTProto service constructors.
//!
//! Each type serializes boxed (constructor id first) and deserializes bare;
//! boxed reads go through the matching [`crate::enums`] type.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, RawVec, Serializable};

// ─── Authorization key exchange ──────────────────────────────────────────────

tl_constructor! {
    /// `resPQ`: the server's answer to `req_pq_multi`.
    pub struct ResPq = 0x05162463 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub pq: Vec<u8>,
        pub server_public_key_fingerprints: Vec<i64>,
    }
}

tl_constructor! {
    /// `p_q_inner_data`: RSA-encrypted in `req_DH_params`.
    pub struct PQInnerData = 0x83c95aec {
        pub pq: Vec<u8>,
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce: [u8; 32],
    }
}

tl_constructor! {
    pub struct ServerDhParamsFail = 0x79cb045d {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash: [u8; 16],
    }
}

tl_constructor! {
    pub struct ServerDhParamsOk = 0xd0e8075c {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_answer: Vec<u8>,
    }
}

tl_constructor! {
    /// Plaintext of `server_DH_params_ok.encrypted_answer`.
    pub struct ServerDhInnerData = 0xb5890dba {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub g: i32,
        pub dh_prime: Vec<u8>,
        pub g_a: Vec<u8>,
        pub server_time: i32,
    }
}

tl_constructor! {
    pub struct ClientDhInnerData = 0x6643b654 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub retry_id: i64,
        pub g_b: Vec<u8>,
    }
}

tl_constructor! {
    pub struct DhGenOk = 0x3bcbf734 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash1: [u8; 16],
    }
}

tl_constructor! {
    pub struct DhGenRetry = 0x46dc1fb9 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash2: [u8; 16],
    }
}

tl_constructor! {
    pub struct DhGenFail = 0xa69dae02 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash3: [u8; 16],
    }
}

// ─── RPC envelope ────────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`
///
/// `result` is kept serialized; the caller that issued `req_msg_id` knows its
/// type.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let req_msg_id = i64::deserialize(buf)?;
        let mut result = Vec::new();
        buf.read_to_end(&mut result);
        Ok(Self { req_msg_id, result })
    }
}

tl_constructor! {
    pub struct RpcError = 0x2144ca19 {
        pub error_code: i32,
        pub error_message: String,
    }
}

/// One entry of a `msg_container`: `msg_id:long seqno:int bytes:int body`.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerMessage {
    pub msg_id: i64,
    pub seqno: i32,
    pub body: Vec<u8>,
}

/// Size of the header preceding each body inside a container.
pub const CONTAINER_MESSAGE_HEADER: usize = 8 + 4 + 4;

impl Serializable for ContainerMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seqno.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for ContainerMessage {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seqno = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?;
        if len < 0 {
            return Err(Error::UnexpectedEof);
        }
        let body = buf.take(len as usize)?.to_vec();
        Ok(Self { msg_id, seqno, body })
    }
}

/// `msg_container#73f1f8dc messages:vector<%Message>`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgContainer {
    pub messages: Vec<ContainerMessage>,
}

impl Identifiable for MsgContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        self.messages.iter().for_each(|m| m.serialize(buf));
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let RawVec(messages) = RawVec::<ContainerMessage>::deserialize(buf)?;
        Ok(Self { messages })
    }
}

tl_constructor! {
    /// `gzip_packed`: `packed_data` inflates to another serialized object.
    pub struct GzipPacked = 0x3072cfa1 {
        pub packed_data: Vec<u8>,
    }
}

// ─── Service notifications ───────────────────────────────────────────────────

tl_constructor! {
    pub struct MsgsAck = 0x62d6b459 {
        pub msg_ids: Vec<i64>,
    }
}

tl_constructor! {
    pub struct BadMsgNotification = 0xa7eff811 {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
    }
}

tl_constructor! {
    pub struct BadServerSalt = 0xedab447b {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
        pub new_server_salt: i64,
    }
}

tl_constructor! {
    pub struct NewSessionCreated = 0x9ec20908 {
        pub first_msg_id: i64,
        pub unique_id: i64,
        pub server_salt: i64,
    }
}

tl_constructor! {
    pub struct Pong = 0x347773c5 {
        pub msg_id: i64,
        pub ping_id: i64,
    }
}

tl_constructor! {
    pub struct FutureSalt = 0x0949d9dc {
        pub valid_since: i32,
        pub valid_until: i32,
        pub salt: i64,
    }
}

/// `future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt>`
///
/// `salts` is a bare vector of bare constructors, so it has no ids at all.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
}

impl Serializable for FutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.now.serialize(buf);
        (self.salts.len() as i32).serialize(buf);
        for s in &self.salts {
            s.valid_since.serialize(buf);
            s.valid_until.serialize(buf);
            s.salt.serialize(buf);
        }
    }
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let RawVec(salts) = RawVec::<FutureSalt>::deserialize(buf)?;
        Ok(Self { req_msg_id, now, salts })
    }
}

tl_constructor! {
    pub struct MsgDetailedInfo = 0x276d3ec6 {
        pub msg_id: i64,
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_constructor! {
    pub struct MsgNewDetailedInfo = 0x809db6df {
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_constructor! {
    pub struct MsgsStateReq = 0xda69fb52 {
        pub msg_ids: Vec<i64>,
    }
}

tl_constructor! {
    pub struct MsgResendReq = 0x7d861a08 {
        pub msg_ids: Vec<i64>,
    }
}
