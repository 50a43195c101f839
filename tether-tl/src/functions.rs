//! MTProto service functions.

use crate::enums;

tl_function! {
    pub struct ReqPqMulti = 0xbe7e8ef1 -> enums::ResPq {
        pub nonce: [u8; 16],
    }
}

tl_function! {
    pub struct ReqDhParams = 0xd712e4be -> enums::ServerDhParams {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub public_key_fingerprint: i64,
        pub encrypted_data: Vec<u8>,
    }
}

tl_function! {
    pub struct SetClientDhParams = 0xf5045f1f -> enums::SetClientDhParamsAnswer {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_data: Vec<u8>,
    }
}

tl_function! {
    pub struct Ping = 0x7abe77ec -> enums::Pong {
        pub ping_id: i64,
    }
}

tl_function! {
    /// Ping that also asks the server to drop the connection if nothing else
    /// arrives within `disconnect_delay` seconds.
    pub struct PingDelayDisconnect = 0xf3427b8c -> enums::Pong {
        pub ping_id: i64,
        pub disconnect_delay: i32,
    }
}

tl_function! {
    pub struct GetFutureSalts = 0xb921bd04 -> enums::FutureSalts {
        pub num: i32,
    }
}
