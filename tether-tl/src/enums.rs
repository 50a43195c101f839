//! Boxed MTProto service types.
//!
//! Deserializing a boxed type reads the constructor id and dispatches to the
//! matching bare constructor; an unknown id is reported as
//! [`crate::deserialize::Error::UnexpectedConstructor`].

use crate::types;

tl_enum! {
    pub enum ResPq {
        ResPq(types::ResPq),
    }
}

tl_enum! {
    pub enum ServerDhParams {
        Fail(types::ServerDhParamsFail),
        Ok(types::ServerDhParamsOk),
    }
}

tl_enum! {
    pub enum ServerDhInnerData {
        ServerDhInnerData(types::ServerDhInnerData),
    }
}

tl_enum! {
    pub enum SetClientDhParamsAnswer {
        DhGenOk(types::DhGenOk),
        DhGenRetry(types::DhGenRetry),
        DhGenFail(types::DhGenFail),
    }
}

tl_enum! {
    pub enum Pong {
        Pong(types::Pong),
    }
}

tl_enum! {
    pub enum FutureSalts {
        FutureSalts(types::FutureSalts),
    }
}

tl_enum! {
    /// Every frame body the server may send inside an encrypted session that
    /// the protocol layer itself understands. Anything else is an update for
    /// the application.
    pub enum ServiceMessage {
        RpcResult(types::RpcResult),
        MsgContainer(types::MsgContainer),
        GzipPacked(types::GzipPacked),
        Pong(types::Pong),
        BadMsgNotification(types::BadMsgNotification),
        BadServerSalt(types::BadServerSalt),
        NewSessionCreated(types::NewSessionCreated),
        MsgsAck(types::MsgsAck),
        FutureSalts(types::FutureSalts),
        MsgDetailedInfo(types::MsgDetailedInfo),
        MsgNewDetailedInfo(types::MsgNewDetailedInfo),
        MsgsStateReq(types::MsgsStateReq),
        MsgResendReq(types::MsgResendReq),
    }
}
