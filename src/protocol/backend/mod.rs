//! PostgreSQL backend (server → client) messages.
//!
//! Messages are parsed on demand from a reassembled packet payload. Payload-less
//! messages (ParseComplete, BindComplete, NoData, ...) are recognized by tag alone.

pub mod auth;
pub mod copy;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{
    AuthenticationMessage, BackendKeyData, NegotiateProtocolVersion, NotificationResponse,
    ParameterStatus, ReadyForQuery,
};
pub use copy::{CopyData, CopyResponse};
pub use error::{ErrorResponse, NoticeResponse};
pub use extended::ParameterDescription;
pub use query::{CommandComplete, DataRow, FieldDescription, RowDescription};

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
    /// CopyInResponse
    pub const COPY_IN_RESPONSE: u8 = b'G';
    /// CopyOutResponse
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    /// CopyBothResponse
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// NegotiateProtocolVersion
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Human-readable name of a backend tag, for logs.
pub fn message_name(tag: u8) -> &'static str {
    match tag {
        msg_type::AUTHENTICATION => "Authentication",
        msg_type::BACKEND_KEY_DATA => "BackendKeyData",
        msg_type::PARAMETER_STATUS => "ParameterStatus",
        msg_type::READY_FOR_QUERY => "ReadyForQuery",
        msg_type::ROW_DESCRIPTION => "RowDescription",
        msg_type::DATA_ROW => "DataRow",
        msg_type::COMMAND_COMPLETE => "CommandComplete",
        msg_type::EMPTY_QUERY_RESPONSE => "EmptyQueryResponse",
        msg_type::ERROR_RESPONSE => "ErrorResponse",
        msg_type::NOTICE_RESPONSE => "NoticeResponse",
        msg_type::NOTIFICATION_RESPONSE => "NotificationResponse",
        msg_type::PARSE_COMPLETE => "ParseComplete",
        msg_type::BIND_COMPLETE => "BindComplete",
        msg_type::CLOSE_COMPLETE => "CloseComplete",
        msg_type::PARAMETER_DESCRIPTION => "ParameterDescription",
        msg_type::NO_DATA => "NoData",
        msg_type::PORTAL_SUSPENDED => "PortalSuspended",
        msg_type::COPY_IN_RESPONSE => "CopyInResponse",
        msg_type::COPY_OUT_RESPONSE => "CopyOutResponse",
        msg_type::COPY_BOTH_RESPONSE => "CopyBothResponse",
        msg_type::COPY_DATA => "CopyData",
        msg_type::COPY_DONE => "CopyDone",
        msg_type::NEGOTIATE_PROTOCOL_VERSION => "NegotiateProtocolVersion",
        _ => "Unknown",
    }
}
