//! Startup and session-level backend messages.

use std::borrow::Cow;

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u8, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication method codes.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
}

/// Authentication request from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// Any method this client does not implement (SASL, GSS, SSPI, ...)
    Other(i32),
}

impl AuthenticationMessage {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        match code {
            auth_type::OK => Ok(Self::Ok),
            auth_type::CLEARTEXT_PASSWORD => Ok(Self::CleartextPassword),
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)
                    .map_err(|_e| Error::Protocol("MD5Password: missing salt".into()))?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(salt);
                Ok(Self::Md5Password { salt: buf })
            }
            other => Ok(Self::Other(other)),
        }
    }
}

/// Fixed layout of a classic (protocol 3.0) BackendKeyData body.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct KeyParts {
    pid: U32BE,
    secret_key: U32BE,
}

/// BackendKeyData message.
///
/// The key is kept as opaque bytes; newer servers may send a longer secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendKeyData<'a> {
    /// Process ID followed by the secret key
    pub bytes: &'a [u8],
}

impl<'a> BackendKeyData<'a> {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(Error::Protocol(format!(
                "BackendKeyData: expected at least 8 bytes, got {}",
                payload.len()
            )));
        }
        Ok(Self { bytes: payload })
    }

    /// Process ID of the backend.
    pub fn process_id(&self) -> u32 {
        KeyParts::ref_from_prefix(self.bytes)
            .map(|(parts, _)| parts.pid.get())
            .unwrap_or_default()
    }

    /// Secret key for cancellation, when it fits the 32-bit form.
    pub fn secret(&self) -> u32 {
        KeyParts::ref_from_prefix(self.bytes)
            .map(|(parts, _)| parts.secret_key.get())
            .unwrap_or_default()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: Cow<'a, str>,
    /// Parameter value
    pub value: Cow<'a, str>,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - the server finished a request cycle.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (status, _) = read_u8(payload)?;
        Ok(Self { status })
    }

    /// Get the transaction status.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: Cow<'a, str>,
    /// Notification payload
    pub payload: Cow<'a, str>,
}

impl<'a> NotificationResponse<'a> {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: payload_str,
        })
    }
}

/// NegotiateProtocolVersion message - server doesn't support requested protocol features.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion<'a> {
    /// Newest minor protocol version supported
    pub newest_minor_version: u32,
    /// Unrecognized protocol options
    pub unrecognized_options: Vec<Cow<'a, str>>,
}

impl<'a> NegotiateProtocolVersion<'a> {
    /// Parse a NegotiateProtocolVersion message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (count, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::new();
        for _ in 0..count {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option);
            rest = remaining;
        }

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }
}
