//! Error and notice response messages.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{read_cstring, read_u8};

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

fn set_field(fields: &mut ErrorFields, code: u8, value: String) {
    let slot = match code {
        field_type::SEVERITY => &mut fields.severity,
        field_type::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
        field_type::CODE => &mut fields.code,
        field_type::MESSAGE => &mut fields.message,
        field_type::DETAIL => &mut fields.detail,
        field_type::HINT => &mut fields.hint,
        field_type::INTERNAL_QUERY => &mut fields.internal_query,
        field_type::WHERE => &mut fields.where_,
        field_type::SCHEMA => &mut fields.schema,
        field_type::TABLE => &mut fields.table,
        field_type::COLUMN => &mut fields.column,
        field_type::DATA_TYPE => &mut fields.data_type,
        field_type::CONSTRAINT => &mut fields.constraint,
        field_type::FILE => &mut fields.file,
        field_type::ROUTINE => &mut fields.routine,
        field_type::POSITION => {
            fields.position = value.parse().ok();
            return;
        }
        field_type::INTERNAL_POSITION => {
            fields.internal_position = value.parse().ok();
            return;
        }
        field_type::LINE => {
            fields.line = value.parse().ok();
            return;
        }
        other => {
            tracing::debug!("unknown error field type: {}", other as char);
            return;
        }
    };
    *slot = Some(value);
}

/// Parse the `(code, cstring)*` list shared by ErrorResponse and NoticeResponse.
///
/// Server messages may be in a non-UTF-8 client encoding; such bytes are replaced.
fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    loop {
        let (code, rest) = read_u8(data)?;
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstring(rest)?;
        set_field(&mut fields, code, String::from_utf8_lossy(value).into_owned());
        data = rest;
    }

    Ok(fields)
}

/// ErrorResponse message.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Get the primary message.
    pub fn message(&self) -> &str {
        self.fields.message.as_deref().unwrap_or_default()
    }

    /// Get the severity, preferring the non-localized form.
    pub fn severity(&self) -> &str {
        self.fields
            .severity_non_localized
            .as_deref()
            .or(self.fields.severity.as_deref())
            .unwrap_or("NOTICE")
    }
}
