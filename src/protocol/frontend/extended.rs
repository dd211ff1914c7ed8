//! Extended query protocol messages.

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Oid;
use crate::types::ToParams;

/// Largest parameter list a Parse or Bind message can carry (the count is an Int16).
pub const MAX_PARAMS: usize = i16::MAX as usize;

fn wire_count(count: usize) -> Result<i16> {
    i16::try_from(count).map_err(|_overflow| {
        Error::InvalidUsage(format!(
            "{count} parameters exceed the protocol limit of {MAX_PARAMS}"
        ))
    })
}

/// Reject a parameter list that does not fit in a Bind message.
pub fn check_param_count<P: ToParams + ?Sized>(params: &P) -> Result<()> {
    wire_count(params.param_count()).map(drop)
}

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (empty or 0 = let server infer)
///
/// Nothing is written when there are more than [`MAX_PARAMS`] OIDs.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let count = wire_count(param_oids.len())?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(count);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
    Ok(())
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// Parameters and results all use text format, so both format-code lists
/// are sent empty (zero entries means "all text"). Nothing is written when
/// there are more than [`MAX_PARAMS`] parameters.
pub fn write_bind<P: ToParams + ?Sized>(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &P,
) -> Result<()> {
    let count = wire_count(params.param_count())?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // Parameter format codes
    msg.write_i16(0);

    msg.write_i16(count);
    params.to_text(msg.buf());

    // Result format codes
    msg.write_i16(0);
    msg.finish();
    Ok(())
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

fn write_target(buf: &mut Vec<u8>, type_byte: u8, kind: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, type_byte);
    msg.write_u8(kind);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::DESCRIBE, b'S', name);
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::DESCRIBE, b'P', name);
}

/// Write a Close message for a statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::CLOSE, b'S', name);
}

/// Write a Close message for a portal.
pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_target(buf, super::msg_type::CLOSE, b'P', name);
}

/// Write a Sync message.
///
/// Ends an extended query sequence; the server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write a Flush message.
///
/// Forces the server to send pending responses without ending the sequence.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "1", "SELECT $1", &[]).unwrap();
        assert_eq!(buf, b"P\0\0\0\x121\0SELECT $1\0\0\0");
    }

    #[test]
    fn test_bind_text_params() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "7", &(5_i32, None::<&str>)).unwrap();

        let mut expected = b"B\0\0\0\0\07\0".to_vec();
        expected.extend_from_slice(&[0, 0]); // param formats
        expected.extend_from_slice(&[0, 2]); // param count
        expected.extend_from_slice(&[0, 0, 0, 1, b'5']);
        expected.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        expected.extend_from_slice(&[0, 0]); // result formats
        let len = (expected.len() - 1) as i32;
        expected[1..5].copy_from_slice(&len.to_be_bytes());
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_too_many_params_rejected() {
        let params = vec![1_i32; MAX_PARAMS + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            write_bind(&mut buf, "", "1", &params),
            Err(Error::InvalidUsage(_))
        ));
        assert!(check_param_count(&params).is_err());
        let oids = vec![0; MAX_PARAMS + 1];
        assert!(write_parse(&mut buf, "1", "SELECT 1", &oids).is_err());
        assert!(buf.is_empty());

        let params = vec![1_i32; MAX_PARAMS];
        check_param_count(&params).unwrap();
        write_bind(&mut buf, "", "1", &params).unwrap();
        assert_eq!(&buf[9..11], &i16::MAX.to_be_bytes());
    }

    #[test]
    fn test_describe_and_close() {
        let mut buf = Vec::new();
        write_describe_statement(&mut buf, "3");
        write_close_statement(&mut buf, "3");
        write_describe_portal(&mut buf, "");
        write_close_portal(&mut buf, "");
        assert_eq!(
            buf,
            b"D\0\0\0\x07S3\0C\0\0\0\x07S3\0D\0\0\0\x06P\0C\0\0\0\x06P\0"
        );
    }

    #[test]
    fn test_execute_sync_flush() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 10);
        write_flush(&mut buf);
        write_sync(&mut buf);
        assert_eq!(buf, b"E\0\0\0\x09\0\0\0\0\x0aH\0\0\0\x04S\0\0\0\x04");
    }
}
