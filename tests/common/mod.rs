//! Scripted in-memory PostgreSQL server for integration tests.
//!
//! The server reads frontend messages from one end of a `tokio::io::duplex`
//! pipe, checks their type bytes, and answers with hand-built backend messages.

#![allow(dead_code)]

use pgpipeline::{Conn, Opts};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub fn opts() -> Opts {
    Opts {
        user: "alice".into(),
        database: "app".into(),
        ..Default::default()
    }
}

pub struct MockServer {
    stream: DuplexStream,
}

impl MockServer {
    pub fn pair() -> (DuplexStream, MockServer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (client, MockServer { stream: server })
    }

    /// Read the untagged StartupMessage or SSLRequest; returns its body.
    pub async fn read_untagged(&mut self) -> Vec<u8> {
        let len = self.stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        body
    }

    /// Read one tagged frontend message, asserting its type byte.
    pub async fn expect(&mut self, tag: u8) -> Vec<u8> {
        let got = self.stream.read_u8().await.unwrap();
        assert_eq!(
            got as char, tag as char,
            "unexpected frontend message type"
        );
        let len = self.stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        body
    }

    /// Read one frontend message per byte of `tags`.
    pub async fn expect_all(&mut self, tags: &[u8]) -> Vec<Vec<u8>> {
        let mut bodies = Vec::with_capacity(tags.len());
        for tag in tags {
            bodies.push(self.expect(*tag).await);
        }
        bodies
    }

    pub async fn send(&mut self, messages: &[Vec<u8>]) {
        for message in messages {
            self.stream.write_all(message).await.unwrap();
        }
        self.stream.flush().await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Accept a trust-authenticated startup.
    pub async fn handshake(&mut self) {
        let startup = self.read_untagged().await;
        assert_eq!(&startup[..4], &[0, 3, 0, 0]);
        self.send(&[
            auth(0, &[]),
            parameter_status("server_version", "16.2"),
            parameter_status("client_encoding", "UTF8"),
            backend_key(4242, 7),
            ready(b'I'),
        ])
        .await;
    }
}

/// A connected client and the server end of its pipe.
pub async fn connect() -> (Conn, MockServer) {
    let (client, mut server) = MockServer::pair();
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts()), server.handshake());
    (conn.unwrap(), server)
}

// === Backend message builders ===

pub fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Split a frontend body at NUL bytes.
pub fn cstrings(body: &[u8]) -> Vec<String> {
    body.split(|b| *b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Text parameter values of a Bind body; `None` for a NULL (-1 length).
pub fn bind_params(body: &[u8]) -> Vec<Option<String>> {
    let mut pos = 0;
    for _ in 0..2 {
        pos += body[pos..].iter().position(|b| *b == 0).unwrap() + 1;
    }
    let read_i16 = |pos: usize| i16::from_be_bytes([body[pos], body[pos + 1]]);
    let formats = read_i16(pos) as usize;
    pos += 2 + formats * 2;
    let count = read_i16(pos) as usize;
    pos += 2;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let len = i32::from_be_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        if len < 0 {
            values.push(None);
        } else {
            let end = pos + len as usize;
            values.push(Some(String::from_utf8_lossy(&body[pos..end]).into_owned()));
            pos = end;
        }
    }
    values
}

pub fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(extra);
    message(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, name);
    cstr(&mut body, value);
    message(b'S', &body)
}

pub fn backend_key(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(&secret.to_be_bytes());
    message(b'K', &body)
}

pub fn ready(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
}

pub fn parse_complete() -> Vec<u8> {
    message(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    message(b'2', &[])
}

pub fn no_data() -> Vec<u8> {
    message(b'n', &[])
}

pub fn portal_suspended() -> Vec<u8> {
    message(b's', &[])
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut body = (oids.len() as i16).to_be_bytes().to_vec();
    for oid in oids {
        body.extend_from_slice(&oid.to_be_bytes());
    }
    message(b't', &body)
}

/// RowDescription with text columns of type `text`.
pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut body = (names.len() as i16).to_be_bytes().to_vec();
    for name in names {
        cstr(&mut body, name);
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&25u32.to_be_bytes());
        body.extend_from_slice(&(-1i16).to_be_bytes());
        body.extend_from_slice(&(-1i32).to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
    }
    message(b'T', &body)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                body.extend_from_slice(v.as_bytes());
            }
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    message(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, tag);
    message(b'C', &body)
}

pub fn error(severity: &str, code: &str, text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', text)] {
        body.push(field);
        cstr(&mut body, value);
    }
    body.push(0);
    message(b'E', &body)
}

fn copy_response(tag: u8, columns: usize) -> Vec<u8> {
    let mut body = vec![0u8];
    body.extend_from_slice(&(columns as i16).to_be_bytes());
    for _ in 0..columns {
        body.extend_from_slice(&0i16.to_be_bytes());
    }
    message(tag, &body)
}

pub fn copy_in_response(columns: usize) -> Vec<u8> {
    copy_response(b'G', columns)
}

pub fn copy_out_response(columns: usize) -> Vec<u8> {
    copy_response(b'H', columns)
}

pub fn copy_data(data: &[u8]) -> Vec<u8> {
    message(b'd', data)
}

pub fn copy_done() -> Vec<u8> {
    message(b'c', &[])
}
