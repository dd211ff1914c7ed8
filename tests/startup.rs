//! Integration tests for the startup and authentication sequence.
//!
//! ## Test Matrix
//! - `test_startup_trust` - AuthenticationOk, parameters and backend key recorded
//! - `test_startup_md5_password` - salted MD5 response
//! - `test_startup_missing_password` - MD5 request without a configured password
//! - `test_startup_unsupported_auth` - SASL is refused
//! - `test_startup_server_rejects` - FATAL error during startup
//! - `test_startup_ssl_prefer_falls_back` - `N` answer continues in plaintext
//! - `test_startup_ssl_require_refused` - `N` answer with sslmode=require
//! - `test_startup_ssl_accepted_without_tls` - `S` answer without the TLS feature
//! - `test_startup_close` - Terminate on close

mod common;

use common::*;
use pgpipeline::protocol::frontend::md5_password;
use pgpipeline::{Conn, Error, SslMode, TransactionStatus};

#[tokio::test]
async fn test_startup_trust() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        let startup = server.read_untagged().await;
        let params = cstrings(&startup[4..]);
        assert_eq!(&params[..4], &["user", "alice", "database", "app"]);
        server
            .send(&[
                auth(0, &[]),
                parameter_status("server_version", "16.2"),
                backend_key(4242, 7),
                ready(b'I'),
            ])
            .await;
    };
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts()), script);

    let conn = conn.unwrap();
    assert_eq!(conn.server_param("server_version").as_deref(), Some("16.2"));
    let mut key = 4242i32.to_be_bytes().to_vec();
    key.extend_from_slice(&7i32.to_be_bytes());
    assert_eq!(conn.backend_key(), key);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert!(conn.session().is_ready());
}

#[tokio::test]
async fn test_startup_md5_password() {
    let (client, mut server) = MockServer::pair();
    let salt = [9u8, 8, 7, 6];
    let script = async {
        server.read_untagged().await;
        server.send(&[auth(5, &salt)]).await;
        let reply = server.expect(b'p').await;
        let mut expected = md5_password("alice", "pw", &salt).into_bytes();
        expected.push(0);
        assert_eq!(reply, expected);
        server.send(&[auth(0, &[]), ready(b'I')]).await;
    };
    let mut opts = opts();
    opts.password = Some("pw".into());
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts), script);
    assert!(!conn.unwrap().is_broken());
}

#[tokio::test]
async fn test_startup_missing_password() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        server.read_untagged().await;
        server.send(&[auth(5, &[1, 2, 3, 4])]).await;
    };
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts()), script);
    assert!(matches!(conn.unwrap_err(), Error::Config(_)));
}

#[tokio::test]
async fn test_startup_unsupported_auth() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        server.read_untagged().await;
        server.send(&[auth(10, b"SCRAM-SHA-256\0\0")]).await;
    };
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts()), script);
    assert!(matches!(conn.unwrap_err(), Error::Unsupported(_)));
}

#[tokio::test]
async fn test_startup_server_rejects() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        server.read_untagged().await;
        server
            .send(&[error("FATAL", "28000", "role \"alice\" does not exist")])
            .await;
        drop(server);
    };
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts()), script);
    let err = conn.unwrap_err();
    assert_eq!(err.sqlstate(), Some("28000"));
    assert!(err.is_connection_broken());
}

#[tokio::test]
async fn test_startup_ssl_prefer_falls_back() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        let request = server.read_untagged().await;
        assert_eq!(request, [0x04, 0xd2, 0x16, 0x2f]);
        server.send_raw(b"N").await;
        server.handshake().await;
    };
    let mut opts = opts();
    opts.ssl_mode = SslMode::Prefer;
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts), script);
    assert!(conn.is_ok());
}

#[tokio::test]
async fn test_startup_ssl_require_refused() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        server.read_untagged().await;
        server.send_raw(b"N").await;
    };
    let mut opts = opts();
    opts.ssl_mode = SslMode::Require;
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts), script);
    assert!(matches!(conn.unwrap_err(), Error::Ssl(_)));
}

#[cfg(not(feature = "tokio-tls"))]
#[tokio::test]
async fn test_startup_ssl_accepted_without_tls() {
    let (client, mut server) = MockServer::pair();
    let script = async {
        server.read_untagged().await;
        server.send_raw(b"S").await;
    };
    let mut opts = opts();
    opts.ssl_mode = SslMode::Require;
    let (conn, ()) = tokio::join!(Conn::connect_with_stream(client, opts), script);
    assert!(matches!(conn.unwrap_err(), Error::Unsupported(_)));
}

#[tokio::test]
async fn test_startup_close() {
    let (conn, mut server) = connect().await;
    conn.close().await.unwrap();
    server.expect(b'X').await;
}
