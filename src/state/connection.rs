//! Connection startup and authentication state machine.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::AuthenticationMessage;
use crate::protocol::frontend::{md5_password, write_password, write_ssl_request, write_startup};
use crate::protocol::types::TransactionStatus;

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    SslNegotiating,
    StartupSent,
    Authenticating,
    Authenticated,
    Ready,
    Failed,
}

/// Session state observed from the server.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// AuthenticationOk has been received
    pub authenticated: bool,
    /// Latest value of every ParameterStatus
    pub server_params: HashMap<String, String>,
    /// BackendKeyData body (process id + secret)
    pub backend_key: Vec<u8>,
    /// Requests are outstanding
    pub query_in_progress: bool,
    /// Status from the last ReadyForQuery
    pub transaction_status: TransactionStatus,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        self.phase == ConnectionPhase::Ready
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }
}

/// Outcome of the server's answer to SSLRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslDecision {
    /// `'S'`: perform the TLS handshake, then send the startup message
    Upgrade,
    /// `'N'` under `Prefer`: send the startup message in plaintext
    Plaintext,
}

/// Connection startup state machine.
///
/// Produces the bytes of each startup step; the caller performs the I/O.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    user: String,
    password: Option<String>,
    ssl_mode: SslMode,
    startup_params: Vec<(String, String)>,
    state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a state machine. Fails with [`Error::Config`] on unusable options.
    pub fn new(opts: &Opts) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            user: opts.user.clone(),
            password: opts.password.clone(),
            ssl_mode: opts.ssl_mode,
            startup_params: opts
                .startup_params()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            state: ConnectionState::default(),
        })
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    /// Write the first startup bytes: SSLRequest, or the startup message
    /// when SSL is disabled. Returns true when an SSL answer byte must be read.
    pub fn start(&mut self, buf: &mut Vec<u8>) -> bool {
        match self.ssl_mode {
            SslMode::Disable => {
                self.write_startup_message(buf);
                false
            }
            SslMode::Prefer | SslMode::Require => {
                write_ssl_request(buf);
                self.state.phase = ConnectionPhase::SslNegotiating;
                true
            }
        }
    }

    /// Process the single byte answering SSLRequest.
    pub fn process_ssl_response(&mut self, response: u8) -> Result<SslDecision> {
        let decision = match (response, self.ssl_mode) {
            (b'S', _) => Ok(SslDecision::Upgrade),
            (b'N', SslMode::Prefer) => Ok(SslDecision::Plaintext),
            (b'N', _) => Err(Error::Ssl("server does not support SSL".into())),
            (other, _) => Err(Error::Ssl(format!(
                "unexpected SSL response byte 0x{other:02x}"
            ))),
        };
        match &decision {
            Ok(d) => tracing::debug!(?d, "SSL negotiation"),
            Err(_) => self.state.phase = ConnectionPhase::Failed,
        }
        decision
    }

    /// Write the StartupMessage.
    pub fn write_startup_message(&mut self, buf: &mut Vec<u8>) {
        let params: Vec<(&str, &str)> = self
            .startup_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        write_startup(buf, &params);
        self.state.phase = ConnectionPhase::StartupSent;
    }

    /// Handle an Authentication message. Returns the reply to send, if any.
    pub fn handle_authentication(&mut self, auth: AuthenticationMessage) -> Result<Option<Vec<u8>>> {
        match auth {
            AuthenticationMessage::Ok => {
                self.state.authenticated = true;
                self.state.phase = ConnectionPhase::Authenticated;
                Ok(None)
            }
            AuthenticationMessage::CleartextPassword => {
                tracing::debug!("cleartext password authentication");
                let password = self.require_password()?;
                let mut buf = Vec::new();
                write_password(&mut buf, &password);
                self.state.phase = ConnectionPhase::Authenticating;
                Ok(Some(buf))
            }
            AuthenticationMessage::Md5Password { salt } => {
                tracing::debug!("MD5 password authentication");
                let password = self.require_password()?;
                let hashed = md5_password(&self.user, &password, &salt);
                let mut buf = Vec::new();
                write_password(&mut buf, &hashed);
                self.state.phase = ConnectionPhase::Authenticating;
                Ok(Some(buf))
            }
            AuthenticationMessage::Other(code) => {
                self.state.phase = ConnectionPhase::Failed;
                Err(Error::Unsupported(format!(
                    "authentication method {code} is not supported"
                )))
            }
        }
    }

    fn require_password(&mut self) -> Result<String> {
        match self.password.clone() {
            Some(password) => Ok(password),
            None => {
                self.state.phase = ConnectionPhase::Failed;
                Err(Error::Config(
                    "server requested a password but none was configured".into(),
                ))
            }
        }
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) {
        self.state
            .server_params
            .insert(name.to_owned(), value.to_owned());
    }

    pub fn backend_key(&mut self, key: &[u8]) {
        self.state.backend_key = key.to_vec();
    }

    pub fn set_query_in_progress(&mut self, in_progress: bool) {
        self.state.query_in_progress = in_progress;
    }

    pub fn ready_for_query(&mut self, status: TransactionStatus) {
        self.state.transaction_status = status;
        self.state.phase = ConnectionPhase::Ready;
    }

    /// Mark the connection as unusable.
    pub fn fail(&mut self) {
        self.state.phase = ConnectionPhase::Failed;
    }
}
