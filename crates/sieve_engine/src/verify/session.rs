use std::str::FromStr;
use std::time::Duration;

use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::commands::{Mail, Quit, Rcpt, Rset};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::response::Response;
use lettre::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A server reply to one command. Negative replies are replies, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {host} failed: {message}")]
    Connect { host: String, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("probe timed out")]
    Timeout,
}

/// One live mail-transfer session. Owned by exactly one pool entry.
#[async_trait::async_trait]
pub trait MailSession: Send {
    async fn mail_from(&mut self, sender: &str) -> Result<Reply, SessionError>;
    async fn rcpt_to(&mut self, recipient: &str) -> Result<Reply, SessionError>;
    /// Clears the envelope so the session can take the next probe.
    async fn reset(&mut self) -> Result<Reply, SessionError>;
    async fn quit(&mut self) -> Result<(), SessionError>;
}

#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn MailSession>, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub port: u16,
    pub helo_name: String,
    /// Placeholder envelope sender used for every probe.
    pub sender: String,
    #[serde(with = "crate::duration_ms")]
    pub command_timeout: Duration,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            port: 25,
            helo_name: "localhost".to_string(),
            sender: "verify@validator.local".to_string(),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Plain-text SMTP sessions over `lettre`'s async connection.
#[derive(Debug, Clone, Default)]
pub struct LettreConnector {
    settings: SmtpSettings,
}

impl LettreConnector {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl SessionConnector for LettreConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn MailSession>, SessionError> {
        let hello = ClientId::Domain(self.settings.helo_name.clone());
        let conn = AsyncSmtpConnection::connect_tokio1(
            (host, self.settings.port),
            Some(self.settings.command_timeout),
            &hello,
            None,
            None,
        )
        .await
        .map_err(|err| SessionError::Connect {
            host: host.to_string(),
            message: err.to_string(),
        })?;
        Ok(Box::new(LettreSession { conn }))
    }
}

struct LettreSession {
    conn: AsyncSmtpConnection,
}

#[async_trait::async_trait]
impl MailSession for LettreSession {
    async fn mail_from(&mut self, sender: &str) -> Result<Reply, SessionError> {
        let sender = parse_envelope(sender)?;
        into_reply(self.conn.command(Mail::new(Some(sender), vec![])).await)
    }

    async fn rcpt_to(&mut self, recipient: &str) -> Result<Reply, SessionError> {
        let recipient = parse_envelope(recipient)?;
        into_reply(self.conn.command(Rcpt::new(recipient, vec![])).await)
    }

    async fn reset(&mut self) -> Result<Reply, SessionError> {
        into_reply(self.conn.command(Rset).await)
    }

    async fn quit(&mut self) -> Result<(), SessionError> {
        into_reply(self.conn.command(Quit).await).map(|_| ())
    }
}

fn parse_envelope(address: &str) -> Result<Address, SessionError> {
    Address::from_str(address)
        .map_err(|err| SessionError::Protocol(format!("bad envelope address {address}: {err}")))
}

/// `lettre` reports negative replies as errors carrying the code; fold those
/// back into replies and keep only transport failures as errors.
fn into_reply(result: Result<Response, lettre::transport::smtp::Error>) -> Result<Reply, SessionError> {
    match result {
        Ok(response) => Ok(Reply {
            code: code_number(&response.code().to_string())?,
            message: response.message().collect::<Vec<_>>().join(" "),
        }),
        Err(err) => match err.status() {
            Some(code) => Ok(Reply {
                code: code_number(&code.to_string())?,
                message: err.to_string(),
            }),
            None => Err(SessionError::Protocol(err.to_string())),
        },
    }
}

fn code_number(code: &str) -> Result<u16, SessionError> {
    code.parse()
        .map_err(|_| SessionError::Protocol(format!("unparseable reply code {code}")))
}
