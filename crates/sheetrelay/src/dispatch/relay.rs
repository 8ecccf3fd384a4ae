//! Outbound mail relay abstraction and its SMTP implementation.

use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::config::{RelayConfig, RelayTls};

/// Failure reported by a relay, split by whether a resend can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Connection reset, timeout, 4xx reply.
    #[error("transient relay failure: {0}")]
    Transient(String),

    /// Authentication rejected, 5xx reply, malformed envelope.
    #[error("relay rejected message: {0}")]
    Permanent(String),
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transient(_))
    }
}

/// Something that can hand a built message to a mail server.
///
/// Implementations must be shareable across worker threads.
pub trait MailRelay: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), RelayError>;

    /// Verifies the relay is reachable. Defaults to a no-op.
    fn check(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

/// Authenticated SMTP relay with a small connection pool.
pub struct SmtpRelay {
    transport: SmtpTransport,
    host: String,
}

impl SmtpRelay {
    pub fn new(config: &RelayConfig, password: &SecretString) -> Result<Self, RelayError> {
        let builder = match config.tls {
            RelayTls::Starttls => SmtpTransport::starttls_relay(&config.host),
            RelayTls::Implicit => SmtpTransport::relay(&config.host),
        }
        .map_err(|e| RelayError::Permanent(format!("invalid relay host: {}", e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                password.expose_secret().to_string(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .pool_config(PoolConfig::new().max_size(config.max_connections))
            .build();

        Ok(Self {
            transport,
            host: config.host.clone(),
        })
    }
}

impl MailRelay for SmtpRelay {
    fn send(&self, message: &Message) -> Result<(), RelayError> {
        match self.transport.send(message) {
            Ok(response) => {
                log::debug!("Relay {} accepted message: {:?}", self.host, response.code());
                Ok(())
            }
            Err(e) => Err(classify(&e)),
        }
    }

    fn check(&self) -> Result<(), RelayError> {
        match self.transport.test_connection() {
            Ok(true) => Ok(()),
            Ok(false) => Err(RelayError::Transient(format!(
                "relay {} did not answer NOOP",
                self.host
            ))),
            Err(e) => Err(classify(&e)),
        }
    }
}

fn classify(error: &lettre::transport::smtp::Error) -> RelayError {
    if error.is_permanent() || error.is_client() {
        RelayError::Permanent(error.to_string())
    } else {
        RelayError::Transient(error.to_string())
    }
}
