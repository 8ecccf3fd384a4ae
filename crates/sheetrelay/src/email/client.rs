//! IMAP client for the intake mailbox.

use std::future::Future;
use std::net::ToSocketAddrs;
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::MailboxConfig;

use super::error::{EmailError, Result};

/// Type alias for the underlying async stream (using async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// A mailbox that can hand out unread messages and flag them as read.
#[async_trait]
pub trait Mailbox: Send {
    /// Fetches unread messages without setting `\Seen`.
    async fn fetch_unseen(&mut self) -> Result<Vec<(u32, Vec<u8>)>>;

    /// Sets `\Seen` on one message.
    async fn mark_seen(&mut self, uid: u32) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// IMAP client for fetching spreadsheets.
pub struct ImapClient {
    session: Option<Session<TlsStream>>,
    config: MailboxConfig,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ImapClient {
    /// Creates a new IMAP client with the given configuration.
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            io_timeout: Duration::from_secs(config.io_timeout_secs),
            session: None,
            config,
        }
    }

    /// Connects, authenticates and selects the configured folder.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        let password = self.get_password()?;
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to IMAP server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| EmailError::ConnectionFailed(format!("cannot resolve {}", addr)))?;

        let std_stream = std::net::TcpStream::connect_timeout(&socket_addr, self.connect_timeout)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        let tls = TlsConnector::new();
        let tls_stream = with_timeout(
            self.connect_timeout,
            "TLS handshake",
            tls.connect(&self.config.host, tcp_stream),
        )
        .await?
        .map_err(|e| EmailError::TlsError(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = with_timeout(
            self.io_timeout,
            "login",
            client.login(&self.config.username, password.expose_secret()),
        )
        .await?
        .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;

        let folder = self.config.folder.clone();
        with_timeout(self.io_timeout, "select", session.select(&folder))
            .await?
            .map_err(|e| {
                if e.to_string().contains("doesn't exist") || e.to_string().contains("NO") {
                    EmailError::FolderNotFound(folder.clone())
                } else {
                    EmailError::ProtocolError(e.to_string())
                }
            })?;

        info!("Connected to IMAP server, folder '{}' selected", folder);
        self.session = Some(session);
        Ok(())
    }

    fn get_password(&self) -> Result<SecretString> {
        if self.config.auth.password.is_some() {
            warn!(
                "Using an inline mailbox password is not recommended. \
                 Consider password_env_var or password_file instead."
            );
        }
        self.config
            .auth
            .resolve()
            .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))
    }

    /// Checks if the client is currently connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

#[async_trait]
impl Mailbox for ImapClient {
    async fn fetch_unseen(&mut self) -> Result<Vec<(u32, Vec<u8>)>> {
        let io_timeout = self.io_timeout;
        let session = self.session()?;

        let uids = with_timeout(io_timeout, "search", session.uid_search("UNSEEN"))
            .await?
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        if uids.is_empty() {
            debug!("No unseen messages");
            return Ok(Vec::new());
        }

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        let uid_set = uid_list
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        debug!("Fetching {} unseen messages", uid_list.len());

        let fetch = async {
            let mut messages = session
                .uid_fetch(&uid_set, "(UID BODY.PEEK[])")
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

            let mut results = Vec::new();
            while let Some(message_result) = messages.next().await {
                match message_result {
                    Ok(message) => {
                        if let (Some(uid), Some(body)) = (message.uid, message.body()) {
                            results.push((uid, body.to_vec()));
                        } else {
                            warn!("Message missing UID or body");
                        }
                    }
                    Err(e) => return Err(EmailError::ProtocolError(e.to_string())),
                }
            }
            Ok(results)
        };
        with_timeout(io_timeout, "fetch", fetch).await?
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let io_timeout = self.io_timeout;
        let session = self.session()?;

        let store = async {
            let updates = session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
            let updates: Vec<_> = updates.collect().await;
            for update in updates {
                update.map_err(|e| EmailError::ProtocolError(e.to_string()))?;
            }
            Ok(())
        };
        with_timeout(io_timeout, "store", store).await?
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            with_timeout(self.io_timeout, "logout", session.logout())
                .await?
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapClient dropped without explicit disconnect - session will be closed");
        }
    }
}

async fn with_timeout<F: Future>(limit: Duration, what: &str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EmailError::Timeout(format!("{} exceeded {}s", what, limit.as_secs())))
}
