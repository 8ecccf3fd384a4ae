//! Sends generated spreadsheets to destination addresses with bounded retry.
//!
//! Delivery is at-least-once: a transient failure after the relay already
//! accepted the data leads to a resend and possibly a duplicate message.

pub mod relay;
pub mod template;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use thiserror::Error;

use crate::config::RelayConfig;
use crate::sanitize::redact_address;

pub use relay::{MailRelay, RelayError, SmtpRelay};
pub use template::{render, TemplateVars};

/// Content type of generated attachments.
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid recipient '{address}': {reason}")]
    InvalidRecipient { address: String, reason: String },

    #[error("invalid sender '{address}': {reason}")]
    InvalidSender { address: String, reason: String },

    #[error("attachment is {size} bytes, limit is {limit}")]
    AttachmentTooLarge { size: u64, limit: u64 },

    #[error("cannot read attachment '{path}': {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build message: {0}")]
    Build(String),

    #[error("relay rejected message after {attempts} attempt(s): {reason}")]
    Rejected { attempts: u32, reason: String },

    #[error("gave up after {attempts} attempt(s): {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("job deadline reached after {attempts} attempt(s): {reason}")]
    DeadlineExceeded { attempts: u32, reason: String },

    #[error("relay setup failed: {0}")]
    Setup(String),
}

impl DispatchError {
    /// Send attempts made before the error, zero for pre-send checks.
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchError::Rejected { attempts, .. }
            | DispatchError::RetriesExhausted { attempts, .. }
            | DispatchError::DeadlineExceeded { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Exponential backoff between send attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    /// Delay after the given failed attempt (1-based): base, 2*base, 4*base,
    /// capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub attempts: u32,
}

/// Builds messages and pushes them through a [`MailRelay`].
#[derive(Clone)]
pub struct Dispatcher {
    relay: Arc<dyn MailRelay>,
    from: Mailbox,
    policy: RetryPolicy,
    max_attachment_size: u64,
}

impl Dispatcher {
    pub fn new(
        relay: Arc<dyn MailRelay>,
        from_address: &str,
        from_name: Option<&str>,
        policy: RetryPolicy,
        max_attachment_size: u64,
    ) -> Result<Self, DispatchError> {
        let address: Address =
            from_address
                .trim()
                .parse()
                .map_err(|e: lettre::address::AddressError| DispatchError::InvalidSender {
                    address: from_address.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(Self {
            relay,
            from: Mailbox::new(from_name.map(str::to_string), address),
            policy,
            max_attachment_size,
        })
    }

    /// Builds a dispatcher around an authenticated SMTP relay.
    pub fn from_config(config: &RelayConfig) -> Result<Self, DispatchError> {
        let password = config
            .auth
            .resolve()
            .map_err(|e| DispatchError::Setup(e.to_string()))?;
        let relay =
            SmtpRelay::new(config, &password).map_err(|e| DispatchError::Setup(e.to_string()))?;
        Self::new(
            Arc::new(relay),
            &config.from_address,
            config.from_name.as_deref(),
            RetryPolicy::from_config(config),
            config.max_attachment_size,
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Checks that the relay answers.
    pub fn check(&self) -> Result<(), RelayError> {
        self.relay.check()
    }

    /// Sends one spreadsheet to one address.
    pub fn dispatch(
        &self,
        destination: &str,
        subject: &str,
        body: &str,
        attachment: &Path,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.dispatch_until(destination, subject, body, attachment, None)
    }

    /// Like [`Dispatcher::dispatch`], but never sleeps past `deadline`.
    pub fn dispatch_until(
        &self,
        destination: &str,
        subject: &str,
        body: &str,
        attachment: &Path,
        deadline: Option<Instant>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let to: Mailbox = destination.trim().parse().map_err(
            |e: lettre::address::AddressError| DispatchError::InvalidRecipient {
                address: destination.to_string(),
                reason: e.to_string(),
            },
        )?;

        let size = std::fs::metadata(attachment)
            .map_err(|e| DispatchError::Attachment {
                path: attachment.to_path_buf(),
                source: e,
            })?
            .len();
        if size > self.max_attachment_size {
            return Err(DispatchError::AttachmentTooLarge {
                size,
                limit: self.max_attachment_size,
            });
        }

        let message = self.build_message(to, subject, body, attachment)?;
        self.send_with_retry(&message, destination, deadline)
    }

    fn build_message(
        &self,
        to: Mailbox,
        subject: &str,
        body: &str,
        attachment: &Path,
    ) -> Result<Message, DispatchError> {
        let bytes = std::fs::read(attachment).map_err(|e| DispatchError::Attachment {
            path: attachment.to_path_buf(),
            source: e,
        })?;
        let filename = attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment.xlsx".to_string());
        let content_type = ContentType::parse(XLSX_CONTENT_TYPE)
            .map_err(|e| DispatchError::Build(e.to_string()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(Attachment::new(filename).body(bytes, content_type)),
            )
            .map_err(|e| DispatchError::Build(e.to_string()))
    }

    fn send_with_retry(
        &self,
        message: &Message,
        destination: &str,
        deadline: Option<Instant>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(DispatchError::DeadlineExceeded {
                    attempts: attempt,
                    reason: "no time left to send".to_string(),
                });
            }

            attempt += 1;
            let reason = match self.relay.send(message) {
                Ok(()) => {
                    tracing::info!(
                        to = %redact_address(destination),
                        attempts = attempt,
                        "Dispatched spreadsheet"
                    );
                    return Ok(DispatchReceipt { attempts: attempt });
                }
                Err(RelayError::Permanent(reason)) => {
                    return Err(DispatchError::Rejected {
                        attempts: attempt,
                        reason,
                    });
                }
                Err(RelayError::Transient(reason)) => reason,
            };

            if attempt >= max_attempts {
                return Err(DispatchError::RetriesExhausted {
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.policy.delay_after(attempt);
            let resume_at = Instant::now().checked_add(delay);
            if deadline.is_some_and(|d| resume_at.map_or(true, |t| t >= d)) {
                return Err(DispatchError::DeadlineExceeded {
                    attempts: attempt,
                    reason,
                });
            }

            tracing::warn!(
                to = %redact_address(destination),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Transient relay failure, retrying"
            );
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays scripted results, then succeeds.
    struct ScriptedRelay {
        script: Mutex<Vec<Result<(), RelayError>>>,
        calls: AtomicU32,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedRelay {
        fn new(script: Vec<Result<(), RelayError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn always(err: RelayError) -> Arc<Self> {
            Self::new(vec![Err(err); 64])
        }
    }

    impl MailRelay for ScriptedRelay {
        fn send(&self, message: &Message) -> Result<(), RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(message.formatted());
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn attachment(dir: &TempDir, size: usize) -> PathBuf {
        let path = dir.path().join("G1_out.xlsx");
        std::fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    fn dispatcher(relay: Arc<ScriptedRelay>, policy: RetryPolicy) -> Dispatcher {
        Dispatcher::new(relay, "relay@example.com", Some("Relay"), policy, 1024).unwrap()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(2), Duration::from_secs(8));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[test]
    fn test_success_first_try() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::new(vec![]);
        let d = dispatcher(relay.clone(), no_wait(3));

        let receipt = d
            .dispatch("g1@example.com", "GRUP_1", "hello", &attachment(&dir, 10))
            .unwrap();
        assert_eq!(receipt.attempts, 1);

        let sent = relay.sent.lock().unwrap();
        let raw = String::from_utf8_lossy(&sent[0]);
        assert!(raw.contains("To: g1@example.com"));
        assert!(raw.contains("Subject: GRUP_1"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains(XLSX_CONTENT_TYPE));
        assert!(raw.contains("G1_out.xlsx"));
    }

    #[test]
    fn test_transient_then_success() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::new(vec![Err(RelayError::Transient("421".into()))]);
        let d = dispatcher(relay.clone(), no_wait(3));

        let receipt = d
            .dispatch("g1@example.com", "s", "b", &attachment(&dir, 10))
            .unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(relay.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_always_transient_attempts_exactly_max() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::always(RelayError::Transient("connection reset".into()));
        let d = dispatcher(relay.clone(), no_wait(3));

        let err = d
            .dispatch("g1@example.com", "s", "b", &attachment(&dir, 10))
            .unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::always(RelayError::Permanent("535 auth failed".into()));
        let d = dispatcher(relay.clone(), no_wait(3));

        let err = d
            .dispatch("g1@example.com", "s", "b", &attachment(&dir, 10))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { attempts: 1, .. }));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_oversized_attachment_rejected_before_send() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::new(vec![]);
        let d = dispatcher(relay.clone(), no_wait(3));

        let err = d
            .dispatch("g1@example.com", "s", "b", &attachment(&dir, 2048))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AttachmentTooLarge {
                size: 2048,
                limit: 1024
            }
        ));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_recipient_rejected_before_send() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::new(vec![]);
        let d = dispatcher(relay.clone(), no_wait(3));

        let err = d
            .dispatch("not an address", "s", "b", &attachment(&dir, 10))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRecipient { .. }));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_attachment() {
        let relay = ScriptedRelay::new(vec![]);
        let d = dispatcher(relay, no_wait(3));
        let err = d
            .dispatch("g1@example.com", "s", "b", Path::new("/nonexistent/out.xlsx"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Attachment { .. }));
    }

    #[test]
    fn test_deadline_stops_retries() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::always(RelayError::Transient("timeout".into()));
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let d = dispatcher(relay.clone(), policy);

        let deadline = Instant::now() + Duration::from_secs(1);
        let err = d
            .dispatch_until("g1@example.com", "s", "b", &attachment(&dir, 10), Some(deadline))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded { attempts: 1, .. }));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_sender() {
        let relay = ScriptedRelay::new(vec![]);
        let result = Dispatcher::new(relay, "nobody", None, no_wait(1), 10);
        assert!(matches!(result, Err(DispatchError::InvalidSender { .. })));
    }

    #[test]
    fn test_huge_backoff_hits_deadline_instead_of_overflowing() {
        let dir = TempDir::new().unwrap();
        let relay = ScriptedRelay::always(RelayError::Transient("421".into()));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::MAX,
            max_delay: Duration::MAX,
        };
        let d = dispatcher(relay.clone(), policy);

        let deadline = Instant::now() + Duration::from_secs(60);
        let err = d
            .dispatch_until("g1@example.com", "s", "b", &attachment(&dir, 10), Some(deadline))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded { attempts: 1, .. }));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 1);
    }
}
