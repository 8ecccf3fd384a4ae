//! Email parsing and spreadsheet attachment extraction.

use log::debug;
use mail_parser::{MessageParser, MessagePart, MimeHeaders};

use crate::sanitize::sanitize_filename;

use super::error::{EmailError, Result};

/// Decoded headers and attachments of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// Lowercased bare address from the From header, empty when absent.
    pub sender: String,
    /// Decoded Subject header, empty when absent.
    pub subject: String,
    pub attachments: Vec<ExtractedAttachment>,
}

/// A spreadsheet attachment that passed the filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAttachment {
    /// Sanitized filename.
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Extracts spreadsheet attachments from raw messages.
pub struct EmailParser {
    extensions: Vec<String>,
    max_size: u64,
}

impl EmailParser {
    /// `extensions` are matched case-insensitively, with or without a leading dot.
    pub fn new(extensions: &[String], max_size: u64) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_size,
        }
    }

    /// Parses a raw RFC 5322 message.
    pub fn parse(&self, raw_email: &[u8], uid: u32) -> Result<ParsedMessage> {
        let message = MessageParser::default()
            .parse(raw_email)
            .ok_or_else(|| EmailError::ParseError(format!("UID {} is not a valid message", uid)))?;

        let sender = message
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.address())
            .map(|a| a.trim().to_lowercase())
            .unwrap_or_default();
        let subject = message.subject().unwrap_or_default().to_string();

        let mut attachments = Vec::new();
        for part in message.attachments() {
            if let Some(attachment) = self.accept(part, uid) {
                attachments.push(attachment);
            }
        }

        debug!(
            "Parsed email UID={} with {} spreadsheet attachment(s)",
            uid,
            attachments.len()
        );
        Ok(ParsedMessage {
            sender,
            subject,
            attachments,
        })
    }

    fn accept(&self, part: &MessagePart<'_>, uid: u32) -> Option<ExtractedAttachment> {
        let raw_name = part.attachment_name()?;
        let filename = sanitize_filename(raw_name);
        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string())
            .to_ascii_lowercase();

        let extension = match extension_of(&filename) {
            Some(ext) if self.extensions.contains(&ext) => ext,
            _ => {
                debug!("UID {}: skipping '{}', extension not accepted", uid, filename);
                return None;
            }
        };

        if !mime_matches_extension(&mime_type, &extension) {
            log::info!(
                "UID {}: skipping '{}', declared type {} does not match .{}",
                uid,
                filename,
                mime_type,
                extension
            );
            return None;
        }

        let content = part.contents();
        if content.len() as u64 > self.max_size {
            log::warn!(
                "UID {}: skipping '{}', {} bytes exceeds limit of {}",
                uid,
                filename,
                content.len(),
                self.max_size
            );
            return None;
        }

        Some(ExtractedAttachment {
            filename,
            mime_type,
            content: content.to_vec(),
        })
    }
}

fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// True when `mime_type` is one of the types registered for `extension`.
fn mime_matches_extension(mime_type: &str, extension: &str) -> bool {
    mime_guess::from_ext(extension)
        .iter_raw()
        .any(|known| known.eq_ignore_ascii_case(mime_type))
}
