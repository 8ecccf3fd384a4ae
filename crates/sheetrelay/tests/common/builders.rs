//! Builders for test spreadsheets, registries and messages.

#![allow(dead_code)]

use std::path::Path;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::Message;

use sheetrelay::dispatch::XLSX_CONTENT_TYPE;
use sheetrelay::registry::{DestinationGroup, GroupRegistry};
use sheetrelay::sheet::{self, Cell, Table};

/// Writes an `.xlsx` file with text cells.
pub fn write_sheet(path: &Path, headers: &[&str], rows: &[&[&str]]) {
    let table = Table::new(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|c| Cell::Text(c.to_string())).collect())
            .collect(),
    );
    sheet::write_table(&table, path).expect("Failed to write test spreadsheet");
}

/// Bytes of an `.xlsx` file with text cells.
pub fn sheet_bytes(headers: &[&str], rows: &[&[&str]]) -> Vec<u8> {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("sheet.xlsx");
    write_sheet(&path, headers, rows);
    std::fs::read(&path).expect("Failed to read test spreadsheet")
}

/// Two groups: G1 owns ANKARA, G2 owns IZMIR and KONYA.
pub fn two_group_registry() -> GroupRegistry {
    GroupRegistry::new(
        vec![
            DestinationGroup::new("G1", "Group One", "g1@example.com", ["ANKARA"])
                .expect("valid group"),
            DestinationGroup::new("G2", "Group Two", "g2@example.com", ["IZMIR", "KONYA"])
                .expect("valid group"),
        ],
        sheetrelay::registry::DEFAULT_KNOWN_REGIONS.iter().copied(),
    )
    .expect("valid registry")
}

/// Builder for raw RFC 5322 messages with attachments.
pub struct EmailBuilder {
    from: String,
    subject: String,
    attachments: Vec<(String, String, Vec<u8>)>,
}

impl EmailBuilder {
    pub fn new(from: &str) -> Self {
        Self {
            from: from.to_string(),
            subject: "Weekly report".to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    /// Adds an attachment declared as an `.xlsx` workbook.
    pub fn xlsx(self, filename: &str, bytes: Vec<u8>) -> Self {
        self.attachment(filename, XLSX_CONTENT_TYPE, bytes)
    }

    pub fn attachment(mut self, filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.attachments
            .push((filename.to_string(), content_type.to_string(), bytes));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = MultiPart::mixed().singlepart(SinglePart::plain("see attached".to_string()));
        for (name, ctype, bytes) in self.attachments {
            let content_type = ContentType::parse(&ctype).expect("valid content type");
            body = body.singlepart(Attachment::new(name).body(bytes, content_type));
        }
        Message::builder()
            .from(self.from.parse().expect("valid sender"))
            .to("intake@example.com".parse().expect("valid recipient"))
            .subject(self.subject)
            .multipart(body)
            .expect("valid message")
            .formatted()
    }
}
