//! Helpers for values that end up in file names or log fields.
//!
//! Logs should identify a job without carrying full mailbox addresses or
//! filesystem paths.

use std::path::Path;

const MAX_FILENAME_CHARS: usize = 200;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks the local part of an address: `reports@partner.example` becomes
/// `r***@partner.example`.
pub fn redact_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// Makes a name safe to use as a single path component.
///
/// Keeps alphanumerics, `.`, `-`, `_` and spaces; anything else, path
/// separators and control characters included, becomes `_`. Leading and
/// trailing dots and spaces are removed, and overly long names are shortened
/// while keeping the extension.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');

    if cleaned.is_empty() {
        return "attachment".to_string();
    }
    if cleaned.chars().count() <= MAX_FILENAME_CHARS {
        return cleaned.to_string();
    }

    let (stem, ext) = match cleaned.rfind('.') {
        Some(dot) if cleaned.len() - dot <= 16 => (&cleaned[..dot], &cleaned[dot..]),
        _ => (cleaned, ""),
    };
    let keep = MAX_FILENAME_CHARS - ext.chars().count();
    let stem: String = stem.chars().take(keep).collect();
    format!("{}{}", stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/var/lib/sheetrelay/inbox/orders.xlsx")),
            "orders.xlsx"
        );
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_address() {
        assert_eq!(redact_address("reports@partner.example"), "r***@partner.example");
        assert_eq!(redact_address("@x"), "***@x");
        assert_eq!(redact_address("nonsense"), "***");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Sipariş Listesi.xlsx"), "Sipariş Listesi.xlsx");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("a\\b:c.xls"), "a_b_c.xls");
        assert_eq!(sanitize_filename("tab\there.xlsx"), "tab_here.xlsx");
        assert_eq!(sanitize_filename("..."), "attachment");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn test_sanitize_long_filename_keeps_extension() {
        let long = format!("{}.xlsx", "ş".repeat(300));
        let safe = sanitize_filename(&long);
        assert!(safe.ends_with(".xlsx"));
        assert_eq!(safe.chars().count(), MAX_FILENAME_CHARS);
    }
}
