use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Upper bound for every interval and timeout except `stale_after_secs`.
const MAX_INTERVAL_SECS: u64 = 24 * 3600;
const MAX_STALE_AFTER_SECS: u64 = 365 * 24 * 3600;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn check_secs(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(invalid(format!(
            "{} must be between {} and {} seconds, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.groups_file.trim().is_empty() {
        return Err(invalid("groups_file must not be empty"));
    }

    let mailbox = &config.mailbox;
    if mailbox.host.trim().is_empty() {
        return Err(invalid("mailbox.host must not be empty"));
    }
    if mailbox.port == 0 {
        return Err(invalid("mailbox.port must not be 0"));
    }
    if mailbox.username.trim().is_empty() {
        return Err(invalid("mailbox.username must not be empty"));
    }
    if mailbox.allowed_senders.is_empty() {
        return Err(invalid(
            "mailbox.allowed_senders is empty, no message would ever be accepted",
        ));
    }
    let mut senders = HashSet::new();
    for sender in &mailbox.allowed_senders {
        let key = sender.trim().to_lowercase();
        if key.is_empty() {
            return Err(invalid("mailbox.allowed_senders contains an empty entry"));
        }
        if !senders.insert(key) {
            return Err(invalid(format!(
                "Duplicate entry in mailbox.allowed_senders: {}",
                sender
            )));
        }
    }
    if mailbox.attachment_extensions.is_empty() {
        return Err(invalid("mailbox.attachment_extensions must not be empty"));
    }
    check_secs("mailbox.poll_interval_secs", mailbox.poll_interval_secs, 1, MAX_INTERVAL_SECS)?;
    check_secs("mailbox.connect_timeout_secs", mailbox.connect_timeout_secs, 1, MAX_INTERVAL_SECS)?;
    check_secs("mailbox.io_timeout_secs", mailbox.io_timeout_secs, 1, MAX_INTERVAL_SECS)?;
    if !mailbox.auth.is_configured() {
        return Err(invalid("mailbox needs a password, password_file or password_env_var"));
    }

    let relay = &config.relay;
    if relay.host.trim().is_empty() {
        return Err(invalid("relay.host must not be empty"));
    }
    if relay.port == 0 {
        return Err(invalid("relay.port must not be 0"));
    }
    if !relay.from_address.contains('@') {
        return Err(invalid(format!(
            "relay.from_address is not an address: {}",
            relay.from_address
        )));
    }
    if relay.max_attempts == 0 {
        return Err(invalid("relay.max_attempts must be at least 1"));
    }
    if relay.max_connections == 0 {
        return Err(invalid("relay.max_connections must be at least 1"));
    }
    check_secs("relay.timeout_secs", relay.timeout_secs, 1, MAX_INTERVAL_SECS)?;
    check_secs("relay.max_delay_secs", relay.max_delay_secs, 0, MAX_INTERVAL_SECS)?;
    if relay.base_delay_secs > relay.max_delay_secs {
        return Err(invalid(
            "relay.base_delay_secs must not exceed relay.max_delay_secs",
        ));
    }
    if !relay.auth.is_configured() {
        return Err(invalid("relay needs a password, password_file or password_env_var"));
    }

    let pipeline = &config.pipeline;
    if pipeline.worker_count == 0 {
        return Err(invalid("pipeline.worker_count must be at least 1"));
    }
    check_secs("pipeline.job_timeout_secs", pipeline.job_timeout_secs, 1, MAX_INTERVAL_SECS)?;
    check_secs("pipeline.stale_after_secs", pipeline.stale_after_secs, 1, MAX_STALE_AFTER_SECS)?;
    // A job still inside its budget, including one last relay round trip, must
    // never look stale.
    if pipeline.stale_after_secs <= pipeline.job_timeout_secs + relay.timeout_secs {
        return Err(invalid(
            "pipeline.stale_after_secs must exceed pipeline.job_timeout_secs plus relay.timeout_secs",
        ));
    }
    if pipeline.batch_size == 0 {
        return Err(invalid("pipeline.batch_size must be at least 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationMode;
    use crate::config::RelayTls;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "groups_file": "/etc/sheetrelay/groups.json",
        "mailbox": {
            "host": "imap.example.com",
            "username": "inbox@example.com",
            "password_env_var": "MAILBOX_PASSWORD",
            "allowed_senders": ["reports@partner.example", "@branch.example"]
        },
        "relay": {
            "host": "smtp.example.com",
            "username": "relay@example.com",
            "password": "secret",
            "from_address": "relay@example.com"
        }
    }
    "#;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.mailbox.port, 993);
        assert_eq!(config.mailbox.folder, "INBOX");
        assert_eq!(config.mailbox.attachment_extensions, vec!["xlsx", "xls"]);
        assert_eq!(config.mailbox.max_attachment_size, 10_485_760);
        assert_eq!(
            config.mailbox.auth.password_env_var.as_deref(),
            Some("MAILBOX_PASSWORD")
        );
        assert_eq!(config.relay.port, 587);
        assert_eq!(config.relay.tls, RelayTls::Starttls);
        assert_eq!(config.relay.max_attempts, 3);
        assert_eq!(config.relay.base_delay_secs, 4);
        assert_eq!(config.relay.max_delay_secs, 10);
        assert_eq!(config.pipeline.aggregation, AggregationMode::WholeFile);
        assert!(config.pipeline.worker_count >= 1);
        assert_eq!(config.known_region_list().len(), 81);
        assert!(config.database_file().ends_with("data/sheetrelay.db"));
    }

    #[test]
    fn test_explicit_values() {
        let json = MINIMAL.replace(
            r#""from_address": "relay@example.com""#,
            r#""from_address": "relay@example.com", "tls": "implicit", "port": 465"#,
        );
        let json = json.replace(
            r#""groups_file""#,
            r#""pipeline": {"worker_count": 2, "aggregation": "matched_rows"},
               "known_regions": ["North", "South"],
               "groups_file""#,
        );
        let config = load_config_from_str(&json).unwrap();
        assert_eq!(config.relay.tls, RelayTls::Implicit);
        assert_eq!(config.relay.port, 465);
        assert_eq!(config.pipeline.worker_count, 2);
        assert_eq!(config.pipeline.aggregation, AggregationMode::MatchedRows);
        assert_eq!(config.known_region_list(), vec!["North", "South"]);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let json = MINIMAL.replace(r#""1.0""#, r#""2.0""#);
        let err = load_config_from_str(&json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_empty_allow_list_rejected() {
        let json = MINIMAL.replace(
            r#"["reports@partner.example", "@branch.example"]"#,
            "[]",
        );
        assert!(load_config_from_str(&json).is_err());
    }

    #[test]
    fn test_duplicate_allow_list_entry_rejected() {
        let json = MINIMAL.replace(
            r#""@branch.example""#,
            r#""REPORTS@partner.example""#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_missing_relay_password_rejected() {
        let json = MINIMAL.replace(r#""password": "secret","#, "");
        assert!(load_config_from_str(&json).is_err());
    }

    #[test]
    fn test_retry_delays_must_be_ordered() {
        let json = MINIMAL.replace(
            r#""from_address": "relay@example.com""#,
            r#""from_address": "relay@example.com", "base_delay_secs": 20"#,
        );
        assert!(load_config_from_str(&json).is_err());
    }

    #[test]
    fn test_huge_job_timeout_rejected() {
        let json = MINIMAL.replace(
            r#""groups_file""#,
            r#""pipeline": {"job_timeout_secs": 18446744073709551615}, "groups_file""#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("pipeline.job_timeout_secs"));
    }

    #[test]
    fn test_stale_after_must_exceed_job_budget() {
        let json = MINIMAL.replace(
            r#""groups_file""#,
            r#""pipeline": {"job_timeout_secs": 600, "stale_after_secs": 600}, "groups_file""#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("stale_after_secs"));

        let json = MINIMAL.replace(
            r#""groups_file""#,
            r#""pipeline": {"job_timeout_secs": 600, "stale_after_secs": 3600}, "groups_file""#,
        );
        assert!(load_config_from_str(&json).is_ok());
    }

    #[test]
    fn test_zero_network_timeouts_rejected() {
        let json = MINIMAL.replace(
            r#""host": "imap.example.com","#,
            r#""host": "imap.example.com", "io_timeout_secs": 0,"#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("mailbox.io_timeout_secs"));

        let json = MINIMAL.replace(
            r#""host": "smtp.example.com","#,
            r#""host": "smtp.example.com", "timeout_secs": 0,"#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("relay.timeout_secs"));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/nonexistent/sheetrelay.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
