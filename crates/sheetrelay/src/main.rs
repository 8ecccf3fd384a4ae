//! `sheetrelay` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use sheetrelay::orchestrator::{self, Orchestrator};
use sheetrelay::telemetry::{init_logging, LogFormat};
use sheetrelay::{load_config, Config, Result, SheetRelayError};

/// Routes spreadsheet rows received by email to regional destination groups.
#[derive(Debug, Parser)]
#[command(name = "sheetrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "SHEETRELAY_CONFIG", default_value = "sheetrelay.json")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Output format for reports.
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll and process on the configured interval until interrupted.
    Run,
    /// Poll the mailbox once and admit new attachments.
    Poll,
    /// Process all pending jobs once.
    Process,
    /// Move failed jobs back to pending.
    Requeue,
    /// Show job counts per status.
    Stats,
    /// Verify the mailbox and the outbound relay are reachable.
    Check,
    /// Show per-group delivery records of a job.
    History {
        /// Job id, `sender/filename`.
        job_id: String,
    },
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sheetrelay failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => run_daemon(&config),
        Commands::Poll => {
            let orchestrator = Orchestrator::from_config(&config)?;
            let report = runtime()?.block_on(orchestrator.poll_now())?;
            println!(
                "messages: {}  admitted: {}  duplicates: {}  failed: {}",
                report.messages, report.admitted, report.duplicates, report.failed
            );
            Ok(())
        }
        Commands::Process => {
            let orchestrator = Orchestrator::from_config(&config)?;
            install_signal_handler(&orchestrator)?;
            let report = orchestrator.process_pending()?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => println!(
                    "submitted: {}  succeeded: {}  failed: {}  skipped: {}  reclaimed: {}",
                    report.submitted,
                    report.succeeded,
                    report.failed,
                    report.skipped,
                    report.reclaimed
                ),
            }
            Ok(())
        }
        Commands::Check => {
            let orchestrator = Orchestrator::from_config(&config)?;
            let mailbox = runtime()?.block_on(orchestrator.check_mailbox());
            let relay = orchestrator.check_relay();
            report_check("mailbox", &mailbox);
            report_check("relay", &relay);
            mailbox.and(relay)
        }
        Commands::Requeue => {
            let db = orchestrator::open_store(&config)?;
            let count = orchestrator::requeue_failed(&db)?;
            println!("requeued {} job(s)", count);
            Ok(())
        }
        Commands::Stats => {
            let db = orchestrator::open_store(&config)?;
            let counts = orchestrator::status_counts(&db)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&counts)?),
                OutputFormat::Text => {
                    println!("pending     {:>6}", counts.pending);
                    println!("processing  {:>6}", counts.processing);
                    println!("success     {:>6}", counts.success);
                    println!("failed      {:>6}", counts.failed);
                    println!("total       {:>6}", counts.total());
                    if let Some(last) = &counts.last_processed_at {
                        println!("last processed at {}", last);
                    }
                }
            }
            Ok(())
        }
        Commands::History { job_id } => {
            let db = orchestrator::open_store(&config)?;
            let Some(job) = orchestrator::find_job(&db, &job_id)? else {
                println!("no job {}", job_id);
                return Ok(());
            };
            let records = orchestrator::dispatch_history(&db, &job_id)?;
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "job": job,
                        "dispatches": records,
                    }))?
                ),
                OutputFormat::Text => {
                    println!(
                        "{}  status={}  size={}  received={}",
                        job.id,
                        job.status.as_str(),
                        job.size_bytes
                            .map_or_else(|| "unknown".to_string(), |n| format!("{} bytes", n)),
                        job.created_at
                    );
                    if let Some(error) = &job.error {
                        println!("error: {}", error);
                    }
                    if records.is_empty() {
                        println!("no dispatch records");
                    }
                    for r in records {
                        println!(
                            "{:<16} {:<10} attempts={} {} {}",
                            r.group_id,
                            r.status.as_str(),
                            r.attempts,
                            r.updated_at,
                            r.error.as_deref().unwrap_or("")
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

fn report_check(name: &str, result: &Result<()>) {
    match result {
        Ok(()) => println!("{:<8} ok", name),
        Err(e) => println!("{:<8} FAILED: {}", name, e),
    }
}

fn run_daemon(config: &Config) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);
    install_signal_handler(&orchestrator)?;
    info!("Starting sheetrelay; press Ctrl+C to stop");
    runtime()?.block_on(orchestrator.run())
}

fn install_signal_handler(orchestrator: &Orchestrator) -> Result<()> {
    let flag = orchestrator.shutdown_flag();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::Relaxed) {
            eprintln!("shutdown requested, finishing in-flight jobs...");
        }
    })
    .map_err(|e| SheetRelayError::Signal(e.to_string()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(SheetRelayError::Runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history() {
        let cli = Cli::parse_from(["sheetrelay", "--config", "c.json", "history", "a@b.example/x.xlsx"]);
        assert_eq!(cli.config, PathBuf::from("c.json"));
        assert!(matches!(cli.command, Commands::History { ref job_id } if job_id == "a@b.example/x.xlsx"));
    }

    #[test]
    fn test_parse_formats() {
        let cli = Cli::parse_from(["sheetrelay", "--log-format", "json", "--format", "json", "stats"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::parse_from(["sheetrelay", "check"]);
        assert!(matches!(cli.command, Commands::Check));
    }
}
