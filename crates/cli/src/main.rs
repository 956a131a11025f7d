//! dbsync command-line tool.
//!
//! Reconciles the local and remote PostgreSQL databases in the chosen
//! direction. The detailed record goes to the log file; the terminal only
//! gets a one-line status and a pointer to the log.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use dbsync_core::config::SyncConfig;
use dbsync_core::db::PgConnector;
use dbsync_core::startup::{self, DeploymentProfile, StartupOutcome};
use dbsync_core::{Connector, SyncDirection, SyncEngine, SyncReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Bidirectional PostgreSQL table reconciliation.
#[derive(Parser, Debug)]
#[command(
    name = "dbsync",
    version,
    about = "Reconcile a local and a remote PostgreSQL database"
)]
struct Cli {
    /// Optional TOML configuration file; `DBSYNC_*` variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sync direction.
    #[arg(short, long, global = true, default_value = "smart-sync")]
    direction: SyncDirection,

    /// Log SQL-level detail.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Detailed log file (default: database_sync.log).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Also write the sync report as JSON to this path.
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync (the default when no subcommand is given).
    Sync,

    /// Validate the configuration and ping both databases.
    Check,

    /// Print the dependency-ordered table list of the local database.
    Plan,

    /// Pre-start hook: smart sync on local development, bounded by the
    /// startup timeout. Always exits 0.
    PreStart {
        #[arg(long, default_value = "local-development")]
        profile: DeploymentProfile,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            // The pre-start hook must never block the application.
            return match cli.command {
                Some(Commands::PreStart { .. }) => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    if let Some(ref path) = cli.log_file {
        config.log.file = path.clone();
    }

    let _guard = match init_logging(&config.log.file, &config.log.level, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "dbsync failed");
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: SyncConfig) -> Result<ExitCode> {
    let connector: Arc<dyn Connector> = Arc::new(PgConnector::new(
        config.sync.connect_timeout(),
        config.sync.statement_timeout(),
    ));
    let log_file = config.log.file.clone();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let engine = SyncEngine::new(config, connector);
            let report = engine.run(cli.direction).await;
            if let Some(ref path) = cli.report {
                write_report(&report, path)?;
            }
            print_status(&report, &log_file);
            Ok(exit_code(&report))
        }
        Commands::Check => cmd_check(config, connector).await,
        Commands::Plan => cmd_plan(config, connector).await,
        Commands::PreStart { profile } => {
            match startup::run_pre_start_sync(&config, profile, connector).await {
                StartupOutcome::Skipped => {
                    println!("{}", style::dim(&format!("pre-start sync skipped ({profile})")));
                }
                StartupOutcome::Completed(report) => {
                    if let Some(ref path) = cli.report {
                        write_report(&report, path)?;
                    }
                    print_status(&report, &log_file);
                }
                StartupOutcome::TimedOut => {
                    println!(
                        "{}",
                        style::warn(&format!(
                            "pre-start sync timed out after {}s, continuing",
                            config.sync.startup_timeout_secs
                        ))
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::load(path).context("invalid configuration")
}

/// Send all tracing output, without colour, to an append-only log file.
fn init_logging(path: &Path, level: &str, verbose: bool) -> Result<WorkerGuard> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("log file path '{}' has no file name", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory '{}'", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let default_level = if verbose { "debug" } else { level };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install logger: {e}"))?;

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn exit_code(report: &SyncReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_status(report: &SyncReport, log_file: &Path) {
    let line = report.status_line();
    if report.is_success() {
        println!("{}", style::success(&line));
    } else {
        println!("{}", style::error(&line));
    }
    println!("{}", style::dim(&format!("details: {}", log_file.display())));
}

fn write_report(report: &SyncReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to '{}'", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_check(config: SyncConfig, connector: Arc<dyn Connector>) -> Result<ExitCode> {
    println!("{}", style::success("configuration is valid"));

    let engine = SyncEngine::new(config, connector);
    let mut healthy = true;
    for (endpoint, outcome) in engine.check().await {
        match outcome {
            Ok(()) => println!("{}", style::success(&format!("{endpoint} reachable"))),
            Err(e) => {
                healthy = false;
                println!("{}", style::error(&e.to_string()));
            }
        }
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_plan(config: SyncConfig, connector: Arc<dyn Connector>) -> Result<ExitCode> {
    let engine = SyncEngine::new(config, connector);
    let plan = engine
        .plan()
        .await
        .context("cannot read the local database catalog")?;

    println!();
    println!(
        "{} {}",
        style::header("Sync order"),
        style::direction(SyncDirection::LocalToRemote)
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Table", "Primary key", "Sequence", "Depends on"]);

    for (i, desc) in plan.ordered_tables().enumerate() {
        let parents: Vec<&str> = plan
            .schema
            .edges
            .iter()
            .filter(|e| e.child == desc.name)
            .map(|e| e.parent.as_str())
            .collect();
        let key = if desc.has_primary_key() {
            Cell::new(desc.primary_key.join(", "))
        } else {
            Cell::new("none (append)").fg(comfy_table::Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&desc.name),
            key,
            Cell::new(desc.sequence.as_deref().unwrap_or("-")),
            Cell::new(if parents.is_empty() {
                "-".to_string()
            } else {
                parents.join(", ")
            }),
        ]);
    }

    println!("{table}");
    for (name, reason) in &plan.schema.unreadable {
        println!("{}", style::error(&format!("{name}: {reason}")));
    }
    if let Some(ref w) = plan.order.warning {
        println!("{}", style::warn(&w.to_string()));
    }
    println!();

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_direction_is_smart_sync() {
        let cli = Cli::try_parse_from(["dbsync"]).unwrap();
        assert_eq!(cli.direction, SyncDirection::SmartSync);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_direction_and_subcommand() {
        let cli = Cli::try_parse_from(["dbsync", "--direction", "both", "-v", "check"]).unwrap();
        assert_eq!(cli.direction, SyncDirection::Both);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Check)));

        let cli = Cli::try_parse_from(["dbsync", "pre-start", "--profile", "hosted"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::PreStart {
                profile: DeploymentProfile::Hosted
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_direction() {
        assert!(Cli::try_parse_from(["dbsync", "--direction", "sideways"]).is_err());
    }

    #[test]
    fn test_report_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = SyncReport::new(SyncDirection::LocalToRemote);
        report.finish();
        write_report(&report, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["direction"], "local-to-remote");
        assert_eq!(value["tables"].as_array().map(Vec::len), Some(0));
    }
}
