//! squash-tester - exercise a Squash server end to end
//!
//! Records a handled error, an uncaught panic or a fatal signal against the
//! given project, and delivers whatever is queued. Useful for checking that a
//! freshly installed server accepts occurrences.
//!
//! Queued occurrences are always sent before the interceptor is hooked, so a
//! `--crash` or `--signal` run is delivered by the next invocation.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use squash_core::{Config, Interceptor, ReportSummary, SquashClient};

const DEFAULT_HOST: &str = "http://localhost:3000";
const API_KEY_ENV: &str = "SQUASH_TESTER_API_KEY";
const HOST_ENV: &str = "SQUASH_TESTER_HOST";

#[derive(Parser)]
#[command(name = "squash-tester")]
#[command(about = "Send test occurrences to a Squash server")]
#[command(version)]
#[command(group(ArgGroup::new("mode").args(["immediate", "crash", "signal", "send"])))]
struct Args {
    /// Record a handled error and send it right away (the default)
    #[arg(short, long)]
    immediate: bool,

    /// Die with an uncaught panic; it is sent on the next run
    #[arg(short, long)]
    crash: bool,

    /// Die with SIGABRT; it is sent on the next run
    #[arg(short, long)]
    signal: bool,

    /// Only send occurrences queued by earlier runs
    #[arg(short = 'S', long)]
    send: bool,

    /// Revision to report (defaults to `git rev-parse HEAD`)
    #[arg(short, long)]
    revision: Option<String>,

    /// Project API key (SQUASH_TESTER_API_KEY takes precedence)
    #[arg(short = 'A', long)]
    apikey: Option<String>,

    /// Environment name
    #[arg(short, long, default_value = "development")]
    env: String,

    /// Squash server (defaults to SQUASH_TESTER_HOST, then http://localhost:3000)
    #[arg(long)]
    host: Option<String>,

    /// Folder occurrences are queued under
    #[arg(long)]
    occurrence_root: Option<PathBuf>,
}

/// Error raised on purpose by the tester
#[derive(Debug, thiserror::Error)]
#[error("Boom! It went off {seconds} seconds after the epoch")]
struct StBoomError {
    seconds: u64,
}

impl StBoomError {
    fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self { seconds }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    // Log to the state directory once the tool is configured, else to stderr
    let _log_guard = if Config::config_path().exists() {
        Some(
            squash_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        squash_core::logging::init_stderr(&config.logging.level);
        None
    };

    let mut client_config = config.client;
    client_config.api_key = std::env::var(API_KEY_ENV).ok().or(args.apikey);
    if client_config.api_key.is_none() {
        bail!("an API key is required: pass --apikey or set {}", API_KEY_ENV);
    }
    client_config.host = Some(
        args.host
            .or_else(|| std::env::var(HOST_ENV).ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
    );
    client_config.environment = Some(args.env);
    client_config.revision = Some(match args.revision {
        Some(revision) => revision,
        None => git_head().context("failed to determine revision; pass --revision")?,
    });
    if let Some(root) = args.occurrence_root {
        client_config.occurrence_root = root;
    }

    tracing::info!(
        host = client_config.host.as_deref().unwrap_or_default(),
        environment = client_config.environment.as_deref().unwrap_or_default(),
        "squash-tester starting"
    );
    let client = Arc::new(SquashClient::new(client_config));

    let summary = client
        .report_errors_http()
        .context("failed to send queued occurrences")?;
    print_summary(&summary);
    if args.send {
        return Ok(());
    }

    let _interceptor =
        Interceptor::hook(Arc::clone(&client)).context("failed to hook the interceptor")?;

    if args.signal {
        println!("Raising SIGABRT");
        std::process::abort();
    }
    if args.crash {
        println!("Panicking");
        panic!("{}", StBoomError::now());
    }

    let id = client
        .record_error(&StBoomError::now())
        .context("failed to record occurrence")?;
    if let Some(id) = id {
        println!("Recorded occurrence {}", id);
    }
    let summary = client
        .report_errors_http()
        .context("failed to send occurrence")?;
    print_summary(&summary);

    Ok(())
}

fn git_head() -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .context("failed to run git")?;
    if !output.status.success() {
        bail!("git rev-parse HEAD exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn print_summary(summary: &ReportSummary) {
    if summary.aborted {
        println!(
            "Delivered {}, discarded {}, {} left queued (delivery aborted)",
            summary.delivered, summary.discarded, summary.left_queued
        );
    } else {
        println!(
            "Delivered {}, discarded {}",
            summary.delivered, summary.discarded
        );
    }
}
