//! squash-release - notify a Squash server of a new deploy
//!
//! Run after shipping a build so occurrences carrying its revision can be
//! matched to source. The revision defaults to the HEAD of the project's git
//! checkout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use squash_core::deploy::{notify_deploy, DeployNotice, DEPLOY_PATH};
use squash_core::HttpTransport;

#[derive(Parser)]
#[command(name = "squash-release")]
#[command(about = "Record a deploy with a Squash server")]
#[command(version)]
struct Args {
    /// Squash server, scheme and port included
    host: String,

    /// Project API key
    api_key: String,

    /// Environment that was deployed to
    environment: String,

    /// Deployed revision (defaults to `git rev-parse HEAD` in the project directory)
    #[arg(short, long)]
    revision: Option<String>,

    /// Machine-readable build identifier
    #[arg(short, long)]
    build: Option<String>,

    /// Human-readable version (defaults to the build)
    #[arg(short = 'v', long)]
    product_version: Option<String>,

    /// Project checkout used to find the revision
    #[arg(short, long, default_value = ".")]
    project_dir: PathBuf,

    /// Seconds to wait for a connection
    #[arg(short, long)]
    open_timeout: Option<u64>,

    /// Seconds to wait for the whole request
    #[arg(short = 't', long)]
    read_timeout: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    squash_core::logging::init_stderr("info");

    let revision = match args.revision {
        Some(revision) => revision,
        None => git_head(&args.project_dir).with_context(|| {
            format!(
                "failed to determine revision in {}",
                args.project_dir.display()
            )
        })?,
    };

    let transport = HttpTransport::with_timeouts(
        &args.host,
        args.open_timeout.map(Duration::from_secs),
        args.read_timeout.map(Duration::from_secs),
    )
    .context("failed to create HTTP transport")?;

    let notice = DeployNotice::new(
        args.api_key,
        args.environment,
        revision,
        args.build,
        args.product_version,
    );
    notify_deploy(&transport, DEPLOY_PATH, &notice).context("failed to record deploy")?;

    println!(
        "Recorded deploy of {} to {}",
        notice.deploy.revision, notice.environment.name
    );
    Ok(())
}

fn git_head(project_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(project_dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .context("failed to run git")?;
    if !output.status.success() {
        bail!("git rev-parse HEAD exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
