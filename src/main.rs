//! AbuseIPDB login gate CLI.

use abuseipdb_login_gate::{Config, RawSettings, ReputationGate};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "abuseipdb-login-gate")]
#[command(about = "Evaluate a login's client address against AbuseIPDB and print the decision")]
#[command(version)]
struct Args {
    /// Client address or forwarded-address list (first entry is used)
    #[arg(short, long, env = "CLIENT_IP")]
    forwarded_for: Option<String>,

    /// YAML settings file (defaults to the process environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(ExitCode::SUCCESS);
    }

    // Logs go to stderr; stdout carries the decision.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            RawSettings::load_yaml(path)?
        }
        None => RawSettings::from_env(),
    };

    if args.validate {
        Config::from_settings(&settings)?;
        info!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let gate = ReputationGate::new()?;
    let evaluation = gate.evaluate(&settings, args.forwarded_for.as_deref()).await;

    println!("{}", serde_json::to_string(&evaluation.decision)?);

    Ok(if evaluation.decision.is_allow() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
