use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wdlci::config::{CiConfig, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "wdlci",
    about = "Continuous-integration runner for WDL workflows on a Cromwell server",
    version,
    long_about = None
)]
struct Cli {
    /// Execution server address (overrides the config file and cromshell settings)
    server: Option<String>,

    /// Path to a wdlci.toml configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// List discovered tests and exit without contacting any service
    #[arg(long)]
    list: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Config loading runs before the configured subscriber exists; its
/// fallback warnings go through a plain stderr subscriber instead.
fn load_config(path: Option<&Path>) -> Result<CiConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || match path {
        Some(path) => CiConfig::load(path),
        None => Ok(CiConfig::load_or_default()),
    })
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = env_filter(&logging.level);

    match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    if cli.list {
        let found = wdlci::discovery::discover(
            &config.paths.test_inputs_dir,
            &config.paths.disabled_tests,
        )?;
        for test in &found.candidates {
            let mark = if found.is_disabled(test) { ' ' } else { '*' };
            println!("[{}] {}", mark, test.input_path.display());
        }
        println!(
            "{} tests, {} disabled.",
            found.candidates.len(),
            found.disabled_count()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let report = match wdlci::run(&config, cli.server.as_deref()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(verdict = "FAIL", "aborting run: {:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.format_table());
    }

    Ok(ExitCode::from(report.exit_code()))
}
