//! camb-pipes command line entry point
//!
//! Runs the executable once (or twice for a derivative) and prints the
//! decoded tables as JSON on stdout.
//!
//! Usage: `camb-pipes <executable> [--defaults FILE] [--settings FILE]
//! [--derivative KEY --step STEP] [key=value ...]`

use anyhow::{anyhow, bail, Context};
use camb_pipes::{CambError, CambRunner, DefaultsSource, ParameterSet, RunnerSettings};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "camb-pipes")]
#[command(about = "Run a parameter-file driven solver through named pipes")]
struct Args {
    /// Path to the executable
    executable: PathBuf,

    /// Default parameter file (built-in defaults if omitted)
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Runner settings TOML (platform config dir if omitted)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Overall timeout in milliseconds, overrides the settings file
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Differentiate every output with respect to this parameter
    #[arg(long, requires = "step")]
    derivative: Option<String>,

    /// Finite-difference step for --derivative
    #[arg(long, allow_hyphen_values = true)]
    step: Option<f64>,

    /// Parameter overrides as key=value
    overrides: Vec<String>,
}

fn parse_overrides(pairs: &[String]) -> anyhow::Result<ParameterSet> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("override {:?} is not key=value", pair))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("override {:?} has an empty key", pair);
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = match &args.settings {
        Some(path) => RunnerSettings::load(path)?,
        None => RunnerSettings::load_or_default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        settings.timeout_ms = Some(timeout_ms);
    }

    let defaults = args.defaults.clone().map(DefaultsSource::Path);
    let runner = CambRunner::configure_with(&args.executable, defaults, settings)
        .with_context(|| format!("Failed to prepare {:?}", args.executable))?;
    let overrides = parse_overrides(&args.overrides)?;

    let json = match (&args.derivative, args.step) {
        (Some(key), Some(step)) => {
            let result = runner.derivative(key, &overrides, step)?;
            serde_json::json!({
                "param": result.param,
                "step": result.step,
                "tables": result.tables,
                "stdout": [
                    String::from_utf8_lossy(&result.stdout.0),
                    String::from_utf8_lossy(&result.stdout.1),
                ],
            })
        }
        _ => match runner.invoke(&overrides) {
            Ok(result) => {
                for warning in &result.warnings {
                    tracing::warn!("{}: {}", warning.channel, warning.message);
                }
                serde_json::to_value(&result)?
            }
            Err(CambError::ProcessFailed { status, partial }) => {
                eprint!("{}", partial.stdout_lossy());
                eprint!("{}", partial.stderr_lossy());
                bail!("executable exited with {}", status);
            }
            Err(e) => return Err(e.into()),
        },
    };

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,camb_pipes=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        tracing::error!("{:#}", e);
        process::exit(1);
    }
}
