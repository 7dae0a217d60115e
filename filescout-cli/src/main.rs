use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use filescout::{execute, print_results, ModuleResult, Parameters, ScoutConfig};
use std::io;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Search parameters file (JSON, or YAML with a .yaml/.yml extension);
    /// read from stdin when omitted
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Configuration file layered over the global and local ones
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only print files that matched
    #[arg(short, long)]
    found_only: bool,

    /// Print the raw JSON result
    #[arg(short, long)]
    json: bool,

    /// Indent JSON output
    #[arg(long)]
    pretty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Error cap for searches that set no maxerrors (0 for unlimited)
    #[arg(long, default_value = "30")]
    max_errors: u64,
}

impl Cli {
    fn to_config(&self) -> ScoutConfig {
        ScoutConfig {
            log_level: self.log_level.clone(),
            found_only: self.found_only,
            json: self.json,
            pretty: self.pretty,
            max_errors: self.max_errors,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScoutConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?
        .merge_with_cli(cli.to_config());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let mut params = match &cli.params {
        Some(path) => Parameters::from_path(path)
            .with_context(|| format!("failed to read parameters from {}", path.display()))?,
        None => Parameters::from_reader(io::stdin().lock())
            .context("failed to read parameters from stdin")?,
    };
    config.apply_defaults(&mut params);
    debug!("running {} searches", params.searches.len());

    let result = execute(&params);
    if config.json {
        print_json(&result, config.pretty)?;
    } else {
        print_text(&result, config.found_only);
    }

    if !result.success {
        bail!(
            "search failed: {}",
            result.errors.first().map(String::as_str).unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_json(result: &ModuleResult, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{}", out);
    Ok(())
}

fn print_text(result: &ModuleResult, found_only: bool) {
    for line in print_results(result, found_only) {
        if line.starts_with("Statistics:") {
            println!("{}", line.bold());
        } else if line.starts_with("0 match found") {
            println!("{}", line.dimmed());
        } else if result.errors.contains(&line) {
            println!("{}", line.red());
        } else {
            println!("{}", line.green());
        }
    }
}
