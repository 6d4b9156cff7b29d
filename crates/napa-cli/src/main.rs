//! Napa CLI
//!
//! Loads a JavaScript file into a container and runs one of its functions.
//!
//! ```text
//! napa scripts/math.js add 1 2 --container "--cores 2" --timeout 500
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use napa_runtime::{Container, ContainerSettings, NapaConfig, PlatformSettings, ResponseCode};

/// Run a JavaScript function in a napa container
#[derive(Parser, Debug)]
#[command(name = "napa")]
#[command(about = "Run a JavaScript function in a napa container", long_about = None)]
struct Args {
    /// JavaScript file to load
    file: PathBuf,

    /// Function to run, dotted paths allowed (e.g. `math.add`)
    function: String,

    /// Arguments, each a JSON document
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,

    /// Time limit in milliseconds (0 means none)
    #[arg(short, long, default_value_t = 0)]
    timeout: u32,

    /// Platform settings string
    #[arg(long, default_value = "", allow_hyphen_values = true, conflicts_with = "config")]
    platform: String,

    /// Container settings string
    #[arg(long, default_value = "", allow_hyphen_values = true, conflicts_with = "config")]
    container: String,

    /// TOML file with [platform] and [container] tables
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<String> {
    let (platform, container) = settings(args)?;

    let code = napa_runtime::initialize_with(platform);
    if code != ResponseCode::Success {
        bail!("failed to initialize napa: {}", code);
    }

    let result = execute(args, container);
    let code = napa_runtime::shutdown();
    debug!("Platform shutdown: {:?}", code);
    result
}

fn settings(args: &Args) -> Result<(PlatformSettings, ContainerSettings)> {
    if let Some(path) = &args.config {
        let config = NapaConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        return Ok((config.platform, config.container));
    }

    let platform = PlatformSettings::parse_settings(&args.platform)
        .context("invalid --platform settings")?;
    let container = ContainerSettings::parse_settings(&args.container)
        .context("invalid --container settings")?;
    Ok((platform, container))
}

fn execute(args: &Args, settings: ContainerSettings) -> Result<String> {
    let container = Container::with_settings(settings).context("failed to create container")?;
    info!(
        "Container {} running {} isolates",
        container.id(),
        container.cores()
    );

    let code = container.load_file_sync(&args.file);
    if code != ResponseCode::Success {
        bail!("failed to load {}: {}", args.file.display(), code);
    }

    let response = container.run_sync(&args.function, args.args.as_slice(), args.timeout);
    if !response.is_success() {
        bail!("{} ({:?}): {}", args.function, response.code, response.error);
    }
    Ok(response.return_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "napa",
            "--timeout",
            "250",
            "--container",
            "--cores 2",
            "math.js",
            "add",
            "-1",
            "{\"x\": 2}",
        ])
        .unwrap();
        assert_eq!(args.file, PathBuf::from("math.js"));
        assert_eq!(args.function, "add");
        assert_eq!(args.args, vec!["-1".to_string(), "{\"x\": 2}".to_string()]);
        assert_eq!(args.timeout, 250);
        assert_eq!(args.container, "--cores 2");
    }

    #[test]
    fn test_config_conflicts_with_inline_settings() {
        let result = Args::try_parse_from([
            "napa",
            "math.js",
            "add",
            "--config",
            "napa.toml",
            "--container",
            "--cores 2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_from_strings() {
        let args = Args::try_parse_from([
            "napa",
            "math.js",
            "add",
            "--platform",
            "--completion-threads 3",
            "--container",
            "--cores 4 --name cli",
        ])
        .unwrap();
        let (platform, container) = settings(&args).unwrap();
        assert_eq!(platform.completion_threads, 3);
        assert_eq!(container.cores, 4);
        assert_eq!(container.name, "cli");
    }
}
