use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use std::env;
use std::path::PathBuf;

use umdpack::config::Config;
use umdpack::orchestrator::BundleOrchestrator;

/// Bundle a CommonJS library into one standalone script exposed under a global namespace.
///
/// The entry module, namespace and output location come from umdpack.toml,
/// UMDPACK_* environment variables or the built-in defaults.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = match cli.verbose {
        0 => "warn",  // Default: warnings and errors only
        1 => "info",  // -v: informational messages
        2 => "debug", // -vv: debug messages
        _ => "trace", // -vvv or more: trace messages
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    debug!(
        "Verbosity level: {} (log level: {})",
        cli.verbose, log_level
    );
    info!("Starting umdpack");

    let config = Config::load(cli.config.as_deref())?;
    debug!("Configuration: {:?}", config);

    let project_root = env::current_dir().context("Failed to determine the project root")?;
    let build_config = config.into_build_config(&project_root)?;
    info!(
        "Bundling {:?} as {} into {:?}",
        build_config.entry,
        build_config.namespace,
        build_config.output_path()
    );

    let report = BundleOrchestrator::new(build_config).build()?;
    debug!("Build report: {:?}", report);

    #[allow(clippy::print_stdout)]
    {
        println!("Build completed successfully!");
    }

    Ok(())
}
