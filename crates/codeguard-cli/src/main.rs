//! Codeguard CLI
//!
//! A command-line tool for runtime analysis of Python snippets.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codeguard::config::is_timeout_secs;
use codeguard::{Analyzer, Classification, Config, EXAMPLE_CONFIG, FilterVerdict};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code when the snippet ran without any finding
const EXIT_CLEAN: u8 = 0;
/// Exit code when at least one category was found (or the filter denied)
const EXIT_FINDING: u8 = 1;
/// Exit code when the analysis was skipped
const EXIT_SKIPPED: u8 = 2;

#[derive(Parser)]
#[command(name = "codeguard")]
#[command(about = "Run untrusted code snippets and classify how they fail")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet and print its classification as JSON
    Analyze {
        /// Source file to analyze, or `-` for stdin
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Wall clock limit in seconds (default: from configuration)
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Do not try the container backend
        #[arg(long)]
        no_container: bool,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Check a snippet against the import deny-list without running it
    Check {
        /// Source file to check, or `-` for stdin
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: codeguard.toml)
        #[arg(short, long, default_value = "codeguard.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Analyze {
            source,
            timeout,
            no_container,
            pretty,
        } => run_analyze(config, &source, timeout, no_container, pretty).await,
        Commands::Check { source } => run_check(&config, &source),
        Commands::Init { output, force } => {
            init_config(&output, force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_analyze(
    mut config: Config,
    source: &Path,
    timeout: Option<f64>,
    no_container: bool,
    pretty: bool,
) -> Result<ExitCode> {
    let code = read_source(source)?;

    let timeout = match timeout {
        Some(secs) => parse_timeout(secs)?,
        None => config.timeout(),
    };

    if no_container {
        config.container.enabled = false;
    }

    let analyzer = Analyzer::connect(&config).await;
    info!(
        container = analyzer.has_container(),
        ?timeout,
        "analyzing snippet"
    );
    let classification = analyzer.analyze(&code, timeout).await;

    let json = if pretty {
        serde_json::to_string_pretty(&classification)
    } else {
        serde_json::to_string(&classification)
    }
    .context("failed to serialize classification")?;
    println!("{json}");

    Ok(ExitCode::from(exit_code(&classification)))
}

fn parse_timeout(secs: f64) -> Result<Duration> {
    if !is_timeout_secs(secs) {
        anyhow::bail!("timeout must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs).context("invalid timeout")
}

fn exit_code(classification: &Classification) -> u8 {
    if classification.skipped {
        EXIT_SKIPPED
    } else if classification.has_findings() {
        EXIT_FINDING
    } else {
        EXIT_CLEAN
    }
}

fn run_check(config: &Config, source: &Path) -> Result<ExitCode> {
    let code = read_source(source)?;

    match config.safety_filter().check(&code) {
        FilterVerdict::Permitted => {
            println!("permitted");
            Ok(ExitCode::from(EXIT_CLEAN))
        }
        FilterVerdict::Denied(module) => {
            println!("denied: imports '{module}'");
            Ok(ExitCode::from(EXIT_FINDING))
        }
    }
}

/// Read a source file, or stdin for `-`
fn read_source(source: &Path) -> Result<String> {
    if source == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read source from stdin")?;
        Ok(code)
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("failed to read source file '{}'", source.display()))
    }
}

fn show_config(config: &Config) {
    println!("Timeout: {}s", config.timeout_secs);
    println!(
        "Fall back on container timeout: {}",
        config.container_timeout_fallback
    );
    println!();
    println!("Container backend:");
    println!("  Enabled: {}", config.container.enabled);
    println!("  Image: {}", config.container.image);
    println!("  Interpreter: {}", config.container.interpreter);
    println!("  Memory limit: {} MB", config.container.memory_mb);
    println!(
        "  CPU: {}/{} us",
        config.container.cpu_quota, config.container.cpu_period
    );
    println!("  Max processes: {}", config.container.pids_limit);
    if let Some(dir) = &config.container.scratch_dir {
        println!("  Scratch dir: {}", dir.display());
    }
    println!();
    println!("Subprocess backend:");
    println!("  Enabled: {}", config.subprocess.enabled);
    println!("  Interpreter: {}", config.subprocess.interpreter.display());
    if let Some(dir) = &config.subprocess.scratch_dir {
        println!("  Scratch dir: {}", dir.display());
    }
    println!();
    println!(
        "Denied modules: {}",
        config.filter.denied_modules.join(", ")
    );
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
