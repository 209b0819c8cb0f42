mod commands;
mod config;
mod error;
mod evaluation;
mod language;
mod llm;
mod materialize;
mod report;
mod tools;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{EvaluateAllArgs, EvaluateArgs, Outcome};
use crate::config::Config;
use crate::evaluation::ComplexityTier;
use crate::llm::Protocol;
use crate::tools::process::cancellation;

#[derive(Parser)]
#[command(name = "qualitygate")]
#[command(version)]
#[command(about = "Evaluate LLM-generated unit tests with coverage and mutation testing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate tests for a module and write them to a directory
    Generate {
        /// Source file to generate tests for
        #[arg(short, long)]
        module: PathBuf,

        /// Directory the test file is written to
        #[arg(short, long)]
        output: PathBuf,

        /// Prompt protocol (defaults to `evaluation.default_protocol`)
        #[arg(short, long, value_enum)]
        protocol: Option<Protocol>,
    },

    /// Compile, run, measure coverage and mutation-test one module's tests
    Evaluate {
        /// Source file under evaluation
        #[arg(short, long)]
        module: PathBuf,

        /// Existing test file; tests are generated when omitted
        #[arg(short, long)]
        tests: Option<PathBuf>,

        /// Also write Markdown and HTML reports
        #[arg(long)]
        report: bool,

        /// Prompt protocol for generated tests
        #[arg(short, long, value_enum)]
        protocol: Option<Protocol>,

        /// Complexity tier recorded for the module
        #[arg(long, value_enum, default_value_t = ComplexityTier::Baseline)]
        tier: ComplexityTier,
    },

    /// Evaluate a baseline and an experimental module and compare them
    EvaluateAll {
        /// Low-complexity module
        #[arg(long)]
        baseline: PathBuf,

        /// High-complexity module
        #[arg(long)]
        experimental: PathBuf,

        /// Prompt protocol for both modules
        #[arg(short, long, value_enum)]
        protocol: Option<Protocol>,

        /// Estimated minutes to write the baseline tests by hand
        #[arg(long)]
        manual_minutes_baseline: Option<f64>,

        /// Estimated minutes to write the experimental tests by hand
        #[arg(long)]
        manual_minutes_experimental: Option<f64>,

        /// Do not write report files
        #[arg(long)]
        no_report: bool,
    },

    /// Check that the configured LLM endpoint is reachable
    Check,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configuration errors are fatal before anything runs
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            commands::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.general.log_level);

    tracing::debug!(
        "Config path: {}",
        cli.config
            .clone()
            .or_else(Config::default_config_path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );

    let (cancel_handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping external tools");
            cancel_handle.cancel();
        }
    });

    let result = match cli.command {
        Commands::Generate {
            module,
            output,
            protocol,
        } => commands::generate(&config, &module, &output, protocol, &cancel).await,
        Commands::Evaluate {
            module,
            tests,
            report,
            protocol,
            tier,
        } => {
            let args = EvaluateArgs {
                module,
                tests,
                report,
                protocol,
                tier,
            };
            commands::evaluate(config.clone(), args, &cancel).await
        }
        Commands::EvaluateAll {
            baseline,
            experimental,
            protocol,
            manual_minutes_baseline,
            manual_minutes_experimental,
            no_report,
        } => {
            let args = EvaluateAllArgs {
                baseline,
                experimental,
                protocol,
                manual_minutes_baseline,
                manual_minutes_experimental,
                no_report,
            };
            commands::evaluate_all(config.clone(), args, &cancel).await
        }
        Commands::Check => commands::check(&config).await,
    };

    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            commands::print_error(&format!("{:#}", e));
            if cancel.is_cancelled() {
                Outcome::Interrupted.exit_code()
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
