//! Compatibility Check CLI
//!
//! Runs the compatibility matrix and the individual conversions behind it.
//!
//! Usage:
//!   compat-check --root ./test-data --current-version 1.2.0 matrix
//!   compat-check to-columnar datasets/customer.csv out/customer.plain.col
//!   compat-check compare expected.csv actual.csv --unordered

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use columnar_compat::equivalence::file_rows;
use columnar_compat::{
    compare_ordered, compare_unordered, convert_columnar_to_text, convert_text_to_columnar, schema_path_for,
    CompatConfig, CompatibilityRunner, ExternalSorter, MatrixReport, RowGroupFormat, Schema, TracingReporter,
    UnitOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compat-check")]
#[command(about = "Check columnar artifacts across releases and producers")]
struct Cli {
    /// Config file layered over compat.toml and COMPAT__* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Test-data root
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Release under test
    #[arg(long, global = true)]
    current_version: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full compatibility matrix
    Matrix {
        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Convert a text artifact to a columnar artifact
    ToColumnar {
        text: PathBuf,
        output: PathBuf,
        /// Encoding variant (plain, dict)
        #[arg(short, long, default_value = "plain")]
        variant: String,
        /// Schema file; defaults to the sibling of the text file
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Convert a columnar artifact to a text artifact
    ToText { columnar: PathBuf, output: PathBuf },

    /// Compare two text artifacts
    Compare {
        expected: PathBuf,
        actual: PathBuf,
        /// Ignore row order
        #[arg(long)]
        unordered: bool,
    },

    /// List earlier releases found under the root
    Versions,

    /// Show or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to a file
    Init {
        #[arg(default_value = "compat.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CompatConfig> {
    let mut config = CompatConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(root) = &cli.root {
        config.layout.root = root.clone();
    }
    if let Some(version) = &cli.current_version {
        config.runner.current_version = version.clone();
    }
    Ok(config)
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    let format = RowGroupFormat::new();

    match cli.command {
        Commands::Matrix { output, format: out_format } => {
            let reporter = TracingReporter;
            let runner = CompatibilityRunner::new(&format, &reporter, config)?;
            let report = runner.run_matrix()?;

            if let Some(path) = &output {
                std::fs::write(path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }
            match out_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_text_report(&report),
            }
            Ok(report.is_success())
        }

        Commands::ToColumnar {
            text,
            output,
            variant,
            schema,
        } => {
            let schema_path = schema.unwrap_or_else(|| schema_path_for(&config.artifact_layout(), &text));
            let schema = Schema::from_file(&schema_path)
                .with_context(|| format!("reading schema {}", schema_path.display()))?;
            let rows = convert_text_to_columnar(
                &format,
                config.transcoder(),
                &text,
                &schema,
                &output,
                &config.encode_options(&variant),
            )?;
            println!("Wrote {} rows to {}", rows, output.display());
            Ok(true)
        }

        Commands::ToText { columnar, output } => {
            let rows = convert_columnar_to_text(&format, config.transcoder(), &columnar, &output)?;
            println!("Wrote {} rows to {}", rows, output.display());
            Ok(true)
        }

        Commands::Compare {
            expected,
            actual,
            unordered,
        } => {
            let result = if unordered {
                let sorter = ExternalSorter::new(config.sort_config());
                compare_unordered(file_rows(&expected)?, file_rows(&actual)?, &sorter)?
            } else {
                compare_ordered(file_rows(&expected)?, file_rows(&actual)?)?
            };
            println!("{}", result.summary());
            Ok(result.is_match())
        }

        Commands::Versions => {
            let reporter = TracingReporter;
            let runner = CompatibilityRunner::new(&format, &reporter, config)?;
            let prior = runner.prior_versions();
            if prior.is_empty() {
                println!("No releases before {}", runner.current_version());
            }
            for dir in prior {
                println!("{}  {}", dir.version, dir.path.display());
            }
            Ok(true)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(true)
            }
            ConfigAction::Init { path, force } => {
                write_config(&config, &path, force)?;
                println!("Wrote {}", path.display());
                Ok(true)
            }
        },
    }
}

fn write_config(config: &CompatConfig, path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn print_text_report(report: &MatrixReport) {
    println!("Compatibility matrix for {}\n", report.current_version);
    for unit in &report.units {
        let (mark, detail) = match &unit.outcome {
            UnitOutcome::Passed(result) => ("PASS", format!("{} rows", result.matched_rows)),
            UnitOutcome::Failed(result) => ("FAIL", result.summary()),
            UnitOutcome::Error(message) => ("ERROR", message.clone()),
            UnitOutcome::Skipped(reason) => ("SKIP", reason.clone()),
        };
        println!("  {:<5} {}  {}", mark, unit.unit, detail);
    }
    println!(
        "\n{} passed, {} failed, {} skipped",
        report.passed(),
        report.failed(),
        report.skipped()
    );
}
