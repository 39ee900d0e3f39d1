use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod aggregate;
mod config;
mod error;
mod extract;
mod manual;
mod marks;
mod models;
mod notebook;
mod plots;
mod report;
mod scale;

#[derive(Parser)]
#[command(name = "notebook-grades")]
#[command(about = "Mark aggregation for notebook-based assignments", long_about = None)]
struct Cli {
    /// Assignment configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG)]
    config_path: PathBuf,
    /// Log progress at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Explicit log level or filter, e.g. `info` or `notebook_grades=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the scores in one manual report to a CSV beside it
    ParseManual {
        report: PathBuf,
        #[arg(long, default_value = "SIS Login ID")]
        id_col: String,
    },
    /// Write blank manual reports for a component's manual questions
    ExtractManual {
        component: String,
        #[arg(long)]
        force: bool,
    },
    /// Write the plot-marking notebook for a component
    ExtractPlots {
        component: String,
        #[arg(long)]
        force: bool,
    },
    /// Combine all score sources into the component's marks
    GradeComponent { component: String },
    /// Rescale component marks and write the final grades
    ScaleCombine {
        /// Also write a markdown summary report
        #[arg(long = "report")]
        report_path: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        lowest: usize,
    },
}

fn init_tracing(verbose: bool, log_level: Option<&str>) {
    let level = log_level.unwrap_or(if verbose { "debug" } else { "warn" });
    let filter = EnvFilter::try_from_env("NOTEBOOK_GRADES_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            EnvFilter::new(if level.contains('=') {
                level.to_string()
            } else {
                format!("notebook_grades={level}")
            })
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<config::Config> {
    config::read_config(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_level.as_deref());

    match cli.command {
        Commands::ParseManual { report, id_col } => {
            let parsed = manual::read_manual(&report)?;
            let out = report.with_extension("csv");
            marks::write_scores(&out, &id_col, &parsed.scores)?;
            println!(
                "Wrote {} scores for {} to {}.",
                parsed.scores.len(),
                parsed.question,
                out.display()
            );
        }
        Commands::ExtractManual { component, force } => {
            let config = load_config(&cli.config_path)?;
            let written = extract::extract_manual(&config, &component, force)
                .with_context(|| format!("failed to extract manual answers for {component}"))?;
            for path in written {
                println!("Report written to {}.", path.display());
            }
        }
        Commands::ExtractPlots { component, force } => {
            let config = load_config(&cli.config_path)?;
            let path = extract::extract_plots(&config, &component, force)
                .with_context(|| format!("failed to extract plots for {component}"))?;
            println!("Plot notebook written to {}.", path.display());
        }
        Commands::GradeComponent { component } => {
            let config = load_config(&cli.config_path)?;
            let grades = aggregate::grade_component(&config, &component)
                .with_context(|| format!("failed to grade component {component}"))?;
            let path = aggregate::write_component(&config, &component, &grades)?;
            println!(
                "Marks for {} students written to {}.",
                grades.len(),
                path.display()
            );
        }
        Commands::ScaleCombine {
            report_path,
            lowest,
        } => {
            let config = load_config(&cli.config_path)?;
            let table = scale::scale_combine(&config).context("failed to combine components")?;
            let out = config.final_path();
            marks::write_final(&out, &config.student_id_col, &table)?;
            println!("Final grades written to {}.", out.display());
            print!("{}", report::format_summary(&report::summarize(&table)));

            if let Some(path) = report_path {
                let text = report::build_report(&table, Local::now().date_naive(), lowest);
                marks::atomic_write(&path, text.as_bytes())?;
                println!("Report written to {}.", path.display());
            }
        }
    }

    Ok(())
}
