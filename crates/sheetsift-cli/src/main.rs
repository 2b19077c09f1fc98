mod commands;
mod logging;
mod progress;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use sheetsift_core::config::normalize_archive_paths;
use sheetsift_core::model::ConflictKind;
use sheetsift_core::orchestrator::OrchestratorOptions;
use sheetsift_core::parser::CsvDocumentParser;
use sheetsift_core::{AppConfig, BatchOrchestrator, ProgressReporter};
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match sheetsift_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Process {
            archives,
            report,
            auto_fix,
        }) => {
            if let Err(err) = run_process(&config, archives, report, auto_fix) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Assess { archives }) => {
            if let Err(err) = run_assess(&config, archives) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn resolve_archives(config: &AppConfig, archives: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    let archives = if archives.is_empty() {
        normalize_archive_paths(config.archive_paths.clone())
            .into_iter()
            .map(PathBuf::from)
            .collect()
    } else {
        archives
    };
    if archives.is_empty() {
        anyhow::bail!("no archives given and no archive_paths configured");
    }
    Ok(archives)
}

fn run_process(
    config: &AppConfig,
    archives: Vec<PathBuf>,
    report_path: Option<PathBuf>,
    auto_fix: Option<f64>,
) -> anyhow::Result<()> {
    let archives = resolve_archives(config, archives)?;

    let mut options = OrchestratorOptions::from(config);
    if let Some(threshold) = auto_fix {
        options.auto_fix_threshold = threshold;
    }

    let orchestrator = BatchOrchestrator::new(options, Arc::new(CsvDocumentParser));

    let reporter: Arc<dyn ProgressReporter> = Arc::new(CliReporter::new());
    let result = orchestrator.process_batch(&archives, &config.tenant, reporter)?;

    println!();
    info!(
        "{} archives succeeded, {} failed, {} documents, {} records in {}",
        format!("{}", result.archives_succeeded).green(),
        format!("{}", result.archives_failed).red(),
        result.files_processed,
        result.records_parsed,
        format!("{:.2}s", result.duration.as_secs_f64()).green(),
    );
    info!(
        "{} conflicts detected, {} resolved, quality {}, cache hit rate {}",
        format!("{}", result.conflicts_detected).yellow(),
        format!("{}", result.conflicts_resolved).green(),
        format!("{:.1}%", result.quality_score * 100.0).cyan(),
        format!("{:.1}%", result.cache_hit_rate * 100.0).cyan(),
    );
    info!(
        "merit {} / debt {} ({})",
        format!("{:.2}", result.merit_debt.merit).green(),
        format!("{}", result.merit_debt.debt).red(),
        result.merit_debt.label,
    );

    if !result.top_conflicts.is_empty() {
        println!();
        println!("{}", "Top conflicts:".bold());
        for conflict in &result.top_conflicts {
            let kind = match conflict.kind {
                ConflictKind::DuplicateKey | ConflictKind::InvalidAmount => {
                    conflict.kind.to_string().red()
                }
                _ => conflict.kind.to_string().yellow(),
            };
            println!(
                "  [{:>6.2}] {} {}",
                conflict.priority, kind, conflict.description
            );
        }
    }

    if result.cancelled {
        println!("{}", "Batch was cancelled; results are partial.".yellow());
    }

    if let Some(path) = report_path {
        result.write_csv(&path)?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn run_assess(config: &AppConfig, archives: Vec<PathBuf>) -> anyhow::Result<()> {
    let archives = resolve_archives(config, archives)?;
    let extensions: Vec<String> = config
        .document_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    for path in &archives {
        match sheetsift_core::extract::list_entries(path) {
            Ok((size, names)) => {
                let matching = names
                    .iter()
                    .filter(|n| {
                        std::path::Path::new(n)
                            .extension()
                            .and_then(|e| e.to_str())
                            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                            .unwrap_or(false)
                    })
                    .count();
                println!(
                    "{}: {} bytes, {} entries, {} matching documents",
                    path.display().to_string().bold(),
                    size,
                    names.len(),
                    format!("{}", matching).green()
                );
            }
            Err(e) => println!("{}: {}", path.display().to_string().bold(), e.to_string().red()),
        }
    }
    Ok(())
}
