use anyhow::Context;
use clap::Parser;
use council_votes::config::{DEFAULT_OUTPUT, OUTPUT_ENV};
use council_votes::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Deduplicate and consolidate extracted council votes into one dataset
#[derive(Parser, Debug)]
#[command(name = "vote-import")]
#[command(about = "Consolidate duplicate council vote extractions and write the viewer dataset")]
#[command(version)]
struct Args {
    /// Input JSON file or directory of JSON files (repeatable)
    #[arg(short, long = "input")]
    inputs: Vec<PathBuf>,

    /// Output dataset (default: VOTES_OUTPUT env var, then
    /// data/torrance_votes_smart_consolidated.json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run every stage and report, but write nothing except the report
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the output even when validation reports errors
    #[arg(long)]
    force: bool,

    /// YAML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for backups of the previous output (default: backups/ next to the output)
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Do not back up the previous output
    #[arg(long)]
    no_backup: bool,

    /// Replace the output instead of merging the new votes into it
    #[arg(long)]
    no_merge_existing: bool,

    /// Write a JSON import report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Video index JSON used to fill in meta ids and timestamps
    #[arg(long)]
    video_metadata: Option<PathBuf>,

    /// Pre-generated meeting and councilmember summaries JSON
    #[arg(long)]
    summaries: Option<PathBuf>,

    /// Estimate video timestamps for votes that have none
    #[arg(long)]
    estimate_timestamps: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn get_output_path(output: Option<PathBuf>, from_file: Option<&PathBuf>) -> PathBuf {
    // Flag first, then environment variable, then config file, then default
    if let Some(output) = output {
        output
    } else if let Ok(output) = std::env::var(OUTPUT_ENV) {
        PathBuf::from(output)
    } else if let Some(output) = from_file {
        output.clone()
    } else {
        PathBuf::from(DEFAULT_OUTPUT)
    }
}

fn build_config(args: Args) -> anyhow::Result<ImportConfig> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => FileConfig::default(),
    };
    let output = get_output_path(args.output, file.output.as_ref());

    let mut builder = ImportConfigBuilder::new()
        .apply_file(file)
        .output(output)
        .dry_run(args.dry_run)
        .force(args.force);

    if !args.inputs.is_empty() {
        builder = builder.inputs(args.inputs);
    }
    if let Some(dir) = args.backup_dir {
        builder = builder.backup_dir(dir);
    }
    if args.no_backup {
        builder = builder.no_backup();
    }
    if args.no_merge_existing {
        builder = builder.merge_existing(false);
    }
    if let Some(path) = args.report {
        builder = builder.report(path);
    }
    if let Some(path) = args.video_metadata {
        builder = builder.video_metadata(path);
    }
    if let Some(path) = args.summaries {
        builder = builder.summaries(path);
    }
    if args.estimate_timestamps {
        builder = builder.estimate_timestamps(true);
    }

    builder.build().context("Invalid import configuration")
}

fn print_report(report: &ImportReport) {
    let stats = &report.stats;
    println!("Input files:          {}", stats.input_files);
    println!("Existing votes:       {}", stats.existing_votes);
    println!("Raw records:          {}", stats.raw_records);
    println!("Malformed records:    {}", stats.malformed_records);
    println!("Duplicates merged:    {}", stats.duplicates_merged);
    println!("Consolidated votes:   {}", stats.consolidated_votes);
    println!("Meetings:             {}", stats.meetings);
    println!("Councilmembers:       {}", stats.councilmembers);
    println!("Conflicts:            {}", stats.conflicts);
    println!("Tallies corrected:    {}", stats.tallies_corrected);
    println!(
        "Validation:           {} errors, {} warnings",
        report.validation.errors.len(),
        report.validation.warnings.len()
    );

    match report.outcome {
        PersistOutcome::Written => println!("Wrote {}", report.output),
        PersistOutcome::Forced => println!("Wrote {} despite validation errors", report.output),
        PersistOutcome::DryRun => println!("Dry run: {} not modified", report.output),
        PersistOutcome::Blocked => {
            println!("Not written: fix the validation errors or pass --force")
        }
    }
    if let Some(backup) = &report.backup {
        println!("Backup: {}", backup);
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = build_config(args)?;
    let importer = Importer::from_config(config).context("Failed to load collaborator data")?;
    let run = importer.run().context("Import failed")?;

    print_report(&run.report);
    Ok(ExitCode::from(run.report.exit_code()))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
