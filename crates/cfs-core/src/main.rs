//! Customer Feature Store CLI
//!
//! The `cfs` binary drives the whole pipeline:
//! - CSV to Parquet conversion of the purchase dataset
//! - Registering entities and feature views
//! - Full and incremental materialization into the online store
//! - Historical (point-in-time) and online feature retrieval
//! - Online store backup and clear through Redis

use std::io::IsTerminal;
use std::path::PathBuf;

use arrow::array::RecordBatch;
use cfs_common::{format_error_human, ConfigResolver, Error, Result, Settings, SOURCE_DATA_KEY};
use cfs_core::exit_codes::ExitCode;
use cfs_core::logging::{init_logging, LogConfig, LogFormat};
use cfs_core::{FeatureService, MaterializationReport, SideChannelOutcome};
use cfs_offline::{convert_csv_to_parquet, render, ConvertOptions};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

/// Customer Feature Store - materialize and serve customer purchase features
#[derive(Parser)]
#[command(name = "cfs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to config.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the purchase CSV to Parquet
    Convert(ConvertArgs),

    /// Register entities, sources, and feature views
    Apply,

    /// Load features into the online store for a time window
    Materialize(MaterializeArgs),

    /// Load features added since the last materialization
    MaterializeIncremental(IncrementalArgs),

    /// Point-in-time features for customers seen in a window
    GetHistoricalFeatures(HistoricalArgs),

    /// Latest features from the online store
    GetFeatures(OnlineArgs),

    /// List registered feature views
    FeatureViews,

    /// Snapshot the Redis online store to disk
    BackupOnlineStore,

    /// Remove every key from the Redis online store
    ClearOnlineStore,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input CSV (defaults to the configured dataset)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output Parquet file (defaults to the input with a .parquet extension)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MaterializeArgs {
    /// Window start (defaults to the earliest event)
    #[arg(long)]
    start_date: Option<String>,

    /// Window end (defaults to the latest event)
    #[arg(long)]
    end_date: Option<String>,
}

#[derive(Args, Debug)]
struct IncrementalArgs {
    /// Window end (defaults to now)
    #[arg(short, long)]
    end_date: Option<String>,
}

#[derive(Args, Debug)]
struct HistoricalArgs {
    /// Earliest event to include
    #[arg(short, long)]
    start_date: Option<String>,

    /// Latest event to include
    #[arg(short, long)]
    end_date: Option<String>,

    /// Features as view:feature (or bare feature names)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    features: Vec<String>,
}

#[derive(Args, Debug)]
struct OnlineArgs {
    /// Customer ids to look up (defaults to every customer)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    customer_ids: Vec<String>,

    /// Features as view:feature (or bare feature names)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    features: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let log_config =
        LogConfig::from_env(cli.global.verbose, cli.global.quiet, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match run(&cli) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("{}", format_error_human(&err, std::io::stderr().is_terminal()));
            ExitCode::from(&err)
        }
    };
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> Result<()> {
    let settings = ConfigResolver::new(cli.global.config.clone()).load()?;
    debug!(
        config = ?settings.source.path,
        resolution = %settings.source.resolution,
        project_root = %settings.project_root().display(),
        "configuration loaded"
    );

    match &cli.command {
        Commands::Convert(args) => run_convert(&settings, args),
        Commands::Apply => {
            let report = FeatureService::new(&settings)?.apply_feature_store()?;
            for label in &report.created {
                println!("  created {}", label);
            }
            for label in &report.updated {
                println!("  updated {}", label);
            }
            println!(
                "✅ Feature store applied ({} created, {} updated, {} unchanged)",
                report.created.len(),
                report.updated.len(),
                report.unchanged.len()
            );
            Ok(())
        }
        Commands::Materialize(args) => {
            let mut service = FeatureService::new(&settings)?;
            let start = parse_optional(&service, args.start_date.as_deref())?;
            let end = parse_optional(&service, args.end_date.as_deref())?;
            let reports = service.materialize_features(start, end)?;
            print_reports(&reports);
            println!("✅ Materialization complete");
            Ok(())
        }
        Commands::MaterializeIncremental(args) => {
            let mut service = FeatureService::new(&settings)?;
            let end = parse_optional(&service, args.end_date.as_deref())?;
            let reports = service.materialize_incremental(end)?;
            print_reports(&reports);
            println!("✅ Incremental materialization complete");
            Ok(())
        }
        Commands::GetHistoricalFeatures(args) => {
            let service = FeatureService::new(&settings)?;
            let start = parse_optional(&service, args.start_date.as_deref())?;
            let end = parse_optional(&service, args.end_date.as_deref())?;
            let batch =
                service.get_historical_features(start, end, Some(args.features.as_slice()))?;
            print_table("Historical features", &batch)
        }
        Commands::GetFeatures(args) => {
            let service = FeatureService::new(&settings)?;
            let batch = service.get_online_features(
                Some(args.customer_ids.as_slice()),
                Some(args.features.as_slice()),
            )?;
            print_table("Online features", &batch)
        }
        Commands::FeatureViews => {
            let service = FeatureService::new(&settings)?;
            let views = service.list_feature_views()?;
            if views.is_empty() {
                println!("No feature views registered. Run `cfs apply` first.");
            }
            for view in views {
                let features: Vec<String> = view
                    .spec
                    .schema
                    .iter()
                    .map(|f| format!("{}:{}", f.name, f.dtype))
                    .collect();
                let watermark = view
                    .watermark()
                    .map(|w| w.with_timezone(&service.timezone()).to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}", view.spec.name);
                println!("  entities:     {}", view.spec.entities.join(", "));
                println!("  features:     {}", features.join(", "));
                println!("  ttl:          {}s", view.spec.ttl_seconds);
                println!("  online:       {}", view.spec.online);
                println!("  materialized: {}", watermark);
            }
            Ok(())
        }
        Commands::BackupOnlineStore => {
            let outcome = FeatureService::new(&settings)?.backup_online_store();
            print_outcome("Online store backed up", &outcome);
            Ok(())
        }
        Commands::ClearOnlineStore => {
            let outcome = FeatureService::new(&settings)?.clear_online_store();
            print_outcome("Online store cleared", &outcome);
            Ok(())
        }
    }
}

fn run_convert(settings: &Settings, args: &ConvertArgs) -> Result<()> {
    let input = match &args.input {
        Some(path) => path.clone(),
        None => settings.data_path(SOURCE_DATA_KEY)?,
    };
    let options = ConvertOptions::new(settings.timezone());
    let report = convert_csv_to_parquet(&input, args.output.as_deref(), &options)?;
    print!("{}", report);
    println!("✅ Converted {} to {}", input.display(), report.output_path.display());
    Ok(())
}

fn parse_optional<E: cfs_core::FeatureStoreEngine>(
    service: &FeatureService<E>,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| service.parse_timestamp(r)).transpose()
}

fn print_reports(reports: &[MaterializationReport]) {
    for report in reports {
        println!("  {}", report);
    }
}

fn print_table(title: &str, batch: &RecordBatch) -> Result<()> {
    let table = render(batch).map_err(Error::from)?;
    println!("{} ({} rows):", title, batch.num_rows());
    println!("{}", table);
    println!("✅ Retrieved {} rows", batch.num_rows());
    Ok(())
}

fn print_outcome(done: &str, outcome: &SideChannelOutcome) {
    match outcome {
        SideChannelOutcome::Completed => println!("✅ {}", done),
        SideChannelOutcome::Unavailable(reason) => {
            println!("⚠️  Redis unavailable, nothing done ({})", reason)
        }
    }
}
