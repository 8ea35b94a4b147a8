//! twitter-search - daily Twitter search CLI
//!
//! Main entry point for the twitter-search batch job.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use twitter_search::backend::build_backend;
use twitter_search::logging::{LogConfig, init_logging};
use twitter_search::object_store::{ObjectStore, S3Store};
use twitter_search::run_log::RunLog;
use twitter_search::warehouse::AthenaWarehouse;
use twitter_search::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started_at = Utc::now();

    let work_dir = cli.work_dir.clone().unwrap_or_else(default_work_dir);
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("creating work directory {}", work_dir.display()))?;

    let run_log = RunLog::new(&work_dir, started_at);
    init_logging(&LogConfig::for_cli(cli.quiet, cli.verbose).with_file(run_log.path()))
        .with_context(|| format!("creating run log {}", run_log.path().display()))?;

    let bootstrap_sdk = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = Config::load(&cli.config, &S3Store::new(&bootstrap_sdk))
        .await
        .map_err(|e| report(&cli, e))?;

    let sdk = match &config.aws.region {
        Some(region) => {
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.clone()))
                .load()
                .await
        }
        None => bootstrap_sdk,
    };
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&sdk));

    let outcome = run(&cli, &config, &sdk, Arc::clone(&store), started_at, &work_dir)
        .await
        .map_err(|e| report(&cli, e));

    // Bookkeeping runs whatever the outcome and never replaces it.
    // The failure is logged above so the published log records it.
    let admin = AthenaWarehouse::new(
        &sdk,
        Arc::clone(&store),
        &config.aws.athena_admin,
        &config.aws.s3_admin,
    )
    .with_max_wait(config.aws.query_timeout());
    if let Err(e) = run_log
        .finalize(store.as_ref(), &admin, &config.aws.s3_admin)
        .await
    {
        error!(error = %e, "Failed to publish run log");
    }

    let summary = outcome?;
    print_summary(&cli, &summary)?;
    Ok(())
}

async fn run(
    cli: &Cli,
    config: &Config,
    sdk: &SdkConfig,
    store: Arc<dyn ObjectStore>,
    started_at: DateTime<Utc>,
    work_dir: &Path,
) -> twitter_search::Result<RunSummary> {
    config.validate(cli.method)?;

    let warehouse = Arc::new(
        AthenaWarehouse::new(
            sdk,
            Arc::clone(&store),
            &config.aws.athena_data,
            &config.aws.s3_admin,
        )
        .with_max_wait(config.aws.query_timeout()),
    );
    let backend = build_backend(cli.method, config);
    let settings = RunSettings {
        filter: config.parameter.filter.clone(),
        data_bucket: config.aws.s3_data.clone(),
        work_dir: work_dir.to_path_buf(),
        max_retries: config.search.max_retries,
        resume_tolerance: config.search.resume_tolerance,
        register_additions: cli.register_additions,
        started_at,
    };

    info!(method = %cli.method, work_dir = %work_dir.display(), "Run configured");
    let mut search = TwitterSearch::new(warehouse, store, backend, settings)?;
    search.run().await
}

/// Log a failure, print its fix hint, and hand it back as `anyhow`.
fn report(cli: &Cli, err: TwitterSearchError) -> anyhow::Error {
    error!(error = %err, "Run failed");
    if !cli.quiet {
        if let Some(hint) = err.suggestion() {
            eprintln!("{} {}", "hint:".yellow().bold(), hint);
        }
    }
    err.into()
}

fn print_summary(cli: &Cli, summary: &RunSummary) -> Result<()> {
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text if cli.quiet => {}
        OutputFormat::Text => {
            println!("{}", "Twitter Search Summary".bold().cyan());
            println!("{}", "─".repeat(HEADER_DIVIDER_WIDTH));
            println!("  {:<24} {}", "Backend:", summary.backend.green());
            println!("  {:<24} {}", "Reference date:", summary.reference_date);
            println!(
                "  {:<24} {:>10}",
                "Video IDs searched:",
                format_number(summary.counts.video_ids - summary.counts.video_ids_pending)
            );
            println!(
                "  {:<24} {:>10}",
                "Screen names searched:",
                format_number(summary.counts.screen_names - summary.counts.screen_names_pending)
            );
            println!(
                "  {:<24} {:>10}",
                "Queries:",
                format_number_usize(summary.video_batches + summary.screen_name_batches)
            );
            println!(
                "  {:<24} {:>10}",
                "Tweets (video IDs):",
                format_number(summary.counts.tweets_from_video_id)
            );
            println!(
                "  {:<24} {:>10}",
                "Tweets (screen names):",
                format_number(summary.counts.tweets_from_screen_name)
            );
            if summary.resumes > 0 {
                println!(
                    "  {:<24} {:>10}",
                    "Resumes:",
                    summary.resumes.to_string().yellow()
                );
            }
            println!("{}", "─".repeat(HEADER_DIVIDER_WIDTH));
            if summary.exported.is_empty() {
                println!("  {}", "Nothing exported".yellow());
            }
            for table in &summary.exported {
                println!(
                    "  {} {} ({} records)",
                    "✓".green(),
                    table.key,
                    format_number_usize(table.records)
                );
            }
            if let Some(count) = summary.additions_registered {
                println!(
                    "  {} {} new videos registered",
                    "✓".green(),
                    format_number_usize(count)
                );
            }
        }
    }
    Ok(())
}
