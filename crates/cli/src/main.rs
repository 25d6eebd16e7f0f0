use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conftable_core::{
    load_config, validate_config, Config, ConvertOptions, DirectoriesConfig, DirectoryConverter,
    FileStatus,
};

/// Converts spreadsheet configuration tables into Lua data files.
#[derive(Debug, Parser)]
#[command(name = "conftable", version, about)]
struct Args {
    /// Configuration file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the configuration tables.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory the converted files are written to.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only convert files whose name contains this substring.
    #[arg(short, long)]
    filter: Option<String>,

    /// Skip the directory validation script after converting.
    #[arg(long)]
    no_validate: bool,

    /// Keep running and re-convert files as they change.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Input directory: {:?}", config.directories.input);
    info!("Output directory: {:?}", config.directories.output);

    let converter = DirectoryConverter::new(config.convert.clone());
    converter
        .open(&config.directories.input, &config.directories.output)
        .await
        .context("Failed to open directory pair")?;

    let summary = converter
        .convert_selected()
        .await
        .context("Failed to submit conversion batch")?
        .wait()
        .await
        .context("Conversion batch was interrupted")?;
    info!(
        "Converted {} of {} submitted files",
        summary.succeeded, summary.submitted
    );

    let mut failed = report_failures(&converter).await?;

    if args.watch {
        info!("Watching for changes, press Ctrl+C to stop");
        converter
            .set_auto_convert(true)
            .await
            .context("Failed to enable auto conversion")?;
        shutdown_signal().await;
        info!("Shutting down...");
        failed = report_failures(&converter).await?;
    }

    converter.shutdown().await.ok();

    if failed > 0 {
        anyhow::bail!("{failed} file(s) failed to convert");
    }
    Ok(())
}

/// Merges the config file (when given) with command line overrides.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let (Some(input), Some(output)) = (&args.input, &args.output) else {
                anyhow::bail!("either --config or both --input and --output are required");
            };
            Config {
                directories: DirectoriesConfig {
                    input: input.clone(),
                    output: output.clone(),
                },
                convert: ConvertOptions::default(),
            }
        }
    };
    if let Some(input) = &args.input {
        config.directories.input = input.clone();
    }
    if let Some(output) = &args.output {
        config.directories.output = output.clone();
    }
    if let Some(filter) = &args.filter {
        config.convert.filter = filter.clone();
    }
    if args.no_validate {
        config.convert.auto_validate_all = false;
    }
    Ok(config)
}

/// Logs every failed record and the validation status; returns the
/// failure count.
async fn report_failures(converter: &DirectoryConverter) -> Result<usize> {
    let snapshot = converter
        .snapshot()
        .await
        .context("Failed to read converter state")?;

    let mut failed = 0;
    for record in &snapshot.records {
        if record.status == FileStatus::Failed {
            failed += 1;
            error!("{}", record.error_text);
        }
    }
    if !snapshot.validation_status.is_empty() {
        if snapshot.validation_status.starts_with('E') {
            error!("Validation: {}", snapshot.validation_status);
        } else {
            info!("Validation: {}", snapshot.validation_status);
        }
    }
    Ok(failed)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
