mod app;
mod config;

use anyhow::{Context, Result};
use clap::Parser;

use app::Cli;
use config::SiftConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("CLI: Failed to initialize thread pool")?;
    }

    let config = match &cli.config {
        Some(path) => {
            let config = SiftConfig::load(path)?;
            config.validate()?;
            config
        }
        None => SiftConfig::default(),
    };

    let source = app::resolve_filter(&cli, &config)?;
    let expr = sift::parse(&source).with_context(|| format!("CLI: Invalid filter {source:?}"))?;
    tracing::info!(
        "Filter: {} ({} fields, {} nodes)",
        expr,
        expr.identifiers().count(),
        expr.len()
    );

    let start = std::time::Instant::now();
    let summary = app::run(&cli, &expr, &config)?;

    let elapsed = start.elapsed();
    tracing::info!(
        "Done! Matched {} of {} records in {:.2}s ({} skipped)",
        summary.matched,
        summary.records,
        elapsed.as_secs_f64(),
        summary.skipped
    );

    Ok(())
}
