//! spark-tune: search Spark launch settings for a job.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use st_cli::cli::Args;
use st_cli::{discover_cluster_metrics, summary, tune, FileConfig, Settings};
use st_harness::{ProcfsSampler, TokioLauncher};
use st_types::TuneError;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            match e.downcast_ref::<TuneError>() {
                Some(TuneError::NoFeasibleResult { .. }) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading tuning file {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, file).map_err(TuneError::from)?;

    let metrics = if settings.runs_on_yarn() {
        discover_cluster_metrics().await
    } else {
        None
    };
    std::fs::create_dir_all(&settings.out_dir)
        .with_context(|| format!("creating {}", settings.out_dir.display()))?;
    let out_dir = settings.out_dir.clone();

    let launcher = TokioLauncher::new(Arc::new(ProcfsSampler::new()));
    let outcome = tune(settings, launcher, metrics).await?;

    println!("{}", serde_json::to_string_pretty(&summary(&outcome, &out_dir))?);
    Ok(())
}
