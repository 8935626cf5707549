//! # st-cli
//!
//! Wiring for the `spark-tune` binary: flags, the tuning file, and a single
//! entry point that runs a search end to end.

pub mod cli;
pub mod settings;

use serde_json::json;
use tracing::{info, warn};

use st_harness::{ClusterMetrics, MeasurementHarness, ProcessLauncher, YarnClient, YarnSite};
use st_optimizer::{JsonFileSink, RunOutcome, SearchDriver};
use st_types::TuneResult;

pub use settings::{FileConfig, Settings};

/// Run a full tuning session with the given launcher, persisting results
/// under the configured output directory.
pub async fn tune<L>(
    settings: Settings,
    launcher: L,
    metrics: Option<Box<dyn ClusterMetrics>>,
) -> TuneResult<RunOutcome>
where
    L: ProcessLauncher + 'static,
{
    let Settings {
        run,
        space,
        harness,
        out_dir,
        ..
    } = settings;

    let mut harness = MeasurementHarness::new(launcher, harness);
    if let Some(metrics) = metrics {
        harness = harness.with_cluster_metrics(metrics);
    }
    let sink = JsonFileSink::new(out_dir, run.name.clone());
    let mut driver = SearchDriver::new(space, harness, run)?.with_sink(Box::new(sink));
    driver.run().await
}

/// Cluster metrics for YARN runs, when `yarn-site.xml` can be found and the
/// ResourceManager answers. Any problem is logged and metrics are skipped.
pub async fn discover_cluster_metrics() -> Option<Box<dyn ClusterMetrics>> {
    let site = match YarnSite::discover() {
        Ok(Some(site)) => site,
        Ok(None) => {
            warn!("no yarn-site.xml under YARN_CONF_DIR or HADOOP_CONF_DIR, using local metrics");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "cannot read yarn-site.xml, using local metrics");
            return None;
        }
    };
    let client = match YarnClient::from_site(&site) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "cannot locate the resource manager, using local metrics");
            return None;
        }
    };
    match client.cluster_info().await {
        Ok(_) => {
            info!(base_url = client.base_url(), "collecting cluster metrics");
            let metrics: Box<dyn ClusterMetrics> = Box::new(client);
            Some(metrics)
        }
        Err(e) => {
            warn!(error = %e, "resource manager unreachable, using local metrics");
            None
        }
    }
}

/// JSON summary of a finished run.
pub fn summary(outcome: &RunOutcome, out_dir: &std::path::Path) -> serde_json::Value {
    let best = &outcome.best;
    let status = &outcome.status;
    json!({
        "run_id": best.run_id,
        "terminal": outcome.terminal.to_string(),
        "best_trial": best.trial_number,
        "elapsed_secs": best.elapsed_secs(),
        "score": best.score,
        "configuration": best.configuration,
        "trials_measured": status.trials_measured,
        "trials_failed": status.trials_failed,
        "dedup_hits": status.dedup_hits,
        "out_dir": out_dir.display().to_string(),
    })
}
