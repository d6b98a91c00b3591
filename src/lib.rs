//! wdlci -- continuous integration for WDL workflows.
//!
//! Submits one workflow per test input to a Cromwell server, waits for every
//! job to finish, uploads execution metadata, and checks produced outputs
//! against a golden reference set in Cloud Storage.

pub mod config;
pub mod cromwell;
pub mod discovery;
pub mod monitor;
pub mod packaging;
pub mod reconcile;
pub mod report;
pub mod storage;
pub mod suite;

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use crate::config::CiConfig;
use crate::cromwell::CromwellClient;
use crate::monitor::{FixedInterval, Monitor, Ticker};
use crate::reconcile::ComparatorSet;
use crate::report::RunReport;
use crate::storage::{GcsStore, ObjectStore};
use crate::suite::Suite;

/// Run the suite against the real execution server and Cloud Storage.
pub async fn run(config: &CiConfig, server_override: Option<&str>) -> Result<RunReport> {
    let server = config.resolve_server_url(server_override);
    info!(%server, "Cromwell server: {}", server);

    let api_http = reqwest::Client::builder()
        .timeout(config.server.request_timeout())
        .build()?;
    // Object downloads can run long; only bound the connect.
    let storage_http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let client = CromwellClient::new(server, config.server.retry_policy(), api_http);
    let store = GcsStore::new(storage_http, &config.storage.endpoint)?;
    let comparators = ComparatorSet::standard(&config.compare);
    let mut ticker = FixedInterval(config.polling.interval());

    run_with(config, &client, &store, &comparators, &mut ticker).await
}

/// Run the suite with explicit collaborators.
pub async fn run_with(
    config: &CiConfig,
    client: &CromwellClient,
    store: &dyn ObjectStore,
    comparators: &ComparatorSet,
    ticker: &mut dyn Ticker,
) -> Result<RunReport> {
    let found = discovery::discover(&config.paths.test_inputs_dir, &config.paths.disabled_tests)?;
    found.log_listing();
    let active = found.active();

    let archive = if config.paths.bundle_dependencies {
        packaging::bundle_workflows(&config.paths.workflows_dir, &config.paths.dependencies_archive)
            .await?
    } else {
        config.paths.dependencies_archive.clone()
    };

    let suite = Suite {
        config,
        client,
        store,
        comparators,
    };
    let dispatched = suite.dispatch(&active, &archive).await?;

    info!("Monitoring workflows...");
    let mut monitor = Monitor::new(dispatched.jobs);
    if !monitor.jobs().is_empty() {
        monitor.watch(client, ticker).await?;
    }
    let tests = suite.reconcile(monitor.jobs()).await;

    let report = RunReport {
        server: client.base_url().to_string(),
        discovered: found.candidates.len(),
        disabled: found
            .candidates
            .iter()
            .filter(|t| found.is_disabled(t))
            .map(|t| t.id.clone())
            .collect(),
        missing_workflow: dispatched
            .missing_workflow
            .into_iter()
            .map(|t| t.file_name)
            .collect(),
        tests,
    };

    if report.succeeded() {
        info!(verdict = "PASS", "ALL TESTS SUCCEEDED.");
    } else {
        error!(verdict = "FAIL", "SOME TESTS FAILED.");
    }
    Ok(report)
}
