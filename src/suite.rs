//! Dispatching tests to the execution server and reconciling their results.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::CiConfig;
use crate::cromwell::{CromwellClient, JobStatus, Submission};
use crate::discovery::{self, TestCase};
use crate::monitor::TrackedJob;
use crate::reconcile::{self, ComparatorSet, Reconciler};
use crate::report::{format_hms, TestReport};
use crate::storage::{self, ObjectRef, ObjectStore};

/// Outcome of the dispatch phase.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub jobs: Vec<TrackedJob>,
    /// Tests whose workflow definition could not be located.
    pub missing_workflow: Vec<TestCase>,
}

/// The collaborators a CI run talks to.
pub struct Suite<'a> {
    pub config: &'a CiConfig,
    pub client: &'a CromwellClient,
    pub store: &'a dyn ObjectStore,
    pub comparators: &'a ComparatorSet,
}

impl Suite<'_> {
    /// Submit every test in order. A submission failure aborts the whole
    /// dispatch; nothing after it is submitted.
    pub async fn dispatch(&self, tests: &[TestCase], dependencies: &Path) -> Result<Dispatched> {
        info!("Dispatching workflows...");
        let paths = &self.config.paths;
        let mut dispatched = Dispatched::default();

        for test in tests {
            let workflow_name = test.workflow_file_name();
            let workflow = match discovery::find_workflow(&paths.workflows_dir, &workflow_name) {
                Ok(Some(path)) => path,
                Ok(None) => {
                    warn!(test = %test.file_name, "{}: Requested WDL does not exist.", test.file_name);
                    dispatched.missing_workflow.push(test.clone());
                    continue;
                }
                Err(e) => {
                    warn!(test = %test.file_name, error = %e, "{}: could not search for WDL", test.file_name);
                    dispatched.missing_workflow.push(test.clone());
                    continue;
                }
            };

            self.clear_old_outputs(test).await;

            let options = if test.is_download_test() {
                &paths.fresh_options
            } else {
                &paths.caching_options
            };

            let submission = Submission {
                workflow_source: &workflow,
                workflow_inputs: &test.input_path,
                workflow_options: options,
                workflow_dependencies: dependencies,
            };
            let started_at = Utc::now();
            let resp = self
                .client
                .submit(&submission)
                .await
                .with_context(|| format!("{}: workflow submission failed", test.file_name))?;

            info!(test = %test.file_name, job = %resp.id, status = %resp.status, "{}: {}, {}", test.file_name, resp.id, resp.status);
            dispatched
                .jobs
                .push(TrackedJob::new(test.clone(), resp.id, resp.status, started_at));
        }

        Ok(dispatched)
    }

    /// Remove final outputs left by a previous run so stale files cannot
    /// pass for fresh ones. Intermediates live elsewhere and are kept.
    async fn clear_old_outputs(&self, test: &TestCase) {
        let bucket = &self.config.storage.results_bucket;
        match storage::delete_prefix(self.store, bucket, test.workflow_prefix()).await {
            Ok(0) => warn!(
                test = %test.file_name,
                "{}: Old final output not automatically removed", test.file_name
            ),
            Ok(n) => info!(test = %test.file_name, removed = n, "cleared old final outputs"),
            Err(e) => warn!(
                test = %test.file_name,
                error = %e,
                "{}: Old final output not automatically removed", test.file_name
            ),
        }
    }

    /// Upload metadata for every job and check outputs of succeeded ones.
    pub async fn reconcile(&self, jobs: &[TrackedJob]) -> Vec<TestReport> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            reports.push(self.reconcile_job(job).await);
        }
        reports
    }

    async fn reconcile_job(&self, job: &TrackedJob) -> TestReport {
        let name = &job.test.file_name;
        let duration_secs = job.elapsed(Utc::now()).num_seconds();
        let mut report = TestReport {
            test: name.clone(),
            job_id: job.id.clone(),
            status: job.status.clone(),
            duration_secs,
            metadata: None,
            outputs: None,
            failures: None,
            error: None,
        };

        let metadata = match self.client.metadata(&job.id).await {
            Ok(md) => Some(md),
            Err(e) => {
                warn!(test = %name, job = %job.id, error = %e, "could not fetch execution metadata");
                None
            }
        };
        if let Some(md) = &metadata {
            match self.upload_metadata(job, md).await {
                Ok(location) => report.metadata = Some(location.to_string()),
                Err(e) => warn!(test = %name, error = %e, "could not upload execution metadata"),
            }
        }

        let headline = format!(
            "{}: {} ({}s -- {})",
            name,
            job.status,
            duration_secs,
            format_hms(duration_secs)
        );
        let succeeded = job.status == JobStatus::Succeeded;

        info!("");
        if succeeded {
            info!(verdict = "PASS", test = %name, "{}", headline);
            if let Some(location) = &report.metadata {
                info!(verdict = "PASS", test = %name, "{}: Metadata uploaded to {}", name, location);
            }
        } else {
            error!(verdict = "FAIL", test = %name, "{}", headline);
            if let Some(location) = &report.metadata {
                error!(verdict = "FAIL", test = %name, "{}: Metadata uploaded to {}", name, location);
            }
        }

        if !succeeded {
            let failures = metadata
                .as_ref()
                .and_then(|md| md.get("failures"))
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let pretty = serde_json::to_string_pretty(&failures).unwrap_or_default();
            error!(verdict = "FAIL", test = %name, "{}: Failure messages:\n{}", name, pretty);
            report.failures = Some(failures);
            return report;
        }

        let outputs = match reconcile::find_outputs(self.store, &self.config.storage, &job.test).await {
            Ok(outputs) => outputs,
            Err(e) => {
                error!(verdict = "FAIL", test = %name, error = %e, "{}: could not list outputs", name);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let reconciler = Reconciler {
            store: self.store,
            comparators: self.comparators,
            config: &self.config.compare,
        };
        let outputs = reconciler.compare_outputs(&outputs).await;
        let (checked, mismatches) = (outputs.checked(), outputs.mismatches());
        if mismatches == 0 {
            info!(verdict = "PASS", test = %name, "{}: {} files checked, {} failures", name, checked, mismatches);
        } else {
            error!(verdict = "FAIL", test = %name, "{}: {} files checked, {} failures", name, checked, mismatches);
        }
        report.outputs = Some(outputs);
        report
    }

    async fn upload_metadata(&self, job: &TrackedJob, metadata: &serde_json::Value) -> Result<ObjectRef> {
        let storage = &self.config.storage;
        let target = ObjectRef::new(
            storage.resources_bucket.clone(),
            format!(
                "{}/{}/{}.metadata.txt",
                storage.metadata_prefix.trim_end_matches('/'),
                job.test.file_name,
                job.id
            ),
        );

        let mut scratch = tempfile::NamedTempFile::new()?;
        serde_json::to_writer_pretty(&mut scratch, metadata)?;
        scratch.flush()?;
        self.store.upload(scratch.path(), &target).await?;
        Ok(target)
    }
}
