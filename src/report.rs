//! Per-test and whole-run results, summary formatting, exit status.

use serde::Serialize;

use crate::cromwell::JobStatus;
use crate::reconcile::{OutputReport, Verdict};

/// Result of one dispatched test.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub test: String,
    pub job_id: String,
    pub status: JobStatus,
    pub duration_secs: i64,
    pub metadata: Option<String>,
    pub outputs: Option<OutputReport>,
    /// The server's `failures` metadata for failed jobs.
    pub failures: Option<serde_json::Value>,
    /// Reconciliation could not complete.
    pub error: Option<String>,
}

impl TestReport {
    pub fn mismatches(&self) -> usize {
        self.outputs.as_ref().map_or(0, OutputReport::mismatches)
    }

    pub fn passed(&self) -> bool {
        self.status == JobStatus::Succeeded && self.error.is_none() && self.mismatches() == 0
    }
}

/// Everything a CI run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub server: String,
    pub discovered: usize,
    pub disabled: Vec<String>,
    /// Tests dropped because their workflow definition was not found.
    pub missing_workflow: Vec<String>,
    pub tests: Vec<TestReport>,
}

impl RunReport {
    /// Every dispatched test passed. Disabled tests and tests with no
    /// workflow definition do not count either way.
    pub fn succeeded(&self) -> bool {
        self.tests.iter().all(TestReport::passed)
    }

    pub fn exit_code(&self) -> u8 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.passed()).count()
    }

    /// Plain-text table of the run.
    pub fn format_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("\nwdlci results ({})\n", self.server));
        out.push_str(&format!(
            "{:<40} | {:<10} | {:>9} | {:>7} | {:>8} | Verdict\n",
            "Test", "Status", "Duration", "Checked", "Mismatch"
        ));
        out.push_str(&format!(
            "{:-<40}-|-{:-<10}-|-{:->9}-|-{:->7}-|-{:->8}-|-{:-<7}\n",
            "", "", "", "", "", ""
        ));
        for t in &self.tests {
            let checked = t.outputs.as_ref().map_or(0, OutputReport::checked);
            out.push_str(&format!(
                "{:<40} | {:<10} | {:>9} | {:>7} | {:>8} | {}\n",
                t.test,
                t.status.as_str(),
                format_hms(t.duration_secs),
                checked,
                t.mismatches(),
                if t.passed() { "PASS" } else { "FAIL" }
            ));
            if let Some(err) = &t.error {
                out.push_str(&format!("{:<40} |   -> {}\n", "", err));
            }
            if let Some(outputs) = &t.outputs {
                let unverifiable = outputs.count(|v| *v == Verdict::Unverifiable);
                if unverifiable > 0 {
                    out.push_str(&format!(
                        "{:<40} |   -> {} file(s) could not be verified\n",
                        "", unverifiable
                    ));
                }
            }
        }
        for name in &self.missing_workflow {
            out.push_str(&format!("{:<40} | {:<10} | workflow not found\n", name, "SKIPPED"));
        }
        out.push_str(&format!(
            "\n{} of {} dispatched test(s) passed; {} disabled, {} skipped.\n",
            self.passed_count(),
            self.tests.len(),
            self.disabled.len(),
            self.missing_workflow.len()
        ));
        out
    }
}

/// `H:MM:SS` for a number of seconds.
pub fn format_hms(total_secs: i64) -> String {
    let sign = if total_secs < 0 { "-" } else { "" };
    let secs = total_secs.unsigned_abs();
    format!("{}{}:{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60, secs % 60)
}
