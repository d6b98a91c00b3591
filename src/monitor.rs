//! Job polling state machine.
//!
//! [`Monitor`] owns every tracked job and is the only writer of job status.
//! [`Monitor::watch`] drives it: wait one tick, query every job once, apply the
//! snapshot, repeat until no job is in a non-terminal state. Both the wait
//! ([`Ticker`]) and the status query ([`StatusSource`]) are injected so the
//! loop can be driven by synthetic sequences in tests.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cromwell::{CromwellClient, JobStatus};
use crate::discovery::TestCase;

/// One submitted workflow as seen by the CI run.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub test: TestCase,
    pub id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackedJob {
    pub fn new(test: TestCase, id: String, status: JobStatus, started_at: DateTime<Utc>) -> Self {
        let mut job = Self {
            test,
            id,
            status: JobStatus::Submitted,
            started_at,
            finished_at: None,
        };
        job.observe(status, started_at);
        job
    }

    /// Record a status observation. The first terminal observation stamps
    /// `finished_at`; later observations never move it.
    pub fn observe(&mut self, status: JobStatus, at: DateTime<Utc>) {
        if status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(at);
        }
        self.status = status;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time from submission to the first terminal observation, or to
    /// `now` while the job is still running.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.finished_at.unwrap_or(now) - self.started_at
    }
}

/// Counts emitted as a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub finished: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Progress {
    pub fn of(jobs: &[TrackedJob]) -> Self {
        let mut p = Self {
            total: jobs.len(),
            finished: 0,
            succeeded: 0,
            failed: 0,
        };
        for job in jobs {
            match job.status {
                JobStatus::Succeeded => p.succeeded += 1,
                JobStatus::Failed => p.failed += 1,
                _ => continue,
            }
            p.finished += 1;
        }
        p
    }

    pub fn is_settled(&self) -> bool {
        self.finished == self.total
    }
}

/// Where job status comes from.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, job_id: &str) -> Result<JobStatus>;
}

#[async_trait::async_trait]
impl StatusSource for CromwellClient {
    async fn status(&self, job_id: &str) -> Result<JobStatus> {
        Ok(CromwellClient::status(self, job_id).await?.status)
    }
}

/// The pause between status passes.
#[async_trait::async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Sleeps a fixed interval per tick.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

#[async_trait::async_trait]
impl Ticker for FixedInterval {
    async fn tick(&mut self) {
        tokio::time::sleep(self.0).await;
    }
}

/// Sole owner of job state during polling.
#[derive(Debug, Default)]
pub struct Monitor {
    jobs: Vec<TrackedJob>,
    last_finished: Option<usize>,
}

impl Monitor {
    pub fn new(jobs: Vec<TrackedJob>) -> Self {
        Self {
            jobs,
            last_finished: None,
        }
    }

    pub fn jobs(&self) -> &[TrackedJob] {
        &self.jobs
    }

    /// True while any job is in a non-terminal state.
    pub fn has_running(&self) -> bool {
        self.jobs.iter().any(|j| !j.is_terminal())
    }

    /// Apply one status snapshot, in job order. Returns the progress counts
    /// when the finished count differs from the previous snapshot.
    pub fn apply(&mut self, snapshot: Vec<JobStatus>, at: DateTime<Utc>) -> Option<Progress> {
        for (job, status) in self.jobs.iter_mut().zip(snapshot) {
            job.observe(status, at);
        }

        let progress = Progress::of(&self.jobs);
        if self.last_finished == Some(progress.finished) {
            return None;
        }
        self.last_finished = Some(progress.finished);
        Some(progress)
    }

    /// Poll until every job is terminal.
    pub async fn watch(
        &mut self,
        source: &dyn StatusSource,
        ticker: &mut dyn Ticker,
    ) -> Result<Progress> {
        while self.has_running() {
            ticker.tick().await;

            let mut snapshot = Vec::with_capacity(self.jobs.len());
            for job in &self.jobs {
                snapshot.push(source.status(&job.id).await?);
            }

            if let Some(p) = self.apply(snapshot, Utc::now()) {
                if !p.is_settled() {
                    info!(
                        total = p.total,
                        finished = p.finished,
                        succeeded = p.succeeded,
                        failed = p.failed,
                        "Running {} tests, {} tests complete. {} succeeded, {} failed.",
                        p.total,
                        p.finished,
                        p.succeeded,
                        p.failed
                    );
                }
            }
        }

        let p = Progress::of(&self.jobs);
        info!(
            "Finished {} tests. {} succeeded, {} failed.",
            p.total, p.succeeded, p.failed
        );
        Ok(p)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;

    fn job(id: &str, at: DateTime<Utc>) -> TrackedJob {
        let test = TestCase::from_path(Path::new(&format!("{id}.json"))).unwrap();
        TrackedJob::new(test, id.to_string(), JobStatus::Submitted, at)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    /// Replays a scripted status sequence per job; the last entry repeats.
    struct Scripted {
        scripts: Mutex<HashMap<String, VecDeque<JobStatus>>>,
    }

    impl Scripted {
        fn new(scripts: Vec<(&str, Vec<&str>)>) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(id, seq)| {
                            (id.to_string(), seq.into_iter().map(JobStatus::from).collect())
                        })
                        .collect(),
                ),
            }
        }
    }

    #[async_trait::async_trait]
    impl StatusSource for Scripted {
        async fn status(&self, job_id: &str) -> Result<JobStatus> {
            let mut scripts = self.scripts.lock().unwrap();
            let seq = scripts.get_mut(job_id).unwrap();
            if seq.len() > 1 {
                Ok(seq.pop_front().unwrap())
            } else {
                Ok(seq.front().unwrap().clone())
            }
        }
    }

    #[derive(Default)]
    struct CountingTicker(usize);

    #[async_trait::async_trait]
    impl Ticker for CountingTicker {
        async fn tick(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_terminal_stamp_set_once() {
        let mut j = job("A", t(0));
        j.observe(JobStatus::Running, t(60));
        assert!(j.finished_at.is_none());

        j.observe(JobStatus::Succeeded, t(120));
        assert_eq!(j.finished_at, Some(t(120)));

        j.observe(JobStatus::Succeeded, t(180));
        assert_eq!(j.finished_at, Some(t(120)));

        j.observe(JobStatus::Running, t(240));
        j.observe(JobStatus::Failed, t(300));
        assert_eq!(j.finished_at, Some(t(120)));
        assert_eq!(j.elapsed(t(999)), chrono::Duration::seconds(120));
    }

    #[test]
    fn test_unknown_status_never_stamps() {
        let mut j = job("A", t(0));
        j.observe(JobStatus::from("Aborting"), t(60));
        assert!(j.finished_at.is_none());
        assert!(!j.is_terminal());
    }

    #[test]
    fn test_progress_reported_only_on_change() {
        let mut m = Monitor::new(vec![job("A", t(0)), job("B", t(0))]);

        let first = m.apply(vec![JobStatus::Running, JobStatus::Running], t(60));
        assert_eq!(
            first,
            Some(Progress { total: 2, finished: 0, succeeded: 0, failed: 0 })
        );

        assert!(m
            .apply(vec![JobStatus::Running, JobStatus::Submitted], t(120))
            .is_none());

        let second = m.apply(vec![JobStatus::Failed, JobStatus::Running], t(180));
        assert_eq!(
            second,
            Some(Progress { total: 2, finished: 1, succeeded: 0, failed: 1 })
        );
        assert!(m.has_running());

        let third = m.apply(vec![JobStatus::Failed, JobStatus::Succeeded], t(240));
        assert!(third.unwrap().is_settled());
        assert!(!m.has_running());
    }

    #[tokio::test]
    async fn test_watch_runs_until_all_terminal() {
        let mut m = Monitor::new(vec![job("A", t(0)), job("B", t(0))]);
        let source = Scripted::new(vec![
            ("A", vec!["Running", "Running", "Succeeded"]),
            ("B", vec!["Submitted", "Running", "Running", "Running", "Failed"]),
        ]);
        let mut ticker = CountingTicker::default();

        let p = m.watch(&source, &mut ticker).await.unwrap();

        assert_eq!(ticker.0, 5);
        assert_eq!(p, Progress { total: 2, finished: 2, succeeded: 1, failed: 1 });
        assert!(m.jobs().iter().all(|j| j.finished_at.is_some()));
    }

    #[tokio::test]
    async fn test_watch_keeps_polling_unknown_status() {
        let mut m = Monitor::new(vec![job("A", t(0))]);
        let source = Scripted::new(vec![("A", vec!["On Hold", "On Hold", "Aborting", "Failed"])]);
        let mut ticker = CountingTicker::default();

        m.watch(&source, &mut ticker).await.unwrap();
        assert_eq!(ticker.0, 4);
    }

    #[tokio::test]
    async fn test_watch_with_no_jobs_returns_immediately() {
        let mut m = Monitor::new(Vec::new());
        let source = Scripted::new(Vec::new());
        let mut ticker = CountingTicker::default();

        let p = m.watch(&source, &mut ticker).await.unwrap();
        assert_eq!(ticker.0, 0);
        assert_eq!(p.total, 0);
    }

    #[tokio::test]
    async fn test_status_error_aborts_watch() {
        struct Broken;

        #[async_trait::async_trait]
        impl StatusSource for Broken {
            async fn status(&self, _job_id: &str) -> Result<JobStatus> {
                anyhow::bail!("connection refused")
            }
        }

        let mut m = Monitor::new(vec![job("A", t(0))]);
        let mut ticker = CountingTicker::default();
        assert!(m.watch(&Broken, &mut ticker).await.is_err());
        assert_eq!(ticker.0, 1);
    }
}
