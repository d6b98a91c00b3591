//! Workflow execution server (Cromwell REST API) types and client.

pub mod client;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::CromwellClient;

#[derive(Debug, Error)]
pub enum CromwellError {
    #[error("no valid response from {url} after {attempts} attempt(s)")]
    Unreachable { url: String, attempts: u32 },

    #[error("malformed JSON from {url}: {source}")]
    MalformedResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read submission file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Retry behaviour for workflow submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Workflow status as reported by the server.
///
/// Only `Succeeded` and `Failed` are terminal. Any status string the server
/// reports that is not one of the four known ones is kept verbatim and
/// treated as still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Submitted" => Self::Submitted,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{id, status}` body returned by submission and status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIdAndStatus {
    pub id: String,
    pub status: JobStatus,
}

/// Files sent with a workflow submission.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    pub workflow_source: &'a std::path::Path,
    pub workflow_inputs: &'a std::path::Path,
    pub workflow_options: &'a std::path::Path,
    pub workflow_dependencies: &'a std::path::Path,
}
