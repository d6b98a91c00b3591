//! HTTP client for the Cromwell workflow REST API.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{CromwellError, RetryPolicy, Submission, WorkflowIdAndStatus};

const WORKFLOWS_PATH: &str = "/api/workflows/v1";

/// Talks to one execution server at a fixed base address.
#[derive(Debug, Clone)]
pub struct CromwellClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl CromwellClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy, http: Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn workflows_url(&self) -> String {
        format!("{}{}", self.base_url, WORKFLOWS_PATH)
    }

    /// Submit a workflow. Empty responses and transport errors are retried
    /// per the retry policy; a non-JSON body fails immediately.
    pub async fn submit(
        &self,
        submission: &Submission<'_>,
    ) -> Result<WorkflowIdAndStatus, CromwellError> {
        let url = self.workflows_url();
        let files = [
            ("workflowSource", read_part(submission.workflow_source).await?),
            ("workflowInputs", read_part(submission.workflow_inputs).await?),
            ("workflowOptions", read_part(submission.workflow_options).await?),
            (
                "workflowDependencies",
                read_part(submission.workflow_dependencies).await?,
            ),
        ];

        for attempt in 1..=self.retry.attempts {
            let mut form = Form::new();
            for (field, (name, bytes)) in &files {
                form = form.part(*field, Part::bytes(bytes.clone()).file_name(name.clone()));
            }

            match self.http.post(&url).multipart(form).send().await {
                Ok(resp) => match resp.bytes().await {
                    Ok(body) if !body.iter().all(u8::is_ascii_whitespace) => {
                        return parse_body(&url, &body);
                    }
                    Ok(_) => warn!(%url, attempt, "empty response to workflow submission"),
                    Err(e) => warn!(%url, attempt, error = %e, "failed to read submission response"),
                },
                Err(e) => warn!(%url, attempt, error = %e, "workflow submission request failed"),
            }

            if attempt < self.retry.attempts && !self.retry.backoff.is_zero() {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        Err(CromwellError::Unreachable {
            url,
            attempts: self.retry.attempts,
        })
    }

    /// Query the status of one workflow. Not retried.
    pub async fn status(&self, id: &str) -> Result<WorkflowIdAndStatus, CromwellError> {
        let url = format!("{}/{}/status", self.workflows_url(), id);
        let body = self.get(&url).await?;
        parse_body(&url, &body)
    }

    /// Full execution metadata with sub-workflows expanded and submitted
    /// file contents excluded.
    pub async fn metadata(&self, id: &str) -> Result<serde_json::Value, CromwellError> {
        let url = format!(
            "{}/{}/metadata?excludeKey=submittedFiles&expandSubWorkflows=true",
            self.workflows_url(),
            id
        );
        let body = self.get(&url).await?;
        parse_body(&url, &body)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, CromwellError> {
        debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| CromwellError::Http {
                url: url.to_string(),
                source,
            })?;
        let body = resp.bytes().await.map_err(|source| CromwellError::Http {
            url: url.to_string(),
            source,
        })?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(CromwellError::Unreachable {
                url: url.to_string(),
                attempts: 1,
            });
        }
        Ok(body.to_vec())
    }
}

async fn read_part(path: &Path) -> Result<(String, Vec<u8>), CromwellError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| CromwellError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((name, bytes))
}

fn parse_body<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, CromwellError> {
    serde_json::from_slice(body).map_err(|source| CromwellError::MalformedResponse {
        url: url.to_string(),
        source,
    })
}
