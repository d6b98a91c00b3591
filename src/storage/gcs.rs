//! Google Cloud Storage over the JSON API.
//!
//! Credentials are ambient: an OAuth access token from the
//! `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable, or else whatever
//! `gcloud auth print-access-token` returns for the active account.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ObjectInfo, ObjectRef, ObjectStore, StorageError};

pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// gcloud tokens live for an hour; refresh well before that.
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

#[derive(Debug)]
enum TokenSource {
    Static(String),
    Gcloud {
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl TokenSource {
    fn from_env() -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::Static(token.trim().to_string()),
            _ => Self::Gcloud {
                cached: Mutex::new(None),
            },
        }
    }

    async fn token(&self) -> Result<String, StorageError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Gcloud { cached } => {
                let mut guard = cached.lock().await;
                if let Some((token, fetched)) = guard.as_ref() {
                    if fetched.elapsed() < TOKEN_TTL {
                        return Ok(token.clone());
                    }
                }
                let token = gcloud_access_token().await?;
                *guard = Some((token.clone(), Instant::now()));
                Ok(token)
            }
        }
    }
}

async fn gcloud_access_token() -> Result<String, StorageError> {
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| StorageError::Auth(format!("failed to run gcloud: {e}")))?;
    if !output.status.success() {
        return Err(StorageError::Auth(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(StorageError::Auth("gcloud returned an empty token".to_string()));
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListItem {
    name: String,
    md5_hash: Option<String>,
}

/// Cloud Storage client.
#[derive(Debug)]
pub struct GcsStore {
    http: Client,
    endpoint: Url,
    tokens: TokenSource,
}

impl GcsStore {
    pub fn new(http: Client, endpoint: &str) -> Result<Self, StorageError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| StorageError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            tokens: TokenSource::from_env(),
        })
    }

    /// `<endpoint>/<root...>/b/<bucket>/o[/<object>]` with every segment escaped.
    fn object_url(&self, root: &[&str], bucket: &str, object: Option<&str>) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty();
            segments.extend(root);
            segments.extend(["b", bucket, "o"]);
            if let Some(name) = object {
                segments.push(name);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let token = self.tokens.token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            return Err(StorageError::NotFound(url));
        }
        Err(StorageError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for GcsStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let url = self.object_url(&["storage", "v1"], bucket, None)?;
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .query(&[("prefix", prefix), ("fields", "items(name,md5Hash),nextPageToken")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ListResponse = self.send(request).await?.json().await?;
            objects.extend(page.items.into_iter().map(|item| ObjectInfo {
                location: ObjectRef::new(bucket, item.name),
                md5: item.md5_hash,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(bucket, prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError> {
        let url = self.object_url(&["storage", "v1"], &object.bucket, Some(&object.name))?;
        self.send(self.http.delete(url)).await?;
        debug!(%object, "deleted object");
        Ok(())
    }

    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError> {
        let url = self.object_url(&["storage", "v1"], &object.bucket, Some(&object.name))?;
        let mut resp = self
            .send(self.http.get(url).query(&[("alt", "media")]))
            .await?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(%object, dest = %dest.display(), "downloaded object");
        Ok(())
    }

    async fn upload(&self, src: &Path, object: &ObjectRef) -> Result<(), StorageError> {
        let url = self.object_url(&["upload", "storage", "v1"], &object.bucket, None)?;
        let data = tokio::fs::read(src).await?;
        let request = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", object.name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(data);
        self.send(request).await?;
        debug!(%object, src = %src.display(), "uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GcsStore {
        GcsStore {
            http: Client::new(),
            endpoint: Url::parse("https://storage.googleapis.com").unwrap(),
            tokens: TokenSource::Static("test-token".to_string()),
        }
    }

    #[test]
    fn test_object_url_escapes_name() {
        let url = store()
            .object_url(&["storage", "v1"], "my-bucket", Some("T/out dir/a.bam"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/my-bucket/o/T%2Fout%20dir%2Fa.bam"
        );
    }

    #[test]
    fn test_upload_url() {
        let url = store()
            .object_url(&["upload", "storage", "v1"], "res", None)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/upload/storage/v1/b/res/o"
        );
    }

    #[test]
    fn test_list_response_parsing() {
        let page: ListResponse = serde_json::from_str(
            r#"{"items":[{"name":"T/a.bam","md5Hash":"md5:abc=="},{"name":"T/b"}],"nextPageToken":"p2"}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].md5_hash.as_deref(), Some("md5:abc=="));
        assert!(page.items[1].md5_hash.is_none());
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));

        let empty: ListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(store().tokens.token().await.unwrap(), "test-token");
    }
}
