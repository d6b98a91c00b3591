//! Object storage abstraction: list, delete, download, upload.
//!
//! The CI pipeline only ever needs these four operations against
//! `gs://bucket/name` locations. [`gcs::GcsStore`] implements them over the
//! Cloud Storage JSON API; [`memory::MemoryStore`] keeps objects in a map.

pub mod gcs;
pub mod memory;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub use gcs::GcsStore;
pub use memory::MemoryStore;

const SCHEME: &str = "gs://";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("could not obtain storage credentials: {0}")]
    Auth(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `gs://bucket/name` location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Last path component of the object name.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.name)
    }
}

/// A listed object and its content checksum (base64 MD5, when the store has one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub location: ObjectRef,
    pub md5: Option<String>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects in `bucket` whose names start with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError>;

    /// Download `object` to the local file `dest`, replacing it.
    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError>;

    /// Upload the local file `src` to `object`.
    async fn upload(&self, src: &Path, object: &ObjectRef) -> Result<(), StorageError>;
}

/// Delete every object under `prefix`; returns how many were removed.
pub async fn delete_prefix(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<usize, StorageError> {
    let objects = store.list(bucket, prefix).await?;
    for object in &objects {
        store.delete(&object.location).await?;
    }
    Ok(objects.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display_and_basename() {
        let r = ObjectRef::new("broad-dsp-lrma-ci", "PBFlowcell/out/reads.bam");
        assert_eq!(r.basename(), "reads.bam");
        assert_eq!(r.to_string(), "gs://broad-dsp-lrma-ci/PBFlowcell/out/reads.bam");
        assert_eq!(ObjectRef::new("b", "top.txt").basename(), "top.txt");
    }

    #[tokio::test]
    async fn test_delete_prefix_counts_removed() {
        let store = MemoryStore::new();
        store.insert(ObjectRef::new("b", "T/a.txt"), b"a".to_vec());
        store.insert(ObjectRef::new("b", "T/sub/b.txt"), b"b".to_vec());
        store.insert(ObjectRef::new("b", "Other/c.txt"), b"c".to_vec());

        let removed = delete_prefix(&store, "b", "T").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list("b", "").await.unwrap().len(), 1);

        let removed = delete_prefix(&store, "b", "T").await.unwrap();
        assert_eq!(removed, 0);
    }
}
