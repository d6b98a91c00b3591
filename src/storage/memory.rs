//! In-memory object store for tests and local dry runs.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ObjectInfo, ObjectRef, ObjectStore, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    md5: Option<String>,
}

/// Objects kept in a sorted map; listing order is lexicographic by location.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectRef, StoredObject>>,
    downloads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` with a checksum derived from its content.
    pub fn insert(&self, object: ObjectRef, data: Vec<u8>) {
        let md5 = Some(fingerprint(&data));
        self.put(object, StoredObject { data, md5 });
    }

    /// Store `data` with an explicit checksum.
    pub fn insert_with_md5(&self, object: ObjectRef, data: Vec<u8>, md5: &str) {
        self.put(
            object,
            StoredObject {
                data,
                md5: Some(md5.to_string()),
            },
        );
    }

    pub fn get(&self, object: &ObjectRef) -> Option<Vec<u8>> {
        self.lock().get(object).map(|o| o.data.clone())
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.lock().contains_key(object)
    }

    /// Number of `download` calls served so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn put(&self, object: ObjectRef, stored: StoredObject) {
        self.lock().insert(object, stored);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectRef, StoredObject>> {
        // A poisoned map is still structurally valid.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fingerprint(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("mem:{:016x}", hasher.finish())
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(r, _)| r.bucket == bucket && r.name.starts_with(prefix))
            .map(|(r, o)| ObjectInfo {
                location: r.clone(),
                md5: o.md5.clone(),
            })
            .collect())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError> {
        self.lock()
            .remove(object)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(object.to_string()))
    }

    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StorageError> {
        let data = self
            .get(object)
            .ok_or_else(|| StorageError::NotFound(object.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, object: &ObjectRef) -> Result<(), StorageError> {
        let data = tokio::fs::read(src).await?;
        self.insert(object.clone(), data);
        Ok(())
    }
}
