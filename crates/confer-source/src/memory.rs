use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use confer_types::RepositoryDefinition;

use crate::digest::etag;
use crate::object::{
    GetObjectOutput, ObjectClient, ObjectClientError, ObjectClientFactory, PutObjectOutput,
    PutObjectRequest,
};
use crate::traits::CONTENT_TYPE;

/// Metadata of a stored object, as a HEAD request would report it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub etag: String,
    pub content_type: String,
    pub content_disposition: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

struct StoredObject {
    data: Bytes,
    meta: ObjectMeta,
}

/// In-memory, HashMap-based object client.
///
/// Intended for tests and embedding. Objects are keyed by bucket and key and
/// held behind a `RwLock`; ETags are content hashes, so rewriting identical
/// bytes yields the same tag.
#[derive(Default)]
pub struct InMemoryObjectClient {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    shut_down: AtomicBool,
}

impl InMemoryObjectClient {
    /// Create a new empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` directly, returning its ETag.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let meta = ObjectMeta {
            etag: etag(&data),
            content_type: CONTENT_TYPE.to_string(),
            content_disposition: String::new(),
            content_length: data.len() as u64,
            last_modified: Utc::now(),
            metadata: BTreeMap::new(),
        };
        let tag = meta.etag.clone();
        self.objects
            .write()
            .expect("lock poisoned")
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, meta });
        tag
    }

    /// Metadata of the object at `bucket`/`key`.
    pub fn head(&self, bucket: &str, key: &str) -> Option<ObjectMeta> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| obj.meta.clone())
    }

    /// Remove an object. Returns `true` if it existed.
    pub fn remove(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some()
    }

    /// Sorted keys stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let map = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<String> = map
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectClient for InMemoryObjectClient {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<GetObjectOutput, ObjectClientError> {
        let map = self.objects.read().expect("lock poisoned");
        let obj = map
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                ObjectClientError::not_found(format!("no such key: {bucket}/{key}"))
            })?;
        Ok(GetObjectOutput {
            content_length: obj.meta.content_length,
            etag: Some(obj.meta.etag.clone()),
            body: Box::pin(Cursor::new(obj.data.clone())),
        })
    }

    async fn put_object(
        &self,
        request: PutObjectRequest,
    ) -> Result<PutObjectOutput, ObjectClientError> {
        if request.content_length != request.body.len() as u64 {
            return Err(ObjectClientError::new(
                Some(400),
                format!(
                    "content length {} does not match body of {} bytes",
                    request.content_length,
                    request.body.len()
                ),
            ));
        }
        let meta = ObjectMeta {
            etag: etag(&request.body),
            content_type: request.content_type,
            content_disposition: request.content_disposition,
            content_length: request.content_length,
            last_modified: request.last_modified,
            metadata: request.metadata,
        };
        let tag = meta.etag.clone();
        self.objects.write().expect("lock poisoned").insert(
            (request.bucket, request.key),
            StoredObject {
                data: request.body,
                meta,
            },
        );
        Ok(PutObjectOutput { etag: Some(tag) })
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared in-memory client to every repository.
#[async_trait]
impl ObjectClientFactory for Arc<InMemoryObjectClient> {
    async fn connect(
        &self,
        _definition: &RepositoryDefinition,
    ) -> Result<Arc<dyn ObjectClient>, ObjectClientError> {
        Ok(Arc::clone(self) as Arc<dyn ObjectClient>)
    }
}
