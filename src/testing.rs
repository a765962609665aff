//! In-memory stand-ins for the external services, shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::embedder::{Embedder, cosine_similarity};
use crate::error::{SupportError, SupportResult};
use crate::generator::Generator;
use crate::key_store::{EncryptionKey, EphemeralKeyStore, KEY_LENGTH, KeyStore};
use crate::template::Prompt;
use crate::vector_service::{
    IndexConfig, IndexHandle, QueryField, QueryResult, TicketMetadata, UpsertItem,
    VectorServiceClient,
};

pub const TEST_DIMENSION: usize = 16;

/// Deterministic embedder: SHA-256 of the text spread over [`TEST_DIMENSION`] floats.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn encode(&self, text: &str) -> SupportResult<Vec<f32>> {
        let digest = sha256::digest(text);
        Ok(digest
            .as_bytes()
            .chunks(4)
            .take(TEST_DIMENSION)
            .map(|chunk| {
                let hex = std::str::from_utf8(chunk).unwrap_or("0");
                u16::from_str_radix(hex, 16).unwrap_or(0) as f32 / 65535.0 - 0.5
            })
            .collect())
    }
}

struct RemoteIndex {
    key: EncryptionKey,
    items: BTreeMap<String, (Vec<f32>, TicketMetadata)>,
}

/// Calls observed by [`FakeVectorService`].
#[derive(Debug, Default)]
pub struct CallCounts {
    pub generate_key: AtomicUsize,
    pub list: AtomicUsize,
    pub create: AtomicUsize,
    pub load: AtomicUsize,
    pub delete: AtomicUsize,
    pub upsert: AtomicUsize,
    pub query: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Remote service double: indexes are bound to the key they were created with and
/// reject any other key with [`SupportError::KeyMismatch`].
#[derive(Default)]
pub struct FakeVectorService {
    indexes: Mutex<BTreeMap<String, RemoteIndex>>,
    next_key: AtomicUsize,
    pub calls: CallCounts,
    pub fail_delete: AtomicBool,
    pub fail_load_unavailable: AtomicBool,
    pub fail_query_unavailable: AtomicBool,
}

impl FakeVectorService {
    pub fn new() -> Self {
        Self::default()
    }

    fn indexes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, RemoteIndex>> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of items stored in `index_name`, `None` if the index does not exist.
    pub fn item_count(&self, index_name: &str) -> Option<usize> {
        self.indexes().get(index_name).map(|index| index.items.len())
    }

    /// Key the remote index is bound to.
    pub fn bound_key(&self, index_name: &str) -> Option<EncryptionKey> {
        self.indexes().get(index_name).map(|index| index.key.clone())
    }

    fn check_key(&self, handle: &IndexHandle) -> SupportResult<()> {
        match self.indexes().get(&handle.index_name) {
            None => Err(SupportError::IndexNotFound(handle.index_name.clone())),
            Some(index) if index.key != handle.key => {
                Err(SupportError::KeyMismatch(handle.index_name.clone()))
            }
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl VectorServiceClient for FakeVectorService {
    async fn generate_key(&self) -> SupportResult<EncryptionKey> {
        self.calls.generate_key.fetch_add(1, Ordering::SeqCst);
        let n = self.next_key.fetch_add(1, Ordering::SeqCst) as u8;
        Ok(EncryptionKey::new(vec![n.wrapping_add(1); KEY_LENGTH]))
    }

    async fn list_indexes(&self) -> SupportResult<BTreeSet<String>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        Ok(self.indexes().keys().cloned().collect())
    }

    async fn create_index(
        &self,
        index_name: &str,
        key: &EncryptionKey,
        _config: &IndexConfig,
    ) -> SupportResult<IndexHandle> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let mut indexes = self.indexes();
        if indexes.contains_key(index_name) {
            return Err(SupportError::Remote(format!(
                "409 index {index_name} already exists"
            )));
        }
        indexes.insert(
            index_name.to_string(),
            RemoteIndex {
                key: key.clone(),
                items: BTreeMap::new(),
            },
        );
        Ok(IndexHandle::new(index_name, key.clone()))
    }

    async fn load_index(
        &self,
        index_name: &str,
        key: &EncryptionKey,
    ) -> SupportResult<IndexHandle> {
        self.calls.load.fetch_add(1, Ordering::SeqCst);
        if self.fail_load_unavailable.load(Ordering::SeqCst) {
            return Err(SupportError::RemoteUnavailable("connection reset".into()));
        }
        let handle = IndexHandle::new(index_name, key.clone());
        self.check_key(&handle)?;
        Ok(handle)
    }

    async fn delete_index(&self, index_name: &str) -> SupportResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SupportError::RemoteUnavailable("delete timed out".into()));
        }
        self.indexes()
            .remove(index_name)
            .map(|_| ())
            .ok_or_else(|| SupportError::IndexNotFound(index_name.to_string()))
    }

    async fn upsert(&self, handle: &IndexHandle, items: Vec<UpsertItem>) -> SupportResult<()> {
        self.calls.upsert.fetch_add(1, Ordering::SeqCst);
        self.check_key(handle)?;
        let mut indexes = self.indexes();
        if let Some(index) = indexes.get_mut(&handle.index_name) {
            for item in items {
                index.items.insert(item.id, (item.vector, item.metadata));
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
        include: &[QueryField],
    ) -> SupportResult<Vec<QueryResult>> {
        self.calls.query.fetch_add(1, Ordering::SeqCst);
        if self.fail_query_unavailable.load(Ordering::SeqCst) {
            return Err(SupportError::RemoteUnavailable("503 maintenance".into()));
        }
        self.check_key(handle)?;
        let indexes = self.indexes();
        let Some(index) = indexes.get(&handle.index_name) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &String, &TicketMetadata)> = index
            .items
            .iter()
            .map(|(id, (v, meta))| (1.0 - cosine_similarity(vector, v), id, meta))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, id, meta)| QueryResult {
                id: id.clone(),
                metadata: include
                    .contains(&QueryField::Metadata)
                    .then(|| meta.clone()),
                distance: include.contains(&QueryField::Distance).then_some(distance),
            })
            .collect())
    }
}

/// In-memory key store whose writes can be made to fail, like a full disk.
#[derive(Default)]
pub struct FallibleKeyStore {
    inner: EphemeralKeyStore,
    pub fail_writes: AtomicBool,
}

impl FallibleKeyStore {
    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            inner: EphemeralKeyStore::with_key(key),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl KeyStore for FallibleKeyStore {
    fn read(&self) -> SupportResult<Option<EncryptionKey>> {
        self.inner.read()
    }

    fn write(&self, key: &EncryptionKey) -> SupportResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SupportError::KeyStoreUnavailable {
                location: self.location(),
                reason: "No space left on device".into(),
            });
        }
        self.inner.write(key)
    }

    fn delete(&self) -> SupportResult<()> {
        self.inner.delete()
    }

    fn location(&self) -> String {
        "fallible-memory".to_string()
    }
}

/// Generator that echoes how many tickets it was given, or fails on demand.
#[derive(Default)]
pub struct FakeGenerator {
    pub fail: AtomicBool,
    pub prompts: Mutex<Vec<Prompt>>,
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn complete(&self, prompt: &Prompt) -> SupportResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupportError::Generation("connection refused".into()));
        }
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());
        Ok(format!("answered from {} tickets", prompt.tickets_used))
    }
}
