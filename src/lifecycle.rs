//! # Index lifecycle and key management
//!
//! [`IndexLifecycleManager`] guarantees that exactly one correctly keyed handle to the
//! remote encrypted index exists before any upsert or query runs, and rebuilds the index
//! when the local key no longer opens it.
//!
//! ## States
//!
//! ```text
//!                 ensure()
//!  Uninitialized ──────────┬── name absent ── create ─────────────────────┐
//!        ▲                 │                                               ▼
//!        │                 └── name present ── load ── ok ──────────────► Ready
//!        │ (recovery failed)                    │                          ▲
//!        │                                      └─ KeyMismatch ─► Recovering
//!        └──────────────────────────────────────────────────────────┘  │
//!                                                  delete (best effort) │
//!                                                  create with local key│
//!                                                  re-index ticket file ┘
//! ```
//!
//! `reset()` is the operator's manual remedy: it generates a new key, persists it over the
//! old one, and forces a pass through `Recovering`. If the new key cannot be generated or
//! stored, the old key stays both on disk and in memory and the index is untouched.
//!
//! A recovery that recreated the index but failed while re-indexing leaves a pending
//! re-index behind. The next `ensure()` finds the recreated index opening cleanly and
//! finishes the re-index before it reports `Ready`.
//!
//! ## Concurrency
//! Transitions are serialized by an async mutex held for the whole create/load/recover
//! sequence. The mutex is released before steady-state upserts and queries, which run
//! concurrently against the cached handle.
//!
//! ## Key handling
//! The key is read or created once, in [`IndexLifecycleManager::new`]: a stored key is used
//! verbatim; otherwise the service generates one, it is persisted, and only then used. A
//! crash between generation and persistence strands any index created with that key; the
//! service offers no way to make the two steps atomic.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SecureSupportConfig;
use crate::embedder::Embedder;
use crate::error::{SupportError, SupportResult};
use crate::key_store::{EncryptionKey, KeyStore};
use crate::tickets::{TicketRecord, load_tickets};
use crate::vector_service::{
    IndexConfig, IndexHandle, QueryField, QueryResult, UpsertItem, VectorServiceClient,
};

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexState {
    Uninitialized,
    Recovering,
    Ready(IndexHandle),
}

impl IndexState {
    pub fn phase(&self) -> IndexPhase {
        match self {
            IndexState::Uninitialized => IndexPhase::Uninitialized,
            IndexState::Recovering => IndexPhase::Recovering,
            IndexState::Ready(_) => IndexPhase::Ready,
        }
    }
}

/// [`IndexState`] without the handle, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Uninitialized,
    Recovering,
    Ready,
}

/// Snapshot returned by [`IndexLifecycleManager::status`]. Never contains key material.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    pub index_name: String,
    pub phase: IndexPhase,
    pub key_fingerprint: String,
    pub key_location: String,
    pub recoveries: usize,
}

/// Construction parameters that are not collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOptions {
    pub index_name: String,
    pub index_config: IndexConfig,
    /// Route load-time key mismatches through recovery instead of failing.
    pub recover_on_mismatch: bool,
    /// Ticket document used to repopulate a recreated index.
    pub ticket_source: Option<PathBuf>,
}

impl LifecycleOptions {
    pub fn from_config(config: &SecureSupportConfig) -> Self {
        Self {
            index_name: config.index_name.clone(),
            index_config: config.index_config(),
            recover_on_mismatch: config.recover_on_mismatch,
            ticket_source: config.tickets_path.clone(),
        }
    }
}

/// Ranked results plus the wall time of embed + query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<QueryResult>,
    pub elapsed: Duration,
}

/// What [`inspect_index`] found on the service for the stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteIndexState {
    /// No index with the configured name.
    Missing,
    /// The index exists but there is no stored key to try.
    Unverified,
    /// The stored key opens the index.
    Opens,
    /// The stored key does not open the index.
    KeyMismatch,
}

/// Read-only view of the stored key and the remote index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    pub index_name: String,
    pub key_location: String,
    pub key_fingerprint: Option<String>,
    pub remote: RemoteIndexState,
}

/// Look at the stored key and the remote index without changing either.
///
/// Never generates a key, creates or deletes an index, or starts a recovery.
pub async fn inspect_index(
    client: &dyn VectorServiceClient,
    key_store: &dyn KeyStore,
    index_name: &str,
) -> SupportResult<IndexReport> {
    let key = key_store.read()?;
    let existing = client.list_indexes().await?;

    let remote = match &key {
        _ if !existing.contains(index_name) => RemoteIndexState::Missing,
        None => RemoteIndexState::Unverified,
        Some(key) => match client.load_index(index_name, key).await {
            Ok(_) => RemoteIndexState::Opens,
            Err(err) if err.is_key_mismatch() => RemoteIndexState::KeyMismatch,
            Err(err) => return Err(err),
        },
    };

    Ok(IndexReport {
        index_name: index_name.to_string(),
        key_location: key_store.location(),
        key_fingerprint: key.as_ref().map(EncryptionKey::fingerprint),
        remote,
    })
}

struct Lifecycle {
    key: EncryptionKey,
    state: IndexState,
    /// The index was recreated but not yet repopulated from the ticket source.
    reindex_pending: bool,
}

/// Owns the encryption key and the single live handle to the remote index.
pub struct IndexLifecycleManager {
    options: LifecycleOptions,
    client: Arc<dyn VectorServiceClient>,
    key_store: Arc<dyn KeyStore>,
    embedder: Arc<dyn Embedder>,
    lifecycle: Mutex<Lifecycle>,
    recoveries: AtomicUsize,
}

impl IndexLifecycleManager {
    /// Read or create the encryption key and return an `Uninitialized` manager.
    ///
    /// # Errors
    /// - [`SupportError::KeyStoreUnavailable`] if the key cannot be read or persisted.
    /// - Any remote error from key generation.
    pub async fn new(
        options: LifecycleOptions,
        client: Arc<dyn VectorServiceClient>,
        key_store: Arc<dyn KeyStore>,
        embedder: Arc<dyn Embedder>,
    ) -> SupportResult<Self> {
        if embedder.dimension() != options.index_config.dimension {
            return Err(SupportError::DimensionMismatch {
                expected: options.index_config.dimension,
                actual: embedder.dimension(),
            });
        }

        let key = Self::read_or_create_key(client.as_ref(), key_store.as_ref()).await?;
        info!(
            fingerprint = %key.fingerprint(),
            "Encryption key ready ({} bytes)",
            key.len()
        );

        Ok(Self {
            options,
            client,
            key_store,
            embedder,
            lifecycle: Mutex::new(Lifecycle {
                key,
                state: IndexState::Uninitialized,
                reindex_pending: false,
            }),
            recoveries: AtomicUsize::new(0),
        })
    }

    async fn read_or_create_key(
        client: &dyn VectorServiceClient,
        key_store: &dyn KeyStore,
    ) -> SupportResult<EncryptionKey> {
        if let Some(key) = key_store.read()? {
            return Ok(key);
        }
        info!("Generating new encryption key...");
        let key = client.generate_key().await?;
        key_store.write(&key)?;
        Ok(key)
    }

    pub fn index_name(&self) -> &str {
        &self.options.index_name
    }

    /// Current state. Waits for any transition in progress.
    pub async fn state(&self) -> IndexState {
        self.lifecycle.lock().await.state.clone()
    }

    /// Current key. Waits for any transition in progress.
    pub async fn key(&self) -> EncryptionKey {
        self.lifecycle.lock().await.key.clone()
    }

    /// Number of times the index was rebuilt, automatically or through [`Self::reset`].
    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> IndexStatus {
        let lifecycle = self.lifecycle.lock().await;
        IndexStatus {
            index_name: self.index_name().to_string(),
            phase: lifecycle.state.phase(),
            key_fingerprint: lifecycle.key.fingerprint(),
            key_location: self.key_store.location(),
            recoveries: self.recoveries(),
        }
    }

    /// Make sure a correctly keyed handle is cached and return it.
    ///
    /// A no-op when already `Ready`. Otherwise lists remote indexes, then loads or creates
    /// the index, recovering from a [`SupportError::KeyMismatch`] when enabled.
    ///
    /// # Errors
    /// Create/load failures are returned and leave the manager `Uninitialized`.
    pub async fn ensure(&self) -> SupportResult<IndexHandle> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.ensure_locked(&mut lifecycle).await
    }

    async fn ensure_locked(&self, lifecycle: &mut Lifecycle) -> SupportResult<IndexHandle> {
        if let IndexState::Ready(handle) = &lifecycle.state {
            return Ok(handle.clone());
        }

        let name = self.index_name();
        let existing = self.client.list_indexes().await?;

        let handle = if existing.contains(name) {
            info!("Loading existing index: {name}");
            match self.client.load_index(name, &lifecycle.key).await {
                Ok(handle) => handle,
                Err(err) if err.is_key_mismatch() && self.options.recover_on_mismatch => {
                    warn!("Key mismatch detected, recreating index {name}");
                    self.recover_locked(lifecycle).await?
                }
                Err(err) => return Err(err),
            }
        } else {
            info!("Creating new index: {name}");
            self.client
                .create_index(name, &lifecycle.key, &self.options.index_config)
                .await?
        };

        if lifecycle.reindex_pending {
            warn!("Resuming interrupted re-index of {name}");
            self.reindex_locked(lifecycle, &handle).await?;
        }

        lifecycle.state = IndexState::Ready(handle.clone());
        info!("Index ready: {name}");
        Ok(handle)
    }

    /// Delete (best effort), recreate with the current key, re-index the ticket source.
    ///
    /// Leaves the state `Recovering` on success for the caller to promote, or
    /// `Uninitialized` on failure. Any failure keeps `reindex_pending` set, so whichever
    /// index the next `ensure()` opens or creates is repopulated first.
    async fn recover_locked(&self, lifecycle: &mut Lifecycle) -> SupportResult<IndexHandle> {
        lifecycle.state = IndexState::Recovering;
        lifecycle.reindex_pending = true;
        let handle = match self.recreate(&lifecycle.key).await {
            Ok(handle) => handle,
            Err(err) => {
                lifecycle.state = IndexState::Uninitialized;
                return Err(err);
            }
        };
        self.reindex_locked(lifecycle, &handle).await?;
        Ok(handle)
    }

    async fn recreate(&self, key: &EncryptionKey) -> SupportResult<IndexHandle> {
        let name = self.index_name();

        info!("Deleting old index: {name}");
        if let Err(err) = self.client.delete_index(name).await {
            warn!("Could not delete index {name}: {err}");
        }

        info!("Creating fresh index: {name}");
        self.client
            .create_index(name, key, &self.options.index_config)
            .await
    }

    async fn reindex_locked(
        &self,
        lifecycle: &mut Lifecycle,
        handle: &IndexHandle,
    ) -> SupportResult<()> {
        lifecycle.state = IndexState::Recovering;
        match self.reindex(handle).await {
            Ok(()) => {
                lifecycle.reindex_pending = false;
                self.recoveries.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                lifecycle.state = IndexState::Uninitialized;
                Err(err)
            }
        }
    }

    async fn reindex(&self, handle: &IndexHandle) -> SupportResult<()> {
        let name = self.index_name();
        match &self.options.ticket_source {
            Some(path) if path.exists() => {
                info!("Re-indexing tickets from {}", path.display());
                let tickets = load_tickets(path)?;
                self.upsert_tickets(handle, &tickets).await?;
            }
            Some(path) => {
                info!(
                    "Ticket source {} not found, leaving {name} empty",
                    path.display()
                );
            }
            None => info!("No ticket source configured, leaving {name} empty"),
        }
        Ok(())
    }

    /// Replace the key with a newly generated one and rebuild the index with it.
    ///
    /// Destructive: anything encrypted under the old key becomes unreadable. The new key
    /// overwrites the stored one before it is used; if generating or storing it fails,
    /// the old key and the index are left as they were.
    pub async fn reset(&self) -> SupportResult<IndexHandle> {
        let mut lifecycle = self.lifecycle.lock().await;
        warn!("Resetting index {}", self.index_name());

        let key = self.client.generate_key().await?;
        self.key_store.write(&key)?;
        info!(fingerprint = %key.fingerprint(), "Generated replacement encryption key");

        lifecycle.key = key;
        lifecycle.state = IndexState::Uninitialized;

        let handle = self.recover_locked(&mut lifecycle).await?;
        lifecycle.state = IndexState::Ready(handle.clone());
        info!("Index reset complete!");
        Ok(handle)
    }

    /// Insert or overwrite items by id.
    pub async fn upsert(&self, items: Vec<UpsertItem>) -> SupportResult<()> {
        let handle = self.ensure().await?;
        self.client.upsert(&handle, items).await
    }

    /// Rank stored items against `vector`; returns at most `top_k` results.
    ///
    /// # Errors
    /// [`SupportError::InvalidTopK`] for `top_k == 0`, before any remote call.
    pub async fn query(&self, vector: &[f32], top_k: usize) -> SupportResult<Vec<QueryResult>> {
        if top_k == 0 {
            return Err(SupportError::InvalidTopK);
        }
        if vector.len() != self.options.index_config.dimension {
            return Err(SupportError::DimensionMismatch {
                expected: self.options.index_config.dimension,
                actual: vector.len(),
            });
        }

        let handle = self.ensure().await?;
        let mut results = self
            .client
            .query(
                &handle,
                vector,
                top_k,
                &[QueryField::Metadata, QueryField::Distance],
            )
            .await?;
        results.truncate(top_k);
        Ok(results)
    }

    /// Embed `tickets` and upsert them as one batch. Returns the number indexed.
    pub async fn index_tickets(&self, tickets: &[TicketRecord]) -> SupportResult<usize> {
        let handle = self.ensure().await?;
        self.upsert_tickets(&handle, tickets).await
    }

    /// Read a ticket document and index all of it.
    pub async fn load_tickets(&self, path: &std::path::Path) -> SupportResult<usize> {
        let tickets = load_tickets(path)?;
        self.index_tickets(&tickets).await
    }

    async fn upsert_tickets(
        &self,
        handle: &IndexHandle,
        tickets: &[TicketRecord],
    ) -> SupportResult<usize> {
        if tickets.is_empty() {
            return Ok(0);
        }

        info!("Embedding and encrypting {} tickets...", tickets.len());
        let start = Instant::now();

        let texts: Vec<&str> = tickets.iter().map(|t| t.text.as_str()).collect();
        let vectors = self.embedder.encode_batch(&texts)?;

        let items: Vec<UpsertItem> = tickets
            .iter()
            .zip(vectors)
            .map(|(ticket, vector)| UpsertItem {
                id: ticket.id.clone(),
                vector,
                metadata: ticket.metadata(),
            })
            .collect();

        self.client.upsert(handle, items).await?;

        let elapsed = start.elapsed();
        info!(
            "Indexed {} tickets in {:.2}s ({:.2}ms per ticket)",
            tickets.len(),
            elapsed.as_secs_f64(),
            elapsed.as_secs_f64() * 1000.0 / tickets.len() as f64
        );
        Ok(tickets.len())
    }

    /// Embed `query` and return the `top_k` most similar tickets.
    pub async fn search(&self, query: &str, top_k: usize) -> SupportResult<SearchResponse> {
        if top_k == 0 {
            return Err(SupportError::InvalidTopK);
        }
        self.ensure().await?;

        debug!("Searching for: '{query}'");
        let start = Instant::now();
        let vector = self.embedder.encode(query)?;
        let results = self.query(&vector, top_k).await?;
        let elapsed = start.elapsed();

        info!(
            "Search completed in {:.2}ms ({} results)",
            elapsed.as_secs_f64() * 1000.0,
            results.len()
        );
        Ok(SearchResponse { results, elapsed })
    }
}
