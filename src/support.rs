//! # SecureSupport facade
//!
//! Wires the [`IndexLifecycleManager`], a [`Generator`] and an [`AnswerTemplate`] into the
//! operations the CLI exposes. Every failure is tagged with the [`Stage`] it happened in
//! (initialization, search or generation) so the operator can tell which external
//! service misbehaved.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::SecureSupportConfig;
use crate::embedder::{Embedder, SentenceEmbeddingsModel};
use crate::error::{Stage, StageContext, StageError};
use crate::generator::{ChatGenerator, Generator};
use crate::key_store::{EphemeralKeyStore, FileKeyStore, KeyStore};
use crate::lifecycle::{
    IndexLifecycleManager, IndexReport, IndexStatus, LifecycleOptions, SearchResponse,
    inspect_index,
};
use crate::template::{AnswerTemplate, resolve_template};
use crate::vector_service::{HttpVectorClient, QueryResult, VectorServiceClient};

/// A generated answer and the tickets it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub results: Vec<QueryResult>,
    pub search_elapsed: Duration,
    /// How many of `results` fit into the prompt.
    pub tickets_used: usize,
}

pub struct SecureSupport {
    manager: IndexLifecycleManager,
    generator: Arc<dyn Generator>,
    template: AnswerTemplate,
    token_budget: usize,
    default_top_k: usize,
}

impl SecureSupport {
    /// Build every collaborator from `config`: HTTP vector client, key store, Candle
    /// embedder and chat generator.
    pub async fn connect(config: &SecureSupportConfig) -> Result<Self, StageError> {
        let client = vector_client(config)?;
        let key_store = key_store(config)?;
        let embedder =
            SentenceEmbeddingsModel::load(&config.embedding_model).stage(Stage::Initialization)?;
        let template = resolve_template(config.template.as_deref()).stage(Stage::Generation)?;

        Self::new(
            config,
            Arc::new(client),
            key_store,
            Arc::new(embedder),
            Arc::new(ChatGenerator::new(config)),
            template,
        )
        .await
    }

    /// Assemble from explicit collaborators. Reads or creates the encryption key.
    pub async fn new(
        config: &SecureSupportConfig,
        client: Arc<dyn VectorServiceClient>,
        key_store: Arc<dyn KeyStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        template: AnswerTemplate,
    ) -> Result<Self, StageError> {
        let manager = IndexLifecycleManager::new(
            LifecycleOptions::from_config(config),
            client,
            key_store,
            embedder,
        )
        .await
        .stage(Stage::Initialization)?;

        Ok(Self {
            manager,
            generator,
            template,
            token_budget: config.context_token_budget(),
            default_top_k: config.top_k,
        })
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Bring the index to `Ready`, recovering if needed.
    pub async fn ensure_loaded(&self) -> Result<(), StageError> {
        self.manager
            .ensure()
            .await
            .map(|_| ())
            .stage(Stage::Initialization)
    }

    /// Index a ticket document. Returns the number of tickets upserted.
    pub async fn load_tickets(&self, path: &Path) -> Result<usize, StageError> {
        self.ensure_loaded().await?;
        self.manager
            .load_tickets(path)
            .await
            .stage(Stage::Initialization)
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse, StageError> {
        self.ensure_loaded().await?;
        self.manager.search(query, top_k).await.stage(Stage::Search)
    }

    /// Retrieve the `top_k` closest tickets and have the generator answer from them.
    pub async fn ask(&self, question: &str, top_k: usize) -> Result<Answer, StageError> {
        let SearchResponse { results, elapsed } = self.search(question, top_k).await?;

        let prompt = self
            .template
            .build_prompt(question, &results, self.token_budget)
            .stage(Stage::Generation)?;
        info!(
            "Generating answer from {} of {} tickets",
            prompt.tickets_used,
            results.len()
        );
        let answer = self
            .generator
            .complete(&prompt)
            .await
            .stage(Stage::Generation)?;

        Ok(Answer {
            answer,
            results,
            search_elapsed: elapsed,
            tickets_used: prompt.tickets_used,
        })
    }

    /// Replace the encryption key and rebuild the index. Destroys the old index.
    pub async fn reset(&self) -> Result<(), StageError> {
        self.manager
            .reset()
            .await
            .map(|_| ())
            .stage(Stage::Initialization)
    }

    pub async fn status(&self) -> IndexStatus {
        self.manager.status().await
    }

    /// Report on the stored key and the remote index without loading the embedding
    /// model, generating a key or recovering anything.
    pub async fn inspect(config: &SecureSupportConfig) -> Result<IndexReport, StageError> {
        let client = vector_client(config)?;
        let key_store = key_store(config)?;
        inspect_index(&client, key_store.as_ref(), &config.index_name)
            .await
            .stage(Stage::Initialization)
    }
}

fn vector_client(config: &SecureSupportConfig) -> Result<HttpVectorClient, StageError> {
    HttpVectorClient::new(
        config.vector_service_url.clone(),
        config.vector_api_key.clone(),
        config.request_timeout(),
    )
    .stage(Stage::Initialization)
}

fn key_store(config: &SecureSupportConfig) -> Result<Arc<dyn KeyStore>, StageError> {
    if config.persist_key {
        let path = config.resolved_key_path().stage(Stage::Initialization)?;
        Ok(Arc::new(FileKeyStore::new(path)))
    } else {
        info!("Key persistence disabled, key lives for this process only");
        Ok(Arc::new(EphemeralKeyStore::new()))
    }
}
