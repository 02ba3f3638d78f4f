use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::CreateEmbeddingRequestArgs,
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;

/// Batch size per embeddings request. The candidate pool for the demo
/// schema is a few hundred strings, so this keeps requests to a handful.
const EMBED_BATCH: usize = 256;

/// Capability interface over the embedding provider, so the index can be
/// built and queried against a deterministic implementation in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Lookup("embedding service returned no vector".to_string()))
    }
}

pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(EMBED_BATCH) {
            debug!("Embedding batch of {} strings", chunk.len());
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(chunk.to_vec())
                .build()
                .map_err(|e| AppError::Llm(e.to_string()))?;

            let response =
                tokio::time::timeout(self.timeout, self.client.embeddings().create(request))
                    .await
                    .map_err(|_| {
                        AppError::Llm(format!("embedding request timed out after {:?}", self.timeout))
                    })?
                    .map_err(|e| AppError::Llm(e.to_string()))?;

            let mut data = response.data;
            data.sort_by_key(|e| e.index);
            if data.len() != chunk.len() {
                return Err(AppError::Llm(format!(
                    "embedding service returned {} vectors for {} inputs",
                    data.len(),
                    chunk.len()
                )));
            }
            vectors.extend(data.into_iter().map(|e| e.embedding));
        }

        Ok(vectors)
    }
}
