use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AppError;
use crate::services::embedding::Embedder;

/// Immutable nearest-neighbor index over the proper-noun candidate pool.
/// Built once per session; lookups never mutate it, so it is shared freely
/// behind an `Arc`. The pool is small (a few thousand strings at most for
/// the demo schema), so brute-force cosine scan is the whole algorithm.
pub struct MatchIndex {
    entries: Vec<(String, Vec<f32>)>,
    embedder: Arc<dyn Embedder>,
}

impl MatchIndex {
    /// Embed the candidate pool and build the index. Duplicate candidates
    /// are collapsed before embedding. An empty pool yields a valid index
    /// that answers every search with no matches.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        candidates: &[String],
    ) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = candidates
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        if unique.is_empty() {
            warn!("Building match index over an empty candidate pool");
            return Ok(Self {
                entries: Vec::new(),
                embedder,
            });
        }

        let vectors = embedder
            .embed_batch(&unique)
            .await
            .map_err(|e| AppError::IndexBuild(e.to_string()))?;

        info!("Built match index over {} candidates", unique.len());
        Ok(Self {
            entries: unique.into_iter().zip(vectors).collect(),
            embedder,
        })
    }

    /// Degenerate index used when construction fails and the deployment
    /// policy is to keep the session alive without proper-noun lookup.
    pub fn empty(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            entries: Vec::new(),
            embedder,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `k` stored candidates, most similar to the query first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, AppError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::Lookup(e.to_string()))?;

        let mut scored: Vec<(f32, &String)> = self
            .entries
            .iter()
            .map(|(text, vector)| (cosine_similarity(&query_vector, vector), text))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, text)| text.clone())
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
