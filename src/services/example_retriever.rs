// Example Retriever
//
// Similarity search over the few-shot example corpus. The vector index is
// loaded from disk when present, otherwise built from the corpus and
// persisted. Construction happens once; concurrent first requests wait on a
// build lock and re-check before building.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::models::Example;
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::vector_index::VectorIndex;

pub const DEFAULT_TOP_N: usize = 5;

pub struct ExampleRetriever {
    corpus: Arc<Vec<Example>>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_path: Option<PathBuf>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    build_lock: Mutex<()>,
}

impl ExampleRetriever {
    /// `index_path` of `None` keeps the index in memory only
    pub fn new(
        corpus: Vec<Example>,
        embedder: Arc<dyn EmbeddingProvider>,
        index_path: Option<PathBuf>,
    ) -> Self {
        Self {
            corpus: Arc::new(corpus),
            embedder,
            index_path,
            index: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn corpus(&self) -> &[Example] {
        &self.corpus
    }

    /// Up to `top_n` examples nearest to the question, nearest first
    pub async fn retrieve_examples(&self, query: &str, top_n: usize) -> Result<Vec<Example>> {
        if top_n == 0 || self.corpus.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.index().await?;
        let query_vector = self.embedder.embed(query).await?;
        let neighbors = index.search(&query_vector, top_n)?;

        let examples: Vec<Example> = neighbors
            .into_iter()
            .filter_map(|n| self.corpus.get(n.id).cloned())
            .take(top_n)
            .collect();

        tracing::info!("Retrieved {} examples.", examples.len());
        Ok(examples)
    }

    /// The example index, loading or building it on first use
    pub async fn index(&self) -> Result<Arc<VectorIndex>> {
        if let Some(index) = self.index.read().await.as_ref() {
            return Ok(index.clone());
        }

        let _guard = self.build_lock.lock().await;
        if let Some(index) = self.index.read().await.as_ref() {
            return Ok(index.clone());
        }

        let index = Arc::new(self.load_or_build().await?);
        *self.index.write().await = Some(index.clone());
        Ok(index)
    }

    async fn load_or_build(&self) -> Result<VectorIndex> {
        if let Some(path) = self.index_path.as_ref().filter(|p| p.exists()) {
            let index = VectorIndex::load(path)?;
            if index.len() != self.corpus.len() {
                tracing::warn!(
                    "Example index at {} has {} entries but the corpus has {}",
                    path.display(),
                    index.len(),
                    self.corpus.len()
                );
            }
            tracing::info!("Example index loaded from {}.", path.display());
            return Ok(index);
        }

        let index = self.build().await?;
        if let Some(path) = &self.index_path {
            index.save(path)?;
            tracing::info!("Example index created and saved to {}.", path.display());
        } else {
            tracing::info!("Example index created in memory.");
        }
        Ok(index)
    }

    async fn build(&self) -> Result<VectorIndex> {
        let mut index: Option<VectorIndex> = None;
        for example in self.corpus.iter() {
            let vector = self.embedder.embed(&example.nl_query).await?;
            let target = index.get_or_insert_with(|| VectorIndex::new(vector.len()));
            target.add(vector)?;
        }
        Ok(index.unwrap_or_else(|| VectorIndex::new(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Nl2SqlError;
    use crate::services::testing::{FailingEmbedder, KeywordEmbedder};

    fn corpus() -> Vec<Example> {
        vec![
            Example::new("How many users signed up", "SELECT COUNT(*) FROM users"),
            Example::new("Total order amount", "SELECT SUM(amount) FROM orders"),
            Example::new("Sessions per page", "SELECT page, COUNT(*) FROM sessions GROUP BY page"),
        ]
    }

    fn embedder() -> Arc<KeywordEmbedder> {
        Arc::new(KeywordEmbedder::new(&["users", "order", "sessions", "page"]))
    }

    #[tokio::test]
    async fn test_retrieves_nearest_first() {
        let retriever = ExampleRetriever::new(corpus(), embedder(), None);
        let examples = retriever.retrieve_examples("orders by amount", 2).await.unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].sql, "SELECT SUM(amount) FROM orders");
    }

    #[tokio::test]
    async fn test_never_returns_more_than_top_n() {
        let retriever = ExampleRetriever::new(corpus(), embedder(), None);
        for top_n in 0..6 {
            let examples = retriever.retrieve_examples("users", top_n).await.unwrap();
            assert!(examples.len() <= top_n);
            assert!(examples.len() <= 3);
        }
    }

    #[tokio::test]
    async fn test_out_of_bounds_index_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examples.json");

        // Persisted index built from a larger corpus than the one loaded now
        let embedder = embedder();
        let mut stale = VectorIndex::new(5);
        for text in ["users", "order", "sessions", "page page", "users users users"] {
            stale.add(embedder.embed(text).await.unwrap()).unwrap();
        }
        stale.save(&path).unwrap();

        let retriever = ExampleRetriever::new(corpus()[..2].to_vec(), embedder, Some(path));
        let examples = retriever.retrieve_examples("users", 5).await.unwrap();
        assert_eq!(examples.len(), 2);
    }

    #[tokio::test]
    async fn test_index_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag").join("examples.json");

        let first = embedder();
        let retriever = ExampleRetriever::new(corpus(), first.clone(), Some(path.clone()));
        retriever.retrieve_examples("users", 1).await.unwrap();
        assert!(path.exists());
        // 3 corpus entries + 1 query
        assert_eq!(first.calls(), 4);

        let second = embedder();
        let retriever = ExampleRetriever::new(corpus(), second.clone(), Some(path));
        retriever.retrieve_examples("users", 1).await.unwrap();
        // Loaded from disk: only the query is embedded
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_build_once() {
        let embedder = embedder();
        let retriever = Arc::new(ExampleRetriever::new(corpus(), embedder.clone(), None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let retriever = retriever.clone();
                tokio::spawn(async move { retriever.retrieve_examples("users", 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 3 corpus embeddings once, plus one embedding per request
        assert_eq!(embedder.calls(), 3 + 8);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let retriever = ExampleRetriever::new(corpus(), Arc::new(FailingEmbedder), None);
        let err = retriever.retrieve_examples("users", 5).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::EmbeddingUnavailable(_)));
    }
}
