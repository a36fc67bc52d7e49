// Table Selector
//
// Narrows a schema to the tables relevant to a question. Two strategies:
// embedding similarity over table documents, and case-insensitive keyword
// matching that needs no external service.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Nl2SqlError, Result};
use crate::models::Schema;
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::vector_index::l2_distance_squared;

/// Outcome of table selection
#[derive(Debug, Clone, PartialEq)]
pub struct TableSelection {
    pub tables: BTreeSet<String>,
    /// True when nothing matched and the full table set was used instead
    pub fell_back: bool,
}

impl TableSelection {
    fn all(schema: &Schema) -> Self {
        Self {
            tables: schema.all_table_names(),
            fell_back: false,
        }
    }
}

#[async_trait]
pub trait TableSelector: Send + Sync {
    async fn select_relevant_tables(
        &self,
        query: &str,
        schema: &Schema,
        top_n: usize,
    ) -> Result<TableSelection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSelectionStrategy {
    Embedding,
    Keyword,
}

impl FromStr for TableSelectionStrategy {
    type Err = Nl2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "embedding" | "vector" => Ok(TableSelectionStrategy::Embedding),
            "keyword" => Ok(TableSelectionStrategy::Keyword),
            _ => Err(Nl2SqlError::Internal(format!(
                "Unsupported table selection strategy: {}",
                s
            ))),
        }
    }
}

/// Selects the `top_n` tables whose embedded name/description lies closest
/// to the embedded question.
pub struct EmbeddingTableSelector {
    embedder: Arc<dyn EmbeddingProvider>,
    /// Table document -> embedding, filled on first use
    table_embeddings: RwLock<HashMap<String, Arc<Vec<f32>>>>,
}

impl EmbeddingTableSelector {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            table_embeddings: RwLock::new(HashMap::new()),
        }
    }

    async fn table_embedding(&self, document: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(found) = self.table_embeddings.read().await.get(document) {
            return Ok(found.clone());
        }

        let vector = Arc::new(self.embedder.embed(document).await?);
        let mut cache = self.table_embeddings.write().await;
        let entry = cache.entry(document.to_string()).or_insert(vector);
        Ok(entry.clone())
    }
}

#[async_trait]
impl TableSelector for EmbeddingTableSelector {
    async fn select_relevant_tables(
        &self,
        query: &str,
        schema: &Schema,
        top_n: usize,
    ) -> Result<TableSelection> {
        if query.trim().is_empty() || top_n == 0 || top_n >= schema.len() {
            return Ok(TableSelection::all(schema));
        }

        let query_vector = self.embedder.embed(query).await?;

        let mut scored = Vec::with_capacity(schema.len());
        for table in schema.tables() {
            let vector = self.table_embedding(&table.embedding_document()).await?;
            if vector.len() != query_vector.len() {
                return Err(Nl2SqlError::VectorIndex(format!(
                    "Embedding for table {} has dimension {}, query has {}",
                    table.name,
                    vector.len(),
                    query_vector.len()
                )));
            }
            scored.push((table.name.as_str(), l2_distance_squared(&query_vector, &vector)));
        }

        // Stable sort: equal distances keep declaration order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        let tables: BTreeSet<String> = scored
            .into_iter()
            .take(top_n)
            .map(|(name, _)| name.to_string())
            .collect();

        tracing::info!("Selected tables by embedding similarity: {:?}", tables);
        Ok(TableSelection {
            tables,
            fell_back: false,
        })
    }
}

/// Selects tables whose name, description or any column name occurs in the
/// question. Falls back to every table when nothing matches.
#[derive(Debug, Default)]
pub struct KeywordTableSelector;

impl KeywordTableSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TableSelector for KeywordTableSelector {
    async fn select_relevant_tables(
        &self,
        query: &str,
        schema: &Schema,
        _top_n: usize,
    ) -> Result<TableSelection> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Ok(TableSelection::all(schema));
        }

        let contains = |needle: &str| {
            let needle = needle.trim().to_lowercase();
            !needle.is_empty() && query_lower.contains(&needle)
        };

        let tables: BTreeSet<String> = schema
            .tables()
            .iter()
            .filter(|table| {
                contains(&table.name)
                    || table.description.as_deref().is_some_and(contains)
                    || table.column_names().any(contains)
            })
            .map(|table| table.name.clone())
            .collect();

        if tables.is_empty() {
            tracing::warn!("No table matched the question by keyword; using the full schema");
            return Ok(TableSelection {
                tables: schema.all_table_names(),
                fell_back: true,
            });
        }

        tracing::info!("Selected tables by keyword: {:?}", tables);
        Ok(TableSelection {
            tables,
            fell_back: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, SchemaFormat, Table};
    use crate::services::testing::{FailingEmbedder, KeywordEmbedder};

    fn schema() -> Schema {
        let mut sessions = Table::new("sessions", vec![Column::named("session_id")]);
        sessions.description = Some("Website visits".to_string());
        Schema::with_tables(
            SchemaFormat::Document,
            vec![
                Table::new("users", vec![Column::named("id"), Column::named("email")]),
                Table::new("orders", vec![Column::named("id"), Column::named("amount")]),
                sessions,
            ],
        )
    }

    fn names(selection: &TableSelection) -> Vec<&str> {
        selection.tables.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_keyword_matches_name_column_and_description() {
        let selector = KeywordTableSelector::new();
        let schema = schema();

        let selection = selector
            .select_relevant_tables("How many USERS signed up?", &schema, 3)
            .await
            .unwrap();
        assert_eq!(names(&selection), vec!["users"]);

        let selection = selector
            .select_relevant_tables("total amount last week", &schema, 3)
            .await
            .unwrap();
        assert_eq!(names(&selection), vec!["orders"]);

        let selection = selector
            .select_relevant_tables("website visits per day", &schema, 3)
            .await
            .unwrap();
        assert_eq!(names(&selection), vec!["sessions"]);
    }

    #[tokio::test]
    async fn test_keyword_fails_open_when_nothing_matches() {
        let selector = KeywordTableSelector::new();
        let selection = selector
            .select_relevant_tables("what is the weather", &schema(), 3)
            .await
            .unwrap();
        assert!(selection.fell_back);
        assert_eq!(selection.tables.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_query_returns_all_tables() {
        let schema = schema();
        let keyword = KeywordTableSelector::new();
        let embedding = EmbeddingTableSelector::new(Arc::new(FailingEmbedder));

        for selector in [&keyword as &dyn TableSelector, &embedding as &dyn TableSelector] {
            let selection = selector.select_relevant_tables("", &schema, 1).await.unwrap();
            assert_eq!(selection.tables, schema.all_table_names());
            assert!(!selection.fell_back);
        }
    }

    #[tokio::test]
    async fn test_embedding_selects_closest_tables() {
        let embedder = Arc::new(KeywordEmbedder::new(&["users", "orders", "sessions"]));
        let selector = EmbeddingTableSelector::new(embedder.clone());

        let selection = selector
            .select_relevant_tables("list the orders", &schema(), 1)
            .await
            .unwrap();
        assert_eq!(names(&selection), vec!["orders"]);

        // Table documents are embedded once and reused
        let calls_after_first = embedder.calls();
        selector
            .select_relevant_tables("list the users", &schema(), 1)
            .await
            .unwrap();
        assert_eq!(embedder.calls(), calls_after_first + 1);
    }

    #[tokio::test]
    async fn test_embedding_ties_follow_declaration_order() {
        let embedder = Arc::new(KeywordEmbedder::new(&["unrelated"]));
        let selector = EmbeddingTableSelector::new(embedder);

        let selection = selector
            .select_relevant_tables("anything", &schema(), 2)
            .await
            .unwrap();
        assert_eq!(names(&selection), vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let selector = EmbeddingTableSelector::new(Arc::new(FailingEmbedder));
        let err = selector
            .select_relevant_tables("list the orders", &schema(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Nl2SqlError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "Embedding".parse::<TableSelectionStrategy>().unwrap(),
            TableSelectionStrategy::Embedding
        );
        assert_eq!(
            "keyword".parse::<TableSelectionStrategy>().unwrap(),
            TableSelectionStrategy::Keyword
        );
        assert!("random".parse::<TableSelectionStrategy>().is_err());
    }
}
