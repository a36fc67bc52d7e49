// NL-to-SQL Service
//
// Orchestrates one request: resolve schema -> prior-analysis lookup ->
// table selection -> example retrieval -> complexity classification ->
// generation -> validation. Stages run in order; the model and embedding
// calls are the only suspension points. The whole chain is bounded by a
// timeout and dropping the future abandons the request.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Nl2SqlError, Result};
use crate::models::{
    GeneratedQuery, NaturalLanguageQueryRequest, PipelineNotice, PriorAnalysis, Schema,
    ValidateSqlResponse,
};
use crate::services::analysis_store::{generate_key, AnalysisStore, InMemoryAnalysisStore};
use crate::services::complexity_classifier::ComplexityClassifier;
use crate::services::example_retriever::{ExampleRetriever, DEFAULT_TOP_N};
use crate::services::llm_service::LanguageModel;
use crate::services::schema_store::SchemaStore;
use crate::services::sql_generator::{ensure_context, SqlGenerator};
use crate::services::table_selector::TableSelector;
use crate::validation::SqlValidator;

pub const DEFAULT_TABLE_TOP_N: usize = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct Nl2SqlService {
    schema_store: SchemaStore,
    table_selector: Arc<dyn TableSelector>,
    retriever: ExampleRetriever,
    classifier: ComplexityClassifier,
    generator: SqlGenerator,
    validator: SqlValidator,
    store: Arc<dyn AnalysisStore>,
    table_top_n: usize,
    examples_top_n: usize,
    timeout: Duration,
}

impl Nl2SqlService {
    pub fn new(
        schema_store: SchemaStore,
        table_selector: Arc<dyn TableSelector>,
        retriever: ExampleRetriever,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            schema_store,
            table_selector,
            retriever,
            classifier: ComplexityClassifier::new(llm.clone()),
            generator: SqlGenerator::new(llm),
            validator: SqlValidator::default(),
            store: Arc::new(InMemoryAnalysisStore::new(1000, 86400)),
            table_top_n: DEFAULT_TABLE_TOP_N,
            examples_top_n: DEFAULT_TOP_N,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_complex_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.generator = self.generator.with_complex_model(llm);
        self
    }

    pub fn with_validator(mut self, validator: SqlValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_limits(mut self, table_top_n: usize, examples_top_n: usize) -> Self {
        self.table_top_n = table_top_n;
        self.examples_top_n = examples_top_n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn schema_store(&self) -> &SchemaStore {
        &self.schema_store
    }

    pub fn store(&self) -> Arc<dyn AnalysisStore> {
        self.store.clone()
    }

    /// Generate SQL for a natural-language question
    pub async fn run(&self, request: &NaturalLanguageQueryRequest) -> Result<GeneratedQuery> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Nl2SqlError::InvalidRequest(
                "Question cannot be empty".to_string(),
            ));
        }

        let stages = self.run_stages(
            question,
            request.schema.as_deref(),
            request.session_id.clone(),
        );

        match tokio::time::timeout(self.timeout, stages).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "Pipeline timed out after {:?} for question: {}",
                    self.timeout,
                    question
                );
                Err(Nl2SqlError::Timeout(self.timeout))
            }
        }
    }

    async fn run_stages(
        &self,
        question: &str,
        user_schema: Option<&str>,
        session_id: Option<String>,
    ) -> Result<GeneratedQuery> {
        let mut notices = Vec::new();

        let (schema, schema_notice) = self.schema_store.resolve(user_schema);
        notices.extend(schema_notice);

        let query_key = generate_key(&schema.fingerprint(), question);
        if let Some(mut prior) = self.lookup_prior(&query_key).await {
            tracing::info!("Reusing prior analysis for key: {}", query_key);
            prior.notices.extend(notices);
            return Ok(prior);
        }

        let selection = self
            .table_selector
            .select_relevant_tables(question, &schema, self.table_top_n)
            .await?;
        if selection.fell_back {
            notices.push(PipelineNotice::TableSelectionEmpty);
        }
        tracing::info!("Selected tables: {:?}", selection.tables);
        let mut narrowed = schema.restrict_to(&selection.tables);
        let dropped = narrowed.drop_columnless_tables();
        if !dropped.is_empty() {
            tracing::warn!("Leaving tables without known columns out of generation: {:?}", dropped);
            if narrowed.is_empty() {
                return Err(Nl2SqlError::MissingContext(format!(
                    "no selected table has known columns ({})",
                    dropped.join(", ")
                )));
            }
        }

        let examples = self
            .retriever
            .retrieve_examples(question, self.examples_top_n)
            .await?;

        // Fail before the classifier spends a model call
        ensure_context(&narrowed, &examples)?;

        let classification = self.classifier.classify(question, &examples).await;
        if let Some(response) = classification.ambiguous_response {
            notices.push(PipelineNotice::ClassificationAmbiguous { response });
        }

        let sql = self
            .generator
            .generate(classification.complexity, question, &narrowed, &examples)
            .await?;

        let mut query = GeneratedQuery::new(
            question.to_string(),
            sql,
            classification.complexity,
            narrowed.all_table_names(),
            query_key,
        );
        query.notices = notices;

        match self.validator.check(&query.sql, &schema) {
            Ok(()) => {
                query.mark_valid();
                self.remember(&query, session_id).await;
            }
            Err(failure) => {
                tracing::warn!("Generated SQL failed validation: {}", failure);
                query.mark_invalid(failure.to_string());
            }
        }

        if query.is_degraded() {
            tracing::warn!(
                "Answered with {} degradation notice(s): {:?}",
                query.notices.len(),
                query.notices
            );
        }

        Ok(query)
    }

    /// Store failures degrade to a cache miss
    async fn lookup_prior(&self, query_key: &str) -> Option<GeneratedQuery> {
        let prior = match self.store.get(query_key).await {
            Ok(prior) => prior.map(|p| p.to_generated()),
            Err(e) => {
                tracing::warn!("Analysis store lookup failed: {}", e);
                None
            }
        };

        if let Some(stats) = self.store.stats() {
            tracing::debug!(
                "Analysis cache: {} entries, hit ratio {:.2} ({} hits, {} misses, {} evictions)",
                stats.entries,
                stats.hit_ratio(),
                stats.hits,
                stats.misses,
                stats.evictions
            );
        }
        prior
    }

    /// Unexpired analyses recorded for a session, newest first
    pub async fn session_analyses(&self, session_id: &str) -> Result<Vec<PriorAnalysis>> {
        self.store.session_analyses(session_id).await
    }

    async fn remember(&self, query: &GeneratedQuery, session_id: Option<String>) {
        let analysis = PriorAnalysis::from_generated(query, session_id);
        if let Err(e) = self.store.put(&query.query_key, analysis).await {
            tracing::warn!("Failed to store analysis {}: {}", query.query_key, e);
        }
    }

    /// Validate caller-supplied SQL against the default or a supplied schema
    pub fn validate(&self, sql: &str, user_schema: Option<&str>) -> ValidateSqlResponse {
        let (schema, _) = self.schema_store.resolve(user_schema);
        self.validate_against(sql, &schema)
    }

    pub fn validate_against(&self, sql: &str, schema: &Schema) -> ValidateSqlResponse {
        match self.validator.check(sql, schema) {
            Ok(()) => ValidateSqlResponse {
                is_valid: true,
                reason: None,
            },
            Err(failure) => ValidateSqlResponse {
                is_valid: false,
                reason: Some(failure.to_string()),
            },
        }
    }
}
