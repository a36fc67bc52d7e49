use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use nl2sql_backend::api;
use nl2sql_backend::config::{Config, LoggingConfig};
use nl2sql_backend::models::load_examples;
use nl2sql_backend::services::{
    AnalysisStore, EmbeddingProvider, EmbeddingTableSelector, ExampleRetriever, GatewayEmbedder,
    GatewayLlm, InMemoryAnalysisStore, KeywordTableSelector, Nl2SqlService, SchemaStore,
    TableSelectionStrategy, TableSelector,
};
use nl2sql_backend::storage::SqliteAnalysisStore;
use nl2sql_backend::validation::SqlValidator;

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let ansi = match logging.style.as_str() {
        "always" => true,
        "never" => false,
        _ => std::io::IsTerminal::is_terminal(&std::io::stdout()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .init();
}

async fn build_store(config: &Config) -> Result<Arc<dyn AnalysisStore>, Box<dyn std::error::Error>> {
    match config.cache.backend.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(InMemoryAnalysisStore::new(
            config.cache.max_entries,
            config.cache.ttl_secs,
        ))),
        "sqlite" => {
            let store = SqliteAnalysisStore::new(&config.database.url, config.cache.ttl_secs)
                .await
                .map_err(|e| {
                    error!("Failed to initialize database: {}", e);
                    e
                })?;
            store.purge_expired().await?;
            Ok(Arc::new(store))
        }
        other => Err(format!("Unsupported cache backend: {}", other).into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    init_tracing(&config.logging);

    let schema_store = SchemaStore::from_path(&config.pipeline.schema_path).map_err(|e| {
        error!("Failed to load default schema: {}", e);
        e
    })?;

    let examples = load_examples(&config.pipeline.examples_path).unwrap_or_else(|e| {
        warn!("{}. Starting with an empty example corpus.", e);
        Vec::new()
    });

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(GatewayEmbedder::new(&config.embedding)?);
    let llm = Arc::new(GatewayLlm::new(&config.llm)?);
    let complex_llm = Arc::new(GatewayLlm::with_model(&config.llm, &config.llm.complex_model)?);
    info!(
        "Using model {} for simple queries and {} for complex queries",
        llm.model(),
        complex_llm.model()
    );

    let table_selector: Arc<dyn TableSelector> =
        match TableSelectionStrategy::from_str(&config.pipeline.table_strategy)? {
            TableSelectionStrategy::Embedding => {
                Arc::new(EmbeddingTableSelector::new(embedder.clone()))
            }
            TableSelectionStrategy::Keyword => Arc::new(KeywordTableSelector::new()),
        };

    let retriever = ExampleRetriever::new(
        examples,
        embedder,
        Some(PathBuf::from(&config.pipeline.example_index_path)),
    );

    let validator = SqlValidator::for_dialect(&config.pipeline.sql_dialect)?;
    let dialect = validator.dialect_name().to_string();

    let service = Nl2SqlService::new(schema_store, table_selector, retriever, llm)
        .with_complex_model(complex_llm)
        .with_validator(validator)
        .with_store(build_store(&config).await?)
        .with_limits(config.pipeline.table_top_n, config.pipeline.examples_top_n)
        .with_timeout(Duration::from_secs(config.pipeline.timeout_secs));

    info!(
        "Pipeline ready (table strategy: {}, dialect: {}, cache: {})",
        config.pipeline.table_strategy, dialect, config.cache.backend
    );

    // Create router with state
    let app: Router = api::routes::create_router_with_state(Arc::new(service));

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
