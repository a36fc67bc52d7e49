use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Empty means no gateway is configured
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Model used for the complex generation path
    pub complex_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// DDL or JSON file holding the default schema
    pub schema_path: String,
    pub examples_path: String,
    pub example_index_path: String,
    pub examples_top_n: usize,
    pub table_top_n: usize,
    /// `embedding` or `keyword`
    pub table_strategy: String,
    pub sql_dialect: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// `memory` or `sqlite`
    pub backend: String,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file before reading overrides
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./nl2sql.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.model", "gpt-4o")?
            .set_default("llm.complex_model", "gpt-4")?
            .set_default("llm.max_tokens", 1000)?
            .set_default("llm.temperature", 0.0)?
            .set_default("llm.timeout_secs", 30)?
            .set_default("embedding.url", "")?
            .set_default("embedding.model", "text-embedding-ada-002")?
            .set_default("embedding.timeout_secs", 30)?
            .set_default("pipeline.schema_path", "./config/schema.json")?
            .set_default("pipeline.examples_path", "./examples.json")?
            .set_default("pipeline.example_index_path", "./rag/example_index.json")?
            .set_default("pipeline.examples_top_n", 5)?
            .set_default("pipeline.table_top_n", 3)?
            .set_default("pipeline.table_strategy", "embedding")?
            .set_default("pipeline.sql_dialect", "generic")?
            .set_default("pipeline.timeout_secs", 60)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.max_entries", 1000)?
            .set_default("cache.ttl_secs", 86400)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        for (var, key) in [
            ("LLM_MODEL", "llm.model"),
            ("LLM_COMPLEX_MODEL", "llm.complex_model"),
            ("EMBEDDING_URL", "embedding.url"),
            ("EMBEDDING_MODEL", "embedding.model"),
            ("SCHEMA_PATH", "pipeline.schema_path"),
            ("EXAMPLES_PATH", "pipeline.examples_path"),
            ("EXAMPLE_INDEX_PATH", "pipeline.example_index_path"),
            ("TABLE_STRATEGY", "pipeline.table_strategy"),
            ("SQL_DIALECT", "pipeline.sql_dialect"),
            ("CACHE_BACKEND", "cache.backend"),
        ] {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(api_key) = env::var("EMBEDDING_API_KEY") {
            builder = builder.set_override("embedding.api_key", Some(api_key))?;
        }

        for (var, key) in [
            ("LLM_TIMEOUT_SECS", "llm.timeout_secs"),
            ("PIPELINE_TIMEOUT_SECS", "pipeline.timeout_secs"),
            ("EXAMPLES_TOP_N", "pipeline.examples_top_n"),
            ("TABLE_TOP_N", "pipeline.table_top_n"),
            ("CACHE_MAX_ENTRIES", "cache.max_entries"),
            ("CACHE_TTL_SECS", "cache.ttl_secs"),
        ] {
            // Unparseable values keep the default
            if let Some(value) = env::var(var).ok().and_then(|v| v.parse::<u64>().ok()) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
