use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Nl2SqlError, Result};

/// Structural complexity label used to route generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[serde(alias = "SIMPLE", alias = "Simple")]
    Simple,
    #[serde(alias = "COMPLEX", alias = "Complex")]
    Complex,
}

impl Complexity {
    /// Token the classifier model is asked to return
    pub fn token(&self) -> &'static str {
        match self {
            Complexity::Simple => "SIMPLE",
            Complexity::Complex => "COMPLEX",
        }
    }

    /// Parse a classifier token. Anything other than exactly one of the two
    /// tokens is rejected.
    pub fn from_token(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim_end_matches('.')
            .trim();
        match cleaned.to_uppercase().as_str() {
            "SIMPLE" => Some(Complexity::Simple),
            "COMPLEX" => Some(Complexity::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Few-shot example: a natural-language question and its SQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub nl_query: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

impl Example {
    pub fn new(nl_query: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            nl_query: nl_query.into(),
            sql: sql.into(),
            complexity: None,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }
}

/// Load the example corpus from a JSON array file
pub fn load_examples<P: AsRef<Path>>(path: P) -> Result<Vec<Example>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        Nl2SqlError::Internal(format!(
            "Failed to read example corpus {}: {}",
            path.display(),
            e
        ))
    })?;
    let examples: Vec<Example> = serde_json::from_str(&text).map_err(|e| {
        Nl2SqlError::Internal(format!(
            "Failed to parse example corpus {}: {}",
            path.display(),
            e
        ))
    })?;
    tracing::info!("Loaded {} examples from {}", examples.len(), path.display());
    Ok(examples)
}
