use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::example::Complexity;

/// A degradation the pipeline recovered from while still answering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineNotice {
    /// The classifier did not return a recognised token; SIMPLE was used
    ClassificationAmbiguous { response: String },
    /// No table matched the question; the full schema was used
    TableSelectionEmpty,
    /// User-supplied schema could not be parsed; the default schema was used
    UserSchemaRejected { reason: String },
    /// Generated SQL failed validation
    ValidationFailed { reason: String },
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub id: String,
    pub question: String,
    pub sql: String,
    pub complexity: Complexity,
    pub is_valid: bool,
    pub selected_tables: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<PipelineNotice>,
    pub query_key: String,
    pub from_cache: bool,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedQuery {
    pub fn new(
        question: String,
        sql: String,
        complexity: Complexity,
        selected_tables: BTreeSet<String>,
        query_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question,
            sql,
            complexity,
            is_valid: false,
            selected_tables,
            notices: Vec::new(),
            query_key,
            from_cache: false,
            generated_at: Utc::now(),
        }
    }

    pub fn mark_valid(&mut self) {
        self.is_valid = true;
    }

    pub fn mark_invalid(&mut self, reason: String) {
        self.is_valid = false;
        self.notices.push(PipelineNotice::ValidationFailed { reason });
    }

    pub fn is_degraded(&self) -> bool {
        !self.notices.is_empty()
    }
}

/// Previously generated SQL kept for exact-match reuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorAnalysis {
    pub query_key: String,
    pub question: String,
    pub sql: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub selected_tables: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub stored_at: DateTime<Utc>,
}

impl PriorAnalysis {
    /// Rebuild a result from a stored analysis. Only valid SQL is stored.
    pub fn to_generated(&self) -> GeneratedQuery {
        let mut query = GeneratedQuery::new(
            self.question.clone(),
            self.sql.clone(),
            self.complexity,
            self.selected_tables.clone(),
            self.query_key.clone(),
        );
        query.mark_valid();
        query.from_cache = true;
        query
    }

    pub fn from_generated(query: &GeneratedQuery, session_id: Option<String>) -> Self {
        Self {
            query_key: query.query_key.clone(),
            question: query.question.clone(),
            sql: query.sql.clone(),
            complexity: query.complexity,
            selected_tables: query.selected_tables.clone(),
            session_id,
            stored_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NaturalLanguageQueryRequest {
    pub question: String,
    /// Optional user-supplied JSON schema overriding the default schema
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateSqlRequest {
    pub sql: String,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateSqlResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_invalid_records_notice() {
        let mut query = GeneratedQuery::new(
            "Get all users".to_string(),
            "SELECT * FROM ghost".to_string(),
            Complexity::Simple,
            BTreeSet::new(),
            "key".to_string(),
        );
        assert!(!query.is_degraded());

        query.mark_invalid("unknown table ghost".to_string());
        assert!(!query.is_valid);
        assert!(query.is_degraded());
        assert_eq!(
            query.notices,
            vec![PipelineNotice::ValidationFailed {
                reason: "unknown table ghost".to_string()
            }]
        );
    }

    #[test]
    fn test_prior_analysis_round_trip_marks_cache_hit() {
        let mut query = GeneratedQuery::new(
            "Get all users".to_string(),
            "SELECT * FROM users".to_string(),
            Complexity::Complex,
            BTreeSet::from(["users".to_string()]),
            "key".to_string(),
        );
        query.mark_valid();

        let prior = PriorAnalysis::from_generated(&query, Some("s-1".to_string()));
        let reused = prior.to_generated();
        assert!(reused.from_cache);
        assert!(reused.is_valid);
        assert_eq!(reused.sql, query.sql);
        assert_eq!(reused.complexity, Complexity::Complex);
        assert_eq!(reused.selected_tables, query.selected_tables);
        assert_ne!(reused.id, query.id);
    }

    #[test]
    fn test_notice_serialization_is_tagged() {
        let notice = PipelineNotice::ClassificationAmbiguous {
            response: "maybe".to_string(),
        };
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["kind"], "classification_ambiguous");
        assert_eq!(value["response"], "maybe");
    }
}
