use std::sync::Arc;

use crate::models::{Complexity, Example};
use crate::services::llm_service::LanguageModel;

/// Classifier verdict. `ambiguous_response` holds the raw model output when
/// it was not a recognised token and SIMPLE was used instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub complexity: Complexity,
    pub ambiguous_response: Option<String>,
}

/// Routes questions between the simple and complex generators using a
/// single model call with a fixed rubric.
pub struct ComplexityClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl ComplexityClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(query: &str, examples: &[Example]) -> String {
        let formatted_examples = examples
            .iter()
            .filter_map(|ex| {
                ex.complexity
                    .map(|label| format!("- Query: \"{}\" -> {}", ex.nl_query, label.token()))
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are a query classifier that determines whether a natural language query should be classified as SIMPLE or COMPLEX for SQL generation.

Classification criteria:
- SIMPLE: Basic queries involving straightforward filtering, counting, or aggregation on one or two tables with simple conditions
- COMPLEX: Queries requiring CTEs, multiple subqueries, window functions, joins across more than two tables, recursive structures, or other advanced analytical operations

Example classifications:
{formatted_examples}

Query to classify: "{query}"

Respond with exactly one word: either SIMPLE or COMPLEX"#,
            formatted_examples = formatted_examples,
            query = query,
        )
    }

    /// Classify a question. Never fails: unrecognised output or a failed
    /// model call yields SIMPLE.
    pub async fn classify(&self, query: &str, examples: &[Example]) -> Classification {
        let prompt = Self::build_prompt(query, examples);

        let response = match self.llm.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Error classifying query ({}). Defaulting to SIMPLE.", e);
                return Classification {
                    complexity: Complexity::Simple,
                    ambiguous_response: Some(e.to_string()),
                };
            }
        };

        match Complexity::from_token(&response) {
            Some(complexity) => {
                tracing::info!("Query classified as: {}", complexity);
                Classification {
                    complexity,
                    ambiguous_response: None,
                }
            }
            None => {
                tracing::warn!(
                    "Invalid classification result: {:?}. Defaulting to SIMPLE.",
                    response.trim()
                );
                Classification {
                    complexity: Complexity::Simple,
                    ambiguous_response: Some(response.trim().to_string()),
                }
            }
        }
    }

    pub async fn classify_query_complexity(&self, query: &str, examples: &[Example]) -> Complexity {
        self.classify(query, examples).await.complexity
    }
}
