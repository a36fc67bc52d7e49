// SQL Generator
//
// Two generation strategies sharing one prompt layout: a simple path for
// single/two-table questions and a complex path that steers the model
// towards CTEs and window functions. Each makes exactly one completion call.

use std::sync::Arc;

use crate::error::{Nl2SqlError, Result};
use crate::models::{Complexity, Example, Schema};
use crate::services::llm_service::{clean_sql, LanguageModel};

const FORMATTING_RULES: &str = r#"Format the SQL query according to industry standard best practices:
- Use uppercase for SQL keywords (SELECT, FROM, WHERE, GROUP BY, ...)
- Put each clause on its own line and indent its contents consistently
- Use the exact table and column names from the schema
- Generate a single read-only SELECT statement
- Return ONLY the SQL query, without explanations or markdown formatting"#;

const COMPLEX_RULES: &str = r#"For complex queries, you should:
1. Use Common Table Expressions (CTEs) instead of nested subqueries to break the logic into named steps
2. Use window functions for rankings, running totals and other running aggregates
3. Use recursive CTEs for hierarchical data when needed
4. Filter as early as possible in the query pipeline to limit the data carried forward
5. Add short SQL comments explaining non-obvious logic blocks"#;

pub struct SqlGenerator {
    simple_llm: Arc<dyn LanguageModel>,
    complex_llm: Arc<dyn LanguageModel>,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            simple_llm: llm.clone(),
            complex_llm: llm,
        }
    }

    /// Use a different (usually stronger) model for the complex path
    pub fn with_complex_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.complex_llm = llm;
        self
    }

    pub async fn generate(
        &self,
        complexity: Complexity,
        query: &str,
        schema: &Schema,
        examples: &[Example],
    ) -> Result<String> {
        match complexity {
            Complexity::Simple => self.generate_sql(query, schema, examples).await,
            Complexity::Complex => self.generate_complex_sql(query, schema, examples).await,
        }
    }

    pub async fn generate_sql(
        &self,
        query: &str,
        schema: &Schema,
        examples: &[Example],
    ) -> Result<String> {
        ensure_context(schema, examples)?;
        let prompt = build_simple_prompt(query, schema, examples);
        tracing::debug!("Simple generation prompt:\n{}", prompt);

        let sql = clean_sql(&self.simple_llm.complete(&prompt).await?);
        tracing::info!("Generated SQL Query: {}", sql);
        Ok(sql)
    }

    pub async fn generate_complex_sql(
        &self,
        query: &str,
        schema: &Schema,
        examples: &[Example],
    ) -> Result<String> {
        ensure_context(schema, examples)?;
        let prompt = build_complex_prompt(query, schema, examples);
        tracing::debug!("Complex generation prompt:\n{}", prompt);

        let sql = clean_sql(&self.complex_llm.complete(&prompt).await?);
        tracing::info!("Generated Complex SQL Query: {}", sql);
        Ok(sql)
    }
}

/// Schema and examples must both be non-empty before any prompt is sent
pub fn ensure_context(schema: &Schema, examples: &[Example]) -> Result<()> {
    if schema.is_empty() {
        return Err(Nl2SqlError::MissingContext("schema is empty".to_string()));
    }
    if let Some(table) = schema.tables().iter().find(|t| t.columns.is_empty()) {
        return Err(Nl2SqlError::MissingContext(format!(
            "table {} has no known columns",
            table.name
        )));
    }
    if examples.is_empty() {
        return Err(Nl2SqlError::MissingContext("no examples were retrieved".to_string()));
    }
    Ok(())
}

fn format_schema(schema: &Schema) -> String {
    serde_json::to_string_pretty(&schema.to_prompt_value())
        .unwrap_or_else(|_| schema.table_names().collect::<Vec<_>>().join(", "))
}

fn format_examples<'a>(examples: impl IntoIterator<Item = &'a Example>) -> String {
    examples
        .into_iter()
        .enumerate()
        .map(|(i, ex)| format!("Example {}:\nNL Query: {}\nSQL Query: {}", i + 1, ex.nl_query, ex.sql))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_simple_prompt(query: &str, schema: &Schema, examples: &[Example]) -> String {
    format!(
        r#"You are an AI assistant that converts natural language queries into SQL statements.

{formatting}

Schema:
{schema}

Few-shot Examples:
{examples}

Natural Language Query:
{query}

SQL Query:"#,
        formatting = FORMATTING_RULES,
        schema = format_schema(schema),
        examples = format_examples(examples),
        query = query,
    )
}

/// Complex-labelled examples when there are any, otherwise the first two
pub fn complex_examples(examples: &[Example]) -> Vec<&Example> {
    let labelled: Vec<&Example> = examples
        .iter()
        .filter(|ex| ex.complexity == Some(Complexity::Complex))
        .collect();
    if labelled.is_empty() {
        examples.iter().take(2).collect()
    } else {
        labelled
    }
}

pub fn build_complex_prompt(query: &str, schema: &Schema, examples: &[Example]) -> String {
    format!(
        r#"You are an expert SQL developer specializing in writing optimized, complex analytical SQL queries. Your task is to convert natural language queries into advanced SQL.

{complex}

{formatting}

Schema:
{schema}

Complex Query Examples:
{examples}

Natural Language Query:
{query}

SQL Query:"#,
        complex = COMPLEX_RULES,
        formatting = FORMATTING_RULES,
        schema = format_schema(schema),
        examples = format_examples(complex_examples(examples)),
        query = query,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schema;
    use crate::services::testing::ScriptedLlm;

    fn users_schema() -> Schema {
        Schema::from_json_str(r#"{"users": {"columns": ["id", "name", "email"]}}"#).unwrap()
    }

    fn examples() -> Vec<Example> {
        vec![
            Example::new("count users", "SELECT COUNT(*) FROM users")
                .with_complexity(Complexity::Simple),
            Example::new("newest user", "SELECT * FROM users ORDER BY id DESC LIMIT 1"),
            Example::new(
                "rank users by signup week",
                "WITH w AS (SELECT id FROM users) SELECT id, RANK() OVER (ORDER BY id) FROM w",
            )
            .with_complexity(Complexity::Complex),
        ]
    }

    #[tokio::test]
    async fn test_missing_examples_fails_before_model_call() {
        let llm = Arc::new(ScriptedLlm::new(&["SELECT * FROM users"]));
        let generator = SqlGenerator::new(llm.clone());

        let err = generator
            .generate_sql("Get all users", &users_schema(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Nl2SqlError::MissingContext(_)));

        let err = generator
            .generate_complex_sql("Get all users", &users_schema(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Nl2SqlError::MissingContext(_)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_schema_fails_before_model_call() {
        let llm = Arc::new(ScriptedLlm::new(&["SELECT 1"]));
        let generator = SqlGenerator::new(llm.clone());
        let empty = Schema::new(crate::models::SchemaFormat::TableMap);

        let err = generator.generate_sql("anything", &empty, &examples()).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::MissingContext(_)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_columnless_table_fails_before_model_call() {
        let llm = Arc::new(ScriptedLlm::new(&["SELECT 1"]));
        let generator = SqlGenerator::new(llm.clone());
        let schema = Schema::with_tables(
            crate::models::SchemaFormat::Ddl,
            vec![crate::models::Table::new("snapshot", Vec::new())],
        );

        let err = generator.generate_sql("anything", &schema, &examples()).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::MissingContext(msg) if msg.contains("snapshot")));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_simple_generation_cleans_completion() {
        let llm = Arc::new(ScriptedLlm::new(&["```sql\nSELECT *\nFROM users;\n```"]));
        let generator = SqlGenerator::new(llm.clone());

        let sql = generator
            .generate_sql("Get all users", &users_schema(), &examples())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT *\nFROM users;");
        assert_eq!(llm.calls(), 1);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains(r#""users""#));
        assert!(prompt.contains("Example 1:\nNL Query: count users\nSQL Query: SELECT COUNT(*) FROM users"));
        assert!(prompt.contains("uppercase"));
        assert!(prompt.ends_with("Natural Language Query:\nGet all users\n\nSQL Query:"));
    }

    #[tokio::test]
    async fn test_complex_generation_uses_complex_model_and_examples() {
        let simple = Arc::new(ScriptedLlm::new(&["SELECT 1"]));
        let complex = Arc::new(ScriptedLlm::new(&["WITH t AS (SELECT id FROM users) SELECT * FROM t"]));
        let generator = SqlGenerator::new(simple.clone()).with_complex_model(complex.clone());

        let sql = generator
            .generate(Complexity::Complex, "rank users", &users_schema(), &examples())
            .await
            .unwrap();
        assert!(sql.starts_with("WITH t AS"));
        assert_eq!(simple.calls(), 0);
        assert_eq!(complex.calls(), 1);

        let prompt = &complex.prompts()[0];
        assert!(prompt.contains("Common Table Expressions"));
        assert!(prompt.contains("window functions"));
        assert!(prompt.contains("rank users by signup week"));
        assert!(!prompt.contains("count users"));
    }

    #[test]
    fn test_complex_examples_falls_back_to_first_two() {
        let unlabelled = vec![
            Example::new("a", "SELECT 1"),
            Example::new("b", "SELECT 2"),
            Example::new("c", "SELECT 3"),
        ];
        let picked: Vec<&str> = complex_examples(&unlabelled)
            .iter()
            .map(|ex| ex.nl_query.as_str())
            .collect();
        assert_eq!(picked, vec!["a", "b"]);
    }

    #[test]
    fn test_prompt_includes_metrics_and_relationships() {
        let schema = Schema::from_json_str(
            r#"{"tables": {"users": {"columns": ["id"]}}, "metrics": {"active_users": "COUNT(DISTINCT id)"}, "relationships": []}"#,
        )
        .unwrap();
        let prompt = build_simple_prompt("active users", &schema, &examples());
        assert!(prompt.contains("active_users"));
        assert!(prompt.contains("relationships"));
    }
}
