use sqlparser::ast::{ObjectName, Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use thiserror::Error;

use crate::error::{Nl2SqlError, Result};
use crate::models::Schema;
use crate::services::schema_store::normalize_identifier;

/// Why a statement failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("SQL parsing error: {0}")]
    Parse(String),

    #[error("Expected exactly one statement, found {0}")]
    StatementCount(usize),

    #[error("{0} statements are not allowed. Only SELECT queries are permitted.")]
    NotSelect(String),

    #[error("Table {0} not found in schema")]
    UnknownTable(String),
}

/// Cheap syntactic safety net for generated SQL: one read-only SELECT whose
/// FROM/JOIN tables all exist in the schema. Never rewrites the SQL.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    dialect: String,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self {
            dialect: "generic".to_string(),
        }
    }
}

impl SqlValidator {
    /// Validator for a named dialect (`generic`, `postgresql`, `mysql`,
    /// `bigquery`, `snowflake`, ...)
    pub fn for_dialect(name: &str) -> Result<Self> {
        if dialect_from_str(name).is_none() {
            return Err(Nl2SqlError::Internal(format!(
                "Unsupported SQL dialect: {}",
                name
            )));
        }
        Ok(Self {
            dialect: name.to_lowercase(),
        })
    }

    pub fn dialect_name(&self) -> &str {
        &self.dialect
    }

    // sqlparser dialects are not Send, so one is built per check
    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect).unwrap_or_else(|| Box::new(GenericDialect {}))
    }

    /// Validate SQL and report the first rule it breaks
    pub fn check(&self, sql: &str, schema: &Schema) -> std::result::Result<(), ValidationFailure> {
        let statements = Parser::parse_sql(self.dialect().as_ref(), sql)
            .map_err(|e| ValidationFailure::Parse(e.to_string()))?;

        if statements.len() != 1 {
            return Err(ValidationFailure::StatementCount(statements.len()));
        }
        let statement = &statements[0];

        if !matches!(statement, Statement::Query(_)) {
            return Err(ValidationFailure::NotSelect(statement_kind(statement)));
        }

        let mut checker = RelationChecker {
            schema,
            scopes: Vec::new(),
        };
        if let ControlFlow::Break(failure) = statement.visit(&mut checker) {
            return Err(failure);
        }

        Ok(())
    }

    pub fn validate_sql(&self, sql: &str, schema: &Schema) -> bool {
        match self.check(sql, schema) {
            Ok(()) => {
                tracing::info!("SQL validation successful.");
                true
            }
            Err(failure) => {
                tracing::warn!("SQL validation failed: {}", failure);
                false
            }
        }
    }
}

/// Validate with the generic dialect
pub fn validate_sql(sql: &str, schema: &Schema) -> bool {
    SqlValidator::default().validate_sql(sql, schema)
}

/// Match a referenced table against schema keys: exact, then
/// case-insensitive, then by final path segment on either side.
fn resolve_table<'a>(relation: &str, schema: &'a Schema) -> Option<&'a str> {
    let last_segment = |name: &str| name.rsplit('.').next().unwrap_or(name).to_lowercase();
    let wanted_last = last_segment(relation);

    schema
        .table_names()
        .find(|name| *name == relation)
        .or_else(|| schema.table_names().find(|name| name.eq_ignore_ascii_case(relation)))
        .or_else(|| schema.table_names().find(|name| last_segment(name) == wanted_last))
}

/// Walks a query checking every FROM/JOIN relation against the schema.
/// CTE names are visible only inside the query that declares them.
struct RelationChecker<'a> {
    schema: &'a Schema,
    scopes: Vec<HashSet<String>>,
}

impl RelationChecker<'_> {
    fn is_cte(&self, relation: &str) -> bool {
        let name = relation.to_lowercase();
        self.scopes.iter().any(|scope| scope.contains(&name))
    }
}

impl Visitor for RelationChecker<'_> {
    type Break = ValidationFailure;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(kind) = write_kind(&query.body) {
            return ControlFlow::Break(ValidationFailure::NotSelect(kind));
        }

        let declared = query
            .with
            .iter()
            .flat_map(|with| &with.cte_tables)
            .map(|cte| cte.alias.name.value.to_lowercase())
            .collect();
        self.scopes.push(declared);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let name = normalize_identifier(&relation.to_string());
        if self.is_cte(&name) || resolve_table(&name, self.schema).is_some() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(ValidationFailure::UnknownTable(name))
        }
    }
}

/// Data-modifying body of a query, including `SELECT ... INTO`.
/// Parenthesized subqueries are visited as queries of their own.
fn write_kind(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Insert(statement)
        | SetExpr::Update(statement)
        | SetExpr::Delete(statement)
        | SetExpr::Merge(statement) => Some(statement_kind(statement)),
        SetExpr::Select(select) if select.into.is_some() => Some("SELECT INTO".to_string()),
        SetExpr::SetOperation { left, right, .. } => write_kind(left).or_else(|| write_kind(right)),
        _ => None,
    }
}

fn statement_kind(statement: &Statement) -> String {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Merge { .. } => "MERGE",
        _ => {
            return statement
                .to_string()
                .split_whitespace()
                .next()
                .unwrap_or("Unknown")
                .to_uppercase()
        }
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_json_str(
            r#"{"tables": {
                "users": {"columns": ["id", "name", "email"]},
                "orders": {"columns": ["id", "user_id", "amount"]},
                "analytics.page_views": {"columns": ["page_path", "views"]}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_on_known_table_is_valid() {
        assert!(validate_sql("SELECT * FROM users", &schema()));
        assert!(validate_sql("SELECT * FROM users;", &schema()));
        assert!(validate_sql("select id from USERS where id = 1", &schema()));
        assert!(validate_sql("SELECT 1", &schema()));
    }

    #[test]
    fn test_unknown_table_is_invalid() {
        assert!(!validate_sql("SELECT * FROM ghost_table", &schema()));
        assert_eq!(
            SqlValidator::default().check("SELECT * FROM ghost_table", &schema()),
            Err(ValidationFailure::UnknownTable("ghost_table".to_string()))
        );
    }

    #[test]
    fn test_non_select_statements_are_invalid() {
        let validator = SqlValidator::default();
        for sql in [
            "DELETE FROM users",
            "INSERT INTO users VALUES (1, 'a', 'b')",
            "UPDATE users SET name = 'test'",
            "DROP TABLE users",
            "CREATE TABLE t (id INT)",
        ] {
            assert!(!validator.validate_sql(sql, &schema()), "{} should be rejected", sql);
            assert!(matches!(
                validator.check(sql, &schema()),
                Err(ValidationFailure::NotSelect(_))
            ));
        }
        assert!(!validate_sql("DELETE FROM users", &Schema::new(crate::models::SchemaFormat::Ddl)));
    }

    #[test]
    fn test_multiple_statements_are_invalid() {
        assert_eq!(
            SqlValidator::default().check("SELECT * FROM users; DELETE FROM users", &schema()),
            Err(ValidationFailure::StatementCount(2))
        );
        assert!(!validate_sql("", &schema()));
    }

    #[test]
    fn test_unparseable_sql_is_invalid() {
        assert!(matches!(
            SqlValidator::default().check("SELEKT * FROM users", &schema()),
            Err(ValidationFailure::Parse(_))
        ));
    }

    #[test]
    fn test_joins_and_subqueries_are_checked() {
        assert!(validate_sql(
            "SELECT u.name, SUM(o.amount) FROM users u JOIN orders o ON o.user_id = u.id GROUP BY u.name",
            &schema()
        ));
        assert!(!validate_sql(
            "SELECT * FROM users u JOIN ghost g ON g.id = u.id",
            &schema()
        ));
        assert!(!validate_sql(
            "SELECT * FROM users WHERE id IN (SELECT user_id FROM ghost)",
            &schema()
        ));
    }

    #[test]
    fn test_cte_names_are_not_schema_tables() {
        let sql = r#"
            WITH totals AS (
                SELECT user_id, SUM(amount) AS total FROM orders GROUP BY user_id
            ),
            ranked AS (
                SELECT user_id, total, RANK() OVER (ORDER BY total DESC) AS rnk FROM totals
            )
            SELECT u.name, r.total FROM ranked r JOIN users u ON u.id = r.user_id WHERE r.rnk <= 10
        "#;
        assert!(validate_sql(sql, &schema()));

        let bad = "WITH t AS (SELECT * FROM ghost) SELECT * FROM t";
        assert!(!validate_sql(bad, &schema()));
    }

    #[test]
    fn test_writes_wrapped_in_queries_are_rejected() {
        let validator = SqlValidator::default();
        let cases = [
            (
                "WITH x AS (SELECT id, name FROM users) INSERT INTO users SELECT * FROM x",
                "INSERT",
            ),
            ("WITH d AS (DELETE FROM users RETURNING *) SELECT * FROM d", "DELETE"),
            ("SELECT * INTO users_copy FROM users", "SELECT INTO"),
        ];
        for (sql, kind) in cases {
            assert!(!validator.validate_sql(sql, &schema()), "{} should be rejected", sql);
            assert_eq!(
                validator.check(sql, &schema()),
                Err(ValidationFailure::NotSelect(kind.to_string())),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_select_into_inside_union_is_rejected() {
        assert!(!validate_sql(
            "SELECT id FROM users UNION SELECT id INTO dump FROM orders",
            &schema()
        ));
        assert!(validate_sql("SELECT id FROM users UNION SELECT id FROM orders", &schema()));
    }

    #[test]
    fn test_cte_names_do_not_leak_out_of_their_query() {
        let leaked = "SELECT * FROM (WITH t AS (SELECT id FROM users) SELECT id FROM t) s JOIN t ON t.id = s.id";
        assert_eq!(
            SqlValidator::default().check(leaked, &schema()),
            Err(ValidationFailure::UnknownTable("t".to_string()))
        );

        let inner_use = "SELECT * FROM orders WHERE user_id IN (WITH t AS (SELECT id FROM users) SELECT id FROM t)";
        assert!(validate_sql(inner_use, &schema()));

        let outer_cte_in_subquery = "WITH t AS (SELECT id FROM users) SELECT * FROM orders WHERE user_id IN (SELECT id FROM t)";
        assert!(validate_sql(outer_cte_in_subquery, &schema()));
    }

    #[test]
    fn test_qualified_names_match_by_last_segment() {
        assert!(validate_sql("SELECT * FROM public.users", &schema()));
        assert!(validate_sql("SELECT views FROM analytics.page_views", &schema()));
        assert!(validate_sql("SELECT views FROM page_views", &schema()));
    }

    #[test]
    fn test_bigquery_dialect_backticks() {
        let validator = SqlValidator::for_dialect("bigquery").unwrap();
        assert!(validator.validate_sql(
            "SELECT COUNT(DISTINCT id) AS total FROM `my-project.crm.users`",
            &schema()
        ));
        assert_eq!(validator.dialect_name(), "bigquery");
        assert!(SqlValidator::for_dialect("not-a-dialect").is_err());
    }
}
