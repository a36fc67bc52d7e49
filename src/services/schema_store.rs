// Schema Store
//
// Decodes schema sources (DDL text or JSON documents) into the normalized
// `Schema` type once, at the boundary. Holds the last-known-good default
// schema used when user-supplied schema text is unusable.

use sqlparser::ast::{ColumnOption, Statement};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Nl2SqlError, Result};
use crate::models::{Column, PipelineNotice, Schema, SchemaFormat, Table};

/// Keywords that open a table constraint rather than a column definition
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "PRIMARY",
    "FOREIGN",
    "CONSTRAINT",
    "UNIQUE",
    "CHECK",
    "KEY",
    "INDEX",
    "FULLTEXT",
    "SPATIAL",
    "EXCLUDE",
    "PERIOD",
];

/// Infer a schema from one or more `CREATE TABLE` statements.
///
/// Statements other than `CREATE TABLE` are skipped. A table whose columns
/// cannot be extracted is kept with an empty column list.
pub fn infer_schema(ddl_text: &str) -> Schema {
    let (dialect, statements) = split_statements(ddl_text);
    let mut schema = Schema::new(SchemaFormat::Ddl);

    for statement in statements {
        let table = match Parser::parse_sql(dialect.as_ref(), &statement) {
            Ok(parsed) => parsed.into_iter().find_map(table_from_statement),
            Err(e) => {
                let fallback = table_from_tokens(dialect.as_ref(), &statement);
                if fallback.is_some() {
                    tracing::debug!("Parser rejected CREATE TABLE ({}), using token scan", e);
                } else {
                    tracing::debug!("Skipping unparseable statement: {}", e);
                }
                fallback
            }
        };

        if let Some(table) = table {
            if table.columns.is_empty() {
                tracing::warn!(
                    "No columns could be extracted for table {}; keeping it with an empty column list",
                    table.name
                );
            }
            schema.insert(table);
        }
    }

    tracing::info!("Inferred schema with {} tables from DDL", schema.len());
    schema
}

fn table_from_statement(statement: Statement) -> Option<Table> {
    let Statement::CreateTable(create) = statement else {
        return None;
    };

    let columns = create
        .columns
        .iter()
        .map(|column| {
            let data_type = column.data_type.to_string();
            Column {
                name: column.name.value.clone(),
                data_type: (!data_type.trim().is_empty()).then_some(data_type),
                description: column.options.iter().find_map(|def| match &def.option {
                    ColumnOption::Comment(text) => Some(text.clone()),
                    _ => None,
                }),
            }
        })
        .collect();

    Some(Table::new(normalize_identifier(&create.name.to_string()), columns))
}

/// Token-level extraction for `CREATE TABLE` statements the parser rejects.
fn table_from_tokens(dialect: &dyn Dialect, statement: &str) -> Option<Table> {
    let tokens: Vec<Token> = Tokenizer::new(dialect, statement)
        .tokenize()
        .ok()?
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let mut pos = 0;
    if !word_is(tokens.get(pos)?, "CREATE") {
        return None;
    }
    pos += 1;

    // Modifiers between CREATE and TABLE (OR REPLACE, TEMPORARY, EXTERNAL, ...)
    while pos < tokens.len() && !word_is(&tokens[pos], "TABLE") {
        if !matches!(tokens[pos], Token::Word(_)) || pos > 6 {
            return None;
        }
        pos += 1;
    }
    pos += 1;

    if tokens.get(pos).is_some_and(|t| word_is(t, "IF")) {
        pos += 3; // IF NOT EXISTS
    }

    let mut name_parts = Vec::new();
    while let Some(Token::Word(word)) = tokens.get(pos) {
        name_parts.push(word.value.clone());
        pos += 1;
        if matches!(tokens.get(pos), Some(Token::Period)) {
            pos += 1;
        } else {
            break;
        }
    }
    if name_parts.is_empty() {
        return None;
    }
    let name = normalize_identifier(&name_parts.join("."));

    let mut columns = Vec::new();
    let Some(open) = tokens[pos..].iter().position(|t| *t == Token::LParen) else {
        return Some(Table::new(name, columns));
    };

    let mut depth = 0usize;
    let mut angle_depth = 0usize;
    let mut entry: Vec<&Token> = Vec::new();
    for token in &tokens[pos + open..] {
        match token {
            Token::LParen => {
                depth += 1;
                if depth == 1 {
                    continue;
                }
            }
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    push_column(&entry, &mut columns);
                    break;
                }
            }
            Token::Lt => angle_depth += 1,
            Token::Gt => angle_depth = angle_depth.saturating_sub(1),
            Token::Comma if depth == 1 && angle_depth == 0 => {
                push_column(&entry, &mut columns);
                entry.clear();
                continue;
            }
            _ => {}
        }
        entry.push(token);
    }

    Some(Table::new(name, columns))
}

fn push_column(entry: &[&Token], columns: &mut Vec<Column>) {
    let Some(Token::Word(word)) = entry.first() else {
        return;
    };
    if word.quote_style.is_none()
        && CONSTRAINT_KEYWORDS.contains(&word.value.to_uppercase().as_str())
    {
        return;
    }
    let data_type = entry[1..]
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    columns.push(Column {
        name: word.value.clone(),
        data_type: (!data_type.is_empty()).then_some(data_type),
        description: None,
    });
}

fn word_is(token: &Token, keyword: &str) -> bool {
    matches!(token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

/// Strip identifier quoting from each dotted part of a (possibly qualified) name
pub fn normalize_identifier(raw: &str) -> String {
    raw.split('.')
        .map(|part| part.trim().trim_matches(|c| matches!(c, '"' | '`' | '[' | ']')))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Split SQL text into statements at top-level semicolons.
///
/// The text is tokenized once, so quoted strings, quoted identifiers and
/// comments never split a statement. Text containing backslash-escaped
/// quotes is tokenized with MySQL rules; the returned dialect is the one
/// the statements should be parsed with.
fn split_statements(text: &str) -> (Box<dyn Dialect>, Vec<String>) {
    let mut dialects: Vec<Box<dyn Dialect>> =
        vec![Box::new(GenericDialect {}), Box::new(MySqlDialect {})];
    if text.contains("\\'") {
        dialects.reverse();
    }

    let mut last_error = None;
    for dialect in dialects {
        let tokenized = Tokenizer::new(dialect.as_ref(), text)
            .with_unescape(false)
            .tokenize();
        match tokenized {
            Ok(tokens) => {
                let statements = statements_from_tokens(&tokens);
                return (dialect, statements);
            }
            Err(e) => last_error = Some(e),
        }
    }

    if let Some(e) = last_error {
        tracing::warn!("Could not tokenize DDL ({}); parsing it as one statement", e);
    }
    let whole = text.trim();
    let statements = if whole.is_empty() {
        Vec::new()
    } else {
        vec![whole.to_string()]
    };
    (Box::new(GenericDialect {}), statements)
}

fn statements_from_tokens(tokens: &[Token]) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::SemiColon if depth == 0 => {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Whitespace(Whitespace::SingleLineComment { .. }) => {
                current.push('\n');
                continue;
            }
            Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                current.push(' ');
                continue;
            }
            _ => {}
        }
        current.push_str(&token.to_string());
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        statements.push(text.to_string());
    }
}

/// Read a schema file as a JSON document
pub fn fetch_schema_json<P: AsRef<Path>>(path: P) -> Result<Schema> {
    let text = read_source(path.as_ref())?;
    Schema::from_json_str(&text)
}

/// Read a schema file, detecting JSON documents by content and treating
/// anything else as DDL.
pub fn load_schema_source<P: AsRef<Path>>(path: P) -> Result<Schema> {
    let path = path.as_ref();
    let text = read_source(path)?;
    let schema = if text.trim_start().starts_with('{') {
        Schema::from_json_str(&text)?
    } else {
        infer_schema(&text)
    };

    if schema.is_empty() {
        return Err(Nl2SqlError::SchemaUnavailable(format!(
            "Schema source {} defines no tables",
            path.display()
        )));
    }
    Ok(schema)
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Nl2SqlError::SchemaUnavailable(format!(
            "Failed to read schema source {}: {}",
            path.display(),
            e
        ))
    })
}

/// Parse user-supplied JSON schema text. Malformed input degrades to the
/// fallback schema with a notice instead of failing the request.
pub fn parse_user_provided_schema(
    user_input: &str,
    fallback: &Arc<Schema>,
) -> (Arc<Schema>, Option<PipelineNotice>) {
    match Schema::from_json_str(user_input) {
        Ok(schema) if !schema.is_empty() => {
            tracing::info!("Using user-provided schema with {} tables", schema.len());
            (Arc::new(schema), None)
        }
        Ok(_) => {
            tracing::warn!("User-provided schema defines no tables. Falling back to default schema.");
            (
                fallback.clone(),
                Some(PipelineNotice::UserSchemaRejected {
                    reason: "schema defines no tables".to_string(),
                }),
            )
        }
        Err(e) => {
            tracing::warn!("Invalid JSON schema provided by user ({}). Falling back to default schema.", e);
            (
                fallback.clone(),
                Some(PipelineNotice::UserSchemaRejected {
                    reason: e.to_string(),
                }),
            )
        }
    }
}

/// Owner of the default (last-known-good) schema
pub struct SchemaStore {
    default_schema: Arc<Schema>,
    source: Option<PathBuf>,
}

impl SchemaStore {
    pub fn new(default_schema: Schema) -> Self {
        Self {
            default_schema: Arc::new(default_schema),
            source: None,
        }
    }

    /// Load the default schema from a DDL or JSON file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let schema = load_schema_source(path)?;
        tracing::info!(
            "Loaded default schema ({:?}, {} tables) from {}",
            schema.format,
            schema.len(),
            path.display()
        );
        Ok(Self {
            default_schema: Arc::new(schema),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn default_schema(&self) -> Arc<Schema> {
        self.default_schema.clone()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Schema to use for a request: the user's when supplied and usable,
    /// otherwise the default.
    pub fn resolve(&self, user_input: Option<&str>) -> (Arc<Schema>, Option<PipelineNotice>) {
        match user_input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) => parse_user_provided_schema(text, &self.default_schema),
            None => (self.default_schema.clone(), None),
        }
    }
}
