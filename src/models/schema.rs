use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::{Nl2SqlError, Result};

/// How a schema was decoded at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    /// Inferred from `CREATE TABLE` statements
    Ddl,
    /// JSON document with a top-level `tables` key
    Document,
    /// JSON object mapping table name to descriptor
    TableMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Column {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            description: None,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Text used to embed this table for similarity search
    pub fn embedding_document(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => {
                format!("{}: {}", self.name, description.trim())
            }
            _ => self.name.clone(),
        }
    }
}

/// Normalized schema: tables in declaration order plus opaque pass-through
/// `metrics` and `relationships` for generation prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub format: SchemaFormat,
    tables: Vec<Table>,
    pub metrics: Option<Value>,
    pub relationships: Option<Value>,
}

impl Schema {
    pub fn new(format: SchemaFormat) -> Self {
        Self {
            format,
            tables: Vec::new(),
            metrics: None,
            relationships: None,
        }
    }

    pub fn with_tables(format: SchemaFormat, tables: Vec<Table>) -> Self {
        let mut schema = Self::new(format);
        for table in tables {
            schema.insert(table);
        }
        schema
    }

    /// Insert a table, replacing an existing table of the same name in place
    pub fn insert(&mut self, table: Table) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn all_table_names(&self) -> BTreeSet<String> {
        self.table_names().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Remove tables with no known columns and return their names
    pub fn drop_columnless_tables(&mut self) -> Vec<String> {
        let (kept, dropped): (Vec<Table>, Vec<Table>) = std::mem::take(&mut self.tables)
            .into_iter()
            .partition(|t| !t.columns.is_empty());
        self.tables = kept;
        dropped.into_iter().map(|t| t.name).collect()
    }

    /// Narrow the schema to the given tables, keeping declaration order and
    /// the pass-through metadata.
    pub fn restrict_to(&self, names: &BTreeSet<String>) -> Schema {
        Schema {
            format: self.format,
            tables: self
                .tables
                .iter()
                .filter(|t| names.contains(&t.name))
                .cloned()
                .collect(),
            metrics: self.metrics.clone(),
            relationships: self.relationships.clone(),
        }
    }

    /// Stable hash over table and column names
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for table in &self.tables {
            hasher.update(table.name.as_bytes());
            hasher.update(b"\0");
            for column in &table.columns {
                hasher.update(column.name.as_bytes());
                hasher.update(b"\0");
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Decode a JSON schema document.
    ///
    /// Accepts either `{"tables": {...}, "metrics": ..., "relationships": ...}`
    /// or a flat `{"table_name": {"columns": [...]}}` map.
    pub fn from_json_str(text: &str) -> Result<Schema> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Nl2SqlError::SchemaUnavailable(format!("Invalid schema JSON: {}", e)))?;
        Self::from_json_value(value)
    }

    pub fn from_json_value(value: Value) -> Result<Schema> {
        let Value::Object(mut root) = value else {
            return Err(Nl2SqlError::SchemaUnavailable(
                "Schema JSON must be an object".to_string(),
            ));
        };

        let (format, tables_map) = match root.remove("tables") {
            Some(Value::Object(tables)) => (SchemaFormat::Document, tables),
            Some(other) => {
                return Err(Nl2SqlError::SchemaUnavailable(format!(
                    "`tables` must be an object, found {}",
                    json_type_name(&other)
                )))
            }
            None => (SchemaFormat::TableMap, std::mem::take(&mut root)),
        };

        let mut schema = Schema::new(format);
        for (name, descriptor) in tables_map {
            schema.insert(decode_table(name, descriptor)?);
        }

        if format == SchemaFormat::Document {
            schema.metrics = root.remove("metrics");
            schema.relationships = root.remove("relationships");
        }

        Ok(schema)
    }

    /// Structural rendering used in generation prompts and API responses
    pub fn to_prompt_value(&self) -> Value {
        let mut tables = Map::new();
        for table in &self.tables {
            let mut entry = Map::new();
            if let Some(description) = &table.description {
                entry.insert("description".to_string(), json!(description));
            }
            let columns: Vec<Value> = table
                .columns
                .iter()
                .map(|c| {
                    if c.data_type.is_none() && c.description.is_none() {
                        json!(c.name)
                    } else {
                        serde_json::to_value(c).unwrap_or_else(|_| json!(c.name))
                    }
                })
                .collect();
            entry.insert("columns".to_string(), Value::Array(columns));
            tables.insert(table.name.clone(), Value::Object(entry));
        }

        let mut root = Map::new();
        root.insert("tables".to_string(), Value::Object(tables));
        if let Some(metrics) = &self.metrics {
            root.insert("metrics".to_string(), metrics.clone());
        }
        if let Some(relationships) = &self.relationships {
            root.insert("relationships".to_string(), relationships.clone());
        }
        Value::Object(root)
    }
}

/// Column list shapes found in schema documents
#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnsSpec {
    List(Vec<ColumnSpec>),
    Typed(Map<String, Value>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(rename = "type", alias = "data_type", default)]
        data_type: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

fn decode_table(name: String, descriptor: Value) -> Result<Table> {
    let mut table = Table::new(name, Vec::new());
    let Value::Object(mut fields) = descriptor else {
        return Err(Nl2SqlError::SchemaUnavailable(format!(
            "Table `{}` must be described by an object",
            table.name
        )));
    };

    table.description = fields
        .remove("description")
        .and_then(|d| d.as_str().map(str::to_string));

    if let Some(columns) = fields.remove("columns") {
        let spec: ColumnsSpec = serde_json::from_value(columns).map_err(|e| {
            Nl2SqlError::SchemaUnavailable(format!(
                "Invalid columns for table `{}`: {}",
                table.name, e
            ))
        })?;
        table.columns = match spec {
            ColumnsSpec::List(items) => items
                .into_iter()
                .map(|item| match item {
                    ColumnSpec::Name(name) => Column::named(name),
                    ColumnSpec::Detailed {
                        name,
                        data_type,
                        description,
                    } => Column {
                        name,
                        data_type,
                        description,
                    },
                })
                .collect(),
            ColumnsSpec::Typed(map) => map
                .into_iter()
                .map(|(name, ty)| Column {
                    name,
                    data_type: ty.as_str().map(str::to_string),
                    description: None,
                })
                .collect(),
        };
    }

    Ok(table)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
