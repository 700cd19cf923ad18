//! Dataset schema descriptions
//!
//! Each dataset ships a YAML description next to its source configuration:
//!
//! ```yaml
//! responsePath: body
//! pagination: {enabled: true, maxPages: 10}
//! columns:
//!   - name: symbol
//!     type: string
//!   - name: meta
//!     type: dict
//!     columns:
//!       - name: exchange
//!         type: string
//! ```
//!
//! [`SchemaDescription::parse`] turns the file into [`FieldSpec`]s, and
//! [`SchemaBuilder::build`] maps those onto a typed [`Schema`].

use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Declared type of a field in a schema description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Float,
    Integer,
    Long,
    String,
    Boolean,
    Timestamp,
    Dict,
    List,
}

impl FieldType {
    /// Parse a type name. Returns `None` for names outside the fixed vocabulary.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float" => Some(FieldType::Float),
            "integer" => Some(FieldType::Integer),
            "long" => Some(FieldType::Long),
            "string" => Some(FieldType::String),
            "boolean" => Some(FieldType::Boolean),
            "timestamp" => Some(FieldType::Timestamp),
            "dict" | "dictionary" => Some(FieldType::Dict),
            "list" => Some(FieldType::List),
            _ => None,
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, FieldType::Dict | FieldType::List)
    }
}

/// One field of a schema description.
///
/// `children` is non-empty exactly when `field_type` is a container type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    field_type: FieldType,
    children: Vec<FieldSpec>,
}

impl FieldSpec {
    /// Create a field, degrading a childless container to `string`.
    pub fn new(name: impl Into<String>, field_type: FieldType, children: Vec<FieldSpec>) -> Self {
        let name = name.into();

        if field_type.is_container() && children.is_empty() {
            warn!(column = %name, field_type = ?field_type, "Container column has no nested columns, falling back to string");
            return Self::scalar(name, FieldType::String);
        }

        let children = if field_type.is_container() {
            children
        } else {
            Vec::new()
        };

        Self {
            name,
            field_type,
            children,
        }
    }

    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type: if field_type.is_container() {
                FieldType::String
            } else {
                field_type
            },
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn children(&self) -> &[FieldSpec] {
        &self.children
    }

    /// Nesting depth of a sequence of field specs.
    ///
    /// A flat list of scalars has depth 1; every container level adds one.
    pub fn depth(specs: &[FieldSpec]) -> usize {
        if specs.is_empty() {
            return 0;
        }
        1 + specs
            .iter()
            .map(|spec| FieldSpec::depth(&spec.children))
            .max()
            .unwrap_or(0)
    }
}

/// Typed column in a materialized table
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Float,
    Integer,
    Long,
    String,
    Boolean,
    Timestamp,
    /// Nested record
    Struct(Schema),
    /// Sequence of nested records
    List(Schema),
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Float => write!(f, "float"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Long => write!(f, "long"),
            ColumnType::String => write!(f, "string"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Struct(schema) => write!(f, "struct<{}>", schema.names().join(",")),
            ColumnType::List(schema) => write!(f, "list<struct<{}>>", schema.names().join(",")),
        }
    }
}

/// A named, nullable column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered column list for one dataset
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns a copy with `column` appended, unless a column of that name exists.
    pub fn with_column(mut self, column: Column) -> Self {
        if !self.contains(&column.name) {
            self.columns.push(column);
        }
        self
    }

    /// Returns a copy without the named columns.
    pub fn without(&self, names: &[&str]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Nesting depth, counted the same way as [`FieldSpec::depth`].
    pub fn depth(&self) -> usize {
        if self.columns.is_empty() {
            return 0;
        }
        1 + self
            .columns
            .iter()
            .map(|c| match &c.data_type {
                ColumnType::Struct(nested) | ColumnType::List(nested) => nested.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Maps field specs onto typed schemas
pub struct SchemaBuilder;

impl SchemaBuilder {
    /// Build a schema from an ordered sequence of field specs.
    pub fn build(specs: &[FieldSpec]) -> Schema {
        Schema::new(specs.iter().map(Self::build_column).collect())
    }

    fn build_column(spec: &FieldSpec) -> Column {
        let data_type = match spec.field_type {
            FieldType::Float => ColumnType::Float,
            FieldType::Integer => ColumnType::Integer,
            FieldType::Long => ColumnType::Long,
            FieldType::String => ColumnType::String,
            FieldType::Boolean => ColumnType::Boolean,
            FieldType::Timestamp => ColumnType::Timestamp,
            FieldType::Dict => ColumnType::Struct(Self::build(&spec.children)),
            FieldType::List => ColumnType::List(Self::build(&spec.children)),
        };
        Column::new(spec.name.clone(), data_type)
    }
}

/// Pagination settings from a schema description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationSpec {
    pub enabled: bool,
    /// Upper bound on pages per parameter set
    pub max_pages: Option<u32>,
}

/// Parsed schema description file
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescription {
    pub response_path: String,
    pub pagination: PaginationSpec,
    pub columns: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct RawDescription {
    #[serde(rename = "responsePath")]
    response_path: Option<String>,
    pagination: Option<RawPagination>,
    #[serde(default)]
    columns: Vec<RawColumn>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPagination {
    Flag(bool),
    Spec {
        #[serde(default)]
        enabled: bool,
        #[serde(rename = "maxPages", default)]
        max_pages: Option<u32>,
    },
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    columns: Vec<RawColumn>,
}

impl RawColumn {
    fn into_spec(self) -> FieldSpec {
        let field_type = match self.type_name.as_deref() {
            Some(name) => FieldType::from_name(name).unwrap_or_else(|| {
                warn!(column = %self.name, type_name = %name, "Unknown column type, falling back to string");
                FieldType::String
            }),
            None => {
                warn!(column = %self.name, "Column has no type, falling back to string");
                FieldType::String
            },
        };

        let children = self.columns.into_iter().map(RawColumn::into_spec).collect();
        FieldSpec::new(self.name, field_type, children)
    }
}

impl SchemaDescription {
    /// Parse a schema description from YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        let raw: RawDescription = serde_yaml::from_str(yaml)
            .map_err(|e| IngestError::config(format!("Malformed schema description: {}", e)))?;

        let response_path = raw
            .response_path
            .ok_or_else(|| IngestError::config("Missing 'responsePath' in schema description"))?;

        let pagination = match raw
            .pagination
            .ok_or_else(|| IngestError::config("Missing 'pagination' in schema description"))?
        {
            RawPagination::Flag(enabled) => PaginationSpec {
                enabled,
                max_pages: None,
            },
            RawPagination::Spec { enabled, max_pages } => PaginationSpec { enabled, max_pages },
        };

        let columns = raw.columns.into_iter().map(RawColumn::into_spec).collect();

        Ok(Self {
            response_path,
            pagination,
            columns,
        })
    }

    /// Load and parse a schema description file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IngestError::config(format!(
                "Schema description not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            IngestError::Configuration(msg) => {
                IngestError::config(format!("{} ({})", msg, path.display()))
            },
            other => other,
        })
    }

    /// Build the typed schema for this description.
    pub fn schema(&self) -> Schema {
        SchemaBuilder::build(&self.columns)
    }
}
