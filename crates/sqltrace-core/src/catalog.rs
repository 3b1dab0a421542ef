//! Read-only schema catalog interface.
//!
//! The core consults the catalog for table and column metadata during name
//! resolution. When the catalog returns nothing, analysis proceeds with
//! unknown-typed stub columns marked `synthetic` so downstream consumers can
//! tell inferred lineage from declared schema.

use std::collections::HashMap;

/// Metadata for a table known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub name: String,
    pub schema: Option<String>,
    pub database: Option<String>,
}

/// Provenance of a column's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnOrigin {
    /// Declared in the catalog.
    #[default]
    Declared,
    /// Invented during analysis because the catalog had no entry.
    Unknown,
}

/// Metadata for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: Option<String>,
    pub nullable: Option<bool>,
    pub origin: ColumnOrigin,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.map(|t| t.to_string()),
            nullable: None,
            origin: ColumnOrigin::Declared,
        }
    }

    /// A stub column for an identifier the catalog does not know.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: None,
            origin: ColumnOrigin::Unknown,
        }
    }
}

/// Read-only lookup of table and column metadata.
///
/// Keys are canonical (case-folded, schema-qualified) table names.
pub trait SchemaCatalog: Send + Sync {
    fn get_table(&self, canonical_name: &str) -> Option<TableMetadata>;

    fn get_columns(&self, canonical_name: &str) -> Vec<ColumnMetadata>;

    /// Normalizes a raw type string to its canonical form.
    fn resolve_type(&self, raw_type: &str) -> String {
        normalize_type(raw_type)
    }
}

/// Canonical type normalization: case-folded, whitespace collapsed, no
/// space before a length suffix (`NVARCHAR (50)` becomes `nvarchar(50)`).
pub fn normalize_type(raw_type: &str) -> String {
    let mut normalized = String::with_capacity(raw_type.len());
    let mut pending_space = false;
    for ch in raw_type.chars() {
        if ch.is_whitespace() {
            pending_space = !normalized.is_empty();
            continue;
        }
        if pending_space && ch != '(' && ch != ')' && ch != ',' {
            normalized.push(' ');
        }
        pending_space = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}

/// An in-memory catalog for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: HashMap<String, (TableMetadata, Vec<ColumnMetadata>)>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under its canonical name with typed columns.
    pub fn add_table(&mut self, canonical_name: &str, columns: &[(&str, &str)]) -> &mut Self {
        let key = canonical_name.to_lowercase();
        let mut parts: Vec<&str> = canonical_name.split('.').collect();
        let name = parts.pop().unwrap_or(canonical_name).to_lowercase();
        let schema = parts.pop().map(|s| s.to_lowercase());
        let database = parts.pop().map(|s| s.to_lowercase());

        let metadata = TableMetadata {
            name,
            schema,
            database,
        };
        let columns = columns
            .iter()
            .map(|(column, data_type)| ColumnMetadata {
                name: column.to_lowercase(),
                data_type: Some(normalize_type(data_type)),
                nullable: None,
                origin: ColumnOrigin::Declared,
            })
            .collect();
        self.tables.insert(key, (metadata, columns));
        self
    }
}

impl SchemaCatalog for MemoryCatalog {
    fn get_table(&self, canonical_name: &str) -> Option<TableMetadata> {
        self.tables
            .get(&canonical_name.to_lowercase())
            .map(|(metadata, _)| metadata.clone())
    }

    fn get_columns(&self, canonical_name: &str) -> Vec<ColumnMetadata> {
        self.tables
            .get(&canonical_name.to_lowercase())
            .map(|(_, columns)| columns.clone())
            .unwrap_or_default()
    }
}

/// A catalog that knows nothing; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl SchemaCatalog for EmptyCatalog {
    fn get_table(&self, _canonical_name: &str) -> Option<TableMetadata> {
        None
    }

    fn get_columns(&self, _canonical_name: &str) -> Vec<ColumnMetadata> {
        Vec::new()
    }
}
