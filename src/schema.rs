//! Entity schema descriptors and the name resolver the binder consults.
//!
//! Each entity is registered once with its table name and typed column
//! list; binding a `Table`/`View` source resolves against this registry
//! instead of inspecting types at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RelqError, RelqResult};
use crate::types::{RecordType, Type};

/// Whether an entity is backed by a table or a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Table,
    View,
}

/// One mapped column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub nullable: bool,
    /// Present on the entity but not stored.
    #[serde(default)]
    pub ignored: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            ignored: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// The column's static type including nullability.
    pub fn column_type(&self) -> Type {
        if self.nullable {
            self.ty.clone().nullable()
        } else {
            self.ty.clone()
        }
    }
}

/// Schema descriptor for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub entity: String,
    /// Stored name; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: None,
            kind: SourceKind::Table,
            columns: Vec::new(),
        }
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    pub fn view(mut self) -> Self {
        self.kind = SourceKind::View;
        self
    }

    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    pub fn stored_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.entity)
    }

    /// Record type built from the stored (non-ignored) columns.
    pub fn record_type(&self) -> RecordType {
        RecordType {
            name: self.entity.clone(),
            fields: self
                .columns
                .iter()
                .filter(|c| !c.ignored)
                .map(|c| (c.name.clone(), c.column_type()))
                .collect(),
        }
    }
}

/// Resolves entity names to stored names and columns.
pub trait SchemaResolver {
    /// Stored table (or view) name of the entity.
    fn table_name(&self, entity: &str) -> RelqResult<String>;

    /// All mapped columns of the entity, ignored ones included.
    fn columns(&self, entity: &str) -> RelqResult<Vec<ColumnSchema>>;

    fn kind(&self, entity: &str) -> RelqResult<SourceKind>;
}

/// Registry of schema descriptors keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: TableSchema) -> &mut Self {
        self.tables.insert(schema.entity.clone(), schema);
        self
    }

    pub fn with(mut self, schema: TableSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, entity: &str) -> RelqResult<&TableSchema> {
        self.tables
            .get(entity)
            .ok_or_else(|| RelqError::UnknownEntity(entity.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

impl SchemaResolver for Catalog {
    fn table_name(&self, entity: &str) -> RelqResult<String> {
        Ok(self.get(entity)?.stored_name().to_string())
    }

    fn columns(&self, entity: &str) -> RelqResult<Vec<ColumnSchema>> {
        Ok(self.get(entity)?.columns.clone())
    }

    fn kind(&self, entity: &str) -> RelqResult<SourceKind> {
        Ok(self.get(entity)?.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::new().with(
            TableSchema::new("Album")
                .table_name("albums")
                .column(ColumnSchema::new("AlbumId", Type::I64))
                .column(ColumnSchema::new("Title", Type::Text).nullable())
                .column(ColumnSchema::new("Cached", Type::Text).ignored()),
        )
    }

    #[test]
    fn test_resolve_table_name() {
        let catalog = catalog();
        assert_eq!(catalog.table_name("Album").unwrap(), "albums");
        assert!(matches!(
            catalog.table_name("Artist"),
            Err(RelqError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_record_type_skips_ignored() {
        let record = catalog().get("Album").unwrap().record_type();
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.field("Title"), Some(&Type::Text.nullable()));
        assert_eq!(record.field("Cached"), None);
    }
}
