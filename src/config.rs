//! `relq.toml` configuration.
//!
//! ```toml
//! database_url = "sqlite://chinook.db"
//!
//! [options]
//! remove_unused_columns = true
//!
//! [[tables]]
//! entity = "Artist"
//! columns = [
//!     { name = "ArtistId", type = "i64" },
//!     { name = "Name", type = "text", nullable = true },
//! ]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelqError, RelqResult};
use crate::schema::{Catalog, TableSchema};
use crate::translate::TranslateOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub options: TranslateOptions,
    pub tables: Vec<TableSchema>,
}

impl Config {
    pub fn load(path: &Path) -> RelqResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| RelqError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> RelqResult<Self> {
        toml::from_str(content).map_err(|e| RelqError::Config(e.to_string()))
    }

    /// `~/.config/relq/relq.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relq").join("relq.toml"))
    }

    /// Build the schema registry; entities must be unique.
    pub fn catalog(&self) -> RelqResult<Catalog> {
        let mut catalog = Catalog::new();
        for table in &self.tables {
            if catalog.get(&table.entity).is_ok() {
                return Err(RelqError::Config(format!(
                    "entity '{}' is declared twice",
                    table.entity
                )));
            }
            catalog.register(table.clone());
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaResolver, SourceKind};
    use crate::types::Type;

    const SAMPLE: &str = r#"
database_url = "sqlite::memory:"

[options]
simplify_aggregates = false

[[tables]]
entity = "Artist"
columns = [
    { name = "ArtistId", type = "i64" },
    { name = "Name", type = "text", nullable = true },
]

[[tables]]
entity = "TopArtists"
table = "top_artists"
kind = "view"
columns = [{ name = "Name", type = "text" }]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(!config.options.simplify_aggregates);
        assert!(config.options.remove_unused_columns);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.table_name("TopArtists").unwrap(), "top_artists");
        assert_eq!(catalog.kind("TopArtists").unwrap(), SourceKind::View);
        let columns = catalog.columns("Artist").unwrap();
        assert_eq!(columns[1].column_type(), Type::Text.nullable());
    }

    #[test]
    fn test_duplicate_entity() {
        let config = Config {
            tables: vec![TableSchema::new("A"), TableSchema::new("A")],
            ..Config::default()
        };
        assert!(matches!(config.catalog(), Err(RelqError::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml_str("tables = 3"),
            Err(RelqError::Config(_))
        ));
    }
}
