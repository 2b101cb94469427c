//! Static catalog of known artifacts.
//!
//! The catalog is built once (from JSON or the built-in table) and handed to
//! the reconciler; it is never mutated afterwards.

use crate::error::{KeeperError, Result};
use crate::store::ModelName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// One artifact offered for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Pull name, e.g. `"llama3.2:3b"`.
    pub name: String,
    /// Human-readable name, e.g. `"Llama 3.2 3B"`.
    pub display_name: String,
    /// Approximate download size, e.g. `"2.0 GB"`.
    #[serde(default)]
    pub size_label: String,
    /// Approximate memory needed to run, e.g. `"4 GB"`.
    #[serde(default)]
    pub memory_label: String,
    /// Grouping shown by list renderers.
    #[serde(default)]
    pub section: Option<String>,
}

impl CatalogEntry {
    fn new(name: &str, display_name: &str, size_label: &str, memory_label: &str, section: &str) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            size_label: size_label.into(),
            memory_label: memory_label.into(),
            section: Some(section.into()),
        }
    }
}

/// Immutable, ordered set of catalog entries keyed by canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog, canonicalizing names and dropping duplicates.
    ///
    /// Fails on a name that does not parse.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut kept = Vec::new();
        for mut entry in entries {
            entry.name = ModelName::parse(&entry.name)?.to_string();
            if seen.insert(entry.name.clone()) {
                kept.push(entry);
            }
        }
        Ok(Self { entries: kept })
    }

    /// Load a JSON array of entries.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| KeeperError::io_with_path(e, path))?;
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(&text).map_err(|e| KeeperError::Config {
                message: format!("catalog {}: {}", path.display(), e),
            })?;
        Self::from_entries(entries)
    }

    /// A catalog with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Small built-in list of popular artifacts.
    pub fn builtin() -> Self {
        let entries = vec![
            CatalogEntry::new("llama3.2:1b", "Llama 3.2 1B", "1.3 GB", "2 GB", "General"),
            CatalogEntry::new("llama3.2:3b", "Llama 3.2 3B", "2.0 GB", "4 GB", "General"),
            CatalogEntry::new("llama3.1:8b", "Llama 3.1 8B", "4.9 GB", "8 GB", "General"),
            CatalogEntry::new("mistral:7b", "Mistral 7B", "4.1 GB", "8 GB", "General"),
            CatalogEntry::new("gemma2:2b", "Gemma 2 2B", "1.6 GB", "3 GB", "General"),
            CatalogEntry::new("phi3:mini", "Phi-3 Mini", "2.2 GB", "4 GB", "General"),
            CatalogEntry::new("qwen2.5-coder:7b", "Qwen 2.5 Coder 7B", "4.7 GB", "8 GB", "Code"),
            CatalogEntry::new("codellama:7b", "Code Llama 7B", "3.8 GB", "8 GB", "Code"),
            CatalogEntry::new("nomic-embed-text:latest", "Nomic Embed Text", "274 MB", "1 GB", "Embedding"),
        ];
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Look up an entry by any spelling of its name.
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        let canonical = crate::store::canonical_name(name);
        self.entries.iter().find(|e| e.name == canonical)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_names_are_canonical() {
        let catalog = Catalog::builtin();
        let rebuilt = Catalog::from_entries(catalog.entries().to_vec()).unwrap();
        assert_eq!(catalog, rebuilt);
    }

    #[test]
    fn test_lookup_by_short_name() {
        let catalog = Catalog::from_entries([CatalogEntry::new(
            "tinyllama",
            "TinyLlama",
            "637 MB",
            "1 GB",
            "General",
        )])
        .unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["tinyllama:latest"]);
        assert!(catalog.contains("tinyllama"));
        assert!(catalog.contains("library/tinyllama:latest"));
        assert!(!catalog.contains("tinyllama:1.1b"));
    }

    #[test]
    fn test_duplicates_dropped() {
        let entry = CatalogEntry::new("a", "A", "", "", "x");
        let mut alias = entry.clone();
        alias.name = "a:latest".into();
        let catalog = Catalog::from_entries([entry, alias]).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_load_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"name": "qwen2:0.5b", "displayName": "Qwen2 0.5B", "sizeLabel": "352 MB"}]"#,
        )
        .unwrap();
        let catalog = Catalog::load(&path).unwrap();
        let entry = catalog.get("qwen2:0.5b").unwrap();
        assert_eq!(entry.display_name, "Qwen2 0.5B");
        assert_eq!(entry.section, None);
    }

    #[test]
    fn test_load_rejects_bad_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.json");
        std::fs::write(&path, r#"[{"name": "bad name!", "displayName": "x"}]"#).unwrap();
        assert!(Catalog::load(&path).is_err());
    }
}
