//! Artifact names and their mapping to manifest paths.

use crate::config::PathsConfig;
use crate::error::{KeeperError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A fully qualified artifact name: `host/namespace/model:tag`.
///
/// The canonical string form drops the default host and the default
/// `library` namespace, so `llama3` canonicalizes to `llama3:latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelName {
    pub host: String,
    pub namespace: String,
    pub model: String,
    pub tag: String,
}

impl ModelName {
    /// Parse a user- or server-supplied name.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid(raw, "name is empty"));
        }

        // The tag separator is the last ':' after the last '/', so that
        // `host:port/ns/model` is not mistaken for a tag.
        let slash = trimmed.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match trimmed[slash..].rfind(':') {
            Some(i) => (&trimmed[..slash + i], &trimmed[slash + i + 1..]),
            None => (trimmed, PathsConfig::DEFAULT_TAG),
        };

        let parts: Vec<&str> = path.split('/').collect();
        let (host, namespace, model) = match parts.as_slice() {
            [model] => (PathsConfig::DEFAULT_REGISTRY, PathsConfig::DEFAULT_NAMESPACE, *model),
            [namespace, model] => (PathsConfig::DEFAULT_REGISTRY, *namespace, *model),
            [host, namespace, model] => (*host, *namespace, *model),
            _ => return Err(invalid(raw, "expected [host/][namespace/]model[:tag]")),
        };

        let name = Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            model: model.to_string(),
            tag: tag.to_string(),
        };
        name.validate(raw)?;
        Ok(name)
    }

    /// Rebuild a name from a manifest path relative to the manifests root.
    ///
    /// Returns `None` when the path does not have the `host/ns/model/tag`
    /// shape (stray files, editor backups).
    pub fn from_manifest_path(relative: &Path) -> Option<Self> {
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        let [host, namespace, model, tag] = parts.as_slice() else {
            return None;
        };
        let name = Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            model: model.to_string(),
            tag: tag.to_string(),
        };
        name.validate("").ok()?;
        Some(name)
    }

    /// Path of this artifact's manifest relative to the manifests root.
    pub fn manifest_relative_path(&self) -> PathBuf {
        [&self.host, &self.namespace, &self.model, &self.tag]
            .iter()
            .collect()
    }

    fn validate(&self, raw: &str) -> Result<()> {
        for (label, part) in [
            ("host", &self.host),
            ("namespace", &self.namespace),
            ("model", &self.model),
            ("tag", &self.tag),
        ] {
            if part.is_empty() {
                return Err(invalid(raw, &format!("{} is empty", label)));
            }
            if part == "." || part == ".." || part.starts_with('.') {
                return Err(invalid(raw, &format!("{} may not start with '.'", label)));
            }
            let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
            // Hosts may carry a port.
            let ok = if label == "host" {
                part.chars().all(|c| allowed(c) || c == ':')
            } else {
                part.chars().all(allowed)
            };
            if !ok {
                return Err(invalid(raw, &format!("{} contains invalid characters", label)));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host != PathsConfig::DEFAULT_REGISTRY {
            write!(f, "{}/{}/{}:{}", self.host, self.namespace, self.model, self.tag)
        } else if self.namespace != PathsConfig::DEFAULT_NAMESPACE {
            write!(f, "{}/{}:{}", self.namespace, self.model, self.tag)
        } else {
            write!(f, "{}:{}", self.model, self.tag)
        }
    }
}

impl std::str::FromStr for ModelName {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Canonical form of a name, or the trimmed input when it does not parse.
pub(crate) fn canonical(raw: &str) -> String {
    ModelName::parse(raw)
        .map(|n| n.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn invalid(raw: &str, reason: &str) -> KeeperError {
    KeeperError::InvalidName {
        name: raw.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_canonicalize() {
        assert_eq!(ModelName::parse("llama3").unwrap().to_string(), "llama3:latest");
        assert_eq!(ModelName::parse("llama3.2:3b").unwrap().to_string(), "llama3.2:3b");
        assert_eq!(
            ModelName::parse("someone/coder:7b").unwrap().to_string(),
            "someone/coder:7b"
        );
    }

    #[test]
    fn test_host_with_port_is_not_a_tag() {
        let name = ModelName::parse("localhost:5000/team/model").unwrap();
        assert_eq!(name.host, "localhost:5000");
        assert_eq!(name.tag, "latest");
        assert_eq!(name.to_string(), "localhost:5000/team/model:latest");
    }

    #[test]
    fn test_rejects_traversal_and_garbage() {
        assert!(ModelName::parse("").is_err());
        assert!(ModelName::parse("../etc:passwd").is_err());
        assert!(ModelName::parse("a/b/c/d:e").is_err());
        assert!(ModelName::parse("bad name").is_err());
    }

    #[test]
    fn test_manifest_path_round_trip() {
        let name = ModelName::parse("qwen2.5:0.5b").unwrap();
        let rel = name.manifest_relative_path();
        assert_eq!(
            rel,
            PathBuf::from("registry.ollama.ai/library/qwen2.5/0.5b")
        );
        assert_eq!(ModelName::from_manifest_path(&rel), Some(name));
    }

    #[test]
    fn test_manifest_path_wrong_depth() {
        assert_eq!(ModelName::from_manifest_path(Path::new("library/x/latest")), None);
        assert_eq!(ModelName::from_manifest_path(Path::new(".DS_Store")), None);
    }

    #[test]
    fn test_canonical_falls_back_to_input() {
        assert_eq!(canonical(" mistral "), "mistral:latest");
        assert_eq!(canonical("a/b/c/d"), "a/b/c/d");
    }
}
