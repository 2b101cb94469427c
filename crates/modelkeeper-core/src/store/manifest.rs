//! Manifest documents.

use super::layout::blob_file_name;
use serde::{Deserialize, Serialize};

/// A reference to one content blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRef {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: String,
    pub size: u64,
}

/// The structured document stored for each artifact.
///
/// Only `layers` is required. The optional `config` blob is tracked by the
/// serving process but is not counted toward an artifact's size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<LayerRef>,
    pub layers: Vec<LayerRef>,
}

impl Manifest {
    /// Parse and validate a manifest.
    ///
    /// The error string is meant for display on a Corrupted status.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| format!("unreadable manifest: {}", e))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks beyond what the JSON shape enforces.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (index, layer) in self.layers.iter().enumerate() {
            if blob_file_name(&layer.digest).is_none() {
                return Err(format!(
                    "layer {} has an invalid digest '{}'",
                    index, layer.digest
                ));
            }
        }
        if self.total_size().is_none() {
            return Err("layer sizes overflow the total size".to_string());
        }
        Ok(())
    }

    /// Sum of layer sizes, `None` if it does not fit in a `u64`.
    pub fn total_size(&self) -> Option<u64> {
        self.layers
            .iter()
            .try_fold(0u64, |total, layer| total.checked_add(layer.size))
    }
}
