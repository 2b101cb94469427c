//! Rows handed to a renderer.

use super::ModelStatus;
use serde::{Deserialize, Serialize};

/// One row of a rendered model list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ListItem {
    Header(String),
    Separator,
    Entry(ModelStatus),
}

impl ListItem {
    pub fn as_entry(&self) -> Option<&ModelStatus> {
        match self {
            ListItem::Entry(status) => Some(status),
            _ => None,
        }
    }
}
