//! Grouping a status snapshot into renderable rows.

use crate::catalog::Catalog;
use crate::models::{ListItem, ModelState, ModelStatus, StatusMap};

pub const INSTALLED: &str = "Installed";
pub const IN_PROGRESS: &str = "In progress";
pub const AVAILABLE: &str = "Available";

/// Group `snapshot` into sections.
///
/// Installed holds Complete artifacts; In progress holds Downloading,
/// Partial and Corrupted ones; Available holds the rest, catalog entries
/// first in catalog order. Empty sections are omitted and sections are
/// separated by a [`ListItem::Separator`].
pub fn build_list(snapshot: &StatusMap, catalog: &Catalog) -> Vec<ListItem> {
    let mut installed = Vec::new();
    let mut in_progress = Vec::new();
    let mut available = Vec::new();

    for entry in catalog.entries() {
        if let Some(status) = snapshot.get(&entry.name) {
            if status.state == ModelState::NotInstalled {
                available.push(status);
            }
        }
    }

    for status in snapshot.values() {
        match status.state {
            ModelState::Complete => installed.push(status),
            ModelState::Downloading | ModelState::Partial | ModelState::Corrupted => {
                in_progress.push(status)
            }
            ModelState::NotInstalled if !catalog.contains(&status.name) => available.push(status),
            ModelState::NotInstalled => {}
        }
    }

    let mut items = Vec::new();
    for (title, group) in [
        (INSTALLED, installed),
        (IN_PROGRESS, in_progress),
        (AVAILABLE, available),
    ] {
        push_section(&mut items, title, group);
    }
    items
}

fn push_section(items: &mut Vec<ListItem>, title: &str, group: Vec<&ModelStatus>) {
    if group.is_empty() {
        return;
    }
    if !items.is_empty() {
        items.push(ListItem::Separator);
    }
    items.push(ListItem::Header(title.to_string()));
    items.extend(group.into_iter().cloned().map(ListItem::Entry));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    fn status(name: &str, state: ModelState) -> (String, ModelStatus) {
        let mut status = ModelStatus::not_installed(name);
        status.state = state;
        (name.to_string(), status)
    }

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.into(),
            display_name: name.into(),
            size_label: String::new(),
            memory_label: String::new(),
            section: None,
        }
    }

    #[test]
    fn test_sections_and_separators() {
        let catalog = Catalog::from_entries([entry("zeta:latest"), entry("alpha:latest")]).unwrap();
        let snapshot = StatusMap::from([
            status("alpha:latest", ModelState::NotInstalled),
            status("zeta:latest", ModelState::NotInstalled),
            status("done:latest", ModelState::Complete),
            status("half:latest", ModelState::Partial),
        ]);

        let items = build_list(&snapshot, &catalog);
        let names: Vec<_> = items
            .iter()
            .map(|item| match item {
                ListItem::Header(title) => format!("# {title}"),
                ListItem::Separator => "--".to_string(),
                ListItem::Entry(status) => status.name.clone(),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "# Installed",
                "done:latest",
                "--",
                "# In progress",
                "half:latest",
                "--",
                "# Available",
                "zeta:latest",
                "alpha:latest",
            ]
        );
    }

    #[test]
    fn test_empty_snapshot_has_no_rows() {
        assert!(build_list(&StatusMap::new(), &Catalog::empty()).is_empty());
    }
}
