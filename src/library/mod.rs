//! Read-side views over the library tree and the root drive setting.

use mediashelf_common::{find_by_id, flatten_files, Error, MediaKind, Node, NodeId, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::{LibraryConfig, NodeStore};

/// Filters for the media listing. Empty strings count as unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaQuery {
    pub search: Option<String>,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub country: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl MediaQuery {
    fn matches(&self, node: &Node) -> bool {
        let Some(meta) = &node.metadata else {
            return false;
        };
        if !matches!(meta.kind, MediaKind::Movie | MediaKind::Tv) {
            return false;
        }

        if let Some(search) = non_empty(&self.search) {
            let needle = search.to_lowercase();
            if !node.name.to_lowercase().contains(&needle)
                && !meta.title.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(genre) = non_empty(&self.genre) {
            if !meta.genres.iter().any(|g| g == genre) {
                return false;
            }
        }
        if let Some(year) = non_empty(&self.year) {
            if meta.year != year {
                return false;
            }
        }
        if let Some(country) = non_empty(&self.country) {
            if !meta.countries.iter().any(|c| c == country) {
                return false;
            }
        }
        true
    }

    /// Files with movie or tv metadata matching every set filter, in tree order.
    pub fn filter<'a>(&self, tree: &'a [Node]) -> Vec<&'a Node> {
        flatten_files(tree)
            .into_iter()
            .filter(|n| self.matches(n))
            .collect()
    }
}

/// Result of a files lookup.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FilesView<'a> {
    /// The whole tree, or a directory's children.
    List(&'a [Node]),
    /// A single file node.
    File(&'a Node),
}

/// Whole tree for `None`, a directory's children, or the file itself.
pub fn files_view(tree: &[Node], id: Option<NodeId>) -> Result<FilesView<'_>> {
    let Some(id) = id else {
        return Ok(FilesView::List(tree));
    };
    let node = find_by_id(tree, id).ok_or_else(|| Error::not_found("node", id))?;
    Ok(if node.is_dir() {
        FilesView::List(&node.children)
    } else {
        FilesView::File(node)
    })
}

/// Persist a new library root.
pub fn set_root_drive(store: &NodeStore, drive: Option<&str>) -> Result<PathBuf> {
    let drive = drive
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| Error::invalid_input("Drive is required"))?;
    let root = PathBuf::from(drive);

    let mut config = store.load_library_config()?;
    config.root_drive = Some(root.clone());
    store.save_library_config(&config)?;

    tracing::info!(root = %root.display(), "Root drive updated");
    Ok(root)
}

/// The configured root, if any.
pub fn root_drive(store: &NodeStore) -> Result<Option<PathBuf>> {
    let LibraryConfig { root_drive } = store.load_library_config()?;
    Ok(root_drive)
}
