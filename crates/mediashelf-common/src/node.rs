//! The persisted library tree.
//!
//! A [`Node`] is one file or directory under the library root. The whole tree
//! is stored as an ordered `Vec<Node>` (the root's children) and replaced
//! wholesale on every sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::ids::NodeId;

/// Codec label used for directory aggregates.
pub const MIXED_CODEC: &str = "mixed";

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
        }
    }
}

/// Technical information about a video file, or the aggregate over a
/// directory's children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds.
    pub duration: f64,
    /// Display codec name (e.g. "H.264"), or [`MIXED_CODEC`] for directories.
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

impl MediaInfo {
    /// Aggregate media info for a directory whose children sum to `duration`.
    pub fn aggregate(duration: f64) -> Self {
        Self {
            duration,
            codec: MIXED_CODEC.to_string(),
            width: 0,
            height: 0,
        }
    }
}

/// A subtitle track attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtitle {
    pub label: String,
    pub language: String,
    pub path: PathBuf,
}

/// The kind of TMDB record a node was enriched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
    Season,
    Episode,
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "tv" => Ok(MediaKind::Tv),
            "season" => Ok(MediaKind::Season),
            "episode" => Ok(MediaKind::Episode),
            other => Err(format!("Invalid type for Sync: {other}")),
        }
    }
}

/// Workflow state shown alongside a node's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataState {
    Unset,
    #[serde(rename = "Sync TMDB")]
    SyncTmdb,
    #[serde(rename = "Manual Set")]
    ManualSet,
    #[serde(rename = "Extract Subs")]
    ExtractSubs,
    #[serde(rename = "Set Subs")]
    SetSubs,
}

/// User-requested enrichment attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub tmdb_id: String,
    pub title: String,
    pub rating: f64,
    pub year: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    /// Relative path of the locally stored poster image.
    #[serde(default)]
    pub poster: Option<String>,
    /// Runtime in minutes.
    pub runtime: u32,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub state: Option<MetadataState>,
}

/// One file or directory in the library tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub path: PathBuf,
    /// Size in bytes; the sum of children for directories.
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetaData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
}

impl Node {
    /// A freshly discovered node with a new id and no cached fields.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: NodeKind,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            path: path.into(),
            size: 0,
            modified_at,
            children: Vec::new(),
            metadata: None,
            media_info: None,
            subtitles: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Probed or aggregated duration in seconds, 0 when unknown.
    pub fn duration(&self) -> f64 {
        self.media_info.as_ref().map(|m| m.duration).unwrap_or(0.0)
    }
}

/// Find a node anywhere in the tree by id (depth-first).
pub fn find_by_id(nodes: &[Node], id: NodeId) -> Option<&Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_by_id(&node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Mutable variant of [`find_by_id`].
pub fn find_by_id_mut(nodes: &mut [Node], id: NodeId) -> Option<&mut Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_by_id_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

/// All file nodes in document order.
pub fn flatten_files(nodes: &[Node]) -> Vec<&Node> {
    fn walk<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
        for node in nodes {
            if node.is_file() {
                out.push(node);
            }
            walk(&node.children, out);
        }
    }

    let mut out = Vec::new();
    walk(nodes, &mut out);
    out
}

/// Map every node's path to the node, for path-based lookup during a sync.
pub fn index_by_path(nodes: &[Node]) -> HashMap<&Path, &Node> {
    fn walk<'a>(nodes: &'a [Node], out: &mut HashMap<&'a Path, &'a Node>) {
        for node in nodes {
            out.insert(node.path.as_path(), node);
            walk(&node.children, out);
        }
    }

    let mut out = HashMap::new();
    walk(nodes, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, path: &str) -> Node {
        Node::new(name, path, NodeKind::File, Utc::now())
    }

    fn sample_tree() -> Vec<Node> {
        let mut season = Node::new("S01", "/lib/S01", NodeKind::Directory, Utc::now());
        season.children = vec![file("e1.mp4", "/lib/S01/e1.mp4"), file("e2.mp4", "/lib/S01/e2.mp4")];
        vec![file("movie.mkv", "/lib/movie.mkv"), season]
    }

    #[test]
    fn test_find_by_id_nested() {
        let tree = sample_tree();
        let target = tree[1].children[1].id;
        let found = find_by_id(&tree, target).unwrap();
        assert_eq!(found.name, "e2.mp4");
        assert!(find_by_id(&tree, NodeId::new()).is_none());
    }

    #[test]
    fn test_find_by_id_mut_updates_in_place() {
        let mut tree = sample_tree();
        let target = tree[1].children[0].id;
        find_by_id_mut(&mut tree, target).unwrap().size = 42;
        assert_eq!(tree[1].children[0].size, 42);
    }

    #[test]
    fn test_flatten_files_skips_directories() {
        let tree = sample_tree();
        let names: Vec<_> = flatten_files(&tree).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["movie.mkv", "e1.mp4", "e2.mp4"]);
    }

    #[test]
    fn test_index_by_path_includes_directories() {
        let tree = sample_tree();
        let index = index_by_path(&tree);
        assert_eq!(index.len(), 4);
        assert!(index[Path::new("/lib/S01")].is_dir());
        assert_eq!(index[Path::new("/lib/S01/e1.mp4")].name, "e1.mp4");
    }

    #[test]
    fn test_node_serde_shape() {
        let node = file("movie.mkv", "/lib/movie.mkv");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "file");
        assert!(json.get("metadata").is_none());
        assert!(json.get("media_info").is_none());

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_metadata_state_names() {
        let json = serde_json::to_string(&MetadataState::SyncTmdb).unwrap();
        assert_eq!(json, "\"Sync TMDB\"");
        let state: MetadataState = serde_json::from_str("\"Set Subs\"").unwrap();
        assert_eq!(state, MetadataState::SetSubs);
    }

    #[test]
    fn test_media_kind_from_str() {
        assert_eq!("season".parse::<MediaKind>().unwrap(), MediaKind::Season);
        assert!("album".parse::<MediaKind>().is_err());
    }
}
