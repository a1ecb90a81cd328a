//! JSON document persistence under the data directory.
//!
//! Layout:
//!
//! ```text
//! <data_dir>/files.json        the library tree
//! <data_dir>/config.json       {"root_drive": ...}
//! <data_dir>/images/posters/   downloaded posters
//! <data_dir>/temp/             finished zips, extracted subtitles
//! <data_dir>/uploads/          uploaded subtitle files
//! ```

use mediashelf_common::{Error, Node, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const TREE_FILE: &str = "files.json";
const LIBRARY_CONFIG_FILE: &str = "config.json";

/// Library settings editable at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub root_drive: Option<PathBuf>,
}

/// Reads and writes the tree and library config documents.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so a crash never leaves a truncated document. Read-modify-write
/// cycles are serialized by an internal lock.
pub struct NodeStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl NodeStore {
    /// Open a store rooted at `data_dir`, creating its directories.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        };
        store.ensure_layout()?;
        Ok(store)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.posters_dir(),
            self.temp_dir(),
            self.uploads_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::persistence(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tree_path(&self) -> PathBuf {
        self.data_dir.join(TREE_FILE)
    }

    pub fn library_config_path(&self) -> PathBuf {
        self.data_dir.join(LIBRARY_CONFIG_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn posters_dir(&self) -> PathBuf {
        self.images_dir().join("posters")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Load the tree; a missing document is an empty library.
    pub fn load_tree(&self) -> Result<Vec<Node>> {
        Ok(read_json(&self.tree_path())?.unwrap_or_default())
    }

    /// Replace the tree wholesale.
    pub fn save_tree(&self, tree: &[Node]) -> Result<()> {
        let _guard = self.write_lock.lock();
        write_json(&self.tree_path(), &tree)
    }

    /// Load, modify and save the tree under the write lock.
    ///
    /// Nothing is written when `f` fails.
    pub fn update_tree<T>(&self, f: impl FnOnce(&mut Vec<Node>) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut tree: Vec<Node> = read_json(&self.tree_path())?.unwrap_or_default();
        let out = f(&mut tree)?;
        write_json(&self.tree_path(), &tree)?;
        Ok(out)
    }

    pub fn load_library_config(&self) -> Result<LibraryConfig> {
        Ok(read_json(&self.library_config_path())?.unwrap_or_default())
    }

    pub fn save_library_config(&self, config: &LibraryConfig) -> Result<()> {
        let _guard = self.write_lock.lock();
        write_json(&self.library_config_path(), config)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::persistence(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::persistence(format!("Failed to parse {}: {}", path.display(), e)))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::persistence(format!("Failed to serialize {}: {}", path.display(), e)))?;

    let persist = || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };

    persist().map_err(|e| Error::persistence(format!("Failed to write {}: {}", path.display(), e)))?;
    tracing::trace!(path = %path.display(), bytes = json.len(), "Document written");
    Ok(())
}
