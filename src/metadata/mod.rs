//! Metadata enrichment of library nodes from TMDB.

mod tmdb;

pub use tmdb::TmdbClient;

use async_trait::async_trait;
use bytes::Bytes;
use mediashelf_common::{find_by_id, find_by_id_mut, Error, MediaKind, MetaData, MetadataState, Node, NodeId, Result};
use serde::Deserialize;
use std::path::Path;

use crate::store::NodeStore;

/// Which TMDB record to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailsQuery {
    pub kind: MediaKind,
    pub tmdb_id: String,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
}

/// The fields of a TMDB record that end up on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Details {
    pub title: String,
    pub year: String,
    pub genres: Vec<String>,
    pub countries: Vec<String>,
    /// Remote image path (e.g. `/abc.jpg`), if the record has one.
    pub poster_path: Option<String>,
    pub rating: f64,
    pub runtime: u32,
}

#[async_trait]
pub trait DetailsFetcher: Send + Sync {
    async fn fetch_details(&self, query: &DetailsQuery) -> Result<Details>;

    async fn fetch_poster(&self, poster_path: &str) -> Result<Bytes>;
}

/// Body of a metadata update request.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "tmdbId")]
    pub tmdb_id: serde_json::Value,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub state: Option<MetadataState>,
}

impl MetaRequest {
    fn query(&self) -> Result<DetailsQuery> {
        let kind: MediaKind = self.kind.parse().map_err(Error::InvalidInput)?;
        let tmdb_id = match &self.tmdb_id {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return Err(Error::invalid_input("tmdb_id is required")),
        };
        Ok(DetailsQuery {
            kind,
            tmdb_id,
            season_number: self.season_number,
            episode_number: self.episode_number,
        })
    }
}

/// Fetch details for node `id`, store its poster locally, and persist the
/// resulting metadata on the node.
pub async fn update_meta(
    store: &NodeStore,
    fetcher: Option<&dyn DetailsFetcher>,
    id: NodeId,
    request: &MetaRequest,
) -> Result<Node> {
    let previous_poster = {
        let tree = store.load_tree()?;
        let node = find_by_id(&tree, id).ok_or_else(|| Error::not_found("node", id))?;
        node.metadata.as_ref().and_then(|m| m.poster.clone())
    };

    let query = request.query()?;
    let fetcher = fetcher.ok_or_else(|| Error::upstream("TMDB token missing"))?;
    let details = fetcher.fetch_details(&query).await?;

    let poster = match &details.poster_path {
        Some(remote) => Some(save_poster(store, fetcher, id, remote).await?),
        None => previous_poster,
    };

    let metadata = MetaData {
        kind: query.kind,
        tmdb_id: query.tmdb_id,
        title: details.title,
        rating: details.rating,
        year: details.year,
        genres: details.genres,
        countries: details.countries,
        poster,
        runtime: details.runtime,
        season_number: query.season_number,
        episode_number: query.episode_number,
        state: request.state,
    };

    let node = store.update_tree(|tree| {
        let node = find_by_id_mut(tree, id).ok_or_else(|| Error::not_found("node", id))?;
        node.metadata = Some(metadata);
        Ok(node.clone())
    })?;

    tracing::info!(node = %id, title = ?node.metadata.as_ref().map(|m| &m.title), "Metadata updated");
    Ok(node)
}

async fn save_poster(
    store: &NodeStore,
    fetcher: &dyn DetailsFetcher,
    id: NodeId,
    remote: &str,
) -> Result<String> {
    let ext = Path::new(remote)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("jpg");
    let file_name = format!("{}.{}", id, ext);

    let bytes = fetcher.fetch_poster(remote).await?;
    tokio::fs::write(store.posters_dir().join(&file_name), &bytes).await?;

    Ok(format!("images/posters/{}", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mediashelf_common::NodeKind;
    use parking_lot::Mutex;

    struct FakeTmdb {
        details: Details,
        queries: Mutex<Vec<DetailsQuery>>,
    }

    impl FakeTmdb {
        fn new(poster_path: Option<&str>) -> Self {
            Self {
                details: Details {
                    title: "Arrival".into(),
                    year: "2016".into(),
                    genres: vec!["Drama".into()],
                    countries: vec!["United States of America".into()],
                    poster_path: poster_path.map(String::from),
                    rating: 7.6,
                    runtime: 116,
                },
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DetailsFetcher for FakeTmdb {
        async fn fetch_details(&self, query: &DetailsQuery) -> Result<Details> {
            self.queries.lock().push(query.clone());
            Ok(self.details.clone())
        }

        async fn fetch_poster(&self, _poster_path: &str) -> Result<Bytes> {
            Ok(Bytes::from_static(b"\x89PNG"))
        }
    }

    fn store_with_node() -> (tempfile::TempDir, NodeStore, NodeId) {
        let dir = tempfile::tempdir().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();
        let node = Node::new("arrival.mkv", "/lib/arrival.mkv", NodeKind::File, Utc::now());
        let id = node.id;
        store.save_tree(&[node]).unwrap();
        (dir, store, id)
    }

    fn request(kind: &str) -> MetaRequest {
        serde_json::from_value(serde_json::json!({
            "type": kind,
            "tmdb_id": "329865",
            "state": "Sync TMDB"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_meta_persists_and_saves_poster() {
        let (_dir, store, id) = store_with_node();
        let tmdb = FakeTmdb::new(Some("/poster.png"));

        let node = update_meta(&store, Some(&tmdb), id, &request("movie")).await.unwrap();
        let meta = node.metadata.unwrap();
        assert_eq!(meta.kind, MediaKind::Movie);
        assert_eq!(meta.tmdb_id, "329865");
        assert_eq!(meta.title, "Arrival");
        assert_eq!(meta.state, Some(MetadataState::SyncTmdb));
        assert_eq!(meta.poster.as_deref(), Some(format!("images/posters/{}.png", id).as_str()));
        assert!(store.posters_dir().join(format!("{}.png", id)).exists());

        let stored = store.load_tree().unwrap();
        assert_eq!(stored[0].metadata.as_ref().unwrap().title, "Arrival");
    }

    #[tokio::test]
    async fn test_numeric_tmdb_id_accepted() {
        let (_dir, store, id) = store_with_node();
        let tmdb = FakeTmdb::new(None);
        let req: MetaRequest =
            serde_json::from_value(serde_json::json!({"type": "tv", "tmdbId": 1399})).unwrap();
        update_meta(&store, Some(&tmdb), id, &req).await.unwrap();
        assert_eq!(tmdb.queries.lock()[0].tmdb_id, "1399");
    }

    #[tokio::test]
    async fn test_invalid_type_rejected() {
        let (_dir, store, id) = store_with_node();
        let tmdb = FakeTmdb::new(None);
        let err = update_meta(&store, Some(&tmdb), id, &request("album")).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (_dir, store, id) = store_with_node();
        let err = update_meta(&store, None, id, &request("movie")).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (_dir, store, _id) = store_with_node();
        let tmdb = FakeTmdb::new(None);
        let err = update_meta(&store, Some(&tmdb), NodeId::new(), &request("movie"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
