//! Library browsing, root drive and metadata routes.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use mediashelf_common::{Error, NodeId};
use serde::Deserialize;
use serde_json::json;

use super::{ApiResult, AppContext};
use crate::library::{self, MediaQuery};
use crate::metadata::{self, MetaRequest};

pub fn library_routes() -> Router<AppContext> {
    Router::new()
        .route("/root-drive", put(set_root_drive))
        .route("/files", get(get_files))
        .route("/media", get(get_media))
        .route("/meta/:id", put(update_meta))
}

/// Parse a node id path or query segment; malformed ids are unknown ids.
pub(crate) fn parse_id(raw: &str) -> Result<NodeId, Error> {
    raw.parse().map_err(|_| Error::not_found("node", raw))
}

#[derive(Debug, Deserialize)]
pub struct RootDriveRequest {
    #[serde(default)]
    pub drive: Option<String>,
}

pub async fn set_root_drive(
    State(ctx): State<AppContext>,
    Json(body): Json<RootDriveRequest>,
) -> ApiResult<impl IntoResponse> {
    let root = library::set_root_drive(&ctx.store, body.drive.as_deref())?;
    Ok(Json(json!({
        "message": "Root drive updated",
        "drive": root,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub uuid: Option<String>,
}

pub async fn get_files(
    State(ctx): State<AppContext>,
    Query(query): Query<FilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = match query.uuid.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_id(raw)?),
        None => None,
    };
    let tree = ctx.store.load_tree()?;
    let body = serde_json::to_value(library::files_view(&tree, id)?)
        .map_err(|e| Error::internal(e.to_string()))?;
    Ok(Json(body))
}

pub async fn get_media(
    State(ctx): State<AppContext>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<impl IntoResponse> {
    let tree = ctx.store.load_tree()?;
    let media: Vec<_> = query.filter(&tree).into_iter().cloned().collect();
    Ok(Json(media))
}

pub async fn update_meta(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(body): Json<MetaRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let node = metadata::update_meta(&ctx.store, ctx.details.as_deref(), id, &body).await?;
    Ok(Json(json!({ "success": true, "node": node })))
}
