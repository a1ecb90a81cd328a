use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;

use super::routes_library::parse_id;
use super::{ApiResult, AppContext};
use crate::delivery::parse_start_offset;

pub fn stream_routes() -> Router<AppContext> {
    Router::new().route("/stream/:id", get(stream_media))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub start: Option<String>,
}

/// Range-served bytes for browser-playable files, a live transcode otherwise.
pub async fn stream_media(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let start = parse_start_offset(query.start.as_deref());

    let tree = ctx.store.load_tree()?;
    let delivery = ctx.delivery.serve(&tree, id, range, start).await?;
    Ok(delivery)
}
