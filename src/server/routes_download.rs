//! File downloads and zip export.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use mediashelf_common::paths::content_type_for;
use mediashelf_common::{find_by_id, Error};
use tokio_util::io::ReaderStream;

use super::routes_library::parse_id;
use super::sse::progress_sse;
use super::{ApiResult, AppContext};
use crate::archive::{DeleteOnEof, OneShotBody};

pub fn download_routes() -> Router<AppContext> {
    Router::new()
        .route("/download/file/:id", get(download_file))
        .route("/download/dir/:id", get(download_dir))
        .route("/zip/create/:id", get(create_zip))
        .route("/download/temp/:filename", get(download_created_zip))
}

fn attachment(file_name: &str) -> String {
    let escaped: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}

fn file_response(body: Body, len: u64, content_type: &str, file_name: &str) -> ApiResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len.to_string())
        .header(header::CONTENT_DISPOSITION, attachment(file_name))
        .body(body)
        .map_err(|e| Error::internal(format!("failed to build response: {}", e)).into())
}

pub async fn download_file(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let tree = ctx.store.load_tree()?;
    let node = find_by_id(&tree, id)
        .filter(|n| n.is_file())
        .ok_or_else(|| Error::not_found("file", id))?;

    let file = tokio::fs::File::open(&node.path)
        .await
        .map_err(|e| Error::source_unreadable(&node.path, e))?;
    let len = file.metadata().await.map_err(Error::Io)?.len();

    file_response(
        Body::from_stream(ReaderStream::new(file)),
        len,
        content_type_for(&node.path),
        &node.name,
    )
}

/// Zip a directory at maximum compression and send it in one response.
pub async fn download_dir(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let tree = ctx.store.load_tree()?;
    let (archive, _) = ctx.archiver.build(&tree, id).await?;
    let name = find_by_id(&tree, id)
        .map(|n| n.name.clone())
        .unwrap_or_else(|| id.to_string());

    let (body, len) = OneShotBody::open(archive).await?;
    file_response(
        Body::from_stream(body),
        len,
        "application/zip",
        &format!("{}.zip", name),
    )
}

/// Start a zip job and stream its progress. Disconnecting cancels it.
pub async fn create_zip(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let tree = ctx.store.load_tree()?;
    let job = ctx.archiver.start(&tree, id)?;
    Ok(progress_sse(job))
}

/// Hand off a finished zip once; it is deleted after the last byte.
pub async fn download_created_zip(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let path = ctx
        .archiver
        .finished_archive(&filename)
        .ok_or_else(|| Error::not_found("archive", &filename))?;

    let (body, len) = DeleteOnEof::open(path).await?;
    file_response(Body::from_stream(body), len, "application/zip", &filename)
}
