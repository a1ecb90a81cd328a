use axum::{
    extract::{Multipart, Path, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use mediashelf_common::{find_by_id, Error, Subtitle};
use std::path::PathBuf;

use super::routes_library::parse_id;
use super::sse::progress_sse;
use super::{ApiResult, AppContext};
use crate::subtitles;

pub fn subtitle_routes() -> Router<AppContext> {
    Router::new()
        .route("/subtitles/temp/:id", get(list_temp_subtitles))
        .route("/subtitles/extract/:id", get(extract_subtitles))
        .route("/subtitles/:id", put(update_subtitles))
}

pub async fn list_temp_subtitles(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let found = subtitles::list_temp(&ctx.store.temp_dir(), id).await?;
    Ok(Json(found))
}

pub async fn extract_subtitles(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let tree = ctx.store.load_tree()?;
    let node = find_by_id(&tree, id)
        .filter(|n| n.is_file())
        .cloned()
        .ok_or_else(|| Error::not_found("file", id))?;

    let events = subtitles::extract_embedded(ctx.tools.clone(), node, ctx.store.temp_dir());
    Ok(progress_sse(events))
}

#[derive(Debug, Default)]
struct SubtitleForm {
    upload: Option<(String, Vec<u8>)>,
    label: Option<String>,
    language: Option<String>,
    extracted_path: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<SubtitleForm, Error> {
    let bad = |e: axum::extract::multipart::MultipartError| Error::invalid_input(e.to_string());
    let mut form = SubtitleForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "subtitle" => {
                let file_name = field.file_name().unwrap_or("subtitle.srt").to_string();
                let data = field.bytes().await.map_err(bad)?;
                form.upload = Some((file_name, data.to_vec()));
            }
            "label" => form.label = Some(field.text().await.map_err(bad)?),
            "language" => form.language = Some(field.text().await.map_err(bad)?),
            "extracted_path" => form.extracted_path = Some(field.text().await.map_err(bad)?),
            _ => {}
        }
    }
    Ok(form)
}

fn given(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Attach an uploaded or previously extracted subtitle to a node.
pub async fn update_subtitles(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let form = read_form(multipart).await?;

    if find_by_id(&ctx.store.load_tree()?, id).is_none() {
        return Err(Error::not_found("node", id).into());
    }

    let language = given(form.language).unwrap_or_else(|| "unknown".to_string());
    let subtitle = match (form.upload, given(form.extracted_path)) {
        (Some((file_name, data)), _) => {
            let path = subtitles::save_upload(&ctx.store.uploads_dir(), &file_name, &data).await?;
            Subtitle {
                label: given(form.label).unwrap_or(file_name),
                language,
                path,
            }
        }
        (None, Some(raw)) => {
            let path = PathBuf::from(raw);
            if path.parent() != Some(ctx.store.temp_dir().as_path()) {
                return Err(Error::invalid_input("extracted_path must point into the temp directory").into());
            }
            Subtitle {
                label: given(form.label).unwrap_or_else(|| "Extracted".to_string()),
                language,
                path,
            }
        }
        (None, None) => {
            return Err(Error::invalid_input("No subtitle file or extracted_path provided").into())
        }
    };

    tracing::info!(node = %id, label = %subtitle.label, "Attaching subtitle");
    let node = subtitles::attach(&ctx.store, id, subtitle)?;
    Ok(Json(node))
}
