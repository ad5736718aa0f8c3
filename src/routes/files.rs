use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult, OptionExt};
use crate::extract::{Json, Path, Query};
use crate::imaging::{self, Fit, OutputFormat, TransformOptions};
use crate::routes::uploads::{next_file_field, percent_decode, store_image, upload_name};
use crate::routes::{Middleware, Route, Routes};
use crate::state::AppState;
use crate::storage::extname;
use crate::types::{new_id, now_ms, FileLocation, FileQuery, IdsRequest, MediaFile, RandomQuery, UploadQuery};

const DEFAULT_RANDOM_LIMIT: i64 = 10;
const MAX_RANDOM_LIMIT: i64 = 100;

pub struct Files;

impl Route for Files {
    fn path(&self) -> &'static str {
        "/files"
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[Middleware::Auth]
    }

    fn routes(&self) -> Routes {
        let guarded = Router::new()
            .route("/", get(list_files).delete(delete_files))
            .route("/upload", post(upload_file).delete(delete_upload))
            .route("/{key}", delete(delete_file));
        let open = Router::new()
            .route("/random", get(random_files))
            .route("/{key}", get(transform_file))
            .route("/{key}/download", get(download_file));
        Routes::guarded(guarded).with_open(open)
    }
}

async fn list_files(State(state): State<AppState>, Query(query): Query<FileQuery>) -> AppResult<Json<Vec<MediaFile>>> {
    Ok(Json(state.db.get_files(&query).await?))
}

async fn random_files(State(state): State<AppState>, Query(query): Query<RandomQuery>) -> AppResult<Json<Vec<MediaFile>>> {
    let limit = query.limit.unwrap_or(DEFAULT_RANDOM_LIMIT).clamp(1, MAX_RANDOM_LIMIT);
    Ok(Json(state.db.get_random_album_files(limit).await?))
}

/// `POST /files/upload?albumId=`: stores an image, its thumbnails and its record.
async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MediaFile>)> {
    // The album is resolved before anything touches the disk.
    let album_id = match query.album_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => Some(state.db.get_album_by_id(id).await?.ok_or_not_found("Album")?.id),
        None => None,
    };

    let field = next_file_field(&mut multipart).await?;
    let name = upload_name(&field)?;
    if state.db.find_file_by_name(&name).await?.is_some() {
        return Err(AppError::Conflict("A file with this name already exists.".to_string()));
    }

    let dest = state.storage.file_path(FileLocation::Files, &name);
    let stored = store_image(field, &dest).await?;

    let storage = state.storage.clone();
    let (source, thumb_name) = (stored.path.clone(), name.clone());
    let thumbnails = tokio::task::spawn_blocking(move || imaging::generate_thumbnails(&source, &storage, &thumb_name))
        .await
        .map_err(anyhow::Error::from)?;
    if let Err(e) = thumbnails {
        tracing::warn!("Could not generate thumbnails for {}: {}", name, e);
    }

    let now = now_ms();
    let file = MediaFile {
        id: new_id(),
        extname: extname(&name),
        name,
        format: Some(stored.info.format),
        size: stored.info.size as i64,
        metadata: Some(stored.info.dimensions),
        location: FileLocation::Files,
        album_id,
        album: None,
        created_at: now,
        modified_at: now,
    };

    // The bytes at `dest` were created by this request, so they go away with a failed insert.
    if let Err(e) = state.db.insert_file(&file).await {
        if let Err(cleanup) = state.storage.remove_media(FileLocation::Files, &file.name).await {
            tracing::warn!("Could not remove orphaned upload {}: {}", file.name, cleanup);
        }
        return Err(match AppError::from(e) {
            AppError::Conflict(_) => AppError::Conflict("A file with this name already exists.".to_string()),
            err => err,
        });
    }
    if let Some(album_id) = &file.album_id {
        state.db.touch_album(album_id).await?;
    }

    state.metrics.record_upload(file.size as u64);
    tracing::info!(file = %file.name, album = ?file.album_id, bytes = file.size, "File uploaded");
    Ok((StatusCode::CREATED, Json(file)))
}

/// `DELETE /files/upload` with the file name as plain-text body.
async fn delete_upload(State(state): State<AppState>, body: String) -> AppResult<StatusCode> {
    let name = percent_decode(body.trim());
    let file = state.db.find_file_by_name(&name).await?.ok_or_not_found("File")?;
    remove_file(&state, &file).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /files` with `{ids}`. Unknown ids fail the whole request before anything is deleted.
async fn delete_files(State(state): State<AppState>, Json(body): Json<IdsRequest>) -> AppResult<StatusCode> {
    let mut files = Vec::with_capacity(body.ids.len());
    for id in &body.ids {
        match state.db.get_file_by_id(id).await? {
            Some(file) => files.push(file),
            None => return Err(AppError::NotFound(format!("File '{}' not found", id))),
        }
    }

    let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
    let deleted = state.db.delete_files(&ids).await?;

    let mut albums: Vec<&str> = files.iter().filter_map(|f| f.album_id.as_deref()).collect();
    albums.sort_unstable();
    albums.dedup();
    for album_id in albums {
        state.db.touch_album(album_id).await?;
    }
    for file in &files {
        if let Err(e) = state.storage.remove_media(file.location, &file.name).await {
            tracing::warn!("Could not remove {} from disk: {}", file.name, e);
        }
    }

    state.metrics.add_files_deleted(deleted as usize);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_file(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    let file = state.db.get_file_by_id(&id).await?.ok_or_not_found("File")?;
    remove_file(&state, &file).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes the record (the database layer repairs album covers) and then the bytes on disk.
async fn remove_file(state: &AppState, file: &MediaFile) -> AppResult<()> {
    state.db.delete_file(&file.id).await?;
    if let Some(album_id) = &file.album_id {
        state.db.touch_album(album_id).await?;
    }
    state.storage.remove_media(file.location, &file.name).await?;
    state.metrics.add_files_deleted(1);
    tracing::info!(file = %file.name, "File deleted");
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct TransformQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Option<Fit>,
    pub format: Option<String>,
}

/// `GET /files/{name}`: the image resized and converted for this request.
async fn transform_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<TransformQuery>,
) -> AppResult<Response> {
    let file = state
        .db
        .find_file_by_name(&name)
        .await?
        .ok_or_else(|| AppError::NotFound("Image not found.".to_string()))?;

    let options = TransformOptions {
        width: query.width,
        height: query.height,
        fit: query.fit.unwrap_or_default(),
        format: OutputFormat::parse_or_default(query.format.as_deref()),
    };
    options.validate()?;

    let path = state.storage.file_path(file.location, &file.name);
    if !tokio::fs::try_exists(&path).await? {
        return Err(AppError::NotFound("Image not found.".to_string()));
    }
    let (bytes, content_type) = tokio::task::spawn_blocking(move || imaging::transform(&path, options))
        .await
        .map_err(anyhow::Error::from)??;

    state.metrics.inc_transforms();
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// `GET /files/{id}/download`: the original bytes as an attachment.
async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let file = state.db.get_file_by_id(&id).await?.ok_or_not_found("File")?;
    let path = state.storage.file_path(file.location, &file.name);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mime = mime_guess::from_path(&file.name).first_or_octet_stream();

    Ok((
        [
            (header::CONTENT_TYPE, mime.essence_str().to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file.name)),
        ],
        Body::from(bytes),
    )
        .into_response())
}
