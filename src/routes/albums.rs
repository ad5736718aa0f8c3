use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use validator::Validate;

use crate::error::{AppError, AppResult, OptionExt};
use crate::extract::{Json, Path, Query};
use crate::middleware::rate_limit::endpoint;
use crate::middleware::RateLimitKey;
use crate::routes::uploads::{next_file_field, percent_decode, store_image, upload_name};
use crate::routes::{Middleware, Route, Routes};
use crate::state::AppState;
use crate::storage::{archive_file_name, extname, remove_if_exists};
use crate::types::{
    new_id, now_ms, Album, AlbumChanges, AlbumDetail, AlbumQuery, CreateAlbumRequest, FileLocation, IdsRequest,
    MediaFile, NewAlbum, UpdateAlbumRequest,
};

const NAME_TAKEN: &str = "An album with that name already exists.";

pub struct Albums;

impl Route for Albums {
    fn path(&self) -> &'static str {
        "/albums"
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[Middleware::Auth]
    }

    fn routes(&self) -> Routes {
        let guarded = Router::new()
            .route("/", get(list_albums).post(create_album).delete(delete_albums))
            .route("/{id}", get(get_album).put(update_album).delete(delete_album))
            .route("/{id}/cover/upload", post(upload_cover).delete(delete_cover));
        let open = Router::new().route("/{id}/download", get(download_archive));
        Routes::guarded(guarded).with_open(open)
    }
}

async fn list_albums(State(state): State<AppState>, Query(query): Query<AlbumQuery>) -> AppResult<Json<Vec<Album>>> {
    Ok(Json(state.db.get_albums(&query).await?))
}

fn required_name(name: Option<&str>) -> AppResult<String> {
    let name = name.ok_or_else(|| AppError::BadRequest("Missing \"name\" field from request body.".to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("An invalid name was provided. The name must not be empty.".to_string()));
    }
    Ok(name.to_string())
}

async fn create_album(
    State(state): State<AppState>,
    key: RateLimitKey,
    Json(body): Json<CreateAlbumRequest>,
) -> AppResult<(StatusCode, Json<Album>)> {
    state.rate_limiter.check_endpoint_limit(endpoint::CREATE_ALBUM, &key).await?;
    let name = required_name(body.name.as_deref())?;
    body.validate()?;

    if state.db.find_album_by_name(&name).await?.is_some() {
        return Err(AppError::Conflict(NAME_TAKEN.to_string()));
    }

    let now = now_ms();
    let draft = body.draft.unwrap_or(false);
    let album = NewAlbum {
        id: new_id(),
        name,
        draft,
        hidden: body.hidden.unwrap_or(false),
        nsfw: body.nsfw.unwrap_or(false),
        favorite: body.favorite.unwrap_or(false),
        featured: body.featured.unwrap_or(false),
        posted_at: if draft { None } else { Some(now) },
        created_at: now,
    };
    state.db.insert_album(&album).await.map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(NAME_TAKEN.to_string()),
        other => other,
    })?;

    tracing::info!(album = %album.name, id = %album.id, "Album created");
    let created = state.db.get_album_by_id(&album.id).await?.ok_or_not_found("Album")?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_album(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<AlbumDetail>> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;
    let images = state.db.get_album_files(&album.id).await?;
    Ok(Json(AlbumDetail { album, images }))
}

/// Builds the update from the fields that differ from the stored album.
fn album_changes(album: &Album, name: &str, body: &UpdateAlbumRequest, now: i64) -> AlbumChanges {
    let differs = |requested: Option<bool>, current: bool| requested.filter(|v| *v != current);

    let mut changes = AlbumChanges {
        name: (name != album.name).then(|| name.to_string()),
        draft: differs(body.draft, album.draft),
        hidden: differs(body.hidden, album.hidden),
        nsfw: differs(body.nsfw, album.nsfw),
        favorite: differs(body.favorite, album.favorite),
        featured: differs(body.featured, album.featured),
        posted_at: None,
    };
    if changes.draft == Some(false) && album.posted_at.is_none() {
        changes.posted_at = Some(now);
    }
    changes
}

async fn update_album(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateAlbumRequest>,
) -> AppResult<Json<Album>> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;
    let name = required_name(body.name.as_deref())?;
    body.validate()?;

    if name.to_lowercase() != album.name.to_lowercase() {
        if let Some(taken) = state.db.find_album_by_name(&name).await? {
            if taken.id != album.id {
                return Err(AppError::Conflict("Album name already taken.".to_string()));
            }
        }
    }

    let now = now_ms();
    let changes = album_changes(&album, &name, &body, now);
    if changes.is_empty() {
        return Err(AppError::BadRequest("No changes were made to the album.".to_string()));
    }

    let updated = state.db.update_album(&album.id, &changes, now).await.map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("Album name already taken.".to_string()),
        other => other,
    })?;
    if !updated {
        return Err(AppError::NotFound("Album not found".to_string()));
    }

    if let Some(new_name) = &changes.name {
        let from = state.storage.archive_path(&album.name);
        let to = state.storage.archive_path(new_name);
        if from != to {
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not move archive {} to {}: {}", from.display(), to.display(), e),
            }
        }
    }

    Ok(Json(state.db.get_album_by_id(&album.id).await?.ok_or_not_found("Album")?))
}

async fn delete_album(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;
    purge_albums(&state, vec![album]).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /albums` with `{ids}`. Unknown ids fail the whole request before anything is deleted.
async fn delete_albums(State(state): State<AppState>, Json(body): Json<IdsRequest>) -> AppResult<StatusCode> {
    let mut albums = Vec::with_capacity(body.ids.len());
    for id in &body.ids {
        match state.db.get_album_by_id(id).await? {
            Some(album) => albums.push(album),
            None => return Err(AppError::NotFound(format!("Album '{}' not found", id))),
        }
    }
    purge_albums(&state, albums).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Removes albums with their records, owned files, uploaded covers and archives.
async fn purge_albums(state: &AppState, albums: Vec<Album>) -> AppResult<()> {
    let mut owned: Vec<MediaFile> = Vec::new();
    for album in &albums {
        owned.extend(state.db.get_album_files(&album.id).await?);
    }

    let ids: Vec<String> = albums.iter().map(|a| a.id.clone()).collect();
    let deleted = state.db.delete_albums(&ids).await?;

    // Uploaded covers belong to no album, so the cascade above leaves them behind.
    for album in &albums {
        let Some(cover_id) = &album.cover_id else { continue };
        if let Some(cover) = state.db.get_file_by_id(cover_id).await? {
            if cover.location == FileLocation::Covers {
                state.db.delete_file(&cover.id).await?;
                owned.push(cover);
            }
        }
    }

    for album in &albums {
        if let Err(e) = remove_if_exists(&state.storage.archive_path(&album.name)).await {
            tracing::warn!("Could not remove archive of {}: {}", album.name, e);
        }
    }
    for file in &owned {
        if let Err(e) = state.storage.remove_media(file.location, &file.name).await {
            tracing::warn!("Could not remove {} from disk: {}", file.name, e);
        }
    }

    state.metrics.add_albums_deleted(deleted as usize);
    state.metrics.add_files_deleted(owned.len());
    tracing::info!(albums = deleted, files = owned.len(), "Albums deleted");
    Ok(())
}

fn plain_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// `POST /albums/{id}/cover/upload`: stores a cover image and makes it the album cover.
/// Responds with the stored file name.
async fn upload_cover(State(state): State<AppState>, Path(id): Path<String>, mut multipart: Multipart) -> AppResult<Response> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;

    let field = next_file_field(&mut multipart).await?;
    let name = upload_name(&field)?;

    if let Some(existing) = state.db.find_file_by_name(&name).await? {
        let current = [album.cover_id.as_deref(), album.cover_fallback_id.as_deref()];
        if current.contains(&Some(existing.id.as_str())) {
            return Ok(plain_text(name));
        }
        return Err(AppError::Conflict("A file with this name already exists.".to_string()));
    }

    let dest = state.storage.file_path(FileLocation::Covers, &name);
    let stored = store_image(field, &dest).await?;

    let now = now_ms();
    let cover = MediaFile {
        id: new_id(),
        extname: extname(&name),
        name: name.clone(),
        format: Some(stored.info.format),
        size: stored.info.size as i64,
        metadata: Some(stored.info.dimensions),
        location: FileLocation::Covers,
        album_id: None,
        album: None,
        created_at: now,
        modified_at: now,
    };
    if let Err(e) = state.db.insert_file(&cover).await {
        if let Err(cleanup) = remove_if_exists(&stored.path).await {
            tracing::warn!("Could not remove orphaned cover {}: {}", cover.name, cleanup);
        }
        return Err(e.into());
    }
    state.db.set_album_cover(&album.id, Some(&cover.id)).await?;

    // The replaced upload is no longer referenced by anything.
    if let Some(previous) = album.cover.as_ref() {
        if let Some(previous) = state.db.get_file_by_id(&previous.id).await? {
            if previous.location == FileLocation::Covers {
                state.db.delete_file(&previous.id).await?;
                state.storage.remove_media(previous.location, &previous.name).await?;
            }
        }
    }

    state.metrics.record_upload(cover.size as u64);
    tracing::info!(album = %album.name, cover = %cover.name, "Album cover uploaded");
    Ok(plain_text(name))
}

/// `DELETE /albums/{id}/cover/upload` with the cover's file name as plain-text body.
async fn delete_cover(State(state): State<AppState>, Path(id): Path<String>, body: String) -> AppResult<StatusCode> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;
    let name = percent_decode(body.trim());
    let image = state
        .db
        .find_file_by_name(&name)
        .await?
        .ok_or_else(|| AppError::NotFound("Image not found.".to_string()))?;

    if album.cover_fallback_id.as_deref() == Some(image.id.as_str()) {
        return Ok(StatusCode::NO_CONTENT);
    }
    if album.cover_id.as_deref() != Some(image.id.as_str()) {
        return Err(AppError::NotFound("Image not found.".to_string()));
    }

    state.db.delete_file(&image.id).await?;
    state.db.set_album_cover(&album.id, None).await?;
    state.storage.remove_media(image.location, &image.name).await?;
    state.metrics.add_files_deleted(1);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /albums/{id}/download`: the album zip built by the archive task.
async fn download_archive(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let album = state.db.get_album_by_id(&id).await?.ok_or_not_found("Album")?;
    let path = state.storage.archive_path(&album.name);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("Archive not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", archive_file_name(&album.name))),
        ],
        Body::from(bytes),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album(draft: bool, posted_at: Option<i64>) -> Album {
        Album {
            id: "a1".into(),
            name: "Trip".into(),
            draft,
            hidden: false,
            nsfw: false,
            favorite: false,
            featured: false,
            cover_id: None,
            cover: None,
            cover_fallback_id: None,
            cover_fallback: None,
            file_count: 0,
            posted_at,
            created_at: 1,
            modified_at: 1,
        }
    }

    fn request(draft: Option<bool>, featured: Option<bool>) -> UpdateAlbumRequest {
        CreateAlbumRequest { name: Some("Trip".into()), draft, hidden: None, nsfw: None, favorite: None, featured }
    }

    #[test]
    fn unchanged_fields_produce_no_changes() {
        let changes = album_changes(&album(false, Some(5)), "Trip", &request(Some(false), Some(false)), 10);
        assert!(changes.is_empty());
    }

    #[test]
    fn first_publication_sets_posted_at() {
        let changes = album_changes(&album(true, None), "Trip", &request(Some(false), None), 10);
        assert_eq!(changes.draft, Some(false));
        assert_eq!(changes.posted_at, Some(10));

        let republished = album_changes(&album(true, Some(5)), "Trip", &request(Some(false), None), 10);
        assert_eq!(republished.posted_at, None);
    }

    #[test]
    fn featured_is_independent_of_favorite() {
        let changes = album_changes(&album(false, Some(5)), "Trip", &request(None, Some(true)), 10);
        assert_eq!(changes.featured, Some(true));
        assert_eq!(changes.favorite, None);
    }

    #[test]
    fn case_only_rename_is_a_change() {
        let changes = album_changes(&album(false, Some(5)), "trip", &request(None, None), 10);
        assert_eq!(changes.name.as_deref(), Some("trip"));
    }
}
