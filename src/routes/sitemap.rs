use axum::{extract::State, routing::get, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::extract::Json;
use crate::routes::{Route, Routes};
use crate::state::AppState;
use crate::types::{Album, AlbumQuery, AlbumSort, MediaFile, SortOrder};

pub struct Sitemap;

impl Route for Sitemap {
    fn path(&self) -> &'static str {
        "/sitemap"
    }

    fn routes(&self) -> Routes {
        Routes::open(Router::new().route("/", get(sitemap)))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SitemapImage {
    pub loc: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub changefreq: &'static str,
    pub lastmod: String,
    pub priority: f32,
    pub images: Vec<SitemapImage>,
}

fn sitemap_entry(album: &Album, images: &[MediaFile], cdn_base_url: &str) -> SitemapEntry {
    let cdn = cdn_base_url.trim_end_matches('/');
    let lastmod = DateTime::<Utc>::from_timestamp_millis(album.modified_at)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    SitemapEntry {
        loc: format!("/albums/{}", album.id),
        changefreq: "monthly",
        lastmod,
        priority: 0.8,
        images: images.iter().map(|f| SitemapImage { loc: format!("{}/{}", cdn, f.name) }).collect(),
    }
}

/// `GET /sitemap`: every public album with its images, by album name.
async fn sitemap(State(state): State<AppState>) -> AppResult<Json<Vec<SitemapEntry>>> {
    let query = AlbumQuery { public_only: true, sort: Some(AlbumSort::Name), order: SortOrder::Asc, ..Default::default() };
    let albums = state.db.get_albums(&query).await?;

    let mut entries = Vec::with_capacity(albums.len());
    for album in &albums {
        let images = state.db.get_album_files(&album.id).await?;
        entries.push(sitemap_entry(album, &images, &state.config.sitemap.cdn_base_url));
    }
    Ok(Json(entries))
}
