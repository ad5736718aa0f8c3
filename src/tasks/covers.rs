use async_trait::async_trait;

use super::{Task, TaskContext};

/// Keeps album cover references consistent: stale covers are cleared and the
/// fallback cover follows the album's first file.
pub struct AlbumCovers {
    schedule: String,
}

impl AlbumCovers {
    pub fn new(schedule: String) -> Self {
        Self { schedule }
    }
}

/// The fallback an album should have given its current one and its first file.
/// `None` means nothing to change.
pub fn next_fallback(current: Option<&str>, first_file: Option<&str>) -> Option<Option<String>> {
    if current == first_file {
        None
    } else {
        Some(first_file.map(str::to_string))
    }
}

#[async_trait]
impl Task for AlbumCovers {
    fn name(&self) -> &'static str {
        "album-covers"
    }

    fn title(&self) -> &'static str {
        "Update Albums"
    }

    fn schedule(&self) -> Option<&str> {
        Some(&self.schedule)
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let albums = ctx.db.get_albums(&Default::default()).await?;
        let mut updated = 0usize;

        for album in &albums {
            // The join finds no cover row when the referenced file is gone.
            if album.cover_id.is_some() && album.cover.is_none() {
                ctx.db.set_album_cover(&album.id, None).await?;
                updated += 1;
            }

            let files = ctx.db.get_album_files(&album.id).await?;
            let first = files.first().map(|f| f.id.as_str());
            if let Some(fallback) = next_fallback(album.cover_fallback_id.as_deref(), first) {
                ctx.db.set_album_cover_fallback(&album.id, fallback.as_deref()).await?;
                updated += 1;
            }
        }

        tracing::info!(albums = albums.len(), updated, "Album covers refreshed");
        Ok(())
    }
}
