use async_trait::async_trait;

use super::{Task, TaskContext};
use crate::archive::{build_archive, ArchiveEntry};
use crate::storage::remove_if_exists;

/// Rebuilds the downloadable zip of every album.
pub struct AlbumArchives {
    schedule: String,
}

impl AlbumArchives {
    pub fn new(schedule: String) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Task for AlbumArchives {
    fn name(&self) -> &'static str {
        "album-archives"
    }

    fn title(&self) -> &'static str {
        "Update Albums Archives"
    }

    fn schedule(&self) -> Option<&str> {
        Some(&self.schedule)
    }

    fn no_development(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let albums = ctx.db.get_albums(&Default::default()).await?;

        for album in albums {
            let files = ctx.db.get_album_files(&album.id).await?;
            if files.is_empty() {
                // An album emptied since the last run must not keep serving its old zip.
                remove_if_exists(&ctx.storage.archive_path(&album.name)).await?;
                tracing::debug!(album = %album.name, "No files to archive");
                continue;
            }
            let entries: Vec<ArchiveEntry> = files
                .iter()
                .map(|f| ArchiveEntry { source: ctx.storage.file_path(f.location, &f.name), name: f.name.clone() })
                .collect();
            let dest = ctx.storage.archive_path(&album.name);

            let summary = tokio::task::spawn_blocking(move || build_archive(&dest, &entries)).await??;
            ctx.metrics.inc_archives_built();
            tracing::info!(
                album = %album.name,
                id = %album.id,
                written = summary.written,
                skipped = summary.skipped,
                "Album archive written"
            );
        }
        Ok(())
    }
}
