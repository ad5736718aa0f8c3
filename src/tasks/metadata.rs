use async_trait::async_trait;

use super::{Task, TaskContext};
use crate::imaging;

/// Re-reads format, dimensions and size of every stored file. Run on demand.
pub struct FileMetadata;

#[async_trait]
impl Task for FileMetadata {
    fn name(&self) -> &'static str {
        "file-metadata"
    }

    fn title(&self) -> &'static str {
        "Refresh Files Metadata"
    }

    fn schedule(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let files = ctx.db.get_files(&Default::default()).await?;
        let (mut refreshed, mut failed) = (0usize, 0usize);

        for file in &files {
            let path = ctx.storage.file_path(file.location, &file.name);
            match tokio::task::spawn_blocking(move || imaging::probe(&path)).await? {
                Ok(info) => {
                    ctx.db
                        .update_file_metadata(&file.id, Some(&info.format), Some(info.dimensions), info.size as i64)
                        .await?;
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %file.name, "Could not read image metadata: {}", e);
                    failed += 1;
                }
            }
        }

        tracing::info!(refreshed, failed, "File metadata refreshed");
        Ok(())
    }
}
