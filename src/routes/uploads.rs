//! Multipart upload handling shared by file and cover uploads.

use std::io;
use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};
use crate::imaging::{self, ImageInfo};
use crate::storage::clean_file_name;
use crate::types::new_id;

/// An image written to its final location.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub path: PathBuf,
    pub info: ImageInfo,
}

/// Advances to the first form field carrying a file name. Other fields are skipped.
pub async fn next_file_field<'a>(multipart: &'a mut Multipart) -> AppResult<Field<'a>> {
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            // SAFETY: works around NLL problem case #3. The field borrows `multipart`, and
            // returning ends the loop, so no other borrow of `multipart` outlives this one.
            return Ok(unsafe { std::mem::transmute::<Field<'_>, Field<'a>>(field) });
        }
    }
    Err(AppError::BadRequest("No file was uploaded.".to_string()))
}

/// Sanitized name of an uploaded file; percent-encoded names are decoded first.
pub fn upload_name(field: &Field<'_>) -> AppResult<String> {
    let raw = field.file_name().unwrap_or_default();
    let decoded = percent_decode(raw);
    clean_file_name(&decoded).ok_or_else(|| AppError::BadRequest("An invalid file name was provided.".to_string()))
}

/// Streams the field to a temporary file next to `dest`, checks that it decodes as an
/// image and moves it into place. Nothing is left behind when the upload is rejected,
/// and an existing file at `dest` is never replaced (409).
pub async fn store_image(mut field: Field<'_>, dest: &Path) -> AppResult<StoredImage> {
    let dir = dest
        .parent()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("upload destination has no parent: {}", dest.display())))?;
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".{}.upload", new_id()));

    let written = async {
        let mut out = tokio::fs::File::create(&tmp).await?;
        while let Some(chunk) = field.chunk().await? {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok::<(), AppError>(())
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }

    let probe_path = tmp.clone();
    let probed = tokio::task::spawn_blocking(move || imaging::probe(&probe_path))
        .await
        .map_err(anyhow::Error::from)?;
    let info = match probed {
        Ok(info) => info,
        Err(e) => {
            tracing::debug!("Rejected upload {}: {}", dest.display(), e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::BadRequest("The uploaded file is not a supported image.".to_string()));
        }
    };

    let published = tokio::fs::hard_link(&tmp, dest).await;
    if let Err(e) = tokio::fs::remove_file(&tmp).await {
        tracing::warn!("Could not remove temporary upload {}: {}", tmp.display(), e);
    }
    match published {
        Ok(()) => Ok(StoredImage { path: dest.to_path_buf(), info }),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(AppError::Conflict("A file with this name already exists.".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Decodes percent-encoded names; anything that does not decode is kept verbatim.
pub fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw).map(|d| d.into_owned()).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_encoded_names() {
        assert_eq!(percent_decode("sunset%20beach.png"), "sunset beach.png");
        assert_eq!(percent_decode("caf%C3%A9.jpg"), "café.jpg");
        assert_eq!(percent_decode("plain.png"), "plain.png");
    }
}
