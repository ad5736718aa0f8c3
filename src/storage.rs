//! On-disk layout of media under the storage root.
//!
//! ```text
//! <root>/files/<name>              originals
//! <root>/covers/<name>             album covers
//! <root>/thumbs/<name>.webp        225 px wide previews
//! <root>/thumbs/square/<name>.webp 64x64 previews
//! <root>/archives/<album>.zip      album downloads
//! ```

use std::io;
use std::path::{Path, PathBuf};

use sanitize_filename::sanitize;

use crate::types::FileLocation;

pub const THUMBNAIL_EXTENSION: &str = "webp";

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.root.join("covers")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    pub fn square_thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs").join("square")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.root.join("archives")
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [self.files_dir(), self.covers_dir(), self.square_thumbs_dir(), self.archives_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn file_path(&self, location: FileLocation, name: &str) -> PathBuf {
        let dir = match location {
            FileLocation::Files => self.files_dir(),
            FileLocation::Covers => self.covers_dir(),
        };
        dir.join(sanitize(name))
    }

    /// Thumbnails keep the full stored name so `a.png` and `a.jpg` never share one.
    pub fn thumbnail_path(&self, name: &str) -> PathBuf {
        self.thumbs_dir().join(thumbnail_file_name(name))
    }

    pub fn square_thumbnail_path(&self, name: &str) -> PathBuf {
        self.square_thumbs_dir().join(thumbnail_file_name(name))
    }

    pub fn archive_path(&self, album_name: &str) -> PathBuf {
        self.archives_dir().join(archive_file_name(album_name))
    }

    /// Removes a stored file and its thumbnails. Missing files are not an error.
    pub async fn remove_media(&self, location: FileLocation, name: &str) -> io::Result<()> {
        remove_if_exists(&self.file_path(location, name)).await?;
        if location == FileLocation::Files {
            remove_if_exists(&self.thumbnail_path(name)).await?;
            remove_if_exists(&self.square_thumbnail_path(name)).await?;
        }
        Ok(())
    }
}

/// Normalized file name for uploads; `None` when nothing usable is left.
pub fn clean_file_name(raw: &str) -> Option<String> {
    let cleaned = sanitize(raw.trim());
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        None
    } else {
        Some(cleaned.to_string())
    }
}

pub fn archive_file_name(album_name: &str) -> String {
    let name = sanitize(album_name.trim());
    let name = if name.is_empty() { "album".to_string() } else { name };
    format!("{}.zip", name)
}

/// Extension including the leading dot, lowercased; empty when there is none.
pub fn extname(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn thumbnail_file_name(name: &str) -> String {
    format!("{}.{}", sanitize(name), THUMBNAIL_EXTENSION)
}

pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cannot_escape_their_directory() {
        let storage = Storage::new("/srv/media");
        let path = storage.file_path(FileLocation::Files, "../../etc/passwd");
        assert!(path.starts_with("/srv/media/files"));
        assert_eq!(path.components().count(), Path::new("/srv/media/files").components().count() + 1);
    }

    #[test]
    fn thumbnails_are_webp_named_after_the_full_name() {
        let storage = Storage::new("media");
        assert_eq!(storage.thumbnail_path("sunset.JPG"), Path::new("media/thumbs/sunset.JPG.webp"));
        assert_eq!(storage.square_thumbnail_path("sunset.JPG"), Path::new("media/thumbs/square/sunset.JPG.webp"));
        assert_ne!(storage.thumbnail_path("sunset.png"), storage.thumbnail_path("sunset.jpg"));
    }

    #[test]
    fn archive_names_are_sanitized() {
        assert_eq!(archive_file_name("Summer/2024"), "Summer2024.zip");
        assert_eq!(archive_file_name("   "), "album.zip");
    }

    #[test]
    fn extname_is_lowercased_with_dot() {
        assert_eq!(extname("a.PNG"), ".png");
        assert_eq!(extname("noext"), "");
    }

    #[test]
    fn clean_file_name_rejects_empty_and_hidden() {
        assert_eq!(clean_file_name("  photo.png "), Some("photo.png".to_string()));
        assert_eq!(clean_file_name("///"), None);
        assert_eq!(clean_file_name(".hidden"), None);
    }

    #[tokio::test]
    async fn remove_if_exists_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.png");
        remove_if_exists(&path).await.unwrap();

        tokio::fs::write(&path, b"x").await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
