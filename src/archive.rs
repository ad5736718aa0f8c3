//! Album zip archives.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// A file to place in an archive under `name`.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub source: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub written: usize,
    pub skipped: usize,
}

/// Writes `entries` into a zip at `dest` with maximum deflate compression.
///
/// The archive is built next to `dest` and renamed over it once complete, so a
/// concurrent download never sees a half-written file. Entries whose source is
/// missing are skipped with a warning.
pub fn build_archive(dest: &Path, entries: &[ArchiveEntry]) -> Result<ArchiveSummary, ArchiveError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("zip.partial");

    let result = write_zip(&tmp, entries);
    match result {
        Ok(summary) => {
            std::fs::rename(&tmp, dest)?;
            Ok(summary)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_zip(path: &Path, entries: &[ArchiveEntry]) -> Result<ArchiveSummary, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
    let mut summary = ArchiveSummary::default();

    for entry in entries {
        let mut source = match File::open(&entry.source) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Skipping missing file {} while archiving", entry.source.display());
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        zip.start_file(entry.name.as_str(), options)?;
        io::copy(&mut source, &mut zip)?;
        summary.written += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(summary)
}
