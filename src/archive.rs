//! Upload archive handling: scratch directories, zip extraction, layout checks.
//!
//! An upload is extracted into its own `upload-<uuid>` directory under
//! `storage.scratch_dir`. The directory is owned by a [`ScratchDir`] guard and
//! removed when the guard drops, whether the pipeline succeeded or not.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LabelError, Result};

/// Maximum decompressed size of a single archive entry.
const MAX_ENTRY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// A per-upload working directory, deleted on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(parent: &Path) -> Result<Self> {
        let path = parent.join(format!("upload-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "scratch directory created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove scratch directory"
            ),
        }
    }
}

/// Extract every entry of the zip at `archive_path` under `dest`.
///
/// Entries whose names would land outside `dest` (absolute paths, `..`)
/// reject the whole archive. Returns the number of files written.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| LabelError::BadArchive(e.to_string()))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| LabelError::BadArchive(e.to_string()))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            LabelError::BadArchive(format!(
                "entry '{}' escapes the extraction directory",
                entry.name()
            ))
        })?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(LabelError::BadArchive(format!(
                "entry '{}' exceeds size limit ({} bytes)",
                entry.name(),
                MAX_ENTRY_BYTES
            )));
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        let copied = io::copy(&mut entry.take(MAX_ENTRY_BYTES + 1), &mut out)?;
        if copied > MAX_ENTRY_BYTES {
            return Err(LabelError::BadArchive(format!(
                "entry at {} exceeds size limit ({} bytes)",
                out_path.display(),
                MAX_ENTRY_BYTES
            )));
        }
        written += 1;
    }
    Ok(written)
}

/// Paths of an extracted archive that passed [`check_structure`].
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    pub images_dir: PathBuf,
    pub items_csv: Option<PathBuf>,
    pub triplets_csv: PathBuf,
    pub validation_triplets_csv: PathBuf,
}

/// Verify the required `data/` layout under `root`.
///
/// Checked in order; the first missing path is reported relative to `root`.
pub fn check_structure(root: &Path) -> Result<ArchiveLayout> {
    let data = Path::new("data");
    let images = data.join("images");
    let triplets = data.join("triplets.csv");
    let validation = data.join("validation_triplets.csv");

    for (relative, want_dir) in [
        (data, true),
        (images.as_path(), true),
        (triplets.as_path(), false),
        (validation.as_path(), false),
    ] {
        let full = root.join(relative);
        let ok = if want_dir { full.is_dir() } else { full.is_file() };
        if !ok {
            return Err(LabelError::MissingStructure(relative.to_path_buf()));
        }
    }

    let items = root.join(data).join("items.csv");
    Ok(ArchiveLayout {
        images_dir: root.join(&images),
        items_csv: items.is_file().then_some(items),
        triplets_csv: root.join(&triplets),
        validation_triplets_csv: root.join(&validation),
    })
}
