//! Zip extraction.

use std::path::{Path, PathBuf};

use crate::GeometryError;

/// Extracts every file entry of the archive at `archive_path` into `dest`.
///
/// Entries whose names would escape `dest` (absolute paths, `..`) are
/// skipped with a warning. Returns the extracted file paths in archive
/// order.
///
/// # Errors
///
/// Returns [`GeometryError::Extraction`] if the archive is corrupt, or
/// [`GeometryError::Io`] if an entry cannot be written.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>, GeometryError> {
    let io_error = |path: &Path, source: std::io::Error| GeometryError::Io {
        path: path.display().to_string(),
        source,
    };
    let extraction_error = |e: zip::result::ZipError| GeometryError::Extraction {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    };

    let file = std::fs::File::open(archive_path).map_err(|e| io_error(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(extraction_error)?;

    let mut extracted = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(extraction_error)?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };

        let out_path = dest.join(relative);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let mut out = std::fs::File::create(&out_path).map_err(|e| io_error(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| io_error(&out_path, e))?;
        extracted.push(out_path);
    }

    log::debug!(
        "Extracted {} files from {}",
        extracted.len(),
        archive_path.display()
    );

    Ok(extracted)
}

/// Returns the first path whose extension matches `extension`
/// (case-insensitive, without the dot).
#[must_use]
pub fn find_by_extension<'a>(files: &'a [PathBuf], extension: &str) -> Option<&'a PathBuf> {
    files.iter().find(|path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    })
}

/// Returns the parcel layer of an extracted cadastral archive: the `.gml`
/// whose file name contains `cadastralparcel`, or else the first `.gml`.
///
/// Archives ship the zoning layer next to the parcels, so the first match
/// alone is not enough.
#[must_use]
pub fn find_parcel_gml(files: &[PathBuf]) -> Option<&PathBuf> {
    let is_gml = |path: &&PathBuf| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gml"))
    };

    files
        .iter()
        .filter(is_gml)
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.to_ascii_lowercase().contains("cadastralparcel"))
        })
        .or_else(|| find_by_extension(files, "gml"))
}
