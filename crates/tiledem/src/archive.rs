//! Extraction of tile files from downloaded zip archives.

use crate::{DemError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Extract the tile file named `file_name` from `archive` into `target`.
///
/// Archives published with a different inner name (e.g. upper-case) are
/// matched case-insensitively; failing that the first entry with the same
/// extension is used. The file is written next to `target` and renamed into
/// place so a partially extracted tile is never mistaken for a complete one.
pub fn extract_tile(archive: &Path, file_name: &str, target: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    let wanted_ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut exact = None;
    let mut same_ext = None;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().rsplit('/').next().unwrap_or_default();
        if name.eq_ignore_ascii_case(file_name) {
            exact = Some(i);
            break;
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if same_ext.is_none() && ext.is_some() && ext == wanted_ext {
            same_ext = Some(i);
        }
    }

    let index = exact.or(same_ext).ok_or_else(|| {
        DemError::UnsupportedFormat(format!(
            "{} does not contain {}",
            archive.display(),
            file_name
        ))
    })?;

    let mut entry = zip.by_index(index)?;
    debug!(
        archive = %archive.display(),
        entry = entry.name(),
        size = entry.size(),
        "Extracting tile"
    );

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = target.with_extension("part");
    let result = (|| -> Result<()> {
        let mut out = File::create(&partial)?;
        io::copy(&mut entry, &mut out)?;
        out.sync_all()?;
        fs::rename(&partial, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}
