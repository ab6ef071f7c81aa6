//! Finding the files of a slice series on disk.

use glob::{glob, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{SeriesOptions, SeriesOrder};
use crate::error::{PipelineError, PipelineResult};

/// File extensions accepted as slice images (compared case-insensitively).
pub const SLICE_EXTENSIONS: [&str; 4] = ["tif", "tiff", "png", "bmp"];

/// List the slice images in `dir`, in stacking order.
///
/// Files are matched with a glob on `options.prefix`, filtered by extension and
/// sorted according to `options.order`, so the same directory always stacks
/// the same way.
///
/// # Errors
///
/// `EmptySeries` when nothing matches, `IoRead` when the directory cannot be
/// listed.
pub fn scan_series(dir: &Path, options: &SeriesOptions) -> PipelineResult<Vec<PathBuf>> {
    let origin = dir.display().to_string();
    if !dir.is_dir() {
        return Err(PipelineError::malformed(origin, "not a directory"));
    }
    let pattern = format!(
        "{}/{}*",
        Pattern::escape(&origin),
        Pattern::escape(&options.prefix)
    );
    let entries =
        glob(&pattern).map_err(|e| PipelineError::malformed(origin.clone(), e.to_string()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::read(origin.clone(), e.into_error()))?;
        if path.is_file() && has_slice_extension(&path) {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(PipelineError::EmptySeries { location: origin });
    }

    sort_series(&mut paths, options.order);
    debug!(count = paths.len(), dir = %origin, "Found slice images");
    Ok(paths)
}

/// Sort `paths` into stacking order.
pub fn sort_series(paths: &mut [PathBuf], order: SeriesOrder) {
    match order {
        SeriesOrder::Lexicographic => paths.sort_by(|a, b| a.file_name().cmp(&b.file_name())),
        SeriesOrder::Numeric => paths.sort_by(|a, b| {
            extract_number_from_filename(a)
                .cmp(&extract_number_from_filename(b))
                .then_with(|| a.file_name().cmp(&b.file_name()))
        }),
    }
}

fn has_slice_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SLICE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// All digits of the file name read as one number; `None` when there are none.
fn extract_number_from_filename(path: &Path) -> Option<u128> {
    let filename = path.file_name()?.to_str()?;
    let digits: String = filename.chars().filter(|ch| ch.is_ascii_digit()).collect();
    digits.parse::<u128>().ok()
}
