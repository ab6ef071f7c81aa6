//! Slice montage: the first `rows x cols` slices of a series laid out side by
//! side in one 8-bit grayscale image, for a quick look at a scan before
//! meshing it.
//!
//! Tiles fill the grid row by row. Intensities are stretched over the range
//! shared by all tiles, so brightness is comparable between them.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageError, Luma};
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::common::{check_dimensions, Slice};
use crate::config::{LoadOptions, MontageOptions, SeriesOptions};
use crate::error::{PipelineError, PipelineResult};
use crate::loader::load_image_slices;
use crate::series::scan_series;

fn too_large(what: &str) -> PipelineError {
    PipelineError::InvalidMontage {
        reason: format!("{what} does not fit in an image"),
    }
}

/// Map every slice onto `0..=255` using the intensity range of all of them.
///
/// Scaled values are truncated, so only the global maximum reaches 255. A set
/// of slices holding a single value maps to black.
///
/// # Errors
///
/// `EmptyVolume` when there are no pixels, `DimensionMismatch` when a slice
/// differs in size from the first.
pub fn normalize_slices(slices: &[Slice]) -> PipelineResult<Vec<GrayImage>> {
    let Some(first) = slices.first() else {
        return Err(PipelineError::EmptyVolume);
    };
    let expected = (first.width(), first.height());
    for slice in slices.iter().skip(1) {
        let origin = format!("montage tile {}", slice.index);
        check_dimensions(slice.index, &origin, expected, (slice.width(), slice.height()))?;
    }

    let range = slices
        .iter()
        .flat_map(|slice| slice.pixels.iter().copied())
        .fold(None, |range, value| match range {
            None => Some((value, value)),
            Some((lo, hi)) => Some((value.min(lo), value.max(hi))),
        });
    let Some((lo, hi)) = range else {
        return Err(PipelineError::EmptyVolume);
    };
    debug!(min = lo, max = hi, "Montage intensity range");

    let width = u32::try_from(expected.0).map_err(|_| too_large("slice width"))?;
    let height = u32::try_from(expected.1).map_err(|_| too_large("slice height"))?;
    let span = f64::from(hi) - f64::from(lo);
    Ok(slices
        .iter()
        .map(|slice| {
            GrayImage::from_fn(width, height, |x, y| {
                let value = slice.pixels[[y as usize, x as usize]];
                Luma([to_byte(value, lo, span)])
            })
        })
        .collect())
}

fn to_byte(value: f32, lo: f32, span: f64) -> u8 {
    if span <= 0.0 {
        return 0;
    }
    ((f64::from(value) - f64::from(lo)) / span * 255.0) as u8
}

/// Resize `tile` by `scale` with a bicubic filter. Sides never drop below one
/// pixel.
fn scale_tile(tile: GrayImage, scale: f64) -> GrayImage {
    if scale == 1.0 {
        return tile;
    }
    let width = ((f64::from(tile.width()) * scale) as u32).max(1);
    let height = ((f64::from(tile.height()) * scale) as u32).max(1);
    imageops::resize(&tile, width, height, FilterType::CatmullRom)
}

/// Paste the first `options.tiles()` slices into one grid image.
///
/// Slice `i` goes to row `i / cols`, column `i % cols`. The grid always has
/// `rows x cols` cells; cells without a slice stay black. Slices past the
/// last cell are ignored and do not affect the intensity range.
///
/// # Errors
///
/// `InvalidMontage` for a layout without tiles or with a non-positive scale,
/// plus the errors of [`normalize_slices`].
pub fn build_montage(slices: &[Slice], options: &MontageOptions) -> PipelineResult<GrayImage> {
    options.validate()?;
    let used = &slices[..slices.len().min(options.tiles())];
    let tiles: Vec<GrayImage> = normalize_slices(used)?
        .into_iter()
        .map(|tile| scale_tile(tile, options.scale))
        .collect();
    let Some((tile_width, tile_height)) = tiles.first().map(GrayImage::dimensions) else {
        return Err(PipelineError::EmptyVolume);
    };

    let width = u32::try_from(options.cols)
        .ok()
        .and_then(|cols| cols.checked_mul(tile_width))
        .ok_or_else(|| too_large("montage width"))?;
    let height = u32::try_from(options.rows)
        .ok()
        .and_then(|rows| rows.checked_mul(tile_height))
        .ok_or_else(|| too_large("montage height"))?;

    let mut grid = GrayImage::new(width, height);
    for (i, tile) in tiles.iter().enumerate() {
        let (row, col) = (i / options.cols, i % options.cols);
        let x = i64::from(tile_width) * col as i64;
        let y = i64::from(tile_height) * row as i64;
        imageops::replace(&mut grid, tile, x, y);
        debug!(tile = i, row, col, "Placed montage tile");
    }
    info!(width, height, tiles = tiles.len(), "Built montage");
    Ok(grid)
}

/// Build the montage of the slice series in `dir`.
///
/// Only the first `options.tiles()` images in stacking order are decoded.
pub fn montage_series(
    dir: &Path,
    series: &SeriesOptions,
    load: &LoadOptions,
    options: &MontageOptions,
) -> PipelineResult<GrayImage> {
    options.validate()?;
    let mut paths = scan_series(dir, series)?;
    paths.truncate(options.tiles());
    let slices = load_image_slices(&paths, load)?;
    build_montage(&slices, options)
}

/// Write `image` to `path`, in the format named by the file extension.
pub fn save_montage(image: &GrayImage, path: &Path) -> PipelineResult<()> {
    image.save(path).map_err(|e| match e {
        ImageError::IoError(source) => PipelineError::write(path, source),
        other => PipelineError::write(path, io::Error::new(io::ErrorKind::InvalidInput, other)),
    })?;
    info!(path = %path.display(), "Wrote montage");
    Ok(())
}
