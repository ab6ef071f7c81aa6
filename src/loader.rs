//! Reading an ordered series of 2D intensity images.

use image::{ColorType, DynamicImage};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::{check_dimensions, BitDepth, Slice};
use crate::config::LoadOptions;
use crate::error::{PipelineError, PipelineResult};

/// Something that can provide one slice of a series.
pub trait SliceSource {
    /// Human-readable description used in error messages, usually a path.
    fn origin(&self) -> String;

    /// Width and height without decoding the samples.
    fn dimensions(&self) -> PipelineResult<(usize, usize)>;

    /// Decode the samples. `index` is the position of the source in its series.
    fn read(&self, index: usize) -> PipelineResult<Slice>;
}

/// A slice stored as an image file (TIFF, PNG or BMP).
#[derive(Debug, Clone)]
pub struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SliceSource for ImageFile {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn dimensions(&self) -> PipelineResult<(usize, usize)> {
        let (width, height) = image::image_dimensions(&self.path)
            .map_err(|e| PipelineError::read(self.origin(), e))?;
        Ok((width as usize, height as usize))
    }

    fn read(&self, index: usize) -> PipelineResult<Slice> {
        let img = image::open(&self.path).map_err(|e| PipelineError::read(self.origin(), e))?;
        decode_grayscale(img, index, &self.origin())
    }
}

impl SliceSource for Slice {
    fn origin(&self) -> String {
        format!("in-memory slice {}", self.index)
    }

    fn dimensions(&self) -> PipelineResult<(usize, usize)> {
        Ok((self.width(), self.height()))
    }

    fn read(&self, index: usize) -> PipelineResult<Slice> {
        Ok(Slice {
            index,
            ..self.clone()
        })
    }
}

/// Turn a decoded image into a grayscale slice.
///
/// 8 and 16-bit grayscale keep their samples exactly, alpha is dropped, and
/// anything else goes through a 16-bit luma conversion.
fn decode_grayscale(img: DynamicImage, index: usize, origin: &str) -> PipelineResult<Slice> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let (samples, bit_depth): (Vec<f32>, BitDepth) = match img.color() {
        ColorType::L8 | ColorType::La8 => (
            img.to_luma8().into_raw().into_iter().map(f32::from).collect(),
            BitDepth::Eight,
        ),
        ColorType::L16 | ColorType::La16 => (
            img.to_luma16().into_raw().into_iter().map(f32::from).collect(),
            BitDepth::Sixteen,
        ),
        color => {
            warn!(origin, ?color, "Converting colour image to 16-bit grayscale");
            (
                img.to_luma16().into_raw().into_iter().map(f32::from).collect(),
                BitDepth::Sixteen,
            )
        }
    };
    let pixels = Array2::from_shape_vec((height, width), samples)
        .map_err(|e| PipelineError::malformed(origin, e.to_string()))?;
    Ok(Slice::new(pixels, index, bit_depth))
}

/// Read every source of an ordered series into slices.
///
/// All dimensions are checked before any samples are decoded, so a series with
/// one odd-sized image fails fast with `DimensionMismatch`. The optional crop
/// from `options` is applied to every slice.
///
/// # Errors
///
/// `EmptySeries` for zero sources, `DimensionMismatch` when a slice differs in
/// size from the first, `CropOutOfBounds` when the crop does not fit, and
/// `IoRead` when a source cannot be decoded or holds non-finite samples.
pub fn load_slices<S: SliceSource>(
    sources: &[S],
    options: &LoadOptions,
) -> PipelineResult<Vec<Slice>> {
    let Some(first) = sources.first() else {
        return Err(PipelineError::EmptySeries {
            location: "an empty source list".to_string(),
        });
    };

    let expected = first.dimensions()?;
    for (index, source) in sources.iter().enumerate().skip(1) {
        check_dimensions(index, &source.origin(), expected, source.dimensions()?)?;
    }
    if let Some(crop) = &options.crop {
        crop.validate(expected.0, expected.1)?;
    }

    info!(
        count = sources.len(),
        width = expected.0,
        height = expected.1,
        "Loading slice series"
    );

    let mut slices = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        let origin = source.origin();
        let slice = source.read(index)?;
        // decoded size can disagree with a lying header
        check_dimensions(index, &origin, expected, (slice.width(), slice.height()))?;
        if let Some((row, col)) = slice.first_non_finite() {
            return Err(PipelineError::malformed(
                origin,
                format!("non-finite sample at row {row}, column {col}"),
            ));
        }
        let slice = match &options.crop {
            Some(crop) => slice.cropped(crop)?,
            None => slice,
        };
        debug!(index, origin = %origin, bit_depth = %slice.bit_depth, "Loaded slice");
        slices.push(slice);
    }
    Ok(slices)
}

/// Read the image files at `paths` (already in stacking order) into slices.
pub fn load_image_slices<P: AsRef<Path>>(
    paths: &[P],
    options: &LoadOptions,
) -> PipelineResult<Vec<Slice>> {
    let sources: Vec<ImageFile> = paths.iter().map(|p| ImageFile::new(p.as_ref())).collect();
    load_slices(&sources, options)
}
