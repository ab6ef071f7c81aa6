//! Error types for the slice-stack to surface-mesh pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::CropRect;

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while turning a slice series into a mesh file.
///
/// Every variant is terminal for the run that produced it. Nothing is retried
/// and no slice is ever skipped, since dropping one would shift the z-index of
/// every slice after it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No slice images matched.
    #[error("no slice images found in {location}")]
    EmptySeries {
        /// Where the series was looked for.
        location: String,
    },

    /// A slice does not share the width and height of the first slice.
    #[error("slice {index} ({origin}) is {width}x{height}, not {expected_width}x{expected_height}")]
    DimensionMismatch {
        /// Position of the offending slice in the series.
        index: usize,
        /// Where the offending slice came from.
        origin: String,
        /// Width of the first slice.
        expected_width: usize,
        /// Height of the first slice.
        expected_height: usize,
        /// Width of the offending slice.
        width: usize,
        /// Height of the offending slice.
        height: usize,
    },

    /// A volume was requested from zero slices, or holds zero voxels.
    #[error("volume has no voxels")]
    EmptyVolume,

    /// The iso-value lies outside the intensity range of the volume.
    #[error("threshold {threshold} is outside the volume intensity range [{min}, {max}]")]
    ThresholdOutOfRange {
        /// Requested iso-value.
        threshold: f32,
        /// Smallest voxel intensity.
        min: f32,
        /// Largest voxel intensity.
        max: f32,
    },

    /// Marching cubes needs at least a 2x2x2 neighbourhood.
    #[error("volume of {depth}x{height}x{width} voxels is too small for marching cubes")]
    DegenerateVolume {
        /// Number of slices.
        depth: usize,
        /// Rows per slice.
        height: usize,
        /// Columns per slice.
        width: usize,
    },

    /// A voxel handed over in memory is NaN or infinite.
    #[error("non-finite voxel at z {z}, y {y}, x {x}")]
    NonFiniteVoxel {
        /// Slice index.
        z: usize,
        /// Row.
        y: usize,
        /// Column.
        x: usize,
    },

    /// Face indices are 32 bit.
    #[error("mesh needs more than {} vertices", u32::MAX)]
    TooManyVertices,

    /// Refusing to write a mesh file without triangles.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// Reading a slice, volume or mesh failed.
    #[error("failed to read {origin}: {source}")]
    IoRead {
        /// The path (or other description) that failed.
        origin: String,
        /// The underlying failure.
        #[source]
        source: ReadFailure,
    },

    /// Writing the mesh file failed.
    #[error("failed to write to {path}: {source}")]
    IoWrite {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Voxel spacing must be positive and finite.
    #[error("invalid {axis} voxel spacing: {value} (must be > 0)")]
    InvalidSpacing {
        /// Axis name.
        axis: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The random sample for the mode needs at least one voxel.
    #[error("sample cap must be at least 1")]
    InvalidSampleCap,

    /// The crop region does not fit inside the slices.
    #[error("crop region {crop} does not fit inside {width}x{height} slices")]
    CropOutOfBounds {
        /// Requested region.
        crop: CropRect,
        /// Slice width.
        width: usize,
        /// Slice height.
        height: usize,
    },

    /// The montage grid or tile scale cannot produce an image.
    #[error("invalid montage layout: {reason}")]
    InvalidMontage {
        /// What is wrong with the layout.
        reason: String,
    },

    /// A face references a vertex that does not exist.
    #[error("face {face} references vertex {index} but the mesh has {vertex_count} vertices")]
    DanglingFaceIndex {
        /// Offending face.
        face: usize,
        /// Offending vertex index.
        index: u32,
        /// Number of vertices available.
        vertex_count: usize,
    },
}

/// Underlying cause of an [`PipelineError::IoRead`].
#[derive(Debug, Error)]
pub enum ReadFailure {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Image decoding failure.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// NIfTI decoding failure.
    #[error(transparent)]
    Nifti(#[from] nifti::error::NiftiError),

    /// The content decoded but is not usable.
    #[error("{0}")]
    Malformed(String),
}

impl PipelineError {
    /// Create an `IoRead` error for `origin`.
    pub fn read(origin: impl Into<String>, source: impl Into<ReadFailure>) -> Self {
        Self::IoRead {
            origin: origin.into(),
            source: source.into(),
        }
    }

    /// Create an `IoRead` error describing malformed content.
    pub fn malformed(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IoRead {
            origin: origin.into(),
            source: ReadFailure::Malformed(message.into()),
        }
    }

    /// Create an `IoWrite` error for `path`.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoWrite {
            path: path.into(),
            source,
        }
    }
}
