//! Turn a stack of CT slice images into an STL surface mesh.
//!
//! The stages run in order, each taking the previous one's output:
//!
//! 1. [`scan_series`] finds the slice images and [`load_volume`] stacks them
//!    into a [`Volume`] (or [`Volume::from_nifti`] reads a 3D NIfTI file)
//! 2. [`compute_statistics`] reports min, max and a sampled mode to help pick
//!    a threshold
//! 3. [`extract_surface`] runs marching cubes at the threshold
//! 4. [`export_mesh`] writes the [`Mesh`] as binary or ASCII STL
//!
//! [`pipeline::run`] chains all of them. [`montage_series`] lays the first
//! slices of a series out in one image for a quick look before meshing.

pub mod common;
pub mod config;
pub mod error;
pub mod extract;
pub mod loader;
pub mod mesh;
pub mod montage;
pub mod pipeline;
pub mod series;
pub mod stats;
pub mod stl;
pub mod tables;
pub mod volume;

pub use common::{BitDepth, Direction, Slice};
pub use config::{
    CropRect, ExportOptions, ExtractOptions, LoadOptions, MontageOptions, PipelineConfig,
    SeriesOptions, SeriesOrder, Spacing, StatisticsOptions, StlFormat, DEFAULT_SAMPLE_CAP,
};
pub use error::{PipelineError, PipelineResult, ReadFailure};
pub use extract::{extract_surface, extract_surface_with};
pub use loader::{load_image_slices, load_slices, ImageFile, SliceSource};
pub use mesh::Mesh;
pub use montage::{build_montage, montage_series, save_montage};
pub use pipeline::{PipelineReport, VolumeInput};
pub use series::scan_series;
pub use stats::{compute_statistics, compute_statistics_with, Histogram, IntensityStatistics};
pub use stl::{export_mesh, read_stl, write_stl};
pub use volume::{guess_dir, load_volume, load_volume_with, Volume};
