//! One full conversion run: input -> volume -> statistics -> threshold ->
//! surface -> STL file.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::common::Direction;
use crate::config::{PipelineConfig, Spacing};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::extract_surface_with;
use crate::series::scan_series;
use crate::stats::{compute_statistics_with, IntensityStatistics};
use crate::stl::export_mesh;
use crate::volume::{load_volume_with, Volume};

/// Where the voxels come from.
#[derive(Debug, Clone)]
pub enum VolumeInput {
    /// A directory of slice images, found with the configured series options.
    Series(PathBuf),
    /// Slice images already in stacking order.
    Files(Vec<PathBuf>),
    /// A 3D NIfTI file, sliced along `axis` (guessed when `None`).
    Nifti {
        path: PathBuf,
        axis: Option<Direction>,
    },
}

impl VolumeInput {
    /// NIfTI for `.nii` and `.nii.gz` files, a series directory otherwise.
    pub fn from_path(path: impl Into<PathBuf>, axis: Option<Direction>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if path.is_file() && (name.ends_with(".nii") || name.ends_with(".nii.gz")) {
            VolumeInput::Nifti { path, axis }
        } else {
            VolumeInput::Series(path)
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// `(depth, height, width)` of the volume.
    pub dimensions: (usize, usize, usize),
    pub statistics: IntensityStatistics,
    pub threshold: f32,
    pub vertex_count: usize,
    pub face_count: usize,
    pub output: PathBuf,
}

/// Build the volume described by `input`.
///
/// The crop in `config.load` applies to every input kind. The spacing in
/// `config.load` is used for image series; NIfTI volumes take theirs from the
/// file header.
pub fn load_input(input: &VolumeInput, config: &PipelineConfig) -> PipelineResult<Volume> {
    match input {
        VolumeInput::Series(dir) => {
            let paths = scan_series(dir, &config.series)?;
            load_volume_with(&paths, &config.load)
        }
        VolumeInput::Files(paths) => load_volume_with(paths, &config.load),
        VolumeInput::Nifti { path, axis } => {
            let volume = Volume::from_nifti(path, *axis)?;
            if config.load.spacing != Spacing::unit() {
                warn!("Ignoring the configured spacing, NIfTI volumes carry their own");
            }
            match &config.load.crop {
                Some(crop) => volume.cropped(crop),
                None => Ok(volume),
            }
        }
    }
}

/// Convert `input` into an STL file at `output`.
///
/// `choose_threshold` sees the intensity statistics and returns the iso-value;
/// an error from it ends the run before anything is written. Output
/// directories are only created for a mesh that is about to be exported.
pub fn run<F>(
    config: &PipelineConfig,
    input: &VolumeInput,
    output: &Path,
    choose_threshold: F,
) -> PipelineResult<PipelineReport>
where
    F: FnOnce(&IntensityStatistics) -> PipelineResult<f32>,
{
    info!("Reading volume");
    let volume = load_input(input, config)?;

    info!("Calculating intensity statistics");
    let statistics = compute_statistics_with(&volume, &config.statistics)?;
    let threshold = choose_threshold(&statistics)?;

    info!(threshold, "Generating mesh");
    let mesh = extract_surface_with(&volume, threshold, &config.extract)?;

    if config.create_output_dir && !mesh.is_empty() {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }
    }
    export_mesh(&mesh, output, &config.export)?;

    Ok(PipelineReport {
        dimensions: volume.dim(),
        statistics,
        threshold,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        output: output.to_path_buf(),
    })
}
