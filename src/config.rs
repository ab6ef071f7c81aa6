//! Option types shared by the pipeline stages and the command line tools.

use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// Upper bound on the number of voxels sampled for the intensity mode.
pub const DEFAULT_SAMPLE_CAP: usize = 1_000_000;

/// Number of bins in the sampled intensity histogram.
pub const HISTOGRAM_BINS: usize = 256;

/// How the files of a slice series are put in stacking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesOrder {
    /// Plain file-name order.
    #[default]
    Lexicographic,
    /// Digits in the file name read as one number, so `img_9` comes before `img_10`.
    Numeric,
}

/// Which files in a directory belong to the series.
#[derive(Debug, Clone, Default)]
pub struct SeriesOptions {
    /// Only file names starting with this string are used.
    pub prefix: String,
    /// Stacking order.
    pub order: SeriesOrder,
}

/// A rectangle applied to every slice of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left column.
    pub x: usize,
    /// Top row.
    pub y: usize,
    /// Columns kept.
    pub width: usize,
    /// Rows kept.
    pub height: usize,
}

impl CropRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A square region with its top-left corner at `(x, y)`.
    pub fn square(x: usize, y: usize, side: usize) -> Self {
        Self::new(x, y, side, side)
    }

    /// Check that the region is non-empty and lies inside a `width` x `height` slice.
    pub fn validate(&self, width: usize, height: usize) -> PipelineResult<()> {
        let fits = self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|end| end <= width)
            && self.y.checked_add(self.height).is_some_and(|end| end <= height);
        if fits {
            Ok(())
        } else {
            Err(PipelineError::CropOutOfBounds {
                crop: *self,
                width,
                height,
            })
        }
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Physical size of one voxel along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    /// Distance between slices.
    pub z: f64,
    /// Distance between rows.
    pub y: f64,
    /// Distance between columns.
    pub x: f64,
}

impl Default for Spacing {
    fn default() -> Self {
        Self::unit()
    }
}

impl Spacing {
    /// Unit spacing along every axis.
    pub fn unit() -> Self {
        Self {
            z: 1.0,
            y: 1.0,
            x: 1.0,
        }
    }

    /// Build a spacing, rejecting non-positive or non-finite values.
    pub fn new(z: f64, y: f64, x: f64) -> PipelineResult<Self> {
        let spacing = Self { z, y, x };
        spacing.validate()?;
        Ok(spacing)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        for (axis, value) in [("z", self.z), ("y", self.y), ("x", self.x)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PipelineError::InvalidSpacing { axis, value });
            }
        }
        Ok(())
    }
}

/// Options for turning slice sources into a volume.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Region kept from every slice; the whole slice when `None`.
    pub crop: Option<CropRect>,
    /// Voxel spacing recorded on the assembled volume.
    pub spacing: Spacing,
}

/// Options for the intensity statistics.
#[derive(Debug, Clone, Copy)]
pub struct StatisticsOptions {
    /// Maximum number of voxels sampled for the mode.
    pub sample_cap: usize,
    /// Seed for the sampler; drawn from entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            sample_cap: DEFAULT_SAMPLE_CAP,
            seed: None,
        }
    }
}

/// Options for iso-surface extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// March z-slabs on the rayon thread pool.
    pub parallel: bool,
}

/// STL flavour written by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StlFormat {
    /// 80-byte header, little-endian records.
    #[default]
    Binary,
    /// `solid ... endsolid` text.
    Ascii,
}

/// Options for writing the mesh file.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: StlFormat,
    /// Solid name (ASCII) or header text (binary).
    pub name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: StlFormat::Binary,
            name: "ctmesh".to_string(),
        }
    }
}

/// Layout of a slice montage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MontageOptions {
    pub rows: usize,
    pub cols: usize,
    /// Factor applied to the width and height of every tile.
    pub scale: f64,
}

impl Default for MontageOptions {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 4,
            scale: 1.0,
        }
    }
}

impl MontageOptions {
    /// Number of slices the grid holds.
    pub fn tiles(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(PipelineError::InvalidMontage {
                reason: format!("{}x{} grid has no tiles", self.rows, self.cols),
            });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PipelineError::InvalidMontage {
                reason: format!("tile scale {} must be > 0", self.scale),
            });
        }
        Ok(())
    }
}

/// Everything a full conversion run needs apart from its input and threshold.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub series: SeriesOptions,
    pub load: LoadOptions,
    pub statistics: StatisticsOptions,
    pub extract: ExtractOptions,
    pub export: ExportOptions,
    /// Create missing parent directories of the output file, once there is a
    /// mesh to write.
    pub create_output_dir: bool,
}
