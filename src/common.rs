use ndarray::{s, Array2};
use std::fmt;

use crate::config::CropRect;
use crate::error::{PipelineError, PipelineResult};

// set up enums and structs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    X,
    Y,
    Z,
}

impl Direction {
    /// Array axis of a NIfTI volume, which is stored `[x, y, z]`.
    pub fn to_usize(&self) -> usize {
        match self {
            Direction::X => 0,
            Direction::Y => 1,
            Direction::Z => 2,
        }
    }
    pub fn from_usize(val: usize) -> Option<Self> {
        match val {
            0 => Some(Direction::X),
            1 => Some(Direction::Y),
            2 => Some(Direction::Z),
            _ => None,
        }
    }
}
impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::X => write!(f, "x"),
            Direction::Y => write!(f, "y"),
            Direction::Z => write!(f, "z"),
        }
    }
}

/// Sample format of the source images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BitDepth {
    Eight,
    Sixteen,
    Float,
}

impl BitDepth {
    /// Largest value a sample of this depth can hold, if bounded.
    pub fn max_value(&self) -> Option<f32> {
        match self {
            BitDepth::Eight => Some(f32::from(u8::MAX)),
            BitDepth::Sixteen => Some(f32::from(u16::MAX)),
            BitDepth::Float => None,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitDepth::Eight => write!(f, "8-bit"),
            BitDepth::Sixteen => write!(f, "16-bit"),
            BitDepth::Float => write!(f, "float"),
        }
    }
}

/// One decoded cross-section, indexed `[row, column]`.
#[derive(Debug, Clone)]
pub struct Slice {
    pub pixels: Array2<f32>,
    pub index: usize,
    pub bit_depth: BitDepth,
}
impl Slice {
    pub fn new(pixels: Array2<f32>, index: usize, bit_depth: BitDepth) -> Self {
        Self {
            pixels,
            index,
            bit_depth,
        }
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// Keep only `crop`, failing when it does not fit.
    pub fn cropped(self, crop: &CropRect) -> PipelineResult<Self> {
        crop.validate(self.width(), self.height())?;
        let pixels = self
            .pixels
            .slice(s![crop.y..crop.y + crop.height, crop.x..crop.x + crop.width])
            .to_owned();
        Ok(Self { pixels, ..self })
    }

    /// Position of the first non-finite sample, as `(row, column)`.
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.pixels
            .indexed_iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(idx, _)| idx)
    }
}

/// Fail unless a `width` x `height` slice matches the first slice of the series.
pub fn check_dimensions(
    index: usize,
    origin: &str,
    (expected_width, expected_height): (usize, usize),
    (width, height): (usize, usize),
) -> PipelineResult<()> {
    if (width, height) == (expected_width, expected_height) {
        Ok(())
    } else {
        Err(PipelineError::DimensionMismatch {
            index,
            origin: origin.to_string(),
            expected_width,
            expected_height,
            width,
            height,
        })
    }
}
