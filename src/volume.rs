//! The 3D intensity volume built from a slice stack.

use ndarray::{s, stack, Array3, ArrayView2, ArrayView3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::path::Path;
use tracing::{info, warn};

use crate::common::{check_dimensions, BitDepth, Direction, Slice};
use crate::config::{CropRect, LoadOptions, Spacing};
use crate::error::{PipelineError, PipelineResult};
use crate::loader::load_image_slices;

/// A stack of slices indexed `[z, y, x]`: slice, row, column.
///
/// The voxel buffer is owned and never modified after assembly. Slice 0 of the
/// input is `z = 0`.
#[derive(Debug, Clone)]
pub struct Volume {
    voxels: Array3<f32>,
    spacing: Spacing,
    bit_depth: BitDepth,
    range: Option<(f32, f32)>,
}

impl Volume {
    /// Stack `slices` in the order given.
    ///
    /// # Errors
    ///
    /// `EmptyVolume` for zero slices, `DimensionMismatch` when the slices do
    /// not share one size, `InvalidSpacing` for a bad spacing.
    pub fn assemble(slices: &[Slice], spacing: Spacing) -> PipelineResult<Self> {
        let Some(first) = slices.first() else {
            return Err(PipelineError::EmptyVolume);
        };
        spacing.validate()?;

        let expected = (first.width(), first.height());
        for (index, slice) in slices.iter().enumerate().skip(1) {
            check_dimensions(
                index,
                &format!("slice {}", slice.index),
                expected,
                (slice.width(), slice.height()),
            )?;
        }

        let views: Vec<ArrayView2<f32>> = slices.iter().map(|s| s.pixels.view()).collect();
        let voxels = stack(Axis(0), &views).map_err(|_| PipelineError::EmptyVolume)?;
        let bit_depth = slices
            .iter()
            .map(|s| s.bit_depth)
            .max()
            .unwrap_or(BitDepth::Float);
        if slices.iter().any(|s| s.bit_depth != bit_depth) {
            warn!(%bit_depth, "Slices mix bit depths, recording the widest");
        }

        Ok(Self::from_parts(voxels, spacing, bit_depth))
    }

    /// Wrap an existing `[z, y, x]` array.
    ///
    /// # Errors
    ///
    /// `EmptyVolume` when the array has no slices, `NonFiniteVoxel` when a
    /// voxel is NaN or infinite, `InvalidSpacing` for a bad spacing.
    pub fn from_array(voxels: Array3<f32>, spacing: Spacing) -> PipelineResult<Self> {
        if voxels.len_of(Axis(0)) == 0 {
            return Err(PipelineError::EmptyVolume);
        }
        if let Some((z, y, x)) = first_non_finite(&voxels) {
            return Err(PipelineError::NonFiniteVoxel { z, y, x });
        }
        spacing.validate()?;
        Ok(Self::from_parts(voxels, spacing, BitDepth::Float))
    }

    /// Keep `crop` of every slice, as a new volume.
    pub fn cropped(&self, crop: &CropRect) -> PipelineResult<Self> {
        let (_, height, width) = self.dim();
        crop.validate(width, height)?;
        let voxels = self
            .voxels
            .slice(s![.., crop.y..crop.y + crop.height, crop.x..crop.x + crop.width])
            .to_owned();
        Ok(Self::from_parts(voxels, self.spacing, self.bit_depth))
    }

    fn from_parts(voxels: Array3<f32>, spacing: Spacing, bit_depth: BitDepth) -> Self {
        let voxels = if voxels.is_standard_layout() {
            voxels
        } else {
            voxels.as_standard_layout().into_owned()
        };
        let range = voxels.iter().fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((v.min(lo), v.max(hi))),
        });
        Self {
            voxels,
            spacing,
            bit_depth,
            range,
        }
    }

    /// Read a 3D NIfTI file, re-sliced so that `axis` becomes the stacking axis.
    ///
    /// The voxel spacing comes from the header. When `axis` is `None` it is
    /// guessed from the header with [`guess_dir`].
    pub fn from_nifti(path: &Path, axis: Option<Direction>) -> PipelineResult<Self> {
        let origin = path.display().to_string();
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| PipelineError::read(origin.clone(), e))?;
        let header = obj.header();
        let dim = header.dim;
        let pixdim = header.pixdim;
        let bit_depth = match header.datatype {
            2 => BitDepth::Eight,
            512 => BitDepth::Sixteen,
            _ => BitDepth::Float,
        };

        let img = obj
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| PipelineError::read(origin.clone(), e))?;
        if img.ndim() != 3 {
            return Err(PipelineError::malformed(
                origin,
                format!("expected a 3D volume, found {} dimensions", img.ndim()),
            ));
        }
        let img = img
            .into_dimensionality::<Ix3>()
            .map_err(|e| PipelineError::malformed(origin.clone(), e.to_string()))?;

        let guessed_dir = guess_dir(dim, pixdim);
        let axis = axis.unwrap_or_else(|| {
            info!(axis = %guessed_dir, "Axis not specified, guessing");
            guessed_dir
        });
        if guessed_dir != axis {
            warn!(
                %axis,
                guessed = %guessed_dir,
                "The axis specified might not be the slice direction"
            );
        }

        // nifti arrays are [i, j, k]; put the slice axis first, then the other two
        // in descending order so the default z axis gives [k, j, i]
        let slice_axis = axis.to_usize();
        let mut order = [slice_axis; 3];
        let others = (0..3).rev().filter(|&a| a != slice_axis);
        for (slot, other) in order[1..].iter_mut().zip(others) {
            *slot = other;
        }
        let spacing = match Spacing::new(
            f64::from(pixdim[order[0] + 1]),
            f64::from(pixdim[order[1] + 1]),
            f64::from(pixdim[order[2] + 1]),
        ) {
            Ok(spacing) => spacing,
            Err(e) => {
                warn!(error = %e, "Header voxel spacing unusable, falling back to unit spacing");
                Spacing::unit()
            }
        };

        let voxels = img.permuted_axes(order);
        if let Some((z, y, x)) = first_non_finite(&voxels) {
            return Err(PipelineError::malformed(
                origin,
                format!("non-finite voxel at z {z}, y {y}, x {x}"),
            ));
        }
        if voxels.len_of(Axis(0)) == 0 {
            return Err(PipelineError::EmptyVolume);
        }
        Ok(Self::from_parts(voxels, spacing, bit_depth))
    }

    /// `(depth, height, width)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.voxels.dim()
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    pub fn voxels(&self) -> ArrayView3<'_, f32> {
        self.voxels.view()
    }

    /// Voxel at flat position `index` in `[z, y, x]` row-major order.
    pub fn voxel_at(&self, index: usize) -> Option<f32> {
        let (_, height, width) = self.dim();
        let plane = height * width;
        if plane == 0 {
            return None;
        }
        let z = index / plane;
        let rem = index % plane;
        self.voxels.get([z, rem / width, rem % width]).copied()
    }

    /// One slice, indexed `[row, column]`.
    pub fn slice(&self, z: usize) -> Option<ArrayView2<'_, f32>> {
        (z < self.voxels.len_of(Axis(0))).then(|| self.voxels.index_axis(Axis(0), z))
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Smallest and largest intensity; `None` when the volume holds no voxels.
    pub fn range(&self) -> Option<(f32, f32)> {
        self.range
    }
}

/// Load the image files at `paths` (already in stacking order) into a volume.
pub fn load_volume<P: AsRef<Path>>(paths: &[P]) -> PipelineResult<Volume> {
    load_volume_with(paths, &LoadOptions::default())
}

/// [`load_volume`] with an explicit crop region and voxel spacing.
pub fn load_volume_with<P: AsRef<Path>>(
    paths: &[P],
    options: &LoadOptions,
) -> PipelineResult<Volume> {
    let slices = load_image_slices(paths, options)?;
    let volume = Volume::assemble(&slices, options.spacing)?;
    let (depth, height, width) = volume.dim();
    info!(depth, height, width, bit_depth = %volume.bit_depth(), "Assembled volume");
    Ok(volume)
}

/// Index of the first NaN or infinite voxel.
fn first_non_finite(voxels: &Array3<f32>) -> Option<(usize, usize, usize)> {
    voxels
        .indexed_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(index, _)| index)
}

/// Guess the slice axis of a NIfTI volume from its header.
///
/// Slices are usually taken along the axis with the fewest samples and the
/// coarsest spacing; each pairwise comparison scores a point for that axis.
pub fn guess_dir(dims: [u16; 8], pixdims: [f32; 8]) -> Direction {
    let dimensions = [
        (dims[1], pixdims[1]),
        (dims[2], pixdims[2]),
        (dims[3], pixdims[3]),
    ];
    let mut scores = [0, 0, 0];
    for i in 0..3 {
        for j in (i + 1)..3 {
            // increase chance if dim is smaller and/or pixdim is larger
            if dimensions[i].0 < dimensions[j].0 {
                scores[i] += 1;
            } else if dimensions[i].0 > dimensions[j].0 {
                scores[j] += 1;
            }
            if dimensions[i].1 > dimensions[j].1 {
                scores[i] += 1;
            } else if dimensions[i].1 < dimensions[j].1 {
                scores[j] += 1;
            }
        }
    }

    // ties favour the conventional acquisition axis
    let best = scores.iter().copied().max().unwrap_or(0);
    if scores[2] == best {
        Direction::Z
    } else if scores[1] == best {
        Direction::Y
    } else {
        Direction::X
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn slice(pixels: Array2<f32>, index: usize) -> Slice {
        Slice::new(pixels, index, BitDepth::Eight)
    }

    #[test]
    fn assembly_preserves_slice_order() {
        let slices = vec![
            slice(array![[0.0, 1.0], [2.0, 3.0]], 0),
            slice(array![[10.0, 11.0], [12.0, 13.0]], 1),
            slice(array![[20.0, 21.0], [22.0, 23.0]], 2),
        ];
        let volume = Volume::assemble(&slices, Spacing::unit()).unwrap();
        assert_eq!(volume.dim(), (3, 2, 2));
        assert_eq!(volume.voxels()[[0, 1, 0]], 2.0);
        assert_eq!(volume.voxels()[[2, 0, 1]], 21.0);
        assert_eq!(volume.slice(1).unwrap(), array![[10.0, 11.0], [12.0, 13.0]]);
        assert!(volume.slice(3).is_none());
        assert_eq!(volume.range(), Some((0.0, 23.0)));
        assert_eq!(volume.voxel_at(5), Some(11.0));
        assert_eq!(volume.voxel_at(12), None);
    }

    #[test]
    fn crop_keeps_the_same_region_of_every_slice() {
        let arr = Array3::from_shape_fn((2, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let volume = Volume::from_array(arr, Spacing::new(2.0, 1.0, 1.0).unwrap()).unwrap();
        let cropped = volume.cropped(&CropRect::new(1, 2, 3, 2)).unwrap();
        assert_eq!(cropped.dim(), (2, 2, 3));
        assert_eq!(cropped.voxels()[[1, 0, 0]], 121.0);
        assert_eq!(cropped.range(), Some((21.0, 133.0)));
        assert_eq!(cropped.spacing(), volume.spacing());
        assert!(matches!(
            volume.cropped(&CropRect::square(3, 0, 3)),
            Err(PipelineError::CropOutOfBounds { .. })
        ));
    }

    #[test]
    fn zero_slices_is_an_empty_volume() {
        let err = Volume::assemble(&[], Spacing::unit()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyVolume));
        let err = Volume::from_array(Array3::zeros((0, 4, 4)), Spacing::unit()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyVolume));
    }

    #[test]
    fn non_finite_voxels_are_rejected() {
        let mut arr = Array3::from_elem((1, 2, 4), f32::NAN);
        arr[[0, 0, 0]] = 1.0;
        let err = Volume::from_array(arr, Spacing::unit()).unwrap_err();
        assert!(matches!(err, PipelineError::NonFiniteVoxel { z: 0, y: 0, x: 1 }));

        let mut arr = Array3::zeros((3, 3, 3));
        arr[[2, 1, 0]] = f32::INFINITY;
        let err = Volume::from_array(arr, Spacing::unit()).unwrap_err();
        assert!(matches!(err, PipelineError::NonFiniteVoxel { z: 2, y: 1, x: 0 }));
    }

    #[test]
    fn assembler_rechecks_dimensions() {
        let slices = vec![
            slice(Array2::zeros((10, 10)), 0),
            slice(Array2::zeros((10, 10)), 1),
            slice(Array2::zeros((10, 12)), 2),
        ];
        let err = Volume::assemble(&slices, Spacing::unit()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                index: 2,
                width: 12,
                height: 10,
                ..
            }
        ));
    }

    #[test]
    fn widest_bit_depth_wins() {
        let slices = vec![
            Slice::new(Array2::zeros((2, 2)), 0, BitDepth::Eight),
            Slice::new(Array2::zeros((2, 2)), 1, BitDepth::Sixteen),
        ];
        let volume = Volume::assemble(&slices, Spacing::unit()).unwrap();
        assert_eq!(volume.bit_depth(), BitDepth::Sixteen);
    }

    #[test]
    fn zero_area_slices_have_no_range() {
        let volume = Volume::from_array(Array3::zeros((3, 0, 0)), Spacing::unit()).unwrap();
        assert_eq!(volume.voxel_count(), 0);
        assert_eq!(volume.range(), None);
        assert_eq!(volume.voxel_at(0), None);
    }

    #[test]
    fn non_standard_layout_is_normalised() {
        let arr = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let transposed = arr.clone().reversed_axes();
        let volume = Volume::from_array(transposed, Spacing::unit()).unwrap();
        assert_eq!(volume.dim(), (4, 3, 2));
        assert_eq!(volume.voxel_at(1), Some(100.0));
    }

    #[test]
    fn guess_prefers_few_coarse_samples() {
        let dims = [3, 256, 256, 40, 1, 1, 1, 1];
        let pixdims = [1.0, 0.5, 0.5, 3.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(guess_dir(dims, pixdims), Direction::Z);

        let dims = [3, 30, 256, 256, 1, 1, 1, 1];
        let pixdims = [1.0, 4.0, 0.5, 0.5, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(guess_dir(dims, pixdims), Direction::X);

        let isotropic = [3, 64, 64, 64, 1, 1, 1, 1];
        let unit = [1.0; 8];
        assert_eq!(guess_dir(isotropic, unit), Direction::Z);
    }

    #[test]
    fn reads_nifti_with_header_spacing() {
        use nifti::writer::WriterOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nii");
        // [i, j, k] = [x, y, z]
        let data = Array3::from_shape_fn((4, 3, 2), |(i, j, k)| (i + 10 * j + 100 * k) as f32);
        let mut header = nifti::NiftiHeader::default();
        header.pixdim = [1.0, 0.5, 0.75, 2.0, 1.0, 1.0, 1.0, 1.0];
        WriterOptions::new(&path)
            .reference_header(&header)
            .write_nifti(&data)
            .unwrap();

        let volume = Volume::from_nifti(&path, Some(Direction::Z)).unwrap();
        assert_eq!(volume.dim(), (2, 3, 4));
        assert_eq!(volume.voxels()[[1, 2, 3]], 123.0);
        let spacing = volume.spacing();
        assert_eq!((spacing.z, spacing.y, spacing.x), (2.0, 0.75, 0.5));

        let resliced = Volume::from_nifti(&path, Some(Direction::X)).unwrap();
        assert_eq!(resliced.dim(), (4, 2, 3));
        assert_eq!(resliced.voxels()[[3, 1, 2]], 123.0);

        let coronal = Volume::from_nifti(&path, Some(Direction::Y)).unwrap();
        assert_eq!(coronal.dim(), (3, 2, 4));
        assert_eq!(coronal.voxels()[[2, 1, 3]], 123.0);
        assert_eq!(coronal.spacing().z, 0.75);
    }
}
