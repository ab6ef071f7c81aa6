//! Marching-cubes iso-surface extraction.
//!
//! Every 2x2x2 group of neighbouring voxels forms a cube. A corner is inside
//! when its intensity is `>= threshold`, and the eight inside bits pick the
//! triangles from [`case_triangles`]. Triangle corners sit on cut lattice edges
//! at the linearly interpolated crossing, and every cut edge yields exactly one
//! vertex shared by all cubes around it.
//!
//! Nothing is padded: the surface stops at the outer faces of the volume and
//! is open there.

use nalgebra::Point3;
use ndarray::ArrayView3;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{ExtractOptions, Spacing};
use crate::error::{PipelineError, PipelineResult};
use crate::mesh::{vertex_index, Mesh};
use crate::tables::{case_triangles, edge_span, CORNER_OFFSETS, EDGE_AXES};
use crate::volume::Volume;

/// Extract the iso-surface of `volume` at `threshold` on the current thread.
///
/// # Errors
///
/// `ThresholdOutOfRange` when `threshold` is NaN or outside the volume's
/// intensity range, `DegenerateVolume` when any dimension is below 2. A valid
/// threshold that no cube crosses gives an empty mesh, not an error.
pub fn extract_surface(volume: &Volume, threshold: f32) -> PipelineResult<Mesh> {
    extract_surface_with(volume, threshold, &ExtractOptions::default())
}

/// [`extract_surface`], optionally spreading z-slabs over the rayon pool.
///
/// Slabs are merged in z order so the result is identical either way.
pub fn extract_surface_with(
    volume: &Volume,
    threshold: f32,
    options: &ExtractOptions,
) -> PipelineResult<Mesh> {
    let (depth, height, width) = volume.dim();
    let Some((min, max)) = volume.range() else {
        return Err(PipelineError::DegenerateVolume {
            depth,
            height,
            width,
        });
    };
    if threshold.is_nan() || threshold < min || threshold > max {
        return Err(PipelineError::ThresholdOutOfRange {
            threshold,
            min,
            max,
        });
    }
    if depth < 2 || height < 2 || width < 2 {
        return Err(PipelineError::DegenerateVolume {
            depth,
            height,
            width,
        });
    }

    let grid = Grid {
        voxels: volume.voxels(),
        threshold,
        spacing: volume.spacing(),
        height,
        width,
    };
    let slabs: Vec<Slab> = if options.parallel {
        (0..depth - 1)
            .into_par_iter()
            .map(|z| grid.march_slab(z))
            .collect::<PipelineResult<_>>()?
    } else {
        (0..depth - 1)
            .map(|z| grid.march_slab(z))
            .collect::<PipelineResult<_>>()?
    };
    debug!(slabs = slabs.len(), parallel = options.parallel, "Marched all slabs");

    let mesh = merge_slabs(slabs)?;
    info!(
        threshold,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Extracted iso-surface"
    );
    Ok(mesh)
}

struct Grid<'a> {
    voxels: ArrayView3<'a, f32>,
    threshold: f32,
    spacing: Spacing,
    height: usize,
    width: usize,
}

/// Output of one layer of cubes. Vertices carry their lattice edge key so
/// slabs can be welded together afterwards.
#[derive(Default)]
struct Slab {
    vertices: Vec<(usize, Point3<f64>)>,
    triangles: Vec<[u32; 3]>,
    lookup: HashMap<usize, u32>,
}

impl Grid<'_> {
    fn value(&self, [x, y, z]: [usize; 3]) -> f32 {
        self.voxels[[z, y, x]]
    }

    /// Unique id of the lattice edge leaving `point` along `axis`.
    fn edge_key(&self, [x, y, z]: [usize; 3], axis: usize) -> usize {
        ((z * self.height + y) * self.width + x) * 3 + axis
    }

    /// All cubes whose lowest corner lies in slice `z`.
    fn march_slab(&self, z: usize) -> PipelineResult<Slab> {
        let mut slab = Slab::default();
        for y in 0..self.height - 1 {
            for x in 0..self.width - 1 {
                let origin = [x, y, z];
                let mut values = [0f32; 8];
                let mut case = 0u8;
                for (corner, offset) in CORNER_OFFSETS.iter().enumerate() {
                    let value = self.value([x + offset[0], y + offset[1], z + offset[2]]);
                    values[corner] = value;
                    if value >= self.threshold {
                        case |= 1 << corner;
                    }
                }

                for triangle in case_triangles(case) {
                    let mut face = [0u32; 3];
                    for (slot, &edge) in face.iter_mut().zip(triangle) {
                        *slot = self.edge_vertex(&mut slab, origin, usize::from(edge), &values)?;
                    }
                    slab.triangles.push(face);
                }
            }
        }
        Ok(slab)
    }

    /// Slab-local index of the vertex on cube edge `edge`, created on first use.
    fn edge_vertex(
        &self,
        slab: &mut Slab,
        origin: [usize; 3],
        edge: usize,
        values: &[f32; 8],
    ) -> PipelineResult<u32> {
        let (lo, hi) = edge_span(edge);
        let axis = EDGE_AXES[edge];
        let offset = CORNER_OFFSETS[lo];
        let point = [origin[0] + offset[0], origin[1] + offset[1], origin[2] + offset[2]];
        let key = self.edge_key(point, axis);
        if let Some(&index) = slab.lookup.get(&key) {
            return Ok(index);
        }

        // always interpolate from the lower lattice point so neighbours agree
        let (v_lo, v_hi) = (f64::from(values[lo]), f64::from(values[hi]));
        let t = (f64::from(self.threshold) - v_lo) / (v_hi - v_lo);
        let mut coords = point.map(|c| c as f64);
        coords[axis] += t;
        let position = Point3::new(
            coords[0] * self.spacing.x,
            coords[1] * self.spacing.y,
            coords[2] * self.spacing.z,
        );

        let index = vertex_index(slab.vertices.len())?;
        slab.vertices.push((key, position));
        slab.lookup.insert(key, index);
        Ok(index)
    }
}

/// Weld slab outputs into one mesh, in slab order.
fn merge_slabs(slabs: Vec<Slab>) -> PipelineResult<Mesh> {
    let mut welded: HashMap<usize, u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    for slab in slabs {
        let mut remap = Vec::with_capacity(slab.vertices.len());
        for (key, position) in slab.vertices {
            let index = match welded.get(&key) {
                Some(&index) => index,
                None => {
                    let index = vertex_index(vertices.len())?;
                    vertices.push(position);
                    welded.insert(key, index);
                    index
                }
            };
            remap.push(index);
        }
        faces.extend(
            slab.triangles
                .iter()
                .map(|triangle| triangle.map(|i| remap[i as usize])),
        );
    }
    Mesh::from_parts(vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn volume(voxels: Array3<f32>) -> Volume {
        Volume::from_array(voxels, Spacing::unit()).unwrap()
    }

    fn single_voxel() -> Volume {
        let mut voxels = Array3::zeros((4, 4, 4));
        voxels[[1, 1, 1]] = 255.0;
        volume(voxels)
    }

    /// Every directed edge is matched by its reverse exactly once, so each
    /// edge has exactly two triangles.
    fn assert_closed(mesh: &Mesh) {
        let mut directed: HashMap<(u32, u32), usize> = HashMap::new();
        for face in mesh.faces() {
            for k in 0..3 {
                *directed.entry((face[k], face[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        for (&(a, b), &count) in &directed {
            assert_eq!(count, 1, "edge {a}->{b} used twice in the same direction");
            assert_eq!(directed.get(&(b, a)), Some(&1), "edge {a}->{b} is open");
        }
    }

    fn assert_indices_in_bounds(mesh: &Mesh) {
        let count = mesh.vertex_count() as u32;
        assert!(mesh.faces().iter().flatten().all(|&i| i < count));
    }

    #[test]
    fn single_voxel_is_enclosed() {
        let mesh = extract_surface(&single_voxel(), 128.0).unwrap();
        assert_eq!(mesh.face_count(), 8);
        assert_eq!(mesh.vertex_count(), 6);
        assert_closed(&mesh);
        assert_indices_in_bounds(&mesh);
        // normals point away from the bright voxel
        assert!(mesh.signed_volume() > 0.0);

        let (lo, hi) = mesh.bounds().unwrap();
        let reach = 127.0 / 255.0;
        assert_relative_eq!(lo.x, 1.0 - reach, epsilon = 1e-9);
        assert_relative_eq!(hi.z, 1.0 + reach, epsilon = 1e-9);
    }

    #[test]
    fn vertices_scale_with_spacing() {
        let mut voxels = Array3::zeros((4, 4, 4));
        voxels[[1, 1, 1]] = 255.0;
        let v = Volume::from_array(voxels, Spacing::new(2.0, 1.0, 0.5).unwrap()).unwrap();
        let (lo, hi) = extract_surface(&v, 128.0).unwrap().bounds().unwrap();
        let reach = 127.0 / 255.0;
        assert_relative_eq!(lo.z, 2.0 * (1.0 - reach), epsilon = 1e-9);
        assert_relative_eq!(hi.z, 2.0 * (1.0 + reach), epsilon = 1e-9);
        assert_relative_eq!(hi.y, 1.0 + reach, epsilon = 1e-9);
        assert_relative_eq!(hi.x, 0.5 * (1.0 + reach), epsilon = 1e-9);
    }

    #[test]
    fn surface_stays_open_at_the_volume_boundary() {
        let mut voxels = Array3::zeros((3, 3, 3));
        voxels[[0, 0, 0]] = 10.0;
        let mesh = extract_surface(&volume(voxels), 5.0).unwrap();
        assert_eq!(mesh.face_count(), 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn ball_is_closed_with_the_right_volume() {
        let centre = 7.5;
        let voxels = Array3::from_shape_fn((16, 16, 16), |(z, y, x)| {
            let d = ((x as f32 - centre).powi(2)
                + (y as f32 - centre).powi(2)
                + (z as f32 - centre).powi(2))
            .sqrt();
            100.0 - 10.0 * d
        });
        let mesh = extract_surface(&volume(voxels), 50.0).unwrap();
        assert_closed(&mesh);
        assert_indices_in_bounds(&mesh);
        let expected = 4.0 / 3.0 * std::f64::consts::PI * 5f64.powi(3);
        assert_relative_eq!(mesh.signed_volume(), expected, max_relative = 0.05);
    }

    #[test]
    fn threshold_at_the_minimum_gives_an_empty_mesh() {
        // every corner is inside, so no cube is crossed
        let voxels = Array3::from_shape_fn((3, 3, 3), |(z, y, x)| (x + y + z) as f32);
        let mesh = extract_surface(&volume(voxels), 0.0).unwrap();
        assert!(mesh.is_empty());

        let uniform = volume(Array3::from_elem((4, 4, 4), 100.0));
        let mesh = extract_surface(&uniform, 100.0).unwrap();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
    }

    #[test]
    fn threshold_outside_the_range_is_rejected() {
        let v = single_voxel();
        for threshold in [-1.0, 255.5, f32::NAN] {
            assert!(matches!(
                extract_surface(&v, threshold),
                Err(PipelineError::ThresholdOutOfRange { min, max, .. })
                    if min == 0.0 && max == 255.0
            ));
        }
        let uniform = volume(Array3::from_elem((4, 4, 4), 100.0));
        for threshold in [50.0, 150.0] {
            assert!(matches!(
                extract_surface(&uniform, threshold),
                Err(PipelineError::ThresholdOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn thin_volumes_are_degenerate() {
        for shape in [(1, 4, 4), (4, 1, 4), (4, 4, 1)] {
            let mut voxels = Array3::zeros(shape);
            voxels[[0, 0, 0]] = 1.0;
            assert!(matches!(
                extract_surface(&volume(voxels), 0.5),
                Err(PipelineError::DegenerateVolume { .. })
            ));
        }
        let empty = volume(Array3::zeros((2, 0, 2)));
        assert!(matches!(
            extract_surface(&empty, 0.0),
            Err(PipelineError::DegenerateVolume { .. })
        ));
    }

    #[test]
    fn corner_equal_to_threshold_counts_as_inside() {
        let mut voxels = Array3::zeros((2, 2, 2));
        voxels[[0, 0, 0]] = 128.0;
        let mesh = extract_surface(&volume(voxels), 128.0).unwrap();
        assert_eq!(mesh.face_count(), 1);
        // the crossing lands on the corner itself
        assert!(mesh.vertices().iter().all(|v| v.coords.norm() < 1e-12));
    }

    #[test]
    fn parallel_matches_sequential() {
        let voxels =
            Array3::from_shape_fn((9, 7, 8), |(z, y, x)| ((x * 31 + y * 17 + z * 7) % 13) as f32);
        let v = volume(voxels);
        let sequential = extract_surface(&v, 6.5).unwrap();
        let parallel = extract_surface_with(&v, 6.5, &ExtractOptions { parallel: true }).unwrap();
        assert!(!sequential.is_empty());
        assert_eq!(sequential, parallel);
        assert_eq!(sequential, extract_surface(&v, 6.5).unwrap());
        assert_indices_in_bounds(&sequential);
    }

    #[test]
    fn noisy_volume_has_no_cracks() {
        // ambiguous faces everywhere; interior edges must still pair up
        let voxels = Array3::from_shape_fn((6, 6, 6), |(z, y, x)| {
            let border = [x, y, z].iter().any(|&c| c == 0 || c == 5);
            if border {
                0.0
            } else {
                ((x * 5 + y * 3 + z * 11) % 7) as f32 + 1.0
            }
        });
        let mesh = extract_surface(&volume(voxels), 4.5).unwrap();
        assert!(!mesh.is_empty());
        assert_closed(&mesh);
    }

    #[test]
    fn random_volumes_are_closed_manifolds() {
        for seed in 0..300u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let voxels = Array3::from_shape_fn((7, 7, 7), |(z, y, x)| {
                if [x, y, z].iter().any(|&c| c == 0 || c == 6) {
                    0.0
                } else {
                    rng.gen_range(0.05f32..100.0)
                }
            });
            let mesh = extract_surface(&volume(voxels), 50.0).unwrap();
            assert_closed(&mesh);
        }
    }
}
