//! Indexed triangle mesh produced by surface extraction.

use nalgebra::{Point3, Vector3};

use crate::error::{PipelineError, PipelineResult};

/// Face index for the vertex stored at position `count`.
pub(crate) fn vertex_index(count: usize) -> PipelineResult<u32> {
    u32::try_from(count).map_err(|_| PipelineError::TooManyVertices)
}

/// Vertices plus triangles indexing into them.
///
/// Faces wind counter-clockwise seen from outside the iso-surface, so
/// right-hand normals point from higher intensity towards lower intensity.
/// A mesh is only built whole through the checked [`Mesh::from_parts`], so
/// every face index is in bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Build a mesh, rejecting faces that reference missing vertices.
    pub fn from_parts(vertices: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> PipelineResult<Self> {
        let vertex_count = vertices.len();
        for (face, indices) in faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(PipelineError::DanglingFaceIndex {
                    face,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self { vertices, faces })
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Corner positions of face `face`.
    pub fn triangle(&self, face: usize) -> Option<[Point3<f64>; 3]> {
        let [a, b, c] = *self.faces.get(face)?;
        Some([
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ])
    }

    /// Unit normal of face `face` by the right-hand rule.
    ///
    /// Zero for a degenerate (zero-area) triangle.
    pub fn triangle_normal(&self, face: usize) -> Option<Vector3<f64>> {
        let [v0, v1, v2] = self.triangle(face)?;
        let normal = (v1 - v0).cross(&(v2 - v0));
        let len = normal.norm();
        Some(if len > f64::EPSILON {
            normal / len
        } else {
            Vector3::zeros()
        })
    }

    /// Axis-aligned bounding box as `(min, max)` corners.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (lo.inf(v), hi.sup(v))
        }))
    }

    /// Volume enclosed by the mesh, positive when normals face outward.
    ///
    /// Only meaningful for closed meshes.
    pub fn signed_volume(&self) -> f64 {
        let volume: f64 = self
            .faces
            .iter()
            .map(|&[a, b, c]| {
                let (v0, v1, v2) = (
                    self.vertices[a as usize].coords,
                    self.vertices[b as usize].coords,
                    self.vertices[c as usize].coords,
                );
                v0.dot(&v1.cross(&v2))
            })
            .sum();
        volume / 6.0
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len())
            .filter_map(|face| self.triangle(face))
            .map(|[v0, v1, v2]| (v1 - v0).cross(&(v2 - v0)).norm() / 2.0)
            .sum()
    }
}
