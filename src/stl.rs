//! STL export and re-import.
//!
//! Binary layout:
//!
//! ```text
//! UINT8[80]    header (solid name, zero padded, never starting with "solid")
//! UINT32       triangle count
//! foreach triangle
//!     REAL32[3] normal
//!     REAL32[3] vertex 1
//!     REAL32[3] vertex 2
//!     REAL32[3] vertex 3
//!     UINT16    attribute byte count (0)
//! ```
//!
//! The ASCII flavour is the usual `solid` / `facet normal` / `outer loop`
//! text. Coordinates go out as `f32` in both flavours, written in ASCII with
//! the shortest text that parses back to the same `f32`.

use nalgebra::{Point3, Vector3};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ExportOptions, StlFormat};
use crate::error::{PipelineError, PipelineResult};
use crate::mesh::{vertex_index, Mesh};

const HEADER_SIZE: usize = 80;
const TRIANGLE_SIZE: usize = 50;

/// Write `mesh` to a new file at `path`.
///
/// The parent directory must already exist.
///
/// # Errors
///
/// `EmptyMesh` when the mesh has no faces (no file is created), `IoWrite`
/// when the file cannot be created or written.
pub fn export_mesh(mesh: &Mesh, path: &Path, options: &ExportOptions) -> PipelineResult<()> {
    if mesh.is_empty() {
        return Err(PipelineError::EmptyMesh);
    }
    let file = File::create(path).map_err(|e| PipelineError::write(path, e))?;
    let mut writer = BufWriter::new(file);
    write_stl(mesh, &mut writer, options)
        .and_then(|()| writer.flush())
        .map_err(|e| PipelineError::write(path, e))?;
    info!(
        path = %path.display(),
        faces = mesh.face_count(),
        format = ?options.format,
        "Wrote STL mesh"
    );
    Ok(())
}

/// Serialize `mesh` into `writer` in the flavour chosen by `options`.
///
/// Writes whatever it is given, including an empty mesh; [`export_mesh`] is
/// the checked entry point.
pub fn write_stl<W: Write>(mesh: &Mesh, writer: &mut W, options: &ExportOptions) -> io::Result<()> {
    match options.format {
        StlFormat::Binary => write_binary(mesh, writer, &options.name),
        StlFormat::Ascii => write_ascii(mesh, writer, &options.name),
    }
}

fn facets(mesh: &Mesh) -> impl Iterator<Item = (Vector3<f64>, [Point3<f64>; 3])> + '_ {
    (0..mesh.face_count()).filter_map(|face| {
        let corners = mesh.triangle(face)?;
        let normal = mesh.triangle_normal(face).unwrap_or_else(Vector3::zeros);
        Some((normal, corners))
    })
}

/// Binary header holding `name`.
///
/// Many readers take a file starting with `solid` for ASCII, so such names
/// are prefixed.
fn binary_header(name: &str) -> [u8; HEADER_SIZE] {
    let looks_ascii = name
        .trim_start()
        .get(..5)
        .is_some_and(|start| start.eq_ignore_ascii_case("solid"));
    let text = if looks_ascii {
        format!("STL {name}")
    } else {
        name.to_string()
    };
    let mut header = [0u8; HEADER_SIZE];
    let len = text.len().min(HEADER_SIZE);
    header[..len].copy_from_slice(&text.as_bytes()[..len]);
    header
}

fn write_binary<W: Write>(mesh: &Mesh, writer: &mut W, name: &str) -> io::Result<()> {
    writer.write_all(&binary_header(name))?;

    let count = u32::try_from(mesh.face_count())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many triangles for STL"))?;
    writer.write_all(&count.to_le_bytes())?;

    let mut record = Vec::with_capacity(TRIANGLE_SIZE);
    for (normal, [a, b, c]) in facets(mesh) {
        record.clear();
        push_f32_triplet(&mut record, [normal.x, normal.y, normal.z]);
        for p in [a, b, c] {
            push_f32_triplet(&mut record, [p.x, p.y, p.z]);
        }
        record.extend_from_slice(&0u16.to_le_bytes());
        writer.write_all(&record)?;
    }
    Ok(())
}

fn push_f32_triplet(bytes: &mut Vec<u8>, value: [f64; 3]) {
    for v in value {
        bytes.extend_from_slice(&(v as f32).to_le_bytes());
    }
}

fn write_ascii<W: Write>(mesh: &Mesh, writer: &mut W, name: &str) -> io::Result<()> {
    writeln!(writer, "solid {name}")?;
    for (n, corners) in facets(mesh) {
        writeln!(
            writer,
            "  facet normal {:e} {:e} {:e}",
            n.x as f32, n.y as f32, n.z as f32
        )?;
        writeln!(writer, "    outer loop")?;
        for p in corners {
            writeln!(
                writer,
                "      vertex {:e} {:e} {:e}",
                p.x as f32, p.y as f32, p.z as f32
            )?;
        }
        writeln!(writer, "    endloop")?;
        writeln!(writer, "  endfacet")?;
    }
    writeln!(writer, "endsolid {name}")
}

/// Read a binary or ASCII STL file back into an indexed mesh.
///
/// A file whose length matches the triangle count in its header is binary;
/// otherwise it must be ASCII text starting with `solid`. Corners with the
/// same `f32` coordinates become one vertex.
///
/// # Errors
///
/// `IoRead` when the file cannot be read or is not valid STL.
pub fn read_stl(path: &Path) -> PipelineResult<Mesh> {
    let origin = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| PipelineError::read(origin.clone(), e))?;
    let triangles = if is_binary(&bytes) {
        parse_binary(&bytes)
    } else {
        parse_ascii(&bytes)
    }
    .map_err(|message| PipelineError::malformed(origin.clone(), message))?;
    debug!(origin, triangles = triangles.len(), "Parsed STL");
    weld(&triangles)
}

fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_SIZE + 4 {
        return false;
    }
    let count = u32::from_le_bytes([
        bytes[HEADER_SIZE],
        bytes[HEADER_SIZE + 1],
        bytes[HEADER_SIZE + 2],
        bytes[HEADER_SIZE + 3],
    ]);
    let expected = (HEADER_SIZE + 4) as u64 + u64::from(count) * TRIANGLE_SIZE as u64;
    bytes.len() as u64 == expected
}

type Triangle = [[f32; 3]; 3];

fn parse_binary(bytes: &[u8]) -> Result<Vec<Triangle>, String> {
    let records = bytes[HEADER_SIZE + 4..].chunks_exact(TRIANGLE_SIZE);
    if !records.remainder().is_empty() {
        return Err("truncated triangle record".to_string());
    }
    Ok(records
        .map(|record| {
            // skip the stored normal
            [12, 24, 36].map(|start| read_vertex(&record[start..start + 12]))
        })
        .collect())
}

fn read_vertex(buf: &[u8]) -> [f32; 3] {
    [0, 4, 8].map(|i| f32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]))
}

fn parse_ascii(bytes: &[u8]) -> Result<Vec<Triangle>, String> {
    let text =
        std::str::from_utf8(bytes).map_err(|_| "neither binary STL nor ASCII text".to_string())?;
    if !text.trim_start().starts_with("solid") {
        return Err("ASCII STL must start with 'solid'".to_string());
    }

    let mut triangles = Vec::new();
    let mut corners: Vec<[f32; 3]> = Vec::with_capacity(3);
    for (number, line) in text.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("facet") => corners.clear(),
            Some("vertex") => {
                let mut coords = [0f32; 3];
                for coord in &mut coords {
                    *coord = tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| format!("bad vertex on line {}", number + 1))?;
                }
                corners.push(coords);
            }
            Some("endfacet") => {
                let triangle: Triangle = corners
                    .as_slice()
                    .try_into()
                    .map_err(|_| {
                        format!("facet ending on line {} does not have 3 vertices", number + 1)
                    })?;
                triangles.push(triangle);
                corners.clear();
            }
            Some("endsolid") => break,
            _ => {}
        }
    }
    Ok(triangles)
}

fn weld(triangles: &[Triangle]) -> PipelineResult<Mesh> {
    let mut lookup: HashMap<[u32; 3], u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut faces = Vec::with_capacity(triangles.len());
    for triangle in triangles {
        let mut face = [0u32; 3];
        for (slot, &corner) in face.iter_mut().zip(triangle) {
            let bits = corner.map(f32::to_bits);
            *slot = match lookup.get(&bits) {
                Some(&index) => index,
                None => {
                    let index = vertex_index(vertices.len())?;
                    let [x, y, z] = corner.map(f64::from);
                    vertices.push(Point3::new(x, y, z));
                    lookup.insert(bits, index);
                    index
                }
            };
        }
        faces.push(face);
    }
    Mesh::from_parts(vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Spacing;
    use crate::extract::extract_surface;
    use crate::volume::Volume;
    use ndarray::Array3;
    use std::collections::BTreeSet;

    fn triangle() -> Mesh {
        Mesh::from_parts(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
        .unwrap()
    }

    fn options(format: StlFormat, name: &str) -> ExportOptions {
        ExportOptions {
            format,
            name: name.to_string(),
        }
    }

    fn voxel_mesh() -> Mesh {
        let mut voxels = Array3::zeros((4, 4, 4));
        voxels[[1, 2, 1]] = 200.0;
        voxels[[2, 2, 1]] = 90.0;
        let volume = Volume::from_array(voxels, Spacing::new(0.5, 1.0, 1.0).unwrap()).unwrap();
        extract_surface(&volume, 64.0).unwrap()
    }

    /// Triangles as sets of corner bit patterns, independent of order.
    fn triangle_set(mesh: &Mesh) -> BTreeSet<[[u32; 3]; 3]> {
        (0..mesh.face_count())
            .map(|face| {
                let mut corners = mesh
                    .triangle(face)
                    .unwrap()
                    .map(|p| [p.x, p.y, p.z].map(|c| (c as f32).to_bits()));
                corners.sort();
                corners
            })
            .collect()
    }

    #[test]
    fn binary_stl_has_valid_size_and_triangle_count() {
        let mut bytes = Vec::new();
        write_stl(&triangle(), &mut bytes, &options(StlFormat::Binary, "test")).unwrap();
        assert_eq!(bytes.len(), 84 + 50);
        assert_eq!(&bytes[..4], b"test");
        assert!(bytes[4..80].iter().all(|&b| b == 0));
        assert_eq!(u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]), 1);
        // normal is +z
        assert_eq!(read_vertex(&bytes[84..96]), [0.0, 0.0, 1.0]);
        assert_eq!(read_vertex(&bytes[108..120]), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn ascii_stl_contains_required_tokens() {
        let mut bytes = Vec::new();
        write_stl(&triangle(), &mut bytes, &options(StlFormat::Ascii, "tri")).unwrap();
        let stl = String::from_utf8(bytes).unwrap();
        assert!(stl.starts_with("solid tri\n"));
        assert!(stl.contains("facet normal 0e0 0e0 1e0"));
        assert!(stl.contains("outer loop"));
        assert!(stl.contains("vertex 1e0 0e0 0e0"));
        assert!(stl.ends_with("endsolid tri\n"));
    }

    #[test]
    fn empty_mesh_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.stl");
        let err = export_mesh(&Mesh::default(), &path, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyMesh));
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mesh.stl");
        let err = export_mesh(&triangle(), &path, &ExportOptions::default()).unwrap_err();
        match err {
            PipelineError::IoWrite { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn both_flavours_read_back_to_the_same_triangles() {
        let mesh = voxel_mesh();
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("a.stl");
        let ascii = dir.path().join("b.stl");
        export_mesh(&mesh, &binary, &options(StlFormat::Binary, "ctmesh")).unwrap();
        export_mesh(&mesh, &ascii, &options(StlFormat::Ascii, "ctmesh")).unwrap();

        let from_binary = read_stl(&binary).unwrap();
        let from_ascii = read_stl(&ascii).unwrap();
        assert_eq!(from_binary.face_count(), mesh.face_count());
        assert_eq!(from_binary.vertex_count(), mesh.vertex_count());
        assert_eq!(triangle_set(&from_binary), triangle_set(&mesh));
        assert_eq!(triangle_set(&from_ascii), triangle_set(&mesh));
    }

    #[test]
    fn exporting_twice_gives_identical_files() {
        let mesh = voxel_mesh();
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.stl");
        let second = dir.path().join("second.stl");
        export_mesh(&mesh, &first, &ExportOptions::default()).unwrap();
        export_mesh(&mesh, &second, &ExportOptions::default()).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }

    #[test]
    fn binary_header_never_starts_with_solid() {
        for name in ["solid looking", "  SOLID", "solid"] {
            let mut bytes = Vec::new();
            write_stl(&triangle(), &mut bytes, &options(StlFormat::Binary, name)).unwrap();
            assert!(!bytes[..5].eq_ignore_ascii_case(b"solid"), "{name}");
            assert_eq!(bytes.len(), 84 + 50);
        }
        let header = binary_header("solid looking");
        assert!(header.starts_with(b"STL solid looking\0"));
        assert!(binary_header("x".repeat(100).as_str()).iter().all(|&b| b == b'x'));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.stl");
        export_mesh(&triangle(), &path, &options(StlFormat::Binary, "solid looking")).unwrap();
        assert_eq!(read_stl(&path).unwrap().face_count(), 1);
    }

    #[test]
    fn binary_file_with_a_solid_header_still_reads_as_binary() {
        let mut bytes = Vec::new();
        write_stl(&triangle(), &mut bytes, &options(StlFormat::Binary, "t")).unwrap();
        bytes[..6].copy_from_slice(b"solid ");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.stl");
        fs::write(&path, &bytes).unwrap();
        assert_eq!(read_stl(&path).unwrap().face_count(), 1);
    }

    #[test]
    fn garbage_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.stl");
        fs::write(&path, [0xffu8, 0x00, 0x13]).unwrap();
        assert!(matches!(read_stl(&path), Err(PipelineError::IoRead { .. })));

        let truncated =
            "solid x\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nendloop\nendfacet\n";
        fs::write(&path, truncated).unwrap();
        let err = read_stl(&path).unwrap_err();
        assert!(err.to_string().contains("line 6"));

        assert!(matches!(
            read_stl(&dir.path().join("absent.stl")),
            Err(PipelineError::IoRead { .. })
        ));
    }
}
