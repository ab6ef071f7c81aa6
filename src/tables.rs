//! Cube geometry and the per-case triangle table for marching cubes.
//!
//! Instead of a hand-typed 256-row table the triangulation of every case is
//! built once, on first use, by tracing the iso-contour across the six faces
//! of the cube:
//!
//! - on each face the cut edges are paired into segments; a face whose two
//!   inside corners sit diagonally opposite gets two segments, each cutting
//!   off one inside corner
//! - every segment is oriented so that, seen from outside the cube, the
//!   surface normal points from the inside corners towards the outside ones
//! - segments chain into closed loops (each cut edge lies on exactly two
//!   faces), and each loop is split into triangles without a diagonal between
//!   two cut edges of the same face
//!
//! Face decisions depend only on the four corners of that face, so two cubes
//! sharing a face always agree and the extracted surface has no cracks. The
//! only triangle sides lying in a face plane are the contour segments, so
//! every surface edge is shared by exactly two triangles.

use std::sync::OnceLock;

/// Corner positions as `[x, y, z]` offsets from the cube origin.
pub const CORNER_OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Corner pairs joined by each of the 12 cube edges.
pub const EDGE_ENDPOINTS: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Lattice axis (0 = x, 1 = y, 2 = z) each edge runs along.
pub const EDGE_AXES: [usize; 12] = [0, 1, 0, 1, 0, 1, 0, 1, 2, 2, 2, 2];

/// Endpoints of `edge` ordered lower lattice point first.
pub fn edge_span(edge: usize) -> (usize, usize) {
    let [a, b] = EDGE_ENDPOINTS[edge];
    if CORNER_OFFSETS[a] <= CORNER_OFFSETS[b] {
        (a, b)
    } else {
        (b, a)
    }
}

struct Face {
    /// Corners in cyclic order.
    corners: [usize; 4],
    /// `edges[k]` joins `corners[k]` and `corners[k + 1]`.
    edges: [usize; 4],
    /// Outward normal.
    normal: [i32; 3],
}

const FACES: [Face; 6] = [
    Face {
        corners: [0, 1, 2, 3],
        edges: [0, 1, 2, 3],
        normal: [0, 0, -1],
    },
    Face {
        corners: [4, 5, 6, 7],
        edges: [4, 5, 6, 7],
        normal: [0, 0, 1],
    },
    Face {
        corners: [0, 1, 5, 4],
        edges: [0, 9, 4, 8],
        normal: [0, -1, 0],
    },
    Face {
        corners: [3, 2, 6, 7],
        edges: [2, 10, 6, 11],
        normal: [0, 1, 0],
    },
    Face {
        corners: [0, 3, 7, 4],
        edges: [3, 11, 7, 8],
        normal: [-1, 0, 0],
    },
    Face {
        corners: [1, 2, 6, 5],
        edges: [1, 10, 5, 9],
        normal: [1, 0, 0],
    },
];

/// Triangles for a case, as triples of cube edge ids.
pub type CaseTriangles = Vec<[u8; 3]>;

static CASES: OnceLock<Vec<CaseTriangles>> = OnceLock::new();

/// Triangles for the cube whose inside corners are the set bits of `case`.
///
/// Bit `i` refers to corner `i` of [`CORNER_OFFSETS`].
pub fn case_triangles(case: u8) -> &'static [[u8; 3]] {
    let cases = CASES.get_or_init(|| (0..=255u8).map(triangulate_case).collect());
    &cases[usize::from(case)]
}

fn is_inside(case: u8, corner: usize) -> bool {
    case & (1 << corner) != 0
}

/// Twice the position of a corner.
fn corner_pos2(corner: usize) -> [i32; 3] {
    CORNER_OFFSETS[corner].map(|c| 2 * c as i32)
}

/// Twice the position of an edge midpoint.
fn edge_mid2(edge: usize) -> [i32; 3] {
    let [a, b] = EDGE_ENDPOINTS[edge];
    let (pa, pb) = (CORNER_OFFSETS[a], CORNER_OFFSETS[b]);
    [0, 1, 2].map(|i| (pa[i] + pb[i]) as i32)
}

fn cross(a: [i32; 3], b: [i32; 3]) -> [i32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [i32; 3], b: [i32; 3]) -> i32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Orient the segment between cut edges `p` and `q` on `face`.
///
/// With `s` pointing from the segment into the inside region, the contour runs
/// along `normal x s`.
fn orient(case: u8, face: &Face, p: usize, q: usize) -> (usize, usize) {
    let [a, b] = EDGE_ENDPOINTS[p];
    let inside_corner = if is_inside(case, a) { a } else { b };
    let (mp, mq) = (edge_mid2(p), edge_mid2(q));
    let corner = corner_pos2(inside_corner);
    // all terms scaled by 4
    let s = [0, 1, 2].map(|i| 2 * corner[i] - mp[i] - mq[i]);
    let d = [0, 1, 2].map(|i| mq[i] - mp[i]);
    if dot(cross(face.normal, s), d) > 0 {
        (p, q)
    } else {
        (q, p)
    }
}

/// Whether cube edges `a` and `b` lie on a common face.
fn share_face(a: usize, b: usize) -> bool {
    FACES
        .iter()
        .any(|face| face.edges.contains(&a) && face.edges.contains(&b))
}

/// Whether `ring[i]` and `ring[j]` (with `i < j`) may be joined by a triangle side.
///
/// Ring neighbours are always fine. Any other chord between two cut edges of
/// one face would lie in that face plane, where the neighbouring cube can add
/// the same chord.
fn chord_allowed(ring: &[usize], i: usize, j: usize) -> bool {
    j - i == 1 || j - i == ring.len() - 1 || !share_face(ring[i], ring[j])
}

/// Triangulate the sub-polygon `ring[i..=j]` closed by the side `i`-`j`.
fn triangulate_span(ring: &[usize], i: usize, j: usize) -> Option<CaseTriangles> {
    if j - i < 2 {
        return Some(Vec::new());
    }
    (i + 1..j).find_map(|k| {
        if !chord_allowed(ring, i, k) || !chord_allowed(ring, k, j) {
            return None;
        }
        let mut triangles = triangulate_span(ring, i, k)?;
        triangles.push([ring[i] as u8, ring[k] as u8, ring[j] as u8]);
        triangles.extend(triangulate_span(ring, k, j)?);
        Some(triangles)
    })
}

/// Split a closed contour into triangles keeping its orientation.
fn triangulate_ring(ring: &[usize]) -> Option<CaseTriangles> {
    match ring.len() {
        0..=2 => Some(Vec::new()),
        n => triangulate_span(ring, 0, n - 1),
    }
}

fn triangulate_case(case: u8) -> CaseTriangles {
    let mut next: [Option<usize>; 12] = [None; 12];

    for face in &FACES {
        let inside = face.corners.map(|c| is_inside(case, c));
        let cut: Vec<usize> = (0..4)
            .filter(|&k| inside[k] != inside[(k + 1) % 4])
            .collect();
        let segments: Vec<(usize, usize)> = match cut.len() {
            2 => vec![(face.edges[cut[0]], face.edges[cut[1]])],
            // inside corners on a diagonal are kept apart
            4 => (0..4)
                .filter(|&k| inside[k])
                .map(|k| (face.edges[(k + 3) % 4], face.edges[k]))
                .collect(),
            _ => Vec::new(),
        };
        for (p, q) in segments {
            let (from, to) = orient(case, face, p, q);
            next[from] = Some(to);
        }
    }

    let mut triangles = Vec::new();
    let mut visited = [false; 12];
    for start in 0..12 {
        if visited[start] || next[start].is_none() {
            continue;
        }
        let mut ring = vec![start];
        visited[start] = true;
        let mut current = start;
        while let Some(edge) = next[current] {
            if edge == start || visited[edge] {
                break;
            }
            visited[edge] = true;
            ring.push(edge);
            current = edge;
        }
        match triangulate_ring(&ring) {
            Some(split) => triangles.extend(split),
            None => {
                // fan from the first edge; no contour in the table gets here
                triangles.extend(
                    (1..ring.len() - 1).map(|i| [ring[0] as u8, ring[i] as u8, ring[i + 1] as u8]),
                );
            }
        }
    }
    triangles
}
