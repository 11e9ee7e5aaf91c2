//! Quad extraction from a repaired edge lattice.
//!
//! Extraction runs in three steps:
//!
//! 1. Zero-translation edges are collapsed, so vertices on the same lattice
//!    point become one output vertex. An edge is only collapsed when it
//!    passes the link condition: the shared neighbours of its endpoints are
//!    exactly the apexes of its triangles. The collapsed triangle mesh keeps
//!    the topology of the input.
//! 2. The surviving triangles are paired across shared edges. Half cells
//!    that name the two sides of the same lattice diagonal are paired first;
//!    everything else is paired greedily across its longest lattice edge and
//!    completed to a maximum matching with [`Blossom`] augmenting paths.
//! 3. On open surfaces a triangle left without a partner is dropped at the
//!    boundary. On closed surfaces every triangle must be paired, and the
//!    result must be closed with the Euler characteristic of the input.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use nalgebra::{Point3, Vector3};

use crate::algo::hierarchy::Constraint;
use crate::algo::prepare::WorkingMesh;
use crate::error::{QuadError, Result};
use crate::mesh::{QuadMesh, SurfaceMesh, UnionFind, INVALID};

use super::lattice::{EdgeLattice, FaceState};
use super::matching::{Blossom, UNMATCHED};

/// Sweeps over the zero edges; a collapse can unblock an earlier one.
const MAX_COLLAPSE_PASSES: usize = 4;

/// Cone vertex closing every boundary loop in a link.
const OUTSIDE: usize = INVALID;

/// Result of extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadIndexMap {
    /// Output vertex of every working mesh vertex (`INVALID` if unused).
    pub vertex_map: Vec<usize>,
    /// The extracted quad mesh, in input coordinates.
    pub mesh: QuadMesh,
    /// Quads not built from two half cells of one lattice cell.
    pub rerouted: usize,
    /// Boundary triangles dropped for lack of a partner.
    pub dropped: usize,
}

/// Extract the quad mesh.
///
/// `origins` are the lattice origins of the working mesh vertices. Faces
/// the repair left invalid are paired with a neighbour like any other
/// triangle, so they never leave holes.
///
/// # Errors
/// Returns [`QuadError::TopologyExtraction`] when no quad survives, the
/// result is not a manifold quad mesh, or a closed input does not give a
/// closed quad mesh of the same Euler characteristic.
pub fn extract(
    working: &WorkingMesh,
    lattice: &EdgeLattice,
    origins: &[Vector3<f64>],
    orientation_singular: &[bool],
) -> Result<QuadIndexMap> {
    let mesh = &working.mesh;
    let (cluster, num_clusters) = collapse_zero_edges(mesh, lattice);
    let quotient = Quotient::build(mesh, &cluster)?;
    let pairing = quotient.pair(mesh, lattice, orientation_singular);

    if mesh.is_closed() && pairing.dropped > 0 {
        return Err(QuadError::TopologyExtraction(format!(
            "{} triangles of a closed surface could not be paired",
            pairing.dropped
        )));
    }
    log::debug!(
        "extraction: {} clusters, {} triangles, {} quads ({} rerouted, {} dropped)",
        num_clusters,
        quotient.len(),
        pairing.quads.len(),
        pairing.rerouted,
        pairing.dropped
    );
    if pairing.quads.is_empty() {
        return Err(QuadError::TopologyExtraction("no quads could be extracted".into()));
    }

    // Compact the clusters that are referenced.
    let positions = cluster_positions(working, origins, &cluster, num_clusters);
    let feature_cluster = feature_clusters(working, &cluster, num_clusters);
    let mut remap = vec![INVALID; num_clusters];
    let mut vertices = Vec::new();
    let mut features = Vec::new();
    for q in &pairing.quads {
        for &c in q {
            if remap[c] == INVALID {
                remap[c] = vertices.len();
                vertices.push(working.normalization.restore(&Point3::from(positions[c])));
                features.push(feature_cluster[c]);
            }
        }
    }
    let quads: Vec<[usize; 4]> = pairing.quads.iter().map(|q| q.map(|c| remap[c])).collect();

    let mut out = QuadMesh::new(vertices, quads).with_features(features);
    let split = out.split_nonmanifold_vertices();
    if split > 0 {
        log::debug!("split {} non-manifold vertices", split);
    }
    out.validate()
        .map_err(|e| QuadError::TopologyExtraction(e.to_string()))?;

    if mesh.is_closed() {
        let open = out.edge_faces().values().filter(|faces| faces.len() < 2).count();
        let chi = out.euler_characteristic();
        if open > 0 || chi != mesh.euler_characteristic() {
            return Err(QuadError::TopologyExtraction(format!(
                "closed surface gave {} boundary edges and Euler characteristic {} (expected {})",
                open,
                chi,
                mesh.euler_characteristic()
            )));
        }
    }

    let vertex_map = cluster.iter().map(|&c| remap[c]).collect();
    Ok(QuadIndexMap {
        vertex_map,
        mesh: out,
        rerouted: pairing.rerouted,
        dropped: pairing.dropped,
    })
}

/// Collapse zero edges that keep the surface a manifold of the same
/// topology. Returns the dense cluster label of every vertex.
fn collapse_zero_edges(mesh: &SurfaceMesh, lattice: &EdgeLattice) -> (Vec<usize>, usize) {
    let zero: Vec<[usize; 2]> = lattice
        .edges()
        .iter()
        .filter(|edge| edge.translation.x == 0 && edge.translation.y == 0)
        .map(|edge| edge.endpoints)
        .collect();
    let mut collapser = Collapser::new(mesh);
    let mut collapsed = 0;
    for _ in 0..MAX_COLLAPSE_PASSES {
        let mut progress = false;
        for &[u, v] in &zero {
            let (a, b) = (collapser.uf.find(u), collapser.uf.find(v));
            if a != b && collapser.can_collapse(a, b) {
                collapser.collapse(a, b);
                collapsed += 1;
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }
    log::trace!("collapsed {} of {} zero edges", collapsed, zero.len());
    collapser.uf.labels()
}

/// Edge collapses on a triangle mesh, tracked with a union-find over its
/// vertices.
struct Collapser<'a> {
    triangles: &'a [[usize; 3]],
    uf: UnionFind,
    /// Per cluster root: faces that touched the cluster, dead ones included.
    stars: Vec<Vec<usize>>,
}

/// Vertices and edges of the link of a cluster.
struct Link {
    vertices: BTreeSet<usize>,
    edges: BTreeSet<(usize, usize)>,
}

impl<'a> Collapser<'a> {
    fn new(mesh: &'a SurfaceMesh) -> Self {
        let mut stars = vec![Vec::new(); mesh.num_vertices()];
        for (f, tri) in mesh.triangles().iter().enumerate() {
            for &v in tri {
                stars[v].push(f);
            }
        }
        Self {
            triangles: mesh.triangles(),
            uf: UnionFind::new(mesh.num_vertices()),
            stars,
        }
    }

    /// Live triangles around the root `r`, rotated to start at `r`.
    fn star(&mut self, r: usize) -> Vec<[usize; 3]> {
        let faces = mem::take(&mut self.stars[r]);
        let mut kept = Vec::with_capacity(faces.len());
        let mut star = Vec::with_capacity(faces.len());
        for f in faces {
            let tri = self.triangles[f];
            let t = tri.map(|v| self.uf.find(v));
            if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
                continue;
            }
            if let Some(k) = t.iter().position(|&x| x == r) {
                kept.push(f);
                star.push([t[k], t[(k + 1) % 3], t[(k + 2) % 3]]);
            }
        }
        self.stars[r] = kept;
        star
    }

    fn can_collapse(&mut self, a: usize, b: usize) -> bool {
        let star_a = self.star(a);
        let star_b = self.star(b);
        let apexes: BTreeSet<usize> = star_a
            .iter()
            .filter_map(|&[_, x, y]| match (x == b, y == b) {
                (true, _) => Some(y),
                (_, true) => Some(x),
                _ => None,
            })
            .collect();
        let mut expected = apexes.clone();
        match apexes.len() {
            1 => {
                expected.insert(OUTSIDE);
            }
            2 => {}
            _ => return false,
        }
        let link_a = link(&star_a);
        let link_b = link(&star_b);
        let common: BTreeSet<usize> =
            link_a.vertices.intersection(&link_b.vertices).copied().collect();
        common == expected && link_a.edges.is_disjoint(&link_b.edges)
    }

    fn collapse(&mut self, a: usize, b: usize) {
        self.uf.union(a, b);
        let root = self.uf.find(a);
        let mut merged = mem::take(&mut self.stars[a]);
        merged.append(&mut self.stars[b]);
        self.stars[root] = merged;
    }
}

/// Link of a vertex from its star. Boundary edges of the star are closed
/// off through [`OUTSIDE`].
fn link(star: &[[usize; 3]]) -> Link {
    let ordered = |x: usize, y: usize| (x.min(y), x.max(y));
    let mut uses: BTreeMap<usize, usize> = BTreeMap::new();
    let mut edges = BTreeSet::new();
    for &[_, x, y] in star {
        *uses.entry(x).or_insert(0) += 1;
        *uses.entry(y).or_insert(0) += 1;
        edges.insert(ordered(x, y));
    }
    let mut vertices: BTreeSet<usize> = uses.keys().copied().collect();
    for (&x, &n) in &uses {
        if n == 1 {
            vertices.insert(OUTSIDE);
            edges.insert(ordered(x, OUTSIDE));
        }
    }
    Link { vertices, edges }
}

/// Triangles that survive the collapse, over cluster labels.
struct Quotient {
    /// Working mesh face of every triangle.
    faces: Vec<usize>,
    triangles: Vec<[usize; 3]>,
    /// Directed edge to `(triangle, side)`.
    sides: BTreeMap<(usize, usize), (usize, usize)>,
}

/// Triangle pairs as quads over cluster labels.
struct Pairing {
    quads: Vec<[usize; 4]>,
    rerouted: usize,
    dropped: usize,
}

impl Quotient {
    fn build(mesh: &SurfaceMesh, cluster: &[usize]) -> Result<Self> {
        let mut faces = Vec::new();
        let mut triangles = Vec::new();
        let mut sides = BTreeMap::new();
        for (f, tri) in mesh.triangles().iter().enumerate() {
            let t = tri.map(|v| cluster[v]);
            if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
                continue;
            }
            let i = triangles.len();
            for k in 0..3 {
                if sides.insert((t[k], t[(k + 1) % 3]), (i, k)).is_some() {
                    return Err(QuadError::TopologyExtraction(format!(
                        "collapsed edge {}-{} is used twice in one direction",
                        t[k],
                        t[(k + 1) % 3]
                    )));
                }
            }
            faces.push(f);
            triangles.push(t);
        }
        Ok(Self {
            faces,
            triangles,
            sides,
        })
    }

    fn len(&self) -> usize {
        self.triangles.len()
    }

    /// Triangle and side across side `k` of triangle `t`.
    fn across(&self, t: usize, k: usize) -> Option<(usize, usize)> {
        let tri = self.triangles[t];
        self.sides.get(&(tri[(k + 1) % 3], tri[k])).copied()
    }

    /// Side of `t` that is the lattice diagonal of a half cell.
    fn diagonal(
        &self,
        mesh: &SurfaceMesh,
        lattice: &EdgeLattice,
        singular: &[bool],
        t: usize,
    ) -> Option<usize> {
        let f = self.faces[t];
        if lattice.face_state(mesh, f, singular[f]) != FaceState::HalfCell {
            return None;
        }
        let c = lattice.face_corners(f);
        let right = (0..3).find(|&k| {
            let a = c[(k + 1) % 3] - c[k];
            let b = c[(k + 2) % 3] - c[k];
            a.dot(&b) == 0
        })?;
        Some((right + 1) % 3)
    }

    fn pair(&self, mesh: &SurfaceMesh, lattice: &EdgeLattice, singular: &[bool]) -> Pairing {
        let n = self.len();
        let diagonal: Vec<Option<usize>> =
            (0..n).map(|t| self.diagonal(mesh, lattice, singular, t)).collect();
        let mut mate = vec![UNMATCHED; n];

        // Two half cells on either side of one lattice diagonal.
        for t in 0..n {
            let Some(k) = diagonal[t] else {
                continue;
            };
            if let Some((m, side)) = self.across(t, k) {
                if mate[t] == UNMATCHED && mate[m] == UNMATCHED && diagonal[m] == Some(side) {
                    mate[t] = m;
                    mate[m] = t;
                }
            }
        }

        // Everything else across its longest lattice edge.
        for t in 0..n {
            if mate[t] != UNMATCHED {
                continue;
            }
            let f = self.faces[t];
            let best = (0..3)
                .filter_map(|k| self.across(t, k).map(|(m, _)| (k, m)))
                .filter(|&(_, m)| mate[m] == UNMATCHED)
                .max_by_key(|&(k, _)| {
                    let (_, d) = lattice.directed(3 * f + k);
                    (d.x.abs() + d.y.abs(), std::cmp::Reverse(k))
                });
            if let Some((_, m)) = best {
                mate[t] = m;
                mate[m] = t;
            }
        }

        // One extra node per boundary side; matching a triangle to it drops
        // the triangle.
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for t in 0..n {
            for k in 0..3 {
                match self.across(t, k) {
                    Some((m, _)) => adj[t].push(m),
                    None => {
                        let outer = adj.len();
                        adj[t].push(outer);
                        adj.push(vec![t]);
                    }
                }
            }
        }
        mate.resize(adj.len(), UNMATCHED);
        let mut blossom = Blossom::new(&adj, mate);
        let mut grown = 0;
        for t in 0..n {
            grown += blossom.augment_from(t, n) as usize;
        }
        for t in 0..n {
            blossom.augment_from(t, adj.len());
        }
        let mate = blossom.into_mates();
        log::trace!("matching: {} augmenting paths inside the surface", grown);

        let mut quads = Vec::new();
        let mut rerouted = 0;
        let mut dropped = 0;
        for t in 0..n {
            let m = mate[t];
            if m == UNMATCHED || m >= n {
                dropped += 1;
                continue;
            }
            if m < t {
                continue;
            }
            let shared = (0..3).find_map(|k| match self.across(t, k) {
                Some((o, side)) if o == m => Some((k, side)),
                _ => None,
            });
            let Some((k, side)) = shared else {
                continue;
            };
            if diagonal[t] != Some(k) || diagonal[m] != Some(side) {
                rerouted += 1;
            }
            let tri = self.triangles[t];
            let (a, b, c) = (tri[(k + 2) % 3], tri[k], tri[(k + 1) % 3]);
            let d = self.triangles[m][(side + 2) % 3];
            quads.push(canonical_rotation([a, b, d, c]));
        }
        Pairing {
            quads,
            rerouted,
            dropped,
        }
    }
}

/// Rotate a quad so its smallest vertex comes first.
fn canonical_rotation(q: [usize; 4]) -> [usize; 4] {
    let k = (0..4).min_by_key(|&k| q[k]).unwrap_or(0);
    [q[k], q[(k + 1) % 4], q[(k + 2) % 4], q[(k + 3) % 4]]
}

fn feature_clusters(working: &WorkingMesh, cluster: &[usize], num_clusters: usize) -> Vec<bool> {
    let mut flags = vec![false; num_clusters];
    for (v, &c) in cluster.iter().enumerate() {
        flags[c] |= working.is_feature(v);
    }
    flags
}

/// Output position of every cluster, in the working frame.
///
/// Feature members win over free ones; corners pin the cluster, line
/// members snap it onto the nearest incident feature segment.
fn cluster_positions(
    working: &WorkingMesh,
    origins: &[Vector3<f64>],
    cluster: &[usize],
    num_clusters: usize,
) -> Vec<Vector3<f64>> {
    let mut all = vec![(Vector3::zeros(), 0usize); num_clusters];
    let mut feature = vec![(Vector3::zeros(), 0usize); num_clusters];
    let mut corner: Vec<Option<Vector3<f64>>> = vec![None; num_clusters];
    for (v, &c) in cluster.iter().enumerate() {
        all[c].0 += origins[v];
        all[c].1 += 1;
        match working.constraints[v] {
            Constraint::Free => {}
            Constraint::Corner { point, .. } => {
                corner[c].get_or_insert(point);
            }
            Constraint::Line { .. } => {
                feature[c].0 += origins[v];
                feature[c].1 += 1;
            }
        }
    }

    let mut positions: Vec<Vector3<f64>> = (0..num_clusters)
        .map(|c| {
            if let Some(p) = corner[c] {
                p
            } else if feature[c].1 > 0 {
                feature[c].0 / feature[c].1 as f64
            } else if all[c].1 > 0 {
                all[c].0 / all[c].1 as f64
            } else {
                Vector3::zeros()
            }
        })
        .collect();

    let mut segments: Vec<Vec<(Vector3<f64>, Vector3<f64>)>> = vec![Vec::new(); num_clusters];
    for (v, &c) in cluster.iter().enumerate() {
        if corner[c].is_none() && matches!(working.constraints[v], Constraint::Line { .. }) {
            segments[c].extend(working.sharp_segments_at(v));
        }
    }
    for (c, segs) in segments.iter().enumerate() {
        let p = positions[c];
        let nearest = segs
            .iter()
            .map(|(a, b)| closest_on_segment(&p, a, b))
            .min_by(|x, y| (x - p).norm_squared().total_cmp(&(y - p).norm_squared()));
        if let Some(q) = nearest {
            positions[c] = q;
        }
    }
    positions
}

fn closest_on_segment(p: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> Vector3<f64> {
    let d = b - a;
    let len2 = d.norm_squared();
    if len2 <= f64::EPSILON {
        return *a;
    }
    let t = ((p - a).dot(&d) / len2).clamp(0.0, 1.0);
    a + d * t
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algo::index_map::lattice::tests::grid_lattice;
    use crate::algo::index_map::lattice::LatticeEdge;
    use crate::algo::prepare::Normalization;
    use crate::algo::rosy::Rot4;
    use crate::mesh::primitives::{icosphere, torus};
    use nalgebra::Vector2;

    /// Working mesh wrapper around an explicit surface, without features.
    pub(crate) fn plain_working(mesh: SurfaceMesh) -> WorkingMesh {
        let nv = mesh.num_vertices();
        let nf = mesh.num_faces();
        WorkingMesh {
            normals: vec![Vector3::z(); nv],
            face_normals: vec![Vector3::z(); nf],
            face_areas: vec![0.5; nf],
            areas: vec![1.0; nv],
            sharp: vec![false; mesh.num_dedges()],
            constraints: vec![Constraint::Free; nv],
            scale: 1.0,
            target_faces: nf / 2,
            average_edge_length: 1.0,
            normalization: Normalization {
                center: Vector3::zeros(),
                scale: 1.0,
            },
            mesh,
        }
    }

    fn origins(working: &WorkingMesh) -> Vec<Vector3<f64>> {
        working.mesh.positions().iter().map(|p| p.coords).collect()
    }

    /// A lattice that rounds the xy-projection of every vertex onto a grid
    /// of spacing `1 / scale`. Loops close, but the far side of a closed
    /// surface comes out flipped and many edges collapse.
    fn projected_lattice(mesh: &SurfaceMesh, scale: f64) -> EdgeLattice {
        let cell = |v: usize| {
            let p = mesh.positions()[v] * scale;
            Vector2::new(p.x.round() as i32, p.y.round() as i32)
        };
        let twins = mesh.twins();
        let mut edges = Vec::new();
        let mut edge_of = vec![INVALID; mesh.num_dedges()];
        for e in 0..mesh.num_dedges() {
            let t = twins[e];
            if t != INVALID && t < e {
                continue;
            }
            let (a, b) = (mesh.dedge_from(e), mesh.dedge_to(e));
            edge_of[e] = edges.len();
            if t != INVALID {
                edge_of[t] = edges.len();
            }
            edges.push(LatticeEdge {
                dedge: e,
                endpoints: [a, b],
                rotation: Rot4::IDENTITY,
                translation: cell(b) - cell(a),
            });
        }
        EdgeLattice::from_edges(mesh.num_vertices(), edges, edge_of)
    }

    #[test]
    fn test_grid_lattice_gives_grid_quads() {
        let (mesh, lattice) = grid_lattice(3);
        let working = plain_working(mesh);
        let singular = vec![false; working.mesh.num_faces()];
        let map = extract(&working, &lattice, &origins(&working), &singular).unwrap();
        assert_eq!(map.mesh.num_faces(), 9);
        assert_eq!(map.mesh.num_vertices(), 16);
        assert_eq!(map.rerouted, 0);
        assert_eq!(map.dropped, 0);
        assert!(map.mesh.is_manifold());
        assert!(!map.mesh.has_degenerate_faces());
        // Same orientation as the input surface.
        for f in 0..map.mesh.num_faces() {
            assert!(map.mesh.quad_normal(f).z > 0.0);
        }
        assert!(map.vertex_map.iter().all(|&v| v != INVALID));
    }

    #[test]
    fn test_collapsed_edges_merge_vertices() {
        // Move the middle and right columns of a 2x2 grid one cell left, so
        // the middle column lands on the left one.
        let (mesh, mut lattice) = grid_lattice(2);
        for v in [1, 2, 4, 5, 7, 8] {
            lattice.shift_vertex(v, Vector2::new(-1, 0));
        }
        let working = plain_working(mesh);
        let singular = vec![false; working.mesh.num_faces()];
        let map = extract(&working, &lattice, &origins(&working), &singular).unwrap();
        assert_eq!(map.vertex_map[0], map.vertex_map[1]);
        assert_eq!(map.vertex_map[3], map.vertex_map[4]);
        assert_eq!(map.mesh.num_faces(), 2);
        assert_eq!(map.dropped, 0);
        assert!(map.mesh.is_manifold());
    }

    #[test]
    fn test_invalid_faces_are_paired_not_skipped() {
        // Shifting the centre of a 2x2 grid collapses it onto its right
        // neighbour and breaks the half cells around it.
        let (mesh, mut lattice) = grid_lattice(2);
        lattice.shift_vertex(4, Vector2::new(1, 0));
        let working = plain_working(mesh);
        let singular = vec![false; working.mesh.num_faces()];
        assert!(lattice.count_invalid(&working.mesh, &singular) > 0);

        let map = extract(&working, &lattice, &origins(&working), &singular).unwrap();
        assert_eq!(map.vertex_map[4], map.vertex_map[5]);
        // Six triangles survive the collapse; the two that cannot be paired
        // sit on the boundary.
        assert_eq!(map.mesh.num_faces(), 2);
        assert_eq!(map.dropped, 2);
        assert!(map.mesh.is_manifold());
    }

    #[test]
    fn test_closed_surfaces_stay_closed() {
        let meshes = [
            (icosphere(1.0, 2).unwrap(), 2.0, 2),
            (icosphere(1.0, 3).unwrap(), 4.0, 2),
            (torus(1.0, 0.4, 24, 12).unwrap(), 3.0, 0),
        ];
        for (mesh, scale, chi) in meshes {
            let lattice = projected_lattice(&mesh, scale);
            let working = plain_working(mesh);
            let singular = vec![false; working.mesh.num_faces()];
            assert!(lattice.count_invalid(&working.mesh, &singular) > 0);

            let map = extract(&working, &lattice, &origins(&working), &singular).unwrap();
            assert!(map.mesh.is_manifold());
            assert!(map.rerouted > 0);
            assert_eq!(map.dropped, 0);
            assert!(map.mesh.edge_faces().values().all(|faces| faces.len() == 2));
            assert_eq!(map.mesh.euler_characteristic(), chi);
        }
    }

    #[test]
    fn test_collapse_respects_link_condition() {
        // Every edge of a tetrahedron is zero, but collapsing any of them
        // would flatten it into a doubled triangle.
        let mesh = crate::mesh::build_surface(
            &[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
        .unwrap();
        let lattice = projected_lattice(&mesh, 0.0);
        let (cluster, count) = collapse_zero_edges(&mesh, &lattice);
        assert_eq!(count, 4);
        assert_eq!(cluster, vec![0, 1, 2, 3]);

        let working = plain_working(mesh);
        let singular = vec![false; 4];
        let map = extract(&working, &lattice, &origins(&working), &singular).unwrap();
        assert_eq!(map.mesh.num_faces(), 2);
        assert_eq!(map.mesh.euler_characteristic(), 2);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let (mesh, lattice) = grid_lattice(4);
        let working = plain_working(mesh);
        let singular = vec![false; working.mesh.num_faces()];
        let o = origins(&working);
        let a = extract(&working, &lattice, &o, &singular).unwrap();
        let b = extract(&working, &lattice, &o, &singular).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fully_collapsed_lattice_fails() {
        // One triangle collapses away; the other has no partner left.
        let (mesh, mut lattice) = grid_lattice(1);
        for i in 0..lattice.num_edges() {
            lattice.set_translation(i, Vector2::zeros());
        }
        let working = plain_working(mesh);
        let singular = vec![false; working.mesh.num_faces()];
        let err = extract(&working, &lattice, &origins(&working), &singular).unwrap_err();
        assert!(matches!(err, QuadError::TopologyExtraction(_)));
    }

    #[test]
    fn test_canonical_rotation() {
        assert_eq!(canonical_rotation([5, 2, 7, 3]), [2, 7, 3, 5]);
    }
}
