//! Multiresolution vertex hierarchy.
//!
//! Level 0 is the working mesh; every further level is obtained by greedily
//! pairing adjacent vertices of the level below. Levels are stored as flat
//! arrays with index maps in both directions:
//!
//! - `coarsen[fine] = coarse` maps a level's vertices onto the next level up
//! - `prolong[coarse] = [fine_a, fine_b]` lists the (one or two) vertices a
//!   coarse vertex was built from, with [`INVALID`] for singletons
//!
//! Each level also carries a greedy graph colouring (`phases`) so that a
//! Gauss-Seidel sweep can update all vertices of one colour in parallel.
//!
//! # References
//!
//! - Jakob, W., et al. (2015). "Instant Field-Aligned Meshes." ACM TOG 34(6).

use std::collections::BTreeMap;

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::error::{QuadError, Result};
use crate::mesh::{VertexId, INVALID};

use super::prepare::WorkingMesh;

/// Hard cap on the number of levels.
const MAX_LEVELS: usize = 30;

/// Feature constraint of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Constraint {
    /// Unconstrained.
    #[default]
    Free,
    /// The vertex lies on a feature line through `point` along `dir`.
    Line {
        /// A point on the line.
        point: Vector3<f64>,
        /// Unit line direction.
        dir: Vector3<f64>,
    },
    /// The vertex is a feature corner at `point`; `dir` is one incident
    /// feature edge direction.
    Corner {
        /// Corner position.
        point: Vector3<f64>,
        /// Unit direction of an incident feature edge.
        dir: Vector3<f64>,
    },
}

impl Constraint {
    /// The direction the orientation field is pinned to, if any.
    pub fn direction(&self) -> Option<Vector3<f64>> {
        match self {
            Constraint::Free => None,
            Constraint::Line { dir, .. } | Constraint::Corner { dir, .. } => Some(*dir),
        }
    }

    /// Whether the constraint is not [`Constraint::Free`].
    pub fn is_feature(&self) -> bool {
        !matches!(self, Constraint::Free)
    }

    /// Merge the constraints of two vertices collapsed into one.
    fn merge(&self, other: &Constraint, weight_self: f64, weight_other: f64) -> Constraint {
        match (self, other) {
            (Constraint::Free, c) | (c, Constraint::Free) => *c,
            (Constraint::Corner { .. }, _) => *self,
            (_, Constraint::Corner { .. }) => *other,
            (
                Constraint::Line { point: p0, dir: d0 },
                Constraint::Line { point: p1, dir: d1 },
            ) => {
                let sign = if d0.dot(d1) < 0.0 { -1.0 } else { 1.0 };
                let dir = (d0 + d1 * sign).try_normalize(1e-12).unwrap_or(*d0);
                let total = weight_self + weight_other;
                let point = if total > 0.0 {
                    (p0 * weight_self + p1 * weight_other) / total
                } else {
                    (p0 + p1) * 0.5
                };
                Constraint::Line { point, dir }
            }
        }
    }
}

/// Symmetric weighted adjacency in compressed sparse row form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adjacency {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
}

impl Adjacency {
    /// Build from per-vertex neighbour lists.
    pub fn from_lists(lists: &[Vec<(usize, f64)>]) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut targets = Vec::new();
        let mut weights = Vec::new();
        offsets.push(0);
        for list in lists {
            for &(j, w) in list {
                targets.push(j);
                weights.push(w);
            }
            offsets.push(targets.len());
        }
        Self {
            offsets,
            targets,
            weights,
        }
    }

    /// Number of vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Whether the graph has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Neighbours of `i` with their weights.
    #[inline]
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[i]..self.offsets[i + 1];
        self.targets[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }

    /// Number of neighbours of `i`.
    #[inline]
    pub fn degree(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Number of directed links.
    pub fn num_links(&self) -> usize {
        self.targets.len()
    }
}

/// One level of the hierarchy.
#[derive(Debug, Clone)]
pub struct Level {
    /// Vertex positions.
    pub positions: Vec<Vector3<f64>>,
    /// Unit vertex normals.
    pub normals: Vec<Vector3<f64>>,
    /// Dual areas.
    pub areas: Vec<f64>,
    /// Weighted vertex adjacency.
    pub adjacency: Adjacency,
    /// Independent vertex sets; no two vertices of a phase are adjacent.
    pub phases: Vec<Vec<usize>>,
    /// Feature constraints.
    pub constraints: Vec<Constraint>,
    /// Map from this level's vertices to the next coarser level (empty on
    /// the coarsest level).
    pub coarsen: Vec<usize>,
    /// Map from this level's vertices to the finer level they were built
    /// from (empty on level 0).
    pub prolong: Vec<[usize; 2]>,
}

impl Level {
    /// Number of vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the level has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// The working mesh together with its coarsened levels.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    working: WorkingMesh,
    levels: Vec<Level>,
}

impl Hierarchy {
    /// Build the hierarchy over a prepared working mesh.
    ///
    /// # Errors
    /// Returns [`QuadError::Hierarchy`] if the working mesh is empty or the
    /// resulting maps violate the round-trip law.
    pub fn build(working: WorkingMesh, parallel: bool) -> Result<Self> {
        if working.mesh.num_vertices() == 0 {
            return Err(QuadError::Hierarchy("working mesh has no vertices".to_string()));
        }
        let mut levels = vec![finest_level(&working)];

        while levels.len() < MAX_LEVELS {
            let depth = levels.len();
            let fine = levels.last_mut().ok_or_else(|| {
                QuadError::Hierarchy("hierarchy lost its finest level".to_string())
            })?;
            if fine.len() <= 1 {
                break;
            }
            let (coarse, coarsen) = coarsen_level(fine, parallel);
            if coarse.len() >= fine.len() {
                break;
            }
            log::debug!(
                "hierarchy level {}: {} vertices, {} phases",
                depth,
                coarse.len(),
                coarse.phases.len()
            );
            fine.coarsen = coarsen;
            levels.push(coarse);
        }

        let hierarchy = Self { working, levels };
        hierarchy.check_round_trip()?;
        Ok(hierarchy)
    }

    /// The working mesh of level 0.
    #[inline]
    pub fn working(&self) -> &WorkingMesh {
        &self.working
    }

    /// Number of levels.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// A level by index; 0 is the finest.
    #[inline]
    pub fn level(&self, l: usize) -> &Level {
        &self.levels[l]
    }

    /// All levels, finest first.
    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Verify that prolongation and coarsening are mutually consistent.
    ///
    /// For every level `l > 0`, each fine vertex listed in `prolong[c]` must
    /// coarsen back to `c`, and every vertex of level `l - 1` must appear in
    /// exactly one prolongation entry.
    ///
    /// # Errors
    /// Returns [`QuadError::Hierarchy`] describing the first violation.
    pub fn check_round_trip(&self) -> Result<()> {
        for l in 1..self.levels.len() {
            let fine = &self.levels[l - 1];
            let coarse = &self.levels[l];
            if fine.coarsen.len() != fine.len() {
                return Err(QuadError::Hierarchy(format!(
                    "level {} has {} coarsening entries for {} vertices",
                    l - 1,
                    fine.coarsen.len(),
                    fine.len()
                )));
            }
            let mut seen = vec![0u8; fine.len()];
            for (c, pair) in coarse.prolong.iter().enumerate() {
                for &x in pair.iter().filter(|&&x| x != INVALID) {
                    if fine.coarsen[x] != c {
                        return Err(QuadError::Hierarchy(format!(
                            "level {}: vertex {} prolongs to {} but coarsens to {}",
                            l, c, x, fine.coarsen[x]
                        )));
                    }
                    seen[x] = seen[x].saturating_add(1);
                }
            }
            if let Some(x) = seen.iter().position(|&n| n != 1) {
                return Err(QuadError::Hierarchy(format!(
                    "level {}: fine vertex {} appears {} times in prolongation",
                    l, x, seen[x]
                )));
            }
        }
        Ok(())
    }
}

/// Build level 0 from the working mesh.
fn finest_level(working: &WorkingMesh) -> Level {
    let mesh = &working.mesh;
    let average = working.average_edge_length.max(f64::MIN_POSITIVE);
    let positions: Vec<Vector3<f64>> = mesh.positions().iter().map(|p| p.coords).collect();

    let lists: Vec<Vec<(usize, f64)>> = mesh
        .vertex_ids()
        .map(|v| {
            let p = positions[v.index()];
            mesh.vertex_neighbors(v)
                .map(|u: VertexId| {
                    let j = u.index();
                    (j, (positions[j] - p).norm() / average)
                })
                .collect()
        })
        .collect();
    let adjacency = Adjacency::from_lists(&lists);

    Level {
        phases: color_phases(&adjacency),
        positions,
        normals: working.normals.clone(),
        areas: working.areas.clone(),
        adjacency,
        constraints: working.constraints.clone(),
        coarsen: Vec::new(),
        prolong: Vec::new(),
    }
}

/// Collapse vertex pairs of `fine` into a new coarser level.
///
/// Returns the coarse level and the fine-to-coarse map.
fn coarsen_level(fine: &Level, parallel: bool) -> (Level, Vec<usize>) {
    let n = fine.len();

    let score_vertex = |i: usize| -> Vec<(usize, usize, f64)> {
        fine.adjacency
            .neighbors(i)
            .filter(|&(j, _)| i < j)
            .filter(|&(j, _)| fine.constraints[i].is_feature() == fine.constraints[j].is_feature())
            .filter_map(|(j, _)| {
                let dp = fine.normals[i].dot(&fine.normals[j]);
                if dp <= 0.0 {
                    return None;
                }
                let (ai, aj) = (fine.areas[i], fine.areas[j]);
                let ratio = if ai > 0.0 && aj > 0.0 {
                    (ai / aj).max(aj / ai)
                } else {
                    1.0
                };
                Some((i, j, dp * ratio))
            })
            .collect()
    };
    let mut candidates: Vec<(usize, usize, f64)> = if parallel {
        (0..n).into_par_iter().flat_map_iter(score_vertex).collect()
    } else {
        (0..n).flat_map(score_vertex).collect()
    };
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut matched = vec![false; n];
    let mut prolong: Vec<[usize; 2]> = Vec::new();
    for (i, j, _) in candidates {
        if matched[i] || matched[j] {
            continue;
        }
        matched[i] = true;
        matched[j] = true;
        prolong.push([i, j]);
    }
    for (i, &m) in matched.iter().enumerate() {
        if !m {
            prolong.push([i, INVALID]);
        }
    }

    let mut coarsen = vec![INVALID; n];
    for (c, pair) in prolong.iter().enumerate() {
        for &x in pair.iter().filter(|&&x| x != INVALID) {
            coarsen[x] = c;
        }
    }

    let m = prolong.len();
    let mut positions = Vec::with_capacity(m);
    let mut normals = Vec::with_capacity(m);
    let mut areas = Vec::with_capacity(m);
    let mut constraints = Vec::with_capacity(m);
    for &[a, b] in &prolong {
        if b == INVALID {
            positions.push(fine.positions[a]);
            normals.push(fine.normals[a]);
            areas.push(fine.areas[a]);
            constraints.push(fine.constraints[a]);
            continue;
        }
        let (wa, wb) = (fine.areas[a], fine.areas[b]);
        let total = wa + wb;
        let (pa, pb) = (fine.positions[a], fine.positions[b]);
        let position = if total > 0.0 {
            (pa * wa + pb * wb) / total
        } else {
            (pa + pb) * 0.5
        };
        let normal = (fine.normals[a] * wa + fine.normals[b] * wb)
            .try_normalize(1e-12)
            .unwrap_or(if wa >= wb { fine.normals[a] } else { fine.normals[b] });
        positions.push(position);
        normals.push(normal);
        areas.push(total);
        constraints.push(fine.constraints[a].merge(&fine.constraints[b], wa, wb));
    }

    let mut lists: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); m];
    for i in 0..n {
        let ci = coarsen[i];
        for (j, w) in fine.adjacency.neighbors(i) {
            let cj = coarsen[j];
            if ci != cj {
                *lists[ci].entry(cj).or_insert(0.0) += w;
            }
        }
    }
    let lists: Vec<Vec<(usize, f64)>> = lists
        .into_iter()
        .map(|map| map.into_iter().collect())
        .collect();
    let adjacency = Adjacency::from_lists(&lists);

    let level = Level {
        phases: color_phases(&adjacency),
        positions,
        normals,
        areas,
        adjacency,
        constraints,
        coarsen: Vec::new(),
        prolong,
    };
    (level, coarsen)
}

/// Greedy colouring in vertex order; each colour class is one phase.
fn color_phases(adjacency: &Adjacency) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut color = vec![usize::MAX; n];
    let mut phases: Vec<Vec<usize>> = Vec::new();
    let mut used: Vec<bool> = Vec::new();
    for i in 0..n {
        used.clear();
        used.resize(phases.len() + 1, false);
        for (j, _) in adjacency.neighbors(i) {
            if color[j] < used.len() {
                used[color[j]] = true;
            }
        }
        let c = used.iter().position(|&u| !u).unwrap_or(phases.len());
        if c == phases.len() {
            phases.push(Vec::new());
        }
        color[i] = c;
        phases[c].push(i);
    }
    phases
}

/// Outcome of a hierarchical relaxation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaxStats {
    /// Energy before the first sweep and after each sweep, per level
    /// (index 0 is the finest level).
    pub energies: Vec<Vec<f64>>,
    /// Whether the finest level met the convergence threshold.
    pub converged: bool,
}

impl RelaxStats {
    /// Total number of sweeps over all levels.
    pub fn sweeps(&self) -> usize {
        self.energies
            .iter()
            .map(|e| e.len().saturating_sub(1))
            .sum()
    }

    /// Final energy of the finest level.
    pub fn final_energy(&self) -> Option<f64> {
        self.energies.first().and_then(|e| e.last().copied())
    }
}

/// Run one Gauss-Seidel sweep over the phases of a level.
///
/// Updates within a phase are computed from the values at the start of the
/// phase (in parallel when requested) and written afterwards; `update`
/// returns `None` to keep a vertex unchanged. Returns the number of vertices
/// changed.
pub(crate) fn sweep_phases<T, F>(
    level: &Level,
    values: &mut [T],
    parallel: bool,
    update: F,
) -> usize
where
    T: Copy + Send + Sync,
    F: Fn(usize, &[T]) -> Option<T> + Sync,
{
    let mut changed = 0;
    for phase in &level.phases {
        let updates: Vec<(usize, T)> = {
            let current: &[T] = values;
            if parallel {
                phase
                    .par_iter()
                    .filter_map(|&i| update(i, current).map(|v| (i, v)))
                    .collect()
            } else {
                phase
                    .iter()
                    .filter_map(|&i| update(i, current).map(|v| (i, v)))
                    .collect()
            }
        };
        changed += updates.len();
        for (i, v) in updates {
            values[i] = v;
        }
    }
    changed
}

/// Whether a relative energy decrease is below `threshold`.
pub(crate) fn is_converged(previous: f64, current: f64, threshold: f64) -> bool {
    if previous <= f64::MIN_POSITIVE {
        return true;
    }
    (previous - current) <= threshold * previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::prepare::prepare;
    use crate::config::Config;
    use crate::mesh::primitives::{cube, grid, icosphere};

    fn build(mesh: &crate::mesh::SurfaceMesh, config: &Config) -> Hierarchy {
        let working = prepare(mesh, config).unwrap();
        Hierarchy::build(working, config.parallel).unwrap()
    }

    #[test]
    fn test_levels_shrink() {
        let h = build(&icosphere(1.0, 3).unwrap(), &Config::default());
        assert!(h.num_levels() > 3);
        for l in 1..h.num_levels() {
            assert!(h.level(l).len() < h.level(l - 1).len());
        }
        assert!(h.level(h.num_levels() - 1).coarsen.is_empty());
        assert!(h.level(0).prolong.is_empty());
    }

    #[test]
    fn test_round_trip_law() {
        let h = build(&icosphere(1.0, 3).unwrap(), &Config::default());
        assert!(h.check_round_trip().is_ok());
        for l in 1..h.num_levels() {
            let fine = h.level(l - 1);
            let coarse = h.level(l);
            for (x, &c) in fine.coarsen.iter().enumerate() {
                assert!(coarse.prolong[c].contains(&x));
            }
        }
    }

    #[test]
    fn test_round_trip_detects_corruption() {
        let mut h = build(&icosphere(1.0, 2).unwrap(), &Config::default());
        h.levels[1].prolong[0] = [0, 0];
        assert!(matches!(h.check_round_trip(), Err(QuadError::Hierarchy(_))));
    }

    #[test]
    fn test_area_is_preserved() {
        let h = build(&icosphere(1.0, 2).unwrap(), &Config::default());
        let total: f64 = h.level(0).areas.iter().sum();
        for level in h.levels() {
            let sum: f64 = level.areas.iter().sum();
            assert!((sum - total).abs() < 1e-9);
            for n in &level.normals {
                assert!((n.norm() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_phases_are_independent() {
        let h = build(&icosphere(1.0, 2).unwrap(), &Config::default());
        for level in h.levels() {
            let mut count = 0;
            for phase in &level.phases {
                count += phase.len();
                for &i in phase {
                    for (j, _) in level.adjacency.neighbors(i) {
                        assert!(!phase.contains(&j));
                    }
                }
            }
            assert_eq!(count, level.len());
        }
    }

    #[test]
    fn test_adjacency_is_symmetric() {
        let h = build(&grid(6, 6, 1.0, 1.0).unwrap(), &Config::default());
        for level in h.levels() {
            for i in 0..level.len() {
                for (j, w) in level.adjacency.neighbors(i) {
                    let back = level.adjacency.neighbors(j).find(|&(k, _)| k == i);
                    let (_, w2) = back.unwrap();
                    assert!((w2 - w).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_features_never_merge_with_free_vertices() {
        let config = Config::default().with_preserve_sharp(true).with_target_faces(100);
        let h = build(&cube(1.0, 3).unwrap(), &config);
        for l in 1..h.num_levels() {
            let fine = h.level(l - 1);
            for pair in &h.level(l).prolong {
                if pair[1] != INVALID {
                    assert_eq!(
                        fine.constraints[pair[0]].is_feature(),
                        fine.constraints[pair[1]].is_feature()
                    );
                }
            }
        }
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let mesh = icosphere(1.0, 2).unwrap();
        let a = build(&mesh, &Config::default());
        let b = build(&mesh, &Config::default().sequential());
        assert_eq!(a.num_levels(), b.num_levels());
        for (la, lb) in a.levels().iter().zip(b.levels()) {
            assert_eq!(la.prolong, lb.prolong);
        }
    }
}
