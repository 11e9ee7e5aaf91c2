//! Topology repair strategies.
//!
//! Extraction works best when every face of the edge lattice is valid: a
//! closed, positively oriented image no larger than one cell. Both strategies
//! behind [`TopologyRepair`] start with [`close_loops`], which removes
//! position singularities by flow and keeps each independent part of the
//! flow only when it pays off. They differ in what runs on the closed
//! lattice afterwards:
//!
//! - [`FlowRepair`] collapses the longest edge of every face in a cluster of
//!   invalid faces, locks it and closes the loops again. A cluster collapse
//!   that does not lower the invalid count is rolled back.
//! - [`ConstraintRepair`] runs a bounded backtracking search over integer
//!   vertex shifts around each cluster of invalid faces, growing the search
//!   region ring by ring.
//!
//! Vertex shifts never change a face loop, so the constraint search cannot
//! reintroduce position singularities.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use nalgebra::Vector2;

use crate::config::Config;
use crate::mesh::{SurfaceMesh, UnionFind, INVALID};

use super::flow::{resolve_face_loops, FlowSolver};
use super::lattice::{linf, EdgeLattice};

/// Upper bound on flow passes per singularity removal.
const MAX_FLOW_PASSES: usize = 16;

/// Shifts tried per vertex by the constraint search, in order.
const SHIFTS: [(i32, i32); 5] = [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)];

/// A vertex shift or an edge translation change, by index.
type Offset = (usize, Vector2<i32>);

/// Search nodes spent settling the faces touched by one flow group.
const SETTLE_BUDGET: usize = 4_000;

/// One-ring growth steps when settling a flow group.
const SETTLE_RINGS: usize = 1;

/// Read-only inputs shared by the repair strategies.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    /// The working mesh.
    pub mesh: &'a SurfaceMesh,
    /// Per face: whether it carries an orientation singularity.
    pub orientation_singular: &'a [bool],
    /// Per directed edge: whether it is a feature edge.
    pub sharp: &'a [bool],
    /// Whether feature edges must stay axis-aligned.
    pub preserve_sharp: bool,
    /// Flow strategy for closing face loops.
    pub solver: &'a dyn FlowSolver,
}

/// What a repair pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    /// Invalid faces before the repair.
    pub initial_invalid: usize,
    /// Invalid faces after the repair.
    pub final_invalid: usize,
    /// Position singularities left after the repair.
    pub open_loops: usize,
    /// Edge components changed by flow.
    pub flow_changes: usize,
    /// Collapse rounds or searched clusters.
    pub rounds: usize,
}

/// A strategy that makes the faces of an edge lattice valid.
pub trait TopologyRepair: Debug + Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Repair `lattice` in place.
    ///
    /// Never raises the number of invalid faces or open loops. Faces left
    /// invalid are paired up topologically by extraction.
    fn repair(&self, ctx: &RepairContext, lattice: &mut EdgeLattice) -> RepairStats;
}

/// Pick the repair strategy named by the configuration.
pub fn repair_strategy(config: &Config) -> Box<dyn TopologyRepair> {
    if config.aggressive_sat {
        Box::new(ConstraintRepair {
            search_budget: config.sat_search_budget,
            max_rings: config.sat_max_rings,
        })
    } else {
        Box::new(FlowRepair {
            rounds: config.repair_rounds,
        })
    }
}

/// Sum of `|x| + |y|` over the loops of orientation-regular faces.
fn loop_residual(lattice: &EdgeLattice, orientation_singular: &[bool]) -> i64 {
    (0..orientation_singular.len())
        .filter(|&f| !orientation_singular[f])
        .map(|f| {
            let s = lattice.face_loop(f);
            (s.x.abs() + s.y.abs()) as i64
        })
        .sum()
}

/// Number of orientation-regular faces whose loop is open.
pub fn count_open_loops(lattice: &EdgeLattice, orientation_singular: &[bool]) -> usize {
    (0..orientation_singular.len())
        .filter(|&f| !orientation_singular[f] && lattice.face_loop(f) != Vector2::zeros())
        .count()
}

/// Run flow passes until the loops close or stop improving.
///
/// Returns the number of edge components changed. The result may have more
/// invalid faces than the input; [`close_loops`] is the guarded version.
pub fn remove_position_singularities(
    ctx: &RepairContext,
    lattice: &mut EdgeLattice,
    locked: &[bool],
) -> usize {
    let regular: Vec<bool> = ctx.orientation_singular.iter().map(|&s| !s).collect();
    let mut residual = loop_residual(lattice, ctx.orientation_singular);
    let mut changed = 0;
    for _ in 0..MAX_FLOW_PASSES {
        if residual == 0 {
            break;
        }
        let snapshot = lattice.clone();
        let pass = resolve_face_loops(ctx.mesh, lattice, &regular, locked, ctx.solver);
        let now = loop_residual(lattice, ctx.orientation_singular);
        if pass.changed == 0 || now >= residual {
            *lattice = snapshot;
            break;
        }
        changed += pass.changed;
        residual = now;
    }
    changed
}

/// Outcome of [`close_loops`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopClosing {
    /// Edge components changed by the kept groups.
    pub changed: usize,
    /// Flow groups kept.
    pub accepted: usize,
    /// Flow groups rolled back.
    pub rejected: usize,
}

/// Close face loops by flow, keeping only the changes that pay off.
///
/// The net change of a full flow run splits into groups of changed edges
/// that share faces; each group only moves the loops of its own faces. Every
/// group is tried on its own, followed by a small vertex-shift search that
/// settles the faces it touches, and kept when neither the invalid faces nor
/// the open loops around it grow and at least one of them shrinks.
pub fn close_loops(
    ctx: &RepairContext,
    lattice: &mut EdgeLattice,
    locked: &[bool],
) -> LoopClosing {
    let mut outcome = LoopClosing::default();
    if count_open_loops(lattice, ctx.orientation_singular) == 0 {
        return outcome;
    }
    let base = lattice.clone();
    let mut flowed = lattice.clone();
    remove_position_singularities(ctx, &mut flowed, locked);
    let vertex_faces = vertex_faces(ctx.mesh);

    for group in flow_groups(ctx.mesh, &base, &flowed) {
        let deltas: Vec<Offset> = group
            .iter()
            .map(|&i| (i, flowed.edge(i).translation - base.edge(i).translation))
            .collect();
        let faces: BTreeSet<usize> = group
            .iter()
            .flat_map(|&i| faces_of_edge(ctx.mesh, lattice, i))
            .collect();

        for &(i, d) in &deltas {
            let t = lattice.edge(i).translation;
            lattice.set_translation(i, t + d);
        }
        let shifts = settle(ctx, lattice, &faces, &vertex_faces);
        let mut region = faces;
        for &(v, _) in &shifts {
            region.extend(vertex_faces[v].iter().copied());
        }
        undo(lattice, &deltas, &shifts);
        let before = tally(ctx, lattice, &region);
        redo(lattice, &deltas, &shifts);
        let after = tally(ctx, lattice, &region);

        let improves = after.0 <= before.0 && after.1 <= before.1 && after != before;
        if improves {
            outcome.accepted += 1;
            outcome.changed += deltas
                .iter()
                .map(|(_, d)| (d.x != 0) as usize + (d.y != 0) as usize)
                .sum::<usize>();
        } else {
            undo(lattice, &deltas, &shifts);
            outcome.rejected += 1;
        }
    }
    log::debug!(
        "loop closing: kept {} of {} flow groups, {} open loops left",
        outcome.accepted,
        outcome.accepted + outcome.rejected,
        count_open_loops(lattice, ctx.orientation_singular)
    );
    outcome
}

fn undo(lattice: &mut EdgeLattice, deltas: &[Offset], shifts: &[Offset]) {
    for &(v, d) in shifts.iter().rev() {
        lattice.shift_vertex(v, -d);
    }
    for &(i, d) in deltas {
        let t = lattice.edge(i).translation;
        lattice.set_translation(i, t - d);
    }
}

fn redo(lattice: &mut EdgeLattice, deltas: &[Offset], shifts: &[Offset]) {
    for &(i, d) in deltas {
        let t = lattice.edge(i).translation;
        lattice.set_translation(i, t + d);
    }
    for &(v, d) in shifts {
        lattice.shift_vertex(v, d);
    }
}

/// Changed edges of `flowed` grouped by shared faces.
fn flow_groups(mesh: &SurfaceMesh, base: &EdgeLattice, flowed: &EdgeLattice) -> Vec<Vec<usize>> {
    let changed: Vec<bool> = (0..base.num_edges())
        .map(|i| base.edge(i).translation != flowed.edge(i).translation)
        .collect();
    let mut uf = UnionFind::new(base.num_edges());
    for f in 0..mesh.num_faces() {
        let ids: Vec<usize> = (0..3)
            .map(|k| base.edge_index(3 * f + k))
            .filter(|&i| changed[i])
            .collect();
        for pair in ids.windows(2) {
            uf.union(pair[0], pair[1]);
        }
    }
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in (0..changed.len()).filter(|&i| changed[i]) {
        groups.entry(uf.find(i)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_by_key(|g| g[0]);
    groups
}

fn faces_of_edge(
    mesh: &SurfaceMesh,
    lattice: &EdgeLattice,
    i: usize,
) -> impl Iterator<Item = usize> {
    let e = lattice.edge(i).dedge;
    let twin = mesh.twins()[e];
    std::iter::once(e / 3).chain((twin != INVALID).then_some(twin / 3))
}

/// Invalid faces and open loops among `faces`.
fn tally(ctx: &RepairContext, lattice: &EdgeLattice, faces: &BTreeSet<usize>) -> (usize, usize) {
    faces.iter().fold((0, 0), |(invalid, open), &f| {
        let singular = ctx.orientation_singular[f];
        let bad = !lattice.face_state(ctx.mesh, f, singular).is_valid();
        let opened = !singular && lattice.face_loop(f) != Vector2::zeros();
        (invalid + bad as usize, open + opened as usize)
    })
}

/// Shift vertices around the invalid members of `faces` if a small search
/// finds a valid placement. Returns the applied shifts.
fn settle(
    ctx: &RepairContext,
    lattice: &mut EdgeLattice,
    faces: &BTreeSet<usize>,
    vertex_faces: &[Vec<usize>],
) -> Vec<Offset> {
    let cluster: Vec<usize> = faces
        .iter()
        .copied()
        .filter(|&f| {
            !lattice
                .face_state(ctx.mesh, f, ctx.orientation_singular[f])
                .is_valid()
        })
        .collect();
    if cluster.is_empty() {
        return Vec::new();
    }
    solve_cluster(ctx, lattice, &cluster, vertex_faces, SETTLE_BUDGET, SETTLE_RINGS)
        .unwrap_or_default()
}

fn invalid_faces(ctx: &RepairContext, lattice: &EdgeLattice) -> Vec<usize> {
    (0..ctx.mesh.num_faces())
        .filter(|&f| {
            !lattice
                .face_state(ctx.mesh, f, ctx.orientation_singular[f])
                .is_valid()
        })
        .collect()
}

/// Collapse-and-reflow repair.
#[derive(Debug, Clone, Copy)]
pub struct FlowRepair {
    /// Maximum collapse rounds.
    pub rounds: usize,
}

impl Default for FlowRepair {
    fn default() -> Self {
        Self { rounds: 8 }
    }
}

impl TopologyRepair for FlowRepair {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn repair(&self, ctx: &RepairContext, lattice: &mut EdgeLattice) -> RepairStats {
        let initial_invalid = lattice.count_invalid(ctx.mesh, ctx.orientation_singular);
        let mut locked = vec![false; lattice.num_edges()];
        let mut flow_changes = close_loops(ctx, lattice, &locked).changed;
        let mut invalid = lattice.count_invalid(ctx.mesh, ctx.orientation_singular);
        let mut open = count_open_loops(lattice, ctx.orientation_singular);
        log::debug!(
            "loops closed: {} -> {} invalid faces, {} open loops",
            initial_invalid,
            invalid,
            open
        );

        let mut rounds = 0;
        for round in 0..self.rounds {
            if invalid == 0 {
                break;
            }
            let mut improved = false;
            for cluster in invalid_clusters(ctx, lattice) {
                let snapshot = (lattice.clone(), locked.clone());
                if collapse_cluster(ctx, lattice, &mut locked, &cluster) == 0 {
                    continue;
                }
                let closing = close_loops(ctx, lattice, &locked);
                let now = lattice.count_invalid(ctx.mesh, ctx.orientation_singular);
                let now_open = count_open_loops(lattice, ctx.orientation_singular);
                if now < invalid && now_open <= open {
                    invalid = now;
                    open = now_open;
                    flow_changes += closing.changed;
                    improved = true;
                } else {
                    (*lattice, locked) = snapshot;
                }
            }
            log::debug!(
                "repair round {}: {} invalid faces, {} open loops",
                round,
                invalid,
                open
            );
            if !improved {
                break;
            }
            rounds = round + 1;
        }

        RepairStats {
            initial_invalid,
            final_invalid: invalid,
            open_loops: open,
            flow_changes,
            rounds,
        }
    }
}

/// Zero and lock the longest free edge of every still-invalid face of
/// `cluster`; orientation-singular faces lose all three edges.
///
/// Returns the number of edges collapsed.
fn collapse_cluster(
    ctx: &RepairContext,
    lattice: &mut EdgeLattice,
    locked: &mut [bool],
    cluster: &[usize],
) -> usize {
    let mut collapsed = 0;
    for &f in cluster {
        let singular = ctx.orientation_singular[f];
        if lattice.face_state(ctx.mesh, f, singular).is_valid() {
            continue;
        }
        let free: Vec<usize> = (0..3)
            .map(|k| lattice.edge_index(3 * f + k))
            .filter(|&i| !locked[i])
            .collect();
        let targets: Vec<usize> = if singular {
            free
        } else {
            free.into_iter()
                .max_by_key(|&i| (linf(lattice.edge(i).translation), std::cmp::Reverse(i)))
                .into_iter()
                .collect()
        };
        for i in targets {
            lattice.set_translation(i, Vector2::zeros());
            locked[i] = true;
            collapsed += 1;
        }
    }
    collapsed
}

/// Backtracking search over vertex shifts.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintRepair {
    /// Maximum search nodes per region.
    pub search_budget: usize,
    /// Maximum number of one-ring growth steps per cluster.
    pub max_rings: usize,
}

impl Default for ConstraintRepair {
    fn default() -> Self {
        Self {
            search_budget: 20_000,
            max_rings: 3,
        }
    }
}

impl TopologyRepair for ConstraintRepair {
    fn name(&self) -> &'static str {
        "constraint search"
    }

    fn repair(&self, ctx: &RepairContext, lattice: &mut EdgeLattice) -> RepairStats {
        let initial_invalid = lattice.count_invalid(ctx.mesh, ctx.orientation_singular);
        let locked = vec![false; lattice.num_edges()];
        let flow_changes = close_loops(ctx, lattice, &locked).changed;

        let vertex_faces = vertex_faces(ctx.mesh);
        let mut rounds = 0;
        let mut solved = 0;
        for cluster in invalid_clusters(ctx, lattice) {
            rounds += 1;
            let still_invalid: Vec<usize> = cluster
                .into_iter()
                .filter(|&f| {
                    !lattice
                        .face_state(ctx.mesh, f, ctx.orientation_singular[f])
                        .is_valid()
                })
                .collect();
            if still_invalid.is_empty() {
                continue;
            }
            let found = solve_cluster(
                ctx,
                lattice,
                &still_invalid,
                &vertex_faces,
                self.search_budget,
                self.max_rings,
            );
            if found.is_some() {
                solved += 1;
            }
        }
        let final_invalid = lattice.count_invalid(ctx.mesh, ctx.orientation_singular);
        log::debug!(
            "constraint repair: {} of {} clusters solved, {} -> {} invalid faces",
            solved,
            rounds,
            initial_invalid,
            final_invalid
        );
        RepairStats {
            initial_invalid,
            final_invalid,
            open_loops: count_open_loops(lattice, ctx.orientation_singular),
            flow_changes,
            rounds,
        }
    }
}

fn vertex_faces(mesh: &SurfaceMesh) -> Vec<Vec<usize>> {
    let mut faces = vec![Vec::new(); mesh.num_vertices()];
    for (f, tri) in mesh.triangles().iter().enumerate() {
        for &v in tri {
            faces[v].push(f);
        }
    }
    faces
}

/// Invalid faces grouped by shared vertices.
fn invalid_clusters(ctx: &RepairContext, lattice: &EdgeLattice) -> Vec<Vec<usize>> {
    let invalid = invalid_faces(ctx, lattice);
    let mut uf = UnionFind::new(ctx.mesh.num_vertices());
    for &f in &invalid {
        let [a, b, c] = ctx.mesh.triangles()[f];
        uf.union(a, b);
        uf.union(b, c);
    }
    let mut clusters: Vec<(usize, Vec<usize>)> = Vec::new();
    for f in invalid {
        let root = uf.find(ctx.mesh.triangles()[f][0]);
        match clusters.iter_mut().find(|(r, _)| *r == root) {
            Some((_, faces)) => faces.push(f),
            None => clusters.push((root, vec![f])),
        }
    }
    clusters.into_iter().map(|(_, faces)| faces).collect()
}

/// Search shifts that make every face of `cluster` valid, growing the region
/// around it ring by ring. Applies and returns the shifts on success.
///
/// Clusters holding an open loop are skipped: shifts cannot close it.
fn solve_cluster(
    ctx: &RepairContext,
    lattice: &mut EdgeLattice,
    cluster: &[usize],
    vertex_faces: &[Vec<usize>],
    budget: usize,
    max_rings: usize,
) -> Option<Vec<Offset>> {
    let open = cluster
        .iter()
        .any(|&f| !ctx.orientation_singular[f] && lattice.face_loop(f) != Vector2::zeros());
    if open {
        return None;
    }

    let mut order: Vec<usize> = cluster
        .iter()
        .flat_map(|&f| ctx.mesh.triangles()[f])
        .collect::<BTreeSet<usize>>()
        .into_iter()
        .collect();
    let mut seen: BTreeSet<usize> = order.iter().copied().collect();
    for ring in 0..=max_rings {
        if ring > 0 {
            let grown: BTreeSet<usize> = order
                .iter()
                .flat_map(|&v| vertex_faces[v].iter())
                .flat_map(|&f| ctx.mesh.triangles()[f])
                .filter(|v| !seen.contains(v))
                .collect();
            if grown.is_empty() {
                break;
            }
            seen.extend(grown.iter().copied());
            order.extend(grown);
        }
        let search = ShiftSearch::new(ctx, lattice, &order, cluster, vertex_faces);
        if let Some(shifts) = search.run(budget) {
            let applied: Vec<Offset> = order
                .iter()
                .copied()
                .zip(shifts)
                .filter(|(_, d)| *d != Vector2::zeros())
                .collect();
            for &(v, d) in &applied {
                lattice.shift_vertex(v, d);
            }
            return Some(applied);
        }
    }
    None
}

/// Depth-first search over shifts of a vertex region.
///
/// Vertices are assigned ring by ring, starting at the cluster; a face is
/// checked as soon as its last region vertex has a shift. Faces outside the
/// region keep their state.
struct ShiftSearch<'a> {
    ctx: &'a RepairContext<'a>,
    lattice: &'a EdgeLattice,
    /// Search position of every region vertex.
    position: BTreeMap<usize, usize>,
    /// Per search position: faces that become fully determined there.
    checks: Vec<Vec<usize>>,
    /// Feature edges (directed) that are axis-aligned now.
    aligned: BTreeSet<usize>,
}

impl<'a> ShiftSearch<'a> {
    fn new(
        ctx: &'a RepairContext<'a>,
        lattice: &'a EdgeLattice,
        order: &[usize],
        cluster: &[usize],
        vertex_faces: &[Vec<usize>],
    ) -> Self {
        let position: BTreeMap<usize, usize> =
            order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let faces: BTreeSet<usize> = order
            .iter()
            .flat_map(|&v| vertex_faces[v].iter().copied())
            .collect();
        let mut checks = vec![Vec::new(); order.len()];
        let mut aligned = BTreeSet::new();
        for f in faces {
            let in_cluster = cluster.contains(&f);
            let valid = lattice
                .face_state(ctx.mesh, f, ctx.orientation_singular[f])
                .is_valid();
            if !(in_cluster || valid) {
                continue;
            }
            let last = ctx.mesh.triangles()[f]
                .iter()
                .filter_map(|v| position.get(v).copied())
                .max();
            if let Some(last) = last {
                checks[last].push(f);
            }
            if ctx.preserve_sharp {
                for k in 0..3 {
                    let e = 3 * f + k;
                    let (_, t) = lattice.directed(e);
                    if ctx.sharp[e] && (t.x == 0 || t.y == 0) {
                        aligned.insert(e);
                    }
                }
            }
        }
        Self {
            ctx,
            lattice,
            position,
            checks,
            aligned,
        }
    }

    fn run(&self, budget: usize) -> Option<Vec<Vector2<i32>>> {
        let mut shifts = vec![Vector2::zeros(); self.checks.len()];
        let mut nodes = 0;
        self.descend(0, &mut shifts, &mut nodes, budget)
            .then_some(shifts)
    }

    fn descend(
        &self,
        depth: usize,
        shifts: &mut [Vector2<i32>],
        nodes: &mut usize,
        budget: usize,
    ) -> bool {
        if depth == self.checks.len() {
            return true;
        }
        for (dx, dy) in SHIFTS {
            *nodes += 1;
            if *nodes > budget {
                return false;
            }
            shifts[depth] = Vector2::new(dx, dy);
            if self.checks[depth].iter().all(|&f| self.face_ok(f, depth, shifts))
                && self.descend(depth + 1, shifts, nodes, budget)
            {
                return true;
            }
        }
        shifts[depth] = Vector2::zeros();
        false
    }

    fn face_ok(&self, f: usize, depth: usize, shifts: &[Vector2<i32>]) -> bool {
        let delta = |v: usize| match self.position.get(&v) {
            Some(&i) if i <= depth => shifts[i],
            _ => Vector2::zeros(),
        };
        let state = self
            .lattice
            .face_state_shifted(self.ctx.mesh, f, self.ctx.orientation_singular[f], &delta);
        if !state.is_valid() {
            return false;
        }
        (0..3).map(|k| 3 * f + k).all(|e| {
            if !self.aligned.contains(&e) {
                return true;
            }
            let (_, t) = self.lattice.directed_shifted(self.ctx.mesh, e, &delta);
            t.x == 0 || t.y == 0
        })
    }
}
