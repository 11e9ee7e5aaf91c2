//! Network flow over face-loop constraints.
//!
//! Every orientation-regular face contributes two integer equations: the x
//! and y components of its loop sum must vanish. Changing one component of
//! one edge translation by ±1 moves exactly one component of each adjacent
//! face's loop by ±1, so after choosing a sign per equation the system is a
//! flow conservation problem: equations are nodes, edge components are arcs
//! between the two faces of the edge (or between a face and a ground node on
//! boundaries), and loop residuals become supplies and demands.
//!
//! The graph is solved by a [`FlowSolver`]: [`MaxFlow`] (Edmonds-Karp) or
//! [`MinCostFlow`] (successive shortest paths), which changes as few edge
//! components as possible.

use std::collections::VecDeque;
use std::fmt::Debug;

use nalgebra::Vector2;

use crate::algo::rosy::Rot4;
use crate::config::Config;
use crate::mesh::SurfaceMesh;

use super::lattice::EdgeLattice;

const UNVISITED: usize = usize::MAX;

/// A flow network with paired residual arcs (`arc ^ 1` is the reverse arc).
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    heads: Vec<usize>,
    residual: Vec<i64>,
    capacity: Vec<i64>,
    costs: Vec<i64>,
    adjacency: Vec<Vec<usize>>,
}

impl FlowGraph {
    /// Create a graph with `n` nodes and no arcs.
    pub fn new(n: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); n],
            ..Self::default()
        }
    }

    /// Add a node and return its index.
    pub fn add_node(&mut self) -> usize {
        self.adjacency.push(Vec::new());
        self.adjacency.len() - 1
    }

    /// Number of nodes.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Add an arc `u → v`; returns its index.
    pub fn add_arc(&mut self, u: usize, v: usize, capacity: i64, cost: i64) -> usize {
        let arc = self.heads.len();
        self.heads.push(v);
        self.residual.push(capacity);
        self.capacity.push(capacity);
        self.costs.push(cost);
        self.adjacency[u].push(arc);

        self.heads.push(u);
        self.residual.push(0);
        self.capacity.push(0);
        self.costs.push(-cost);
        self.adjacency[v].push(arc + 1);
        arc
    }

    /// Flow currently carried by a forward arc.
    #[inline]
    pub fn flow(&self, arc: usize) -> i64 {
        self.capacity[arc] - self.residual[arc]
    }

    /// Total cost of the current flow.
    pub fn cost(&self) -> i64 {
        (0..self.heads.len())
            .step_by(2)
            .map(|arc| self.flow(arc) * self.costs[arc])
            .sum()
    }

    fn augment(&mut self, parent: &[usize], s: usize, t: usize) -> i64 {
        let mut bottleneck = i64::MAX;
        let mut v = t;
        while v != s {
            let arc = parent[v];
            bottleneck = bottleneck.min(self.residual[arc]);
            v = self.heads[arc ^ 1];
        }
        let mut v = t;
        while v != s {
            let arc = parent[v];
            self.residual[arc] -= bottleneck;
            self.residual[arc ^ 1] += bottleneck;
            v = self.heads[arc ^ 1];
        }
        bottleneck
    }
}

/// Strategy for pushing flow from `s` to `t`.
pub trait FlowSolver: Debug + Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Push as much flow as possible; returns the total flow.
    fn solve(&self, graph: &mut FlowGraph, s: usize, t: usize) -> i64;
}

/// Edmonds-Karp maximum flow (shortest augmenting paths by BFS).
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxFlow;

impl FlowSolver for MaxFlow {
    fn name(&self) -> &'static str {
        "max-flow"
    }

    fn solve(&self, graph: &mut FlowGraph, s: usize, t: usize) -> i64 {
        let n = graph.num_nodes();
        let mut total = 0;
        let mut parent = vec![UNVISITED; n];
        let mut queue = VecDeque::new();
        loop {
            parent.iter_mut().for_each(|p| *p = UNVISITED);
            queue.clear();
            queue.push_back(s);
            let mut found = false;
            while let Some(u) = queue.pop_front() {
                for &arc in &graph.adjacency[u] {
                    let v = graph.heads[arc];
                    if graph.residual[arc] > 0 && v != s && parent[v] == UNVISITED {
                        parent[v] = arc;
                        if v == t {
                            found = true;
                            break;
                        }
                        queue.push_back(v);
                    }
                }
                if found {
                    break;
                }
            }
            if !found {
                return total;
            }
            total += graph.augment(&parent, s, t);
        }
    }
}

/// Successive-shortest-path minimum-cost maximum flow.
///
/// Shortest paths are found with a queue-based Bellman-Ford, which handles
/// the negative costs of residual arcs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinCostFlow;

impl FlowSolver for MinCostFlow {
    fn name(&self) -> &'static str {
        "min-cost flow"
    }

    fn solve(&self, graph: &mut FlowGraph, s: usize, t: usize) -> i64 {
        let n = graph.num_nodes();
        let mut total = 0;
        let mut dist = vec![i64::MAX; n];
        let mut parent = vec![UNVISITED; n];
        let mut in_queue = vec![false; n];
        let mut queue = VecDeque::new();
        loop {
            dist.iter_mut().for_each(|d| *d = i64::MAX);
            parent.iter_mut().for_each(|p| *p = UNVISITED);
            dist[s] = 0;
            queue.push_back(s);
            in_queue[s] = true;
            while let Some(u) = queue.pop_front() {
                in_queue[u] = false;
                for &arc in &graph.adjacency[u] {
                    if graph.residual[arc] <= 0 {
                        continue;
                    }
                    let v = graph.heads[arc];
                    let candidate = dist[u] + graph.costs[arc];
                    if candidate < dist[v] {
                        dist[v] = candidate;
                        parent[v] = arc;
                        if !in_queue[v] {
                            in_queue[v] = true;
                            queue.push_back(v);
                        }
                    }
                }
            }
            if dist[t] == i64::MAX {
                return total;
            }
            total += graph.augment(&parent, s, t);
        }
    }
}

/// The flow strategy selected by the configuration.
pub fn flow_solver(config: &Config) -> Box<dyn FlowSolver> {
    if config.minimum_cost_flow {
        Box::new(MinCostFlow)
    } else {
        Box::new(MaxFlow)
    }
}

/// Outcome of one pass of [`resolve_face_loops`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopResolution {
    /// Number of edge components changed.
    pub changed: usize,
    /// Whether every loop residual could be routed.
    pub satisfied: bool,
}

/// One edge-component variable and the (up to two) equations it enters.
#[derive(Debug, Clone, Copy)]
struct Variable {
    edge: usize,
    axis: usize,
    entries: [(usize, i32); 2],
    len: usize,
}

/// Adjust unlocked edge translations so the loops of `regular` faces close.
///
/// Runs a single flow pass in which every edge component changes by at most
/// one; callers repeat while the pass makes progress.
pub fn resolve_face_loops(
    mesh: &SurfaceMesh,
    lattice: &mut EdgeLattice,
    regular: &[bool],
    locked: &[bool],
    solver: &dyn FlowSolver,
) -> LoopResolution {
    // Equation nodes: two per regular face.
    let mut face_node = vec![UNVISITED; mesh.num_faces()];
    let mut num_equations = 0;
    for f in 0..mesh.num_faces() {
        if regular[f] {
            face_node[f] = num_equations;
            num_equations += 2;
        }
    }
    let mut residuals = vec![0i64; num_equations];
    let mut any_open = false;
    for f in 0..mesh.num_faces() {
        if regular[f] {
            let sum = lattice.face_loop(f);
            residuals[face_node[f]] = sum.x as i64;
            residuals[face_node[f] + 1] = sum.y as i64;
            any_open |= sum != Vector2::zeros();
        }
    }
    if !any_open {
        return LoopResolution {
            changed: 0,
            satisfied: true,
        };
    }

    let variables = collect_variables(mesh, lattice, regular, locked, &face_node);

    // Sign each equation so that every two-sided variable enters with
    // opposite signs; variables closing an odd cycle are dropped.
    let mut sign = vec![0i32; num_equations];
    let mut links: Vec<Vec<(usize, i32)>> = vec![Vec::new(); num_equations];
    for var in variables.iter().filter(|v| v.len == 2) {
        let (u, cu) = var.entries[0];
        let (w, cw) = var.entries[1];
        let relation = -cu * cw;
        links[u].push((w, relation));
        links[w].push((u, relation));
    }
    let mut queue = VecDeque::new();
    for start in 0..num_equations {
        if sign[start] != 0 {
            continue;
        }
        sign[start] = 1;
        queue.push_back(start);
        while let Some(u) = queue.pop_front() {
            for &(w, relation) in &links[u] {
                if sign[w] == 0 {
                    sign[w] = sign[u] * relation;
                    queue.push_back(w);
                }
            }
        }
    }

    let mut graph = FlowGraph::new(num_equations);
    let ground = graph.add_node();
    let source = graph.add_node();
    let sink = graph.add_node();

    // (variable index, arc raising x, arc lowering x)
    let mut arcs: Vec<(usize, usize, usize)> = Vec::new();
    for (i, var) in variables.iter().enumerate() {
        let (plus, minus) = if var.len == 2 {
            let (u, cu) = var.entries[0];
            let (w, cw) = var.entries[1];
            if sign[u] * cu != -(sign[w] * cw) {
                continue;
            }
            if sign[u] * cu > 0 {
                (u, w)
            } else {
                (w, u)
            }
        } else {
            let (u, cu) = var.entries[0];
            if sign[u] * cu > 0 {
                (u, ground)
            } else {
                (ground, u)
            }
        };
        // Raising x moves one unit into `plus` and out of `minus`.
        let raise = graph.add_arc(minus, plus, 1, 1);
        let lower = graph.add_arc(plus, minus, 1, 1);
        arcs.push((i, raise, lower));
    }

    let mut demand = 0i64;
    let mut supply = 0i64;
    let mut supply_arcs = Vec::new();
    for u in 0..num_equations {
        let b = -(sign[u] as i64) * residuals[u];
        if b > 0 {
            supply_arcs.push(graph.add_arc(u, sink, b, 0));
            demand += b;
        } else if b < 0 {
            supply_arcs.push(graph.add_arc(source, u, -b, 0));
            supply += -b;
        }
    }
    graph.add_arc(source, ground, demand, 0);
    graph.add_arc(ground, sink, supply, 0);

    let pushed = solver.solve(&mut graph, source, sink);
    let satisfied = supply_arcs.iter().all(|&arc| graph.flow(arc) == graph.capacity[arc]);

    let mut changed = 0;
    for (i, raise, lower) in arcs {
        let x = graph.flow(raise) - graph.flow(lower);
        if x != 0 {
            let var = &variables[i];
            let mut t = lattice.edge(var.edge).translation;
            t[var.axis] += x as i32;
            lattice.set_translation(var.edge, t);
            changed += 1;
        }
    }
    log::trace!(
        "{}: pushed {} units, {} components changed, satisfied: {}",
        solver.name(),
        pushed,
        changed,
        satisfied
    );
    LoopResolution { changed, satisfied }
}

/// Enumerate the unlocked edge components and their loop coefficients.
fn collect_variables(
    mesh: &SurfaceMesh,
    lattice: &EdgeLattice,
    regular: &[bool],
    locked: &[bool],
    face_node: &[usize],
) -> Vec<Variable> {
    let mut variables: Vec<Variable> = (0..lattice.num_edges())
        .flat_map(|edge| {
            (0..2).map(move |axis| Variable {
                edge,
                axis,
                entries: [(UNVISITED, 0); 2],
                len: 0,
            })
        })
        .collect();

    for f in (0..mesh.num_faces()).filter(|&f| regular[f]) {
        let mut frame = Rot4::IDENTITY;
        for k in 0..3 {
            let e = 3 * f + k;
            let edge_index = lattice.edge_index(e);
            let edge = lattice.edge(edge_index);
            let (step, sign, rotation) = if edge.dedge == e {
                (edge.rotation, 1, frame)
            } else {
                (-edge.rotation, -1, frame - edge.rotation)
            };
            for axis in 0..2 {
                let mut unit = Vector2::zeros();
                unit[axis] = 1;
                let c = rotation.apply_int(unit) * sign;
                let (component, coef) = if c.x != 0 { (0, c.x) } else { (1, c.y) };
                let var = &mut variables[2 * edge_index + axis];
                if var.len < 2 {
                    var.entries[var.len] = (face_node[f] + component, coef);
                    var.len += 1;
                }
            }
            frame = frame + step;
        }
    }

    variables
        .into_iter()
        .filter(|v| v.len > 0 && !locked[v.edge])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::index_map::lattice::tests::half_cell;

    fn diamond() -> (FlowGraph, [usize; 5]) {
        // s=0, a=1, b=2, t=3
        let mut g = FlowGraph::new(4);
        let sa = g.add_arc(0, 1, 2, 1);
        let sb = g.add_arc(0, 2, 1, 5);
        let ab = g.add_arc(1, 2, 1, 1);
        let at = g.add_arc(1, 3, 1, 1);
        let bt = g.add_arc(2, 3, 2, 1);
        (g, [sa, sb, ab, at, bt])
    }

    #[test]
    fn test_max_flow_value() {
        let (mut g, [sa, sb, ..]) = diamond();
        assert_eq!(MaxFlow.solve(&mut g, 0, 3), 3);
        assert_eq!(g.flow(sa) + g.flow(sb), 3);
    }

    #[test]
    fn test_min_cost_flow_is_cheapest() {
        let (mut g, _) = diamond();
        assert_eq!(MinCostFlow.solve(&mut g, 0, 3), 3);
        // s-a-t (2), s-a-b-t (3), s-b-t (6)
        assert_eq!(g.cost(), 11);
    }

    #[test]
    fn test_resolve_closes_single_face() {
        let (mesh, mut lattice) = half_cell();
        lattice.set_translation(1, Vector2::new(0, 2));
        assert_eq!(lattice.face_loop(0), Vector2::new(0, 1));
        for solver in [&MaxFlow as &dyn FlowSolver, &MinCostFlow] {
            let mut l = lattice.clone();
            let result = resolve_face_loops(&mesh, &mut l, &[true], &[false; 3], solver);
            assert!(result.satisfied);
            assert_eq!(result.changed, 1);
            assert_eq!(l.face_loop(0), Vector2::zeros());
        }
    }

    #[test]
    fn test_locked_edges_are_kept() {
        let (mesh, mut lattice) = half_cell();
        lattice.set_translation(1, Vector2::new(0, 2));
        let locked = [true, true, false];
        let result = resolve_face_loops(&mesh, &mut lattice, &[true], &locked, &MinCostFlow);
        assert!(result.satisfied);
        assert_eq!(lattice.edge(0).translation, Vector2::new(1, 0));
        assert_eq!(lattice.edge(1).translation, Vector2::new(0, 2));
        assert_eq!(lattice.face_loop(0), Vector2::zeros());
    }

    #[test]
    fn test_closed_loops_are_untouched() {
        let (mesh, mut lattice) = half_cell();
        let before = lattice.clone();
        let result = resolve_face_loops(&mesh, &mut lattice, &[true], &[false; 3], &MaxFlow);
        assert_eq!(result, LoopResolution { changed: 0, satisfied: true });
        assert_eq!(lattice, before);
    }
}
