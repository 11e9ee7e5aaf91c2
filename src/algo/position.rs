//! Hierarchical position field solver.
//!
//! Every vertex carries a lattice origin `o_v` in its tangent plane; together
//! with the orientation representative and the target scale it spans a local
//! square grid. Relaxation pulls neighbouring grids into agreement: a vertex
//! update averages, edge by edge, the closest pair of lattice points of its
//! own grid and the neighbour's, projects the average back into the tangent
//! plane and snaps it to the lattice point nearest the vertex.
//!
//! Feature vertices are kept on their constraint: line vertices slide along
//! the feature direction, corners sit exactly on the corner point.
//!
//! After relaxation the continuous field is rounded into an
//! [`EdgeLattice`]. With min-cost flow enabled the rounding residuals are
//! redistributed over face loops by [`close_loops`], which keeps a flowed
//! group of edges only when neither the invalid faces nor the open loops
//! around it grow.

use nalgebra::Vector3;

use crate::config::Config;

use super::hierarchy::{is_converged, sweep_phases, Constraint, Hierarchy, Level, RelaxStats};
use super::index_map::{
    close_loops, count_open_loops, EdgeLattice, MinCostFlow, RepairContext, VertexFrames,
};
use super::orientation::OrientationField;
use super::progress::Progress;
use super::rosy::{compat_position_extrinsic_4, position_round_4, LatticeSample};
use super::scale::ScaleField;
use super::singularity::EdgeTransitions;

/// Lattice origins on every hierarchy level.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionField {
    levels: Vec<Vec<Vector3<f64>>>,
    scales: Vec<Vec<f64>>,
    adaptive: bool,
}

impl PositionField {
    /// Lattice origins of level `l`.
    #[inline]
    pub fn level(&self, l: usize) -> &[Vector3<f64>] {
        &self.levels[l]
    }

    /// Lattice origins of the working mesh vertices.
    #[inline]
    pub fn finest(&self) -> &[Vector3<f64>] {
        &self.levels[0]
    }

    /// Lattice spacing used on level `l`.
    #[inline]
    pub fn scales(&self, l: usize) -> &[f64] {
        &self.scales[l]
    }

    /// Whether the per-vertex scale field was used.
    #[inline]
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Number of levels.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Rounding of the field into integer translations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatticeStats {
    /// Position singularities straight after rounding.
    pub raw_singularities: usize,
    /// Position singularities after residual redistribution.
    pub singularities: usize,
    /// Edge components changed by the redistribution.
    pub flow_changes: usize,
}

fn sample<'a>(
    level: &'a Level,
    q: &'a [Vector3<f64>],
    o: &'a [Vector3<f64>],
    scales: &[f64],
    i: usize,
) -> LatticeSample<'a> {
    LatticeSample {
        p: &level.positions[i],
        n: &level.normals[i],
        q: &q[i],
        o: &o[i],
        scale: scales[i],
    }
}

/// Total position mismatch of a level, in squared lattice units.
pub fn position_energy(
    level: &Level,
    q: &[Vector3<f64>],
    o: &[Vector3<f64>],
    scales: &[f64],
) -> f64 {
    let mut energy = 0.0;
    for i in 0..level.len() {
        for (j, w) in level.adjacency.neighbors(i) {
            if j > i {
                let (a, b) = compat_position_extrinsic_4(
                    &sample(level, q, o, scales, i),
                    &sample(level, q, o, scales, j),
                );
                energy += w * (a - b).norm_squared() / (scales[i] * scales[j]);
            }
        }
    }
    energy
}

/// Move an origin onto the vertex's feature constraint.
fn constrain(constraint: &Constraint, o: Vector3<f64>) -> Vector3<f64> {
    match *constraint {
        Constraint::Free => o,
        Constraint::Line { point, dir } => point + dir * dir.dot(&(o - point)),
        Constraint::Corner { point, .. } => point,
    }
}

/// Candidate origin of vertex `i`, or `None` to keep it.
fn smooth_vertex(
    level: &Level,
    q: &[Vector3<f64>],
    o: &[Vector3<f64>],
    scales: &[f64],
    i: usize,
) -> Option<Vector3<f64>> {
    if level.adjacency.degree(i) == 0 || matches!(level.constraints[i], Constraint::Corner { .. }) {
        return None;
    }
    let p_i = level.positions[i];
    let n_i = level.normals[i];
    let mut sum = o[i];
    let mut weight_sum = 0.0;
    for (j, w) in level.adjacency.neighbors(i) {
        let current = LatticeSample {
            p: &p_i,
            n: &n_i,
            q: &q[i],
            o: &sum,
            scale: scales[i],
        };
        let (a, b) = compat_position_extrinsic_4(&current, &sample(level, q, o, scales, j));
        sum = (a * weight_sum + b * w) / (weight_sum + w);
        weight_sum += w;
        sum -= n_i * n_i.dot(&(sum - p_i));
    }
    let rounded = position_round_4(&sum, &q[i], &n_i, &p_i, scales[i]);
    let candidate = constrain(&level.constraints[i], rounded);
    (candidate != o[i]).then_some(candidate)
}

fn relax_level(
    level: &Level,
    q: &[Vector3<f64>],
    o: &mut [Vector3<f64>],
    scales: &[f64],
    config: &Config,
) -> (Vec<f64>, bool) {
    let mut energies = vec![position_energy(level, q, o, scales)];
    let mut converged = false;
    for _ in 0..config.position_iterations {
        sweep_phases(level, o, config.parallel, |i, current| {
            smooth_vertex(level, q, current, scales, i)
        });
        let energy = position_energy(level, q, o, scales);
        let previous = energies[energies.len() - 1];
        energies.push(energy);
        if is_converged(previous, energy, config.convergence_threshold) {
            converged = true;
            break;
        }
    }
    (energies, converged)
}

fn initial_origins(level: &Level) -> Vec<Vector3<f64>> {
    level
        .positions
        .iter()
        .zip(&level.constraints)
        .map(|(p, c)| constrain(c, *p))
        .collect()
}

/// Carry coarse origins into the tangent planes of the finer level.
fn prolong_origins(fine: &Level, coarse: &Level, o_coarse: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let mut o = fine.positions.clone();
    for (c, pair) in coarse.prolong.iter().enumerate() {
        for &x in pair.iter().filter(|&&x| x < fine.len()) {
            let n = fine.normals[x];
            let oc = o_coarse[c];
            o[x] = oc - n * n.dot(&(oc - fine.positions[x]));
        }
    }
    for (oi, c) in o.iter_mut().zip(&fine.constraints) {
        *oi = constrain(c, *oi);
    }
    o
}

/// Solve the position field on every level of the hierarchy.
///
/// With `adaptive` the per-vertex scales of `scale` set the lattice spacing,
/// otherwise its uniform scale does.
pub fn solve_position(
    hierarchy: &Hierarchy,
    orientation: &OrientationField,
    scale: &ScaleField,
    adaptive: bool,
    config: &Config,
    progress: &Progress,
) -> (PositionField, RelaxStats) {
    let num_levels = hierarchy.num_levels();
    let scales: Vec<Vec<f64>> = (0..num_levels)
        .map(|l| {
            if adaptive {
                scale.level(l).to_vec()
            } else {
                vec![scale.uniform_scale(); hierarchy.level(l).len()]
            }
        })
        .collect();

    let mut levels: Vec<Vec<Vector3<f64>>> = vec![Vec::new(); num_levels];
    let mut energies = vec![Vec::new(); num_levels];
    let mut converged = false;
    for l in (0..num_levels).rev() {
        let level = hierarchy.level(l);
        let mut o = if l + 1 == num_levels {
            initial_origins(level)
        } else {
            prolong_origins(level, hierarchy.level(l + 1), &levels[l + 1])
        };
        let (level_energies, level_converged) =
            relax_level(level, orientation.level(l), &mut o, &scales[l], config);
        log::debug!(
            "position level {}: {} sweeps, energy {:.6} -> {:.6}",
            l,
            level_energies.len() - 1,
            level_energies[0],
            level_energies[level_energies.len() - 1]
        );
        levels[l] = o;
        energies[l] = level_energies;
        converged = level_converged;
        progress.report(num_levels - l, num_levels, "Position field");
    }
    if !converged {
        log::warn!(
            "position field did not converge within {} sweeps",
            config.position_iterations
        );
    }
    (
        PositionField {
            levels,
            scales,
            adaptive,
        },
        RelaxStats { energies, converged },
    )
}

/// Round the finest position field into an edge lattice.
///
/// With `config.minimum_cost_flow` the rounding residuals are spread by
/// min-cost flow. Neither the open loops nor the invalid faces of the result
/// exceed those of the raw rounding.
pub fn build_lattice(
    hierarchy: &Hierarchy,
    orientation: &OrientationField,
    position: &PositionField,
    transitions: &EdgeTransitions,
    orientation_singular: &[bool],
    config: &Config,
) -> (EdgeLattice, LatticeStats) {
    let working = hierarchy.working();
    let level0 = hierarchy.level(0);
    let frames = VertexFrames {
        positions: &level0.positions,
        normals: &level0.normals,
        q: orientation.finest(),
        o: position.finest(),
        scales: position.scales(0),
    };
    let mut lattice = EdgeLattice::build(&working.mesh, &frames, transitions);
    let raw = count_open_loops(&lattice, orientation_singular);
    let mut stats = LatticeStats {
        raw_singularities: raw,
        singularities: raw,
        flow_changes: 0,
    };
    if !config.minimum_cost_flow || raw == 0 {
        return (lattice, stats);
    }

    let ctx = RepairContext {
        mesh: &working.mesh,
        orientation_singular,
        sharp: &working.sharp,
        preserve_sharp: config.preserve_sharp,
        solver: &MinCostFlow,
    };
    let locked = vec![false; lattice.num_edges()];
    let closing = close_loops(&ctx, &mut lattice, &locked);
    stats.singularities = count_open_loops(&lattice, orientation_singular);
    stats.flow_changes = closing.changed;
    log::debug!(
        "min-cost flow: {} -> {} position singularities ({} changes, {} groups rolled back)",
        raw,
        stats.singularities,
        closing.changed,
        closing.rejected
    );
    (lattice, stats)
}

/// Per undirected edge of the working mesh: distance between the closest
/// lattice points of its endpoints, in units of the local scale.
pub fn edge_residuals(
    hierarchy: &Hierarchy,
    orientation: &OrientationField,
    position: &PositionField,
) -> Vec<(usize, f64)> {
    let level = hierarchy.level(0);
    let mesh = &hierarchy.working().mesh;
    let twins = mesh.twins();
    let q = orientation.finest();
    let o = position.finest();
    let scales = position.scales(0);
    (0..mesh.num_dedges())
        .filter(|&e| twins[e] == crate::mesh::INVALID || e < twins[e])
        .map(|e| {
            let (i, j) = (mesh.dedge_from(e), mesh.dedge_to(e));
            let (a, b) = compat_position_extrinsic_4(
                &sample(level, q, o, scales, i),
                &sample(level, q, o, scales, j),
            );
            (e, (a - b).norm() / (0.5 * (scales[i] + scales[j])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::orientation::solve_orientation;
    use crate::algo::prepare::prepare;
    use crate::algo::scale::{estimate_slope, solve_scale};
    use crate::mesh::primitives::{cube, grid, icosphere};
    use crate::mesh::SurfaceMesh;

    struct Solved {
        hierarchy: Hierarchy,
        orientation: OrientationField,
        scale: ScaleField,
    }

    fn solve_fields(mesh: &SurfaceMesh, config: &Config) -> Solved {
        let hierarchy = Hierarchy::build(prepare(mesh, config).unwrap(), config.parallel).unwrap();
        let (orientation, _) = solve_orientation(&hierarchy, config, &Progress::none());
        let slope = config
            .adaptive_scale
            .then(|| estimate_slope(hierarchy.working(), config.parallel));
        let scale = solve_scale(&hierarchy, slope.as_deref(), config);
        Solved {
            hierarchy,
            orientation,
            scale,
        }
    }

    fn solve(s: &Solved, adaptive: bool, config: &Config) -> (PositionField, RelaxStats) {
        solve_position(
            &s.hierarchy,
            &s.orientation,
            &s.scale,
            adaptive,
            config,
            &Progress::none(),
        )
    }

    fn singular_faces(s: &Solved) -> (EdgeTransitions, Vec<bool>) {
        let w = s.hierarchy.working();
        let t = EdgeTransitions::compute(&w.mesh, &w.normals, s.orientation.finest());
        let singular = t.singular_faces(w.mesh.num_faces());
        (t, singular)
    }

    #[test]
    fn test_origins_stay_in_tangent_planes() {
        let config = Config::default().with_target_faces(300);
        let s = solve_fields(&icosphere(1.0, 3).unwrap(), &config);
        let (field, stats) = solve(&s, false, &config);
        assert_eq!(field.num_levels(), s.hierarchy.num_levels());
        assert!(!field.is_adaptive());
        assert!(stats.sweeps() > 0);
        for l in 0..field.num_levels() {
            let level = s.hierarchy.level(l);
            for i in 0..level.len() {
                let d = field.level(l)[i] - level.positions[i];
                assert!(d.dot(&level.normals[i]).abs() < 1e-9);
                // Snapped to the lattice point nearest the vertex.
                assert!(d.norm() <= field.scales(l)[i] * 0.75);
            }
        }
    }

    #[test]
    fn test_planar_translations_are_near_integer() {
        let config = Config::default()
            .with_target_faces(100)
            .with_iterations(20, 20)
            .with_convergence_threshold(0.0);
        let s = solve_fields(&grid(8, 8, 1.0, 1.0).unwrap(), &config);
        let (field, _) = solve(&s, false, &config);
        let (_, singular) = singular_faces(&s);
        let mesh = &s.hierarchy.working().mesh;

        let residuals = edge_residuals(&s.hierarchy, &s.orientation, &field);
        let regular: Vec<f64> = residuals
            .iter()
            .filter(|(e, _)| {
                let twin = mesh.twins()[*e];
                !singular[e / 3] && (twin == crate::mesh::INVALID || !singular[twin / 3])
            })
            .map(|&(_, r)| r)
            .collect();
        assert!(!regular.is_empty());
        let good = regular.iter().filter(|&&r| r < 0.3).count();
        assert!(good * 10 >= regular.len() * 8, "{} of {} edges", good, regular.len());
    }

    #[test]
    fn test_features_stay_on_constraints() {
        let config = Config::default().with_preserve_sharp(true).with_target_faces(150);
        let s = solve_fields(&cube(1.0, 3).unwrap(), &config);
        let (field, _) = solve(&s, false, &config);
        let level = s.hierarchy.level(0);
        for (o, c) in field.finest().iter().zip(&level.constraints) {
            match *c {
                Constraint::Corner { point, .. } => assert_eq!(*o, point),
                Constraint::Line { point, dir } => {
                    let off = o - point;
                    assert!((off - dir * dir.dot(&off)).norm() < 1e-9);
                }
                Constraint::Free => {}
            }
        }
    }

    #[test]
    fn test_min_cost_flow_never_adds_singularities() {
        let base = Config::default().with_target_faces(200);
        let s = solve_fields(&icosphere(1.0, 3).unwrap(), &base);
        let (field, _) = solve(&s, false, &base);
        let (t, singular) = singular_faces(&s);

        let (plain_lattice, plain) =
            build_lattice(&s.hierarchy, &s.orientation, &field, &t, &singular, &base);
        assert_eq!(plain.raw_singularities, plain.singularities);

        let mcf = base.clone().with_minimum_cost_flow(true);
        let (lattice, flowed) =
            build_lattice(&s.hierarchy, &s.orientation, &field, &t, &singular, &mcf);
        assert_eq!(flowed.raw_singularities, plain.raw_singularities);
        assert!(flowed.singularities <= plain.singularities);
        assert_eq!(count_open_loops(&lattice, &singular), flowed.singularities);

        // Closing loops must not trade singularities for invalid faces.
        let mesh = &s.hierarchy.working().mesh;
        let invalid = lattice.count_invalid(mesh, &singular);
        assert!(invalid <= plain_lattice.count_invalid(mesh, &singular));
    }

    #[test]
    fn test_adaptive_scales_are_used() {
        let config = Config::default().with_target_faces(200).with_adaptive_scale(true);
        let s = solve_fields(&icosphere(1.0, 2).unwrap(), &config);
        let (field, _) = solve(&s, true, &config);
        assert!(field.is_adaptive());
        assert_eq!(field.scales(0), s.scale.level(0));
    }
}
