//! Hierarchical 4-RoSy orientation field solver.
//!
//! The field stores one unit tangent vector per vertex and level. Solving
//! starts from a seeded random field on the coarsest level, relaxes it with
//! Gauss-Seidel sweeps over the colour phases, and prolongs the result one
//! level down as the initial guess for the next relaxation.
//!
//! Each vertex update averages the neighbours' best-matching representatives
//! and is only accepted when it does not raise the vertex's share of the
//! energy. Because the vertices of a phase are independent, the total energy
//! of a level never increases from one sweep to the next.
//!
//! # References
//!
//! - Jakob, W., et al. (2015). "Instant Field-Aligned Meshes." ACM TOG 34(6).
//! - Ray, N., et al. (2008). "N-symmetry direction field design." ACM TOG 27(2).

use nalgebra::Vector3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;

use super::hierarchy::{is_converged, sweep_phases, Hierarchy, Level, RelaxStats};
use super::progress::Progress;
use super::rosy::{
    compat_orientation_extrinsic_4, orientation_mismatch, project_tangent, tangent_unit,
};

/// A solved orientation field on every hierarchy level.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationField {
    levels: Vec<Vec<Vector3<f64>>>,
}

impl OrientationField {
    /// Representative directions of level `l`.
    #[inline]
    pub fn level(&self, l: usize) -> &[Vector3<f64>] {
        &self.levels[l]
    }

    /// Representative directions of the working mesh vertices.
    #[inline]
    pub fn finest(&self) -> &[Vector3<f64>] {
        &self.levels[0]
    }

    /// Number of levels.
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Total 4-RoSy smoothness energy of a level.
///
/// Every undirected link contributes `w_ij |a_ij - b_ij|²` for the matched
/// representatives `a_ij`, `b_ij`.
pub fn orientation_energy(level: &Level, q: &[Vector3<f64>]) -> f64 {
    let mut energy = 0.0;
    for i in 0..level.len() {
        for (j, w) in level.adjacency.neighbors(i) {
            if j > i {
                energy +=
                    w * orientation_mismatch(&q[i], &level.normals[i], &q[j], &level.normals[j]);
            }
        }
    }
    energy
}

fn local_energy(level: &Level, q: &[Vector3<f64>], i: usize, qi: &Vector3<f64>) -> f64 {
    let n_i = &level.normals[i];
    level
        .adjacency
        .neighbors(i)
        .map(|(j, w)| w * orientation_mismatch(qi, n_i, &q[j], &level.normals[j]))
        .sum()
}

/// Direction a constrained vertex is pinned to, in its tangent plane.
fn pinned_direction(level: &Level, i: usize) -> Option<Vector3<f64>> {
    level.constraints[i]
        .direction()
        .map(|d| tangent_unit(&d, &level.normals[i]))
}

/// Candidate update of vertex `i`, or `None` to keep it.
fn smooth_vertex(level: &Level, q: &[Vector3<f64>], i: usize) -> Option<Vector3<f64>> {
    if level.constraints[i].is_feature() || level.adjacency.degree(i) == 0 {
        return None;
    }
    let n_i = &level.normals[i];
    let mut sum = q[i];
    let mut weight_sum = 0.0;
    for (j, w) in level.adjacency.neighbors(i) {
        let (a, b) = compat_orientation_extrinsic_4(&sum, n_i, &q[j], &level.normals[j]);
        sum = project_tangent(&(a * weight_sum + b * w), n_i);
        weight_sum += w;
        if let Some(unit) = sum.try_normalize(1e-12) {
            sum = unit;
        }
    }
    let candidate = sum.try_normalize(1e-12)?;
    if candidate == q[i] {
        return None;
    }
    if local_energy(level, q, i, &candidate) <= local_energy(level, q, i, &q[i]) {
        Some(candidate)
    } else {
        None
    }
}

/// Relax one level in place; returns the energy after each sweep (the
/// first entry is the starting energy) and whether it converged.
fn relax_level(level: &Level, q: &mut [Vector3<f64>], config: &Config) -> (Vec<f64>, bool) {
    let mut energies = vec![orientation_energy(level, q)];
    let mut converged = false;
    for _ in 0..config.orientation_iterations {
        sweep_phases(level, q, config.parallel, |i, current| {
            smooth_vertex(level, current, i)
        });
        let energy = orientation_energy(level, q);
        let previous = energies[energies.len() - 1];
        energies.push(energy);
        if is_converged(previous, energy, config.convergence_threshold) {
            converged = true;
            break;
        }
    }
    (energies, converged)
}

/// Seeded random tangent field on a level, with pinned vertices applied.
fn random_field(level: &Level, seed: u64) -> Vec<Vector3<f64>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..level.len())
        .map(|i| {
            let v = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            pinned_direction(level, i).unwrap_or_else(|| tangent_unit(&v, &level.normals[i]))
        })
        .collect()
}

/// Carry a coarse field down to the finer level `fine`.
fn prolong_field(fine: &Level, coarse: &Level, q_coarse: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let mut q = vec![Vector3::zeros(); fine.len()];
    for (c, pair) in coarse.prolong.iter().enumerate() {
        for &x in pair.iter().filter(|&&x| x < fine.len()) {
            q[x] = tangent_unit(&q_coarse[c], &fine.normals[x]);
        }
    }
    for (i, qi) in q.iter_mut().enumerate() {
        if let Some(d) = pinned_direction(fine, i) {
            *qi = d;
        }
    }
    q
}

/// Solve the orientation field on every level of the hierarchy.
///
/// Never fails: when the finest level does not meet the convergence
/// threshold within the sweep budget a warning is logged and the best field
/// found is returned.
pub fn solve_orientation(
    hierarchy: &Hierarchy,
    config: &Config,
    progress: &Progress,
) -> (OrientationField, RelaxStats) {
    let num_levels = hierarchy.num_levels();
    let mut levels: Vec<Vec<Vector3<f64>>> = vec![Vec::new(); num_levels];
    let mut energies: Vec<Vec<f64>> = vec![Vec::new(); num_levels];
    let mut converged = false;

    for l in (0..num_levels).rev() {
        let level = hierarchy.level(l);
        let mut q = if l + 1 == num_levels {
            random_field(level, config.seed)
        } else {
            prolong_field(level, hierarchy.level(l + 1), &levels[l + 1])
        };
        let (level_energies, level_converged) = relax_level(level, &mut q, config);
        log::debug!(
            "orientation level {}: {} sweeps, energy {:.6} -> {:.6}",
            l,
            level_energies.len() - 1,
            level_energies[0],
            level_energies[level_energies.len() - 1]
        );
        levels[l] = q;
        energies[l] = level_energies;
        converged = level_converged;
        progress.report(num_levels - l, num_levels, "Orientation field");
    }

    if !converged {
        log::warn!(
            "orientation field did not converge within {} sweeps",
            config.orientation_iterations
        );
    }
    (OrientationField { levels }, RelaxStats { energies, converged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::prepare::prepare;
    use crate::mesh::primitives::{cube, grid, icosphere};

    fn hierarchy(mesh: &crate::mesh::SurfaceMesh, config: &Config) -> Hierarchy {
        Hierarchy::build(prepare(mesh, config).unwrap(), config.parallel).unwrap()
    }

    #[test]
    fn test_field_is_unit_and_tangent() {
        let config = Config::default();
        let h = hierarchy(&icosphere(1.0, 2).unwrap(), &config);
        let (field, _) = solve_orientation(&h, &config, &Progress::none());
        assert_eq!(field.num_levels(), h.num_levels());
        for l in 0..h.num_levels() {
            let level = h.level(l);
            for (q, n) in field.level(l).iter().zip(&level.normals) {
                assert!((q.norm() - 1.0).abs() < 1e-9);
                assert!(q.dot(n).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_energy_is_monotonic_per_level() {
        let config = Config::default().with_iterations(10, 6).with_convergence_threshold(0.0);
        let h = hierarchy(&icosphere(1.0, 3).unwrap(), &config);
        let (_, stats) = solve_orientation(&h, &config, &Progress::none());
        for level_energies in &stats.energies {
            for pair in level_energies.windows(2) {
                assert!(
                    pair[1] <= pair[0] * (1.0 + 1e-12) + 1e-12,
                    "energy rose from {} to {}",
                    pair[0],
                    pair[1]
                );
            }
        }
        assert!(stats.sweeps() > 0);
    }

    #[test]
    fn test_planar_field_aligns() {
        let config = Config::default()
            .with_target_faces(100)
            .with_iterations(20, 6)
            .with_convergence_threshold(0.0);
        let h = hierarchy(&grid(8, 8, 1.0, 1.0).unwrap(), &config);
        let (field, stats) = solve_orientation(&h, &config, &Progress::none());
        // Boundary vertices pin the field to the square's axes.
        let energies = &stats.energies[0];
        assert!(energies[energies.len() - 1] <= energies[0]);
        let aligned = field
            .finest()
            .iter()
            .filter(|q| q.x.abs().max(q.y.abs()) > 0.95)
            .count();
        assert!(aligned * 10 >= field.finest().len() * 9);
    }

    #[test]
    fn test_pinned_vertices_follow_features() {
        let config = Config::default().with_preserve_sharp(true).with_target_faces(100);
        let h = hierarchy(&cube(1.0, 2).unwrap(), &config);
        let (field, _) = solve_orientation(&h, &config, &Progress::none());
        let level = h.level(0);
        for (i, q) in field.finest().iter().enumerate() {
            if let Some(d) = level.constraints[i].direction() {
                let pinned = tangent_unit(&d, &level.normals[i]);
                assert!((q - pinned).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_seed_determinism() {
        let config = Config::default().with_seed(3);
        let h = hierarchy(&icosphere(1.0, 2).unwrap(), &config);
        let (a, _) = solve_orientation(&h, &config, &Progress::none());
        let (b, _) = solve_orientation(&h, &config.clone().sequential(), &Progress::none());
        assert_eq!(a, b);
    }
}
