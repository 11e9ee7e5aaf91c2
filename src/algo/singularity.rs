//! Orientation and position singularities.
//!
//! Both passes work on the faces of the working mesh and report every
//! affected face exactly once.
//!
//! The orientation pass first builds [`EdgeTransitions`]: for every directed
//! edge the angle `ρ` of the minimal-rotation transport between the two
//! vertex tangent bases, and the integer period jump `p` that best matches
//! the two field representatives across the edge. Both tables are exactly
//! antisymmetric under edge reversal. The index of a face in quarter turns is
//!
//! ```text
//! index = -Σ p - 4 m,   m = round((Σ ρ - wrap(Σ ρ)) / 2π)
//! ```
//!
//! where `m` removes the winding of the per-vertex bases. On a closed surface
//! the indices sum to `4 χ`.
//!
//! The position pass sums the rotated integer edge translations of the
//! [`EdgeLattice`] around every orientation-regular face; a non-zero sum is a
//! position singularity.

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};

use crate::mesh::{SurfaceMesh, INVALID};

use super::index_map::EdgeLattice;
use super::rosy::{angle_in_basis, period_jump, tangent_basis, transport_angle, wrap_angle, Rot4};

/// Kind and index of a singularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingularityKind {
    /// Rotational defect, in quarter turns.
    Orientation(i32),
    /// Translational defect, in lattice units.
    Position(Vector2<i32>),
}

/// A face whose loop does not close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Singularity {
    /// Working mesh face.
    pub face: usize,
    /// What fails to close around the face.
    pub kind: SingularityKind,
}

/// Per directed edge connection angles and period jumps.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTransitions {
    rho: Vec<f64>,
    jump: Vec<i32>,
}

impl EdgeTransitions {
    /// Compute transitions for the field `q` over `mesh` with vertex normals `normals`.
    pub fn compute(mesh: &SurfaceMesh, normals: &[Vector3<f64>], q: &[Vector3<f64>]) -> Self {
        let bases: Vec<(Vector3<f64>, Vector3<f64>)> = normals.iter().map(tangent_basis).collect();
        let theta: Vec<f64> = q
            .iter()
            .zip(&bases)
            .map(|(qi, (e1, e2))| angle_in_basis(qi, e1, e2))
            .collect();

        let twins = mesh.twins();
        let mut rho = vec![0.0; mesh.num_dedges()];
        let mut jump = vec![0; mesh.num_dedges()];
        for e in 0..mesh.num_dedges() {
            let t = twins[e];
            if t != INVALID && t < e {
                continue;
            }
            let (i, j) = (mesh.dedge_from(e), mesh.dedge_to(e));
            let r = transport_angle(
                &normals[i],
                &bases[i].0,
                &normals[j],
                &bases[j].0,
                &bases[j].1,
            );
            let p = period_jump(theta[i], theta[j], r);
            rho[e] = r;
            jump[e] = p;
            if t != INVALID {
                rho[t] = -r;
                jump[t] = -p;
            }
        }
        Self { rho, jump }
    }

    /// Transport angle of directed edge `e`.
    #[inline]
    pub fn rho(&self, e: usize) -> f64 {
        self.rho[e]
    }

    /// Period jump of directed edge `e` in quarter turns.
    #[inline]
    pub fn jump(&self, e: usize) -> i32 {
        self.jump[e]
    }

    /// Frame rotation of directed edge `e`.
    #[inline]
    pub fn rotation(&self, e: usize) -> Rot4 {
        Rot4::new(self.jump[e])
    }

    /// Orientation index of face `f` in quarter turns.
    pub fn face_index(&self, f: usize) -> i32 {
        let edges = [3 * f, 3 * f + 1, 3 * f + 2];
        let sum_rho: f64 = edges.iter().map(|&e| self.rho[e]).sum();
        let sum_jump: i32 = edges.iter().map(|&e| self.jump[e]).sum();
        let holonomy = wrap_angle(sum_rho);
        let winding = ((sum_rho - holonomy) / (2.0 * PI)).round() as i32;
        -sum_jump - 4 * winding
    }

    /// Per-face flags: whether the face carries an orientation singularity.
    pub fn singular_faces(&self, num_faces: usize) -> Vec<bool> {
        (0..num_faces).map(|f| self.face_index(f) != 0).collect()
    }
}

/// All orientation singularities of the field.
pub fn orientation_singularities(
    mesh: &SurfaceMesh,
    transitions: &EdgeTransitions,
) -> Vec<Singularity> {
    (0..mesh.num_faces())
        .filter_map(|f| {
            let index = transitions.face_index(f);
            (index != 0).then_some(Singularity {
                face: f,
                kind: SingularityKind::Orientation(index),
            })
        })
        .collect()
}

/// All position singularities of a lattice, skipping orientation-singular faces.
pub fn position_singularities(
    lattice: &EdgeLattice,
    orientation_singular: &[bool],
) -> Vec<Singularity> {
    (0..orientation_singular.len())
        .filter(|&f| !orientation_singular[f])
        .filter_map(|f| {
            let sum = lattice.face_loop(f);
            (sum != Vector2::zeros()).then_some(Singularity {
                face: f,
                kind: SingularityKind::Position(sum),
            })
        })
        .collect()
}

/// Sum of the orientation indices, in quarter turns.
pub fn total_index(singularities: &[Singularity]) -> i32 {
    singularities
        .iter()
        .map(|s| match s.kind {
            SingularityKind::Orientation(k) => k,
            SingularityKind::Position(_) => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::hierarchy::Hierarchy;
    use crate::algo::orientation::solve_orientation;
    use crate::algo::prepare::prepare;
    use crate::algo::progress::Progress;
    use crate::config::Config;
    use crate::mesh::primitives::{grid, icosphere, torus};

    fn transitions(mesh: &SurfaceMesh, config: &Config) -> (Hierarchy, EdgeTransitions) {
        let h = Hierarchy::build(prepare(mesh, config).unwrap(), config.parallel).unwrap();
        let (field, _) = solve_orientation(&h, config, &Progress::none());
        let w = h.working();
        let t = EdgeTransitions::compute(&w.mesh, &w.normals, field.finest());
        (h, t)
    }

    #[test]
    fn test_transitions_are_antisymmetric() {
        let (h, t) = transitions(&icosphere(1.0, 2).unwrap(), &Config::default());
        let twins = h.working().mesh.twins();
        for e in 0..twins.len() {
            let o = twins[e];
            assert_eq!(t.jump(e), -t.jump(o));
            assert_eq!(t.rho(e), -t.rho(o));
            assert_eq!(t.rotation(e) + t.rotation(o), Rot4::IDENTITY);
        }
    }

    #[test]
    fn test_sphere_index_sum() {
        for seed in 0..3 {
            let config = Config::default().with_seed(seed);
            let (h, t) = transitions(&icosphere(1.0, 3).unwrap(), &config);
            let singularities = orientation_singularities(&h.working().mesh, &t);
            assert_eq!(total_index(&singularities), 8);
            assert!(!singularities.is_empty());
            let mut faces: Vec<usize> = singularities.iter().map(|s| s.face).collect();
            faces.dedup();
            assert_eq!(faces.len(), singularities.len());
        }
    }

    #[test]
    fn test_torus_index_sum_is_zero() {
        let (h, t) = transitions(&torus(1.0, 0.4, 24, 12).unwrap(), &Config::default());
        let singularities = orientation_singularities(&h.working().mesh, &t);
        assert_eq!(total_index(&singularities), 0);
    }

    #[test]
    fn test_flat_pinned_grid_is_regular() {
        let config = Config::default().with_target_faces(64);
        let (h, t) = transitions(&grid(6, 6, 1.0, 1.0).unwrap(), &config);
        let mesh = &h.working().mesh;
        // Flat: no basis winding, so indices come from field jumps only.
        for f in 0..mesh.num_faces() {
            let sum: f64 = (0..3).map(|k| t.rho(3 * f + k)).sum();
            assert!(sum.abs() < 1e-9);
        }
        let singular = t.singular_faces(mesh.num_faces());
        assert_eq!(singular.len(), mesh.num_faces());
        assert!(!singular.iter().any(|&s| s));
    }
}
