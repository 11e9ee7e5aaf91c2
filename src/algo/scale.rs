//! Scale field estimation.
//!
//! The scale field gives the desired quad edge length at every vertex. It is
//! uniform (`sqrt(area / target)`) unless adaptive scaling is requested, in
//! which case the length shrinks where the surface bends:
//!
//! ```text
//! s_v ∝ 1 / (κ_v + κ_ref)
//! ```
//!
//! with `κ_v` the principal curvature magnitude from [`estimate_slope`]. The
//! raw field is clamped relative to the uniform length, smoothed in log space
//! over the hierarchy, and renormalized so the expected quad count
//! `Σ A_v / s_v²` matches the target.

use crate::config::Config;

use super::curvature::{compute_curvature, compute_curvature_sequential};
use super::hierarchy::Hierarchy;
use super::prepare::WorkingMesh;

/// Per-vertex target edge lengths on every hierarchy level.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleField {
    uniform: f64,
    adaptive: bool,
    levels: Vec<Vec<f64>>,
    faces: Vec<f64>,
}

impl ScaleField {
    /// A constant field of the working mesh's uniform scale.
    pub fn uniform(hierarchy: &Hierarchy) -> Self {
        let s = hierarchy.working().scale;
        let levels = hierarchy.levels().iter().map(|l| vec![s; l.len()]).collect();
        Self {
            uniform: s,
            adaptive: false,
            levels,
            faces: vec![s; hierarchy.working().mesh.num_faces()],
        }
    }

    /// The uniform edge length.
    #[inline]
    pub fn uniform_scale(&self) -> f64 {
        self.uniform
    }

    /// Whether the field varies over the surface.
    #[inline]
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Scale at vertex `v` of level `l`.
    #[inline]
    pub fn vertex_scale(&self, l: usize, v: usize) -> f64 {
        self.levels[l][v]
    }

    /// Per-vertex scales of level `l`.
    #[inline]
    pub fn level(&self, l: usize) -> &[f64] {
        &self.levels[l]
    }

    /// Scale of working mesh face `f` (average of its corners).
    #[inline]
    pub fn face_scale(&self, f: usize) -> f64 {
        self.faces[f]
    }

    /// Per-face scales of the working mesh.
    #[inline]
    pub fn face_scales(&self) -> &[f64] {
        &self.faces
    }

    /// Expected number of quads, `Σ A_v / s_v²` over the working mesh.
    pub fn expected_quads(&self, hierarchy: &Hierarchy) -> f64 {
        let level = hierarchy.level(0);
        level
            .areas
            .iter()
            .zip(&self.levels[0])
            .map(|(a, s)| a / (s * s))
            .sum()
    }
}

/// Per-vertex curvature magnitude of the working mesh.
///
/// Uses `|H| + sqrt(max(H² - K, 0))`, the largest absolute principal
/// curvature.
pub fn estimate_slope(working: &WorkingMesh, parallel: bool) -> Vec<f64> {
    let curvature = if parallel {
        compute_curvature(&working.mesh)
    } else {
        compute_curvature_sequential(&working.mesh)
    };
    working
        .mesh
        .vertex_ids()
        .map(|v| {
            let k = curvature.magnitude(v);
            if k.is_finite() {
                k
            } else {
                0.0
            }
        })
        .collect()
}

/// Solve the scale field.
///
/// With `slope == None` (adaptive scaling off) the uniform field is returned.
pub fn solve_scale(hierarchy: &Hierarchy, slope: Option<&[f64]>, config: &Config) -> ScaleField {
    let Some(slope) = slope else {
        return ScaleField::uniform(hierarchy);
    };
    let working = hierarchy.working();
    let uniform = working.scale;
    let level0 = hierarchy.level(0);

    // Reference curvature: the area-weighted mean, so flat and curved parts
    // end up on either side of the uniform length.
    let total_area: f64 = level0.areas.iter().sum();
    let mean_kappa = if total_area > 0.0 {
        slope
            .iter()
            .zip(&level0.areas)
            .map(|(k, a)| k * a)
            .sum::<f64>()
            / total_area
    } else {
        0.0
    };
    let kappa_ref = if mean_kappa > 0.0 { mean_kappa } else { 1.0 / uniform };

    let min_s = uniform * config.min_scale_ratio;
    let max_s = uniform * config.max_scale_ratio;
    let fine_log: Vec<f64> = slope
        .iter()
        .map(|&k| {
            let s = uniform * 2.0 * kappa_ref / (k + kappa_ref);
            s.clamp(min_s, max_s).ln()
        })
        .collect();

    let smoothed = smooth_hierarchically(hierarchy, fine_log, config.scale_smoothing_iterations);
    let mut finest: Vec<f64> = smoothed.into_iter().map(f64::exp).collect();

    // Renormalize to the requested quad count, staying inside the ratio bounds.
    let expected: f64 = level0
        .areas
        .iter()
        .zip(&finest)
        .map(|(a, s)| a / (s * s))
        .sum();
    if expected > 0.0 {
        let factor = (expected / working.target_faces as f64).sqrt();
        for s in &mut finest {
            *s = (*s * factor).clamp(min_s, max_s);
        }
    }

    let levels = restrict_all(hierarchy, finest);
    let faces = face_average(working, &levels[0]);
    let (lo, hi) = levels[0]
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    log::debug!("adaptive scale in [{:.5}, {:.5}], uniform {:.5}", lo, hi, uniform);

    ScaleField {
        uniform,
        adaptive: true,
        levels,
        faces,
    }
}

/// Area-weighted restriction of per-vertex values to every coarser level.
fn restrict_values(hierarchy: &Hierarchy, fine: Vec<f64>) -> Vec<Vec<f64>> {
    let mut levels = vec![fine];
    for l in 1..hierarchy.num_levels() {
        let fine_level = hierarchy.level(l - 1);
        let coarse_level = hierarchy.level(l);
        let below = &levels[l - 1];
        let values = coarse_level
            .prolong
            .iter()
            .map(|pair| {
                let mut sum = 0.0;
                let mut weight = 0.0;
                for &x in pair.iter().filter(|&&x| x < fine_level.len()) {
                    let a = fine_level.areas[x].max(f64::MIN_POSITIVE);
                    sum += below[x] * a;
                    weight += a;
                }
                sum / weight
            })
            .collect();
        levels.push(values);
    }
    levels
}

/// Restrict final scales (in log space) so coarse levels agree with level 0.
fn restrict_all(hierarchy: &Hierarchy, finest: Vec<f64>) -> Vec<Vec<f64>> {
    let logs = finest.iter().map(|s| s.ln()).collect();
    let mut levels = restrict_values(hierarchy, logs);
    for level in levels.iter_mut().skip(1) {
        for v in level.iter_mut() {
            *v = v.exp();
        }
    }
    levels[0] = finest;
    levels
}

/// Smooth log-scales from the coarsest level down to level 0.
fn smooth_hierarchically(hierarchy: &Hierarchy, fine: Vec<f64>, iterations: usize) -> Vec<f64> {
    let restricted = restrict_values(hierarchy, fine);
    let num_levels = hierarchy.num_levels();

    let mut current: Vec<f64> = Vec::new();
    for l in (0..num_levels).rev() {
        let level = hierarchy.level(l);
        let mut values = restricted[l].clone();
        if l + 1 < num_levels {
            // Blend the level's own data with the smoothed coarse result.
            let coarse = hierarchy.level(l + 1);
            for (c, pair) in coarse.prolong.iter().enumerate() {
                for &x in pair.iter().filter(|&&x| x < level.len()) {
                    values[x] = 0.5 * (values[x] + current[c]);
                }
            }
        }
        for _ in 0..iterations {
            values = (0..level.len())
                .map(|i| {
                    let mut sum = 0.0;
                    let mut weight = 0.0;
                    for (j, w) in level.adjacency.neighbors(i) {
                        sum += w * values[j];
                        weight += w;
                    }
                    if weight > 0.0 {
                        0.5 * values[i] + 0.5 * sum / weight
                    } else {
                        values[i]
                    }
                })
                .collect();
        }
        current = values;
    }
    current
}

fn face_average(working: &WorkingMesh, vertex_scales: &[f64]) -> Vec<f64> {
    working
        .mesh
        .triangles()
        .iter()
        .map(|t| (vertex_scales[t[0]] + vertex_scales[t[1]] + vertex_scales[t[2]]) / 3.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::prepare::prepare;
    use crate::mesh::build_surface;
    use crate::mesh::primitives::icosphere;
    use nalgebra::Point3;

    fn hierarchy(mesh: &crate::mesh::SurfaceMesh, config: &Config) -> Hierarchy {
        Hierarchy::build(prepare(mesh, config).unwrap(), config.parallel).unwrap()
    }

    #[test]
    fn test_uniform_field() {
        let config = Config::default().with_target_faces(200);
        let h = hierarchy(&icosphere(1.0, 2).unwrap(), &config);
        let field = solve_scale(&h, None, &config);
        assert!(!field.is_adaptive());
        let s = h.working().scale;
        assert!(field.level(0).iter().all(|&x| x == s));
        assert!(field.face_scales().iter().all(|&x| x == s));
        let expected = field.expected_quads(&h);
        assert!((expected - 200.0).abs() < 1e-6 * 200.0);
    }

    /// Prolate ellipsoid: the poles bend three times harder than the equator.
    fn ellipsoid() -> crate::mesh::SurfaceMesh {
        let sphere = icosphere(1.0, 3).unwrap();
        let stretched: Vec<Point3<f64>> = sphere
            .positions()
            .iter()
            .map(|p| Point3::new(p.x, p.y, 3.0 * p.z))
            .collect();
        build_surface(&stretched, sphere.triangles()).unwrap()
    }

    #[test]
    fn test_adaptive_field_follows_curvature() {
        let mesh = ellipsoid();
        let config = Config::default().with_target_faces(400).with_adaptive_scale(true);
        let h = hierarchy(&mesh, &config);
        let slope = estimate_slope(h.working(), true);
        let field = solve_scale(&h, Some(&slope), &config);
        assert!(field.is_adaptive());

        // Renormalized to the target quad count.
        let expected = field.expected_quads(&h);
        assert!((expected - 400.0).abs() < 1e-6 * 400.0);

        let positions = &h.level(0).positions;
        let mut poles = (0.0, 0);
        let mut equator = (0.0, 0);
        for (p, &s) in positions.iter().zip(field.level(0)) {
            if p.z.abs() > 0.4 {
                poles = (poles.0 + s, poles.1 + 1);
            } else if p.z.abs() < 0.1 {
                equator = (equator.0 + s, equator.1 + 1);
            }
        }
        assert!(poles.1 > 0 && equator.1 > 0);
        assert!(poles.0 / (poles.1 as f64) < equator.0 / (equator.1 as f64));
    }

    #[test]
    fn test_renormalized_scales_stay_in_bounds() {
        let config = Config::default()
            .with_target_faces(400)
            .with_adaptive_scale(true)
            .with_scale_ratio(0.9, 1.1);
        let h = hierarchy(&ellipsoid(), &config);
        let slope = estimate_slope(h.working(), true);
        let field = solve_scale(&h, Some(&slope), &config);
        let uniform = field.uniform_scale();
        let (lo, hi) = (uniform * 0.9, uniform * 1.1);
        for l in 0..h.num_levels() {
            assert!(field
                .level(l)
                .iter()
                .all(|&s| s >= lo * (1.0 - 1e-12) && s <= hi * (1.0 + 1e-12)));
        }
        assert!(field.face_scales().iter().all(|&s| s >= lo * (1.0 - 1e-12)));
    }

    #[test]
    fn test_levels_are_consistent() {
        let config = Config::default().with_adaptive_scale(true);
        let h = hierarchy(&icosphere(1.0, 2).unwrap(), &config);
        let slope = estimate_slope(h.working(), false);
        let field = solve_scale(&h, Some(&slope), &config);
        for l in 0..h.num_levels() {
            assert_eq!(field.level(l).len(), h.level(l).len());
            assert!(field.level(l).iter().all(|&s| s > 0.0 && s.is_finite()));
        }
    }
}
