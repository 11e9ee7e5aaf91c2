//! The remeshing pipeline.
//!
//! [`Remesher`] owns every intermediate result and exposes one method per
//! stage, in the order they must run:
//!
//! 1. [`load`](Remesher::load) or [`set_mesh`](Remesher::set_mesh)
//! 2. [`initialize`](Remesher::initialize): working mesh and hierarchy
//! 3. [`run_orientation_field`](Remesher::run_orientation_field)
//! 4. [`run_singularities_orientation`](Remesher::run_singularities_orientation)
//! 5. [`estimate_slope`](Remesher::estimate_slope), only for adaptive scale
//! 6. [`run_scale_field`](Remesher::run_scale_field)
//! 7. [`run_position_field`](Remesher::run_position_field)
//! 8. [`run_singularities_position`](Remesher::run_singularities_position)
//! 9. [`run_index_map`](Remesher::run_index_map)
//! 10. [`write`](Remesher::write)
//!
//! Calling a stage before its prerequisite fails with
//! [`QuadError::StageOrder`]; rerunning a stage discards everything
//! downstream of it. [`Remesher::run`] drives stages 3 to 9.
//!
//! # Example
//!
//! ```no_run
//! use quadmesh::{Config, Remesher};
//!
//! let mut remesher = Remesher::new(Config::default().with_target_faces(2000));
//! remesher.load("bunny.obj").unwrap();
//! remesher.initialize().unwrap();
//! let report = remesher.run().unwrap();
//! println!("{} quads", report.output_faces);
//! remesher.write("bunny_quads.obj").unwrap();
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

use nalgebra::Vector2;

use crate::algo::hierarchy::{Hierarchy, RelaxStats};
use crate::algo::index_map::{
    extract, flow_solver, repair_strategy, EdgeLattice, QuadIndexMap, RepairContext, RepairStats,
};
use crate::algo::orientation::{solve_orientation, OrientationField};
use crate::algo::position::{build_lattice, solve_position, LatticeStats, PositionField};
use crate::algo::prepare::prepare;
use crate::algo::scale::{estimate_slope, solve_scale, ScaleField};
use crate::algo::singularity::{
    orientation_singularities, position_singularities, total_index, EdgeTransitions, Singularity,
    SingularityKind,
};
use crate::algo::Progress;
use crate::config::Config;
use crate::error::{QuadError, Result, Stage};
use crate::io;
use crate::mesh::{QuadMesh, SurfaceMesh, INVALID};

/// Number of progress steps reported by [`Remesher::run`].
const RUN_STEPS: usize = 7;

/// Quad rings searched for an irregular vertex around a singularity.
const LINK_RINGS: usize = 2;

/// Where the singularities of both fields ended up in the quad mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingularityLinks {
    /// Singularities with an irregular quad vertex within two rings, or
    /// position singularities whose loop the repair closed.
    pub linked: usize,
    /// Singularities with neither.
    pub unlinked: usize,
}

/// Summary of a pipeline run.
///
/// Convergence shortfalls and leftover singularities are reported here
/// rather than as errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemeshReport {
    /// Vertices of the input surface.
    pub input_vertices: usize,
    /// Triangles of the input surface.
    pub input_faces: usize,
    /// Triangles of the refined working mesh.
    pub working_faces: usize,
    /// Number of hierarchy levels.
    pub hierarchy_levels: usize,
    /// Whether the orientation field met the convergence threshold.
    pub orientation_converged: bool,
    /// Faces carrying an orientation singularity.
    pub orientation_singularities: usize,
    /// Sum of the orientation indices, in quarter turns.
    pub orientation_index: i32,
    /// Whether the position field met the convergence threshold.
    pub position_converged: bool,
    /// Faces carrying a position singularity.
    pub position_singularities: usize,
    /// Rounding of the position field.
    pub lattice: LatticeStats,
    /// Topology repair of the index map.
    pub repair: RepairStats,
    /// Vertices of the quad mesh.
    pub output_vertices: usize,
    /// Quads of the quad mesh.
    pub output_faces: usize,
    /// Interior quad vertices whose valence is not four.
    pub irregular_vertices: usize,
    /// Quads not built from two half cells of one lattice cell.
    pub rerouted_quads: usize,
    /// Boundary triangles dropped during pairing.
    pub dropped_triangles: usize,
    /// Orientation and position singularities traced to the quad mesh.
    pub singularity_links: SingularityLinks,
}

/// Stage-by-stage driver of the remeshing pipeline.
#[derive(Debug)]
pub struct Remesher {
    config: Config,
    progress: Progress,
    input: Option<SurfaceMesh>,
    hierarchy: Option<Hierarchy>,
    orientation: Option<(OrientationField, RelaxStats)>,
    transitions: Option<EdgeTransitions>,
    orientation_singularities: Vec<Singularity>,
    slope: Option<Vec<f64>>,
    scale: Option<ScaleField>,
    position: Option<(PositionField, RelaxStats)>,
    lattice: Option<(EdgeLattice, LatticeStats)>,
    position_singularities: Vec<Singularity>,
    repaired: Option<(EdgeLattice, RepairStats)>,
    result: Option<QuadIndexMap>,
    links: Option<SingularityLinks>,
}

impl Remesher {
    /// Create a pipeline with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            progress: Progress::logging(),
            input: None,
            hierarchy: None,
            orientation: None,
            transitions: None,
            orientation_singularities: Vec::new(),
            slope: None,
            scale: None,
            position: None,
            lattice: None,
            position_singularities: Vec::new(),
            repaired: None,
            result: None,
            links: None,
        }
    }

    /// Replace the progress reporter.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// The configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the input surface from a file.
    ///
    /// # Errors
    /// Any load error, tagged with [`Stage::Load`].
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mesh = timed(Stage::Load, || io::load(path))?;
        log::info!(
            "loaded {}: {} vertices, {} faces",
            path.display(),
            mesh.num_vertices(),
            mesh.num_faces()
        );
        self.set_mesh(mesh);
        Ok(())
    }

    /// Use `mesh` as the input surface, discarding any earlier results.
    pub fn set_mesh(&mut self, mesh: SurfaceMesh) {
        self.input = Some(mesh);
        self.reset_from(Stage::Initialize);
    }

    /// Build the working mesh and the hierarchy.
    ///
    /// The target face count comes from the configuration; `None` infers it
    /// from the input vertex count.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] without an input mesh; otherwise any
    /// structural error of preparation or hierarchy construction, tagged
    /// with [`Stage::Initialize`].
    pub fn initialize(&mut self) -> Result<()> {
        let input = self.input.as_ref().ok_or_else(|| order(Stage::Initialize, Stage::Load))?;
        let config = &self.config;
        let hierarchy = timed(Stage::Initialize, || {
            config.validate()?;
            let working = prepare(input, config)?;
            Hierarchy::build(working, config.parallel)
        })?;
        log::info!(
            "hierarchy: {} levels over {} vertices, target {} quads",
            hierarchy.num_levels(),
            hierarchy.working().mesh.num_vertices(),
            hierarchy.working().target_faces
        );
        self.reset_from(Stage::Orientation);
        self.hierarchy = Some(hierarchy);
        Ok(())
    }

    /// Solve the orientation field.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] before [`initialize`](Self::initialize).
    pub fn run_orientation_field(&mut self) -> Result<()> {
        let hierarchy = self
            .hierarchy
            .as_ref()
            .ok_or_else(|| order(Stage::Orientation, Stage::Initialize))?;
        let (config, progress) = (&self.config, &self.progress);
        let solved = timed(Stage::Orientation, || {
            Ok(solve_orientation(hierarchy, config, progress))
        })?;
        self.reset_from(Stage::OrientationSingularities);
        self.orientation = Some(solved);
        Ok(())
    }

    /// Compute edge transitions and the orientation singularities.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] before the orientation field is solved.
    pub fn run_singularities_orientation(&mut self) -> Result<()> {
        let stage = Stage::OrientationSingularities;
        let hierarchy = self.hierarchy.as_ref().ok_or_else(|| order(stage, Stage::Initialize))?;
        let (orientation, _) = self
            .orientation
            .as_ref()
            .ok_or_else(|| order(stage, Stage::Orientation))?;
        let working = hierarchy.working();
        let (transitions, singularities) = timed(stage, || {
            let transitions =
                EdgeTransitions::compute(&working.mesh, &working.normals, orientation.finest());
            let singularities = orientation_singularities(&working.mesh, &transitions);
            Ok((transitions, singularities))
        })?;
        log::info!(
            "{} orientation singularities, total index {}",
            singularities.len(),
            total_index(&singularities)
        );
        self.reset_from(Stage::Slope);
        self.transitions = Some(transitions);
        self.orientation_singularities = singularities;
        Ok(())
    }

    /// Estimate curvature for the adaptive scale field.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] before [`initialize`](Self::initialize).
    pub fn estimate_slope(&mut self) -> Result<()> {
        let hierarchy = self
            .hierarchy
            .as_ref()
            .ok_or_else(|| order(Stage::Slope, Stage::Initialize))?;
        let parallel = self.config.parallel;
        let slope = timed(Stage::Slope, || Ok(estimate_slope(hierarchy.working(), parallel)))?;
        self.reset_from(Stage::Scale);
        self.slope = Some(slope);
        Ok(())
    }

    /// Solve the scale field.
    ///
    /// Uniform unless adaptive scale is configured, in which case
    /// [`estimate_slope`](Self::estimate_slope) must have run.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] when a prerequisite is missing.
    pub fn run_scale_field(&mut self) -> Result<()> {
        let hierarchy = self
            .hierarchy
            .as_ref()
            .ok_or_else(|| order(Stage::Scale, Stage::Initialize))?;
        let slope = if self.config.adaptive_scale {
            Some(self.slope.as_deref().ok_or_else(|| order(Stage::Scale, Stage::Slope))?)
        } else {
            None
        };
        let config = &self.config;
        let scale = timed(Stage::Scale, || Ok(solve_scale(hierarchy, slope, config)))?;
        log::info!(
            "scale field: uniform {:.5}, adaptive {}, about {:.0} quads",
            scale.uniform_scale(),
            scale.is_adaptive(),
            scale.expected_quads(hierarchy)
        );
        self.reset_from(Stage::Position);
        self.scale = Some(scale);
        Ok(())
    }

    /// Solve the position field.
    ///
    /// With `adaptive` the per-vertex lengths of the scale field set the
    /// lattice spacing. Without it and without a solved scale field the
    /// uniform length is used.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] when a prerequisite is missing.
    pub fn run_position_field(&mut self, adaptive: bool) -> Result<()> {
        let stage = Stage::Position;
        let hierarchy = self.hierarchy.as_ref().ok_or_else(|| order(stage, Stage::Initialize))?;
        let (orientation, _) = self
            .orientation
            .as_ref()
            .ok_or_else(|| order(stage, Stage::Orientation))?;
        let uniform;
        let scale = match &self.scale {
            Some(scale) => scale,
            None if !adaptive => {
                uniform = ScaleField::uniform(hierarchy);
                &uniform
            }
            None => return Err(order(stage, Stage::Scale)),
        };
        let (config, progress) = (&self.config, &self.progress);
        let solved = timed(stage, || {
            Ok(solve_position(hierarchy, orientation, scale, adaptive, config, progress))
        })?;
        self.reset_from(Stage::PositionSingularities);
        self.position = Some(solved);
        Ok(())
    }

    /// Round the position field into an edge lattice and collect the
    /// position singularities.
    ///
    /// With minimum-cost flow configured the rounding residuals are
    /// redistributed first.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] when a prerequisite is missing.
    pub fn run_singularities_position(&mut self) -> Result<()> {
        let stage = Stage::PositionSingularities;
        let hierarchy = self.hierarchy.as_ref().ok_or_else(|| order(stage, Stage::Initialize))?;
        let (orientation, _) = self
            .orientation
            .as_ref()
            .ok_or_else(|| order(stage, Stage::Orientation))?;
        let transitions = self
            .transitions
            .as_ref()
            .ok_or_else(|| order(stage, Stage::OrientationSingularities))?;
        let (position, _) = self.position.as_ref().ok_or_else(|| order(stage, Stage::Position))?;
        let config = &self.config;
        let (lattice, stats, singularities) = timed(stage, || {
            let singular = transitions.singular_faces(hierarchy.working().mesh.num_faces());
            let (lattice, stats) =
                build_lattice(hierarchy, orientation, position, transitions, &singular, config);
            let singularities = position_singularities(&lattice, &singular);
            Ok((lattice, stats, singularities))
        })?;
        log::info!(
            "{} position singularities ({} before redistribution)",
            singularities.len(),
            stats.raw_singularities
        );
        self.reset_from(Stage::IndexMap);
        self.lattice = Some((lattice, stats));
        self.position_singularities = singularities;
        Ok(())
    }

    /// Repair the edge lattice and extract the quad mesh.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] when a prerequisite is missing, or a
    /// [`QuadError::TopologyExtraction`] tagged with [`Stage::IndexMap`] when
    /// no manifold quad mesh can be produced.
    pub fn run_index_map(&mut self) -> Result<()> {
        let stage = Stage::IndexMap;
        let hierarchy = self.hierarchy.as_ref().ok_or_else(|| order(stage, Stage::Initialize))?;
        let transitions = self
            .transitions
            .as_ref()
            .ok_or_else(|| order(stage, Stage::OrientationSingularities))?;
        let (position, _) = self.position.as_ref().ok_or_else(|| order(stage, Stage::Position))?;
        let (lattice, _) = self
            .lattice
            .as_ref()
            .ok_or_else(|| order(stage, Stage::PositionSingularities))?;
        let config = &self.config;
        let working = hierarchy.working();

        let (repaired, stats, result) = timed(stage, || {
            let singular = transitions.singular_faces(working.mesh.num_faces());
            let solver = flow_solver(config);
            let strategy = repair_strategy(config);
            let ctx = RepairContext {
                mesh: &working.mesh,
                orientation_singular: &singular,
                sharp: &working.sharp,
                preserve_sharp: config.preserve_sharp,
                solver: solver.as_ref(),
            };
            let mut repaired = lattice.clone();
            let stats = strategy.repair(&ctx, &mut repaired);
            log::info!(
                "{} repair ({} solver): {} -> {} invalid faces in {} rounds",
                strategy.name(),
                solver.name(),
                stats.initial_invalid,
                stats.final_invalid,
                stats.rounds
            );
            if stats.final_invalid > 0 {
                log::debug!("{} invalid faces left to pairing", stats.final_invalid);
            }
            let result = extract(working, &repaired, position.finest(), &singular)?;
            Ok((repaired, stats, result))
        })?;
        log::info!(
            "index map: {} vertices, {} quads ({} rerouted)",
            result.mesh.num_vertices(),
            result.mesh.num_faces(),
            result.rerouted
        );

        let singularities = self
            .orientation_singularities
            .iter()
            .chain(&self.position_singularities);
        let links = link_singularities(
            working.mesh.triangles(),
            &result,
            |f| repaired.face_loop(f) == Vector2::zeros(),
            singularities,
        );
        if links.unlinked > 0 {
            log::warn!(
                "{} of {} singularities left no irregular vertex nearby",
                links.unlinked,
                links.linked + links.unlinked
            );
        }
        self.repaired = Some((repaired, stats));
        self.result = Some(result);
        self.links = Some(links);
        Ok(())
    }

    /// Write the quad mesh, choosing the format from the extension.
    ///
    /// # Errors
    /// [`QuadError::StageOrder`] before [`run_index_map`](Self::run_index_map),
    /// otherwise any save error tagged with [`Stage::Write`].
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let result = self.result.as_ref().ok_or_else(|| order(Stage::Write, Stage::IndexMap))?;
        let path = path.as_ref();
        timed(Stage::Write, || io::save_quads(&result.mesh, path))?;
        log::info!("wrote {}", path.display());
        Ok(())
    }

    /// Run every stage from the orientation field to the index map.
    ///
    /// Initializes first when needed. After the scale field is solved the
    /// position field always uses the per-vertex scales, whatever the
    /// adaptive setting; without adaptive scale those are uniform anyway.
    ///
    /// # Errors
    /// The first structural error of any stage.
    pub fn run(&mut self) -> Result<RemeshReport> {
        if self.hierarchy.is_none() {
            self.initialize()?;
        }
        let mut step = 0;
        let mut advance = |progress: &Progress, message: &str| {
            step += 1;
            progress.report(step, RUN_STEPS, message);
        };

        self.run_orientation_field()?;
        advance(&self.progress, "Orientation field");
        self.run_singularities_orientation()?;
        advance(&self.progress, "Orientation singularities");
        if self.config.adaptive_scale {
            self.estimate_slope()?;
        }
        advance(&self.progress, "Slope");
        self.run_scale_field()?;
        advance(&self.progress, "Scale field");
        self.run_position_field(true)?;
        advance(&self.progress, "Position field");
        self.run_singularities_position()?;
        advance(&self.progress, "Position singularities");
        self.run_index_map()?;
        advance(&self.progress, "Index map");

        self.report().ok_or_else(|| order(Stage::Write, Stage::IndexMap))
    }

    /// Summary of the finished run, once the index map exists.
    pub fn report(&self) -> Option<RemeshReport> {
        let input = self.input.as_ref()?;
        let hierarchy = self.hierarchy.as_ref()?;
        let (_, orientation_stats) = self.orientation.as_ref()?;
        let (_, position_stats) = self.position.as_ref()?;
        let (_, lattice_stats) = self.lattice.as_ref()?;
        let (_, repair_stats) = self.repaired.as_ref()?;
        let result = self.result.as_ref()?;
        let links = self.links?;
        Some(RemeshReport {
            input_vertices: input.num_vertices(),
            input_faces: input.num_faces(),
            working_faces: hierarchy.working().mesh.num_faces(),
            hierarchy_levels: hierarchy.num_levels(),
            orientation_converged: orientation_stats.converged,
            orientation_singularities: self.orientation_singularities.len(),
            orientation_index: total_index(&self.orientation_singularities),
            position_converged: position_stats.converged,
            position_singularities: self.position_singularities.len(),
            lattice: *lattice_stats,
            repair: *repair_stats,
            output_vertices: result.mesh.num_vertices(),
            output_faces: result.mesh.num_faces(),
            irregular_vertices: irregular_vertices(&result.mesh),
            rerouted_quads: result.rerouted,
            dropped_triangles: result.dropped,
            singularity_links: links,
        })
    }

    /// The input surface.
    pub fn input(&self) -> Option<&SurfaceMesh> {
        self.input.as_ref()
    }

    /// The hierarchy, after [`initialize`](Self::initialize).
    pub fn hierarchy(&self) -> Option<&Hierarchy> {
        self.hierarchy.as_ref()
    }

    /// The orientation field.
    pub fn orientation(&self) -> Option<&OrientationField> {
        self.orientation.as_ref().map(|(field, _)| field)
    }

    /// Edge transitions of the orientation field.
    pub fn transitions(&self) -> Option<&EdgeTransitions> {
        self.transitions.as_ref()
    }

    /// Orientation singularities, empty until computed.
    pub fn orientation_singularities(&self) -> &[Singularity] {
        &self.orientation_singularities
    }

    /// The scale field.
    pub fn scale(&self) -> Option<&ScaleField> {
        self.scale.as_ref()
    }

    /// The position field.
    pub fn position(&self) -> Option<&PositionField> {
        self.position.as_ref().map(|(field, _)| field)
    }

    /// The rounded edge lattice, before repair.
    pub fn lattice(&self) -> Option<&EdgeLattice> {
        self.lattice.as_ref().map(|(lattice, _)| lattice)
    }

    /// The edge lattice after topology repair.
    pub fn repaired_lattice(&self) -> Option<&EdgeLattice> {
        self.repaired.as_ref().map(|(lattice, _)| lattice)
    }

    /// Position singularities, empty until computed.
    pub fn position_singularities(&self) -> &[Singularity] {
        &self.position_singularities
    }

    /// The extracted index map.
    pub fn index_map(&self) -> Option<&QuadIndexMap> {
        self.result.as_ref()
    }

    /// The extracted quad mesh.
    pub fn quad_mesh(&self) -> Option<&QuadMesh> {
        self.result.as_ref().map(|r| &r.mesh)
    }

    /// Consume the pipeline and return the index map.
    pub fn into_index_map(self) -> Option<QuadIndexMap> {
        self.result
    }

    /// Drop the results of `stage` and every stage after it.
    fn reset_from(&mut self, stage: Stage) {
        let rank = stage_rank(stage);
        if rank <= stage_rank(Stage::Initialize) {
            self.hierarchy = None;
        }
        if rank <= stage_rank(Stage::Orientation) {
            self.orientation = None;
        }
        if rank <= stage_rank(Stage::OrientationSingularities) {
            self.transitions = None;
            self.orientation_singularities.clear();
        }
        if rank <= stage_rank(Stage::Slope) {
            self.slope = None;
        }
        if rank <= stage_rank(Stage::Scale) {
            self.scale = None;
        }
        if rank <= stage_rank(Stage::Position) {
            self.position = None;
        }
        if rank <= stage_rank(Stage::PositionSingularities) {
            self.lattice = None;
            self.position_singularities.clear();
        }
        if rank <= stage_rank(Stage::IndexMap) {
            self.repaired = None;
            self.result = None;
            self.links = None;
        }
    }
}

/// Remesh a triangle surface into quads in one call.
///
/// # Example
///
/// ```
/// use quadmesh::mesh::primitives::icosphere;
/// use quadmesh::Config;
///
/// let sphere = icosphere(1.0, 3).unwrap();
/// let quads = quadmesh::remesh(&sphere, &Config::default().with_target_faces(300)).unwrap();
/// assert!(quads.mesh.num_faces() > 0);
/// ```
///
/// # Errors
/// The first structural error of any stage.
pub fn remesh(mesh: &SurfaceMesh, config: &Config) -> Result<QuadIndexMap> {
    let mut remesher = Remesher::new(config.clone());
    remesher.set_mesh(mesh.clone());
    remesher.run()?;
    remesher
        .into_index_map()
        .ok_or_else(|| order(Stage::Write, Stage::IndexMap))
}

fn stage_rank(stage: Stage) -> usize {
    match stage {
        Stage::Load => 0,
        Stage::Initialize => 1,
        Stage::Orientation => 2,
        Stage::OrientationSingularities => 3,
        Stage::Slope => 4,
        Stage::Scale => 5,
        Stage::Position => 6,
        Stage::PositionSingularities => 7,
        Stage::IndexMap => 8,
        Stage::Write => 9,
    }
}

fn order(stage: Stage, requires: Stage) -> QuadError {
    QuadError::StageOrder { stage, requires }
}

/// Run one stage, logging its duration and tagging its error.
fn timed<T>(stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f().map_err(|e| e.at(stage));
    match &result {
        Ok(_) => log::info!("{} finished in {:.2?}", stage, start.elapsed()),
        Err(e) => log::error!("{}", e),
    }
    result
}

/// Interior vertices whose valence is not four.
fn irregular_vertices(mesh: &QuadMesh) -> usize {
    irregular_flags(mesh).iter().filter(|&&irregular| irregular).count()
}

fn irregular_flags(mesh: &QuadMesh) -> Vec<bool> {
    let mut valence = vec![0usize; mesh.num_vertices()];
    let mut boundary = vec![false; mesh.num_vertices()];
    for q in mesh.quads() {
        for &v in q {
            valence[v] += 1;
        }
    }
    for ((a, b), faces) in mesh.edge_faces() {
        if faces.len() == 1 {
            boundary[a] = true;
            boundary[b] = true;
        }
    }
    valence
        .iter()
        .zip(&boundary)
        .map(|(&k, &on_boundary)| k > 0 && k != 4 && !on_boundary)
        .collect()
}

/// Trace singularities of the working mesh to the quad mesh.
///
/// A singularity is linked when an irregular quad vertex lies within
/// [`LINK_RINGS`] rings of the output vertices of its face, or, for a
/// position singularity, when `closed(face)` says the repair closed its loop.
fn link_singularities<'a>(
    triangles: &[[usize; 3]],
    index_map: &QuadIndexMap,
    closed: impl Fn(usize) -> bool,
    singularities: impl IntoIterator<Item = &'a Singularity>,
) -> SingularityLinks {
    let quads = &index_map.mesh;
    let irregular = irregular_flags(quads);
    let mut neighbors = vec![Vec::new(); quads.num_vertices()];
    for q in quads.quads() {
        for &v in q {
            neighbors[v].extend(q.iter().copied().filter(|&w| w != v));
        }
    }

    let mut depth = vec![usize::MAX; quads.num_vertices()];
    let mut queue = VecDeque::new();
    let mut links = SingularityLinks::default();
    for s in singularities {
        let repaired = matches!(s.kind, SingularityKind::Position(_)) && closed(s.face);
        let mut visited = Vec::new();
        for &v in &triangles[s.face] {
            let o = index_map.vertex_map[v];
            if o != INVALID && depth[o] == usize::MAX {
                depth[o] = 0;
                visited.push(o);
                queue.push_back(o);
            }
        }
        let mut found = false;
        while let Some(v) = queue.pop_front() {
            if irregular[v] {
                found = true;
                break;
            }
            if depth[v] == LINK_RINGS {
                continue;
            }
            for &w in &neighbors[v] {
                if depth[w] == usize::MAX {
                    depth[w] = depth[v] + 1;
                    visited.push(w);
                    queue.push_back(w);
                }
            }
        }
        queue.clear();
        for v in visited {
            depth[v] = usize::MAX;
        }
        if repaired || found {
            links.linked += 1;
        } else {
            links.unlinked += 1;
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::primitives::{cube, grid, uv_sphere};

    fn sphere_config() -> Config {
        Config::default().with_target_faces(500).with_seed(3)
    }

    #[test]
    fn test_closed_mesh_to_manifold_quads() {
        let sphere = uv_sphere(1.0, 25, 21).unwrap();
        assert_eq!(sphere.num_faces(), 1000);

        let mut remesher = Remesher::new(sphere_config());
        remesher.set_mesh(sphere);
        let report = remesher.run().unwrap();
        let quads = remesher.quad_mesh().unwrap();

        assert!(quads.is_manifold());
        assert!(!quads.has_degenerate_faces());
        assert!(quads.validate().is_ok());
        assert!(report.output_faces > 50, "only {} quads", report.output_faces);
        // Closed in, closed out.
        assert!(quads.edge_faces().values().all(|faces| faces.len() == 2));
        assert_eq!(quads.euler_characteristic(), 2);
        assert_eq!(report.dropped_triangles, 0);
        // The repair makes progress on the rounded lattice.
        assert!(
            report.repair.final_invalid < report.repair.initial_invalid,
            "repair left {} of {} invalid faces",
            report.repair.final_invalid,
            report.repair.initial_invalid
        );
        // Every singularity is accounted for, and some mark an irregular vertex.
        let links = report.singularity_links;
        assert_eq!(
            links.linked + links.unlinked,
            report.orientation_singularities + report.position_singularities
        );
        assert!(links.linked > 0);
        assert!(report.irregular_vertices > 0);
        // A closed genus-0 surface carries index 4 * chi in quarter turns.
        assert_eq!(report.orientation_index, 8);
        assert!(
            report.orientation_singularities <= 40,
            "{} orientation singularities",
            report.orientation_singularities
        );
        for v in quads.vertices() {
            assert!((v.coords.norm() - 1.0).abs() < 0.1);
        }
    }

    #[test]
    fn test_singularities_link_to_irregular_vertices() {
        // Three quads around an interior vertex of valence three.
        let vertices = (0..7).map(|i| nalgebra::Point3::new(i as f64, 0.0, 0.0)).collect();
        let quads = QuadMesh::new(vertices, vec![[0, 6, 1, 4], [0, 4, 2, 5], [0, 5, 3, 6]]);
        let working = grid(2, 2, 1.0, 1.0).unwrap();
        let mut vertex_map = vec![INVALID; working.num_vertices()];
        vertex_map[0] = 1;
        vertex_map[1] = 4;
        vertex_map[4] = 0;
        let index_map = QuadIndexMap {
            vertex_map,
            mesh: quads,
            rerouted: 0,
            dropped: 0,
        };
        assert_eq!(irregular_vertices(&index_map.mesh), 1);

        let at = |face, kind| Singularity { face, kind };
        let singularities = [
            at(0, SingularityKind::Orientation(1)),
            at(5, SingularityKind::Orientation(-1)),
            at(5, SingularityKind::Position(Vector2::new(1, 0))),
        ];
        // Face 0 touches the valence-three vertex; face 5 maps to no quad
        // vertex, but its loop counts as repaired.
        let links = link_singularities(working.triangles(), &index_map, |f| f == 5, &singularities);
        assert_eq!(links, SingularityLinks { linked: 2, unlinked: 1 });

        let links = link_singularities(working.triangles(), &index_map, |_| false, &singularities);
        assert_eq!(links, SingularityLinks { linked: 1, unlinked: 2 });
    }

    #[test]
    fn test_sharp_feature_vertices_stay_on_cube_edges() {
        let config = Config::default().with_target_faces(300).with_preserve_sharp(true);
        let quads = remesh(&cube(2.0, 4).unwrap(), &config).unwrap();
        let features: Vec<_> = quads
            .mesh
            .vertices()
            .iter()
            .zip(quads.mesh.feature_vertices())
            .filter(|&(_, &is_feature)| is_feature)
            .map(|(p, _)| *p)
            .collect();
        assert!(!features.is_empty());
        for p in features {
            let on_faces = [p.x, p.y, p.z].iter().filter(|c| (c.abs() - 1.0).abs() < 1e-6).count();
            assert!(on_faces >= 2, "feature vertex {:?} left the cube edges", p);
        }
    }

    #[test]
    fn test_minimum_cost_flow_never_adds_singularities() {
        let sphere = uv_sphere(1.0, 25, 21).unwrap();
        let mut plain = Remesher::new(sphere_config());
        plain.set_mesh(sphere.clone());
        let plain = plain.run().unwrap();

        let mut flowed = Remesher::new(sphere_config().with_minimum_cost_flow(true));
        flowed.set_mesh(sphere);
        let flowed = flowed.run().unwrap();

        assert_eq!(plain.lattice.raw_singularities, flowed.lattice.raw_singularities);
        assert!(flowed.position_singularities <= plain.position_singularities);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let mut remesher = Remesher::new(Config::default().with_target_faces(200));
        remesher.set_mesh(grid(12, 12, 1.0, 1.0).unwrap());
        remesher.run().unwrap();

        let working = remesher.hierarchy().unwrap().working();
        let singular = remesher.transitions().unwrap().singular_faces(working.mesh.num_faces());
        let again = extract(
            working,
            remesher.repaired_lattice().unwrap(),
            remesher.position().unwrap().finest(),
            &singular,
        )
        .unwrap();
        assert_eq!(&again, remesher.index_map().unwrap());
    }

    #[test]
    fn test_runs_are_deterministic() {
        let config = Config::default().with_target_faces(200).with_seed(11);
        let sphere = uv_sphere(1.0, 16, 12).unwrap();
        let a = remesh(&sphere, &config).unwrap();
        let b = remesh(&sphere, &config).unwrap();
        assert_eq!(a.mesh.quads(), b.mesh.quads());
    }

    #[test]
    fn test_stage_order_is_enforced() {
        let mut remesher = Remesher::new(Config::default());
        assert!(matches!(
            remesher.initialize(),
            Err(QuadError::StageOrder {
                stage: Stage::Initialize,
                requires: Stage::Load
            })
        ));

        remesher.set_mesh(grid(4, 4, 1.0, 1.0).unwrap());
        let err = remesher.run_orientation_field().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Orientation));

        remesher.initialize().unwrap();
        remesher.run_orientation_field().unwrap();
        assert!(matches!(
            remesher.run_singularities_position(),
            Err(QuadError::StageOrder {
                requires: Stage::OrientationSingularities,
                ..
            })
        ));
        assert!(matches!(
            remesher.write("never_written.obj"),
            Err(QuadError::StageOrder { stage: Stage::Write, .. })
        ));
    }

    #[test]
    fn test_adaptive_scale_requires_slope() {
        let mut remesher = Remesher::new(Config::default().with_adaptive_scale(true));
        remesher.set_mesh(grid(4, 4, 1.0, 1.0).unwrap());
        remesher.initialize().unwrap();
        assert!(matches!(
            remesher.run_scale_field(),
            Err(QuadError::StageOrder {
                stage: Stage::Scale,
                requires: Stage::Slope
            })
        ));
        remesher.estimate_slope().unwrap();
        remesher.run_scale_field().unwrap();
        assert!(remesher.scale().unwrap().is_adaptive());
    }

    #[test]
    fn test_rerunning_a_stage_drops_later_results() {
        let mut remesher = Remesher::new(Config::default().with_target_faces(100));
        remesher.set_mesh(grid(6, 6, 1.0, 1.0).unwrap());
        remesher.run().unwrap();
        assert!(remesher.report().is_some());

        remesher.run_orientation_field().unwrap();
        assert!(remesher.transitions().is_none());
        assert!(remesher.index_map().is_none());
        assert!(remesher.report().is_none());
        assert!(remesher.orientation().is_some());
    }

    #[test]
    fn test_invalid_config_fails_initialize() {
        let mut config = Config::default();
        config.sharp_angle_degrees = 0.0;
        let mut remesher = Remesher::new(config);
        remesher.set_mesh(grid(2, 2, 1.0, 1.0).unwrap());
        let err = remesher.initialize().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Initialize));
        assert!(err.to_string().contains("sharp_angle_degrees"));
    }

    #[test]
    fn test_run_reports_progress() {
        let (progress, count) = Progress::counting();
        let mut remesher =
            Remesher::new(Config::default().with_target_faces(100)).with_progress(progress);
        remesher.set_mesh(grid(6, 6, 1.0, 1.0).unwrap());
        remesher.run().unwrap();
        // Stage steps plus one step per solved level of both fields.
        let levels = remesher.hierarchy().unwrap().num_levels();
        assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), RUN_STEPS + 2 * levels);
    }

    #[test]
    fn test_write_and_reload() {
        let mut remesher = Remesher::new(Config::default().with_target_faces(100));
        remesher.set_mesh(grid(8, 8, 1.0, 1.0).unwrap());
        let report = remesher.run().unwrap();
        let path =
            std::env::temp_dir().join(format!("quadmesh_pipeline_{}.obj", std::process::id()));
        remesher.write(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(text.lines().filter(|l| l.starts_with("f ")).count(), report.output_faces);
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), report.output_vertices);
    }
}
