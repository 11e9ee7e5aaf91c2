//! # Quadmesh
//!
//! Field-aligned quad remeshing of triangle surfaces.
//!
//! Quadmesh turns a manifold triangle mesh into a quad-dominant mesh whose
//! edges follow a smooth 4-fold symmetric direction field. The pipeline
//! builds a multiresolution hierarchy, relaxes an orientation field and a
//! position field over it, counts the singularities both fields leave, and
//! extracts quads from the rounded integer lattice after repairing invalid
//! faces with max-flow, min-cost flow or a bounded constraint search.
//!
//! ## Features
//!
//! - **Directed-edge triangle mesh**: flat arrays with O(1) twin lookup
//! - **Multigrid field solvers**: parallel Gauss-Seidel sweeps per colour phase
//! - **Adaptive scale**: curvature-driven target edge lengths
//! - **Sharp features**: creases and boundaries become quad edges
//! - **Multiple file formats**: OBJ, STL, PLY
//!
//! ## Quick Start
//!
//! ```no_run
//! use quadmesh::prelude::*;
//!
//! let mut remesher = Remesher::new(Config::default().with_target_faces(5000));
//! remesher.load("model.obj").unwrap();
//! remesher.initialize().unwrap();
//! let report = remesher.run().unwrap();
//! println!("{} quads, {} irregular vertices", report.output_faces, report.irregular_vertices);
//! remesher.write("model_quads.obj").unwrap();
//! ```
//!
//! ## Remeshing In Memory
//!
//! ```
//! use quadmesh::prelude::*;
//! use quadmesh::mesh::primitives::torus;
//!
//! let donut = torus(1.0, 0.4, 32, 16).unwrap();
//! let config = Config::default().with_target_faces(400).with_seed(1);
//!
//! let result = remesh(&donut, &config).unwrap();
//! assert!(result.mesh.num_faces() > 0);
//! assert!(result.mesh.is_manifold());
//! ```
//!
//! ## Running Stages One By One
//!
//! Every stage is a method on [`Remesher`]; intermediate fields stay
//! available for inspection.
//!
//! ```
//! use quadmesh::prelude::*;
//! use quadmesh::mesh::primitives::icosphere;
//!
//! let mut remesher = Remesher::new(Config::default().with_target_faces(200));
//! remesher.set_mesh(icosphere(1.0, 2).unwrap());
//! remesher.initialize().unwrap();
//! remesher.run_orientation_field().unwrap();
//! remesher.run_singularities_orientation().unwrap();
//!
//! // A sphere always carries eight quarter turns of orientation index.
//! let total: i32 = quadmesh::algo::singularity::total_index(remesher.orientation_singularities());
//! assert_eq!(total, 8);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod config;
pub mod error;
pub mod io;
pub mod mesh;
pub mod pipeline;

pub use config::Config;
pub use pipeline::{remesh, RemeshReport, Remesher, SingularityLinks};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use quadmesh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{QuadError, Result, Stage};
    pub use crate::mesh::{build_surface, EdgeId, FaceId, QuadMesh, SurfaceMesh, VertexId};
    pub use crate::pipeline::{remesh, RemeshReport, Remesher};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];

        let faces = vec![
            [0, 2, 1], // bottom
            [0, 1, 3], // front
            [1, 2, 3], // right
            [2, 0, 3], // left
        ];

        let mesh: SurfaceMesh = build_surface(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 4);
        assert_eq!(mesh.num_dedges(), 12);
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 2);
        for v in mesh.vertex_ids() {
            assert!(!mesh.is_boundary_vertex(v), "vertex {:?} should not be on boundary", v);
        }
    }
}
