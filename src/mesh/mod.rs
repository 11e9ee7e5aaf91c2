//! Core mesh data structures.
//!
//! This module provides the triangle input representation, the quad output
//! representation and related types.
//!
//! # Overview
//!
//! The input type is [`SurfaceMesh`], a manifold triangle mesh stored in
//! directed-edge form: each face owns three consecutive directed edges and a
//! twin table links opposite edges. This gives O(1) adjacency queries while
//! keeping the flat arrays that the field solvers iterate over.
//!
//! The output type is [`QuadMesh`], a face-vertex quad mesh with per-vertex
//! feature flags and manifold validation.
//!
//! # Index Types
//!
//! Mesh elements are identified by type-safe index wrappers:
//! - [`VertexId`] - Identifies a vertex
//! - [`FaceId`] - Identifies a face
//! - [`EdgeId`] - Identifies a directed edge (`3 * face + corner`)
//!
//! # Construction
//!
//! ```
//! use quadmesh::mesh::{build_surface, SurfaceMesh};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2]];
//!
//! let mesh: SurfaceMesh = build_surface(&vertices, &faces).unwrap();
//! ```

mod builder;
mod index;
pub mod primitives;
mod quad;
mod surface;
mod union_find;

pub use builder::{build_surface, to_face_vertex};
pub use index::{EdgeId, FaceId, VertexId, INVALID};
pub use quad::QuadMesh;
pub use surface::{SurfaceMesh, VertexEdgeIter};

pub(crate) use index::{dedge_next, dedge_prev};
pub(crate) use union_find::UnionFind;
