//! Remeshing algorithms.
//!
//! The pipeline stages live in their own modules and build on each other:
//!
//! - **prepare**: normalization, refinement, normals, areas and sharp features
//! - **hierarchy**: multiresolution vertex hierarchy with colour phases
//! - **orientation**: 4-RoSy orientation field
//! - **curvature** / **scale**: curvature estimation and the target edge length field
//! - **position**: lattice origins and their rounding into an edge lattice
//! - **singularity**: orientation and position singularities
//! - **index_map**: topology repair and quad extraction
//!
//! [`rosy`] holds the 4-symmetry vector and lattice helpers they share.

pub mod curvature;
pub mod hierarchy;
pub mod index_map;
pub mod orientation;
pub mod position;
pub mod prepare;
pub mod progress;
pub mod rosy;
pub mod scale;
pub mod singularity;

pub use progress::Progress;
