//! Integer index map: from a relaxed position field to a quad mesh.
//!
//! The stage runs in three steps:
//!
//! 1. [`EdgeLattice::build`] rounds the position field into integer edge
//!    translations with [`Rot4`](super::rosy::Rot4) frame transitions.
//! 2. A [`TopologyRepair`] strategy removes position singularities by
//!    network flow and makes as many faces as it can valid half cells or
//!    collapsed edges.
//! 3. [`extract`] collapses zero edges and pairs the remaining triangles
//!    into quads, half cells of one lattice cell first.
//!
//! # Example
//!
//! ```ignore
//! let lattice = EdgeLattice::build(&mesh, &frames, &transitions);
//! let strategy = repair_strategy(&config);
//! strategy.repair(&ctx, &mut lattice);
//! let quads = extract(&working, &lattice, &origins, &singular)?;
//! ```

mod extract;
mod flow;
mod lattice;
mod matching;
mod repair;

pub use extract::{extract, QuadIndexMap};
pub use flow::{
    flow_solver, resolve_face_loops, FlowGraph, FlowSolver, LoopResolution, MaxFlow, MinCostFlow,
};
pub use lattice::{EdgeLattice, FaceState, LatticeEdge, VertexFrames};
pub use repair::{
    close_loops, count_open_loops, remove_position_singularities, repair_strategy, ConstraintRepair,
    FlowRepair, LoopClosing, RepairContext, RepairStats, TopologyRepair,
};
