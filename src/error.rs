//! Error types for quadmesh.
//!
//! Structural failures (malformed input, hierarchy build failure, topology
//! extraction failure, unwritable output) are reported through [`QuadError`].
//! Convergence shortfalls are not errors; they are logged and surfaced as
//! diagnostics in the pipeline report.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`QuadError`].
pub type Result<T> = std::result::Result<T, QuadError>;

/// Pipeline stages, used to name the failing stage in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Loading the input surface.
    Load,
    /// Building the working mesh and the hierarchy.
    Initialize,
    /// Solving the orientation field.
    Orientation,
    /// Extracting orientation singularities.
    OrientationSingularities,
    /// Estimating curvature for adaptive scale.
    Slope,
    /// Solving the scale field.
    Scale,
    /// Solving the position field.
    Position,
    /// Extracting position singularities.
    PositionSingularities,
    /// Extracting the quad index map.
    IndexMap,
    /// Writing the output mesh.
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Initialize => "initialize",
            Stage::Orientation => "orientation field",
            Stage::OrientationSingularities => "orientation singularities",
            Stage::Slope => "slope estimation",
            Stage::Scale => "scale field",
            Stage::Position => "position field",
            Stage::PositionSingularities => "position singularities",
            Stage::IndexMap => "index map",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while building or running the remeshing pipeline.
#[derive(Error, Debug)]
pub enum QuadError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices.
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// An edge has more than two incident faces, or two faces traverse it
    /// in the same direction.
    #[error("edge ({v0}, {v1}) is non-manifold: {details}")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
        /// What is wrong with the edge.
        details: &'static str,
    },

    /// The faces around a vertex do not form a single fan.
    #[error("vertex {vertex} is non-manifold ({fans} separate face fans)")]
    NonManifoldVertex {
        /// The vertex index.
        vertex: usize,
        /// Number of disconnected fans found around the vertex.
        fans: usize,
    },

    /// The multiresolution hierarchy could not be built.
    #[error("hierarchy build failed: {0}")]
    Hierarchy(String),

    /// No valid manifold quad mesh could be extracted.
    #[error("topology extraction failed: {0}")]
    TopologyExtraction(String),

    /// A stage was invoked before the stage it depends on.
    #[error("{stage} requires {requires} to run first")]
    StageOrder {
        /// The stage that was invoked.
        stage: Stage,
        /// The missing prerequisite.
        requires: Stage,
    },

    /// A stage failed; wraps the underlying cause.
    #[error("{stage} failed: {source}")]
    Stage {
        /// The failing stage.
        stage: Stage,
        /// The underlying error.
        #[source]
        source: Box<QuadError>,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error loading mesh from file.
    #[error("failed to load mesh from {path}: {message}")]
    LoadError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Error saving mesh to file.
    #[error("failed to save mesh to {path}: {message}")]
    SaveError {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Unsupported file format.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// The file extension.
        extension: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl QuadError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        QuadError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Attach the failing stage to this error.
    ///
    /// Errors that already name a stage are returned unchanged.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            QuadError::Stage { .. } | QuadError::StageOrder { .. } => self,
            other => QuadError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was reported from, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            QuadError::Stage { stage, .. } | QuadError::StageOrder { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error is structural (as opposed to an I/O or usage error).
    pub fn is_structural(&self) -> bool {
        match self {
            QuadError::Stage { source, .. } => source.is_structural(),
            QuadError::EmptyMesh
            | QuadError::InvalidVertexIndex { .. }
            | QuadError::DegenerateFace { .. }
            | QuadError::NonManifoldEdge { .. }
            | QuadError::NonManifoldVertex { .. }
            | QuadError::Hierarchy(_)
            | QuadError::TopologyExtraction(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_names_stage() {
        let err = QuadError::EmptyMesh.at(Stage::Initialize);
        assert_eq!(err.stage(), Some(Stage::Initialize));
        assert_eq!(format!("{err}"), "initialize failed: mesh has no faces");
        assert!(err.is_structural());
    }

    #[test]
    fn test_stage_wrapping_is_not_nested() {
        let err = QuadError::TopologyExtraction("empty".into())
            .at(Stage::IndexMap)
            .at(Stage::Write);
        assert_eq!(err.stage(), Some(Stage::IndexMap));
    }

    #[test]
    fn test_io_error_is_not_structural() {
        let err: QuadError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(!err.is_structural());
    }
}
