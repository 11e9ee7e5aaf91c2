//! Mesh file I/O.
//!
//! Triangle meshes are loaded as input for the remesher; quad meshes are
//! saved as its output.
//!
//! # Supported Formats
//!
//! | Format | Extension | Load | Save triangles | Save quads |
//! |--------|-----------|------|----------------|------------|
//! | Wavefront OBJ | `.obj` | ✓ | ✓ | ✓ |
//! | PLY | `.ply` | ✓ | ✓ | ✓ |
//! | STL | `.stl` | ✓ | ✓ | ✗ |
//!
//! Polygons with more than three corners are fan-triangulated on load.
//!
//! # Usage
//!
//! ```no_run
//! use quadmesh::io::{load, save_quads};
//! use quadmesh::Config;
//!
//! let mesh = load("model.obj").unwrap();
//! let quads = quadmesh::remesh(&mesh, &Config::default().with_target_faces(1000)).unwrap();
//! save_quads(&quads.mesh, "output.obj").unwrap();
//! ```

pub mod obj;
pub mod ply;
pub mod stl;

use std::path::Path;

use crate::error::{QuadError, Result};
use crate::mesh::{QuadMesh, SurfaceMesh};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Wavefront OBJ format.
    Obj,
    /// STL (stereolithography) format.
    Stl,
    /// PLY (Stanford polygon) format.
    Ply,
}

impl Format {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_lowercase().as_str() {
            "obj" => Some(Format::Obj),
            "stl" => Some(Format::Stl),
            "ply" => Some(Format::Ply),
            _ => None,
        }
    }

    /// Detect format from file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Format> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_extension)
    }

    /// Detect the format of `path`, or fail with [`QuadError::UnsupportedFormat`].
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Format> {
        let path = path.as_ref();
        Format::from_path(path).ok_or_else(|| QuadError::UnsupportedFormat {
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string(),
        })
    }
}

/// Load a triangle mesh with automatic format detection.
///
/// # Example
///
/// ```no_run
/// use quadmesh::io::load;
///
/// let mesh = load("model.ply").unwrap();
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<SurfaceMesh> {
    let path = path.as_ref();
    match Format::detect(path)? {
        Format::Obj => obj::load(path),
        Format::Stl => stl::load(path),
        Format::Ply => ply::load(path),
    }
}

/// Save a triangle mesh with automatic format detection.
pub fn save<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match Format::detect(path)? {
        Format::Obj => obj::save(mesh, path),
        Format::Stl => stl::save(mesh, path),
        Format::Ply => ply::save(mesh, path),
    }
}

/// Save a quad mesh with automatic format detection.
///
/// # Errors
/// STL cannot store quads and yields [`QuadError::SaveError`].
pub fn save_quads<P: AsRef<Path>>(mesh: &QuadMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match Format::detect(path)? {
        Format::Obj => obj::save_quads(mesh, path),
        Format::Ply => ply::save_quads(mesh, path),
        Format::Stl => Err(QuadError::SaveError {
            path: path.to_path_buf(),
            message: "STL cannot store quad faces".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::primitives::torus;

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::from_path("a/b/model.OBJ"), Some(Format::Obj));
        assert_eq!(Format::from_path("model.ply"), Some(Format::Ply));
        assert_eq!(Format::from_path("model.stl"), Some(Format::Stl));
        assert_eq!(Format::from_path("model.gltf"), None);
        assert!(matches!(
            Format::detect("model"),
            Err(QuadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_obj_roundtrip() {
        let mesh = torus(1.0, 0.3, 12, 8).unwrap();
        let path =
            std::env::temp_dir().join(format!("quadmesh_io_roundtrip_{}.obj", std::process::id()));
        save(&mesh, &path).unwrap();
        let loaded = load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.triangles(), mesh.triangles());
        assert_eq!(loaded.euler_characteristic(), 0);
    }

    #[test]
    fn test_stl_rejects_quads() {
        let err = save_quads(&QuadMesh::default(), "out.stl").unwrap_err();
        assert!(matches!(err, QuadError::SaveError { .. }));
    }
}
