//! STL (stereolithography) format support.
//!
//! STL stores triangles only, so it is an input format for the remesher and
//! an output format for triangle meshes; quad output is rejected by
//! [`save_quads`](super::save_quads). Both binary and ASCII files load.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::error::{QuadError, Result};
use crate::mesh::{build_surface, SurfaceMesh};

/// Load a triangle mesh from an STL file.
///
/// Coincident corners are merged by exact coordinate match.
///
/// # Example
///
/// ```no_run
/// use quadmesh::io::stl;
///
/// let mesh = stl::load("model.stl").unwrap();
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<SurfaceMesh> {
    let path = path.as_ref();
    let mut file = File::open(path)?;

    let stl = stl_io::read_stl(&mut file).map_err(|e| QuadError::LoadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut vertices: Vec<Point3<f64>> = Vec::new();
    let mut index_of: BTreeMap<[u64; 3], usize> = BTreeMap::new();
    let mut find_or_add = |v: &stl_io::Vertex| {
        let p = Point3::new(v[0] as f64, v[1] as f64, v[2] as f64);
        let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
        *index_of.entry(key).or_insert_with(|| {
            vertices.push(p);
            vertices.len() - 1
        })
    };

    let mut faces: Vec<[usize; 3]> = Vec::with_capacity(stl.faces.len());
    for tri in &stl.faces {
        let [i0, i1, i2] = tri.vertices.map(|i| find_or_add(&stl.vertices[i]));
        // Skip degenerate triangles
        if i0 != i1 && i1 != i2 && i0 != i2 {
            faces.push([i0, i1, i2]);
        }
    }

    if faces.is_empty() {
        return Err(QuadError::LoadError {
            path: path.to_path_buf(),
            message: "STL file contains no valid triangles".to_string(),
        });
    }
    build_surface(&vertices, &faces)
}

/// Save a triangle mesh to a binary STL file.
pub fn save<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    let vertices = mesh.positions();
    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .iter()
        .map(|f| {
            let p0 = &vertices[f[0]];
            let p1 = &vertices[f[1]];
            let p2 = &vertices[f[2]];
            let n = (p1 - p0).cross(&(p2 - p0)).try_normalize(0.0).unwrap_or_else(Vector3::zeros);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [
                    stl_io::Vertex::new([p0.x as f32, p0.y as f32, p0.z as f32]),
                    stl_io::Vertex::new([p1.x as f32, p1.y as f32, p1.z as f32]),
                    stl_io::Vertex::new([p2.x as f32, p2.y as f32, p2.z as f32]),
                ],
            }
        })
        .collect();

    let mut buffer = Vec::new();
    stl_io::write_stl(&mut buffer, triangles.iter()).map_err(|e| QuadError::SaveError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::primitives::cube;

    #[test]
    fn test_roundtrip_merges_corners() {
        let mesh = cube(2.0, 1).unwrap();
        let path =
            std::env::temp_dir().join(format!("quadmesh_stl_roundtrip_{}.stl", std::process::id()));
        save(&mesh, &path).unwrap();
        let loaded = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.num_vertices(), mesh.num_vertices());
        assert_eq!(loaded.num_faces(), mesh.num_faces());
        assert!(loaded.is_closed());
    }
}
