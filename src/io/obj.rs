//! Wavefront OBJ format support.
//!
//! Only geometry is read: `v` lines give positions and `f` lines give
//! polygons, which are fan-triangulated. Texture and normal indices
//! (`f 1/2/3 ...`) and negative (relative) indices are accepted; every other
//! statement is ignored.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use nalgebra::Point3;

use crate::error::{QuadError, Result};
use crate::mesh::{build_surface, QuadMesh, SurfaceMesh};

/// Load a triangle mesh from an OBJ file.
///
/// # Example
///
/// ```no_run
/// use quadmesh::io::obj;
///
/// let mesh = obj::load("model.obj").unwrap();
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<SurfaceMesh> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let (vertices, faces) = parse(&text).map_err(|message| QuadError::LoadError {
        path: path.to_path_buf(),
        message,
    })?;
    if faces.is_empty() {
        return Err(QuadError::LoadError {
            path: path.to_path_buf(),
            message: "OBJ file contains no faces".to_string(),
        });
    }
    build_surface(&vertices, &faces)
}

/// Parse OBJ text into positions and triangles.
pub(crate) fn parse(
    text: &str,
) -> std::result::Result<(Vec<Point3<f64>>, Vec<[usize; 3]>), String> {
    let mut vertices = Vec::new();
    let mut faces = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut coords = [0.0; 3];
                for c in &mut coords {
                    *c = tokens
                        .next()
                        .and_then(|t| t.parse::<f64>().ok())
                        .ok_or_else(|| format!("line {}: malformed vertex", line_no + 1))?;
                }
                vertices.push(Point3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let indices = tokens
                    .map(|t| resolve_index(t, vertices.len()))
                    .collect::<Option<Vec<usize>>>()
                    .ok_or_else(|| format!("line {}: malformed face", line_no + 1))?;
                if indices.len() < 3 {
                    return Err(format!("line {}: face has fewer than 3 vertices", line_no + 1));
                }
                for i in 1..indices.len() - 1 {
                    faces.push([indices[0], indices[i], indices[i + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok((vertices, faces))
}

/// Zero-based index of an `f` token such as `7`, `7/1/2` or `-1`.
fn resolve_index(token: &str, num_vertices: usize) -> Option<usize> {
    let first = token.split('/').next()?;
    let index: i64 = first.parse().ok()?;
    if index > 0 {
        Some(index as usize - 1)
    } else if index < 0 && (-index) as usize <= num_vertices {
        Some(num_vertices - (-index) as usize)
    } else {
        None
    }
}

/// Save a triangle mesh to an OBJ file.
pub fn save<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> Result<()> {
    let mut out = String::new();
    header(&mut out);
    for p in mesh.positions() {
        let _ = writeln!(out, "v {} {} {}", p.x, p.y, p.z);
    }
    for t in mesh.triangles() {
        let _ = writeln!(out, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1);
    }
    fs::write(path, out)?;
    Ok(())
}

/// Save a quad mesh to an OBJ file.
///
/// The file is rendered in memory and written in one go.
pub fn save_quads<P: AsRef<Path>>(mesh: &QuadMesh, path: P) -> Result<()> {
    fs::write(path, render_quads(mesh))?;
    Ok(())
}

pub(crate) fn render_quads(mesh: &QuadMesh) -> String {
    let mut out = String::new();
    header(&mut out);
    for p in mesh.vertices() {
        let _ = writeln!(out, "v {} {} {}", p.x, p.y, p.z);
    }
    for q in mesh.quads() {
        let _ = writeln!(out, "f {} {} {} {}", q[0] + 1, q[1] + 1, q[2] + 1, q[3] + 1);
    }
    out
}

fn header(out: &mut String) {
    let _ = writeln!(out, "# Generated by quadmesh");
}
