//! PLY (Stanford polygon) format support.
//!
//! Loading accepts ASCII and binary files through `ply-rs`; polygons are
//! fan-triangulated. Saving writes ASCII PLY, rendered in memory first.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use nalgebra::Point3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};

use crate::error::{QuadError, Result};
use crate::mesh::{build_surface, QuadMesh, SurfaceMesh};

/// Load a triangle mesh from a PLY file.
///
/// # Example
///
/// ```no_run
/// use quadmesh::io::ply;
///
/// let mesh = ply::load("model.ply").unwrap();
/// ```
pub fn load<P: AsRef<Path>>(path: P) -> Result<SurfaceMesh> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let load_error = |message: &str| QuadError::LoadError {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| load_error(&e.to_string()))?;

    let vertex_element = ply
        .payload
        .get("vertex")
        .ok_or_else(|| load_error("PLY file has no vertex element"))?;

    let mut vertices: Vec<Point3<f64>> = Vec::with_capacity(vertex_element.len());
    for vertex in vertex_element {
        let coord = |name: &str| {
            get_float_property(vertex, name)
                .ok_or_else(|| load_error(&format!("vertex missing {} coordinate", name)))
        };
        let (x, y, z) = (coord("x")?, coord("y")?, coord("z")?);
        vertices.push(Point3::new(x, y, z));
    }

    let face_element = ply
        .payload
        .get("face")
        .ok_or_else(|| load_error("PLY file has no face element"))?;

    let mut faces: Vec<[usize; 3]> = Vec::with_capacity(face_element.len());
    for face in face_element {
        let indices = get_list_property(face, "vertex_indices")
            .or_else(|| get_list_property(face, "vertex_index"))
            .ok_or_else(|| load_error("face missing vertex_indices property"))?;
        if indices.len() >= 3 {
            for i in 1..indices.len() - 1 {
                faces.push([indices[0], indices[i], indices[i + 1]]);
            }
        }
    }

    if faces.is_empty() {
        return Err(load_error("PLY file contains no faces"));
    }
    build_surface(&vertices, &faces)
}

fn get_float_property(element: &DefaultElement, name: &str) -> Option<f64> {
    match element.get(name)? {
        Property::Float(v) => Some(*v as f64),
        Property::Double(v) => Some(*v),
        Property::Int(v) => Some(*v as f64),
        Property::UInt(v) => Some(*v as f64),
        Property::Short(v) => Some(*v as f64),
        Property::UShort(v) => Some(*v as f64),
        Property::Char(v) => Some(*v as f64),
        Property::UChar(v) => Some(*v as f64),
        _ => None,
    }
}

fn get_list_property(element: &DefaultElement, name: &str) -> Option<Vec<usize>> {
    match element.get(name)? {
        Property::ListInt(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUInt(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListShort(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListChar(v) => Some(v.iter().map(|&x| x as usize).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|&x| x as usize).collect()),
        _ => None,
    }
}

fn render<'a>(
    vertices: &[Point3<f64>],
    num_faces: usize,
    faces: impl Iterator<Item = &'a [usize]>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ply");
    let _ = writeln!(out, "format ascii 1.0");
    let _ = writeln!(out, "comment Generated by quadmesh");
    let _ = writeln!(out, "element vertex {}", vertices.len());
    let _ = writeln!(out, "property float x");
    let _ = writeln!(out, "property float y");
    let _ = writeln!(out, "property float z");
    let _ = writeln!(out, "element face {}", num_faces);
    let _ = writeln!(out, "property list uchar int vertex_indices");
    let _ = writeln!(out, "end_header");
    for v in vertices {
        let _ = writeln!(out, "{} {} {}", v.x, v.y, v.z);
    }
    for f in faces {
        let _ = write!(out, "{}", f.len());
        for i in f {
            let _ = write!(out, " {}", i);
        }
        out.push('\n');
    }
    out
}

/// Save a triangle mesh to an ASCII PLY file.
pub fn save<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> Result<()> {
    let text = render(
        mesh.positions(),
        mesh.num_faces(),
        mesh.triangles().iter().map(|t| &t[..]),
    );
    fs::write(path, text)?;
    Ok(())
}

/// Save a quad mesh to an ASCII PLY file.
///
/// # Example
///
/// ```no_run
/// use quadmesh::io::ply;
/// use quadmesh::mesh::QuadMesh;
///
/// let mesh = QuadMesh::default();
/// ply::save_quads(&mesh, "output.ply").unwrap();
/// ```
pub fn save_quads<P: AsRef<Path>>(mesh: &QuadMesh, path: P) -> Result<()> {
    let text = render(
        mesh.vertices(),
        mesh.num_faces(),
        mesh.quads().iter().map(|q| &q[..]),
    );
    fs::write(path, text)?;
    Ok(())
}
