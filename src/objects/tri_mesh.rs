// Wavefront OBJ only, through tobj.
// Positions are kept in object space; only the triangle bounds are transformed.

use super::{Primitive, TriangleIndices};
use crate::error::{Error, Result};
use na::{Matrix4, Point2, Point3, Vector3};
use std::io::BufRead;
use std::path::Path;

/// Vertex attribute arrays plus the triangle primitives indexing into them.
#[derive(Clone, Debug, Default)]
pub struct TriMesh {
    pub vertices: Vec<Point3<f32>>,
    pub uvs: Vec<Point2<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub primitives: Vec<Primitive>,
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

fn triple(indices: &[u32], face: usize) -> Option<[u32; 3]> {
    indices
        .get(face * 3..face * 3 + 3)
        .map(|t| [t[0], t[1], t[2]])
}

impl TriMesh {
    pub fn load(path: impl AsRef<Path>, transform: &Matrix4<f32>, material_index: u32) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading mesh: {}...", path.display());

        // Materials are not our concern, a failing .mtl is ignored
        let (models, _materials) = tobj::load_obj(path, &load_options())
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?;

        Self::from_models(&models, transform, material_index)
    }

    pub fn load_from_reader<R: BufRead>(
        reader: &mut R,
        transform: &Matrix4<f32>,
        material_index: u32,
    ) -> Result<Self> {
        let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
            Err(tobj::LoadError::OpenFileFailed)
        })
        .map_err(|e| Error::parse(e.to_string()))?;

        Self::from_models(&models, transform, material_index)
    }

    fn from_models(models: &[tobj::Model], transform: &Matrix4<f32>, material_index: u32) -> Result<Self> {
        let mut mesh = TriMesh::default();

        for (i, m) in models.iter().enumerate() {
            let obj = &m.mesh;
            log::debug!(
                "Model {} ('{}') has {} vertices, {} uvs, {} normals and {} triangles",
                i,
                m.name,
                obj.positions.len() / 3,
                obj.texcoords.len() / 2,
                obj.normals.len() / 3,
                obj.indices.len() / 3
            );

            let base = (
                mesh.vertices.len() as u32,
                mesh.uvs.len() as u32,
                mesh.normals.len() as u32,
            );
            let positions: Vec<Point3<f32>> = obj
                .positions
                .chunks_exact(3)
                .map(|v| Point3::new(v[0], v[1], v[2]))
                .collect();

            for face in 0..obj.indices.len() / 3 {
                let vertices = triple(&obj.indices, face)
                    .ok_or_else(|| Error::parse(format!("model {}: truncated face {}", i, face)))?;

                let mut corners = [Point3::origin(); 3];
                for (corner, &idx) in corners.iter_mut().zip(vertices.iter()) {
                    *corner = *positions.get(idx as usize).ok_or_else(|| {
                        Error::parse(format!(
                            "model {}: face {} references vertex {} of {}",
                            i,
                            face,
                            idx + 1,
                            positions.len()
                        ))
                    })?;
                }

                let indices = TriangleIndices {
                    vertices,
                    uvs: triple(&obj.texcoord_indices, face),
                    normals: triple(&obj.normal_indices, face),
                }
                .offset(base.0, base.1, base.2);

                mesh.primitives
                    .push(Primitive::triangle(indices, corners, material_index, transform)?);
            }

            mesh.vertices.extend(positions);
            mesh.uvs.extend(
                obj.texcoords
                    .chunks_exact(2)
                    .map(|v| Point2::new(v[0], v[1])),
            );
            mesh.normals.extend(
                obj.normals
                    .chunks_exact(3)
                    .map(|v| Vector3::new(v[0], v[1], v[2])),
            );
        }

        log::debug!(
            "Mesh has {} vertices and {} triangles",
            mesh.vertices.len(),
            mesh.primitives.len()
        );

        Ok(mesh)
    }

    /// Re-bases every triangle so the mesh can be appended after `vertex`,
    /// `uv` and `normal` existing entries of shared scene arrays.
    pub fn offset_by(self, vertex: u32, uv: u32, normal: u32) -> Self {
        let primitives = self
            .primitives
            .iter()
            .map(|p| p.offset_indices(vertex, uv, normal))
            .collect();

        Self { primitives, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Shape;
    use na::Translation3;
    use std::io::{BufReader, Write};

    const QUAD: &str = "\
o quad
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    fn load_str(src: &str, transform: &Matrix4<f32>) -> Result<TriMesh> {
        TriMesh::load_from_reader(&mut BufReader::new(src.as_bytes()), transform, 2)
    }

    fn tri(p: &Primitive) -> TriangleIndices {
        match p.shape() {
            Shape::Triangle(t) => *t,
            other => panic!("expected triangle, got {:?}", other),
        }
    }

    #[test]
    fn loads_zero_based_indices() {
        let mesh = load_str(QUAD, &Matrix4::identity()).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.primitives.len(), 2);

        let t0 = tri(&mesh.primitives[0]);
        let t1 = tri(&mesh.primitives[1]);
        let v0 = t0.vertices.map(|i| mesh.vertices[i as usize]);
        assert_eq!(v0[0], Point3::new(0.0, 0.0, 0.0));
        assert_eq!(v0[2], Point3::new(1.0, 1.0, 0.0));
        assert_eq!(mesh.vertices[t1.vertices[2] as usize], Point3::new(0.0, 1.0, 0.0));

        let uv = t0.uvs.unwrap();
        assert_eq!(mesh.uvs[uv[1] as usize], Point2::new(1.0, 0.0));
        let n = t0.normals.unwrap();
        assert_eq!(mesh.normals[n[0] as usize], Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.primitives[0].material_index(), 2);
    }

    #[test]
    fn bounds_are_transformed_but_vertices_are_not() {
        let t = Translation3::new(10.0, 0.0, 0.0).to_homogeneous();
        let mesh = load_str(QUAD, &t).unwrap();
        let b = mesh.primitives[0].aabb();
        assert_eq!(b.min, Point3::new(10.0, 0.0, 0.0));
        assert_eq!(b.max, Point3::new(11.0, 1.0, 0.0));
        assert_eq!(mesh.vertices[1], Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn faces_without_attributes() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 0 1\nf 1 2 3\n";
        let mesh = load_str(src, &Matrix4::identity()).unwrap();
        let t = tri(&mesh.primitives[0]);
        assert_eq!(t.vertices, [0, 1, 2]);
        assert_eq!(t.uvs, None);
        assert_eq!(t.normals, None);
    }

    #[test]
    fn offset_rebases_triangles() {
        let mesh = load_str(QUAD, &Matrix4::identity()).unwrap().offset_by(5, 1, 2);
        let t = tri(&mesh.primitives[0]);
        assert_eq!(t.vertices, [5, 6, 7]);
        assert_eq!(t.uvs, Some([1, 2, 3]));
        assert_eq!(t.normals, Some([2, 2, 2]));
    }

    #[test]
    fn malformed_source_is_a_parse_error() {
        let err = load_str("v 0 0 0\nv 1 0 0\nf 1 2 9\n", &Matrix4::identity()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = load_str("v 0 zero 0\n", &Matrix4::identity()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TriMesh::load(dir.path().join("nope.obj"), &Matrix4::identity(), 0).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn loads_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(QUAD.as_bytes()).unwrap();
        let mesh = TriMesh::load(file.path(), &Matrix4::identity(), 0).unwrap();
        assert_eq!(mesh.primitives.len(), 2);
        assert_eq!(mesh.uvs.len(), 4);
    }
}
