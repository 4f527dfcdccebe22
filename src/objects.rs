pub mod tri_mesh;

use crate::bounds::Aabb;
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use na::{Matrix4, Point3, Vector3, Vector4};
use serde::Deserialize;

/// Shape tag as seen by the host scene description and the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Sphere = 0,
    Box = 1,
    #[serde(alias = "default")]
    Sdf = 2,
    Triangle = 3,
}

/// Indices into externally owned vertex/uv/normal arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleIndices {
    pub vertices: [u32; 3],
    pub uvs: Option<[u32; 3]>,
    pub normals: Option<[u32; 3]>,
}

impl TriangleIndices {
    pub fn offset(&self, vertex: u32, uv: u32, normal: u32) -> Self {
        Self {
            vertices: self.vertices.map(|i| i + vertex),
            uvs: self.uvs.map(|t| t.map(|i| i + uv)),
            normals: self.normals.map(|n| n.map(|i| i + normal)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { extents: Vector3<f32> },
    /// Signed-distance volume, bounded by a unit half-extent box.
    DefaultVolume,
    Triangle(TriangleIndices),
}

impl Shape {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Shape::Sphere { .. } => PrimitiveKind::Sphere,
            Shape::Box { .. } => PrimitiveKind::Box,
            Shape::DefaultVolume => PrimitiveKind::Sdf,
            Shape::Triangle(_) => PrimitiveKind::Triangle,
        }
    }
}

/// A scene primitive with its world bounds. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Primitive {
    shape: Shape,
    material_index: u32,
    params: Vector4<f32>,
    inverse_transform: Matrix4<f32>,
    aabb: Aabb,
}

fn invert(transform: &Matrix4<f32>) -> Result<Matrix4<f32>> {
    transform
        .try_inverse()
        .ok_or_else(|| Error::degenerate(format!("transform is not invertible: {}", transform)))
}

// 8 corners of a box of the given full size, centered on the local origin
fn box_corners(size: &Vector3<f32>, transform: &Matrix4<f32>) -> [Point3<f32>; 8] {
    let h = size * 0.5;
    [
        Point3::new(-h.x, -h.y, -h.z),
        Point3::new(h.x, -h.y, -h.z),
        Point3::new(h.x, -h.y, h.z),
        Point3::new(-h.x, -h.y, h.z),
        Point3::new(-h.x, h.y, -h.z),
        Point3::new(h.x, h.y, -h.z),
        Point3::new(h.x, h.y, h.z),
        Point3::new(-h.x, h.y, h.z),
    ]
    .map(|p| transform.transform_point(&p))
}

impl Primitive {
    /// Builds an analytic primitive from its host description.
    ///
    /// `params.x` is the sphere radius, `params.xyz` the full box extents.
    /// The transform must be invertible. Triangles carry vertex indices and
    /// are built with [`Primitive::triangle`] instead.
    pub fn new(
        kind: PrimitiveKind,
        material_index: u32,
        params: Vector4<f32>,
        transform: &Matrix4<f32>,
    ) -> Result<Self> {
        let inverse_transform = invert(transform)?;
        let translation = Point3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]);

        let (shape, aabb) = match kind {
            PrimitiveKind::Sphere => {
                let radius = params.x;
                (Shape::Sphere { radius }, Aabb::from_sphere(translation, radius))
            }
            PrimitiveKind::Box => {
                let extents = params.xyz();
                let corners = box_corners(&extents, transform);
                (Shape::Box { extents }, Aabb::from_points(&corners))
            }
            PrimitiveKind::Sdf => {
                let corners = box_corners(&Vector3::repeat(2.0), transform);
                (Shape::DefaultVolume, Aabb::from_points(&corners))
            }
            PrimitiveKind::Triangle => {
                return Err(Error::config(
                    "triangle primitives must be loaded from a mesh",
                ))
            }
        };

        Ok(Self {
            shape,
            material_index,
            params,
            inverse_transform,
            aabb,
        })
    }

    /// Builds a triangle referencing external vertex data. `corners` are the
    /// untransformed positions at `indices.vertices`.
    pub fn triangle(
        indices: TriangleIndices,
        corners: [Point3<f32>; 3],
        material_index: u32,
        transform: &Matrix4<f32>,
    ) -> Result<Self> {
        let inverse_transform = invert(transform)?;
        let world = corners.map(|p| transform.transform_point(&p));

        Ok(Self {
            shape: Shape::Triangle(indices),
            material_index,
            params: Vector4::zeros(),
            inverse_transform,
            aabb: Aabb::from_points(&world),
        })
    }

    /// Same primitive with its triangle indices re-based. Other shapes are
    /// returned unchanged.
    pub fn offset_indices(&self, vertex: u32, uv: u32, normal: u32) -> Self {
        let shape = match self.shape {
            Shape::Triangle(indices) => Shape::Triangle(indices.offset(vertex, uv, normal)),
            other => other,
        };

        Self {
            shape,
            ..self.clone()
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn material_index(&self) -> u32 {
        self.material_index
    }

    pub fn params(&self) -> Vector4<f32> {
        self.params
    }

    pub fn inverse_transform(&self) -> &Matrix4<f32> {
        &self.inverse_transform
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn to_gpu(&self) -> GpuPrimitive {
        let (v, uv, n) = match &self.shape {
            Shape::Sphere { .. } | Shape::Box { .. } | Shape::DefaultVolume => {
                ([-1; 3], [-1; 3], [-1; 3])
            }
            Shape::Triangle(tri) => (
                tri.vertices.map(|i| i as i32),
                tri.uvs.map_or([-1; 3], |t| t.map(|i| i as i32)),
                tri.normals.map_or([-1; 3], |t| t.map(|i| i as i32)),
            ),
        };

        // nalgebra is column-major, which is the row-vector layout the shader expects
        let mut inverse_transform = [0.0; 16];
        inverse_transform.copy_from_slice(self.inverse_transform.as_slice());

        GpuPrimitive {
            kind: self.shape.kind() as i32,
            material_index: self.material_index as i32,
            params: self.params.into(),
            inverse_transform,
            aabb_min: self.aabb.min.coords.into(),
            aabb_max: self.aabb.max.coords.into(),
            vertices: v,
            uvs: uv,
            normals: n,
        }
    }
}

/// Primitive record for GPU storage (148 bytes).
/// Missing triangle indices are stored as -1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPrimitive {
    pub kind: i32,
    pub material_index: i32,
    pub params: [f32; 4],
    pub inverse_transform: [f32; 16],
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
    pub vertices: [i32; 3],
    pub uvs: [i32; 3],
    pub normals: [i32; 3],
}
