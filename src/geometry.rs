//! Proxy sphere generation.
//!
//! Vertices carry position, normal, UV and a longitude tangent so normal maps
//! can be applied in tangent space. The sphere's north pole is +Y and the
//! viewer looks down −Z, so +Z is the visible hemisphere.

use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};

/// Radius of the single-preview sphere.
pub const SPHERE_RADIUS: f32 = 0.9;
/// Radius of each sphere in the comparison layout.
pub const DUAL_SPHERE_RADIUS: f32 = 0.45;
/// Horizontal offset of the comparison spheres from the origin.
pub const DUAL_SPHERE_OFFSET: f32 = 0.5;

pub const DEFAULT_STACKS: u32 = 30;
pub const DEFAULT_SECTORS: u32 = 30;

/// Interleaved vertex, 11 floats. Matches `VertexInput` in `layer_common.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
}

/// Indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Append another mesh, rebasing its indices.
    pub fn append(&mut self, other: MeshData) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices.extend(other.indices.into_iter().map(|index| index + base));
    }
}

pub struct GeometryEngine;

impl GeometryEngine {
    /// UV sphere with `(stacks + 1) * (sectors + 1)` vertices; the seam column
    /// is duplicated so UVs stay continuous.
    pub fn sphere(radius: f32, stacks: u32, sectors: u32, offset_x: f32) -> MeshData {
        let stacks = stacks.max(2);
        let sectors = sectors.max(3);

        let mut vertices = Vec::with_capacity(((stacks + 1) * (sectors + 1)) as usize);
        for i in 0..=stacks {
            let lat = PI * i as f32 / stacks as f32;
            let y = lat.cos();
            let ring = lat.sin();
            for j in 0..=sectors {
                let lon = 2.0 * PI * j as f32 / sectors as f32;
                let x = ring * lon.cos();
                let z = ring * lon.sin();
                vertices.push(Vertex {
                    position: [x * radius + offset_x, y * radius, z * radius],
                    normal: [x, y, z],
                    uv: [j as f32 / sectors as f32, i as f32 / stacks as f32],
                    tangent: [-lon.sin(), 0.0, lon.cos()],
                });
            }
        }

        let mut indices = Vec::with_capacity((stacks * sectors * 6) as usize);
        for i in 0..stacks {
            for j in 0..sectors {
                let first = i * (sectors + 1) + j;
                let second = first + sectors + 1;
                indices.extend_from_slice(&[first, second, first + 1, second, second + 1, first + 1]);
            }
        }

        MeshData { vertices, indices }
    }

    /// The single-preview sphere.
    pub fn preview_sphere() -> MeshData {
        Self::sphere(SPHERE_RADIUS, DEFAULT_STACKS, DEFAULT_SECTORS, 0.0)
    }

    /// Two spheres side by side, sized to fill the comparison content box.
    /// The left one shows the matcap alone; the right one receives the normal
    /// map when one is enabled.
    pub fn comparison_spheres() -> MeshData {
        let mut mesh = Self::sphere(
            DUAL_SPHERE_RADIUS,
            DEFAULT_STACKS,
            DEFAULT_SECTORS,
            -DUAL_SPHERE_OFFSET,
        );
        mesh.append(Self::sphere(
            DUAL_SPHERE_RADIUS,
            DEFAULT_STACKS,
            DEFAULT_SECTORS,
            DUAL_SPHERE_OFFSET,
        ));
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length(v: [f32; 3]) -> f32 {
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    #[test]
    fn vertex_is_eleven_floats() {
        assert_eq!(std::mem::size_of::<Vertex>(), 11 * 4);
    }

    #[test]
    fn sphere_has_expected_counts() {
        let mesh = GeometryEngine::sphere(1.0, 30, 30, 0.0);
        assert_eq!(mesh.vertices.len(), 31 * 31);
        assert_eq!(mesh.triangle_count(), 30 * 30 * 2);
        let max_index = mesh.indices.iter().copied().max().unwrap_or(0);
        assert!((max_index as usize) < mesh.vertices.len());
    }

    #[test]
    fn normals_are_unit_length_and_positions_on_radius() {
        let mesh = GeometryEngine::preview_sphere();
        for vertex in &mesh.vertices {
            assert!((length(vertex.normal) - 1.0).abs() < 1e-4);
            assert!((length(vertex.position) - SPHERE_RADIUS).abs() < 1e-4);
        }
    }

    #[test]
    fn tangents_are_perpendicular_to_normals() {
        let mesh = GeometryEngine::sphere(1.0, 12, 16, 0.0);
        for vertex in &mesh.vertices {
            let n = vertex.normal;
            let t = vertex.tangent;
            let dot = n[0] * t[0] + n[1] * t[1] + n[2] * t[2];
            assert!(dot.abs() < 1e-4, "tangent not orthogonal: {dot}");
        }
    }

    #[test]
    fn uvs_span_unit_square() {
        let mesh = GeometryEngine::sphere(1.0, 8, 8, 0.0);
        let first = mesh.vertices.first().expect("vertices");
        let last = mesh.vertices.last().expect("vertices");
        assert_eq!(first.uv, [0.0, 0.0]);
        assert_eq!(last.uv, [1.0, 1.0]);
    }

    #[test]
    fn comparison_spheres_fit_content_box() {
        let mesh = GeometryEngine::comparison_spheres();
        let single = GeometryEngine::preview_sphere();
        assert_eq!(mesh.vertices.len(), single.vertices.len() * 2);
        assert_eq!(mesh.indices.len(), single.indices.len() * 2);

        let max_x = mesh
            .vertices
            .iter()
            .map(|v| v.position[0].abs())
            .fold(0.0_f32, f32::max);
        let max_y = mesh
            .vertices
            .iter()
            .map(|v| v.position[1].abs())
            .fold(0.0_f32, f32::max);
        assert!(max_x <= 0.95 + 1e-5);
        assert!(max_y <= 0.45 + 1e-5);

        let right_half = &mesh.vertices[single.vertices.len()..];
        assert!(right_half.iter().all(|v| v.position[0] >= 0.05 - 1e-5));
        let second_half_indices = &mesh.indices[single.indices.len()..];
        assert!(second_half_indices
            .iter()
            .all(|index| (*index as usize) >= single.vertices.len()));
    }
}
