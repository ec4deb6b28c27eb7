//! Triangle meshes and their device buffers.
//!
//! [`MeshData`] is the host-side geometry: positions, optional normals,
//! optional single UV channel and triangle indices. A [`GeometryBuffer`]
//! wraps it together with a material and a model matrix and mirrors it into
//! device buffers the first time it is rendered after a change.

use std::f32::consts::PI;

use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector3, Zero};

use crate::device::{BufferUsage, MeshBinding, ProgramHandle, RenderDevice, ShaderParams};

use super::material::Material;

/// Uniform the model matrix is bound to.
pub const MODEL_UNIFORM: &str = "model";

const SPHERE_STACKS: u32 = 63;
const SPHERE_SLICES: u32 = 65;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    /// Empty or one normal per position.
    pub normals: Vec<[f32; 3]>,
    /// Empty or one UV pair per position.
    pub tex_coords: Vec<[f32; 2]>,
    pub triangles: Vec<[u32; 3]>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Fills in normals from the faces when none were supplied.
    pub fn ensure_normals(&mut self) {
        if self.normals.len() != self.positions.len() {
            self.normals = compute_normals(&self.positions, &self.triangles);
        }
    }

    /// UV sphere of radius `r` with poles on the Y axis.
    pub fn sphere(r: f32) -> Self {
        let stacks = SPHERE_STACKS;
        let slices = SPHERE_SLICES + 1;
        let mut data = MeshData::default();
        data.positions.push([0.0, r, 0.0]);
        data.normals.push([0.0, 1.0, 0.0]);
        data.tex_coords.push([0.5, 0.0]);
        for y in 1..stacks {
            let phi = PI / 2.0 - y as f32 * PI / stacks as f32;
            for x in 0..slices {
                let theta = x as f32 * 2.0 * PI / (slices - 1) as f32;
                let n = [phi.cos() * theta.sin(), phi.sin(), phi.cos() * theta.cos()];
                data.positions.push([n[0] * r, n[1] * r, n[2] * r]);
                data.normals.push(n);
                data.tex_coords
                    .push([x as f32 / (slices - 1) as f32, y as f32 / stacks as f32]);
            }
        }
        data.positions.push([0.0, -r, 0.0]);
        data.normals.push([0.0, -1.0, 0.0]);
        data.tex_coords.push([0.5, 1.0]);

        for x in 0..slices - 1 {
            data.triangles.push([0, x + 1, x + 2]);
        }
        for y in 0..stacks - 2 {
            for x in 0..slices - 1 {
                let here = 1 + y * slices + x;
                let below = 1 + (y + 1) * slices + x;
                data.triangles.push([here, below, below + 1]);
                data.triangles.push([here, below + 1, here + 1]);
            }
        }
        let y = stacks - 2;
        let last = 1 + (stacks - 1) * slices;
        for x in 0..slices - 1 {
            data.triangles
                .push([1 + y * slices + x, last, 1 + y * slices + x + 1]);
        }
        data
    }

    /// Unit quad in the XY plane facing +Z.
    pub fn quad() -> Self {
        Self {
            positions: vec![[-1.0, 1.0, 0.0], [-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            tex_coords: vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    pub fn triangle() -> Self {
        Self {
            positions: vec![[0.0, 1.0, 0.0], [-1.0, -1.0, 0.0], [1.0, -1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            tex_coords: vec![[0.5, 0.0], [0.0, 1.0], [1.0, 1.0]],
            triangles: vec![[0, 2, 1]],
        }
    }
}

/// Splits a polygon into triangles fanning out from its first index.
///
/// Faces with fewer than three indices produce nothing.
pub fn fan_triangulate(face: &[u32]) -> impl Iterator<Item = [u32; 3]> + '_ {
    let first = face.first().copied().unwrap_or_default();
    face.windows(2)
        .skip(1)
        .map(move |pair| [first, pair[0], pair[1]])
}

/// Area weighted vertex normals.
///
/// Each triangle adds its unnormalized face normal to its three corners and
/// the sums are normalized. Vertices no triangle touches keep a zero normal.
pub fn compute_normals(positions: &[[f32; 3]], triangles: &[[u32; 3]]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vector3::<f32>::zero(); positions.len()];
    for tri in triangles {
        let [a, b, c] = tri.map(|i| i as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let (pa, pb, pc): (Vector3<f32>, Vector3<f32>, Vector3<f32>) =
            (positions[a].into(), positions[b].into(), positions[c].into());
        let n = (pb - pa).cross(pc - pa);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| {
            if n.magnitude2() > 0.0 {
                n.normalize().into()
            } else {
                [0.0; 3]
            }
        })
        .collect()
}

/// A mesh with material and transform, mirrored lazily into device buffers.
#[derive(Debug)]
pub struct GeometryBuffer {
    pub name: String,
    pub model: Matrix4<f32>,
    pub visible: bool,
    pub material: Material,
    data: MeshData,
    dirty: bool,
    resident: Option<MeshBinding>,
}

impl Default for GeometryBuffer {
    fn default() -> Self {
        Self::new(MeshData::default())
    }
}

impl GeometryBuffer {
    pub fn new(data: MeshData) -> Self {
        let dirty = !data.is_empty();
        Self {
            name: String::new(),
            model: Matrix4::identity(),
            visible: true,
            material: Material::default(),
            data,
            dirty,
            resident: None,
        }
    }

    /// Replaces the host geometry; the device copy is refreshed on next render.
    pub fn set_data(&mut self, data: MeshData) {
        self.data = data;
        self.dirty = true;
    }

    /// Host geometry still waiting for upload. Empty once uploaded.
    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn binding(&self) -> Option<&MeshBinding> {
        self.resident.as_ref()
    }

    /// Uploads the host geometry and drops the host copy.
    ///
    /// Buffers are rewritten in place when vertex count, triangle count and
    /// the set of attributes match what is resident; otherwise they are
    /// recreated. A clean resident buffer, or one with no host data left, is
    /// left alone.
    pub fn create_or_update_device(&mut self, device: &mut dyn RenderDevice) {
        if self.resident.is_some() && (!self.dirty || self.data.is_empty()) {
            self.dirty = false;
            return;
        }
        let data = std::mem::take(&mut self.data);
        let vertex_count = data.positions.len() as u32;
        let index_count = data.triangles.len() as u32 * 3;
        let has_normals = data.normals.len() == data.positions.len();
        let has_tex_coords = data.tex_coords.len() == data.positions.len();

        match self.resident {
            Some(binding)
                if binding.vertex_count == vertex_count
                    && binding.index_count == index_count
                    && binding.normals.is_some() == has_normals
                    && binding.tex_coords.is_some() == has_tex_coords =>
            {
                log::debug!("Updating mesh {} in place", self.name);
                device.write_buffer(binding.positions, bytemuck::cast_slice(&data.positions));
                if let Some(normals) = binding.normals {
                    device.write_buffer(normals, bytemuck::cast_slice(&data.normals));
                }
                if let Some(tex_coords) = binding.tex_coords {
                    device.write_buffer(tex_coords, bytemuck::cast_slice(&data.tex_coords));
                }
                device.write_buffer(binding.indices, bytemuck::cast_slice(&data.triangles));
            }
            _ => {
                self.release(device);
                log::debug!(
                    "Allocating mesh {} ({} vertices, {} triangles)",
                    self.name,
                    vertex_count,
                    index_count / 3
                );
                let positions =
                    device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&data.positions));
                let normals = has_normals.then(|| {
                    device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&data.normals))
                });
                let tex_coords = has_tex_coords.then(|| {
                    device.create_buffer(BufferUsage::Vertex, bytemuck::cast_slice(&data.tex_coords))
                });
                let indices =
                    device.create_buffer(BufferUsage::Index, bytemuck::cast_slice(&data.triangles));
                self.resident = Some(MeshBinding {
                    positions,
                    normals,
                    tex_coords,
                    indices,
                    vertex_count,
                    index_count,
                });
            }
        }
        self.dirty = false;
    }

    /// Draws the mesh with `model` set to `parent * self.model`.
    ///
    /// Invisible meshes are skipped. A dirty mesh without vertices drops its
    /// device buffers instead of drawing.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        program: ProgramHandle,
        params: &mut ShaderParams,
        parent: Matrix4<f32>,
    ) {
        if !self.visible {
            return;
        }
        if self.resident.is_none() || self.dirty {
            if self.data.is_empty() {
                self.release(device);
                self.dirty = false;
                return;
            }
            self.create_or_update_device(device);
        }
        let Some(binding) = self.resident else {
            return;
        };
        params.set(MODEL_UNIFORM, parent * self.model);
        device.draw_indexed(program, &binding, params);
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(binding) = self.resident.take() {
            device.destroy_buffer(binding.positions);
            for buffer in [binding.normals, binding.tex_coords].into_iter().flatten() {
                device.destroy_buffer(buffer);
            }
            device.destroy_buffer(binding.indices);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    #[test]
    fn fans_from_first_index() {
        let tris: Vec<_> = fan_triangulate(&[4, 5, 6, 7]).collect();
        assert_eq!(tris, vec![[4, 5, 6], [4, 6, 7]]);
        let tris: Vec<_> = fan_triangulate(&[0, 1, 2, 3, 4]).collect();
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
        assert_eq!(fan_triangulate(&[1, 2]).count(), 0);
        assert_eq!(fan_triangulate(&[]).count(), 0);
    }

    #[test]
    fn synthesized_normals_are_unit_length() {
        let positions = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.3], [9.0, 9.0, 9.0]];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let normals = compute_normals(&positions, &triangles);
        for n in &normals[..4] {
            let len = Vector3::from(*n).magnitude();
            assert!((len - 1.0).abs() < 1e-5, "{n:?}");
        }
        // untouched vertex
        assert_eq!(normals[4], [0.0, 0.0, 0.0]);
        assert!((normals[1][2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn upload_releases_host_data() {
        let mut device = HeadlessDevice::new();
        let mut mesh = GeometryBuffer::new(MeshData::quad());
        assert!(mesh.is_dirty());
        mesh.create_or_update_device(&mut device);
        assert!(!mesh.is_dirty());
        assert!(mesh.data().is_empty());
        let binding = mesh.binding().copied().unwrap();
        assert_eq!((binding.vertex_count, binding.index_count), (4, 6));
        assert_eq!(device.stats().buffers_created, 4);
    }

    #[test]
    fn clean_mesh_is_not_uploaded_again() {
        let mut device = HeadlessDevice::new();
        let mut mesh = GeometryBuffer::new(MeshData::quad());
        mesh.create_or_update_device(&mut device);
        let first = mesh.binding().copied().unwrap();
        let stats = device.stats();

        mesh.create_or_update_device(&mut device);
        assert_eq!(mesh.binding().copied(), Some(first));
        assert_eq!(device.stats(), stats);
        assert_eq!(mesh.binding().unwrap().vertex_count, 4);
    }

    #[test]
    fn same_counts_update_buffers_in_place() {
        let mut device = HeadlessDevice::new();
        let mut mesh = GeometryBuffer::new(MeshData::quad());
        mesh.create_or_update_device(&mut device);
        let first = mesh.binding().copied().unwrap();

        let mut moved = MeshData::quad();
        for p in &mut moved.positions {
            p[2] = 2.0;
        }
        mesh.set_data(moved);
        mesh.create_or_update_device(&mut device);

        let stats = device.stats();
        assert_eq!(stats.buffers_created, 4);
        assert_eq!(stats.buffer_writes, 4);
        assert_eq!(mesh.binding().copied(), Some(first));
        let stored: Vec<[f32; 3]> =
            bytemuck::pod_collect_to_vec(device.buffer_data(first.positions).unwrap());
        assert_eq!(stored[0][2], 2.0);
    }

    #[test]
    fn different_counts_reallocate() {
        let mut device = HeadlessDevice::new();
        let mut mesh = GeometryBuffer::new(MeshData::quad());
        mesh.create_or_update_device(&mut device);
        let first = mesh.binding().copied().unwrap();

        mesh.set_data(MeshData::triangle());
        mesh.create_or_update_device(&mut device);

        let stats = device.stats();
        assert_eq!(stats.buffers_created, 8);
        assert_eq!(stats.buffers_destroyed, 4);
        assert_eq!(stats.buffer_writes, 0);
        let binding = mesh.binding().copied().unwrap();
        assert_ne!(binding.positions, first.positions);
        assert_eq!((binding.vertex_count, binding.index_count), (3, 3));
    }

    #[test]
    fn repeated_renders_draw_the_same_buffers() {
        let mut device = HeadlessDevice::new();
        let program = device.create_program("p", "src", "src").unwrap();
        let mut mesh = GeometryBuffer::new(MeshData::triangle());
        let mut params = ShaderParams::new();
        mesh.render(&mut device, program, &mut params, Matrix4::identity());
        mesh.render(&mut device, program, &mut params, Matrix4::identity());

        let draws = device.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].mesh, draws[1].mesh);
        assert_eq!(draws[1].mesh.vertex_count, 3);
        assert_eq!(device.stats().buffers_created, 4);
    }

    #[test]
    fn sphere_indices_are_in_range() {
        let sphere = MeshData::sphere(2.0);
        let n = sphere.positions.len() as u32;
        assert_eq!(n, 2 + (SPHERE_STACKS - 1) * (SPHERE_SLICES + 1));
        assert!(sphere.triangles.iter().flatten().all(|i| *i < n));
        assert_eq!(sphere.normals.len(), sphere.positions.len());
    }
}
