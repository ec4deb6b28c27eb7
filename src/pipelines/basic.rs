use cgmath::{Matrix, Matrix3, Matrix4, SquareMatrix, Vector4};

use crate::device::ShaderParams;

/// WGSL source of the viewer's shading program. Holds both `vs_main` and `fs_main`.
pub const BASIC_SHADER: &str = include_str!("basic.wgsl");

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];

/// One buffer per attribute: positions, normals, texture coordinates.
pub fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &NORMAL_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEX_COORD_ATTRIBUTES,
        },
    ]
}

/// Uniform block shared by every program the wgpu device runs.
///
/// Named shader parameters are packed into it by [`DrawUniforms::from_params`];
/// names the block has no field for are ignored.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub light_position: [f32; 4],
    pub light_color: [f32; 4],
    pub viewport: [f32; 4],
    pub params: [f32; 4],
}

impl DrawUniforms {
    pub fn from_params(params: &ShaderParams) -> Self {
        let identity = Matrix4::<f32>::identity();
        let model = params.mat4("model").unwrap_or(identity);
        let linear = Matrix3::from_cols(model.x.truncate(), model.y.truncate(), model.z.truncate());
        let normal_matrix: Matrix4<f32> = linear
            .invert()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix3::identity)
            .into();
        let point = |name: &str| {
            params
                .vec3(name)
                .map(|v| v.extend(1.0))
                .unwrap_or(Vector4::new(0.0, 0.0, 0.0, 1.0))
        };
        let viewport = match params.get("viewport") {
            Some(crate::device::UniformValue::Vec2(v)) => [v.x, v.y],
            _ => [1.0, 1.0],
        };
        Self {
            model: model.into(),
            normal_matrix: normal_matrix.into(),
            view: params.mat4("view").unwrap_or(identity).into(),
            projection: params.mat4("projection").unwrap_or(identity).into(),
            camera_position: point("camera_position").into(),
            light_position: point("light_position").into(),
            light_color: params
                .vec3("light_color")
                .map(|c| c.extend(1.0))
                .unwrap_or(Vector4::new(1.0, 1.0, 1.0, 1.0))
                .into(),
            viewport: [
                viewport[0],
                viewport[1],
                params.float("z_near").unwrap_or(0.1),
                params.float("z_far").unwrap_or(1000.0),
            ],
            params: [
                params.float("roughness").unwrap_or(0.5),
                params.float("diffuse_enabled").unwrap_or(0.0),
                0.0,
                0.0,
            ],
        }
    }
}

pub fn uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("draw_uniform_layout"),
    })
}

pub fn texture_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
        label: Some("diffuse_texture_layout"),
    })
}

/// Depth setup of a pipeline: the attachment format and whether testing is on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepthMode {
    pub format: wgpu::TextureFormat,
    pub test: bool,
}

pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    color_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    depth: Option<DepthMode>,
    cull_mode: Option<wgpu::Face>,
) -> wgpu::RenderPipeline {
    let vertex_layouts = vertex_layouts();
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Render Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: Some("vs_main"),
            buffers: &vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: depth.map(|depth| wgpu::DepthStencilState {
            format: depth.format,
            depth_write_enabled: Some(depth.test),
            depth_compare: Some(if depth.test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            }),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

#[cfg(test)]
mod tests {
    use cgmath::{Vector2, Vector3};

    use super::*;

    #[test]
    fn packs_named_parameters() {
        let mut params = ShaderParams::new();
        params
            .set("model", Matrix4::from_scale(2.0f32))
            .set("viewport", Vector2::new(800.0f32, 600.0))
            .set("z_near", 0.5f32)
            .set("light_color", Vector3::new(3.0f32, 2.0, 1.0))
            .set("roughness", 0.25f32)
            .set("diffuse_enabled", true);
        let uniforms = DrawUniforms::from_params(&params);
        assert_eq!(uniforms.model[0][0], 2.0);
        assert_eq!(uniforms.normal_matrix[0][0], 0.5);
        assert_eq!(uniforms.viewport, [800.0, 600.0, 0.5, 1000.0]);
        assert_eq!(uniforms.light_color, [3.0, 2.0, 1.0, 1.0]);
        assert_eq!(uniforms.params, [0.25, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn uniform_block_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<DrawUniforms>() % 16, 0);
    }
}
