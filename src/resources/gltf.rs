//! glTF 2.0 scenes (`.gltf` with external buffers, or binary `.glb`).

use std::path::Path;

use anyhow::{Context, bail};
use cgmath::Matrix4;

use crate::data_structures::material::shininess_from_roughness;

use super::source::{
    ColorProperty, ScalarProperty, SceneDecoder, SourceMaterial, SourceMesh, SourceNode,
    SourceScene, TextureKind,
};

/// Roughness factors are clamped to this before conversion so a perfectly
/// smooth material maps to a finite exponent.
const MIN_ROUGHNESS: f32 = 0.05;

#[derive(Copy, Clone, Debug, Default)]
pub struct GltfDecoder;

impl SceneDecoder for GltfDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<SourceScene> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Could not read {}", path.display()))?;
        let gltf = gltf::Gltf::from_slice(&bytes)
            .with_context(|| format!("Could not parse {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let mut buffer_data: Vec<Vec<u8>> = Vec::new();
        for buffer in gltf.buffers() {
            match buffer.source() {
                gltf::buffer::Source::Bin => match gltf.blob.as_deref() {
                    Some(blob) => buffer_data.push(blob.into()),
                    None => bail!("Binary buffer {} has no blob", buffer.index()),
                },
                gltf::buffer::Source::Uri(uri) => {
                    if uri.starts_with("data:") {
                        bail!("Embedded data URIs are not supported ({})", path.display());
                    }
                    let file = base_dir.join(uri);
                    let bin = std::fs::read(&file)
                        .with_context(|| format!("Could not read buffer {}", file.display()))?;
                    buffer_data.push(bin);
                }
            }
        }

        let scene_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut scene = SourceScene {
            materials: gltf
                .materials()
                .map(|m| convert_material(&m, &scene_name, &buffer_data))
                .collect(),
            ..Default::default()
        };
        let mut default_material = None;

        // Each primitive is its own source mesh; this maps glTF mesh index to
        // the source meshes its primitives became.
        let mut primitives_of = Vec::with_capacity(gltf.meshes().len());
        for mesh in gltf.meshes() {
            let mut indices = Vec::new();
            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    log::warn!(
                        "Skipping primitive {} of mesh {:?}: mode {:?} is not supported",
                        primitive.index(),
                        mesh.name(),
                        primitive.mode()
                    );
                    continue;
                }
                let reader = primitive.reader(|buffer| Some(&buffer_data[buffer.index()]));
                let positions: Vec<[f32; 3]> = match reader.read_positions() {
                    Some(positions) => positions.collect(),
                    None => continue,
                };
                let normals = reader.read_normals().map(|n| n.collect());
                let tex_coords = reader
                    .read_tex_coords(0)
                    .map(|t| t.into_f32().map(|[u, v]| [u, 1.0 - v]).collect());
                let vertex_indices: Vec<u32> = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..positions.len() as u32).collect(),
                };
                let material = match primitive.material().index() {
                    Some(index) => index,
                    None => *default_material.get_or_insert_with(|| {
                        scene.materials.push(SourceMaterial::new("default"));
                        scene.materials.len() - 1
                    }),
                };
                indices.push(scene.meshes.len());
                scene.meshes.push(SourceMesh {
                    name: mesh.name().unwrap_or_default().to_string(),
                    positions,
                    normals,
                    tex_coords,
                    faces: vertex_indices.chunks_exact(3).map(<[u32]>::to_vec).collect(),
                    material,
                });
            }
            primitives_of.push(indices);
        }

        let Some(root) = gltf.default_scene().or_else(|| gltf.scenes().next()) else {
            bail!("{} contains no scene", path.display());
        };
        scene.root = SourceNode {
            name: root.name().unwrap_or_default().to_string(),
            children: root
                .nodes()
                .map(|node| convert_node(&node, &primitives_of))
                .collect(),
            ..Default::default()
        };
        Ok(scene)
    }
}

fn convert_node(node: &gltf::Node, primitives_of: &[Vec<usize>]) -> SourceNode {
    SourceNode {
        name: node.name().unwrap_or_default().to_string(),
        transform: Matrix4::from(node.transform().matrix()),
        meshes: node
            .mesh()
            .and_then(|mesh| primitives_of.get(mesh.index()).cloned())
            .unwrap_or_default(),
        children: node
            .children()
            .map(|child| convert_node(&child, primitives_of))
            .collect(),
    }
}

fn convert_material(
    material: &gltf::Material,
    scene_name: &str,
    buffer_data: &[Vec<u8>],
) -> SourceMaterial {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let mut source = SourceMaterial::new(material.name().unwrap_or_default())
        .with_color(ColorProperty::Diffuse, [r, g, b])
        .with_color(ColorProperty::Emissive, material.emissive_factor())
        .with_scalar(ScalarProperty::Opacity, a)
        .with_scalar(
            ScalarProperty::Shininess,
            shininess_from_roughness(pbr.roughness_factor().max(MIN_ROUGHNESS)),
        );

    let mut add = |texture: gltf::Texture, kinds: &[TextureKind]| {
        let Some((name, embedded)) = image_reference(&texture, scene_name, buffer_data) else {
            return;
        };
        if let Some(bytes) = embedded {
            source.embedded_images.insert(name.clone(), bytes);
        }
        for kind in kinds {
            source.textures.insert(*kind, name.clone());
        }
    };
    if let Some(info) = pbr.base_color_texture() {
        add(info.texture(), &[TextureKind::Diffuse, TextureKind::BaseColor]);
    }
    if let Some(info) = pbr.metallic_roughness_texture() {
        add(
            info.texture(),
            &[TextureKind::Metalness, TextureKind::DiffuseRoughness],
        );
    }
    if let Some(normal) = material.normal_texture() {
        add(normal.texture(), &[TextureKind::Normals]);
    }
    if let Some(occlusion) = material.occlusion_texture() {
        add(occlusion.texture(), &[TextureKind::AmbientOcclusion]);
    }
    if let Some(info) = material.emissive_texture() {
        add(info.texture(), &[TextureKind::Emissive]);
    }
    source
}

/// Name a texture's image is referenced by, plus its bytes when the image is
/// stored in a buffer view.
///
/// Buffer view images are named `<scene file>#image<N>` so they stay unique
/// per scene in the texture library.
fn image_reference(
    texture: &gltf::Texture,
    scene_name: &str,
    buffer_data: &[Vec<u8>],
) -> Option<(String, Option<Vec<u8>>)> {
    let image = texture.source();
    match image.source() {
        gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
            Some((uri.to_string(), None))
        }
        gltf::image::Source::Uri { .. } => {
            log::warn!(
                "Skipping data URI image {} of texture {}",
                image.index(),
                texture.index()
            );
            None
        }
        gltf::image::Source::View { view, .. } => {
            let start = view.offset();
            let end = start + view.length();
            let Some(bytes) = buffer_data
                .get(view.buffer().index())
                .and_then(|buffer| buffer.get(start..end))
            else {
                log::warn!(
                    "Image {} points outside buffer {}",
                    image.index(),
                    view.buffer().index()
                );
                return None;
            };
            Some((
                format!("{}#image{}", scene_name, image.index()),
                Some(bytes.to_vec()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, path::PathBuf};

    use super::*;
    use crate::{
        data_structures::{material::MaterialSlot, texture_library::normalize_path},
        resources::import::{ImportContext, import_scene},
    };

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 128, 255, 255]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// One mesh with two primitives under a root node with an empty child.
    /// The first primitive has UVs, indices and a material whose base colour
    /// image is a file and whose metallic-roughness image lives in the buffer.
    /// The second has neither material nor indices.
    fn write_scene(dir_name: &str) -> (PathBuf, Vec<u8>) {
        let dir = std::env::temp_dir().join(format!("{}-{}", dir_name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let tex_coords: [f32; 6] = [0.0, 0.0, 1.0, 0.25, 0.0, 1.0];
        let indices: [u32; 3] = [0, 1, 2];
        let png = png_bytes();
        let mut bin = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&positions[..]));
        bin.extend_from_slice(bytemuck::cast_slice(&tex_coords[..]));
        bin.extend_from_slice(bytemuck::cast_slice(&indices[..]));
        bin.extend_from_slice(&png);
        std::fs::write(dir.join("scene.bin"), &bin).unwrap();

        let json = format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "name": "main", "nodes": [0] }}],
  "nodes": [
    {{ "name": "body", "mesh": 0, "children": [1] }},
    {{ "name": "marker" }}
  ],
  "meshes": [{{
    "name": "hull",
    "primitives": [
      {{ "attributes": {{ "POSITION": 0, "TEXCOORD_0": 1 }}, "indices": 2, "material": 0 }},
      {{ "attributes": {{ "POSITION": 0 }} }}
    ]
  }}],
  "materials": [{{
    "name": "painted",
    "pbrMetallicRoughness": {{
      "baseColorFactor": [0.5, 0.25, 1.0, 0.75],
      "baseColorTexture": {{ "index": 0 }},
      "metallicRoughnessTexture": {{ "index": 1 }},
      "roughnessFactor": 0.0
    }}
  }}],
  "textures": [{{ "source": 0 }}, {{ "source": 1 }}],
  "images": [
    {{ "uri": "albedo.png" }},
    {{ "bufferView": 3, "mimeType": "image/png" }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC2" }},
    {{ "bufferView": 2, "componentType": 5125, "count": 3, "type": "SCALAR" }}
  ],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 24 }},
    {{ "buffer": 0, "byteOffset": 60, "byteLength": 12 }},
    {{ "buffer": 0, "byteOffset": 72, "byteLength": {png_len} }}
  ],
  "buffers": [{{ "uri": "scene.bin", "byteLength": {bin_len} }}]
}}"#,
            png_len = png.len(),
            bin_len = bin.len(),
        );
        std::fs::write(dir.join("scene.gltf"), json).unwrap();
        (dir, png)
    }

    #[test]
    fn decodes_meshes_materials_and_nodes() {
        let (dir, png) = write_scene("view-ngin-gltf-decode");
        let scene = GltfDecoder.decode(&dir.join("scene.gltf")).unwrap();

        // each primitive is a mesh; the node lists both
        assert_eq!(scene.meshes.len(), 2);
        assert_eq!(scene.root.name, "main");
        let body = &scene.root.children[0];
        assert_eq!(body.name, "body");
        assert_eq!(body.meshes, vec![0, 1]);
        assert!(body.children[0].meshes.is_empty());

        let textured = &scene.meshes[0];
        assert_eq!(textured.name, "hull");
        assert_eq!(textured.faces, vec![vec![0, 1, 2]]);
        assert_eq!(
            textured.tex_coords,
            Some(vec![[0.0, 1.0], [1.0, 0.75], [0.0, 0.0]])
        );
        assert!(textured.normals.is_none());

        let plain = &scene.meshes[1];
        assert_eq!(plain.faces, vec![vec![0, 1, 2]]);
        assert!(plain.tex_coords.is_none());
        assert_eq!(scene.materials[plain.material].name, "default");
        assert_eq!(scene.materials.len(), 2);

        let material = &scene.materials[textured.material];
        assert_eq!(material.name, "painted");
        assert_eq!(material.color(ColorProperty::Diffuse, [0.0; 3]), [0.5, 0.25, 1.0]);
        assert_eq!(material.scalar(ScalarProperty::Opacity, 0.0), 0.75);
        assert_eq!(
            material.scalar(ScalarProperty::Shininess, 0.0),
            shininess_from_roughness(MIN_ROUGHNESS)
        );
        assert_eq!(material.texture(TextureKind::Diffuse), Some("albedo.png"));
        assert_eq!(material.texture(TextureKind::BaseColor), Some("albedo.png"));
        assert_eq!(material.texture(TextureKind::Metalness), Some("scene.gltf#image1"));
        assert_eq!(
            material.texture(TextureKind::DiffuseRoughness),
            Some("scene.gltf#image1")
        );
        assert_eq!(material.embedded_image("scene.gltf#image1"), Some(png.as_slice()));
        assert_eq!(material.embedded_image("albedo.png"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn embedded_image_is_imported_under_its_scene_key() {
        let (dir, _) = write_scene("view-ngin-gltf-import");
        let mut ctx = ImportContext::new(4096);
        let range = import_scene(&dir.join("scene.gltf"), &mut ctx, &GltfDecoder);
        assert!(!range.is_empty());
        assert_eq!(ctx.meshes.len(), 2);

        // albedo.png was never written, only the buffer image loads
        assert_eq!(ctx.textures.len(), 1);
        let key = normalize_path(&dir.join("scene.gltf#image1").to_string_lossy());
        let id = ctx.textures.search(&key);
        assert!(id.is_some());

        let material = &ctx.meshes[0].material;
        assert_eq!(material.texture(MaterialSlot::Diffuse), None);
        assert_eq!(material.texture(MaterialSlot::Metalness), id);
        assert_eq!(material.texture(MaterialSlot::Roughness), id);
        assert!(!material.roughness_map_inverted);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(GltfDecoder.decode(Path::new("no/such/scene.gltf")).is_err());
    }
}
