//! Flattens a decoded [`SourceScene`] into geometry buffers and materials.
//!
//! The node tree is walked depth first. Each mesh a node references becomes
//! one [`GeometryBuffer`] whose vertices are already transformed into world
//! space, so the buffers carry an identity model matrix. Texture references
//! are resolved through the context's [`TextureLibrary`].

use std::path::Path;

use cgmath::{Matrix4, Point3, SquareMatrix, Transform, Vector3, Vector4};

use crate::{
    data_structures::{
        material::{roughness_from_shininess, Material, MaterialSlot},
        mesh::{compute_normals, fan_triangulate, GeometryBuffer, MeshData},
        range::Range3,
        texture_library::{normalize_path, TextureId, TextureLibrary},
    },
    device::{ColorSpace, RenderDevice},
    resources::{
        image::{FileImageDecoder, ImageDecoder, MemoryImageDecoder},
        source::{
            ColorProperty, ScalarProperty, SceneDecoder, SourceMaterial, SourceMesh, SourceNode,
            SourceScene, TextureKind,
        },
    },
};

const DEFAULT_DIFFUSE: [f32; 3] = [1.0, 0.3, 0.0];
const DEFAULT_SPECULAR: [f32; 3] = [1.0, 1.0, 1.0];
const DEFAULT_EMISSIVE: [f32; 3] = [0.0, 0.0, 0.0];
const DEFAULT_TRANSPARENT: [f32; 3] = [0.0, 0.0, 0.0];
const DEFAULT_REFLECTIVE: [f32; 3] = [1.0, 1.0, 1.0];
const DEFAULT_REFLECTIVITY: f32 = 1.0;
const DEFAULT_OPACITY: f32 = 1.0;
const DEFAULT_SHININESS: f32 = 100.0;
const DEFAULT_STRENGTH: f32 = 1.0;
const DEFAULT_REFRACTIVE_INDEX: f32 = 1.48;

/// Where a source texture kind lands on a [`Material`].
#[derive(Copy, Clone, Debug)]
struct SlotRule {
    kind: TextureKind,
    slot: Option<MaterialSlot>,
    color_space: ColorSpace,
    /// `Some` when the rule also decides whether the roughness map is inverted.
    roughness_inverted: Option<bool>,
}

const fn rule(kind: TextureKind, slot: MaterialSlot, color_space: ColorSpace) -> SlotRule {
    SlotRule {
        kind,
        slot: Some(slot),
        color_space,
        roughness_inverted: None,
    }
}

/// Checked in this order. Later kinds that land on the same slot replace
/// earlier ones.
const SLOT_RULES: [SlotRule; 16] = [
    rule(TextureKind::Diffuse, MaterialSlot::Diffuse, ColorSpace::Srgb),
    rule(TextureKind::Specular, MaterialSlot::Specular, ColorSpace::Srgb),
    rule(TextureKind::Emissive, MaterialSlot::Emission, ColorSpace::Srgb),
    rule(TextureKind::Height, MaterialSlot::Bump, ColorSpace::Srgb),
    rule(TextureKind::Normals, MaterialSlot::Normal, ColorSpace::Linear),
    SlotRule {
        kind: TextureKind::Shininess,
        slot: Some(MaterialSlot::Roughness),
        color_space: ColorSpace::Srgb,
        roughness_inverted: Some(true),
    },
    rule(TextureKind::Opacity, MaterialSlot::Opacity, ColorSpace::Srgb),
    rule(TextureKind::Displacement, MaterialSlot::Bump, ColorSpace::Srgb),
    // light maps are recognised but not used
    SlotRule {
        kind: TextureKind::Lightmap,
        slot: None,
        color_space: ColorSpace::Linear,
        roughness_inverted: None,
    },
    rule(TextureKind::Reflection, MaterialSlot::Specular, ColorSpace::Srgb),
    rule(TextureKind::BaseColor, MaterialSlot::Diffuse, ColorSpace::Srgb),
    rule(TextureKind::NormalCamera, MaterialSlot::Normal, ColorSpace::Linear),
    rule(TextureKind::EmissionColor, MaterialSlot::Emission, ColorSpace::Srgb),
    rule(TextureKind::Metalness, MaterialSlot::Metalness, ColorSpace::Linear),
    SlotRule {
        kind: TextureKind::DiffuseRoughness,
        slot: Some(MaterialSlot::Roughness),
        color_space: ColorSpace::Linear,
        roughness_inverted: Some(false),
    },
    rule(TextureKind::AmbientOcclusion, MaterialSlot::AmbientOcclusion, ColorSpace::Linear),
];

/// Everything an import writes into, owned by the caller across imports.
pub struct ImportContext {
    pub textures: TextureLibrary,
    pub meshes: Vec<GeometryBuffer>,
    pub image_decoder: Box<dyn ImageDecoder>,
}

impl ImportContext {
    pub fn new(max_texture_dimension: u32) -> Self {
        Self::with_image_decoder(max_texture_dimension, Box::new(FileImageDecoder))
    }

    pub fn with_image_decoder(
        max_texture_dimension: u32,
        image_decoder: Box<dyn ImageDecoder>,
    ) -> Self {
        Self {
            textures: TextureLibrary::new(max_texture_dimension),
            meshes: Vec::new(),
            image_decoder,
        }
    }

    /// Drops every mesh and texture, freeing their device objects.
    pub fn clear(&mut self, device: &mut dyn RenderDevice) {
        for mesh in &mut self.meshes {
            mesh.release(device);
        }
        self.meshes.clear();
        self.textures.clear(device);
    }
}

/// Imports the scene at `path`, appending its meshes to `ctx.meshes`.
///
/// Returns the world space bounds of everything imported. A scene that cannot
/// be decoded is logged and yields an empty range with nothing appended.
pub fn import_scene(path: &Path, ctx: &mut ImportContext, decoder: &dyn SceneDecoder) -> Range3 {
    let start = instant::Instant::now();
    let scene = match decoder.decode(path) {
        Ok(scene) => scene,
        Err(e) => {
            log::warn!("Could not load scene {}: {:#}", path.display(), e);
            return Range3::new();
        }
    };
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let meshes_before = ctx.meshes.len();
    let textures_before = ctx.textures.len();

    let range = convert_node(&scene.root, &scene, base_dir, ctx, Matrix4::identity());

    log::info!(
        "Imported {}: {} meshes, {} new textures, bounds {:?}..{:?} in {:?}",
        path.display(),
        ctx.meshes.len() - meshes_before,
        ctx.textures.len() - textures_before,
        range.min(),
        range.max(),
        start.elapsed()
    );
    range
}

fn convert_node(
    node: &SourceNode,
    scene: &SourceScene,
    base_dir: &Path,
    ctx: &mut ImportContext,
    parent: Matrix4<f32>,
) -> Range3 {
    let transform = parent * node.transform;
    let mut range = Range3::new();
    for &index in &node.meshes {
        match scene.meshes.get(index) {
            Some(mesh) => range.merge(&convert_mesh(mesh, scene, base_dir, ctx, &transform)),
            None => log::warn!("Node {} references missing mesh {}", node.name, index),
        }
    }
    for child in &node.children {
        range.merge(&convert_node(child, scene, base_dir, ctx, transform));
    }
    range
}

fn convert_mesh(
    mesh: &SourceMesh,
    scene: &SourceScene,
    base_dir: &Path,
    ctx: &mut ImportContext,
    transform: &Matrix4<f32>,
) -> Range3 {
    let positions: Vec<[f32; 3]> = mesh
        .positions
        .iter()
        .map(|p| transform.transform_point(Point3::from(*p)).into())
        .collect();
    let range: Range3 = positions.iter().copied().map(Point3::from).collect();

    let triangles: Vec<[u32; 3]> = mesh
        .faces
        .iter()
        .flat_map(|face| fan_triangulate(face))
        .collect();

    let normals = match &mesh.normals {
        Some(normals) if normals.len() == positions.len() => normals.clone(),
        _ => compute_normals(&positions, &triangles),
    };
    let tex_coords = match &mesh.tex_coords {
        Some(tex_coords) if tex_coords.len() == positions.len() => tex_coords.clone(),
        _ => Vec::new(),
    };

    let source_material = scene.materials.get(mesh.material).cloned().unwrap_or_else(|| {
        log::warn!("Mesh {} uses missing material {}", mesh.name, mesh.material);
        SourceMaterial::default()
    });

    let mut buffer = GeometryBuffer::new(MeshData {
        positions,
        normals,
        tex_coords,
        triangles,
    });
    buffer.name = mesh.name.clone();
    buffer.material = convert_material(&source_material, base_dir, ctx);
    ctx.meshes.push(buffer);
    range
}

/// Builds a [`Material`] from source properties, loading its textures.
pub fn convert_material(
    source: &SourceMaterial,
    base_dir: &Path,
    ctx: &mut ImportContext,
) -> Material {
    let diffuse = source.color(ColorProperty::Diffuse, DEFAULT_DIFFUSE);
    let specular = source.color(ColorProperty::Specular, DEFAULT_SPECULAR);
    let _emissive = source.color(ColorProperty::Emissive, DEFAULT_EMISSIVE);
    let _transparent = source.color(ColorProperty::Transparent, DEFAULT_TRANSPARENT);
    let reflective = source.color(ColorProperty::Reflective, DEFAULT_REFLECTIVE);

    let reflectivity = source.scalar(ScalarProperty::Reflectivity, DEFAULT_REFLECTIVITY);
    let opacity = source.scalar(ScalarProperty::Opacity, DEFAULT_OPACITY);
    let shininess = source.scalar(ScalarProperty::Shininess, DEFAULT_SHININESS);
    let strength = source.scalar(ScalarProperty::ShininessStrength, DEFAULT_STRENGTH);
    let refractive_index =
        source.scalar(ScalarProperty::RefractiveIndex, DEFAULT_REFRACTIVE_INDEX);

    let specular = Vector3::from(specular) * strength * reflectivity;
    let mut material = Material {
        name: source.name.clone(),
        diffuse: Vector4::new(diffuse[0], diffuse[1], diffuse[2], opacity),
        specular: Vector3::new(
            specular.x * reflective[0],
            specular.y * reflective[1],
            specular.z * reflective[2],
        ),
        refractive_index: Vector3::new(refractive_index, refractive_index, refractive_index),
        roughness: roughness_from_shininess(shininess),
        ..Default::default()
    };

    let ImportContext {
        textures,
        image_decoder,
        ..
    } = ctx;
    for rule in SLOT_RULES {
        let Some(file) = source.texture(rule.kind) else {
            continue;
        };
        let Some(slot) = rule.slot else {
            log::debug!("Ignoring {:?} texture {}", rule.kind, file);
            continue;
        };
        let path = normalize_path(&base_dir.join(file).to_string_lossy());
        let id = match source.embedded_image(file) {
            Some(bytes) => {
                resolve_texture(textures, &path, rule.color_space, &MemoryImageDecoder(bytes))
            }
            None => resolve_texture(textures, &path, rule.color_space, &**image_decoder),
        };
        material.set_texture(slot, id);
        if let Some(inverted) = rule.roughness_inverted {
            material.roughness_map_inverted = inverted;
        }
    }
    material
}

fn resolve_texture(
    textures: &mut TextureLibrary,
    path: &str,
    color_space: ColorSpace,
    decoder: &dyn ImageDecoder,
) -> Option<TextureId> {
    let id = textures.test_and_load(path, color_space, decoder);
    if id.is_none() {
        log::warn!("Texture {} is missing, leaving the slot empty", path);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_has_a_rule() {
        for slot in MaterialSlot::ALL {
            assert!(
                SLOT_RULES.iter().any(|r| r.slot == Some(slot)),
                "{slot:?} is never filled"
            );
        }
    }

    #[test]
    fn synonyms_come_after_their_primary_kind() {
        let position = |kind| SLOT_RULES.iter().position(|r| r.kind == kind).unwrap();
        assert!(position(TextureKind::Specular) < position(TextureKind::Reflection));
        assert!(position(TextureKind::Diffuse) < position(TextureKind::BaseColor));
        assert!(position(TextureKind::Shininess) < position(TextureKind::DiffuseRoughness));
        assert!(position(TextureKind::Height) < position(TextureKind::Displacement));
    }

    #[test]
    fn default_material_properties() {
        let mut ctx = ImportContext::new(1024);
        let material = convert_material(&SourceMaterial::new("plain"), Path::new(""), &mut ctx);
        assert_eq!(material.name, "plain");
        assert_eq!(material.diffuse, Vector4::new(1.0, 0.3, 0.0, 1.0));
        assert_eq!(material.specular, Vector3::new(1.0, 1.0, 1.0));
        assert!((material.roughness - (2.0f32 / 102.0).powf(0.25)).abs() < 1e-6);
        assert!((material.refractive_index.x - 1.48).abs() < 1e-6);
        assert!(ctx.textures.is_empty());
    }

    #[test]
    fn specular_combines_strength_reflectivity_and_reflective() {
        let mut ctx = ImportContext::new(1024);
        let source = SourceMaterial::new("shiny")
            .with_color(ColorProperty::Specular, [0.5, 1.0, 1.0])
            .with_color(ColorProperty::Reflective, [1.0, 0.5, 1.0])
            .with_scalar(ScalarProperty::ShininessStrength, 2.0)
            .with_scalar(ScalarProperty::Reflectivity, 0.5)
            .with_scalar(ScalarProperty::Opacity, 0.25);
        let material = convert_material(&source, Path::new(""), &mut ctx);
        assert_eq!(material.specular, Vector3::new(0.5, 0.5, 1.0));
        assert_eq!(material.diffuse.w, 0.25);
    }
}
