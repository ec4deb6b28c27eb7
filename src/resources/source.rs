//! Format independent scene description produced by the decoders.
//!
//! A [`SourceScene`] is what a [`SceneDecoder`] extracts from a file: a node
//! tree with local transforms, meshes with polygonal faces and materials made
//! of named properties and texture references. The importer only ever sees
//! this representation.

use std::{collections::HashMap, path::Path};

use cgmath::{Matrix4, SquareMatrix};

/// Kinds of texture a source material can reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Diffuse,
    Specular,
    Ambient,
    Emissive,
    Height,
    Normals,
    Shininess,
    Opacity,
    Displacement,
    Lightmap,
    Reflection,
    BaseColor,
    NormalCamera,
    EmissionColor,
    Metalness,
    DiffuseRoughness,
    AmbientOcclusion,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColorProperty {
    Diffuse,
    Specular,
    Emissive,
    Transparent,
    Reflective,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarProperty {
    Reflectivity,
    Opacity,
    Shininess,
    ShininessStrength,
    RefractiveIndex,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceMaterial {
    pub name: String,
    pub colors: HashMap<ColorProperty, [f32; 3]>,
    pub scalars: HashMap<ScalarProperty, f32>,
    /// Texture file names, relative to the scene file's directory.
    pub textures: HashMap<TextureKind, String>,
    /// Encoded images stored inside the scene file, keyed by the name their
    /// texture references use.
    pub embedded_images: HashMap<String, Vec<u8>>,
}

impl SourceMaterial {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn color(&self, property: ColorProperty, default: [f32; 3]) -> [f32; 3] {
        self.colors.get(&property).copied().unwrap_or(default)
    }

    pub fn scalar(&self, property: ScalarProperty, default: f32) -> f32 {
        self.scalars.get(&property).copied().unwrap_or(default)
    }

    pub fn texture(&self, kind: TextureKind) -> Option<&str> {
        self.textures.get(&kind).map(String::as_str)
    }

    pub fn with_color(mut self, property: ColorProperty, value: [f32; 3]) -> Self {
        self.colors.insert(property, value);
        self
    }

    pub fn with_scalar(mut self, property: ScalarProperty, value: f32) -> Self {
        self.scalars.insert(property, value);
        self
    }

    pub fn with_texture(mut self, kind: TextureKind, file: &str) -> Self {
        self.textures.insert(kind, file.to_string());
        self
    }

    pub fn embedded_image(&self, name: &str) -> Option<&[u8]> {
        self.embedded_images.get(name).map(Vec::as_slice)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    /// First UV channel only.
    pub tex_coords: Option<Vec<[f32; 2]>>,
    /// Polygons as index lists into `positions`.
    pub faces: Vec<Vec<u32>>,
    pub material: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceNode {
    pub name: String,
    pub transform: Matrix4<f32>,
    /// Indices into [`SourceScene::meshes`].
    pub meshes: Vec<usize>,
    pub children: Vec<SourceNode>,
}

impl Default for SourceNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            transform: Matrix4::identity(),
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceScene {
    pub root: SourceNode,
    pub meshes: Vec<SourceMesh>,
    pub materials: Vec<SourceMaterial>,
}

/// Turns a scene file into a [`SourceScene`].
pub trait SceneDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<SourceScene>;
}

impl<F> SceneDecoder for F
where
    F: Fn(&Path) -> anyhow::Result<SourceScene>,
{
    fn decode(&self, path: &Path) -> anyhow::Result<SourceScene> {
        self(path)
    }
}
