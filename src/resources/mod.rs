/**
 * This module contains all logic for loading scenes and images from external files
 * and turning them into meshes, materials and textures.
 */
pub mod gltf;
pub mod image;
pub mod import;
pub mod obj;
pub mod source;

use std::path::Path;

use anyhow::bail;

use self::{
    gltf::GltfDecoder,
    obj::ObjDecoder,
    source::{SceneDecoder, SourceScene},
};

/// Picks the decoder from the file extension.
#[derive(Copy, Clone, Debug, Default)]
pub struct AnySceneDecoder;

impl SceneDecoder for AnySceneDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<SourceScene> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "gltf" | "glb" => GltfDecoder.decode(path),
            "obj" => ObjDecoder.decode(path),
            other => bail!("Unsupported scene format {:?} ({})", other, path.display()),
        }
    }
}
