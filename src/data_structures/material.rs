//! Shading parameters of an imported mesh.
//!
//! Textures are referenced by [`TextureId`] into the scene's
//! [`TextureLibrary`](super::texture_library::TextureLibrary); a material never
//! owns image data, so one decoded image can back any number of materials.

use cgmath::{Vector3, Vector4};

use super::texture_library::TextureId;

/// The nine texture channels a material can reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaterialSlot {
    Diffuse,
    Specular,
    Bump,
    Normal,
    Emission,
    Roughness,
    Opacity,
    Metalness,
    AmbientOcclusion,
}

impl MaterialSlot {
    pub const ALL: [MaterialSlot; 9] = [
        MaterialSlot::Diffuse,
        MaterialSlot::Specular,
        MaterialSlot::Bump,
        MaterialSlot::Normal,
        MaterialSlot::Emission,
        MaterialSlot::Roughness,
        MaterialSlot::Opacity,
        MaterialSlot::Metalness,
        MaterialSlot::AmbientOcclusion,
    ];
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    /// RGB plus opacity.
    pub diffuse: Vector4<f32>,
    pub specular: Vector3<f32>,
    pub refractive_index: Vector3<f32>,
    pub roughness: f32,
    pub diffuse_texture: Option<TextureId>,
    pub specular_texture: Option<TextureId>,
    pub bump_texture: Option<TextureId>,
    pub normal_texture: Option<TextureId>,
    pub emission_texture: Option<TextureId>,
    pub roughness_texture: Option<TextureId>,
    pub opacity_texture: Option<TextureId>,
    pub metalness_texture: Option<TextureId>,
    pub ambient_occlusion_texture: Option<TextureId>,
    /// The roughness map stores glossiness and must be inverted when sampled.
    pub roughness_map_inverted: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: Vector4::new(1.0, 0.3, 0.0, 1.0),
            specular: Vector3::new(1.0, 1.0, 1.0),
            refractive_index: Vector3::new(1.48, 1.48, 1.48),
            roughness: 0.3,
            diffuse_texture: None,
            specular_texture: None,
            bump_texture: None,
            normal_texture: None,
            emission_texture: None,
            roughness_texture: None,
            opacity_texture: None,
            metalness_texture: None,
            ambient_occlusion_texture: None,
            roughness_map_inverted: false,
        }
    }
}

impl Material {
    pub fn texture(&self, slot: MaterialSlot) -> Option<TextureId> {
        match slot {
            MaterialSlot::Diffuse => self.diffuse_texture,
            MaterialSlot::Specular => self.specular_texture,
            MaterialSlot::Bump => self.bump_texture,
            MaterialSlot::Normal => self.normal_texture,
            MaterialSlot::Emission => self.emission_texture,
            MaterialSlot::Roughness => self.roughness_texture,
            MaterialSlot::Opacity => self.opacity_texture,
            MaterialSlot::Metalness => self.metalness_texture,
            MaterialSlot::AmbientOcclusion => self.ambient_occlusion_texture,
        }
    }

    pub fn set_texture(&mut self, slot: MaterialSlot, texture: Option<TextureId>) {
        let field = match slot {
            MaterialSlot::Diffuse => &mut self.diffuse_texture,
            MaterialSlot::Specular => &mut self.specular_texture,
            MaterialSlot::Bump => &mut self.bump_texture,
            MaterialSlot::Normal => &mut self.normal_texture,
            MaterialSlot::Emission => &mut self.emission_texture,
            MaterialSlot::Roughness => &mut self.roughness_texture,
            MaterialSlot::Opacity => &mut self.opacity_texture,
            MaterialSlot::Metalness => &mut self.metalness_texture,
            MaterialSlot::AmbientOcclusion => &mut self.ambient_occlusion_texture,
        };
        *field = texture;
    }
}

/// Maps a Phong shininess exponent to a microfacet roughness.
pub fn roughness_from_shininess(shininess: f32) -> f32 {
    (2.0 / (shininess + 2.0)).powf(0.25)
}

/// Inverse of [`roughness_from_shininess`], for sources that store roughness.
pub fn shininess_from_roughness(roughness: f32) -> f32 {
    2.0 / roughness.powi(4) - 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shininess_mapping() {
        assert!((roughness_from_shininess(0.0) - 1.0).abs() < 1e-6);
        let r = roughness_from_shininess(100.0);
        assert!((r - (2.0f32 / 102.0).powf(0.25)).abs() < 1e-6);
        assert!((shininess_from_roughness(r) - 100.0).abs() < 1e-2);
    }

    #[test]
    fn slots_round_trip_through_accessors() {
        let mut m = Material::default();
        assert!(MaterialSlot::ALL.iter().all(|s| m.texture(*s).is_none()));
        m.set_texture(MaterialSlot::Metalness, Some(TextureId::new(3)));
        assert_eq!(m.metalness_texture, Some(TextureId::new(3)));
        assert_eq!(m.texture(MaterialSlot::Metalness), Some(TextureId::new(3)));
    }
}
