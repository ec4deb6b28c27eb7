//! Deduplicating store of the textures referenced by a scene.
//!
//! Materials hold [`TextureId`]s, never textures. Ids are positions in an
//! append-only vector, so they stay valid for the whole session; only
//! [`TextureLibrary::clear`] (a new session) invalidates them.

use std::{collections::HashMap, fmt};

use crate::{device::{ColorSpace, RenderDevice}, resources::image::ImageDecoder};

use super::texture::Texture;

/// Index of a texture in its [`TextureLibrary`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(usize);

impl TextureId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Folds Windows separators so one file has one key.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[derive(Debug)]
pub struct TextureLibrary {
    textures: Vec<Texture>,
    by_path: HashMap<String, TextureId>,
    max_dimension: u32,
}

impl TextureLibrary {
    /// `max_dimension` is the device limit applied when decoding.
    pub fn new(max_dimension: u32) -> Self {
        Self {
            textures: Vec::new(),
            by_path: HashMap::new(),
            max_dimension,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Looks up an already loaded texture by path.
    pub fn search(&self, path: &str) -> Option<TextureId> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    /// Returns the id for `path`, decoding and appending it on first use.
    ///
    /// A file that cannot be decoded yields `None` and adds nothing, so the
    /// next request for it tries again.
    pub fn test_and_load(
        &mut self,
        path: &str,
        color_space: ColorSpace,
        decoder: &dyn ImageDecoder,
    ) -> Option<TextureId> {
        if let Some(id) = self.search(path) {
            return Some(id);
        }
        let mut texture = Texture::new();
        if !texture.load(path, color_space, None, decoder, self.max_dimension) {
            return None;
        }
        let id = TextureId(self.textures.len());
        self.by_path.insert(texture.name().to_string(), id);
        self.textures.push(texture);
        Some(id)
    }

    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut Texture> {
        self.textures.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &Texture)> {
        self.textures
            .iter()
            .enumerate()
            .map(|(i, t)| (TextureId(i), t))
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Starts a new session: frees every device image and forgets all ids.
    pub fn clear(&mut self, device: &mut dyn RenderDevice) {
        self.textures.iter_mut().for_each(|t| t.release(device));
        self.textures.clear();
        self.by_path.clear();
    }
}
