#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::bail;
use view_ngin::{
    cgmath::Matrix4,
    data_structures::texture_library::normalize_path,
    device::ElementType,
    resources::{
        image::{DecodedImage, ImageDecoder},
        source::{SourceMaterial, SourceMesh, SourceNode, SourceScene},
    },
};

/// In-memory image decoder that counts every decode attempt.
#[derive(Clone, Default)]
pub struct CountingDecoder {
    images: HashMap<String, DecodedImage>,
    calls: Rc<Cell<usize>>,
}

impl CountingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, path: &str, image: DecodedImage) -> Self {
        self.images.insert(normalize_path(path), image);
        self
    }

    /// Shared counter that keeps working after the decoder is boxed away.
    pub fn calls(&self) -> Rc<Cell<usize>> {
        self.calls.clone()
    }
}

impl ImageDecoder for CountingDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage> {
        self.calls.set(self.calls.get() + 1);
        match self.images.get(&normalize_path(&path.to_string_lossy())) {
            Some(image) => Ok(image.clone()),
            None => bail!("no image at {}", path.display()),
        }
    }
}

pub fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> DecodedImage {
    DecodedImage {
        width,
        height,
        channels: 4,
        element: ElementType::U8,
        hdr: false,
        pixels: rgba.repeat((width * height) as usize),
    }
}

/// Unit quad in the XY plane as one four-cornered face.
pub fn quad_mesh(name: &str, material: usize) -> SourceMesh {
    SourceMesh {
        name: name.to_string(),
        positions: vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        normals: None,
        tex_coords: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        faces: vec![vec![0, 1, 2, 3]],
        material,
    }
}

pub fn node(
    name: &str,
    transform: Matrix4<f32>,
    meshes: Vec<usize>,
    children: Vec<SourceNode>,
) -> SourceNode {
    SourceNode {
        name: name.to_string(),
        transform,
        meshes,
        children,
    }
}

/// One quad at the root using the single given material.
pub fn single_quad_scene(material: SourceMaterial) -> SourceScene {
    SourceScene {
        root: node("root", Matrix4::from_scale(1.0), vec![0], vec![]),
        meshes: vec![quad_mesh("quad", 0)],
        materials: vec![material],
    }
}

/// A fresh directory under the system temp dir, unique per test and process.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("view-ngin-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn write_png(path: &Path, width: u32, height: u32, rgba: [u8; 4]) {
    image::RgbaImage::from_pixel(width, height, image::Rgba(rgba))
        .save(path)
        .unwrap();
}
