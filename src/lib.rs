//! view-ngin
//!
//! The core of a small 3D model viewer. Scenes are imported from glTF or OBJ
//! files into meshes, materials and a deduplicated texture library; every
//! GPU-backed object keeps its data on the host until first use and is then
//! mirrored lazily onto the device, reallocating only when its shape changes.
//! All device work goes through the [`device::RenderDevice`] trait, which
//! has a wgpu implementation for the window and a host-memory one for
//! headless use and tests.
//!
//! High-level modules
//! - `camera`: orbit camera and light placement framed from the scene bounds
//! - `config`: viewer settings and the runtime shading parameters
//! - `context`: wgpu surface and device bring-up for a winit window
//! - `data_structures`: textures, render targets, meshes, materials, bounds
//! - `device`: the device interface, its wgpu and headless implementations
//! - `flow`: the window event loop of the interactive viewer
//! - `pipelines`: WGSL shading program and wgpu pipeline construction
//! - `render`: per-frame drawing of an imported scene
//! - `resources`: scene and image decoding and the scene importer
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod device;
pub mod flow;
pub mod pipelines;
pub mod render;
pub mod resources;

pub use cgmath;
