//! Engine data structures: device-backed resources and the scene data that references them.
//!
//! - `texture` holds 2D/3D textures with lazy, dirty-tracked device images
//! - `framebuffer` contains off-screen render targets with ambient state save/restore
//! - `texture_library` deduplicates textures by path and hands out stable ids
//! - `mesh` holds triangle meshes, triangulation, normal synthesis and primitives
//! - `material` describes shading parameters and texture slots
//! - `range` is the bounding volume used for camera framing
//! - `program` builds shader programs on first use

pub mod framebuffer;
pub mod material;
pub mod mesh;
pub mod program;
pub mod range;
pub mod texture;
pub mod texture_library;
