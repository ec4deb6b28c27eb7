//! Shader source and wgpu render pipeline construction.
//!
//! - `basic` is the lit, optionally textured mesh program the viewer draws with

pub mod basic;
