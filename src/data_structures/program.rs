//! Shader programs built on first use.

use std::{borrow::Cow, path::PathBuf};

use anyhow::Context;

use crate::device::{ProgramHandle, RenderDevice};

#[derive(Clone, Debug)]
pub enum ProgramSource {
    Inline {
        vertex: Cow<'static, str>,
        fragment: Cow<'static, str>,
    },
    Files {
        vertex: PathBuf,
        fragment: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ProgramState {
    Unbuilt,
    Built(ProgramHandle),
    Failed,
}

/// A program that compiles itself the first time it is used.
///
/// A failed build is logged once and remembered; [`Program::reload`] forgets
/// it (and any built program) so the next use tries again.
#[derive(Debug)]
pub struct Program {
    label: String,
    source: ProgramSource,
    state: ProgramState,
}

impl Program {
    pub fn from_source(
        label: &str,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            label: label.to_string(),
            source: ProgramSource::Inline {
                vertex: vertex.into(),
                fragment: fragment.into(),
            },
            state: ProgramState::Unbuilt,
        }
    }

    pub fn from_files(vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        let vertex = vertex.into();
        let fragment = fragment.into();
        Self {
            label: vertex.display().to_string(),
            source: ProgramSource::Files { vertex, fragment },
            state: ProgramState::Unbuilt,
        }
    }

    /// Builds the program if needed and returns its handle.
    pub fn use_program(&mut self, device: &mut dyn RenderDevice) -> Option<ProgramHandle> {
        if self.state == ProgramState::Unbuilt {
            self.state = match self.build(device) {
                Ok(handle) => {
                    log::info!("Built program {}", self.label);
                    ProgramState::Built(handle)
                }
                Err(e) => {
                    log::error!("Could not build program {}: {:#}", self.label, e);
                    ProgramState::Failed
                }
            };
        }
        self.handle()
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        match self.state {
            ProgramState::Built(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.handle().is_some()
    }

    pub fn reload(&mut self, device: &mut dyn RenderDevice) {
        self.release(device);
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let ProgramState::Built(handle) = self.state {
            device.destroy_program(handle);
        }
        self.state = ProgramState::Unbuilt;
    }

    fn build(&self, device: &mut dyn RenderDevice) -> anyhow::Result<ProgramHandle> {
        match &self.source {
            ProgramSource::Inline { vertex, fragment } => {
                device.create_program(&self.label, vertex, fragment)
            }
            ProgramSource::Files { vertex, fragment } => {
                let vs = std::fs::read_to_string(vertex)
                    .with_context(|| format!("reading {}", vertex.display()))?;
                let fs = std::fs::read_to_string(fragment)
                    .with_context(|| format!("reading {}", fragment.display()))?;
                device.create_program(&self.label, &vs, &fs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    #[test]
    fn builds_once_on_first_use() {
        let mut device = HeadlessDevice::new();
        let mut program = Program::from_source("shade", "vs", "fs");
        assert!(!program.is_usable());
        let first = program.use_program(&mut device);
        assert!(first.is_some());
        assert_eq!(program.use_program(&mut device), first);
        assert_eq!(device.stats().programs_created, 1);
    }

    #[test]
    fn failed_build_is_not_retried_until_reload() {
        let mut device = HeadlessDevice::new();
        let mut program = Program::from_source("broken", "", "fs");
        assert!(program.use_program(&mut device).is_none());
        assert!(program.use_program(&mut device).is_none());
        program.reload(&mut device);
        assert!(program.use_program(&mut device).is_none());
        assert_eq!(device.stats().programs_created, 0);
    }

    #[test]
    fn missing_files_fail_the_build() {
        let mut device = HeadlessDevice::new();
        let mut program = Program::from_files("/nonexistent/a.wgsl", "/nonexistent/b.wgsl");
        assert!(program.use_program(&mut device).is_none());
    }
}
