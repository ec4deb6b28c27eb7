use std::path::PathBuf;

/// User-tunable shading values, adjusted at runtime from the keyboard.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewerParams {
    pub roughness: f32,
    pub light_factor: f32,
}

impl ViewerParams {
    pub const ROUGHNESS_RANGE: (f32, f32) = (0.0, 1.0);
    pub const LIGHT_FACTOR_RANGE: (f32, f32) = (0.5, 10.0);

    pub fn adjust_roughness(&mut self, delta: f32) {
        let (lo, hi) = Self::ROUGHNESS_RANGE;
        self.roughness = (self.roughness + delta).clamp(lo, hi);
    }

    pub fn adjust_light_factor(&mut self, delta: f32) {
        let (lo, hi) = Self::LIGHT_FACTOR_RANGE;
        self.light_factor = (self.light_factor + delta).clamp(lo, hi);
    }
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            roughness: 0.5,
            light_factor: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    /// How far the camera backs off from a freshly loaded scene, in scene heights.
    pub distance_factor: f32,
    pub startup_file: Option<PathBuf>,
    pub params: ViewerParams,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "view-ngin".to_string(),
            width: 800,
            height: 600,
            clear_color: [0.3, 0.3, 0.5, 1.0],
            distance_factor: 1.5,
            startup_file: None,
            params: ViewerParams::default(),
        }
    }
}

impl ViewerConfig {
    /// Defaults with the start-up file taken from the first program argument.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Self {
        Self {
            startup_file: args.nth(1).map(PathBuf::from),
            ..Default::default()
        }
    }
}
