// =============================================================================
// CONFIGURATION - window, graphics, asset and scene settings (config.toml)
// =============================================================================
//
// Every section falls back to defaults, so a missing or partial config.toml
// still produces a runnable renderer.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetConfig,
    pub scene: SceneConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Textured Mesh Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred low-latency present mode. FIFO is always the fallback.
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Number of frame slots (F). Independent of the swapchain image count.
    pub frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    pub hot_reload_shaders: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "renderer.log".to_string(),
            show_fps: true,
            hot_reload_shaders: false,
        }
    }
}

/// Shader and texture locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub shader_entry: String,
    /// Texture file. `None` renders a procedural checkerboard.
    pub texture: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/model.vert.spv"),
            fragment_shader: PathBuf::from("shaders/model.frag.spv"),
            shader_entry: "main".to_string(),
            texture: None,
        }
    }
}

/// Scene animation and camera
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Model rotation about Z, degrees per second
    pub rotation_speed: f32,
    pub eye: [f32; 3],
    pub fov_degrees: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            rotation_speed: 45.0,
            eye: [0.0, 0.0, 4.0],
            fov_degrees: 45.0,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.graphics.frames_in_flight == 0 {
            anyhow::bail!("graphics.frames_in_flight must be at least 1");
        }
        Ok(config)
    }

    /// Validation layers are only requested in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Preferred present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.assets.shader_entry, "main");
        assert!(config.assets.texture.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            frames_in_flight = 3

            [assets]
            texture = "textures/crate.png"
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert_eq!(config.assets.texture, Some(PathBuf::from("textures/crate.png")));
        assert_eq!(config.window.title, "Textured Mesh Renderer");
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        assert!(Config::parse("[graphics]\nframes_in_flight = 0").is_err());
    }

    #[test]
    fn validation_requires_a_debug_build() {
        let mut config = Config::default();
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));
        config.debug.validation_layers = false;
        assert!(!config.validation_enabled());
    }

    #[test]
    fn present_mode_names_map_to_vulkan() {
        let mut config = Config::default();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
        config.graphics.present_mode = "Immediate".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::IMMEDIATE);
        config.graphics.present_mode = "bogus".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }
}
