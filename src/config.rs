// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Missing files, sections, or keys fall back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::backend::GpuPreference;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub gpu: GpuConfig,
    pub debug: DebugConfig,
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
            title: "Ember Engine".to_string(),
            width: 1700,
            height: 900,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub render_scale: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.0, 0.0, 1.0, 1.0],
            frames_in_flight: 2,
            render_scale: 1.0,
        }
    }
}

/// GPU selection policy
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub preference: String,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            preference: "discrete".to_string(),
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
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "ember_debug.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum. FIFO is the safe default: vsync,
    /// guaranteed available.
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Get the GPU selection preference
    pub fn gpu_preference(&self) -> GpuPreference {
        match self.gpu.preference.to_lowercase().as_str() {
            "discrete" => GpuPreference::Discrete,
            "integrated" => GpuPreference::Integrated,
            "any" => GpuPreference::Any,
            _ => {
                log::warn!(
                    "Unknown GPU preference '{}', defaulting to discrete",
                    self.gpu.preference
                );
                GpuPreference::Discrete
            }
        }
    }

    /// Render scale, clamped to a usable range
    pub fn render_scale(&self) -> f32 {
        self.graphics.render_scale.clamp(0.1, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_are_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window.width, 1700);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.graphics.present_mode, "fifo");
        assert_eq!(config.gpu.preference, "discrete");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 800

            [graphics]
            frames_in_flight = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn present_mode_mapping() {
        let mut config = Config::default();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "MAILBOX".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "nonsense".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn gpu_preference_mapping() {
        let mut config = Config::default();
        assert_eq!(config.gpu_preference(), GpuPreference::Discrete);

        config.gpu.preference = "integrated".to_string();
        assert_eq!(config.gpu_preference(), GpuPreference::Integrated);

        config.gpu.preference = "any".to_string();
        assert_eq!(config.gpu_preference(), GpuPreference::Any);

        config.gpu.preference = "quantum".to_string();
        assert_eq!(config.gpu_preference(), GpuPreference::Discrete);
    }

    #[test]
    fn render_scale_is_clamped() {
        let mut config = Config::default();
        config.graphics.render_scale = 4.0;
        assert_eq!(config.render_scale(), 1.0);
        config.graphics.render_scale = 0.0;
        assert_eq!(config.render_scale(), 0.1);
        config.graphics.render_scale = 0.5;
        assert_eq!(config.render_scale(), 0.5);
    }
}
