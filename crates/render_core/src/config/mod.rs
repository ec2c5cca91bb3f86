//! # Configuration System
//!
//! Render parameters consumed at initialization plus the file-backed
//! [`RendererConfig`] that applications load them from.
//!
//! ## Formats
//!
//! Any type implementing [`Config`] can be loaded from and saved to `.toml`
//! or `.ron` files, selected by extension.

use serde::{Serialize, Deserialize};
use std::fmt;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            Self::from_toml_str(&contents)
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Parse configuration from a TOML document
    fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Values parsed but describe an unusable configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Native driver backends the renderer can run on
///
/// Selected once at initialization and fixed for the lifetime of the
/// renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Native Vulkan driver
    #[default]
    Vulkan,
    /// Software reference driver without a GPU
    Headless,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vulkan => write!(f, "Vulkan"),
            Self::Headless => write!(f, "Headless"),
        }
    }
}

/// Back buffer pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DisplayFormat {
    /// 1-bit alpha, 5 bits per color channel
    A1R5G5B5,
    /// 2-bit alpha, 10 bits per color channel
    A2R10G10B10,
    /// 8 bits per channel with alpha
    A8R8G8B8,
    /// 16-bit color without alpha
    R5G6B5,
    /// 8 bits per color channel, unused alpha byte
    #[default]
    X8R8G8B8,
}

/// Depth/stencil buffer layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DepthStencilBits {
    /// 16-bit depth
    D16,
    /// 24-bit depth with 8-bit stencil
    D24S8,
    /// 32-bit depth
    #[default]
    D32,
}

/// # Render Parameters
///
/// Immutable-after-init configuration handed to the renderer at
/// initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParameters {
    /// Which backend to drive
    pub backend: BackendKind,
    /// Back buffer width in pixels
    pub width: u32,
    /// Back buffer height in pixels
    pub height: u32,
    /// Windowed (true) or fullscreen (false)
    pub windowed: bool,
    /// Back buffer pixel format
    pub display_format: DisplayFormat,
    /// Refresh rate in Hz, 0 lets the driver decide
    pub refresh_rate: u32,
    /// Depth/stencil buffer layout
    pub depth_stencil_bits: DepthStencilBits,
}

impl RenderParameters {
    /// Create parameters for a backend with the default surface settings
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Set the back buffer size
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set windowed or fullscreen mode
    pub fn with_windowed(mut self, windowed: bool) -> Self {
        self.windowed = windowed;
        self
    }

    /// Set the depth/stencil layout
    pub fn with_depth_stencil_bits(mut self, bits: DepthStencilBits) -> Self {
        self.depth_stencil_bits = bits;
        self
    }

    /// Validate the parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "back buffer size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            width: 1024,
            height: 768,
            windowed: true,
            display_format: DisplayFormat::default(),
            refresh_rate: 0,
            depth_stencil_bits: DepthStencilBits::default(),
        }
    }
}

impl Config for RenderParameters {}

/// # Renderer Configuration File
///
/// Top-level configuration an application keeps on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Log level filter used when initializing logging
    pub log_level: String,
    /// Parameters forwarded to the renderer at initialization
    pub parameters: RenderParameters,
    /// Initial clear color [R, G, B, A] (0.0-1.0 range)
    pub clear_color: [f32; 4],
}

impl RendererConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parameters.validate()
    }

    /// Initialize logging with `log_level` as the default filter
    pub fn init_logging(&self) {
        crate::foundation::logging::init_with_level(&self.log_level);
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            parameters: RenderParameters::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = RenderParameters::default();
        assert_eq!(params.backend, BackendKind::Vulkan);
        assert_eq!((params.width, params.height), (1024, 768));
        assert!(params.windowed);
        assert_eq!(params.depth_stencil_bits, DepthStencilBits::D32);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_zero_size_is_invalid() {
        let params = RenderParameters::new(BackendKind::Headless).with_size(0, 600);
        assert!(matches!(params.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_renderer_config_from_toml_fills_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            log_level = "debug"

            [parameters]
            backend = "Headless"
            width = 800
            height = 600
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.parameters.backend, BackendKind::Headless);
        assert_eq!(config.parameters.width, 800);
        assert_eq!(config.parameters.depth_stencil_bits, DepthStencilBits::D32);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        let config = RendererConfig { log_level: "warn".to_string(), ..RendererConfig::default() };
        config.init_logging();
        config.init_logging();
        log::warn!("logging initialized from renderer config");
    }

    #[test]
    fn test_unsupported_extension() {
        let result = RendererConfig::load_from_file("renderer.ini");
        assert!(result.is_err());
    }
}
