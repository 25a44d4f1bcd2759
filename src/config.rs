use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const ENV_PREFIX: &str = "BINSIGHT";

/// Tunables for the whole engine. Every section falls back to its defaults,
/// so an empty file or no file at all is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub compositor: CompositorSettings,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    /// Half-width of the square neighborhood sampled around a tap.
    pub hit_radius: u32,
    /// Mask values strictly above this count as foreground.
    pub hit_threshold: u8,
    /// Instances with fewer foreground pixels are dropped by the adapter.
    pub min_instance_pixels: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositorSettings {
    pub upload_max_edge: u32,
    pub crop_upload_to_subject: bool,
    pub subject_padding: u32,
    pub glow_color: [u8; 3],
    pub outline_radius: u8,
    pub inner_blur_sigma: f32,
    pub outer_blur_sigma: f32,
    pub inner_opacity: f32,
    pub outer_opacity: f32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Upper bound for a single model call; `None` leaves timing to the client.
    pub request_timeout_ms: Option<u64>,
    pub command_buffer_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            hit_radius: 3,
            hit_threshold: 80,
            min_instance_pixels: 1,
        }
    }
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            upload_max_edge: 1280,
            crop_upload_to_subject: true,
            subject_padding: 16,
            glow_color: [120, 220, 255],
            outline_radius: 2,
            inner_blur_sigma: 1.5,
            outer_blur_sigma: 6.0,
            inner_opacity: 0.9,
            outer_opacity: 0.55,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: Some(45_000),
            command_buffer_size: 32,
        }
    }
}

impl AnalysisSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Layers an optional settings file under `BINSIGHT__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.hit_threshold == u8::MAX {
            return Err(ConfigError::Invalid(
                "capture.hit_threshold must be below 255".to_string(),
            ));
        }

        if self.compositor.upload_max_edge == 0 {
            return Err(ConfigError::Invalid(
                "compositor.upload_max_edge must be greater than 0".to_string(),
            ));
        }

        for (name, opacity) in [
            ("inner_opacity", self.compositor.inner_opacity),
            ("outer_opacity", self.compositor.outer_opacity),
        ] {
            if !(0.0..=1.0).contains(&opacity) {
                return Err(ConfigError::Invalid(format!(
                    "compositor.{name} must be between 0.0 and 1.0"
                )));
            }
        }

        for (name, sigma) in [
            ("inner_blur_sigma", self.compositor.inner_blur_sigma),
            ("outer_blur_sigma", self.compositor.outer_blur_sigma),
        ] {
            if !(sigma > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "compositor.{name} must be greater than 0"
                )));
            }
        }

        if self.analysis.command_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "analysis.command_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
