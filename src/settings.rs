use derive_more::Display;
use log::{info, warn};
use serde::Deserialize;
use std::path::Path;

/// Tunables of the interaction core.
///
/// Every key is optional in the JSON form; missing keys take the values of
/// [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Analog travel per emitted scroll tick.
    pub scroll_threshold: f32,
    pub shake_compensation_enabled: bool,
    /// Percent of the controller-to-window distance a click may wander before it is a drag.
    pub shake_compensation_threshold: f32,
    pub shake_compensation_duration_ms: u64,
    /// Dead zone of the grab transform lock.
    pub analog_threshold: f32,
    pub grab_window_threshold: f32,
    pub scroll_to_push_ratio: f32,
    pub scroll_to_scale_ratio: f32,
    pub min_window_distance: f32,
    pub max_window_distance: f32,
    pub min_window_scale: f32,
    pub max_window_scale: f32,
    pub fov_inner: f32,
    pub fov_outer: f32,
    pub sphere_radius: f32,
    pub pointer_default_length: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scroll_threshold: 0.1,
            shake_compensation_enabled: true,
            shake_compensation_threshold: 1.5,
            shake_compensation_duration_ms: 300,
            analog_threshold: 0.1,
            grab_window_threshold: 0.25,
            scroll_to_push_ratio: 2.0,
            scroll_to_scale_ratio: 0.25,
            min_window_distance: 0.05,
            max_window_distance: 15.0,
            min_window_scale: 0.05,
            max_window_scale: 15.0,
            fov_inner: 0.25,
            fov_outer: 0.6,
            sphere_radius: 5.0,
            pointer_default_length: 5.0,
        }
    }
}

#[derive(Debug, Display)]
pub enum SettingsError {
    #[display("failed to read settings: {_0}")]
    Io(std::io::Error),
    #[display("malformed settings: {_0}")]
    Json(serde_json::Error),
    #[display("setting out of range: {_0}")]
    OutOfRange(&'static str),
}

impl std::error::Error for SettingsError {}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let settings = std::fs::read_to_string(path)
            .map_err(SettingsError::from)
            .and_then(|json| Self::from_json_str(&json))
            .inspect_err(|e| warn!("Couldn't load settings from {}: {e}", path.display()))?;
        info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            (self.scroll_threshold, "scroll-threshold"),
            (self.shake_compensation_threshold, "shake-compensation-threshold"),
            (self.grab_window_threshold, "grab-window-threshold"),
            (self.min_window_distance, "min-window-distance"),
            (self.min_window_scale, "min-window-scale"),
            (self.sphere_radius, "sphere-radius"),
            (self.pointer_default_length, "pointer-default-length"),
        ];
        if let Some((_, key)) = positive.iter().find(|(value, _)| *value <= 0.0) {
            return Err(SettingsError::OutOfRange(key));
        }
        if self.analog_threshold < 0.0 {
            return Err(SettingsError::OutOfRange("analog-threshold"));
        }
        if self.min_window_distance > self.max_window_distance {
            return Err(SettingsError::OutOfRange("max-window-distance"));
        }
        if self.min_window_scale > self.max_window_scale {
            return Err(SettingsError::OutOfRange("max-window-scale"));
        }
        if !(0.0 < self.fov_inner && self.fov_inner < self.fov_outer) {
            return Err(SettingsError::OutOfRange("fov-inner"));
        }
        Ok(())
    }
}
