use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, WaveEngineError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.render.validate()
    }
}

/// Parameters of the signal engine. Every field is optional in serialized
/// form and falls back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub total_harmonics: usize,
    /// Phase advance per tick is `speed / 10`.
    pub speed: f64,
    pub tick_interval_ms: u64,
    /// Snapshots hold `sample_count + 1` points.
    pub sample_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_harmonics: 40,
            speed: 5.0,
            tick_interval_ms: 50,
            sample_count: 300,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.total_harmonics < 1 {
            return Err(WaveEngineError::invalid_config(
                "total_harmonics must be at least 1",
            ));
        }
        if self.sample_count < 1 {
            return Err(WaveEngineError::invalid_config(
                "sample_count must be at least 1",
            ));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(WaveEngineError::invalid_config(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(WaveEngineError::invalid_config(
                "tick_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn phase_step(&self) -> f64 {
        self.speed / 10.0
    }
}

/// Viewport used by the reference render adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: usize,
    pub height: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 700,
            height: 300,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(WaveEngineError::invalid_config(format!(
                "render viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}
