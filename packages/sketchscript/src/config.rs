use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_TICK_HZ: f32 = 30.0;
const TICK_HZ_RANGE: std::ops::RangeInclusive<f32> = 1.0..=1000.0;
/// Largest canvas side; the rasterizer allocates width x height pixels.
const MAX_CANVAS_EXTENT: f32 = 8192.0;

/// Interpreter sandbox limits applied to every execution and callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_expr_depth: usize,
    pub max_call_levels: usize,
    pub max_operations: u64, // 0 = unlimited
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_call_levels: 64,
            max_operations: 1_000_000,
            max_string_size: 10_000,
            max_array_size: 10_000,
            max_map_size: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Scope name of the zero-argument callback run once per tick.
    pub frame_callback: String,
    /// Scope name of the one-argument animator factory.
    pub object_factory: String,
    /// Scope name holding the value of the last successful execution.
    pub last_result: String,
    pub tick_hz: f32,
    pub canvas_width: f32,
    pub canvas_height: f32,
    /// Print statements allowed per tick or execution before output is dropped.
    pub max_prints_per_tick: u32,
    pub limits: SandboxLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_callback: "each_frame".to_string(),
            object_factory: "each_object".to_string(),
            last_result: "ans".to_string(),
            tick_hz: DEFAULT_TICK_HZ,
            canvas_width: 800.0,
            canvas_height: 600.0,
            max_prints_per_tick: 100,
            limits: SandboxLimits::default(),
        }
    }
}

impl SessionConfig {
    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config {}", path.display()))?;
        let config: SessionConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !TICK_HZ_RANGE.contains(&self.tick_hz) {
            anyhow::bail!(
                "tick_hz must be between {} and {}, got {}",
                TICK_HZ_RANGE.start(),
                TICK_HZ_RANGE.end(),
                self.tick_hz
            );
        }
        if self.frame_callback == self.object_factory {
            anyhow::bail!(
                "frame_callback and object_factory must differ (both are '{}')",
                self.frame_callback
            );
        }
        for (name, extent) in [("width", self.canvas_width), ("height", self.canvas_height)] {
            // Also rejects NaN.
            if !(extent > 0.0 && extent <= MAX_CANVAS_EXTENT) {
                anyhow::bail!("canvas {} must be in (0, {}], got {}", name, MAX_CANVAS_EXTENT, extent);
            }
        }
        Ok(())
    }

    /// Interval between ticks (33 1/3 ms at the default 30 Hz).
    /// Falls back to the default rate if `tick_hz` is unusable.
    pub fn tick_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.tick_hz as f64)
            .ok()
            .filter(|period| !period.is_zero())
            .unwrap_or_else(|| {
                log::warn!("Unusable tick_hz {}, using {} Hz", self.tick_hz, DEFAULT_TICK_HZ);
                Duration::from_secs_f64(1.0 / DEFAULT_TICK_HZ as f64)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_period_is_thirty_hz() {
        let config = SessionConfig::default();
        let period = config.tick_period();
        assert!((period.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "frame_callback": "tick", "limits": {{ "max_operations": 0 }} }}"#).unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.frame_callback, "tick");
        assert_eq!(config.object_factory, "each_object");
        assert_eq!(config.limits.max_operations, 0);
        assert_eq!(config.limits.max_call_levels, 64);
    }

    #[test]
    fn test_rejects_identical_callback_names() {
        let config = SessionConfig {
            object_factory: "each_frame".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_rates() {
        for tick_hz in [0.0, 1e-30, f32::NAN, f32::INFINITY, 5000.0] {
            let config = SessionConfig {
                tick_hz,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "tick_hz {} accepted", tick_hz);
        }
    }

    #[test]
    fn test_tiny_rate_period_does_not_panic() {
        let config = SessionConfig {
            tick_hz: 1e-30,
            ..Default::default()
        };
        assert!((config.tick_period().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_canvas_extent() {
        for (width, height) in [(f32::NAN, 600.0), (800.0, -1.0), (1e9, 600.0), (800.0, 1e9)] {
            let config = SessionConfig {
                canvas_width: width,
                canvas_height: height,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{}x{} accepted", width, height);
        }
        let config = SessionConfig {
            canvas_width: 8192.0,
            canvas_height: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
