//! Monitor configuration, loaded from a TOML file.
//!
//! Every field has a default so an empty file (or no file) yields a working setup
//! against a local inference service.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::ClientError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws/image";
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub server_url: String,
    pub user_id: String,
    pub capture: CaptureConfig,
    pub transport: TransportConfig,
    pub scoring: ScoringConfig,
    pub alerts: AlertConfig,
    pub trace: TraceConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            user_id: ANONYMOUS_USER.to_string(),
            capture: CaptureConfig::default(),
            transport: TransportConfig::default(),
            scoring: ScoringConfig::default(),
            alerts: AlertConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ClientError> {
        let config: Self = toml::from_str(raw).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the client relies on.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.server_endpoint()?;

        if self.user_id.trim().is_empty() {
            return Err(ClientError::Config("user_id must not be empty".into()));
        }
        if self.capture.tick_ms == 0 {
            return Err(ClientError::Config("capture.tick_ms must be positive".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ClientError::Config("capture size must be non-zero".into()));
        }
        if self.transport.outbound_queue == 0 {
            return Err(ClientError::Config(
                "transport.outbound_queue must be positive".into(),
            ));
        }
        if self.scoring.min_samples == 0 || self.scoring.window < self.scoring.min_samples {
            return Err(ClientError::Config(
                "scoring.window must be at least scoring.min_samples (and both positive)".into(),
            ));
        }
        if self.scoring.min_samples < self.scoring.trend_half {
            return Err(ClientError::Config(
                "scoring.min_samples must cover scoring.trend_half".into(),
            ));
        }
        if self.alerts.signal_window == 0 || self.alerts.trend_half == 0 {
            return Err(ClientError::Config("alert windows must be positive".into()));
        }
        if self.alerts.max_alerts == 0 {
            return Err(ClientError::Config("alerts.max_alerts must be positive".into()));
        }

        Ok(())
    }

    pub fn server_endpoint(&self) -> Result<Url, ClientError> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| ClientError::Config(format!("server_url {}: {e}", self.server_url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ClientError::Config(format!(
                "server_url must use ws or wss, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory of still images cycled through as the capture device.
    pub frames_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub tick_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("frames"),
            width: 640,
            height: 480,
            tick_ms: 20,
        }
    }
}

impl CaptureConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Admission policy for the frame transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Frames are dropped while more than this many are unacknowledged.
    pub max_in_flight: u32,
    /// Pacing switches to `backlog_interval_ms` once more than this many are unacknowledged.
    pub backlog_threshold: u32,
    pub backlog_interval_ms: u64,
    pub idle_interval_ms: u64,
    /// Capacity of the queue between the dispatch loop and the socket writer.
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            backlog_threshold: 1,
            backlog_interval_ms: 33,
            idle_interval_ms: 50,
            outbound_queue: 16,
        }
    }
}

/// Calibration of the per-category risk rules.
///
/// The defaults are population placeholders; a deployment is expected to
/// calibrate the range edges per subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub window: usize,
    pub min_samples: usize,
    /// Samples on each side of the vascular trend comparison.
    pub trend_half: usize,
    /// Normal stride range in pixels, `[low, high]`.
    pub stride_range: [f64; 2],
    /// Normal swing range in pixels, `[low, high]`.
    pub swing_range: [f64; 2],
    pub variability_threshold: f64,
    pub neurodegenerative: NeurodegenerativeRules,
    pub vascular: VascularRules,
    pub general: GeneralDeclineRules,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_samples: 10,
            trend_half: 10,
            stride_range: [-130.0, 130.0],
            swing_range: [-80.0, 80.0],
            variability_threshold: 35.0,
            neurodegenerative: NeurodegenerativeRules::default(),
            vascular: VascularRules::default(),
            general: GeneralDeclineRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeurodegenerativeRules {
    pub stride_weight: f64,
    pub variability_weight: f64,
    pub swing_weight: f64,
}

impl Default for NeurodegenerativeRules {
    fn default() -> Self {
        Self {
            stride_weight: 30.0,
            variability_weight: 25.0,
            swing_weight: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VascularRules {
    pub stride_factor: f64,
    pub stride_weight: f64,
    pub variability_factor: f64,
    pub variability_weight: f64,
    pub trend_factor: f64,
    pub trend_weight: f64,
}

impl Default for VascularRules {
    fn default() -> Self {
        Self {
            stride_factor: 1.3,
            stride_weight: 20.0,
            variability_factor: 0.8,
            variability_weight: 15.0,
            trend_factor: 1.1,
            trend_weight: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralDeclineRules {
    pub mobility_factor: f64,
    pub mobility_weight: f64,
    pub inconsistency_factor: f64,
    pub inconsistency_weight: f64,
}

impl Default for GeneralDeclineRules {
    fn default() -> Self {
        Self {
            mobility_factor: 0.8,
            mobility_weight: 20.0,
            inconsistency_factor: 1.2,
            inconsistency_weight: 30.0,
        }
    }
}

/// Thresholds for the alert feed and its stabilization gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub stabilization_ms: u64,
    pub max_alerts: usize,
    pub baseline_samples: usize,
    pub risk_rounding: f64,
    pub risk_error_above: f64,
    pub risk_warning_above: f64,
    pub signal_window: usize,
    /// Rounding step, in pixels, for the raw-signal alerts.
    pub signal_rounding: f64,
    pub shuffling_stride_below: f64,
    pub reduced_stride_below: f64,
    pub variability_above: f64,
    pub reduced_swing_below: f64,
    pub trend_half: usize,
    pub trend_warning_pct: f64,
    pub trend_critical_pct: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            stabilization_ms: 5_000,
            max_alerts: 5,
            baseline_samples: 5,
            risk_rounding: 5.0,
            risk_error_above: 70.0,
            risk_warning_above: 40.0,
            signal_window: 10,
            signal_rounding: 10.0,
            shuffling_stride_below: 80.0,
            reduced_stride_below: 100.0,
            variability_above: 50.0,
            reduced_swing_below: 60.0,
            trend_half: 10,
            trend_warning_pct: 10.0,
            trend_critical_pct: 15.0,
        }
    }
}

impl AlertConfig {
    pub fn stabilization_interval(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("output").join("traces"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = MonitorConfig::from_toml("").unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.user_id, ANONYMOUS_USER);
        assert_eq!(config.transport.max_in_flight, 3);
        assert_eq!(config.capture.tick(), Duration::from_millis(20));
        assert_eq!(config.alerts.stabilization_interval(), Duration::from_secs(5));
        assert_eq!(config.scoring.stride_range, [-130.0, 130.0]);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let raw = r#"
            user_id = "user_42"

            [transport]
            max_in_flight = 5

            [scoring.neurodegenerative]
            stride_weight = 40.0
        "#;
        let config = MonitorConfig::from_toml(raw).unwrap();
        assert_eq!(config.user_id, "user_42");
        assert_eq!(config.transport.max_in_flight, 5);
        assert_eq!(config.transport.idle_interval_ms, 50);
        assert_eq!(config.scoring.neurodegenerative.stride_weight, 40.0);
        assert_eq!(config.scoring.neurodegenerative.swing_weight, 20.0);
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let err = MonitorConfig::from_toml(r#"server_url = "http://localhost:8000/ws""#)
            .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn rejects_window_smaller_than_minimum() {
        let raw = "[scoring]\nwindow = 5\nmin_samples = 10\n";
        assert!(MonitorConfig::from_toml(raw).is_err());
    }

    #[test]
    fn rejects_blank_user() {
        assert!(MonitorConfig::from_toml(r#"user_id = "  ""#).is_err());
    }
}
