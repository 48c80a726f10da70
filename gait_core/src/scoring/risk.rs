//! Per-condition risk scoring over the recent measurement window.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::ScoringConfig;
use crate::history::{GaitSample, MetricsHistory};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    NeurodegenerativeA,
    VascularB,
    GeneralDecline,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 3] = [
        RiskCategory::NeurodegenerativeA,
        RiskCategory::VascularB,
        RiskCategory::GeneralDecline,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::NeurodegenerativeA => "Parkinson's Disease",
            RiskCategory::VascularB => "Cerebral Small Vessel Disease",
            RiskCategory::GeneralDecline => "General Cognitive Decline",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityBand {
    InsufficientData,
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityBand {
    pub fn from_risk(risk: f64) -> Self {
        if risk < 20.0 {
            SeverityBand::Low
        } else if risk < 40.0 {
            SeverityBand::Moderate
        } else if risk < 70.0 {
            SeverityBand::High
        } else {
            SeverityBand::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBand::InsufficientData => "Insufficient Data",
            SeverityBand::Low => "Low",
            SeverityBand::Moderate => "Moderate",
            SeverityBand::High => "High",
            SeverityBand::Critical => "Critical",
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            SeverityBand::InsufficientData => "Insufficient Data",
            SeverityBand::Low => "Low Risk",
            SeverityBand::Moderate => "Moderate Risk",
            SeverityBand::High => "High Risk",
            SeverityBand::Critical => "Critical Risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub category: RiskCategory,
    /// Clamped to `[0, 100]`.
    pub risk_percent: f64,
    pub band: SeverityBand,
    pub indicator: String,
}

impl RiskAssessment {
    fn insufficient(category: RiskCategory) -> Self {
        Self {
            category,
            risk_percent: 0.0,
            band: SeverityBand::InsufficientData,
            indicator: "Awaiting data".to_string(),
        }
    }

    fn scored(category: RiskCategory, points: f64, indicator: &str) -> Self {
        let risk_percent = points.clamp(0.0, 100.0);
        Self {
            category,
            risk_percent,
            band: SeverityBand::from_risk(risk_percent),
            indicator: indicator.to_string(),
        }
    }
}

/// Magnitude statistics over a window of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub len: usize,
    pub mean_stride: f64,
    pub mean_swing: f64,
    pub stride_std: f64,
    pub swing_std: f64,
}

impl WindowStats {
    /// `None` for an empty window.
    pub fn of(samples: &[GaitSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let strides = samples.iter().map(|s| s.stride_length.abs());
        let swings = samples.iter().map(|s| s.swing_length.abs());
        let mean_stride = strides.clone().sum::<f64>() / n;
        let mean_swing = swings.clone().sum::<f64>() / n;

        Some(Self {
            len: samples.len(),
            mean_stride,
            mean_swing,
            stride_std: (strides.map(|v| (v - mean_stride).powi(2)).sum::<f64>() / n).sqrt(),
            swing_std: (swings.map(|v| (v - mean_swing).powi(2)).sum::<f64>() / n).sqrt(),
        })
    }
}

pub(crate) fn mean_stride_magnitude(samples: &[GaitSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.stride_length.abs()).sum::<f64>() / samples.len() as f64
}

/// A mean magnitude lies beyond a (negative) range edge when its mirrored
/// value falls below that edge.
fn beyond_edge(mean_magnitude: f64, edge: f64) -> bool {
    -mean_magnitude < edge
}

/// Scores the three categories independently from the last `window` samples.
pub fn assess(history: &MetricsHistory, cfg: &ScoringConfig) -> [RiskAssessment; 3] {
    if history.len() < cfg.min_samples {
        return RiskCategory::ALL.map(RiskAssessment::insufficient);
    }
    let window = history.last(cfg.window);
    let Some(stats) = WindowStats::of(window) else {
        return RiskCategory::ALL.map(RiskAssessment::insufficient);
    };

    [
        neurodegenerative(&stats, cfg),
        vascular(&stats, window, cfg),
        general_decline(&stats, cfg),
    ]
}

fn neurodegenerative(stats: &WindowStats, cfg: &ScoringConfig) -> RiskAssessment {
    let rules = &cfg.neurodegenerative;
    let stride_flag = beyond_edge(stats.mean_stride, cfg.stride_range[0]);

    let mut points = 0.0;
    if stride_flag {
        points += rules.stride_weight;
    }
    if stats.stride_std > cfg.variability_threshold {
        points += rules.variability_weight;
    }
    if beyond_edge(stats.mean_swing, cfg.swing_range[0]) {
        points += rules.swing_weight;
    }

    let indicator = if stride_flag {
        "Stride length beyond calibrated range"
    } else {
        "Normal stride patterns"
    };
    RiskAssessment::scored(RiskCategory::NeurodegenerativeA, points, indicator)
}

fn vascular(stats: &WindowStats, window: &[GaitSample], cfg: &ScoringConfig) -> RiskAssessment {
    let rules = &cfg.vascular;
    let variability_flag =
        stats.stride_std > cfg.variability_threshold * rules.variability_factor;

    let mut points = 0.0;
    if beyond_edge(stats.mean_stride, cfg.stride_range[0] * rules.stride_factor) {
        points += rules.stride_weight;
    }
    if variability_flag {
        points += rules.variability_weight;
    }

    let half = cfg.trend_half;
    if half > 0 && window.len() >= half {
        let earlier = mean_stride_magnitude(&window[..half]);
        let recent = mean_stride_magnitude(&window[window.len() - half..]);
        if earlier > recent * rules.trend_factor {
            points += rules.trend_weight;
        }
    }

    let indicator = if variability_flag {
        "Gait variability detected"
    } else {
        "Stable gait patterns"
    };
    RiskAssessment::scored(RiskCategory::VascularB, points, indicator)
}

fn general_decline(stats: &WindowStats, cfg: &ScoringConfig) -> RiskAssessment {
    let rules = &cfg.general;
    let inconsistency_limit = cfg.variability_threshold * rules.inconsistency_factor;

    let mut points = 0.0;
    if stats.mean_stride < cfg.stride_range[1] * rules.mobility_factor
        && stats.mean_swing < cfg.swing_range[1] * rules.mobility_factor
    {
        points += rules.mobility_weight;
    }
    if stats.stride_std > inconsistency_limit || stats.swing_std > inconsistency_limit {
        points += rules.inconsistency_weight;
    }

    let indicator = if stats.stride_std > inconsistency_limit {
        "Inconsistent movement patterns"
    } else {
        "Consistent mobility"
    };
    RiskAssessment::scored(RiskCategory::GeneralDecline, points, indicator)
}
