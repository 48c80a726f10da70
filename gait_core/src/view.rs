//! Serializable snapshot of everything the dashboard shows.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::capture::Clock;
use crate::config::ScoringConfig;
use crate::history::GaitSample;
use crate::protocol::GaitMetrics;
use crate::scoring::alerts::Alert;
use crate::scoring::risk::{RiskAssessment, WindowStats, assess};
use crate::session::{ConnectionState, StreamingSession};
use serde::Serialize;

pub const CHART_SAMPLES: usize = 50;
pub const SUMMARY_SAMPLES: usize = 10;

/// "Current gait analysis" panel: magnitudes averaged over the most recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaitSummary {
    pub mean_stride: f64,
    pub mean_swing: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub connection: ConnectionState,
    pub monitoring: bool,
    pub frames_sent: u64,
    /// Frames awaiting a response.
    pub queue: u32,
    pub dropped_frames: u64,
    pub status: String,
    pub processing: bool,
    pub latest_metric: Option<GaitMetrics>,
    pub sample_count: usize,
    pub risks: [RiskAssessment; 3],
    pub overall_risk: f64,
    pub alerts: Vec<Alert>,
    pub high_priority_alerts: usize,
    pub chart: Vec<GaitSample>,
    pub summary: Option<GaitSummary>,
    /// Local wall-clock time, `HH:MM:SS`.
    pub clock: String,
}

impl DashboardView {
    /// Alerts are taken from the session's stable batch as is; refresh it first.
    pub fn build(session: &StreamingSession, scoring: &ScoringConfig, clock: &dyn Clock) -> Self {
        let risks = assess(&session.history, scoring);
        let overall_risk = risks
            .iter()
            .map(|r| r.risk_percent)
            .fold(0.0, f64::max);

        let summary = if session.history.len() > SUMMARY_SAMPLES {
            WindowStats::of(session.history.last(SUMMARY_SAMPLES)).map(|stats| GaitSummary {
                mean_stride: stats.mean_stride,
                mean_swing: stats.mean_swing,
                samples: stats.len,
            })
        } else {
            None
        };

        Self {
            connection: session.connection(),
            monitoring: session.is_monitoring(),
            frames_sent: session.sent_frames(),
            queue: session.in_flight(),
            dropped_frames: session.dropped_frames(),
            status: session.status.clone(),
            processing: session.is_processing(),
            latest_metric: session.latest_metric.clone(),
            sample_count: session.history.len(),
            risks,
            overall_risk,
            alerts: session.alerts.stable().to_vec(),
            high_priority_alerts: session.alerts.high_priority_count(),
            chart: session.history.last(CHART_SAMPLES).to_vec(),
            summary,
            clock: clock
                .now()
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SystemClock;
    use crate::config::AlertConfig;
    use crate::scoring::risk::SeverityBand;
    use std::time::Instant;

    #[test]
    fn empty_session_view() {
        let session = StreamingSession::new();
        let view = DashboardView::build(&session, &ScoringConfig::default(), &SystemClock);
        assert_eq!(view.connection, ConnectionState::Disconnected);
        assert_eq!(view.sample_count, 0);
        assert!(view.chart.is_empty());
        assert!(view.summary.is_none());
        assert_eq!(view.overall_risk, 0.0);
        assert!(view.risks.iter().all(|r| r.band == SeverityBand::InsufficientData));
        assert_eq!(view.clock.len(), 8);
    }

    #[test]
    fn chart_and_summary_windows() {
        let mut session = StreamingSession::new();
        for i in 0..60 {
            session.history.push(if i % 2 == 0 { 100.0 } else { -100.0 }, 40.0);
        }
        let view = DashboardView::build(&session, &ScoringConfig::default(), &SystemClock);
        assert_eq!(view.chart.len(), CHART_SAMPLES);
        assert_eq!(view.chart[0].ordinal, 10);

        let summary = view.summary.unwrap();
        assert_eq!(summary.samples, SUMMARY_SAMPLES);
        assert_eq!(summary.mean_stride, 100.0);
        assert_eq!(summary.mean_swing, 40.0);
    }

    #[test]
    fn summary_needs_more_than_ten_samples() {
        let mut session = StreamingSession::new();
        for _ in 0..SUMMARY_SAMPLES {
            session.history.push(100.0, 40.0);
        }
        let view = DashboardView::build(&session, &ScoringConfig::default(), &SystemClock);
        assert!(view.summary.is_none());
    }

    #[test]
    fn overall_risk_is_the_highest_category() {
        let mut session = StreamingSession::new();
        // Mean |stride| 150 beyond the stride edge, high variability.
        for i in 0..20 {
            session.history.push(if i % 2 == 0 { 110.0 } else { -190.0 }, 60.0);
        }
        let scoring = ScoringConfig::default();
        session
            .alerts
            .refresh(&session.history, &scoring, &AlertConfig::default(), Instant::now());

        let view = DashboardView::build(&session, &scoring, &SystemClock);
        let max = view.risks.iter().map(|r| r.risk_percent).fold(0.0, f64::max);
        assert_eq!(view.overall_risk, max);
        assert!(view.overall_risk >= 55.0);
        assert_eq!(view.alerts.len(), session.alerts.stable().len());
        assert!(view.alerts.len() <= 5);
        assert_eq!(
            view.high_priority_alerts,
            view.alerts.iter().filter(|a| a.severity.is_high_priority()).count()
        );

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["connection"], "disconnected");
        assert_eq!(json["chart"].as_array().unwrap().len(), 20);
    }
}
