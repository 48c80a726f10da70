//! Display collaborators fed by the dispatch loop.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::protocol::{GaitMetrics, decode_data_url};
use crate::scoring::alerts::Severity;
use crate::view::DashboardView;
use log::{debug, info, warn};

pub trait DisplaySink {
    /// Annotated frame returned by the inference service (data URL).
    fn show_processed_frame(&mut self, image: &str);

    fn show_metric(&mut self, metric: &GaitMetrics);

    /// Called once per clock tick with a fresh view model.
    fn show_dashboard(&mut self, view: &DashboardView);
}

/// Renders everything to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    processed_frames: u64,
}

impl DisplaySink for LogSink {
    fn show_processed_frame(&mut self, image: &str) {
        self.processed_frames += 1;
        match decode_data_url(image) {
            Ok(bytes) => debug!(
                "Processed frame #{}: {} bytes",
                self.processed_frames,
                bytes.len()
            ),
            Err(e) => warn!("Processed frame #{} undecodable: {e}", self.processed_frames),
        }
    }

    fn show_metric(&mut self, metric: &GaitMetrics) {
        debug!(
            "Gait metrics: stride={:?} swing={:?} frame={:?}",
            metric.avg_stride.map(f64::round),
            metric.avg_swing.map(f64::round),
            metric.frame_count
        );
    }

    fn show_dashboard(&mut self, view: &DashboardView) {
        info!(
            "[{}] server={} sent={} queue={} dropped={} samples={} | {}",
            view.clock,
            view.connection,
            view.frames_sent,
            view.queue,
            view.dropped_frames,
            view.sample_count,
            view.status
        );
        for risk in &view.risks {
            info!(
                "  {:<32} {:>3}% {:<17} {}",
                risk.category.label(),
                risk.risk_percent.round(),
                risk.band.status_label(),
                risk.indicator
            );
        }
        for alert in &view.alerts {
            let line = format!("  #{} [{}] {}", alert.id, alert.origin, alert.message);
            match alert.severity {
                Severity::Error | Severity::Warning => warn!("{line}"),
                Severity::Info | Severity::Success => info!("{line}"),
            }
        }
    }
}
