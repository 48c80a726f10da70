//! Alert derivation and the stabilization latch that keeps the feed from flickering.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{AlertConfig, ScoringConfig};
use crate::history::MetricsHistory;
use crate::scoring::risk::{WindowStats, assess, mean_stride_magnitude};
use crate::scoring::{round_half_up, round_to_step};
use log::{debug, info};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Success,
}

impl Severity {
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Severity::Error | Severity::Warning)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Position within its batch, starting at 1.
    pub id: u32,
    pub severity: Severity,
    pub message: String,
    pub origin: String,
}

pub const ORIGIN_BASELINE: &str = "Now";
pub const ORIGIN_RISK: &str = "Risk Assessment";
pub const ORIGIN_LIVE: &str = "Live analysis";
pub const ORIGIN_TREND: &str = "Trend analysis";
pub const ORIGIN_SYSTEM: &str = "System status";

#[derive(Default)]
struct AlertBatch {
    alerts: Vec<Alert>,
}

impl AlertBatch {
    fn push(&mut self, severity: Severity, message: String, origin: &str) {
        let id = self.alerts.len() as u32 + 1;
        self.alerts.push(Alert {
            id,
            severity,
            message,
            origin: origin.to_string(),
        });
    }

    fn has_high_priority(&self) -> bool {
        self.alerts.iter().any(|a| a.severity.is_high_priority())
    }

    fn finish(mut self, max: usize) -> Vec<Alert> {
        self.alerts.truncate(max);
        self.alerts
    }
}

/// Builds a fresh alert batch from the history. Insertion order is priority
/// order; the batch is cut to `max_alerts` at the end.
pub fn derive_alerts(
    history: &MetricsHistory,
    scoring: &ScoringConfig,
    cfg: &AlertConfig,
) -> Vec<Alert> {
    let mut batch = AlertBatch::default();

    if history.len() < cfg.baseline_samples {
        batch.push(
            Severity::Info,
            "Gait analysis starting - collecting baseline data".to_string(),
            ORIGIN_BASELINE,
        );
        return batch.finish(cfg.max_alerts);
    }

    for risk in assess(history, scoring) {
        let rounded = round_to_step(risk.risk_percent, cfg.risk_rounding);
        if rounded > cfg.risk_error_above {
            batch.push(
                Severity::Error,
                format!(
                    "HIGH RISK: {} risk at {rounded:.0}% - Immediate attention recommended",
                    risk.category
                ),
                ORIGIN_RISK,
            );
        } else if rounded > cfg.risk_warning_above {
            batch.push(
                Severity::Warning,
                format!(
                    "WARNING: {} risk elevated to {rounded:.0}% - Monitor closely",
                    risk.category
                ),
                ORIGIN_RISK,
            );
        }
    }

    if let Some(stats) = WindowStats::of(history.last(cfg.signal_window)) {
        signal_alerts(&mut batch, &stats, cfg);
    }

    trend_alert(&mut batch, history, cfg);

    if !batch.has_high_priority() {
        batch.push(
            Severity::Success,
            "Gait patterns within acceptable ranges - Continue monitoring".to_string(),
            ORIGIN_LIVE,
        );
    }

    batch.push(
        Severity::Info,
        format!("Analysis based on {} gait measurements", history.len()),
        ORIGIN_SYSTEM,
    );

    batch.finish(cfg.max_alerts)
}

fn signal_alerts(batch: &mut AlertBatch, stats: &WindowStats, cfg: &AlertConfig) {
    let stride = round_to_step(stats.mean_stride, cfg.signal_rounding);
    let swing = round_to_step(stats.mean_swing, cfg.signal_rounding);
    let variability = round_to_step(stats.stride_std, cfg.signal_rounding);

    if stride > 0.0 && stride < cfg.shuffling_stride_below {
        batch.push(
            Severity::Warning,
            format!(
                "Significantly reduced stride length detected ({stride:.0}px) - Potential shuffling gait"
            ),
            ORIGIN_LIVE,
        );
    } else if stride >= cfg.shuffling_stride_below && stride < cfg.reduced_stride_below {
        batch.push(
            Severity::Info,
            format!("Moderately reduced stride length observed ({stride:.0}px)"),
            ORIGIN_LIVE,
        );
    }

    if variability > cfg.variability_above {
        batch.push(
            Severity::Warning,
            "High gait variability detected - irregular walking pattern".to_string(),
            ORIGIN_LIVE,
        );
    }

    if swing > 0.0 && swing < cfg.reduced_swing_below {
        batch.push(
            Severity::Warning,
            format!("Reduced arm swing detected ({swing:.0}px) - Possible mobility issue"),
            ORIGIN_LIVE,
        );
    }
}

/// Compares the most recent `trend_half` samples against the `trend_half` before them.
fn trend_alert(batch: &mut AlertBatch, history: &MetricsHistory, cfg: &AlertConfig) {
    let half = cfg.trend_half;
    if half == 0 || history.len() < half * 2 {
        return;
    }
    let span = history.last(half * 2);
    let older = mean_stride_magnitude(&span[..half]);
    let newer = mean_stride_magnitude(&span[half..]);
    if older <= 0.0 {
        return;
    }

    let change = round_half_up((newer - older) / older * 100.0);
    if change <= -cfg.trend_critical_pct {
        batch.push(
            Severity::Error,
            format!(
                "CRITICAL: Rapid stride decline ({:.0}% decrease) - Seek medical attention",
                change.abs()
            ),
            ORIGIN_TREND,
        );
    } else if change <= -cfg.trend_warning_pct {
        batch.push(
            Severity::Warning,
            format!("Stride length declining ({:.0}% decrease)", change.abs()),
            ORIGIN_TREND,
        );
    } else if change >= cfg.trend_critical_pct {
        batch.push(
            Severity::Success,
            format!("Significant stride improvement ({change:.0}% increase)"),
            ORIGIN_TREND,
        );
    } else if change >= cfg.trend_warning_pct {
        batch.push(
            Severity::Success,
            format!("Stride length improving ({change:.0}% increase)"),
            ORIGIN_TREND,
        );
    }
}

/// Holds the last emitted batch and only lets a new one through once the
/// stabilization interval has passed.
#[derive(Debug, Default)]
pub struct AlertStabilizer {
    stable: Vec<Alert>,
    last_stabilized: Option<Instant>,
}

impl AlertStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the stable batch if it is due. Returns whether it was replaced.
    pub fn refresh(
        &mut self,
        history: &MetricsHistory,
        scoring: &ScoringConfig,
        cfg: &AlertConfig,
        now: Instant,
    ) -> bool {
        if let Some(last) = self.last_stabilized
            && !self.stable.is_empty()
            && now.saturating_duration_since(last) < cfg.stabilization_interval()
        {
            return false;
        }

        self.stable = derive_alerts(history, scoring, cfg);
        self.last_stabilized = Some(now);
        debug!(
            "Alert batch recomputed from {} samples: {} alerts",
            history.len(),
            self.stable.len()
        );
        true
    }

    pub fn stable(&self) -> &[Alert] {
        &self.stable
    }

    pub fn high_priority_count(&self) -> usize {
        self.stable
            .iter()
            .filter(|a| a.severity.is_high_priority())
            .count()
    }

    /// Makes the next refresh recompute regardless of the interval.
    pub fn expire(&mut self) {
        if self.last_stabilized.take().is_some() {
            info!("Alert stabilization clock expired");
        }
    }

    pub(crate) fn reset(&mut self) {
        self.stable.clear();
        self.last_stabilized = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PastMetric;
    use std::time::Duration;

    fn history_of(pairs: &[(f64, f64)]) -> MetricsHistory {
        let batch: Vec<PastMetric> = pairs
            .iter()
            .map(|&(stride, swing)| PastMetric {
                stride_length: Some(stride),
                swing_length: Some(swing),
            })
            .collect();
        let mut history = MetricsHistory::new();
        history.replace(&batch);
        history
    }

    fn derive(history: &MetricsHistory) -> Vec<Alert> {
        derive_alerts(history, &ScoringConfig::default(), &AlertConfig::default())
    }

    fn severities(alerts: &[Alert]) -> Vec<Severity> {
        alerts.iter().map(|a| a.severity).collect()
    }

    #[test]
    fn few_samples_collect_baseline() {
        let alerts = derive(&history_of(&[(120.0, 70.0); 4]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, 1);
        assert_eq!(alerts[0].severity, Severity::Info);
        assert_eq!(alerts[0].origin, ORIGIN_BASELINE);
        assert!(alerts[0].message.contains("collecting baseline"));
    }

    #[test]
    fn steady_gait_is_acknowledged_as_acceptable() {
        let alerts = derive(&history_of(&[(120.0, 70.0); 20]));
        assert_eq!(severities(&alerts), vec![Severity::Success, Severity::Info]);
        assert_eq!(alerts[0].id, 1);
        assert_eq!(alerts[1].id, 2);
        assert_eq!(alerts[1].message, "Analysis based on 20 gait measurements");
    }

    #[test]
    fn short_strides_and_swing_raise_warnings() {
        let alerts = derive(&history_of(&[(52.0, 33.0); 20]));
        assert_eq!(
            severities(&alerts),
            vec![Severity::Warning, Severity::Warning, Severity::Info]
        );
        assert_eq!(
            alerts[0].message,
            "Significantly reduced stride length detected (50px) - Potential shuffling gait"
        );
        assert_eq!(
            alerts[1].message,
            "Reduced arm swing detected (30px) - Possible mobility issue"
        );
    }

    #[test]
    fn moderately_short_strides_are_informational() {
        let alerts = derive(&history_of(&[(88.0, 70.0); 12]));
        assert_eq!(alerts[0].severity, Severity::Info);
        assert_eq!(alerts[0].message, "Moderately reduced stride length observed (90px)");
        // Info does not suppress the acceptable-range acknowledgement.
        assert_eq!(alerts[1].severity, Severity::Success);
    }

    #[test]
    fn sharp_decline_is_critical() {
        let mut pairs = vec![(150.0, 70.0); 10];
        pairs.extend(vec![(100.0, 70.0); 10]);
        let alerts = derive(&history_of(&pairs));
        assert_eq!(severities(&alerts), vec![Severity::Error, Severity::Info]);
        assert_eq!(alerts[0].origin, ORIGIN_TREND);
        assert_eq!(
            alerts[0].message,
            "CRITICAL: Rapid stride decline (33% decrease) - Seek medical attention"
        );
    }

    #[test]
    fn mild_decline_warns_and_improvement_succeeds() {
        let mut declining = vec![(150.0, 70.0); 10];
        declining.extend(vec![(132.0, 70.0); 10]);
        let alerts = derive(&history_of(&declining));
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].message, "Stride length declining (12% decrease)");

        let mut improving = vec![(125.0, 70.0); 10];
        improving.extend(vec![(140.0, 70.0); 10]);
        let alerts = derive(&history_of(&improving));
        assert_eq!(
            severities(&alerts),
            vec![Severity::Success, Severity::Success, Severity::Info]
        );
        assert_eq!(alerts[0].message, "Stride length improving (12% increase)");

        let mut surging = vec![(120.0, 70.0); 10];
        surging.extend(vec![(150.0, 70.0); 10]);
        let alerts = derive(&history_of(&surging));
        assert_eq!(alerts[0].message, "Significant stride improvement (25% increase)");
    }

    #[test]
    fn trend_is_skipped_when_earlier_strides_are_zero() {
        let mut pairs = vec![(0.0, 70.0); 10];
        pairs.extend(vec![(150.0, 70.0); 10]);
        let alerts = derive(&history_of(&pairs));
        assert!(alerts.iter().all(|a| a.origin != ORIGIN_TREND));
    }

    #[test]
    fn high_category_risk_is_an_error() {
        // Category A: 30 + 25 + 20 = 75.
        let pairs: Vec<(f64, f64)> = (0..20)
            .map(|i| (if i % 2 == 0 { 110.0 } else { 190.0 }, 95.0))
            .collect();
        let alerts = derive(&history_of(&pairs));
        assert_eq!(alerts[0].severity, Severity::Error);
        assert_eq!(alerts[0].origin, ORIGIN_RISK);
        assert_eq!(
            alerts[0].message,
            "HIGH RISK: Parkinson's Disease risk at 75% - Immediate attention recommended"
        );
    }

    #[test]
    fn batch_is_truncated_to_highest_priority_entries() {
        let cfg = AlertConfig {
            risk_warning_above: -1.0,
            ..AlertConfig::default()
        };
        let alerts = derive_alerts(
            &history_of(&[(52.0, 33.0); 20]),
            &ScoringConfig::default(),
            &cfg,
        );
        assert_eq!(alerts.len(), 5);
        assert_eq!(
            alerts.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(alerts.iter().all(|a| a.severity == Severity::Warning));
    }

    #[test]
    fn batches_never_exceed_five_entries() {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for len in 0..60 {
            let pairs: Vec<(f64, f64)> = (0..len)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    let stride = (seed % 400) as f64 - 200.0;
                    let swing = ((seed >> 16) % 200) as f64 - 100.0;
                    (stride, swing)
                })
                .collect();
            let alerts = derive(&history_of(&pairs));
            assert!(!alerts.is_empty());
            assert!(alerts.len() <= 5, "{} alerts for {len} samples", alerts.len());
        }
    }

    #[test]
    fn stable_batch_holds_until_interval_elapses() {
        let scoring = ScoringConfig::default();
        let cfg = AlertConfig::default();
        let mut stabilizer = AlertStabilizer::new();
        let t0 = Instant::now();

        let mut history = history_of(&[(120.0, 70.0); 20]);
        assert!(stabilizer.refresh(&history, &scoring, &cfg, t0));
        let first = stabilizer.stable().to_vec();

        history = history_of(&[(52.0, 33.0); 20]);
        assert!(!stabilizer.refresh(&history, &scoring, &cfg, t0 + Duration::from_millis(4_999)));
        assert_eq!(first, stabilizer.stable());

        assert!(stabilizer.refresh(&history, &scoring, &cfg, t0 + Duration::from_secs(5)));
        let fresh = stabilizer.stable().to_vec();
        assert_ne!(first, fresh);
        assert_eq!(fresh, derive(&history));
        assert_eq!(stabilizer.high_priority_count(), 2);
    }

    #[test]
    fn expiry_forces_immediate_recompute() {
        let scoring = ScoringConfig::default();
        let cfg = AlertConfig::default();
        let mut stabilizer = AlertStabilizer::new();
        let t0 = Instant::now();

        assert!(stabilizer.refresh(&history_of(&[(120.0, 70.0); 2]), &scoring, &cfg, t0));
        // Baseline batches also stamp the clock.
        let history = history_of(&[(120.0, 70.0); 20]);
        assert!(!stabilizer.refresh(&history, &scoring, &cfg, t0 + Duration::from_secs(1)));
        assert_eq!(stabilizer.stable().len(), 1);

        stabilizer.expire();
        assert!(stabilizer.refresh(&history, &scoring, &cfg, t0 + Duration::from_secs(2)));
        assert_eq!(stabilizer.stable().len(), 2);
    }

    #[test]
    fn reset_empties_the_latch() {
        let scoring = ScoringConfig::default();
        let cfg = AlertConfig::default();
        let mut stabilizer = AlertStabilizer::new();
        let t0 = Instant::now();
        stabilizer.refresh(&history_of(&[(120.0, 70.0); 20]), &scoring, &cfg, t0);

        stabilizer.reset();
        assert!(stabilizer.stable().is_empty());
        assert!(stabilizer.refresh(&MetricsHistory::new(), &scoring, &cfg, t0));
        assert_eq!(stabilizer.stable()[0].origin, ORIGIN_BASELINE);
    }
}
