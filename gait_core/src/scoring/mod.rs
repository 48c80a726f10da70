//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod alerts;
pub mod risk;

/// Rounds half toward positive infinity, the convention the alert thresholds are tuned against.
pub(crate) fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Rounds to the nearest multiple of `step`.
pub(crate) fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    round_half_up(value / step) * step
}
