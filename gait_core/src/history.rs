//! Session-scoped store of the gait measurement series.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::protocol::PastMetric;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaitSample {
    pub stride_length: f64,
    pub swing_length: f64,
    /// Position in the buffer, not a server-side identifier.
    pub ordinal: usize,
}

/// Chronologically ordered samples. Readers only ever look at a short suffix,
/// so the buffer itself is left unbounded.
#[derive(Debug, Default, Clone)]
pub struct MetricsHistory {
    samples: Vec<GaitSample>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole buffer with a server-sent batch. No merging with
    /// previously held samples takes place.
    pub fn replace(&mut self, batch: &[PastMetric]) {
        self.samples = batch
            .iter()
            .enumerate()
            .map(|(ordinal, m)| GaitSample {
                stride_length: m.stride_length.unwrap_or(0.0),
                swing_length: m.swing_length.unwrap_or(0.0),
                ordinal,
            })
            .collect();
    }

    pub fn push(&mut self, stride_length: f64, swing_length: f64) {
        let ordinal = self.samples.len();
        self.samples.push(GaitSample {
            stride_length,
            swing_length,
            ordinal,
        });
    }

    /// The most recent `n` samples (fewer if the buffer is shorter).
    pub fn last(&self, n: usize) -> &[GaitSample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }
}
