//! Explicit per-session state shared by the connection, transport, demultiplexer
//! and scoring components.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::history::MetricsHistory;
use crate::protocol::{Dimensions, GaitMetrics};
use crate::scoring::alerts::AlertStabilizer;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    #[serde(rename = "error")]
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one monitoring session in logs and traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct StreamingSession {
    pub id: SessionId,
    connection: ConnectionState,
    monitoring: bool,
    in_flight: u32,
    sent_frames: u64,
    dropped_frames: u64,
    /// Never rewound, so frame ids stay unique for the life of the process.
    next_sequence: u64,
    last_sent_at: Option<Instant>,
    pub history: MetricsHistory,
    pub alerts: AlertStabilizer,
    pub processed_image: Option<String>,
    pub latest_metric: Option<GaitMetrics>,
    pub last_dimensions: Option<Dimensions>,
    pub status: String,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            connection: ConnectionState::Disconnected,
            monitoring: false,
            in_flight: 0,
            sent_frames: 0,
            dropped_frames: 0,
            next_sequence: 0,
            last_sent_at: None,
            history: MetricsHistory::new(),
            alerts: AlertStabilizer::new(),
            processed_image: None,
            latest_metric: None,
            last_dimensions: None,
            status: String::new(),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Only the connection manager moves the connection state.
    pub(crate) fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub(crate) fn set_monitoring(&mut self, monitoring: bool) {
        self.monitoring = monitoring;
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight > 0
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Books a frame that has just been handed to the socket.
    pub(crate) fn record_sent(&mut self, now: Instant) {
        self.next_sequence += 1;
        self.in_flight += 1;
        self.sent_frames += 1;
        self.last_sent_at = Some(now);
    }

    pub(crate) fn record_drop(&mut self) {
        self.dropped_frames += 1;
    }

    /// One inbound message acknowledges one frame. Late acknowledgements after
    /// a reset must not wrap the counter.
    pub(crate) fn acknowledge(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Returns every session-scoped entity to empty so nothing from one
    /// connection leaks into the next.
    pub fn cascade_reset(&mut self) {
        debug!(
            "Session {}: cascade reset (in_flight={}, samples={}, dropped={})",
            self.id,
            self.in_flight,
            self.history.len(),
            self.dropped_frames
        );
        self.in_flight = 0;
        self.sent_frames = 0;
        self.dropped_frames = 0;
        self.last_sent_at = None;
        self.history.clear();
        self.alerts.reset();
        self.processed_image = None;
        self.latest_metric = None;
        self.last_dimensions = None;
    }
}
