//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::capture::{Clock, FrameSource};
use crate::config::TransportConfig;
use crate::error::ClientError;
use crate::logic::connection::FrameLink;
use crate::logic::telemetry::{TelemetryPacket, TelemetryRun, now_ms};
use crate::protocol::OutboundFrame;
use crate::session::{ConnectionState, StreamingSession};
use log::{debug, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// The admission decision for one capture tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Send,
    /// Too soon after the last send. Not counted.
    Pace,
    /// Over the in-flight ceiling. Counted as a dropped frame.
    Drop,
}

/// Hard ceiling first, then adaptive pacing.
pub fn admit(
    in_flight: u32,
    last_sent: Option<Instant>,
    now: Instant,
    cfg: &TransportConfig,
) -> Admission {
    if in_flight > cfg.max_in_flight {
        return Admission::Drop;
    }

    let min_interval = if in_flight > cfg.backlog_threshold {
        Duration::from_millis(cfg.backlog_interval_ms)
    } else {
        Duration::from_millis(cfg.idle_interval_ms)
    };
    match last_sent {
        Some(sent) if now.saturating_duration_since(sent) < min_interval => Admission::Pace,
        _ => Admission::Send,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not monitoring or not connected.
    Idle,
    Paced,
    Dropped,
    Sent { frame_id: u64 },
    CaptureFailed(String),
    SendFailed(String),
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Idle => write!(f, "idle"),
            TickOutcome::Paced => write!(f, "paced"),
            TickOutcome::Dropped => write!(f, "dropped"),
            TickOutcome::Sent { frame_id } => write!(f, "sent #{frame_id}"),
            TickOutcome::CaptureFailed(reason) => write!(f, "capture failed: {reason}"),
            TickOutcome::SendFailed(reason) => write!(f, "send failed: {reason}"),
        }
    }
}

/// Decides, tick by tick, whether a frame goes out.
pub struct FrameTransport {
    cfg: TransportConfig,
    user_id: String,
}

impl FrameTransport {
    pub fn new(cfg: TransportConfig, user_id: impl Into<String>) -> Self {
        Self {
            cfg,
            user_id: user_id.into(),
        }
    }

    /// Runs one capture tick. Failures land in the session status; nothing here
    /// stops the tick loop.
    pub fn tick(
        &self,
        session: &mut StreamingSession,
        source: &mut dyn FrameSource,
        link: &mut dyn FrameLink,
        clock: &dyn Clock,
        telemetry: &TelemetryRun,
        now: Instant,
    ) -> TickOutcome {
        if !session.is_monitoring() || session.connection() != ConnectionState::Connected {
            return TickOutcome::Idle;
        }

        match admit(session.in_flight(), session.last_sent_at(), now, &self.cfg) {
            Admission::Pace => return TickOutcome::Paced,
            Admission::Drop => {
                session.record_drop();
                debug!(
                    "Session {}: dropping frame, {} in flight",
                    session.id,
                    session.in_flight()
                );
                telemetry.write(&TelemetryPacket::FrameDropped {
                    session: &session.id,
                    in_flight: session.in_flight(),
                    dropped_frames: session.dropped_frames(),
                    ts: now_ms(),
                });
                return TickOutcome::Dropped;
            }
            Admission::Send => {}
        }

        let image = match source.grab() {
            Ok(Some(image)) => image,
            Ok(None) => return self.capture_failed(session, telemetry, "no frame available"),
            Err(ClientError::Capture(reason)) => {
                return self.capture_failed(session, telemetry, &reason);
            }
            Err(e) => return self.capture_failed(session, telemetry, &e.to_string()),
        };

        let frame_id = session.next_sequence();
        let frame = OutboundFrame::new(image, clock.iso_timestamp(), &self.user_id, frame_id);
        let payload = match frame.to_json() {
            Ok(payload) => payload,
            Err(e) => return self.send_failed(session, ClientError::Send(e.to_string())),
        };
        if let Err(e) = link.send_text(payload) {
            return self.send_failed(session, e);
        }

        session.record_sent(now);
        telemetry.write(&TelemetryPacket::FrameSent {
            session: &session.id,
            frame_id,
            in_flight: session.in_flight(),
            ts: now_ms(),
        });
        TickOutcome::Sent { frame_id }
    }

    fn capture_failed(
        &self,
        session: &mut StreamingSession,
        telemetry: &TelemetryRun,
        reason: &str,
    ) -> TickOutcome {
        warn!("Session {}: error capturing frame: {reason}", session.id);
        session.status = format!("Error capturing frame: {reason}");
        telemetry.write(&TelemetryPacket::CaptureFailed {
            session: &session.id,
            reason,
            ts: now_ms(),
        });
        TickOutcome::CaptureFailed(reason.to_string())
    }

    fn send_failed(&self, session: &mut StreamingSession, err: ClientError) -> TickOutcome {
        warn!("Session {}: {err}", session.id);
        session.status = format!("Error: {err}");
        TickOutcome::SendFailed(err.to_string())
    }
}
