//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::display::DisplaySink;
use crate::logic::telemetry::{TelemetryPacket, TelemetryRun, now_ms};
use crate::protocol::{InboundResponse, SuccessResponse};
use crate::session::StreamingSession;
use log::{debug, warn};

/// Routes one inbound message. Every message, parseable or not, acknowledges
/// exactly one in-flight frame.
pub fn dispatch(
    raw: &str,
    session: &mut StreamingSession,
    display: &mut dyn DisplaySink,
    telemetry: &TelemetryRun,
) -> InboundResponse {
    session.acknowledge();
    let response = InboundResponse::parse(raw);

    match &response {
        InboundResponse::Success(success) => route_success(success, session, display),
        InboundResponse::Error { message } => {
            warn!("Session {}: server error: {message}", session.id);
            session.status = format!("Error: {message}");
        }
        InboundResponse::Malformed => {
            session.status = "Frame processed successfully".to_string();
        }
    }

    telemetry.write(&TelemetryPacket::Response {
        session: &session.id,
        response: response.kind(),
        in_flight: session.in_flight(),
        samples: session.history.len(),
        ts: now_ms(),
    });
    response
}

fn route_success(
    success: &SuccessResponse,
    session: &mut StreamingSession,
    display: &mut dyn DisplaySink,
) {
    let frame = success
        .frame_count
        .map_or_else(|| "?".to_string(), |n| n.to_string());
    session.status = format!(
        "Frame {frame}: {}x{} (Queue: {})",
        success.dimensions.width,
        success.dimensions.height,
        session.in_flight()
    );
    session.last_dimensions = Some(success.dimensions);

    if let Some(image) = &success.processed_image {
        display.show_processed_frame(image);
        session.processed_image = Some(image.clone());
    }

    if let Some(metric) = &success.latest_metric {
        display.show_metric(metric);
        session.latest_metric = Some(metric.clone());
    }

    if let Some(batch) = &success.history_batch {
        session.history.replace(batch);
        debug!(
            "Session {}: history replaced with {} samples",
            session.id,
            session.history.len()
        );
    }
}
