//! Wire format exchanged with the gait inference service.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const FRAME_KIND: &str = "gait_analysis";
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// One captured still, as sent to the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    /// JPEG data URL.
    pub image: String,
    /// ISO-8601 capture time.
    pub timestamp: String,
    pub user_id: String,
    pub frame_id: u64,
}

impl OutboundFrame {
    pub fn new(image: String, timestamp: String, user_id: &str, frame_id: u64) -> Self {
        Self {
            kind: FRAME_KIND.to_string(),
            image,
            timestamp,
            user_id: user_id.to_string(),
            frame_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default, deserialize_with = "whole_u32")]
    pub width: u32,
    #[serde(default, deserialize_with = "whole_u32")]
    pub height: u32,
}

/// Latest per-frame measurement snapshot reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaitMetrics {
    #[serde(default)]
    pub avg_stride: Option<f64>,
    #[serde(default)]
    pub avg_swing: Option<f64>,
    #[serde(default, deserialize_with = "whole_u64_opt")]
    pub frame_count: Option<u64>,
}

/// One entry of a history batch. Missing or null values count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PastMetric {
    #[serde(default)]
    pub stride_length: Option<f64>,
    #[serde(default)]
    pub swing_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuccessResponse {
    pub frame_count: Option<u64>,
    pub dimensions: Dimensions,
    pub processed_image: Option<String>,
    pub latest_metric: Option<GaitMetrics>,
    pub history_batch: Option<Vec<PastMetric>>,
}

/// A single inbound message, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundResponse {
    Success(SuccessResponse),
    Error { message: String },
    Malformed,
}

impl InboundResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundResponse::Success(_) => "success",
            InboundResponse::Error { .. } => "error",
            InboundResponse::Malformed => "malformed",
        }
    }

    /// Classifies a raw text message. Never fails: anything that is not a
    /// well-formed success or error message is `Malformed`.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<RawResponse>(raw) {
            Ok(RawResponse::Success {
                frame_count,
                dimensions,
                processed_image,
                gait_metrics,
                past_metrics,
            }) => InboundResponse::Success(SuccessResponse {
                frame_count,
                dimensions: dimensions.unwrap_or_default(),
                processed_image,
                latest_metric: gait_metrics,
                history_batch: past_metrics,
            }),
            Ok(RawResponse::Error { message }) => InboundResponse::Error {
                message: message.unwrap_or_else(|| "unknown error".to_string()),
            },
            Err(e) => {
                log::debug!("Unrecognized inbound message ({e}): {raw:.120}");
                InboundResponse::Malformed
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RawResponse {
    Success {
        #[serde(default, deserialize_with = "whole_u64_opt")]
        frame_count: Option<u64>,
        #[serde(default)]
        dimensions: Option<Dimensions>,
        #[serde(default)]
        processed_image: Option<String>,
        #[serde(default)]
        gait_metrics: Option<GaitMetrics>,
        #[serde(default)]
        past_metrics: Option<Vec<PastMetric>>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Counts and pixel sizes may arrive as `640` or `640.0`; both are accepted,
/// fractional or negative values are not.
fn whole_number<E: de::Error>(value: f64) -> Result<u64, E> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(E::custom(format!("expected a whole number, got {value}")))
    }
}

fn whole_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = whole_number(f64::deserialize(deserializer)?)?;
    u32::try_from(value).map_err(de::Error::custom)
}

fn whole_u64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<f64>::deserialize(deserializer)?
        .map(whole_number)
        .transpose()
}

pub fn encode_jpeg_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(JPEG_DATA_URL_PREFIX);
    STANDARD.encode_string(jpeg, &mut url);
    url
}

/// Decodes an image data URL (any media type) or a bare base64 payload.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match url.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, p)| p).unwrap_or(rest),
        None => url,
    };
    STANDARD.decode(payload.trim())
}
