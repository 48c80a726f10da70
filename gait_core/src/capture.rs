//! Capture collaborators: the still-frame source and the wall clock.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::ClientError;
use crate::protocol::encode_jpeg_data_url;
use chrono::{DateTime, SecondsFormat, Utc};
use image::ImageFormat;
use image::imageops::FilterType;
use log::{debug, warn};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supplies "the current still frame" on demand, already encoded as a JPEG data URL.
/// `Ok(None)` means the device had nothing to offer this time.
pub trait FrameSource {
    fn grab(&mut self) -> Result<Option<String>, ClientError>;
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn iso_timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Cycles through the still images of a directory, standing in for a camera.
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl DirectorySource {
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self, ClientError> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {e}", dir.display());
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_image(p))
            .collect();

        if files.is_empty() {
            return Err(ClientError::Capture(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        files.sort();
        debug!("Capture source: {} frames from {}", files.len(), dir.display());

        Ok(Self {
            files,
            next: 0,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn encode(&self, path: &Path) -> Result<String, ClientError> {
        let img = image::open(path)
            .map_err(|e| ClientError::Capture(format!("{}: {e}", path.display())))?;
        let rgb = image::DynamicImage::ImageRgb8(
            img.resize_exact(self.width, self.height, FilterType::Triangle)
                .to_rgb8(),
        );

        let mut jpeg = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .map_err(|e| ClientError::Capture(format!("{}: {e}", path.display())))?;
        Ok(encode_jpeg_data_url(&jpeg))
    }
}

impl FrameSource for DirectorySource {
    fn grab(&mut self) -> Result<Option<String>, ClientError> {
        let Some(path) = self.files.get(self.next).cloned() else {
            return Ok(None);
        };
        self.next = (self.next + 1) % self.files.len();
        self.encode(&path).map(Some)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
