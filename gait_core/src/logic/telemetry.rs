//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::TraceConfig;
use crate::error::ClientError;
use crate::session::SessionId;
use crossbeam_channel::{Sender, TrySendError, bounded, select, tick};
use log::{debug, warn};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A structured trace record of one session event.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryPacket<'a> {
    // Frame handed to the socket
    FrameSent {
        session: &'a SessionId,
        frame_id: u64,
        in_flight: u32,
        ts: u128,
    },
    // Tick skipped because too much work was unacknowledged
    FrameDropped {
        session: &'a SessionId,
        in_flight: u32,
        dropped_frames: u64,
        ts: u128,
    },
    CaptureFailed {
        session: &'a SessionId,
        reason: &'a str,
        ts: u128,
    },
    // One inbound message, classified
    Response {
        session: &'a SessionId,
        response: &'a str,
        in_flight: u32,
        samples: usize,
        ts: u128,
    },
    ConnectionTransition {
        session: &'a SessionId,
        from: &'a str,
        to: &'a str,
        reason: &'a str,
        ts: u128,
    },
    // Stable alert batch replaced
    AlertBatch {
        session: &'a SessionId,
        alerts: usize,
        high_priority: usize,
        samples: usize,
        ts: u128,
    },
}

pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

enum TelemetryMsg {
    Line(String),
    Flush,
    Shutdown,
}

/// Optional JSON-lines trace of a monitoring run, written off the dispatch loop.
pub struct TelemetryRun {
    pub run_id: String,
    path: Option<PathBuf>,
    tx: Option<Sender<TelemetryMsg>>,
    handle: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryRun {
    pub fn disabled() -> Self {
        Self {
            run_id: Self::new_run_id(),
            path: None,
            tx: None,
            handle: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates `<dir>/<run id>/trace.log` and spawns the writer thread when enabled.
    /// Lines are batched up to BATCH_MAX or FLUSH_EVERY, whichever comes first.
    pub fn new(cfg: &TraceConfig) -> Result<Self, ClientError> {
        if !cfg.enabled {
            return Ok(Self::disabled());
        }

        let run_id = Self::new_run_id();
        let base = cfg.dir.join(&run_id);
        fs::create_dir_all(&base)?;
        let path = base.join("trace.log");
        let file = OpenOptions::new().append(true).create(true).open(&path)?;

        let (tx, rx) = bounded::<TelemetryMsg>(4096);

        let handle = thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || {
                const BATCH_MAX: usize = 256;
                const FLUSH_EVERY: Duration = Duration::from_millis(500);

                let mut writer = BufWriter::new(file);
                let mut buf: Vec<String> = Vec::with_capacity(BATCH_MAX);
                let ticker = tick(FLUSH_EVERY);

                let flush_buf = |writer: &mut BufWriter<File>, buf: &mut Vec<String>| {
                    for line in buf.drain(..) {
                        if let Err(e) = writer
                            .write_all(line.as_bytes())
                            .and_then(|_| writer.write_all(b"\n"))
                        {
                            warn!("trace write failed: {e}");
                        }
                    }
                    let _ = writer.flush();
                };

                loop {
                    select! {
                        recv(rx) -> msg => match msg {
                            Ok(TelemetryMsg::Line(line)) => {
                                buf.push(line);
                                if buf.len() >= BATCH_MAX {
                                    flush_buf(&mut writer, &mut buf);
                                }
                            }
                            Ok(TelemetryMsg::Flush) => flush_buf(&mut writer, &mut buf),
                            Ok(TelemetryMsg::Shutdown) | Err(_) => {
                                flush_buf(&mut writer, &mut buf);
                                break;
                            }
                        },
                        recv(ticker) -> _ => {
                            if !buf.is_empty() {
                                flush_buf(&mut writer, &mut buf);
                            }
                        }
                    }
                }
            })?;

        debug!("Trace enabled: {}", path.display());

        Ok(Self {
            run_id,
            path: Some(path),
            tx: Some(tx),
            handle: Some(handle),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    fn new_run_id() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Enqueues a packet without blocking. A full queue drops the packet.
    pub fn write(&self, pkt: &TelemetryPacket) {
        let Some(tx) = &self.tx else {
            return;
        };

        let line = match serde_json::to_string(pkt) {
            Ok(line) => line,
            Err(e) => {
                warn!("trace serialization failed: {e}");
                return;
            }
        };

        match tx.try_send(TelemetryMsg::Line(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {} // writer gone, shutting down
        }
    }

    pub fn request_flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(TelemetryMsg::Flush);
        }
    }

    /// Packets lost to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for TelemetryRun {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(TelemetryMsg::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
