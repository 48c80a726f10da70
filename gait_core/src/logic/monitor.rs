//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::capture::{Clock, FrameSource, SystemClock};
use crate::config::MonitorConfig;
use crate::display::DisplaySink;
use crate::error::ClientError;
use crate::logic::connection::{ConnectionManager, TaggedEvent};
use crate::logic::demux;
use crate::logic::telemetry::{TelemetryPacket, TelemetryRun, now_ms};
use crate::logic::transport::{FrameTransport, TickOutcome};
use crate::session::{ConnectionState, StreamingSession};
use crate::view::DashboardView;
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};

const CLOCK_PERIOD: Duration = Duration::from_secs(1);
/// Upper bound on waiting for the close frame to go out when a run ends.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Owns one streaming session and everything that acts on it. All mutation
/// happens on the task driving [`Monitor::run`], one handler at a time.
pub struct Monitor {
    cfg: MonitorConfig,
    session: StreamingSession,
    connection: ConnectionManager,
    transport: FrameTransport,
    source: Box<dyn FrameSource>,
    display: Box<dyn DisplaySink>,
    clock: Box<dyn Clock>,
    telemetry: TelemetryRun,
    events: flume::Receiver<TaggedEvent>,
}

impl Monitor {
    pub fn new(
        cfg: MonitorConfig,
        source: Box<dyn FrameSource>,
        display: Box<dyn DisplaySink>,
    ) -> Result<Self, ClientError> {
        cfg.validate()?;
        let connection = ConnectionManager::new(cfg.server_endpoint()?, cfg.transport.outbound_queue);
        let transport = FrameTransport::new(cfg.transport.clone(), cfg.user_id.clone());
        let telemetry = TelemetryRun::new(&cfg.trace)?;
        let events = connection.events();

        Ok(Self {
            cfg,
            session: StreamingSession::new(),
            connection,
            transport,
            source,
            display,
            clock: Box::new(SystemClock),
            telemetry,
            events,
        })
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    pub fn telemetry(&self) -> &TelemetryRun {
        &self.telemetry
    }

    /// Begins a fresh monitoring session. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.session.is_monitoring() {
            debug!("Session {}: already monitoring", self.session.id);
            return;
        }
        self.session.cascade_reset();
        self.session.alerts.expire();
        self.session.set_monitoring(true);
        self.session.status = "Connecting to AI server".to_string();
        info!(
            "Session {}: monitoring started (user {})",
            self.session.id, self.cfg.user_id
        );
        self.connection.open(&mut self.session);
    }

    /// Cancels capture, closes the socket and resets the session, together.
    pub fn stop(&mut self) {
        self.session.set_monitoring(false);
        self.connection.close(&mut self.session, &self.telemetry);
        self.session.alerts.expire();
        info!("Session {}: monitoring stopped", self.session.id);
    }

    pub fn capture_tick(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.transport.tick(
            &mut self.session,
            self.source.as_mut(),
            &mut self.connection,
            self.clock.as_ref(),
            &self.telemetry,
            now,
        );
        if !matches!(outcome, TickOutcome::Idle | TickOutcome::Paced) {
            debug!("Session {}: tick {outcome}", self.session.id);
        }
        outcome
    }

    /// Refreshes the stable alert batch if due and pushes a new view to the display.
    pub fn clock_tick(&mut self, now: Instant) -> DashboardView {
        let replaced = self.session.alerts.refresh(
            &self.session.history,
            &self.cfg.scoring,
            &self.cfg.alerts,
            now,
        );
        if replaced {
            self.telemetry.write(&TelemetryPacket::AlertBatch {
                session: &self.session.id,
                alerts: self.session.alerts.stable().len(),
                high_priority: self.session.alerts.high_priority_count(),
                samples: self.session.history.len(),
                ts: now_ms(),
            });
        }

        let view = DashboardView::build(&self.session, &self.cfg.scoring, self.clock.as_ref());
        self.display.show_dashboard(&view);
        view
    }

    pub fn handle_event(&mut self, tagged: TaggedEvent) {
        if let Some(text) = self
            .connection
            .accept(tagged, &mut self.session, &self.telemetry)
        {
            demux::dispatch(
                &text,
                &mut self.session,
                self.display.as_mut(),
                &self.telemetry,
            );
        }
    }

    /// Runs a monitoring session until `duration` elapses, Ctrl-C arrives, or
    /// the connection ends. Returns the last view taken before stopping.
    pub async fn run(&mut self, duration: Option<Duration>) -> DashboardView {
        self.start();

        let mut capture = interval(self.cfg.capture.tick());
        capture.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clock = interval(CLOCK_PERIOD);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);
        let events = self.events.clone();

        loop {
            tokio::select! {
                _ = capture.tick(), if self.session.is_monitoring() => {
                    self.capture_tick(Instant::now());
                }
                _ = clock.tick() => {
                    self.clock_tick(Instant::now());
                }
                event = events.recv_async() => match event {
                    Ok(tagged) => {
                        self.handle_event(tagged);
                        if !self.connection.is_open() {
                            info!(
                                "Session {}: connection ended ({})",
                                self.session.id,
                                self.session.connection()
                            );
                            break;
                        }
                    }
                    Err(_) => break,
                },
                _ = &mut deadline => {
                    info!("Session {}: run duration elapsed", self.session.id);
                    break;
                }
                signal = &mut interrupt => {
                    match signal {
                        Ok(()) => info!("Session {}: interrupted", self.session.id),
                        Err(e) => warn!("Session {}: signal handler failed: {e}", self.session.id),
                    }
                    break;
                }
            }
        }

        let last = self.clock_tick(Instant::now());
        if self.session.connection() == ConnectionState::Connected || self.connection.is_open() {
            self.stop();
            self.connection.settle(CLOSE_GRACE).await;
        } else {
            // Already torn down by the connection manager; keep its status.
            self.session.set_monitoring(false);
        }
        self.telemetry.request_flush();
        last
    }
}
