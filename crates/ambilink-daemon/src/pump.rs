//! Frame pump: pulls frames from the capture engine and drives the link.

use ambilink_hw::{Frame, LinkSession, PreviewImage};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::capture::CaptureEngine;

/// Outcome of one pump tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Keep ticking.
    Running,
    /// The capture engine stopped; the session has been torn down.
    Stopped,
    /// The session was closed from outside the pump.
    Closed,
}

/// Periodic driver between a capture engine and a link session.
pub struct FramePump<E: CaptureEngine> {
    engine: Arc<Mutex<E>>,
    session: Arc<LinkSession>,
    preview: Arc<RwLock<PreviewImage>>,
    buffer: Vec<u32>,
}

impl<E: CaptureEngine> FramePump<E> {
    /// Creates a pump for an already started engine.
    pub fn new(
        engine: Arc<Mutex<E>>,
        session: Arc<LinkSession>,
        preview: Arc<RwLock<PreviewImage>>,
    ) -> Self {
        let buffer = vec![0; session.config().pixel_count()];
        Self {
            engine,
            session,
            preview,
            buffer,
        }
    }

    /// Runs one capture and outbound step.
    pub fn tick(&mut self, now: Instant) -> PumpStatus {
        let processed = {
            let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
            let processed = engine.process();
            if !engine.is_running() {
                engine.stop();
                drop(engine);
                warn!("Capture engine stopped, no longer capturing");
                self.session.close();
                return PumpStatus::Stopped;
            }
            if processed {
                engine.pixels(&mut self.buffer);
            }
            processed
        };

        let frame = if processed {
            self.capture_frame()
        } else {
            None
        };
        self.session.tick(frame, now);
        PumpStatus::Running
    }

    fn capture_frame(&self) -> Option<Frame> {
        let frame = match Frame::new(self.session.config(), &self.buffer) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Discarding captured frame: {}", e);
                return None;
            }
        };
        let mut preview = self.preview.write().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = preview.write_frame(frame.pixels()) {
            debug!("Preview not updated: {}", e);
        }
        Some(frame)
    }

    /// Ticks at a fixed period until the engine stops or the session closes.
    pub async fn run(mut self, period: Duration) -> PumpStatus {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Frame pump started ({:?} period)", period);

        loop {
            ticker.tick().await;
            if !self.session.is_open() {
                info!("Link closed, frame pump stopping");
                return PumpStatus::Closed;
            }
            if self.tick(Instant::now()) == PumpStatus::Stopped {
                return PumpStatus::Stopped;
            }
        }
    }
}
