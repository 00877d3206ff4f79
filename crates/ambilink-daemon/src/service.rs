//! Session lifecycle: the operations offered to a front-end.

use ambilink_hw::link::spawn_reader;
use ambilink_hw::{Connector, LinkConfig, LinkSession, LinkTiming, PreviewImage};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::CaptureEngine;
use crate::config::Config;
use crate::pump::FramePump;

/// Errors starting or using a session.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Opening or driving the link failed.
    #[error("Link error: {0}")]
    Link(#[from] ambilink_hw::Error),

    /// The capture engine refused to start.
    #[error("Capture engine failed to start on output {0}")]
    CaptureStart(i32),

    /// Writing the preview failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters fixed for every session the service starts.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Light grid announced to the board.
    pub grid: LinkConfig,
    /// Grace period and keepalive interval.
    pub timing: LinkTiming,
    /// Capture output selector.
    pub output: i32,
    /// Frame pump period.
    pub interval: Duration,
}

impl SessionSettings {
    /// Resolves session settings from the configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            grid: config.capture.grid()?,
            timing: config.link.timing(),
            output: config.capture.output,
            interval: config.capture.interval(),
        })
    }
}

/// A running session: link, reader thread and pump task.
struct ActiveSession {
    endpoint: String,
    session: Arc<LinkSession>,
    pump: JoinHandle<()>,
    // Holds the read half of the channel until it exits
    reader: thread::JoinHandle<()>,
}

/// Owns the capture engine and at most one link session.
pub struct LightsService<E: CaptureEngine> {
    settings: SessionSettings,
    connector: Box<dyn Connector>,
    engine: Arc<Mutex<E>>,
    preview: Arc<RwLock<PreviewImage>>,
    active: Mutex<Option<ActiveSession>>,
}

impl<E: CaptureEngine> LightsService<E> {
    /// Creates an idle service.
    pub fn new(settings: SessionSettings, connector: Box<dyn Connector>, engine: E) -> Self {
        Self {
            preview: Arc::new(RwLock::new(PreviewImage::new(&settings.grid))),
            settings,
            connector,
            engine: Arc::new(Mutex::new(engine)),
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the endpoint and starts streaming frames to it.
    ///
    /// Any previous session is stopped first. On failure nothing is left
    /// running. Must be called from within a Tokio runtime.
    pub fn start_session(&self, endpoint: &str) -> Result<(), ServiceError> {
        self.stop_session();

        let grid = self.settings.grid;
        let channel = self.connector.connect(endpoint)?;
        let session = Arc::new(LinkSession::new(
            grid,
            self.settings.timing,
            channel.writer,
            Instant::now(),
        ));

        if !self
            .lock_engine()
            .start(self.settings.output, grid.columns(), grid.rows())
        {
            session.close();
            return Err(ServiceError::CaptureStart(self.settings.output));
        }

        let reader = match spawn_reader(session.clone(), channel.reader) {
            Ok(reader) => reader,
            Err(e) => {
                self.lock_engine().stop();
                session.close();
                return Err(e.into());
            }
        };

        *self.preview.write().unwrap_or_else(PoisonError::into_inner) = PreviewImage::new(&grid);

        let pump = FramePump::new(self.engine.clone(), session.clone(), self.preview.clone());
        let interval = self.settings.interval;
        let pump = tokio::spawn(async move {
            let status = pump.run(interval).await;
            debug!("Frame pump exited: {:?}", status);
        });

        *self.lock_active() = Some(ActiveSession {
            endpoint: endpoint.to_string(),
            session,
            pump,
            reader,
        });
        info!("Session started on {}", endpoint);
        Ok(())
    }

    /// Stops ticking, stops the capture engine and closes the link.
    pub fn stop_session(&self) {
        let Some(active) = self.lock_active().take() else {
            return;
        };
        active.pump.abort();
        self.lock_engine().stop();
        active.session.close();
        // The port stays locked until the read half is dropped, at most one
        // read timeout after close
        if active.reader.join().is_err() {
            warn!("Link reader for {} panicked", active.endpoint);
        }
        info!("Session on {} stopped", active.endpoint);
    }

    /// Returns true while a session is streaming.
    ///
    /// Turns false on stop and when the capture engine runs dry.
    pub fn is_session_active(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|active| active.session.is_open())
    }

    /// Asks the board for a diagnostic line; dropped unless the link is idle.
    pub fn request_debug_info(&self) -> bool {
        match self.lock_active().as_ref() {
            Some(active) => active.session.request_debug_info(Instant::now()),
            None => false,
        }
    }

    /// Subscribes to the current session's diagnostic lines.
    pub fn subscribe_debug(&self) -> Option<broadcast::Receiver<String>> {
        self.lock_active()
            .as_ref()
            .map(|active| active.session.subscribe_debug())
    }

    /// Returns a snapshot of the live preview.
    pub fn preview(&self) -> PreviewImage {
        self.preview
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes the live preview as a PNG file.
    pub fn save_preview<P: AsRef<Path>>(&self, path: P) -> Result<(), ServiceError> {
        let png = self.preview().to_png()?;
        std::fs::write(path.as_ref(), png)?;
        info!("Preview saved to {}", path.as_ref().display());
        Ok(())
    }
}

impl<E: CaptureEngine> Drop for LightsService<E> {
    fn drop(&mut self) {
        self.stop_session();
    }
}
