//! Link session: handshake state machine and frame flow control.

use crate::frame::{Frame, LinkConfig};
use crate::protocol::{build_config_packet, build_frame_packet, BoardMessage, HostCommand};
use crate::{Error, Result};
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::debug::DebugChannel;

/// Default delay after opening during which inbound bytes are discarded.
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(1000);

/// Default time between keepalives.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);

/// Repeated write failures are summarised at most this often.
const WRITE_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Host view of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardState {
    /// No handshake yet, or the board said hello again.
    #[default]
    Unknown,
    /// Config requested but not yet delivered.
    AwaitingConfig,
    /// Config delivered; frames and keepalives flow.
    Alive,
    /// Session torn down.
    Closed,
}

impl fmt::Display for BoardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardState::Unknown => write!(f, "unknown"),
            BoardState::AwaitingConfig => write!(f, "awaiting-config"),
            BoardState::Alive => write!(f, "alive"),
            BoardState::Closed => write!(f, "closed"),
        }
    }
}

/// Link timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Grace period after open during which inbound bytes are dropped.
    pub open_delay: Duration,
    /// Idle interval after which a keepalive is sent.
    pub keepalive_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            open_delay: DEFAULT_OPEN_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// Tracks consecutive write failures so a dead board doesn't flood the log.
struct WriteErrors {
    consecutive: u32,
    last_log: Option<Instant>,
}

impl WriteErrors {
    fn new() -> Self {
        Self {
            consecutive: 0,
            last_log: None,
        }
    }

    fn failed(&mut self, what: &str, err: &Error, now: Instant) {
        self.consecutive += 1;
        let due = self
            .last_log
            .map_or(true, |t| now.duration_since(t) >= WRITE_ERROR_LOG_INTERVAL);
        if self.consecutive == 1 || due {
            if self.consecutive > 1 {
                warn!(
                    "Link write failed ({} repeated {} times): {}",
                    what, self.consecutive, err
                );
            } else {
                warn!("Link write failed ({}): {}", what, err);
            }
            self.last_log = Some(now);
        }
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }
}

/// Session state guarded by the session lock.
struct SessionInner {
    writer: Option<Box<dyn Write + Send>>,
    state: BoardState,
    latest_frame: Option<Frame>,
    frame_updated: bool,
    frame_pending: bool,
    keepalive_deadline: Instant,
    write_errors: WriteErrors,
}

impl SessionInner {
    fn write(&mut self, what: &str, bytes: &[u8], now: Instant) -> Result<()> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer
                .write_all(bytes)
                .and_then(|()| writer.flush())
                .map_err(Error::from),
            None => Err(Error::SessionClosed),
        };
        match &result {
            Ok(()) => self.write_errors.succeeded(),
            Err(e) => self.write_errors.failed(what, e, now),
        }
        result
    }

    fn refresh_keepalive(&mut self, now: Instant, interval: Duration) {
        self.keepalive_deadline = now + interval;
    }
}

/// A single open link to a controller board.
///
/// Both the frame pump and the reader thread drive the session; every state
/// inspection and the write it produces happen under one lock.
pub struct LinkSession {
    config: LinkConfig,
    timing: LinkTiming,
    grace_until: Instant,
    inner: Mutex<SessionInner>,
    debug: DebugChannel,
}

impl LinkSession {
    /// Creates a session over a freshly opened channel writer.
    pub fn new(
        config: LinkConfig,
        timing: LinkTiming,
        writer: Box<dyn Write + Send>,
        opened_at: Instant,
    ) -> Self {
        debug!(
            "Link session opened ({}x{} lights, grace {:?}, keepalive {:?})",
            config.columns(),
            config.rows(),
            timing.open_delay,
            timing.keepalive_interval
        );
        Self {
            config,
            timing,
            grace_until: opened_at + timing.open_delay,
            inner: Mutex::new(SessionInner {
                writer: Some(writer),
                state: BoardState::Unknown,
                latest_frame: None,
                frame_updated: false,
                frame_pending: false,
                keepalive_deadline: opened_at,
                write_errors: WriteErrors::new(),
            }),
            debug: DebugChannel::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the light grid this session announces.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Returns the current board state.
    pub fn board_state(&self) -> BoardState {
        self.lock().state
    }

    /// Returns true until the session is closed.
    pub fn is_open(&self) -> bool {
        self.lock().writer.is_some()
    }

    /// Returns true while a frame notice awaits the board's ready signal.
    pub fn frame_pending(&self) -> bool {
        self.lock().frame_pending
    }

    /// Returns true while inbound bytes must be discarded.
    pub fn in_grace_period(&self, now: Instant) -> bool {
        now < self.grace_until
    }

    /// Subscribes to diagnostic lines reported by the board.
    pub fn subscribe_debug(&self) -> broadcast::Receiver<String> {
        self.debug.subscribe()
    }

    /// Applies one inbound board message.
    pub fn handle_message(&self, message: BoardMessage, now: Instant) {
        let mut inner = self.lock();
        if inner.writer.is_none() {
            trace!("Dropping {:?} on closed link", message);
            return;
        }

        match message {
            BoardMessage::Hello => {
                inner.state = BoardState::Unknown;
                inner.frame_pending = false;
                inner.frame_updated = false;
                if inner.write("hello", &[HostCommand::Hello as u8], now).is_ok() {
                    info!("Board said hello, handshake restarted");
                }
            }
            BoardMessage::ConfigRequest => {
                inner.state = BoardState::AwaitingConfig;
                let packet = build_config_packet(&self.config);
                if inner.write("config", &packet, now).is_ok() {
                    inner.state = BoardState::Alive;
                    inner.refresh_keepalive(now, self.timing.keepalive_interval);
                    info!(
                        "Sent config {}x{}, board is alive",
                        self.config.columns(),
                        self.config.rows()
                    );
                }
            }
            BoardMessage::Ready => {
                let frame = match (&inner.state, &inner.latest_frame) {
                    (BoardState::Alive, Some(frame)) => frame.clone(),
                    (state, frame) => {
                        debug!(
                            "Board ready but nothing to send (state: {}, frame: {})",
                            state,
                            frame.is_some()
                        );
                        return;
                    }
                };
                let packet = build_frame_packet(frame.pixels());
                if inner.write("light data", &packet, now).is_ok() {
                    inner.refresh_keepalive(now, self.timing.keepalive_interval);
                    trace!("Sent light data ({} bytes)", packet.len());
                } else {
                    // Undelivered, offer it again on the next tick
                    inner.frame_updated = true;
                }
                inner.frame_pending = false;
            }
            BoardMessage::Debug(line) => {
                match line {
                    Some(line) => self.debug.publish(line),
                    None => debug!("Board debug line could not be read"),
                }
                inner.refresh_keepalive(now, self.timing.keepalive_interval);
            }
            BoardMessage::Other(byte) => {
                trace!("Ignoring inbound byte {:#04X}", byte);
            }
        }
    }

    /// Runs one outbound step, optionally storing a newly captured frame.
    ///
    /// Returns the control byte written, if any.
    pub fn tick(&self, frame: Option<Frame>, now: Instant) -> Option<HostCommand> {
        let mut inner = self.lock();

        if let Some(frame) = frame {
            if frame.len() == self.config.pixel_count() {
                inner.latest_frame = Some(frame);
                inner.frame_updated = true;
            } else {
                warn!(
                    "Dropping frame of {} lights (grid has {})",
                    frame.len(),
                    self.config.pixel_count()
                );
            }
        }

        if inner.writer.is_none() || inner.state != BoardState::Alive || inner.frame_pending {
            return None;
        }

        if inner.frame_updated {
            let notice = HostCommand::FrameAvailable;
            inner.write("frame notice", &[notice as u8], now).ok()?;
            inner.frame_pending = true;
            inner.frame_updated = false;
            inner.refresh_keepalive(now, self.timing.keepalive_interval);
            Some(notice)
        } else if now >= inner.keepalive_deadline {
            inner.refresh_keepalive(now, self.timing.keepalive_interval);
            let keepalive = HostCommand::Keepalive;
            inner.write("keepalive", &[keepalive as u8], now).ok()?;
            debug!("Sent keepalive");
            Some(keepalive)
        } else {
            None
        }
    }

    /// Asks the board for a diagnostic line if the link is otherwise idle.
    ///
    /// Returns false when the request was dropped.
    pub fn request_debug_info(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        if inner.writer.is_none() || inner.frame_pending || now < inner.keepalive_deadline {
            debug!("Debug request dropped, link busy");
            return false;
        }
        inner
            .write("debug request", &[HostCommand::Debug as u8], now)
            .is_ok()
    }

    /// Tears down the session and releases the channel writer.
    ///
    /// Safe to call repeatedly and concurrently with the reader thread.
    pub fn close(&self) {
        let writer = {
            let mut inner = self.lock();
            inner.state = BoardState::Closed;
            inner.frame_pending = false;
            inner.frame_updated = false;
            inner.writer.take()
        };
        // Dropping the port may block on the OS, keep it outside the lock
        if let Some(writer) = writer {
            drop(writer);
            info!("Link session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    /// Records every packet written to the channel.
    #[derive(Clone, Default)]
    struct Recorder {
        packets: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl Recorder {
        fn packets(&self) -> Vec<Vec<u8>> {
            self.packets.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.packets.lock().unwrap().clear();
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if *self.fail.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
            }
            self.packets.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const KEEPALIVE: Duration = Duration::from_millis(1000);

    fn session(columns: u32, rows: u32) -> (LinkSession, Recorder, Instant) {
        let recorder = Recorder::default();
        let start = Instant::now();
        let session = LinkSession::new(
            LinkConfig::new(columns, rows).unwrap(),
            LinkTiming {
                open_delay: Duration::from_millis(1000),
                keepalive_interval: KEEPALIVE,
            },
            Box::new(recorder.clone()),
            start,
        );
        (session, recorder, start)
    }

    fn alive_session() -> (LinkSession, Recorder, Instant) {
        let (session, recorder, start) = session(2, 1);
        session.handle_message(BoardMessage::Hello, start);
        session.handle_message(BoardMessage::ConfigRequest, start);
        assert_eq!(session.board_state(), BoardState::Alive);
        recorder.clear();
        (session, recorder, start)
    }

    fn frame(session: &LinkSession, pixels: &[u32]) -> Option<Frame> {
        Some(Frame::new(session.config(), pixels).unwrap())
    }

    fn ms(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn test_handshake_then_frame() {
        let (session, recorder, start) = session(2, 1);
        assert_eq!(session.board_state(), BoardState::Unknown);

        session.tick(frame(&session, &[0xFF0000, 0x00FF00]), start);
        session.handle_message(BoardMessage::Hello, start);
        assert_eq!(session.board_state(), BoardState::Unknown);
        session.handle_message(BoardMessage::ConfigRequest, start);
        assert_eq!(session.board_state(), BoardState::Alive);
        session.handle_message(BoardMessage::Ready, start);

        assert_eq!(
            recorder.packets(),
            vec![
                vec![b'H'],
                vec![b'C', 2, 1],
                vec![b'L', 255, 0, 0, 0, 255, 0]
            ]
        );
    }

    #[test]
    fn test_ready_without_frame_sends_nothing() {
        let (session, recorder, start) = alive_session();
        session.handle_message(BoardMessage::Ready, start);
        assert!(recorder.packets().is_empty());
        assert_eq!(session.board_state(), BoardState::Alive);
    }

    #[test]
    fn test_ready_before_alive_sends_nothing() {
        let (session, recorder, start) = session(2, 1);
        session.tick(frame(&session, &[1, 2]), start);
        session.handle_message(BoardMessage::Ready, start);
        session.handle_message(BoardMessage::Hello, start);
        session.handle_message(BoardMessage::Ready, start);
        assert_eq!(recorder.packets(), vec![vec![b'H']]);
        assert_eq!(session.board_state(), BoardState::Unknown);
    }

    #[test]
    fn test_idle_keepalive() {
        let (session, recorder, start) = alive_session();

        assert_eq!(session.tick(None, ms(start, 500)), None);
        assert_eq!(
            session.tick(None, ms(start, 1000)),
            Some(HostCommand::Keepalive)
        );
        assert_eq!(recorder.packets(), vec![vec![b'K']]);
        assert!(!session.frame_pending());
    }

    #[test]
    fn test_one_keepalive_per_interval() {
        let (session, recorder, start) = alive_session();

        let mut t = 0;
        while t <= 3000 {
            session.tick(None, ms(start, t));
            t += 16;
        }
        // Due at 1008 and 2016, next not before 3024
        assert_eq!(recorder.packets(), vec![vec![b'K'], vec![b'K']]);
    }

    #[test]
    fn test_frame_notice_preempts_keepalive() {
        let (session, recorder, start) = alive_session();
        let sent = session.tick(frame(&session, &[1, 2]), ms(start, 1500));
        assert_eq!(sent, Some(HostCommand::FrameAvailable));
        assert_eq!(recorder.packets(), vec![vec![b'A']]);
        assert!(session.frame_pending());
    }

    #[test]
    fn test_single_notice_in_flight() {
        let (session, recorder, start) = alive_session();
        session.tick(frame(&session, &[1, 2]), ms(start, 10));
        session.tick(frame(&session, &[3, 4]), ms(start, 26));
        session.tick(None, ms(start, 5000));
        assert_eq!(recorder.packets(), vec![vec![b'A']]);
        assert!(session.frame_pending());

        // Ready sends the latest frame and clears the pending notice
        session.handle_message(BoardMessage::Ready, ms(start, 5001));
        assert!(!session.frame_pending());
        assert_eq!(
            recorder.packets(),
            vec![vec![b'A'], vec![b'L', 0, 0, 3, 0, 0, 4]]
        );

        // A frame stored while pending raises one more notice
        assert_eq!(
            session.tick(None, ms(start, 5010)),
            Some(HostCommand::FrameAvailable)
        );
    }

    #[test]
    fn test_hello_clears_pending() {
        let (session, recorder, start) = alive_session();
        session.tick(frame(&session, &[1, 2]), start);
        assert!(session.frame_pending());

        session.handle_message(BoardMessage::Hello, start);
        assert!(!session.frame_pending());
        assert_eq!(session.board_state(), BoardState::Unknown);

        // Not alive, so no notice or keepalive until config is requested
        assert_eq!(session.tick(frame(&session, &[5, 6]), ms(start, 5000)), None);
        assert_eq!(recorder.packets(), vec![vec![b'A'], vec![b'H']]);
    }

    #[test]
    fn test_config_write_failure_keeps_awaiting() {
        let (session, recorder, start) = session(2, 1);
        recorder.set_failing(true);
        session.handle_message(BoardMessage::ConfigRequest, start);
        assert_eq!(session.board_state(), BoardState::AwaitingConfig);

        recorder.set_failing(false);
        session.handle_message(BoardMessage::ConfigRequest, start);
        assert_eq!(session.board_state(), BoardState::Alive);
    }

    #[test]
    fn test_failed_notice_retried_next_tick() {
        let (session, recorder, start) = alive_session();
        recorder.set_failing(true);
        assert_eq!(session.tick(frame(&session, &[1, 2]), start), None);
        assert!(!session.frame_pending());

        recorder.set_failing(false);
        assert_eq!(
            session.tick(None, ms(start, 16)),
            Some(HostCommand::FrameAvailable)
        );
        assert!(session.frame_pending());
    }

    #[test]
    fn test_failed_light_data_clears_pending() {
        let (session, recorder, start) = alive_session();
        session.tick(frame(&session, &[1, 2]), ms(start, 10));
        assert!(session.frame_pending());

        recorder.set_failing(true);
        session.handle_message(BoardMessage::Ready, ms(start, 20));
        assert!(!session.frame_pending());

        // The undelivered frame is announced again
        recorder.set_failing(false);
        assert_eq!(
            session.tick(None, ms(start, 26)),
            Some(HostCommand::FrameAvailable)
        );
        assert!(session.frame_pending());

        session.handle_message(BoardMessage::Ready, ms(start, 30));
        assert_eq!(
            recorder.packets(),
            vec![vec![b'A'], vec![b'A'], vec![b'L', 0, 0, 1, 0, 0, 2]]
        );
        assert!(!session.frame_pending());
    }

    #[test]
    fn test_debug_line_refreshes_keepalive() {
        let (session, recorder, start) = alive_session();
        let mut lines = session.subscribe_debug();

        session.handle_message(BoardMessage::Debug(Some("fps=60".into())), ms(start, 900));
        assert_eq!(lines.try_recv().unwrap(), "fps=60");

        // Deadline moved to 1900
        assert_eq!(session.tick(None, ms(start, 1500)), None);
        session.handle_message(BoardMessage::Debug(None), ms(start, 1800));
        assert_eq!(session.tick(None, ms(start, 2500)), None);
        assert!(recorder.packets().is_empty());
    }

    #[test]
    fn test_debug_request_gating() {
        let (session, recorder, start) = alive_session();

        // Deadline not yet elapsed after config
        assert!(!session.request_debug_info(ms(start, 100)));
        assert!(session.request_debug_info(ms(start, 1000)));
        assert_eq!(recorder.packets(), vec![vec![b'D']]);

        // Dropped while a frame notice is pending
        session.tick(frame(&session, &[1, 2]), ms(start, 1100));
        assert!(!session.request_debug_info(ms(start, 5000)));
        assert_eq!(recorder.packets(), vec![vec![b'D'], vec![b'A']]);
    }

    #[test]
    fn test_other_bytes_ignored() {
        let (session, recorder, start) = alive_session();
        for byte in [0x00, b'K', b'Z', 0xFF] {
            session.handle_message(BoardMessage::Other(byte), start);
        }
        assert!(recorder.packets().is_empty());
        assert_eq!(session.board_state(), BoardState::Alive);
    }

    #[test]
    fn test_grace_period() {
        let (session, _recorder, start) = session(2, 1);
        assert!(session.in_grace_period(start));
        assert!(session.in_grace_period(ms(start, 999)));
        assert!(!session.in_grace_period(ms(start, 1000)));
    }

    #[test]
    fn test_close() {
        let (session, recorder, start) = alive_session();
        session.tick(frame(&session, &[1, 2]), start);
        session.close();
        session.close();

        assert!(!session.is_open());
        assert_eq!(session.board_state(), BoardState::Closed);
        assert!(!session.frame_pending());

        session.handle_message(BoardMessage::ConfigRequest, start);
        session.handle_message(BoardMessage::Ready, start);
        assert_eq!(session.tick(frame(&session, &[3, 4]), ms(start, 5000)), None);
        assert!(!session.request_debug_info(ms(start, 5000)));
        assert_eq!(recorder.packets(), vec![vec![b'A']]);
        assert_eq!(session.board_state(), BoardState::Closed);
    }

    #[test]
    fn test_mismatched_frame_dropped() {
        let (session, recorder, start) = alive_session();
        let other = LinkConfig::new(3, 1).unwrap();
        let wrong = Frame::new(&other, &[1, 2, 3]).unwrap();
        assert_eq!(session.tick(Some(wrong), ms(start, 10)), None);
        session.handle_message(BoardMessage::Ready, ms(start, 20));
        assert!(recorder.packets().is_empty());
    }
}
