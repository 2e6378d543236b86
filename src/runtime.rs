use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent};

use crate::api::{ApiError, AuthHistory, AuthResponse, EnrollmentStatus, UserProfile};

/// Result of one collaborator call, delivered back into the event loop.
#[derive(Debug, Clone)]
pub enum ApiOutcome {
    Enrollment(Result<EnrollmentStatus, ApiError>),
    Authentication(Result<AuthResponse, ApiError>),
    Dashboard(Result<(UserProfile, AuthHistory), ApiError>),
}

/// An outcome stamped with the dispatch sequence number that produced it.
/// Replies whose stamp no longer matches are stale and must be dropped.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub seq: u64,
    pub outcome: ApiOutcome,
}

/// Unified event type consumed by the app runner
#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    Api(ApiReply),
}

/// Source of events (keyboard, resize, API replies)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError>;
}

/// Production event source using crossterm. Terminal events and API replies
/// share one channel, so all mutation stays serialized in the main loop.
pub struct CrosstermEventSource {
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        let key_tx = tx.clone();
        thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) => {
                    if key_tx.send(AppEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(CtEvent::Resize(_, _)) => {
                    if key_tx.send(AppEvent::Resize).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { tx, rx }
    }

    /// Sender for API worker threads.
    pub fn sender(&self) -> Sender<AppEvent> {
        self.tx.clone()
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<AppEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<AppEvent>) -> Self {
        Self { rx }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the application one event/tick at a time
pub struct Runner<E: EventSource, T: Ticker> {
    event_source: E,
    ticker: T,
}

impl<E: EventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    /// Blocks up to tick interval and returns the next event, or Tick on timeout
    pub fn step(&self) -> AppEvent {
        match self.event_source.recv_timeout(self.ticker.interval()) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => AppEvent::Tick,
        }
    }
}

/// Runs collaborator calls on worker threads, one at a time.
///
/// A dispatch bumps the sequence number and raises the in-flight flag; the
/// matching reply lowers it. `invalidate()` (called when capture state is
/// torn down or a screen is left) bumps the sequence so a reply that is still
/// in flight can never mutate state it no longer belongs to.
pub struct ApiDispatcher {
    tx: Sender<AppEvent>,
    seq: u64,
    in_flight: bool,
}

impl ApiDispatcher {
    pub fn new(tx: Sender<AppEvent>) -> Self {
        Self {
            tx,
            seq: 0,
            in_flight: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Spawn `job` on a worker thread. Its outcome comes back as an
    /// `AppEvent::Api` stamped with the new sequence number.
    pub fn dispatch<F>(&mut self, job: F) -> u64
    where
        F: FnOnce() -> ApiOutcome + Send + 'static,
    {
        self.seq += 1;
        self.in_flight = true;
        let seq = self.seq;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let outcome = job();
            // the receiver may be gone on shutdown; nothing to do then
            let _ = tx.send(AppEvent::Api(ApiReply { seq, outcome }));
        });
        seq
    }

    /// Accept or reject a reply. Stale replies leave the dispatcher untouched.
    pub fn settle(&mut self, reply: &ApiReply) -> bool {
        if reply.seq == self.seq {
            self.in_flight = false;
            true
        } else {
            log::debug!("dropping stale api reply (seq {})", reply.seq);
            false
        }
    }

    /// Orphan any in-flight request; its eventual reply will be stale.
    pub fn invalidate(&mut self) {
        self.seq += 1;
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn step_returns_tick_on_timeout() {
        let (_tx, rx) = mpsc::channel();
        let es = TestEventSource::new(rx);
        let ticker = FixedTicker::new(Duration::from_millis(1));
        let runner = Runner::new(es, ticker);

        // With no events available, step should yield Tick
        let ev = runner.step();
        match ev {
            AppEvent::Tick => {}
            _ => panic!("expected Tick on timeout"),
        }
    }

    #[test]
    fn step_passes_through_events() {
        let (tx, rx) = mpsc::channel();
        tx.send(AppEvent::Resize).unwrap();
        let es = TestEventSource::new(rx);
        let ticker = FixedTicker::new(Duration::from_millis(10));
        let runner = Runner::new(es, ticker);

        match runner.step() {
            AppEvent::Resize => {}
            _ => panic!("expected Resize event"),
        }
    }

    #[test]
    fn dispatch_delivers_stamped_reply() {
        let (tx, rx) = mpsc::channel();
        let mut dispatcher = ApiDispatcher::new(tx);

        let seq = dispatcher.dispatch(|| {
            ApiOutcome::Authentication(Err(ApiError::Transport("down".into())))
        });
        assert!(dispatcher.in_flight());

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            AppEvent::Api(reply) => {
                assert_eq!(reply.seq, seq);
                assert!(dispatcher.settle(&reply));
                assert!(!dispatcher.in_flight());
            }
            _ => panic!("expected api reply"),
        }
    }

    #[test]
    fn invalidate_makes_in_flight_reply_stale() {
        let (tx, rx) = mpsc::channel();
        let mut dispatcher = ApiDispatcher::new(tx);

        dispatcher.dispatch(|| ApiOutcome::Enrollment(Err(ApiError::Transport("slow".into()))));
        dispatcher.invalidate();
        assert!(!dispatcher.in_flight());

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            AppEvent::Api(reply) => assert!(!dispatcher.settle(&reply)),
            _ => panic!("expected api reply"),
        }
    }

    #[test]
    fn only_latest_dispatch_settles() {
        let (tx, rx) = mpsc::channel();
        let mut dispatcher = ApiDispatcher::new(tx);

        let first = dispatcher.dispatch(|| {
            ApiOutcome::Authentication(Err(ApiError::Transport("first".into())))
        });
        let second = dispatcher.dispatch(|| {
            ApiOutcome::Authentication(Err(ApiError::Transport("second".into())))
        });
        assert!(second > first);

        let mut settled = 0;
        for _ in 0..2 {
            if let AppEvent::Api(reply) = rx.recv_timeout(Duration::from_secs(1)).unwrap() {
                if dispatcher.settle(&reply) {
                    settled += 1;
                    assert_eq!(reply.seq, second);
                }
            }
        }
        assert_eq!(settled, 1);
    }
}
