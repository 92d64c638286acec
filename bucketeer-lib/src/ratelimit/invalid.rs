use http::StatusCode;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Discord bans IPs that send 10,000 invalid requests within ten minutes
pub const DEFAULT_INVALID_REQUEST_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Warn well before the ban threshold is reached
pub const DEFAULT_INVALID_REQUEST_WARN_THRESHOLD: u64 = 9_000;

#[derive(Debug)]
struct Window {
    count: u64,
    started_at: Instant,
    warned: bool,
}

/// A rolling counter of requests Discord counts against its invalid request
/// limit.
///
/// Every completed request with an error status counts, as does every
/// request that ran against a shared rate limit scope and every request
/// that never got a response. The count resets when
/// the window has passed. The tracker only keeps books and warns through the
/// log; it never delays requests.
#[derive(Debug)]
pub struct InvalidRequestTracker {
    window: Mutex<Window>,
    length: Duration,
    warn_threshold: u64,
}

impl Default for InvalidRequestTracker {
    fn default() -> Self {
        Self::new(
            DEFAULT_INVALID_REQUEST_WINDOW,
            DEFAULT_INVALID_REQUEST_WARN_THRESHOLD,
        )
    }
}

impl InvalidRequestTracker {
    /// Create a tracker with a window of `length` that warns once per window
    /// after `warn_threshold` invalid requests
    #[must_use]
    pub fn new(length: Duration, warn_threshold: u64) -> Self {
        Self {
            window: Mutex::new(Window {
                count: 0,
                started_at: Instant::now(),
                warned: false,
            }),
            length,
            warn_threshold,
        }
    }

    /// Whether a response counts as invalid
    #[must_use]
    pub fn is_invalid(status: StatusCode, shared_scope: bool) -> bool {
        status.is_client_error() || status.is_server_error() || shared_scope
    }

    /// Account for a completed request. Returns `true` if it was counted.
    pub fn handle_completed_request(&self, status: StatusCode, shared_scope: bool) -> bool {
        if !Self::is_invalid(status, shared_scope) {
            return false;
        }
        self.record();
        true
    }

    /// Account for a request that failed before a response arrived
    pub fn handle_transport_failure(&self) {
        self.record();
    }

    fn record(&self) {
        let mut window = self.current();
        window.count += 1;
        if window.count >= self.warn_threshold && !window.warned {
            window.warned = true;
            log::warn!(
                "{} invalid requests in the last {}s; Discord bans clients that reach 10000",
                window.count,
                self.length.as_secs()
            );
        }
    }

    /// Invalid requests counted in the current window
    #[must_use]
    pub fn count(&self) -> u64 {
        self.current().count
    }

    /// Time until the current window resets
    #[must_use]
    pub fn window_remaining(&self) -> Duration {
        let window = self.current();
        (window.started_at + self.length).saturating_duration_since(Instant::now())
    }

    /// Lock the window, starting a new one if the current one has passed
    fn current(&self) -> std::sync::MutexGuard<'_, Window> {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        if now.duration_since(window.started_at) >= self.length {
            *window = Window {
                count: 0,
                started_at: now,
                warned: false,
            };
        }
        window
    }
}
