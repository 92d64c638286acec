use http::Method;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{Credential, RequestOptions, ResponseBody, Result, RouteKey};

/// Identifies a [`BucketQueue`]: one per credential and route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueueKey {
    pub(crate) credential: Credential,
    pub(crate) route: RouteKey,
}

/// A request waiting for (or undergoing) transmission.
///
/// The caller awaits the other end of `responder`. If the caller went away,
/// the request is still transmitted so rate limit bookkeeping stays correct.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) route: RouteKey,
    pub(crate) options: RequestOptions,
    /// 429 responses received so far
    pub(crate) retries: u32,
    /// Server-assigned bucket of the last response
    pub(crate) bucket: Option<String>,
    responder: Option<oneshot::Sender<Result<ResponseBody>>>,
}

impl PendingRequest {
    pub(crate) fn new(
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> (Self, oneshot::Receiver<Result<ResponseBody>>) {
        let (responder, receiver) = oneshot::channel();
        let request = Self {
            route: RouteKey::derive(&method, path),
            method,
            path: path.to_string(),
            options,
            retries: 0,
            bucket: None,
            responder: Some(responder),
        };
        (request, receiver)
    }

    /// Deliver the final result to the caller, if it is still listening
    pub(crate) fn respond(&mut self, result: Result<ResponseBody>) {
        if let Some(responder) = self.responder.take()
            && responder.send(result).is_err()
        {
            log::debug!("{} {}: caller stopped waiting for the response", self.method, self.path);
        }
    }
}

/// The part of the dispatcher a [`BucketQueue`] drives
pub(crate) trait QueueDriver: Send + Sync + 'static {
    /// Send `request`, including any rate limit retries, and return its
    /// final result
    fn transmit(
        &self,
        request: &mut PendingRequest,
        queue: &BucketQueue,
    ) -> impl Future<Output = Result<ResponseBody>> + Send;

    /// `queue` has been idle for its whole eviction delay
    fn evict(&self, queue: &Arc<BucketQueue>);
}

/// The last rate limit state the server reported for this queue's route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LocalWindow {
    pub(crate) remaining: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) resets_at: Option<Instant>,
}

impl LocalWindow {
    /// Take one request from the window, or return how long to wait until it
    /// resets
    fn reserve(&mut self, now: Instant) -> Option<Duration> {
        if self.resets_at.is_some_and(|reset| now >= reset) {
            self.remaining = self.limit;
            self.resets_at = None;
        }
        match (self.remaining, self.resets_at) {
            (Some(0), Some(reset)) => Some(reset - now),
            // Exhausted without a known reset; let the server decide
            (Some(0), None) => {
                self.remaining = None;
                None
            }
            (Some(remaining), _) => {
                self.remaining = Some(remaining - 1);
                None
            }
            (None, _) => None,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    key: QueueKey,
    waiting: VecDeque<PendingRequest>,
    /// Requests taken from `waiting` whose result is not delivered yet
    in_flight: usize,
    /// A drain task is running
    draining: bool,
    /// Merged into another queue by credential rotation
    retired: bool,
    window: LocalWindow,
    bucket: Option<String>,
    idle_timer: Option<JoinHandle<()>>,
    /// Lanes of queues merged into this one that still had a request in
    /// flight; those finish before this queue transmits
    predecessors: Vec<Arc<Semaphore>>,
}

/// Serializes all requests of one credential to one route.
///
/// Requests are transmitted strictly in arrival order, one at a time, paced
/// by the rate limit window the server last reported. A drain task runs
/// while there is work; once the queue has been idle for `idle_delay`, the
/// driver is asked to evict it.
#[derive(Debug)]
pub(crate) struct BucketQueue {
    state: Mutex<QueueState>,
    /// Held while a request is in flight
    lane: Arc<Semaphore>,
    idle_delay: Duration,
}

impl BucketQueue {
    pub(crate) fn new(key: QueueKey, idle_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                key,
                waiting: VecDeque::new(),
                in_flight: 0,
                draining: false,
                retired: false,
                window: LocalWindow::default(),
                bucket: None,
                idle_timer: None,
                predecessors: Vec::new(),
            }),
            lane: Arc::new(Semaphore::new(1)),
            idle_delay,
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn key(&self) -> QueueKey {
        self.state().key.clone()
    }

    /// The bucket id the server reported for this route
    pub(crate) fn bucket(&self) -> Option<String> {
        self.state().bucket.clone()
    }

    #[cfg(test)]
    fn window(&self) -> LocalWindow {
        self.state().window
    }

    /// Append a request and make sure it will be drained
    pub(crate) fn enqueue<D: QueueDriver>(
        self: &Arc<Self>,
        request: PendingRequest,
        driver: &Arc<D>,
    ) {
        let mut state = self.state();
        state.waiting.push_back(request);
        self.wake(&mut state, driver);
    }

    /// Cancel a pending eviction and start draining if nobody is
    fn wake<D: QueueDriver>(self: &Arc<Self>, state: &mut QueueState, driver: &Arc<D>) {
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        if !state.draining && !state.waiting.is_empty() {
            state.draining = true;
            tokio::spawn(drain(Arc::clone(self), Arc::clone(driver)));
        }
    }

    /// Take the next request, or stop draining if there is none.
    ///
    /// The request comes with the lanes of merged queues it has to wait for,
    /// taken under the same lock so a merge cannot slip in between.
    fn next_request<D: QueueDriver>(
        self: &Arc<Self>,
        driver: &Arc<D>,
    ) -> Option<(PendingRequest, Vec<Arc<Semaphore>>)> {
        let mut state = self.state();
        if !state.retired
            && let Some(request) = state.waiting.pop_front()
        {
            state.in_flight += 1;
            return Some((request, std::mem::take(&mut state.predecessors)));
        }

        self.stop_draining(&mut state, driver);
        None
    }

    fn stop_draining<D: QueueDriver>(self: &Arc<Self>, state: &mut QueueState, driver: &Arc<D>) {
        state.draining = false;
        if !state.retired && state.in_flight == 0 {
            state.idle_timer = Some(self.schedule_eviction(driver));
        }
    }

    fn schedule_eviction<D: QueueDriver>(self: &Arc<Self>, driver: &Arc<D>) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        let driver: Weak<D> = Arc::downgrade(driver);
        let delay = self.idle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let (Some(queue), Some(driver)) = (queue.upgrade(), driver.upgrade()) {
                driver.evict(&queue);
            }
        })
    }

    /// Wait until the local window allows another request and take a slot
    async fn wait_for_window(&self) {
        loop {
            let wait = self.state().window.reserve(Instant::now());
            match wait {
                None => return,
                Some(wait) => {
                    log::debug!("{}: bucket exhausted, waiting {wait:?}", self.key().route);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Update the local window after a response
    pub(crate) fn handle_completed_request(
        &self,
        remaining: Option<u64>,
        reset_after: Option<Duration>,
        limit: Option<u64>,
    ) {
        let mut state = self.state();
        let window = &mut state.window;
        if remaining.is_some() {
            window.remaining = remaining;
        }
        if limit.is_some() {
            window.limit = limit;
        }
        if let Some(reset_after) = reset_after {
            let now = Instant::now();
            window.resets_at = Some(now.checked_add(reset_after).unwrap_or(now));
        }
    }

    pub(crate) fn set_bucket(&self, bucket: &str) {
        let mut state = self.state();
        if state.bucket.as_deref() != Some(bucket) {
            state.bucket = Some(bucket.to_string());
        }
    }

    /// No waiting or in-flight requests and no drain task
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state();
        state.waiting.is_empty() && state.in_flight == 0 && !state.draining
    }

    /// Number of requests waiting or in flight
    #[cfg(test)]
    fn len(&self) -> usize {
        let state = self.state();
        state.waiting.len() + state.in_flight
    }

    /// Cancel pending timers; the queue is being dropped from its map
    pub(crate) fn cleanup(&self) {
        let mut state = self.state();
        state.retired = true;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
    }

    /// Re-key this queue after credential rotation, updating requests that
    /// named the old credential explicitly
    pub(crate) fn rekey(&self, key: QueueKey) {
        let mut state = self.state();
        let old = std::mem::replace(&mut state.key, key);
        let new = state.key.credential.clone();
        rewrite_credentials(&mut state.waiting, &old.credential, &new);
    }

    /// Move the work of `old` in front of this queue's own work.
    ///
    /// `old` is retired: it finishes its in-flight request, if any, and this
    /// queue does not transmit before that request completed.
    pub(crate) fn absorb<D: QueueDriver>(self: &Arc<Self>, old: &Arc<Self>, driver: &Arc<D>) {
        let (mut moved, old_credential, busy) = {
            let mut theirs = old.state();
            theirs.retired = true;
            if let Some(timer) = theirs.idle_timer.take() {
                timer.abort();
            }
            let busy = theirs.in_flight > 0 || theirs.draining;
            (
                std::mem::take(&mut theirs.waiting),
                theirs.key.credential.clone(),
                busy,
            )
        };

        let mut ours = self.state();
        let new_credential = ours.key.credential.clone();
        rewrite_credentials(&mut moved, &old_credential, &new_credential);
        while let Some(request) = moved.pop_back() {
            ours.waiting.push_front(request);
        }
        if busy {
            ours.predecessors.push(Arc::clone(&old.lane));
        }
        self.wake(&mut ours, driver);
    }
}

fn rewrite_credentials(requests: &mut VecDeque<PendingRequest>, old: &Credential, new: &Credential) {
    for request in requests {
        if request.options.credential.as_ref() == Some(old) {
            request.options.credential = Some(new.clone());
        }
    }
}

impl Drop for BucketQueue {
    fn drop(&mut self) {
        if let Some(timer) = self.state().idle_timer.take() {
            timer.abort();
        }
    }
}

/// Marks one request of a queue as in flight.
///
/// If the drain task dies before calling [`InFlight::finish`], dropping the
/// guard still releases the request and hands the rest of the queue to a
/// fresh drain task.
struct InFlight<D: QueueDriver> {
    queue: Arc<BucketQueue>,
    driver: Arc<D>,
    finished: bool,
}

impl<D: QueueDriver> InFlight<D> {
    fn finish(mut self) {
        self.finished = true;
        self.queue.state().in_flight -= 1;
    }
}

impl<D: QueueDriver> Drop for InFlight<D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("{}: drain task stopped with a request in flight", self.queue.key().route);
        let mut state = self.queue.state();
        state.in_flight -= 1;
        if tokio::runtime::Handle::try_current().is_err() {
            // Runtime is gone, nothing can drain or evict anymore
            state.draining = false;
        } else if state.waiting.is_empty() {
            self.queue.stop_draining(&mut state, &self.driver);
        } else {
            tokio::spawn(drain(Arc::clone(&self.queue), Arc::clone(&self.driver)));
        }
    }
}

/// Transmit queued requests one by one until the queue runs dry
async fn drain<D: QueueDriver>(queue: Arc<BucketQueue>, driver: Arc<D>) {
    loop {
        let Ok(permit) = Arc::clone(&queue.lane).acquire_owned().await else {
            return;
        };
        let Some((mut request, predecessors)) = queue.next_request(&driver) else {
            return;
        };
        let in_flight = InFlight {
            queue: Arc::clone(&queue),
            driver: Arc::clone(&driver),
            finished: false,
        };

        for lane in predecessors {
            // Only completion matters; the permit is released right away
            let _ = lane.acquire().await;
        }
        queue.wait_for_window().await;
        let result = driver.transmit(&mut request, &queue).await;
        request.respond(result);

        in_flight.finish();
        drop(permit);
    }
}
