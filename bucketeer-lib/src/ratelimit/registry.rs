use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{Credential, RouteKey};

/// How often expired entries are removed while any are outstanding
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// What a [`RateLimitEntry`] limits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimiterKey {
    /// The account-wide limit
    Global,
    /// A route, as seen by one credential
    Route(Credential, RouteKey),
    /// A server-assigned bucket, which may span several routes
    Bucket(Credential, String),
}

impl LimiterKey {
    fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Global => None,
            Self::Route(credential, _) | Self::Bucket(credential, _) => Some(credential),
        }
    }

    fn with_credential(self, credential: Credential) -> Self {
        match self {
            Self::Global => Self::Global,
            Self::Route(_, route) => Self::Route(credential, route),
            Self::Bucket(_, bucket) => Self::Bucket(credential, bucket),
        }
    }
}

/// A limit that is exhausted until `reset_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// The route or bucket id the limit was reported for
    pub scope: String,
    /// When requests may be sent again
    pub reset_at: Instant,
}

impl RateLimitEntry {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        (now < self.reset_at).then(|| self.reset_at - now)
    }
}

/// Exhausted rate limits, shared by every queue of a dispatcher.
///
/// Entries are written after a response reports an exhausted limit and read
/// before every transmission. An entry only counts while it has not reset; a
/// background sweep removes expired entries once per second, and only runs
/// while the registry is non-empty.
///
/// Methods that insert entries take `self: &Arc<Self>` because they may start
/// the sweep, which holds a weak reference back to the registry.
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    entries: DashMap<LimiterKey, RateLimitEntry>,
    globally_limited: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    global_reset: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimitRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// How long requests for `route` (and its server-assigned `bucket`, if
    /// known) must wait, taking the global limit into account.
    ///
    /// Returns `None` if the request may be sent now.
    #[must_use]
    pub fn is_limited(
        &self,
        credential: &Credential,
        route: &RouteKey,
        bucket: Option<&str>,
    ) -> Option<Duration> {
        let now = Instant::now();
        let mut keys = vec![
            LimiterKey::Route(credential.clone(), route.clone()),
            LimiterKey::Global,
        ];
        if let Some(bucket) = bucket {
            keys.push(LimiterKey::Bucket(credential.clone(), bucket.to_string()));
        }

        keys.iter()
            .filter_map(|key| self.entries.get(key)?.remaining(now))
            .max()
    }

    /// Record that `route` is exhausted until `reset_at`, under the
    /// server-assigned `bucket` as well if one was reported
    pub fn record_limited(
        self: &Arc<Self>,
        credential: &Credential,
        route: &RouteKey,
        bucket: Option<&str>,
        reset_at: Instant,
    ) {
        self.entries.insert(
            LimiterKey::Route(credential.clone(), route.clone()),
            RateLimitEntry {
                scope: route.to_string(),
                reset_at,
            },
        );
        if let Some(bucket) = bucket {
            self.entries.insert(
                LimiterKey::Bucket(credential.clone(), bucket.to_string()),
                RateLimitEntry {
                    scope: bucket.to_string(),
                    reset_at,
                },
            );
        }
        self.ensure_sweeping();
    }

    /// Record that the account-wide limit is exhausted until `reset_at`
    pub fn record_global_limited(self: &Arc<Self>, reset_at: Instant, bucket: Option<&str>) {
        self.globally_limited.store(true, Ordering::SeqCst);
        self.entries.insert(
            LimiterKey::Global,
            RateLimitEntry {
                scope: bucket.unwrap_or("global").to_string(),
                reset_at,
            },
        );

        let registry = Arc::downgrade(self);
        let clear = tokio::spawn(async move {
            tokio::time::sleep_until(reset_at).await;
            if let Some(registry) = registry.upgrade() {
                registry.clear_expired_global(Instant::now());
            }
        });
        if let Some(previous) = lock(&self.global_reset).replace(clear) {
            previous.abort();
        }
        self.ensure_sweeping();
    }

    /// Whether the account-wide limit is currently exhausted
    #[must_use]
    pub fn globally_limited(&self) -> bool {
        self.globally_limited.load(Ordering::SeqCst)
    }

    /// Remove every entry that has reset. Returns the number of removed
    /// entries.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at > now);
        self.clear_expired_global(now);
        before.saturating_sub(self.entries.len())
    }

    fn clear_expired_global(&self, now: Instant) {
        self.entries
            .remove_if(&LimiterKey::Global, |_, entry| entry.reset_at <= now);
        if !self.entries.contains_key(&LimiterKey::Global) {
            self.globally_limited.store(false, Ordering::SeqCst);
        }
    }

    /// Move every entry recorded for `old` to `new`. When both credentials
    /// hold an entry for the same limit, the later reset wins.
    pub fn rotate(&self, old: &Credential, new: &Credential) -> usize {
        let stale: Vec<LimiterKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().credential() == Some(old))
            .map(|entry| entry.key().clone())
            .collect();

        let mut moved = 0;
        for key in stale {
            let Some((key, entry)) = self.entries.remove(&key) else {
                continue;
            };
            let key = key.with_credential(new.clone());
            self.entries
                .entry(key)
                .and_modify(|existing| {
                    if entry.reset_at > existing.reset_at {
                        *existing = entry.clone();
                    }
                })
                .or_insert_with(|| entry.clone());
            moved += 1;
        }
        moved
    }

    /// Number of outstanding entries, including expired ones not swept yet
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no outstanding entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the periodic sweep is currently scheduled
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        lock(&self.sweeper).is_some()
    }

    /// Start the periodic sweep unless it is already running.
    ///
    /// The sweep stops itself once the registry is empty. Both the check for
    /// emptiness and the restart happen under the `sweeper` lock, after the
    /// entry was inserted, so no entry is left without a sweep.
    fn ensure_sweeping(self: &Arc<Self>) {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.is_none() {
            *sweeper = Some(tokio::spawn(sweep_periodically(Arc::downgrade(self))));
        }
    }
}

async fn sweep_periodically(registry: Weak<RateLimitRegistry>) {
    let mut interval = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let Some(registry) = registry.upgrade() else {
            return;
        };
        let removed = registry.sweep();
        if removed > 0 {
            log::trace!("Swept {removed} expired rate limit entries");
        }

        let mut sweeper = lock(&registry.sweeper);
        if registry.entries.is_empty() {
            // Detach; this task ends right here
            sweeper.take();
            return;
        }
    }
}

impl Drop for RateLimitRegistry {
    fn drop(&mut self) {
        for handle in [&self.sweeper, &self.global_reset] {
            if let Some(handle) = lock(handle).take() {
                handle.abort();
            }
        }
    }
}

/// The registry's locks guard plain data that stays consistent even if a
/// holder panicked, so poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
