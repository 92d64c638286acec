//! Rate limit aware dispatch of REST requests.
//!
//! This module defines two structs, [`Dispatcher`] and [`DispatcherBuilder`].
//! `Dispatcher` accepts requests and resolves them once the server answered.
//! `DispatcherBuilder` exposes a finer level of granularity for building a
//! `Dispatcher`.
#![allow(clippy::module_name_repetitions)]

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, PROXY_AUTHORIZATION, USER_AGENT};
use http::{Method, StatusCode};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use url::Url;

use crate::hooks::{DispatchHooks, RequestInfo};
use crate::ratelimit::{
    BucketQueue, DEFAULT_API_VERSION, DEFAULT_DELETE_QUEUE_DELAY,
    DEFAULT_GLOBAL_REQUESTS_PER_SECOND, DEFAULT_INVALID_REQUEST_WARN_THRESHOLD,
    DEFAULT_INVALID_REQUEST_WINDOW, DEFAULT_MAX_RETRIES, DISCORD_API_URL, DispatchConfig,
    InvalidRequestTracker, MAX_RATE_LIMIT_WAIT, PendingRequest, QueueDriver, QueueKey,
    RateLimitHeaders, RateLimitRegistry,
};
use crate::wire::{PayloadTransformer, SnakeCase};
use crate::{Credential, ErrorKind, RequestOptions, ResponseBody, Result, RouteKey};

/// Default user agent, in the format Discord requires for bots
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/bucketeer-rs/bucketeer, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Header carrying the audit log reason
pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Host of the official API; other hosts are REST proxies
const DISCORD_HOST: &str = "discord.com";

/// Wait used when a 429 names no delay at all
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Rotated credentials remembered for requests that still name them
const MAX_CREDENTIAL_ALIASES: usize = 64;

/// Characters `encodeURIComponent` leaves alone, which is what Discord
/// decodes audit log reasons with
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Builder for [`Dispatcher`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `DispatcherBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `DispatcherBuilder`.
"))]
pub struct DispatcherBuilder {
    /// API base URL without the version segment.
    ///
    /// Any host other than `discord.com` is treated as a REST proxy, unless
    /// `proxy_mode` says otherwise.
    #[builder(default_code = "String::from(DISCORD_API_URL)")]
    base_url: String,
    /// API version, appended to the base URL as `/v{version}`.
    #[builder(default = DEFAULT_API_VERSION)]
    api_version: u8,
    /// Credential used for requests that do not name one.
    token: Option<SecretString>,
    /// Maximum number of 429 retries per request before returning an error.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    /// Idle time after which an empty bucket queue is dropped.
    #[builder(default = DEFAULT_DELETE_QUEUE_DELAY)]
    delete_queue_delay: Duration,
    /// Force proxy mode on or off instead of deriving it from `base_url`.
    ///
    /// In proxy mode, requests skip the local queues and rate limit
    /// bookkeeping, since the proxy does both.
    proxy_mode: Option<bool>,
    /// Shared secret sent to a REST proxy as `Proxy-Authorization`.
    proxy_secret: Option<SecretString>,
    /// Cap on outbound requests per second across all buckets. 0 disables it.
    #[builder(default = DEFAULT_GLOBAL_REQUESTS_PER_SECOND)]
    global_requests_per_second: u32,
    /// Length of the window invalid requests are counted in.
    #[builder(default = DEFAULT_INVALID_REQUEST_WINDOW)]
    invalid_request_window: Duration,
    /// Invalid requests per window after which a warning is logged.
    #[builder(default = DEFAULT_INVALID_REQUEST_WARN_THRESHOLD)]
    invalid_request_warn_threshold: u64,
    /// User agent sent with every request.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Response timeout per request.
    timeout: Option<Duration>,
    /// Observability callbacks.
    hooks: Option<Arc<dyn DispatchHooks>>,
    /// Converts request payloads to wire format.
    #[builder(default_code = "Arc::new(SnakeCase)")]
    transformer: Arc<dyn PayloadTransformer>,
}

impl Default for DispatcherBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DispatcherBuilder {
    /// Create a builder from file configuration
    #[must_use]
    pub fn from_config(config: DispatchConfig) -> Self {
        Self::builder()
            .base_url(config.base_url)
            .api_version(config.api_version)
            .token(config.token)
            .max_retries(config.max_retries)
            .delete_queue_delay(config.delete_queue_delay)
            .proxy_mode(config.proxy_mode)
            .proxy_secret(config.proxy_secret)
            .global_requests_per_second(config.global_requests_per_second)
            .invalid_request_window(config.invalid_request_window)
            .invalid_request_warn_threshold(config.invalid_request_warn_threshold)
            .user_agent(
                config
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .timeout(config.timeout)
            .build()
    }

    /// Instantiates a [`Dispatcher`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - `base_url` and `api_version` do not form a valid URL.
    /// - The user agent is not a valid header value.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn dispatcher(self) -> Result<Dispatcher> {
        let base = format!(
            "{}/v{}/",
            self.base_url.trim_end_matches('/'),
            self.api_version
        );
        let api_base = Url::parse(&base).map_err(|e| ErrorKind::InvalidUrl(base, e))?;
        let proxied = self
            .proxy_mode
            .unwrap_or_else(|| api_base.host_str() != Some(DISCORD_HOST));

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&self.user_agent)?);

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers);
        let http = (match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildClient)?;

        let pacer = NonZeroU32::new(self.global_requests_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        let default_credential = self
            .token
            .as_ref()
            .map(Credential::from)
            .unwrap_or_default();

        if proxied {
            log::debug!("Sending requests through REST proxy at {api_base}");
        }

        Ok(Dispatcher {
            inner: Arc::new(DispatcherInner {
                http,
                api_base,
                proxied,
                proxy_secret: self.proxy_secret,
                default_credential: RwLock::new(default_credential),
                aliases: DashMap::new(),
                rotations: AtomicU64::new(0),
                max_retries: self.max_retries,
                delete_queue_delay: self.delete_queue_delay,
                registry: RateLimitRegistry::new(),
                invalid_requests: InvalidRequestTracker::new(
                    self.invalid_request_window,
                    self.invalid_request_warn_threshold,
                ),
                queues: Mutex::new(HashMap::new()),
                pacer,
                hooks: self.hooks,
                transformer: self.transformer,
            }),
        })
    }
}

/// Sends requests to the REST API while respecting its rate limits.
///
/// Requests are queued per credential and route. Each queue sends one
/// request at a time, in submission order, and pauses while the server
/// reports its bucket as exhausted. Unrelated routes proceed in parallel.
///
/// `Dispatcher` is cheap to clone; clones share all state.
///
/// See [`DispatcherBuilder`] which contains sane defaults for all
/// configuration options.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Debug)]
struct DispatcherInner {
    http: reqwest::Client,
    /// Versioned base URL, ending in a slash
    api_base: Url,
    proxied: bool,
    proxy_secret: Option<SecretString>,
    default_credential: RwLock<Credential>,
    /// Rotated credentials, what they were rotated to, and the rotation
    /// they were retired in
    aliases: DashMap<Credential, (Credential, u64)>,
    rotations: AtomicU64,
    max_retries: u32,
    delete_queue_delay: Duration,
    registry: Arc<RateLimitRegistry>,
    invalid_requests: InvalidRequestTracker,
    /// Always locked before any queue's own state
    queues: Mutex<HashMap<QueueKey, Arc<BucketQueue>>>,
    pacer: Option<DefaultDirectRateLimiter>,
    hooks: Option<Arc<dyn DispatchHooks>>,
    transformer: Arc<dyn PayloadTransformer>,
}

/// Outcome of a single transmission
enum Attempt {
    Done(ResponseBody),
    RateLimited {
        retry_after: Duration,
        body: ResponseBody,
    },
}

impl Dispatcher {
    /// Send a request and wait for its result.
    ///
    /// `path` is relative to the versioned API base, e.g.
    /// `/channels/41771983423143937/messages`.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if no response was received, the server rejected the
    /// request, or it stayed rate limited for more than `max_retries` retries.
    /// See [`ErrorKind::class`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody> {
        let (mut request, receiver) = PendingRequest::new(method, path, options);
        if self.inner.proxied || request.options.bypass_queue {
            return self.inner.execute(&mut request, None).await;
        }

        self.inner.enqueue(request);
        receiver.await.map_err(|_| ErrorKind::QueueClosed)?
    }

    /// Send a `GET` request
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ResponseBody> {
        self.send(Method::GET, path, options).await
    }

    /// Send a `POST` request
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<ResponseBody> {
        self.send(Method::POST, path, options).await
    }

    /// Send a `PUT` request
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<ResponseBody> {
        self.send(Method::PUT, path, options).await
    }

    /// Send a `PATCH` request
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<ResponseBody> {
        self.send(Method::PATCH, path, options).await
    }

    /// Send a `DELETE` request
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<ResponseBody> {
        self.send(Method::DELETE, path, options).await
    }

    /// Move all queued work and rate limit state of `old` to `new`.
    ///
    /// Queues of `old` are re-keyed under `new`. Where `new` already has a
    /// queue for the same route, the old queue's requests are placed in front
    /// of its own, in their original order. Requests that are in flight
    /// finish first. From now on, any request naming `old` is sent as `new`.
    ///
    /// Returns the number of queues that were moved.
    pub fn rotate_credential(&self, old: impl Into<Credential>, new: impl Into<Credential>) -> usize {
        let (old, new) = (old.into(), new.into());
        if old == new {
            return 0;
        }
        let inner = &self.inner;
        let mut queues = inner.queues();

        inner.alias(&old, &new);

        {
            let mut default = inner
                .default_credential
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *default == old {
                *default = new.clone();
            }
        }

        let stale: Vec<QueueKey> = queues
            .keys()
            .filter(|key| key.credential == old)
            .cloned()
            .collect();
        let moved = stale.len();
        for key in stale {
            let Some(queue) = queues.remove(&key) else {
                continue;
            };
            let key = QueueKey {
                credential: new.clone(),
                route: key.route,
            };
            if let Some(existing) = queues.get(&key) {
                log::debug!("Merging queue {} of {old} into {new}", key.route);
                existing.absorb(&queue, inner);
            } else {
                log::debug!("Moving queue {} from {old} to {new}", key.route);
                queue.rekey(key.clone());
                queues.insert(key, queue);
            }
        }

        let limits = inner.registry.rotate(&old, &new);
        log::debug!("Rotated credential {old} to {new}: {moved} queues, {limits} rate limits");
        moved
    }

    /// Number of live bucket queues
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.inner.queues().len()
    }

    /// How long requests to `path` must wait before they may be sent, for
    /// the default credential. `None` if they may be sent now.
    #[must_use]
    pub fn is_limited(&self, method: &Method, path: &str) -> Option<Duration> {
        let route = RouteKey::derive(method, path);
        let credential = self.default_credential();
        let bucket = self
            .inner
            .queues()
            .get(&QueueKey {
                credential: credential.clone(),
                route: route.clone(),
            })
            .and_then(|queue| queue.bucket());
        self.inner
            .registry
            .is_limited(&credential, &route, bucket.as_deref())
    }

    /// Whether the account-wide limit is currently exhausted
    #[must_use]
    pub fn globally_limited(&self) -> bool {
        self.inner.registry.globally_limited()
    }

    /// Invalid requests counted in the current window
    #[must_use]
    pub fn invalid_request_count(&self) -> u64 {
        self.inner.invalid_requests.count()
    }

    /// The credential requests are sent as unless they name one
    #[must_use]
    pub fn default_credential(&self) -> Credential {
        self.inner.default_credential()
    }

    /// The rate limit registry shared by all queues
    #[must_use]
    pub fn registry(&self) -> &Arc<RateLimitRegistry> {
        &self.inner.registry
    }

    /// Whether requests skip local rate limiting because a REST proxy does it
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.inner.proxied
    }
}

impl DispatcherInner {
    fn queues(&self) -> MutexGuard<'_, HashMap<QueueKey, Arc<BucketQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn default_credential(&self) -> Credential {
        self.default_credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The credential a request is sent as, following rotations
    fn credential_for(&self, options: &RequestOptions) -> Credential {
        let credential = options
            .credential
            .clone()
            .unwrap_or_else(|| self.default_credential());
        // Alias targets are never aliases themselves
        match self.aliases.get(&credential) {
            Some(alias) => alias.0.clone(),
            None => credential,
        }
    }

    /// Send `old` as `new` from now on.
    ///
    /// Only the most recent [`MAX_CREDENTIAL_ALIASES`] rotations are
    /// remembered.
    fn alias(&self, old: &Credential, new: &Credential) {
        let rotation = self.rotations.fetch_add(1, Ordering::Relaxed);
        // `new` is live again, and anything that pointed at `old` now points
        // at `new`
        self.aliases.remove(new);
        for mut alias in self.aliases.iter_mut() {
            if alias.0 == *old {
                alias.0 = new.clone();
            }
        }
        self.aliases.insert(old.clone(), (new.clone(), rotation));

        while self.aliases.len() > MAX_CREDENTIAL_ALIASES {
            let oldest = self
                .aliases
                .iter()
                .min_by_key(|alias| alias.1)
                .map(|alias| alias.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            log::debug!("Forgetting rotated credential {oldest}");
            self.aliases.remove(&oldest);
        }
    }

    fn enqueue(self: &Arc<Self>, request: PendingRequest) {
        let mut queues = self.queues();
        let key = QueueKey {
            credential: self.credential_for(&request.options),
            route: request.route.clone(),
        };
        let queue = queues.entry(key.clone()).or_insert_with(|| {
            log::debug!("Creating queue {} for {}", key.route, key.credential);
            BucketQueue::new(key, self.delete_queue_delay)
        });
        queue.enqueue(request, self);
    }

    /// Transmit a request until it succeeds, fails, or runs out of retries
    async fn execute(
        &self,
        request: &mut PendingRequest,
        queue: Option<&BucketQueue>,
    ) -> Result<ResponseBody> {
        loop {
            let credential = self.credential_for(&request.options);
            if !self.proxied {
                self.wait_until_allowed(&credential, request, queue).await;
            }

            match self.attempt(request, &credential, queue).await? {
                Attempt::Done(body) => return Ok(body),
                Attempt::RateLimited { retry_after, body } => {
                    request.retries += 1;
                    if request.retries > self.max_retries {
                        return Err(ErrorKind::RetriesExhausted {
                            method: request.method.clone(),
                            path: request.path.clone(),
                            retries: self.max_retries,
                            body,
                        });
                    }
                    log::warn!(
                        "{} {} was rate limited, retry {}/{} in {retry_after:?}",
                        request.method,
                        request.path,
                        request.retries,
                        self.max_retries
                    );
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    async fn wait_until_allowed(
        &self,
        credential: &Credential,
        request: &PendingRequest,
        queue: Option<&BucketQueue>,
    ) {
        // A fresh request only knows its bucket through its queue
        let bucket = request
            .bucket
            .clone()
            .or_else(|| queue.and_then(BucketQueue::bucket));
        while let Some(wait) =
            self.registry
                .is_limited(credential, &request.route, bucket.as_deref())
        {
            log::debug!("{} is rate limited, waiting {wait:?}", request.route);
            tokio::time::sleep(wait).await;
        }
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
    }

    /// Transmit a request once
    async fn attempt(
        &self,
        request: &mut PendingRequest,
        credential: &Credential,
        queue: Option<&BucketQueue>,
    ) -> Result<Attempt> {
        let url = self.url(&request.path)?;
        let info = RequestInfo {
            method: request.method.clone(),
            path: request.path.clone(),
            route: request.route.clone(),
            attempt: request.retries,
        };
        if let Some(hooks) = &self.hooks {
            hooks.on_request(&info);
        }

        let headers = self.headers(&request.options, credential)?;
        let builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        let builder = self.attach_body(builder, &request.options)?;

        let response = match builder.send().await {
            Ok(response) => response,
            Err(source) => {
                self.invalid_requests.handle_transport_failure();
                if let Some(hooks) = &self.hooks {
                    hooks.on_transport_error(&info, &source);
                }
                return Err(ErrorKind::Transport {
                    method: request.method.clone(),
                    path: request.path.clone(),
                    source,
                });
            }
        };

        let status = response.status();
        let limits = RateLimitHeaders::parse(response.headers());
        let body = ResponseBody::from_response(response).await?;
        if let Some(hooks) = &self.hooks {
            hooks.on_response(&info, status, &body);
        }

        let retry_after = limits
            .retry_after
            .or_else(|| body.retry_after());
        if !self.proxied
            && let Some(bucket) = self.interpret_headers(credential, &request.route, &limits, retry_after, queue)
        {
            request.bucket = Some(bucket);
        }
        self.invalid_requests
            .handle_completed_request(status, limits.is_shared_scope());

        if status.is_success() {
            return Ok(Attempt::Done(body));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after
                .or(limits.reset_after)
                .unwrap_or(FALLBACK_RETRY_AFTER);
            return Ok(Attempt::RateLimited { retry_after, body });
        }
        Err(ErrorKind::Http {
            method: request.method.clone(),
            path: request.path.clone(),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }

    /// Record what a response said about rate limits. Returns the bucket id
    /// the server assigned to the route, if any.
    fn interpret_headers(
        &self,
        credential: &Credential,
        route: &RouteKey,
        limits: &RateLimitHeaders,
        retry_after: Option<Duration>,
        queue: Option<&BucketQueue>,
    ) -> Option<String> {
        log::trace!("{route}: {limits:?}");
        if let Some(queue) = queue {
            queue.handle_completed_request(limits.remaining, limits.reset_after, limits.limit);
            if let Some(bucket) = &limits.bucket {
                queue.set_bucket(bucket);
            }
        }

        if limits.remaining == Some(0) {
            let wait = limits
                .reset_after
                .or(retry_after)
                .unwrap_or(FALLBACK_RETRY_AFTER);
            self.registry.record_limited(
                credential,
                route,
                limits.bucket.as_deref(),
                deadline(wait),
            );
        }

        if limits.global {
            let wait = retry_after
                .or(limits.reset_after)
                .unwrap_or(FALLBACK_RETRY_AFTER);
            log::warn!("Hit the global rate limit, pausing all requests for {wait:?}");
            self.registry
                .record_global_limited(deadline(wait), limits.bucket.as_deref());
        }

        limits.bucket.clone()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ErrorKind::InvalidUrl(path.to_string(), e))
    }

    fn headers(&self, options: &RequestOptions, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if !options.unauthorized && !credential.is_anonymous() {
            headers.insert(AUTHORIZATION, header_value(&credential.authorization())?);
        }
        if self.proxied
            && let Some(secret) = &self.proxy_secret
        {
            headers.insert(PROXY_AUTHORIZATION, header_value(secret.expose_secret())?);
        }
        if let Some(reason) = &options.reason {
            let encoded = utf8_percent_encode(reason, URI_COMPONENT).to_string();
            headers.insert(
                HeaderName::from_static(AUDIT_LOG_REASON),
                header_value(&encoded)?,
            );
        }
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(headers)
    }

    fn attach_body(
        &self,
        builder: reqwest::RequestBuilder,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder> {
        let payload = options
            .body
            .as_ref()
            .map(|body| self.transformer.to_wire(body));

        if !options.files.is_empty() {
            let mut form = Form::new();
            for (i, file) in options.files.iter().enumerate() {
                let mut part = Part::bytes(file.content.clone()).file_name(file.name.clone());
                if let Some(content_type) = &file.content_type {
                    part = part
                        .mime_str(content_type)
                        .map_err(|e| ErrorKind::InvalidHeader(e.to_string()))?;
                }
                form = form.part(format!("files[{i}]"), part);
            }
            if let Some(payload) = payload {
                let json = Part::text(serde_json::to_string(&payload)?)
                    .mime_str("application/json")
                    .map_err(|e| ErrorKind::InvalidHeader(e.to_string()))?;
                form = form.part("payload_json", json);
            }
            return Ok(builder.multipart(form));
        }

        Ok(match payload {
            Some(payload) if options.form => builder.form(&payload),
            Some(payload) => builder.json(&payload),
            None => builder,
        })
    }
}

impl QueueDriver for DispatcherInner {
    fn transmit(
        &self,
        request: &mut PendingRequest,
        queue: &BucketQueue,
    ) -> impl Future<Output = Result<ResponseBody>> + Send {
        self.execute(request, Some(queue))
    }

    fn evict(&self, queue: &Arc<BucketQueue>) {
        let mut queues = self.queues();
        let key = queue.key();
        let current = queues
            .get(&key)
            .is_some_and(|existing| Arc::ptr_eq(existing, queue));
        if current && queue.is_idle() {
            queues.remove(&key);
            queue.cleanup();
            log::debug!("Dropped idle queue {} for {}", key.route, key.credential);
        }
    }
}

/// `wait` from now, capped at the longest wait the server may ask for
fn deadline(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(MAX_RATE_LIMIT_WAIT)).unwrap_or(now)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ErrorKind::InvalidHeader(e.to_string()))
}
