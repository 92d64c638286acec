use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bucketeer_lib::{
    Credential, DispatchHooks, Dispatcher, DispatcherBuilder, ErrorClass, ErrorKind, RequestInfo,
    RequestOptions, ResponseBody,
};
use http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn builder(server: &MockServer) -> bucketeer_lib::DispatcherBuilder {
    DispatcherBuilder::builder()
        .base_url(server.uri())
        .token(Some(SecretString::from("old-token")))
        .proxy_mode(Some(false))
        .global_requests_per_second(0_u32)
        .max_retries(3_u32)
        .build()
}

fn dispatcher(server: &MockServer) -> Dispatcher {
    builder(server).dispatcher().unwrap()
}

#[tokio::test]
async fn test_success_returns_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v10/users/@me"))
        .and(header("authorization", "Bot old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "username": "bot"})))
        .expect(1)
        .mount(&server)
        .await;

    let body = dispatcher(&server)
        .get("/users/@me", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(body.into_json().unwrap()["username"], "bot");
}

#[tokio::test]
async fn test_no_content_is_empty_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let body = dispatcher(&server)
        .delete("/channels/1/messages/2/reactions/🔥/@me", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(body, ResponseBody::Empty);
}

#[tokio::test]
async fn test_client_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"message": "Unknown Channel", "code": 10003})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    let err = dispatcher
        .get("/channels/1", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::ClientError);
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.api_code(), Some(10003));
    assert!(matches!(err, ErrorKind::Http { ref status_text, .. } if status_text == "Not Found"));
    assert_eq!(dispatcher.invalid_request_count(), 1);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .expect(1)
        .mount(&server)
        .await;

    let err = dispatcher(&server)
        .get("/gateway", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::ServerError);
    assert_eq!(err.body(), Some(&ResponseBody::Text("Bad Gateway".into())));
}

#[tokio::test]
async fn test_transport_failure_is_not_retried() {
    let dispatcher = DispatcherBuilder::builder()
        .base_url("http://127.0.0.1:1/api")
        .proxy_mode(Some(false))
        .build()
        .dispatcher()
        .unwrap();

    let err = dispatcher
        .get("/users/@me", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransportFailure);
    assert_eq!(err.status(), None);
    assert_eq!(dispatcher.invalid_request_count(), 1);
}

#[tokio::test]
async fn test_rate_limited_until_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0.01")
                .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 0.01, "global": false})),
        )
        // The first attempt plus exactly three retries
        .expect(4)
        .mount(&server)
        .await;

    let err = dispatcher(&server)
        .post("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::RateLimited);
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert!(matches!(err, ErrorKind::RetriesExhausted { retries: 3, .. }));
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 0.05})),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "2"})))
        .expect(1)
        .mount(&server)
        .await;

    let start = Instant::now();
    let body = dispatcher(&server)
        .post("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(body, ResponseBody::Json(json!({"id": "2"})));
    // Waited for the `retry_after` the body asked for
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_exhausted_bucket_blocks_route() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5")
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset-after", "0.3")
                .insert_header("x-ratelimit-bucket", "abcd1234"),
        )
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    dispatcher
        .get("/channels/1/messages/2", RequestOptions::new())
        .await
        .unwrap();
    assert!(dispatcher.is_limited(&Method::GET, "/channels/1/messages/3").is_some());
    assert_eq!(dispatcher.is_limited(&Method::GET, "/channels/9/messages/3"), None);

    let start = Instant::now();
    dispatcher
        .get("/channels/1/messages/3", RequestOptions::new())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_exhausted_bucket_blocks_other_routes_in_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v10/channels/1/pins"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5")
                .insert_header("x-ratelimit-remaining", "4")
                .insert_header("x-ratelimit-reset-after", "5")
                .insert_header("x-ratelimit-bucket", "shared"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v10/channels/1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5")
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset-after", "0.3")
                .insert_header("x-ratelimit-bucket", "shared"),
        )
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    dispatcher
        .get("/channels/1/pins", RequestOptions::new())
        .await
        .unwrap();
    dispatcher
        .get("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap();

    // The pins route learned its bucket earlier and now shares the wait
    assert!(dispatcher.is_limited(&Method::GET, "/channels/1/pins").is_some());
    let start = Instant::now();
    dispatcher
        .get("/channels/1/pins", RequestOptions::new())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_absurd_retry_after_does_not_break_the_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1e30")
                .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 1e300})),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = DispatcherBuilder::builder()
        .base_url(server.uri())
        .proxy_mode(Some(false))
        .global_requests_per_second(0_u32)
        .max_retries(0_u32)
        .build()
        .dispatcher()
        .unwrap();

    let err = dispatcher
        .post("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorKind::RetriesExhausted { retries: 0, .. }));

    // The queue is still alive and sends the next request
    dispatcher
        .post("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(dispatcher.queue_count(), 1);
}

#[tokio::test]
async fn test_global_limit_blocks_every_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-ratelimit-global", "true")
                .insert_header("x-ratelimit-scope", "global")
                .insert_header("retry-after", "0.4")
                .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 0.4, "global": true})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = DispatcherBuilder::builder()
        .base_url(server.uri())
        .proxy_mode(Some(false))
        .global_requests_per_second(0_u32)
        .max_retries(0_u32)
        .build()
        .dispatcher()
        .unwrap();

    let start = Instant::now();
    let err = dispatcher
        .post("/channels/1/messages", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::RateLimited);
    assert!(dispatcher.globally_limited());
    assert!(dispatcher.is_limited(&Method::GET, "/users/@me").is_some());

    dispatcher
        .get("/users/@me", RequestOptions::new())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(350));
}

#[tokio::test]
async fn test_same_bucket_is_fifo() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    let send = |n: u32| {
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .post(&format!("/channels/1/messages?n={n}"), RequestOptions::new())
                .await
        }
    };
    let (a, b, c, d, e) = tokio::join!(send(0), send(1), send(2), send(3), send(4));
    for result in [a, b, c, d, e] {
        result.unwrap();
    }

    let received: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.url.query().unwrap_or_default().to_string())
        .collect();
    assert_eq!(received, vec!["n=0", "n=1", "n=2", "n=3", "n=4"]);
    assert_eq!(dispatcher.queue_count(), 1);
}

#[tokio::test]
async fn test_idle_queue_is_evicted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = DispatcherBuilder::builder()
        .base_url(server.uri())
        .proxy_mode(Some(false))
        .delete_queue_delay(Duration::from_millis(100))
        .build()
        .dispatcher()
        .unwrap();

    dispatcher.get("/guilds/1", RequestOptions::new()).await.unwrap();
    dispatcher.get("/guilds/2", RequestOptions::new()).await.unwrap();
    assert_eq!(dispatcher.queue_count(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(dispatcher.queue_count(), 0);

    dispatcher.get("/guilds/1", RequestOptions::new()).await.unwrap();
    assert_eq!(dispatcher.queue_count(), 1);
}

#[tokio::test]
async fn test_bypass_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v10/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "x"})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    dispatcher
        .post(
            "/oauth2/token",
            RequestOptions::new().unauthorized(true).bypass_queue(true),
        )
        .await
        .unwrap();
    assert_eq!(dispatcher.queue_count(), 0);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_audit_log_reason_header() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(header("x-audit-log-reason", "too%20spicy%20%F0%9F%8C%B6"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    dispatcher(&server)
        .delete(
            "/guilds/1/members/2",
            RequestOptions::new().reason("too spicy 🌶"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rotation_moves_waiting_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    let sender = dispatcher.clone();
    let work = tokio::spawn(async move {
        let send = |n: u32| {
            let dispatcher = sender.clone();
            async move {
                dispatcher
                    .post(&format!("/channels/1/messages?n={n}"), RequestOptions::new())
                    .await
            }
        };
        let (a, b, c) = tokio::join!(send(0), send(1), send(2));
        [a, b, c]
    });

    // Let the first request go in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.rotate_credential("old-token", "new-token"), 1);
    assert_eq!(dispatcher.default_credential(), Credential::new("new-token"));

    for result in work.await.unwrap() {
        result.unwrap();
    }

    let received: Vec<(String, String)> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| {
            (
                request.url.query().unwrap_or_default().to_string(),
                request.headers["authorization"].to_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        received,
        vec![
            ("n=0".to_string(), "Bot old-token".to_string()),
            ("n=1".to_string(), "Bot new-token".to_string()),
            ("n=2".to_string(), "Bot new-token".to_string()),
        ]
    );
    assert_eq!(dispatcher.queue_count(), 1);
}

#[tokio::test]
async fn test_rotation_merges_into_existing_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    let sender = dispatcher.clone();
    let work = tokio::spawn(async move {
        let old = |n: &'static str| {
            let dispatcher = sender.clone();
            async move {
                dispatcher
                    .post(&format!("/channels/1/messages?old={n}"), RequestOptions::new())
                    .await
            }
        };
        let new = {
            let dispatcher = sender.clone();
            async move {
                dispatcher
                    .post(
                        "/channels/1/messages?new=1",
                        RequestOptions::new().credential("new-token"),
                    )
                    .await
            }
        };
        let (a, b, c) = tokio::join!(old("1"), old("2"), new);
        [a, b, c]
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(dispatcher.queue_count(), 2);
    dispatcher.rotate_credential("old-token", "new-token");
    assert_eq!(dispatcher.queue_count(), 1);

    for result in work.await.unwrap() {
        result.unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    // The waiting request of the old queue went last, after both requests
    // that were in flight during rotation, and as the new credential
    let last = &requests[2];
    assert_eq!(last.url.query(), Some("old=2"));
    assert_eq!(last.headers["authorization"], "Bot new-token");
}

#[derive(Debug, Default)]
struct CountingHooks {
    requests: AtomicUsize,
    responses: AtomicUsize,
}

impl DispatchHooks for CountingHooks {
    fn on_request(&self, _request: &RequestInfo) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response(&self, _request: &RequestInfo, _status: StatusCode, _body: &ResponseBody) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_hooks_see_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let hooks = Arc::new(CountingHooks::default());
    let dispatcher = DispatcherBuilder::builder()
        .base_url(server.uri())
        .proxy_mode(Some(false))
        .hooks(Some(hooks.clone() as Arc<dyn DispatchHooks>))
        .build()
        .dispatcher()
        .unwrap();

    dispatcher.get("/gateway/bot", RequestOptions::new()).await.unwrap();
    assert_eq!(hooks.requests.load(Ordering::SeqCst), 3);
    assert_eq!(hooks.responses.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_proxy_mode_skips_queues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("proxy-authorization", "hunter2"))
        .and(header("authorization", "Bot old-token"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-ratelimit-remaining", "0"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = DispatcherBuilder::builder()
        .base_url(server.uri())
        .token(Some(SecretString::from("old-token")))
        .proxy_secret(Some(SecretString::from("hunter2")))
        .build()
        .dispatcher()
        .unwrap();
    assert!(dispatcher.is_proxied());

    dispatcher.get("/users/@me", RequestOptions::new()).await.unwrap();
    assert_eq!(dispatcher.queue_count(), 0);
    assert!(dispatcher.registry().is_empty());
}
