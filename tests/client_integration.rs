use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{header::LOCATION, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use coordkv_http::{
    ClientOptions, CoordKvClient, CoordKvError, JsonDecoder, KvRequest, RetryNTimes, TextDecoder,
};
use serde_json::{json, Value as JsonValue};
use tokio::io::AsyncReadExt;

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    location: Option<String>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body: body.to_string(),
            location: None,
            delay: Duration::from_millis(0),
        }
    }

    fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
            location: None,
            delay: Duration::from_millis(0),
        }
    }

    fn redirect(status: StatusCode, location: Option<&str>) -> Self {
        Self {
            status,
            body: String::new(),
            location: location.map(str::to_owned),
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    hits: Arc<AtomicUsize>,
    uris: Arc<Mutex<Vec<String>>>,
}

async fn keys_handler(State(state): State<MockState>, uri: Uri, _body: String) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .uris
        .lock()
        .expect("uri log mutex must not be poisoned")
        .push(uri.to_string());

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"errorCode": 300, "message": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut reply = (response.status, response.body).into_response();
    if let Some(location) = response.location {
        reply.headers_mut().insert(
            LOCATION,
            HeaderValue::from_str(&location).expect("location must be a valid header"),
        );
    }
    reply
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    uris: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
        uris: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .fallback(keys_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        uris: state.uris,
        task,
    }
}

/// Address nothing listens on; connecting is refused.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind probe listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    format!("http://{address}")
}

/// Accepts connections, reads the request and hangs up without answering.
async fn hangup_endpoint() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind hangup listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
        }
    });
    (format!("http://{address}"), task)
}

fn node_body(value: &str) -> JsonValue {
    json!({
        "action": "get",
        "node": { "key": "/a", "value": value, "modifiedIndex": 7, "createdIndex": 7 }
    })
}

#[tokio::test]
async fn get_returns_decoded_value() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, node_body("1"))]).await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let value: JsonValue = client
        .execute(
            KvRequest::get("/v2/keys/a").param("quorum", "true"),
            JsonDecoder::new(),
        )
        .await
        .expect("request must succeed");

    assert_eq!(value["node"]["value"], "1");
    assert_eq!(server.hits(), 1);
    assert_eq!(
        server.uris.lock().expect("uri log").as_slice(),
        ["/v2/keys/a?quorum=true"]
    );
}

#[tokio::test]
async fn connect_failure_fails_over_and_sticks_to_live_endpoint() {
    let dead = dead_endpoint().await;
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, node_body("1")),
        MockResponse::json(StatusCode::OK, node_body("2")),
    ])
    .await;
    let client = CoordKvClient::from_uris([dead.as_str(), server.base_url.as_str()])
        .expect("client must build");

    let first: JsonValue = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(3)),
            JsonDecoder::new(),
        )
        .await
        .expect("second endpoint must answer");
    assert_eq!(first["node"]["value"], "1");
    assert_eq!(client.preferred_endpoint(), 1);

    // No retries allowed: only succeeds because the live endpoint is tried first.
    let second: JsonValue = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(1)),
            JsonDecoder::new(),
        )
        .await
        .expect("sticky endpoint must answer");
    assert_eq!(second["node"]["value"], "2");
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn exhausted_retries_surface_last_connect_error() {
    let first = dead_endpoint().await;
    let second = dead_endpoint().await;
    let client =
        CoordKvClient::from_uris([first.as_str(), second.as_str()]).expect("client must build");

    let err = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(2)),
            TextDecoder,
        )
        .await
        .expect_err("all endpoints are down");

    match err {
        CoordKvError::Connect { endpoint, .. } => assert!(endpoint.starts_with(&second)),
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn redirect_is_followed_without_consuming_retries() {
    let target = spawn_server(vec![MockResponse::json(StatusCode::OK, node_body("moved"))]).await;
    let origin = spawn_server(vec![MockResponse::redirect(
        StatusCode::TEMPORARY_REDIRECT,
        Some(&target.url("/v2/keys/a")),
    )])
    .await;
    let client = CoordKvClient::from_uris([origin.base_url.as_str()]).expect("client must build");

    let value: JsonValue = client
        .execute(
            KvRequest::put("/v2/keys/a")
                .param("value", "moved")
                .retry_policy(RetryNTimes::new(1)),
            JsonDecoder::new(),
        )
        .await
        .expect("redirect target must answer");

    assert_eq!(value["node"]["value"], "moved");
    assert_eq!(origin.hits(), 1);
    assert_eq!(target.hits(), 1);
}

#[tokio::test]
async fn redirect_without_location_is_fatal() {
    let server = spawn_server(vec![
        MockResponse::redirect(StatusCode::TEMPORARY_REDIRECT, None),
        MockResponse::json(StatusCode::OK, node_body("1")),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let err = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(5)),
            TextDecoder,
        )
        .await
        .expect_err("redirect without location must fail");

    assert!(matches!(
        err,
        CoordKvError::RedirectWithoutLocation { status: 307, .. }
    ));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn redirect_to_non_http_scheme_fails_under_default_policy() {
    let server = spawn_server(vec![
        MockResponse::redirect(StatusCode::TEMPORARY_REDIRECT, Some("ftp://127.0.0.1/x")),
        MockResponse::json(StatusCode::OK, node_body("1")),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        client.execute(KvRequest::get("/v2/keys/a"), TextDecoder),
    )
    .await
    .expect("request must resolve instead of retrying")
    .expect_err("ftp redirect must fail");

    assert!(
        matches!(err, CoordKvError::InvalidRedirect { ref location, .. } if location == "ftp://127.0.0.1/x"),
        "unexpected error: {err:?}"
    );
    assert!(!err.is_retryable());
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn redirect_loop_stops_at_limit() {
    let server = spawn_server(vec![
        MockResponse::redirect(StatusCode::FOUND, Some("/v2/keys/a")),
        MockResponse::redirect(StatusCode::FOUND, Some("/v2/keys/a")),
        MockResponse::redirect(StatusCode::FOUND, Some("/v2/keys/a")),
        MockResponse::redirect(StatusCode::FOUND, Some("/v2/keys/a")),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()])
        .expect("client must build")
        .with_options(ClientOptions {
            max_redirects: 2,
            ..ClientOptions::default()
        });

    let err = client
        .execute(KvRequest::get("/v2/keys/a"), TextDecoder)
        .await
        .expect_err("redirect loop must fail");

    assert_eq!(err, CoordKvError::TooManyRedirects { limit: 2 });
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn decode_failure_is_not_retried() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::OK, "not json"),
        MockResponse::json(StatusCode::OK, node_body("1")),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let err = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(5)),
            JsonDecoder::<JsonValue>::new(),
        )
        .await
        .expect_err("invalid body must fail");

    assert!(matches!(err, CoordKvError::Decode(_)));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn server_error_is_surfaced_without_retry() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::NOT_FOUND,
        json!({"errorCode": 100, "message": "Key not found", "cause": "/a", "index": 12}),
    )])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let err = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(5)),
            JsonDecoder::<JsonValue>::new(),
        )
        .await
        .expect_err("missing key must fail");

    match err {
        CoordKvError::Server {
            error_code, cause, ..
        } => {
            assert_eq!(error_code, 100);
            assert_eq!(cause.as_deref(), Some("/a"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn read_timeout_is_retried_then_surfaced() {
    let slow = || {
        MockResponse::json(StatusCode::OK, node_body("late")).with_delay(Duration::from_millis(500))
    };
    let server = spawn_server(vec![slow(), slow()]).await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let err = client
        .execute(
            KvRequest::get("/v2/keys/a")
                .timeout(Duration::from_millis(50))
                .retry_policy(RetryNTimes::new(2)),
            TextDecoder,
        )
        .await
        .expect_err("request must time out");

    assert!(matches!(err, CoordKvError::Timeout { .. }));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn premature_disconnect_is_retried_on_next_endpoint() {
    let (hangup, hangup_task) = hangup_endpoint().await;
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, node_body("1"))]).await;

    let failing = CoordKvClient::from_uris([hangup.as_str()]).expect("client must build");
    let err = failing
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(1)),
            TextDecoder,
        )
        .await
        .expect_err("hangup must fail");
    assert!(matches!(err, CoordKvError::PrematureDisconnect { .. }));

    let client = CoordKvClient::from_uris([hangup.as_str(), server.base_url.as_str()])
        .expect("client must build");
    let value: JsonValue = client
        .execute(
            KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(2)),
            JsonDecoder::new(),
        )
        .await
        .expect("second endpoint must answer");
    assert_eq!(value["node"]["value"], "1");

    hangup_task.abort();
}

#[tokio::test]
async fn cancel_discards_in_flight_attempt() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, node_body("late")).with_delay(Duration::from_millis(300)),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let promise = client.send(
        KvRequest::get("/v2/keys/a").retry_policy(RetryNTimes::new(5)),
        TextDecoder,
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(promise.cancel());

    let err = promise.wait().await.expect_err("cancelled request must fail");
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(promise.is_cancelled());
    assert_eq!(server.hits(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_get_and_listeners_share_one_result() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, node_body("1")).with_delay(Duration::from_millis(50)),
    ])
    .await;
    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");

    let promise = client.send(KvRequest::get("/v2/keys/a"), TextDecoder);
    let notifications = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notifications);
    promise.add_listener(move |outcome| {
        assert!(outcome.is_ok());
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let waiter = promise.clone();
    let first = tokio::task::spawn_blocking(move || waiter.get())
        .await
        .expect("blocking waiter must not panic")
        .expect("request must succeed");
    let second = promise.wait().await.expect("request must succeed");

    assert_eq!(first, second);
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(server.hits(), 1);
}

#[test]
fn blocking_client_runs_on_its_own_runtime() {
    let server_runtime = tokio::runtime::Runtime::new().expect("server runtime");
    let server = server_runtime
        .block_on(spawn_server(vec![MockResponse::text(StatusCode::OK, "pong")]));

    let client = CoordKvClient::from_uris([server.base_url.as_str()]).expect("client must build");
    let promise = client.send(KvRequest::get("/ping"), TextDecoder);

    assert_eq!(promise.get(), Ok("pong".to_owned()));
    assert_eq!(promise.get(), Ok("pong".to_owned()));
    assert_eq!(server.hits(), 1);
}
