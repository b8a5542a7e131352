//! End-to-end behavior of the download engine against a scripted HTTP
//! server.

use std::{
    io::{Read, Write},
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use taipan_fetch::{
    fetch_repodata, CacheResult, DownloadError, DownloadOptions, DownloadTarget, InterruptFlag,
    MultiDownloader, RetryPolicy,
};

/// One canned response of the scripted server.
#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl ScriptedResponse {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// A minimal HTTP server that answers one scripted response per
/// request, repeating the last one when the script runs out.
struct ScriptedServer {
    address: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    fn spawn(responses: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binding a test port");
        let address = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let thread_hits = Arc::clone(&hits);
        let thread_requests = Arc::clone(&requests);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };

                // Read the request head.
                let mut buffer = Vec::new();
                let mut byte = [0u8; 1];
                while !buffer.ends_with(b"\r\n\r\n") {
                    match stream.read(&mut byte) {
                        Ok(1) => buffer.push(byte[0]),
                        _ => break,
                    }
                }
                let request = String::from_utf8_lossy(&buffer).into_owned();
                thread_requests.lock().unwrap().push(request);

                let index = thread_hits.fetch_add(1, Ordering::SeqCst);
                let response = responses
                    .get(index.min(responses.len().saturating_sub(1)))
                    .cloned()
                    .unwrap_or_else(|| ScriptedResponse::new(500));

                let mut head = format!(
                    "HTTP/1.1 {} scripted\r\ncontent-length: {}\r\nconnection: close\r\n",
                    response.status,
                    response.body.len()
                );
                for (name, value) in &response.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");

                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&response.body);
            }
        });

        Self {
            address,
            hits,
            requests,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.address)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> String {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

fn client() -> reqwest_middleware::ClientWithMiddleware {
    reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
}

fn fast_retry_options() -> DownloadOptions {
    DownloadOptions {
        retry: RetryPolicy {
            max_retries: 3,
            retry_timeout_secs: 0.01,
            backoff_factor: 1.0,
        },
        low_speed_limit: None,
        ..DownloadOptions::default()
    }
}

#[tokio::test]
async fn consecutive_503s_then_200_completes() {
    let server = ScriptedServer::spawn(vec![
        ScriptedResponse::new(503),
        ScriptedResponse::new(503),
        ScriptedResponse::new(503),
        ScriptedResponse::new(200).with_body(b"payload"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("artifact.bin");

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("artifact", &server.url("/artifact.bin"), destination.clone())
            .unwrap(),
    );

    let outcomes = downloader.download().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].retries_used, 3);
    assert_eq!(server.hits(), 4);
    assert_eq!(std::fs::read(&destination).unwrap(), b"payload");
}

#[tokio::test]
async fn retry_after_header_overrides_the_backoff() {
    // A 429 with `Retry-After: 1` waits a full second even though the
    // policy's own backoff would be near-instant.
    let server = ScriptedServer::spawn(vec![
        ScriptedResponse::new(429).with_header("retry-after", "1"),
        ScriptedResponse::new(200).with_body(b"ok"),
    ]);
    let dir = tempfile::tempdir().unwrap();

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("artifact", &server.url("/pkg.conda"), dir.path().join("pkg.conda"))
            .unwrap(),
    );

    let start = Instant::now();
    let outcomes = downloader.download().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(900), "{:?}", start.elapsed());
    assert_eq!(outcomes[0].retries_used, 1);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = ScriptedServer::spawn(vec![ScriptedResponse::new(404)]);
    let dir = tempfile::tempdir().unwrap();

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("missing", &server.url("/missing"), dir.path().join("missing"))
            .unwrap(),
    );

    let error = downloader.download().await.unwrap_err();
    assert_eq!(error.errors.len(), 1);
    assert!(
        matches!(
            error.errors[0],
            DownloadError::Fetch {
                http_status: Some(404),
                ..
            }
        ),
        "{:?}",
        error.errors[0]
    );
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn integrity_failures_are_terminal() {
    // A digest mismatch is an Integrity error, not a Fetch error, and
    // the transfer is not retried.
    let server =
        ScriptedServer::spawn(vec![ScriptedResponse::new(200).with_body(b"unexpected bytes")]);
    let dir = tempfile::tempdir().unwrap();

    let expected =
        taipan_digest::parse_digest_from_hex::<taipan_digest::Sha256>(
            "0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("artifact", &server.url("/pkg.conda"), dir.path().join("pkg.conda"))
            .unwrap()
            .with_expected_sha256(expected),
    );

    let error = downloader.download().await.unwrap_err();
    assert!(
        matches!(error.errors[0], DownloadError::Integrity { .. }),
        "{:?}",
        error.errors[0]
    );
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn not_modified_reuses_the_cached_artifact() {
    let server = ScriptedServer::spawn(vec![ScriptedResponse::new(304)]);
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("repodata.json");
    std::fs::write(&destination, b"cached body").unwrap();

    let finalized = Arc::new(AtomicUsize::new(0));
    let finalized_clone = Arc::clone(&finalized);

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("repodata", &server.url("/repodata.json"), destination.clone())
            .unwrap()
            .with_conditional(Some("\"etag-1\"".to_owned()), None)
            .with_finalize(move |outcome| {
                assert!(outcome.not_modified);
                finalized_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    );

    let outcomes = downloader.download().await.unwrap();
    assert!(outcomes[0].not_modified);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    // The cached body is untouched.
    assert_eq!(std::fs::read(&destination).unwrap(), b"cached body");
    // The conditional header went over the wire.
    assert!(server
        .last_request()
        .to_ascii_lowercase()
        .contains("if-none-match"));
}

#[tokio::test]
async fn failures_do_not_mask_successes() {
    let ok_server = ScriptedServer::spawn(vec![ScriptedResponse::new(200).with_body(b"fine")]);
    let bad_server = ScriptedServer::spawn(vec![ScriptedResponse::new(404)]);
    let dir = tempfile::tempdir().unwrap();

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("good", &ok_server.url("/a"), dir.path().join("a")).unwrap(),
    );
    downloader.add(
        DownloadTarget::new("bad", &bad_server.url("/b"), dir.path().join("b")).unwrap(),
    );

    let error = downloader.download().await.unwrap_err();
    assert_eq!(error.total, 2);
    assert_eq!(error.completed.len(), 1);
    assert_eq!(error.completed[0].name, "good");
    assert_eq!(error.errors.len(), 1);
}

#[tokio::test]
async fn ignored_failures_do_not_fail_the_download() {
    let bad_server = ScriptedServer::spawn(vec![ScriptedResponse::new(404)]);
    let dir = tempfile::tempdir().unwrap();

    let mut downloader = MultiDownloader::new(client(), fast_retry_options());
    downloader.add(
        DownloadTarget::new("optional", &bad_server.url("/b"), dir.path().join("b"))
            .unwrap()
            .with_ignore_failure(),
    );

    let outcomes = downloader.download().await.unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn interrupt_stops_the_driver() {
    let server = ScriptedServer::spawn(vec![ScriptedResponse::new(200).with_body(b"x")]);
    let dir = tempfile::tempdir().unwrap();

    let interrupt = InterruptFlag::new();
    interrupt.interrupt();

    let mut downloader =
        MultiDownloader::new(client(), fast_retry_options()).with_interrupt(interrupt);
    downloader.add(
        DownloadTarget::new("artifact", &server.url("/a"), dir.path().join("a")).unwrap(),
    );

    let error = downloader.download().await.unwrap_err();
    assert!(
        matches!(error.errors[0], DownloadError::Interrupted),
        "{:?}",
        error.errors[0]
    );
}

#[tokio::test]
async fn repodata_cache_writes_and_revalidates() {
    let body = br#"{"info": {"subdir": "linux-64"}, "packages": {}}"#;
    let server = ScriptedServer::spawn(vec![
        ScriptedResponse::new(200)
            .with_body(body)
            .with_header("etag", "\"v1\""),
        ScriptedResponse::new(304),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let url: url::Url = server.url("/conda-forge/linux-64/repodata.json").parse().unwrap();

    // First fetch populates the cache and the sidecar.
    let fetched = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();
    assert_eq!(fetched.cache_result, CacheResult::CacheNotPresent);
    assert_eq!(fetched.state.etag.as_deref(), Some("\"v1\""));
    assert_eq!(std::fs::read(&fetched.path).unwrap(), body);

    // Second fetch revalidates with If-None-Match and keeps the body.
    let revalidated = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();
    assert_eq!(revalidated.cache_result, CacheResult::CacheHitAfterFetch);
    assert_eq!(std::fs::read(&revalidated.path).unwrap(), body);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn fresh_cache_needs_no_network_round_trip() {
    let body = br#"{"info": {"subdir": "linux-64"}, "packages": {}}"#;
    let server = ScriptedServer::spawn(vec![ScriptedResponse::new(200)
        .with_body(body)
        .with_header("cache-control", "public, max-age=300")]);
    let cache_dir = tempfile::tempdir().unwrap();
    let url: url::Url = server.url("/conda-forge/linux-64/repodata.json").parse().unwrap();

    let first = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();
    assert_eq!(first.cache_result, CacheResult::CacheNotPresent);
    assert_eq!(
        first.state.cache_control.as_deref(),
        Some("public, max-age=300")
    );

    // Within max-age the cached body is served without contacting the
    // server at all.
    let second = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();
    assert_eq!(second.cache_result, CacheResult::CacheHit);
    assert_eq!(std::fs::read(&second.path).unwrap(), body);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn corrupt_cache_is_purged_and_refetched_once() {
    let body = br#"{"info": {"subdir": "noarch"}, "packages": {}}"#;
    let server = ScriptedServer::spawn(vec![
        ScriptedResponse::new(200).with_body(body),
        ScriptedResponse::new(200).with_body(body),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let url: url::Url = server.url("/conda-forge/noarch/repodata.json").parse().unwrap();

    let first = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();

    // Scribble over the sidecar: the next fetch must recover by
    // purging and fetching from scratch.
    let key = taipan_fetch::cache_key(&url);
    std::fs::write(
        cache_dir.path().join(format!("{key}.info.json")),
        b"not json at all",
    )
    .unwrap();

    let second = fetch_repodata(&client(), &url, cache_dir.path(), &fast_retry_options())
        .await
        .unwrap();
    assert_eq!(second.cache_result, CacheResult::CacheNotPresent);
    assert_eq!(std::fs::read(&second.path).unwrap(), body);
    drop(first);
}
