//! The multi-transfer download driver.
//!
//! Many concurrent transfers share one driver task; per-transfer work
//! is cooperative and the only suspension point of the driver is its
//! bounded wait for the next completion. Finalize callbacks run
//! serially on the driver, never inside transfer internals.

use std::{cmp::Reverse, sync::Arc, time::Duration};

use futures::{stream::FuturesUnordered, StreamExt};
use reqwest::{header, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Semaphore,
    time::Instant,
};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument, warn};
use url::Url;

use taipan_conda_types::url_utils::log_safe_str;
use taipan_digest::{HashingWriter, Md5, Sha256};

use crate::{
    encoding::{AsyncEncoding, Encoding},
    error::{DownloadError, MultiDownloadError, TransportCode},
    interrupt::InterruptFlag,
    retry::{parse_retry_after, RetryPolicy},
    target::{DownloadOutcome, DownloadTarget, FinalizeCallback},
};

/// The low-speed cutoff: a transfer slower than `bytes_per_second` for
/// a whole `window_secs` is aborted.
#[derive(Debug, Clone, Copy)]
pub struct LowSpeedLimit {
    /// The minimum acceptable speed.
    pub bytes_per_second: u64,
    /// Over how many seconds the speed must stay below the limit.
    pub window_secs: u64,
}

impl Default for LowSpeedLimit {
    fn default() -> Self {
        Self {
            bytes_per_second: 30,
            window_secs: 60,
        }
    }
}

/// The knobs of a multi-transfer download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// The size of the transfer pool.
    pub max_parallel_downloads: usize,

    /// Issue transfers in order of decreasing expected size.
    pub sort_by_size: bool,

    /// Abort everything on the first (non-ignored) failure.
    pub fail_fast: bool,

    /// The retry policy applied per target.
    pub retry: RetryPolicy,

    /// The low-speed cutoff, or `None` when disabled (also disabled by
    /// a truthy `MAMBA_NO_LOW_SPEED_LIMIT`).
    pub low_speed_limit: Option<LowSpeedLimit>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        let low_speed_disabled = std::env::var("MAMBA_NO_LOW_SPEED_LIMIT")
            .map(|value| is_truthy(&value))
            .unwrap_or(false);
        Self {
            max_parallel_downloads: 5,
            sort_by_size: false,
            fail_fast: false,
            retry: RetryPolicy::default(),
            low_speed_limit: (!low_speed_disabled).then(LowSpeedLimit::default),
        }
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// A bounded pool of concurrent transfers.
pub struct MultiDownloader {
    client: ClientWithMiddleware,
    options: DownloadOptions,
    interrupt: InterruptFlag,
    targets: Vec<DownloadTarget>,
}

impl MultiDownloader {
    /// Creates a downloader over the given client.
    pub fn new(client: ClientWithMiddleware, options: DownloadOptions) -> Self {
        Self {
            client,
            options,
            interrupt: InterruptFlag::new(),
            targets: Vec::new(),
        }
    }

    /// Uses the given interrupt flag instead of a private one.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Queues a target. Targets added before [`MultiDownloader::download`]
    /// may be issued in any order.
    pub fn add(&mut self, target: DownloadTarget) {
        self.targets.push(target);
    }

    /// Runs all queued transfers to completion.
    ///
    /// Failures of `ignore_failure` targets are logged and skipped; any
    /// other failures are collected and returned together, alongside
    /// the transfers that did complete.
    #[instrument(skip_all, fields(transfers = self.targets.len()))]
    pub async fn download(&mut self) -> Result<Vec<DownloadOutcome>, MultiDownloadError> {
        let mut targets = std::mem::take(&mut self.targets);
        let total = targets.len();
        if self.options.sort_by_size {
            targets.sort_by_key(|t| Reverse(t.expected_size.unwrap_or(0)));
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel_downloads.max(1)));
        let mut transfers = FuturesUnordered::new();
        for mut target in targets {
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            let options = self.options.clone();
            let finalize = target.finalize.take();
            let ignore_failure = target.ignore_failure;
            transfers.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("the semaphore is never closed");
                let result = download_one(&client, &target, &options).await;
                (result, finalize, ignore_failure)
            });
        }

        let mut outcomes = Vec::new();
        let mut errors = Vec::new();

        loop {
            if self.interrupt.is_interrupted() {
                // Dropping the in-flight transfers tears them down;
                // their partial files are temp files and disappear with
                // them.
                drop(transfers);
                return Err(MultiDownloadError {
                    total,
                    completed: outcomes,
                    errors: vec![DownloadError::Interrupted],
                });
            }

            // The driver's only suspension point: wait for the next
            // completion, bounded so the interrupt flag is observed at
            // least once a second.
            let next = tokio::time::timeout(Duration::from_millis(1000), transfers.next()).await;
            let (result, finalize, ignore_failure) = match next {
                Err(_elapsed) => continue,
                Ok(None) => break,
                Ok(Some(completion)) => completion,
            };

            match result {
                Ok(outcome) => {
                    // Finalize callbacks run serially on the driver.
                    let finalized = match finalize {
                        Some(callback) => {
                            callback(&outcome).map_err(|reason| DownloadError::Finalize {
                                name: outcome.name.clone(),
                                reason,
                            })
                        }
                        None => Ok(()),
                    };
                    match finalized {
                        Ok(()) => outcomes.push(outcome),
                        Err(error) if ignore_failure => {
                            warn!("ignoring failure: {error}");
                        }
                        Err(error) => {
                            errors.push(error);
                            if self.options.fail_fast {
                                break;
                            }
                        }
                    }
                }
                Err(error) if ignore_failure => {
                    warn!("ignoring failure: {error}");
                }
                Err(error) => {
                    errors.push(error);
                    if self.options.fail_fast {
                        break;
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(outcomes)
        } else {
            Err(MultiDownloadError {
                total,
                completed: outcomes,
                errors,
            })
        }
    }
}

/// Runs a single target outside a pool; the cache layer uses this for
/// repodata fetches.
pub(crate) async fn download_one_standalone(
    client: &ClientWithMiddleware,
    target: DownloadTarget,
    options: &DownloadOptions,
) -> Result<DownloadOutcome, DownloadError> {
    download_one(client, &target, options).await
}

/// The error of one attempt, before the retry decision.
struct AttemptError {
    transport_code: TransportCode,
    http_status: Option<u16>,
    retry_after: Option<Duration>,
    message: String,
}

impl AttemptError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        Self {
            transport_code: TransportCode::from_reqwest(&error),
            http_status: error.status().map(|s| s.as_u16()),
            retry_after: None,
            // Dropping the url keeps credentials out of the message.
            message: error.without_url().to_string(),
        }
    }
}

/// Transfers a single target, retrying per the policy.
async fn download_one(
    client: &ClientWithMiddleware,
    target: &DownloadTarget,
    options: &DownloadOptions,
) -> Result<DownloadOutcome, DownloadError> {
    if target.url.scheme() == "file" {
        return download_from_file(target).await;
    }

    let mut retries_used = 0;
    loop {
        match attempt(client, target, options).await {
            Ok(AttemptOutcome::Complete(mut outcome)) => {
                outcome.retries_used = retries_used;
                if let Some(progress) = &target.progress {
                    progress.mark_completed();
                }
                return Ok(outcome);
            }
            Ok(AttemptOutcome::Failed(error)) => {
                // Integrity and local failures bypass the retry logic.
                if let Some(progress) = &target.progress {
                    progress.mark_completed();
                }
                return Err(error);
            }
            Err(attempt_error) => {
                if options.retry.should_retry(
                    attempt_error.transport_code,
                    attempt_error.http_status,
                    target.url.scheme(),
                    retries_used,
                ) {
                    let wait = options
                        .retry
                        .wait_duration(retries_used, attempt_error.retry_after);
                    debug!(
                        "retrying {} in {:.1}s ({})",
                        target.name,
                        wait.as_secs_f64(),
                        attempt_error.message
                    );
                    if let Some(progress) = &target.progress {
                        progress.set_postfix(&format!(
                            "retrying in {:.0}s",
                            wait.as_secs_f64()
                        ));
                    }
                    tokio::time::sleep(wait).await;
                    retries_used += 1;
                    continue;
                }

                if let Some(progress) = &target.progress {
                    progress.mark_completed();
                }
                return Err(DownloadError::Fetch {
                    name: target.name.clone(),
                    http_status: attempt_error.http_status,
                    transport_code: attempt_error.transport_code,
                    message: attempt_error.message,
                });
            }
        }
    }
}

/// A finished attempt: either an outcome or a terminal failure that
/// must not be retried.
enum AttemptOutcome {
    Complete(DownloadOutcome),
    Failed(DownloadError),
}

async fn attempt(
    client: &ClientWithMiddleware,
    target: &DownloadTarget,
    options: &DownloadOptions,
) -> Result<AttemptOutcome, AttemptError> {
    let mut request = client.get(target.url.clone());

    // Plain .json documents may come back in any server-side
    // compression; the decoder below sorts it out.
    if target.url.path().ends_with(".json") {
        request = request.header(header::ACCEPT_ENCODING, "gzip, bzip2, zstd");
    }
    if let Some(etag) = &target.etag {
        request = request.header(header::IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = &target.last_modified {
        request = request.header(header::IF_MODIFIED_SINCE, last_modified);
    }

    let response = request.send().await.map_err(|error| match error {
        reqwest_middleware::Error::Reqwest(error) => AttemptError::from_reqwest(error),
        reqwest_middleware::Error::Middleware(error) => AttemptError {
            transport_code: TransportCode::SendError,
            http_status: None,
            retry_after: None,
            message: error.to_string(),
        },
    })?;

    let status = response.status();
    let etag = header_string(&response, header::ETAG);
    let last_modified = header_string(&response, header::LAST_MODIFIED);
    let cache_control = header_string(&response, header::CACHE_CONTROL);

    if status == StatusCode::NOT_MODIFIED {
        // The cached artifact stays in place and the transfer counts as
        // a success.
        debug!("{} was not modified", log_safe_str(&target.url));
        return Ok(AttemptOutcome::Complete(DownloadOutcome {
            name: target.name.clone(),
            path: target.destination.clone(),
            http_status: Some(status.as_u16()),
            not_modified: true,
            bytes_transferred: 0,
            retries_used: 0,
            etag,
            last_modified,
            cache_control,
        }));
    }

    if !status.is_success() {
        let retry_after = header_string(&response, header::RETRY_AFTER)
            .as_deref()
            .and_then(parse_retry_after);
        return Err(AttemptError {
            transport_code: TransportCode::HttpReturnedError,
            http_status: Some(status.as_u16()),
            retry_after,
            message: format!("{} answered {status}", log_safe_str(&target.url)),
        });
    }

    match stream_to_destination(response, target, options).await {
        Ok((path, bytes_transferred)) => Ok(AttemptOutcome::Complete(DownloadOutcome {
            name: target.name.clone(),
            path,
            http_status: Some(status.as_u16()),
            not_modified: false,
            bytes_transferred,
            retries_used: 0,
            etag,
            last_modified,
            cache_control,
        })),
        Err(StreamError::Terminal(error)) => Ok(AttemptOutcome::Failed(error)),
        Err(StreamError::Transport(error)) => Err(error),
    }
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

enum StreamError {
    /// Not retryable: integrity or local I/O.
    Terminal(DownloadError),
    /// Possibly retryable transport trouble.
    Transport(AttemptError),
}

/// Streams the response body through the decoders into a temporary
/// file, hashing on the fly, and persists it to the destination.
async fn stream_to_destination(
    response: reqwest::Response,
    target: &DownloadTarget,
    options: &DownloadOptions,
) -> Result<(std::path::PathBuf, u64), StreamError> {
    let io_error = |source: std::io::Error| {
        StreamError::Terminal(DownloadError::Io {
            name: target.name.clone(),
            source,
        })
    };

    // Compressed repodata variants are decoded in-flight and written
    // under the stripped filename.
    let content_encoding = Encoding::from_url_path(target.url.path());
    let destination = match (content_encoding, target.destination.file_name()) {
        (Encoding::Zst | Encoding::Bz2, Some(file_name)) => {
            let stripped = content_encoding.strip_suffix(&file_name.to_string_lossy()).to_owned();
            target.destination.with_file_name(stripped)
        }
        _ => target.destination.clone(),
    };
    let transfer_encoding = Encoding::from_content_encoding(
        response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );

    let announced_size = response.content_length();
    if let Some(progress) = &target.progress {
        progress.update(0, announced_size);
    }

    let parent = destination
        .parent()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let temp_file = NamedTempFile::new_in(&parent).map_err(io_error)?;
    let file = tokio::fs::File::from_std(
        temp_file.as_file().try_clone().map_err(io_error)?,
    );

    // Hash while writing so the integrity check needs no second pass.
    let mut writer = HashingWriter::<_, Sha256>::new(HashingWriter::<_, Md5>::new(file));

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let transfer_decoded =
        tokio::io::BufReader::new(StreamReader::new(stream)).decode(transfer_encoding);
    let mut reader = tokio::io::BufReader::new(transfer_decoded).decode(content_encoding);

    let mut bytes_written: u64 = 0;
    let mut window_start = Instant::now();
    let mut bytes_in_window: u64 = 0;
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(source) => {
                return Err(StreamError::Transport(AttemptError {
                    transport_code: TransportCode::RecvError,
                    http_status: None,
                    retry_after: None,
                    message: format!("read failed: {source}"),
                }))
            }
        };
        writer.write_all(&buffer[..read]).await.map_err(io_error)?;

        bytes_written += read as u64;
        bytes_in_window += read as u64;
        if let Some(progress) = &target.progress {
            progress.update(bytes_written, announced_size);
        }

        // The low-speed cutoff: consistently below the limit for a
        // whole window aborts the transfer. The abort is deliberate, so
        // it is not retryable.
        if let Some(limit) = options.low_speed_limit {
            let elapsed = window_start.elapsed();
            if elapsed.as_secs() >= limit.window_secs {
                let speed = bytes_in_window / elapsed.as_secs().max(1);
                if let Some(progress) = &target.progress {
                    progress.set_speed(speed);
                }
                if speed < limit.bytes_per_second {
                    return Err(StreamError::Transport(AttemptError {
                        transport_code: TransportCode::OperationTimedout,
                        http_status: None,
                        retry_after: None,
                        message: format!("transfer slower than {} B/s", limit.bytes_per_second),
                    }));
                }
                window_start = Instant::now();
                bytes_in_window = 0;
            }
        }
    }
    writer.flush().await.map_err(io_error)?;

    let (inner, sha256_digest) = writer.finalize();
    let (_, md5_digest) = inner.finalize();

    // Integrity: the size and digests must match what the index
    // promised. Mismatches are terminal.
    if let Some(expected) = target.expected_size {
        let actual = tokio::fs::metadata(temp_file.path())
            .await
            .map_err(io_error)?
            .len();
        if actual != expected {
            return Err(StreamError::Terminal(DownloadError::Integrity {
                name: target.name.clone(),
                expected: format!("{expected} bytes"),
                actual: format!("{actual} bytes"),
            }));
        }
    }
    if let Some(expected) = &target.expected_sha256 {
        if &sha256_digest != expected {
            return Err(StreamError::Terminal(DownloadError::Integrity {
                name: target.name.clone(),
                expected: format!("{expected:x}"),
                actual: format!("{sha256_digest:x}"),
            }));
        }
    }
    if let Some(expected) = &target.expected_md5 {
        if &md5_digest != expected {
            return Err(StreamError::Terminal(DownloadError::Integrity {
                name: target.name.clone(),
                expected: format!("{expected:x}"),
                actual: format!("{md5_digest:x}"),
            }));
        }
    }

    temp_file
        .persist(&destination)
        .map_err(|e| io_error(e.error))?;

    Ok((destination, bytes_written))
}

/// Transfers from a `file://` URL: a plain copy with the same integrity
/// checks and no retries.
async fn download_from_file(target: &DownloadTarget) -> Result<DownloadOutcome, DownloadError> {
    let io_error = |source: std::io::Error| DownloadError::Io {
        name: target.name.clone(),
        source,
    };

    let source_path = taipan_conda_types::url_utils::url_to_path(&normalized_file_url(
        &target.url,
    ))
    .ok_or_else(|| DownloadError::Fetch {
        name: target.name.clone(),
        http_status: None,
        transport_code: TransportCode::SendError,
        message: format!("not a usable file url: {}", log_safe_str(&target.url)),
    })?;

    tokio::fs::copy(&source_path, &target.destination)
        .await
        .map_err(io_error)?;

    if let Some(expected) = &target.expected_sha256 {
        let actual = taipan_digest::compute_file_digest::<Sha256>(&target.destination)
            .map_err(io_error)?;
        if &actual != expected {
            return Err(DownloadError::Integrity {
                name: target.name.clone(),
                expected: format!("{expected:x}"),
                actual: format!("{actual:x}"),
            });
        }
    }
    if let Some(expected) = &target.expected_md5 {
        let actual = taipan_digest::compute_file_digest::<Md5>(&target.destination)
            .map_err(io_error)?;
        if &actual != expected {
            return Err(DownloadError::Integrity {
                name: target.name.clone(),
                expected: format!("{expected:x}"),
                actual: format!("{actual:x}"),
            });
        }
    }

    if let Some(progress) = &target.progress {
        progress.mark_completed();
    }

    Ok(DownloadOutcome {
        name: target.name.clone(),
        path: target.destination.clone(),
        http_status: None,
        not_modified: false,
        bytes_transferred: 0,
        retries_used: 0,
        etag: None,
        last_modified: None,
        cache_control: None,
    })
}

/// Turns the four-slash UNC transport form back into the parseable
/// two-slash form before extracting the path.
fn normalized_file_url(url: &Url) -> Url {
    let text = taipan_conda_types::url_utils::file_uri_unc4_to_unc2(url.as_str()).into_owned();
    Url::parse(&text).unwrap_or_else(|_| url.clone())
}
