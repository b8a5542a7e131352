#![deny(missing_docs)]

//! `taipan_fetch` is the concurrent download engine of the taipan
//! package manager: bounded multi-transfer downloads with per-target
//! retry policies, conditional requests against the repodata cache,
//! streaming decompression, integrity verification and an OCI registry
//! adapter.

mod cache;
mod downloader;
mod encoding;
mod error;
mod interrupt;
mod oci;
mod reporter;
mod retry;
mod ssl;
mod target;

pub use cache::{cache_key, fetch_repodata, CacheResult, CacheState, CachedRepodata};
pub use downloader::{DownloadOptions, LowSpeedLimit, MultiDownloader};
pub use encoding::{AsyncEncoding, Encoding};
pub use error::{DownloadError, MultiDownloadError, TransportCode};
pub use interrupt::InterruptFlag;
pub use oci::OciMiddleware;
pub use reporter::{NullProgress, ProgressSink};
pub use retry::{parse_retry_after, RetryPolicy};
pub use ssl::{SslBackend, SslConfig};
pub use target::{DownloadOutcome, DownloadTarget, FinalizeCallback};

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

/// Builds the HTTP client the engine uses: connect timeout, resolved
/// SSL configuration and the OCI adapter.
pub fn build_client(connect_timeout_secs: u64) -> ClientWithMiddleware {
    let ssl = SslConfig::init(None);
    let builder = ssl.apply(
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(connect_timeout_secs)),
    );
    let client = builder.build().expect("the client configuration is valid");
    ClientBuilder::new(client).with(OciMiddleware::default()).build()
}
