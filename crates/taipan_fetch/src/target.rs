//! A single download target and the outcome of transferring it.

use std::{path::PathBuf, sync::Arc};

use taipan_conda_types::url_utils::file_uri_unc2_to_unc4;
use taipan_digest::{Md5Hash, Sha256Hash};
use url::Url;

use crate::{error::DownloadError, reporter::ProgressSink};

/// The callback invoked on the driver task once a transfer finished
/// successfully (including `304 Not Modified` cache hits).
pub type FinalizeCallback = Box<dyn FnOnce(&DownloadOutcome) -> Result<(), String> + Send>;

/// Everything that defines one transfer.
pub struct DownloadTarget {
    pub(crate) name: String,
    pub(crate) url: Url,
    pub(crate) destination: PathBuf,
    pub(crate) expected_size: Option<u64>,
    pub(crate) expected_sha256: Option<Sha256Hash>,
    pub(crate) expected_md5: Option<Md5Hash>,
    pub(crate) etag: Option<String>,
    pub(crate) last_modified: Option<String>,
    pub(crate) ignore_failure: bool,
    pub(crate) progress: Option<Arc<dyn ProgressSink>>,
    pub(crate) finalize: Option<FinalizeCallback>,
}

impl DownloadTarget {
    /// Creates a target. The URL is normalized on construction: UNC
    /// file URLs take their four-slash transport form.
    pub fn new(
        name: impl Into<String>,
        url: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, DownloadError> {
        let name = name.into();
        let normalized = file_uri_unc2_to_unc4(url);
        let url = Url::parse(&normalized).map_err(|e| DownloadError::Fetch {
            name: name.clone(),
            http_status: None,
            transport_code: crate::error::TransportCode::SendError,
            message: format!("invalid url: {e}"),
        })?;
        Ok(Self {
            name,
            url,
            destination: destination.into(),
            expected_size: None,
            expected_sha256: None,
            expected_md5: None,
            etag: None,
            last_modified: None,
            ignore_failure: false,
            progress: None,
            finalize: None,
        })
    }

    /// The size the artifact is expected to have.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// The SHA256 digest the artifact must have.
    pub fn with_expected_sha256(mut self, digest: Sha256Hash) -> Self {
        self.expected_sha256 = Some(digest);
        self
    }

    /// The MD5 digest the artifact must have.
    pub fn with_expected_md5(mut self, digest: Md5Hash) -> Self {
        self.expected_md5 = Some(digest);
        self
    }

    /// The conditional request inputs from a previous response: the
    /// `ETag` for `If-None-Match` and the modification date for
    /// `If-Modified-Since`.
    pub fn with_conditional(
        mut self,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    /// A failure of this target does not fail the whole download.
    pub fn with_ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    /// The progress sink this transfer reports to.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// A callback to run on the driver task after the transfer
    /// succeeded. Returning an error fails the target.
    pub fn with_finalize(
        mut self,
        callback: impl FnOnce(&DownloadOutcome) -> Result<(), String> + Send + 'static,
    ) -> Self {
        self.finalize = Some(Box::new(callback));
        self
    }

    /// The name of the target.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The (normalized) URL of the target.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// The result of one successful transfer.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// The name of the target.
    pub name: String,

    /// The path the artifact was written to (or, for a cache hit, where
    /// the cached artifact lives).
    pub path: PathBuf,

    /// The final HTTP status.
    pub http_status: Option<u16>,

    /// True when the server answered `304 Not Modified` and the cached
    /// artifact was reused.
    pub not_modified: bool,

    /// The number of body bytes that went over the wire.
    pub bytes_transferred: u64,

    /// How many retries the transfer needed.
    pub retries_used: u32,

    /// The `ETag` of the response, for the caller's cache sidecar.
    pub etag: Option<String>,

    /// The `Last-Modified` of the response, for the caller's cache
    /// sidecar.
    pub last_modified: Option<String>,

    /// The `Cache-Control` of the response; the caller's cache layer
    /// uses it to serve future requests without contacting the server.
    pub cache_control: Option<String>,
}
