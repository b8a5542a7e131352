//! The repodata cache: the HTTP response on disk plus a sidecar with
//! the state needed for conditional requests.
//!
//! The response lives at `<cache_dir>/<key>.json`, the sidecar at
//! `<cache_dir>/<key>.info.json`. `key` is the first 8 hex characters
//! of the SHA-256 of the URL.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use cache_control::{Cachability, CacheControl};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use taipan_digest::{compute_bytes_digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::{
    downloader::{download_one_standalone, DownloadOptions},
    error::DownloadError,
    target::DownloadTarget,
};

/// The sidecar written next to a cached repodata response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheState {
    /// The URL the response came from.
    pub url: Url,

    /// The `ETag` of the response, sent back as `If-None-Match`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// The `Last-Modified` of the response, sent back as
    /// `If-Modified-Since`.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mod")]
    pub last_modified: Option<String>,

    /// The `Cache-Control` of the response. While its `max-age` has not
    /// elapsed the cached body is served without any server contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,

    /// The size of the cached response body.
    pub size: u64,

    /// The mtime of the cached file in seconds since the epoch, to
    /// detect out-of-band modification.
    pub mtime: i64,
}

impl CacheState {
    /// Reads the sidecar from disk.
    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Writes the sidecar to disk.
    pub fn to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

/// The cache key of a URL: the first 8 hex characters of its SHA-256.
pub fn cache_key(url: &Url) -> String {
    let digest = compute_bytes_digest::<Sha256>(url.as_str());
    let mut hex = format!("{digest:x}");
    hex.truncate(8);
    hex
}

/// How the cache participated in a fetch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheResult {
    /// The cached data was still fresh; the server was not contacted at
    /// all.
    CacheHit,
    /// The server confirmed the cached data is still current.
    CacheHitAfterFetch,
    /// There was a cache entry but it was stale; new data was fetched.
    CacheOutdated,
    /// There was no usable cache entry.
    CacheNotPresent,
}

/// A fetched (or revalidated) repodata document.
#[derive(Debug)]
pub struct CachedRepodata {
    /// The path of the response body on disk.
    pub path: PathBuf,

    /// The sidecar state after this fetch.
    pub state: CacheState,

    /// How the cache was used.
    pub cache_result: CacheResult,
}

fn mtime_seconds(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|mtime| {
            mtime
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .ok()
        })
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn now_epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

/// Returns true when the cached response may still be served without
/// contacting the server: its `Cache-Control` declares a public
/// cachability with a `max-age` that has not elapsed since the body was
/// written.
fn cache_is_fresh(state: &CacheState) -> bool {
    let Some(value) = state.cache_control.as_deref() else {
        return false;
    };
    match CacheControl::from_value(value) {
        Some(CacheControl {
            cachability: Some(Cachability::Public),
            max_age: Some(max_age),
            ..
        }) => {
            let age = now_epoch_seconds().saturating_sub(state.mtime);
            u64::try_from(age).is_ok_and(|age| Duration::from_secs(age) <= max_age)
        }
        // `no-cache`, missing max-age and friends all mean the server
        // must be asked.
        _ => false,
    }
}

/// Validates the cached state of a URL. A missing cache is `Ok(None)`;
/// a corrupt one is an error the caller recovers from by purging.
fn validate_cache(
    cache_dir: &Path,
    url: &Url,
    body_path: &Path,
    state_path: &Path,
) -> Result<Option<CacheState>, DownloadError> {
    let metadata = match std::fs::metadata(body_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DownloadError::Cache {
                path: body_path.to_path_buf(),
                reason: format!("cannot stat cached file: {e}"),
            })
        }
        Ok(metadata) => metadata,
    };

    let state = match CacheState::from_path(state_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no cache sidecar in {}", cache_dir.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(DownloadError::Cache {
                path: state_path.to_path_buf(),
                reason: format!("malformed sidecar: {e}"),
            })
        }
        Ok(state) => state,
    };

    if &state.url != url {
        return Err(DownloadError::Cache {
            path: state_path.to_path_buf(),
            reason: "sidecar refers to a different url".to_owned(),
        });
    }

    if metadata.len() != state.size || mtime_seconds(&metadata) != state.mtime {
        return Err(DownloadError::Cache {
            path: body_path.to_path_buf(),
            reason: "cached file was modified behind the cache's back".to_owned(),
        });
    }

    Ok(Some(state))
}

fn purge_cache(body_path: &Path, state_path: &Path) {
    let _ = std::fs::remove_file(body_path);
    let _ = std::fs::remove_file(state_path);
}

/// Fetches a repodata document through the cache.
///
/// A cache entry whose `Cache-Control` `max-age` has not elapsed is
/// served directly, without any network round trip. Otherwise, the
/// entry's `etag`/`mod` are sent as conditional headers and a `304`
/// keeps the cached body. A corrupt cache entry (including a `304`
/// against a sidecar without `etag` and `mod`) is deleted and the fetch
/// retried exactly once, unconditional.
pub async fn fetch_repodata(
    client: &ClientWithMiddleware,
    url: &Url,
    cache_dir: &Path,
    options: &DownloadOptions,
) -> Result<CachedRepodata, DownloadError> {
    tokio::fs::create_dir_all(cache_dir)
        .await
        .map_err(|source| DownloadError::Io {
            name: url.to_string(),
            source,
        })?;

    match fetch_repodata_inner(client, url, cache_dir, options).await {
        Ok(result) => Ok(result),
        Err(DownloadError::Cache { reason, .. }) => {
            // Local recovery: drop the offending entry and fetch once
            // more from scratch.
            warn!("purging corrupt repodata cache ({reason})");
            let key = cache_key(url);
            purge_cache(
                &cache_dir.join(format!("{key}.json")),
                &cache_dir.join(format!("{key}.info.json")),
            );
            fetch_repodata_inner(client, url, cache_dir, options).await
        }
        Err(e) => Err(e),
    }
}

async fn fetch_repodata_inner(
    client: &ClientWithMiddleware,
    url: &Url,
    cache_dir: &Path,
    options: &DownloadOptions,
) -> Result<CachedRepodata, DownloadError> {
    let key = cache_key(url);
    let body_path = cache_dir.join(format!("{key}.json"));
    let state_path = cache_dir.join(format!("{key}.info.json"));

    let cached_state = validate_cache(cache_dir, url, &body_path, &state_path)?;

    // Freshness first: within max-age the server is not contacted at
    // all.
    if let Some(state) = &cached_state {
        if cache_is_fresh(state) {
            debug!("repodata cache entry {key} is still fresh");
            return Ok(CachedRepodata {
                path: body_path,
                state: state.clone(),
                cache_result: CacheResult::CacheHit,
            });
        }
    }

    let had_cache = cached_state.is_some();
    let (etag, last_modified) = cached_state
        .as_ref()
        .map(|state| (state.etag.clone(), state.last_modified.clone()))
        .unwrap_or_default();

    let target = DownloadTarget::new(key.clone(), url.as_str(), body_path.clone())?
        .with_conditional(etag.clone(), last_modified.clone());

    let outcome = download_one_standalone(client, target, options).await?;

    if outcome.not_modified {
        // A 304 can only be answered to a conditional request; if we
        // did not actually have conditional state, the cache entry is
        // unusable.
        if etag.is_none() && last_modified.is_none() {
            return Err(DownloadError::Cache {
                path: state_path,
                reason: "server answered 304 but the sidecar has no etag or mod".to_owned(),
            });
        }
        let mut state = cached_state.expect("a conditional request implies a cache entry");
        // A revalidation may come with new freshness instructions.
        if outcome.cache_control.is_some() && outcome.cache_control != state.cache_control {
            state.cache_control = outcome.cache_control.clone();
            state
                .to_path(&state_path)
                .map_err(|source| DownloadError::Io {
                    name: key.clone(),
                    source,
                })?;
        }
        return Ok(CachedRepodata {
            path: body_path,
            state,
            cache_result: CacheResult::CacheHitAfterFetch,
        });
    }

    let metadata =
        std::fs::metadata(&outcome.path).map_err(|source| DownloadError::Io {
            name: key.clone(),
            source,
        })?;
    let state = CacheState {
        url: url.clone(),
        etag: outcome.etag.clone(),
        last_modified: outcome.last_modified.clone(),
        cache_control: outcome.cache_control.clone(),
        size: metadata.len(),
        mtime: mtime_seconds(&metadata),
    };
    state
        .to_path(&state_path)
        .map_err(|source| DownloadError::Io {
            name: key,
            source,
        })?;

    Ok(CachedRepodata {
        path: outcome.path,
        state,
        cache_result: if had_cache {
            CacheResult::CacheOutdated
        } else {
            CacheResult::CacheNotPresent
        },
    })
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{cache_is_fresh, cache_key, now_epoch_seconds, CacheState};

    fn state(cache_control: Option<&str>, age_secs: i64) -> CacheState {
        CacheState {
            url: Url::parse("https://repo.example.com/noarch/repodata.json").unwrap(),
            etag: None,
            last_modified: None,
            cache_control: cache_control.map(str::to_owned),
            size: 0,
            mtime: now_epoch_seconds() - age_secs,
        }
    }

    #[test]
    fn freshness_follows_max_age() {
        assert!(cache_is_fresh(&state(Some("public, max-age=300"), 10)));
        assert!(!cache_is_fresh(&state(Some("public, max-age=300"), 600)));
        // Without a usable cache-control the server must be asked.
        assert!(!cache_is_fresh(&state(None, 0)));
        assert!(!cache_is_fresh(&state(Some("no-cache"), 0)));
        assert!(!cache_is_fresh(&state(Some("public"), 0)));
        assert!(!cache_is_fresh(&state(Some("private, max-age=300"), 0)));
    }

    #[test]
    fn cache_key_is_first_8_hex_of_sha256() {
        let url = Url::parse("https://repo.example.com/conda-forge/linux-64/repodata.json")
            .unwrap();
        let key = cache_key(&url);
        assert_eq!(key.len(), 8);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls.
        assert_eq!(key, cache_key(&url));

        let other =
            Url::parse("https://repo.example.com/conda-forge/noarch/repodata.json").unwrap();
        assert_ne!(key, cache_key(&other));
    }
}
