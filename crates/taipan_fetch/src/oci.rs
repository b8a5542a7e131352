//! The OCI registry adapter: maps the conda channel layout onto
//! registry coordinates, negotiates the pull token, and rewrites the
//! request to the blob that carries the artifact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use http::{
    header::{ACCEPT, AUTHORIZATION},
    Extensions,
};
use reqwest::{Request, Response};
use reqwest_middleware::{Error, Middleware, Next, Result};
use serde::Deserialize;
use taipan_conda_types::{ArchiveIdentifier, ArchiveType};
use tracing::debug;
use url::Url;

/// Handles `oci://` URLs on a client; any other scheme passes through
/// untouched.
#[derive(Default, Debug, Clone)]
pub struct OciMiddleware {
    token_cache: Arc<Mutex<HashMap<Url, String>>>,
}

/// Where an artifact lives inside a registry: the image, the reference
/// (tag) to resolve, and the media type of the layer that carries the
/// bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
struct RegistryCoordinates {
    image: Url,
    reference: String,
    media_type: &'static str,
}

impl RegistryCoordinates {
    /// Maps a conda-layout URL (`oci://host/channel/subdir/<file>`)
    /// onto registry coordinates.
    ///
    /// A package archive becomes a `<subdir>/<name>` image whose tag is
    /// `<version>-<build>`; a repodata file becomes a `repodata.json`
    /// image tagged `latest`, with the compression variant encoded in
    /// the media type. Registry image names may not start with `_`, so
    /// a leading underscore gains a `zzz` prefix.
    fn from_conda_url(url: &Url) -> RegistryCoordinates {
        let filename = url.path().rsplit('/').next().unwrap_or_default().to_owned();

        let (image_name, reference, media_type) =
            if let Some(archive) = ArchiveIdentifier::try_from_filename(&filename) {
                let media_type = match archive.archive_type {
                    ArchiveType::Conda => "application/vnd.conda.package.v2",
                    ArchiveType::TarBz2 => "application/vnd.conda.package.v1",
                };
                let reference =
                    escape_reference(&format!("{}-{}", archive.version, archive.build_string));
                (archive.name, reference, media_type)
            } else if filename.starts_with("repodata.json") {
                (
                    "repodata.json".to_owned(),
                    "latest".to_owned(),
                    repodata_media_type(&filename),
                )
            } else {
                (filename.clone(), "latest".to_owned(), "")
            };

        let image_name = match image_name.strip_prefix('_') {
            Some(trimmed) => format!("zzz_{trimmed}"),
            None => image_name,
        };

        RegistryCoordinates {
            image: url.join(&image_name).unwrap_or_else(|_| url.clone()),
            reference,
            media_type,
        }
    }

    /// The `https://<host>/v2<image-path>/<resource>` endpoint of the
    /// registry API.
    fn registry_endpoint(&self, resource: &str) -> String {
        format!(
            "https://{}/v2{}/{resource}",
            self.image.host_str().unwrap_or_default(),
            self.image.path()
        )
    }
}

/// OCI tags may not contain `+`, `!` or `=`; the characters a
/// version-build pair can carry are escaped one by one.
fn escape_reference(raw: &str) -> String {
    let mut reference = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '+' => reference.push_str("__p__"),
            '!' => reference.push_str("__e__"),
            '=' => reference.push_str("__eq__"),
            c => reference.push(c),
        }
    }
    reference
}

/// The media type of a repodata file, derived from what follows the
/// `repodata.json` stem.
fn repodata_media_type(filename: &str) -> &'static str {
    match filename.strip_prefix("repodata.json") {
        Some("") => "application/vnd.conda.repodata.v1+json",
        Some(".gz") => "application/vnd.conda.repodata.v1+json+gzip",
        Some(".bz2") => "application/vnd.conda.repodata.v1+json+bz2",
        Some(".zst") => "application/vnd.conda.repodata.v1+json+zst",
        _ => "",
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    layers: Vec<ManifestLayer>,
}

#[derive(Debug, Deserialize)]
struct ManifestLayer {
    digest: String,
    #[serde(rename = "mediaType")]
    media_type: String,
}

impl OciMiddleware {
    /// Returns a pull token for the image, from the cache or freshly
    /// negotiated with the registry's anonymous token endpoint.
    async fn pull_token(&self, image: &Url) -> Result<String> {
        if let Some(token) = self.token_cache.lock().expect("token cache").get(image) {
            return Ok(token.clone());
        }

        let token_url = format!(
            "https://{}/token?scope=repository:{}:pull",
            image.host_str().unwrap_or_default(),
            image.path().trim_start_matches('/'),
        );
        debug!("requesting anonymous pull token from {token_url}");

        let reply: TokenReply = reqwest::get(&token_url)
            .await
            .map_err(Error::Reqwest)?
            .json()
            .await
            .map_err(Error::Reqwest)?;

        self.token_cache
            .lock()
            .expect("token cache")
            .insert(image.clone(), reply.token.clone());
        Ok(reply.token)
    }

    /// Resolves the reference to a manifest and picks the digest of the
    /// layer whose media type carries the artifact.
    async fn layer_digest(
        &self,
        coordinates: &RegistryCoordinates,
        token: &str,
    ) -> Result<String> {
        let manifest_url =
            coordinates.registry_endpoint(&format!("manifests/{}", coordinates.reference));

        let manifest: ImageManifest = reqwest::Client::new()
            .get(&manifest_url)
            .bearer_auth(token)
            .header(ACCEPT, "application/vnd.oci.image.manifest.v1+json")
            .send()
            .await
            .map_err(Error::Reqwest)?
            .json()
            .await
            .map_err(Error::Reqwest)?;

        manifest
            .layers
            .into_iter()
            .find_map(|layer| (layer.media_type == coordinates.media_type).then_some(layer.digest))
            .ok_or_else(|| {
                Error::Middleware(anyhow::Error::msg(format!(
                    "no layer with media type {} at {manifest_url}",
                    coordinates.media_type
                )))
            })
    }
}

#[async_trait::async_trait]
impl Middleware for OciMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if req.url().scheme() != "oci" {
            return next.run(req, extensions).await;
        }

        let coordinates = RegistryCoordinates::from_conda_url(req.url());
        let token = self.pull_token(&coordinates.image).await?;

        // A caller that already knows the hash addresses the blob
        // directly; everybody else goes through the manifest.
        let pinned_digest = req
            .headers()
            .get("X-ExpectedSha256")
            .and_then(|value| value.to_str().ok())
            .map(|sha256| format!("sha256:{sha256}"));
        let digest = match pinned_digest {
            Some(digest) => digest,
            None => self.layer_digest(&coordinates, &token).await?,
        };

        *req.url_mut() = coordinates
            .registry_endpoint(&format!("blobs/{digest}"))
            .parse()
            .expect("blob urls are valid");
        req.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .expect("bearer tokens are valid header values"),
        );

        next.run(req, extensions).await
    }
}
