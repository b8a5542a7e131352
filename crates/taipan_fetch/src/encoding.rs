//! Streaming decompression of response bodies.

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, ZstdDecoder};
use tokio::io::{AsyncBufRead, AsyncRead};

/// The compression applied to a payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Encoding {
    /// No decompression needed.
    #[default]
    Passthrough,
    /// The body is gzip compressed (transfer encoding).
    Gzip,
    /// The body is bzip2 compressed (`.json.bz2` repodata).
    Bz2,
    /// The body is zstd compressed (`.json.zst` repodata).
    Zst,
}

impl Encoding {
    /// Determines the content encoding from the URL path: repodata
    /// variants carry their compression in the filename.
    pub fn from_url_path(path: &str) -> Encoding {
        if path.ends_with(".json.zst") {
            Encoding::Zst
        } else if path.ends_with(".json.bz2") {
            Encoding::Bz2
        } else {
            Encoding::Passthrough
        }
    }

    /// Determines the transfer encoding from a `Content-Encoding`
    /// header value.
    pub fn from_content_encoding(header: Option<&str>) -> Encoding {
        match header {
            Some("gzip") => Encoding::Gzip,
            Some("bzip2") => Encoding::Bz2,
            Some("zstd") => Encoding::Zst,
            _ => Encoding::Passthrough,
        }
    }

    /// Strips the compression suffix from a filename: the decoded
    /// payload is written under the stripped name.
    pub fn strip_suffix(self, filename: &str) -> &str {
        match self {
            Encoding::Zst => filename.strip_suffix(".zst").unwrap_or(filename),
            Encoding::Bz2 => filename.strip_suffix(".bz2").unwrap_or(filename),
            Encoding::Gzip | Encoding::Passthrough => filename,
        }
    }
}

/// Extension trait wrapping a reader in the decoder for an encoding.
pub trait AsyncEncoding: AsyncBufRead + Sized {
    /// Returns a reader that decodes this reader's bytes on the fly.
    fn decode(self, encoding: Encoding) -> Box<dyn AsyncRead + Send + Unpin>
    where
        Self: Send + Unpin + 'static,
    {
        match encoding {
            Encoding::Passthrough => Box::new(self),
            Encoding::Gzip => Box::new(GzipDecoder::new(self)),
            Encoding::Bz2 => Box::new(BzDecoder::new(self)),
            Encoding::Zst => Box::new(ZstdDecoder::new(self)),
        }
    }
}

impl<T: AsyncBufRead + Sized> AsyncEncoding for T {}

#[cfg(test)]
mod tests {
    use super::Encoding;

    #[test]
    fn encoding_from_url() {
        assert_eq!(
            Encoding::from_url_path("/conda-forge/linux-64/repodata.json.zst"),
            Encoding::Zst
        );
        assert_eq!(
            Encoding::from_url_path("/conda-forge/linux-64/repodata.json.bz2"),
            Encoding::Bz2
        );
        assert_eq!(
            Encoding::from_url_path("/conda-forge/linux-64/repodata.json"),
            Encoding::Passthrough
        );
    }

    #[test]
    fn stripped_filenames() {
        assert_eq!(Encoding::Zst.strip_suffix("repodata.json.zst"), "repodata.json");
        assert_eq!(Encoding::Bz2.strip_suffix("repodata.json.bz2"), "repodata.json");
        assert_eq!(
            Encoding::Passthrough.strip_suffix("repodata.json"),
            "repodata.json"
        );
    }

    #[tokio::test]
    async fn zstd_stream_roundtrip() {
        use async_compression::tokio::bufread::ZstdEncoder;
        use tokio::io::AsyncReadExt;

        use super::AsyncEncoding;

        let payload = br#"{"info": {"subdir": "linux-64"}, "packages": {}}"#;

        let mut encoder = ZstdEncoder::new(tokio::io::BufReader::new(&payload[..]));
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await.unwrap();

        let reader = tokio::io::BufReader::new(std::io::Cursor::new(compressed));
        let mut decoder = reader.decode(Encoding::Zst);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).await.unwrap();
        assert_eq!(decoded, payload);
    }
}
