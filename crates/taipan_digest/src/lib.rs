#![deny(missing_docs)]

//! Utility functions for computing hashes with the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) family of
//! crates.
//!
//! Everything in here is generic over the [`Digest`] trait so callers can
//! pick the algorithm (`Sha256`, `Md5`, ...) that the repodata or the
//! trust metadata asks for.

#[cfg(feature = "tokio")]
mod tokio;

#[cfg(feature = "serde")]
pub mod serde;

pub use digest;

use std::{fs::File, io::Write, path::Path};

use digest::{Digest, Output};

pub use md5::Md5;
pub use sha2::Sha256;

/// The output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// The output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default + Write>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest. Returns `None` if the string is
/// not valid hex or has the wrong length for `D`.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// Formats a digest as a lowercase hex string.
pub fn format_digest<D: Digest>(digest: &Output<D>) -> String {
    hex::encode(digest)
}

/// A writer that forwards everything to an inner writer while hashing the
/// bytes on the fly. Call [`HashingWriter::finalize`] to get both the
/// writer and the digest back.
///
/// With the `tokio` feature this type also implements
/// [`::tokio::io::AsyncWrite`].
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Consumes this instance and returns the original writer and the
    /// hash of all written bytes.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
