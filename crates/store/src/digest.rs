use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::DEFAULT_BUFFER_SIZE;

/// Digest used for chunk and merged-file hashes, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 128-bit MD5, the format browsers produce with SparkMD5.
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Returns a fresh incremental hasher.
    pub fn hasher(self) -> ContentHasher {
        match self {
            Self::Md5 => ContentHasher::Md5(Md5::new()),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum ContentHasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the hex-encoded digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hashes `data` and returns the hex-encoded digest.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hashes everything `reader` yields. Returns the digest and the byte count.
pub fn hash_reader<R: Read>(
    algorithm: HashAlgorithm,
    mut reader: R,
    buffer_size: usize,
) -> io::Result<(String, u64)> {
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize_hex(), total))
}

/// Hashes an entire file.
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    hash_reader(algorithm, file, DEFAULT_BUFFER_SIZE).map(|(hash, _)| hash)
}

/// Writer adapter that hashes every byte the inner writer accepts.
///
/// Lets a copy loop produce the digest of its output without reading the
/// output back.
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
            written: 0,
        }
    }

    /// Returns the inner writer, the hex digest and the byte count.
    pub fn into_parts(self) -> (W, String, u64) {
        (self.inner, self.hasher.finalize_hex(), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_vectors() {
        assert_eq!(
            hash_bytes(HashAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn reader_hash_matches_bytes_hash() {
        let data = vec![7u8; 10_000];
        let (hash, n) = hash_reader(HashAlgorithm::Md5, data.as_slice(), 333).unwrap();
        assert_eq!(n, 10_000);
        assert_eq!(hash, hash_bytes(HashAlgorithm::Md5, &data));
    }

    #[test]
    fn hashing_writer_hashes_what_it_writes() {
        let mut writer = HashingWriter::new(Vec::new(), HashAlgorithm::Md5);
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();

        let (out, hash, n) = writer.into_parts();
        assert_eq!(out, b"hello world");
        assert_eq!(n, 11);
        assert_eq!(hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn parse_algorithm_names() {
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn algorithm_serializes_lowercase() {
        let json = serde_json::to_string(&HashAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
    }
}
