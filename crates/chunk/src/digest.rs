//! Digest helpers for chunk and whole-file verification.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use backhaul_protocol::DigestAlgorithm;

use crate::ChunkError;

const READ_BUF_SIZE: usize = 8192;

/// Computes the hex-encoded digest of `data`.
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        DigestAlgorithm::Crc32 => format!("{:08x}", crc32fast::hash(data)),
    }
}

/// Computes the hex-encoded digest of an entire file, streaming.
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> Result<String, ChunkError> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; READ_BUF_SIZE];
    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        DigestAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:08x}", hasher.finalize()))
        }
    }
}

/// Computes the digest of the exact byte range `[offset, offset + len)`.
///
/// Used to re-verify individual chunk ranges after a whole-file mismatch.
pub fn digest_range(
    algorithm: DigestAlgorithm,
    file: &mut File,
    offset: u64,
    len: u32,
) -> Result<String, ChunkError> {
    file.seek(SeekFrom::Start(offset))?;
    let mut remaining = len as usize;
    let mut buf = [0u8; READ_BUF_SIZE];

    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            while remaining > 0 {
                let want = remaining.min(READ_BUF_SIZE);
                file.read_exact(&mut buf[..want])?;
                hasher.update(&buf[..want]);
                remaining -= want;
            }
            Ok(hex::encode(hasher.finalize()))
        }
        DigestAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            while remaining > 0 {
                let want = remaining.min(READ_BUF_SIZE);
                file.read_exact(&mut buf[..want])?;
                hasher.update(&buf[..want]);
                remaining -= want;
            }
            Ok(format!("{:08x}", hasher.finalize()))
        }
    }
}

/// Verifies `data` against an expected hex digest.
pub fn verify_bytes(algorithm: DigestAlgorithm, data: &[u8], expected: &str) -> bool {
    digest_bytes(algorithm, data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn sha256_is_deterministic() {
        let a = digest_bytes(DigestAlgorithm::Sha256, b"hello world");
        let b = digest_bytes(DigestAlgorithm::Sha256, b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn crc32_is_short_hex() {
        let d = digest_bytes(DigestAlgorithm::Crc32, b"hello world");
        assert_eq!(d.len(), 8);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_data_different_digest() {
        for algo in [DigestAlgorithm::Sha256, DigestAlgorithm::Crc32] {
            assert_ne!(
                digest_bytes(algo, b"hello"),
                digest_bytes(algo, b"world"),
                "{algo:?}"
            );
        }
    }

    #[test]
    fn file_digest_matches_bytes_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data = b"streaming digest test content, longer than nothing";
        std::fs::write(&path, data).unwrap();

        for algo in [DigestAlgorithm::Sha256, DigestAlgorithm::Crc32] {
            assert_eq!(
                digest_file(algo, &path).unwrap(),
                digest_bytes(algo, data),
                "{algo:?}"
            );
        }
    }

    #[test]
    fn range_digest_matches_slice_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&data).unwrap();
        drop(f);

        let mut file = File::open(&path).unwrap();
        let range = digest_range(DigestAlgorithm::Sha256, &mut file, 10_000, 20_000).unwrap();
        let slice = digest_bytes(DigestAlgorithm::Sha256, &data[10_000..30_000]);
        assert_eq!(range, slice);
    }

    #[test]
    fn range_digest_past_eof_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"tiny").unwrap();

        let mut file = File::open(&path).unwrap();
        let result = digest_range(DigestAlgorithm::Sha256, &mut file, 0, 100);
        assert!(matches!(result, Err(ChunkError::Io(_))));
    }

    #[test]
    fn verify_accepts_and_rejects() {
        let data = b"payload";
        let good = digest_bytes(DigestAlgorithm::Sha256, data);
        assert!(verify_bytes(DigestAlgorithm::Sha256, data, &good));
        assert!(!verify_bytes(
            DigestAlgorithm::Sha256,
            data,
            "0000000000000000000000000000000000000000000000000000000000000000"
        ));
    }
}
