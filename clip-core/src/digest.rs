//! MD5 helpers used for both per-chunk and whole-file integrity checks.
//!
//! The wire protocol is only compatible with MD5 — not a stronger hash —
//! since it must interoperate with the transfer format as specified.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use md5::Md5;
use digest::Digest;

const STREAM_BUF_SIZE: usize = 8 * 1024;

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(&mut out, "{byte:02x}").expect("write! to String cannot fail");
    }
    out
}

/// Computes the MD5 digest of a byte slice, as 32 lowercase hex characters.
pub fn md5(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    to_hex(&hasher.finalize())
}

/// Computes the MD5 digest of a reader, reading in fixed-size buffers so the
/// whole input is never held in memory at once.
pub fn md5_stream<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Computes the MD5 digest of a file on disk.
pub fn md5_file(path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(path)?;
    md5_stream(BufReader::with_capacity(STREAM_BUF_SIZE, file))
}

/// Verifies that a file's MD5 matches `expected`, case-insensitively.
pub fn verify_file(path: impl AsRef<Path>, expected: &str) -> io::Result<bool> {
    let actual = md5_file(path)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn md5_matches_rfc_vectors() {
        assert_eq!(md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            md5(b"message digest"),
            "f96b697d7cb7938d525a2f31aaf161d0"
        );
    }

    #[test]
    fn md5_stream_matches_one_shot() {
        let data = vec![7u8; 20_000];
        let streamed = md5_stream(data.as_slice()).unwrap();
        assert_eq!(streamed, md5(&data));
    }

    #[test]
    fn md5_file_and_verify_roundtrip() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();

        let expected = md5(b"hello world");
        let computed = md5_file(f.path()).unwrap();
        assert_eq!(computed, expected);
        assert!(verify_file(f.path(), &expected.to_uppercase()).unwrap());
        assert!(!verify_file(f.path(), "deadbeef").unwrap());
    }
}
