//! SHA-256 content addressing.

use std::io::{self, Write};

use sha2::{Digest, Sha256};

/// Algorithm prefix of OCI digests.
pub const SHA256_PREFIX: &str = "sha256:";

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// OCI digest (`sha256:<hex>`) of raw bytes.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, sha256_hex(data))
}

/// Check that `data` hashes to `expected` (`sha256:<hex>`).
pub fn verify(expected: &str, data: &[u8]) -> tape_core::Result<()> {
    let actual = sha256_digest(data);
    if actual != expected {
        return Err(tape_core::TapeError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Writer that forwards everything to `inner` while hashing it.
///
/// Each push creates its own instance; the accumulator is never shared
/// between operations.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Flush the inner writer and return it with the hex digest and byte count.
    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.written))
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
