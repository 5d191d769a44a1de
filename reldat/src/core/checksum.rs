//! 128-bit MD5 digests for header and payload integrity.
//!
//! RELDAT frames carry two independent digests: one over the 29 header
//! field bytes and one over the payload. MD5 is fixed by the wire format;
//! it detects accidental corruption and is not used for authentication.
//!
//! # Example
//!
//! ```rust
//! use reldat::core::Checksum;
//!
//! let data = b"Hello, World!";
//! let digest = Checksum::compute(data);
//!
//! assert!(Checksum::verify(data, &digest));
//! ```

use md5::{Digest, Md5};

/// Size of a digest in bytes.
pub const CHECKSUM_SIZE: usize = 16;

/// Raw digest bytes as carried on the wire.
pub type Digest128 = [u8; CHECKSUM_SIZE];

/// Incremental MD5 calculator.
#[derive(Clone, Default)]
pub struct Checksum {
    hasher: Md5,
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checksum").finish_non_exhaustive()
    }
}

impl Checksum {
    /// Creates a calculator with empty state.
    pub fn new() -> Self {
        Self { hasher: Md5::new() }
    }

    /// Feeds more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the calculator and returns the digest.
    pub fn finalize(self) -> Digest128 {
        let mut out = [0u8; CHECKSUM_SIZE];
        out.copy_from_slice(&self.hasher.finalize());
        out
    }

    /// Computes the digest of `data` in one call.
    #[inline]
    pub fn compute(data: &[u8]) -> Digest128 {
        let mut sum = Self::new();
        sum.update(data);
        sum.finalize()
    }

    /// Returns true if `data` hashes to `expected`.
    #[inline]
    pub fn verify(data: &[u8], expected: &Digest128) -> bool {
        Self::compute(data) == *expected
    }
}
