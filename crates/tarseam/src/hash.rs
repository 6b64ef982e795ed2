//! The pluggable payload digest.
//!
//! Payload digests are produced by a process-wide factory so that a stronger
//! hash can be substituted for the default CRC-64/ISO without touching the
//! metadata format: the format stores opaque digest bytes. Split-time and
//! assemble-time factories must agree, otherwise every file fails
//! verification.

use std::sync::{PoisonError, RwLock};

use crc::{Crc, CRC_64_GO_ISO};

/// CRC-64 with the ISO 3309 polynomial, the default payload digest.
const CRC64_ISO: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// An incremental payload digest.
///
/// `finalize_reset` returns the digest bytes and leaves the hasher ready for
/// the next payload, so one instance can be reused across the files of a
/// run.
pub trait PayloadHash: Send {
    /// Absorb payload bytes.
    fn update(&mut self, data: &[u8]);

    /// Produce the digest and reset for reuse.
    fn finalize_reset(&mut self) -> Vec<u8>;
}

/// Constructor for [`PayloadHash`] instances.
pub type HashFactory = fn() -> Box<dyn PayloadHash>;

static HASH_FACTORY: RwLock<HashFactory> = RwLock::new(crc64_hash);

/// Construct a hasher from the process-wide factory.
pub fn new_hash() -> Box<dyn PayloadHash> {
    let factory = *HASH_FACTORY
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    factory()
}

/// Replace the process-wide hash factory.
///
/// Affects every subsequent disassembly and assembly in the process.
pub fn set_hash_factory(factory: HashFactory) {
    *HASH_FACTORY
        .write()
        .unwrap_or_else(PoisonError::into_inner) = factory;
}

fn crc64_hash() -> Box<dyn PayloadHash> {
    Box::new(Crc64Hash {
        digest: Some(CRC64_ISO.digest()),
    })
}

struct Crc64Hash {
    digest: Option<crc::Digest<'static, u64>>,
}

impl PayloadHash for Crc64Hash {
    fn update(&mut self, data: &[u8]) {
        self.digest
            .get_or_insert_with(|| CRC64_ISO.digest())
            .update(data);
    }

    fn finalize_reset(&mut self) -> Vec<u8> {
        let digest = self.digest.take().unwrap_or_else(|| CRC64_ISO.digest());
        // big-endian, the byte order the digest travels in
        digest.finalize().to_be_bytes().to_vec()
    }
}

/// Digest a complete buffer with the configured hash.
pub fn hash_bytes(data: &[u8]) -> Vec<u8> {
    let mut hash = new_hash();
    hash.update(data);
    hash.finalize_reset()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    // precomputed CRC-64/ISO reference vectors
    #[test]
    fn test_crc64_iso_vectors() {
        assert_eq!(hash_bytes(b"foo"), vec![60, 60, 48, 48, 0, 0, 0, 0]);
        assert_eq!(hash_bytes(b"bar"), vec![45, 196, 22, 240, 0, 0, 0, 0]);
        assert_eq!(hash_bytes(b"baz"), vec![32, 68, 22, 240, 0, 0, 0, 0]);
        assert_eq!(hash_bytes(b"bif"), vec![48, 9, 150, 240, 0, 0, 0, 0]);
    }

    #[test]
    fn test_finalize_resets() {
        let mut hash = new_hash();
        hash.update(b"foo");
        let first = hash.finalize_reset();
        hash.update(b"foo");
        let second = hash.finalize_reset();
        assert_eq!(first, second);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hash = new_hash();
        hash.update(b"dead");
        hash.update(b"beef");
        assert_eq!(hash.finalize_reset(), hash_bytes(b"deadbeef"));
    }
}
