//! Digest computation contexts. Each context owns one hashing operation in
//! progress; the 1KB-block variants digest only the first kilobyte of the
//! data fed to them, however it is chunked.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Prefix length digested by the 1KB-block variants.
pub const ONE_K_BLOCK: usize = 1024;

/// Hash families the backend supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestKind {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestKind {
    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestKind::Sha1 => 20,
            DigestKind::Sha256 => 32,
            DigestKind::Sha512 => 64,
        }
    }
}

#[derive(Debug)]
enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

/// A stateful handle bound to one hashing operation in progress.
#[derive(Debug)]
pub struct DigestContext {
    hasher: Hasher,
    output_len: usize,
    one_k_block: bool,
    digested: usize,
}

impl DigestContext {
    pub(crate) fn begin(kind: DigestKind, one_k_block: bool) -> Option<Self> {
        let hasher = match kind {
            DigestKind::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestKind::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestKind::Sha512 => Hasher::Sha512(Sha512::new()),
        };
        Some(Self {
            hasher,
            output_len: kind.output_len(),
            one_k_block,
            digested: 0,
        })
    }

    /// Feeds more data into the digest. For 1KB-block contexts, input past
    /// the first kilobyte is ignored.
    pub fn update(&mut self, data: &[u8]) {
        let take = if self.one_k_block {
            if self.digested >= ONE_K_BLOCK {
                return;
            }
            data.len().min(ONE_K_BLOCK - self.digested)
        } else {
            data.len()
        };
        match &mut self.hasher {
            Hasher::Sha1(h) => h.update(&data[..take]),
            Hasher::Sha256(h) => h.update(&data[..take]),
            Hasher::Sha512(h) => h.update(&data[..take]),
        }
        self.digested += take;
    }

    /// Completes the operation and returns the digest value.
    pub fn finish(self) -> Vec<u8> {
        match self.hasher {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }
}

#[cfg(test)]
mod tests {
    use super::{DigestContext, DigestKind, ONE_K_BLOCK};

    fn digest_of(kind: DigestKind, one_k: bool, data: &[u8]) -> Vec<u8> {
        let mut ctx = DigestContext::begin(kind, one_k).expect("context should begin");
        ctx.update(data);
        ctx.finish()
    }

    #[test]
    fn sha1_matches_known_vector() {
        assert_eq!(
            hex::encode(digest_of(DigestKind::Sha1, false, b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            hex::encode(digest_of(DigestKind::Sha256, false, b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha512_matches_known_vector() {
        assert_eq!(
            hex::encode(digest_of(DigestKind::Sha512, false, b"abc")),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn output_lengths_match_the_family() {
        assert_eq!(digest_of(DigestKind::Sha1, false, b"x").len(), 20);
        assert_eq!(digest_of(DigestKind::Sha256, false, b"x").len(), 32);
        assert_eq!(digest_of(DigestKind::Sha512, false, b"x").len(), 64);
    }

    #[test]
    fn one_k_variant_digests_only_the_first_kilobyte() {
        let data = vec![0xabu8; 4 * ONE_K_BLOCK];
        let limited = digest_of(DigestKind::Sha256, true, &data);
        let prefix = digest_of(DigestKind::Sha256, false, &data[..ONE_K_BLOCK]);
        let full = digest_of(DigestKind::Sha256, false, &data);
        assert_eq!(limited, prefix);
        assert_ne!(limited, full);
    }

    #[test]
    fn one_k_limit_holds_across_chunked_updates() {
        let data = vec![0x5eu8; 3 * ONE_K_BLOCK];
        let mut chunked =
            DigestContext::begin(DigestKind::Sha512, true).expect("context should begin");
        for chunk in data.chunks(100) {
            chunked.update(chunk);
        }
        let prefix = digest_of(DigestKind::Sha512, false, &data[..ONE_K_BLOCK]);
        assert_eq!(chunked.finish(), prefix);
    }

    #[test]
    fn chunked_and_single_updates_agree() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut chunked = DigestContext::begin(DigestKind::Sha256, false)
            .expect("context should begin");
        for chunk in data.chunks(7) {
            chunked.update(chunk);
        }
        assert_eq!(chunked.finish(), digest_of(DigestKind::Sha256, false, &data));
    }
}
