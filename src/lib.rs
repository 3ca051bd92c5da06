//! Process-wide cryptographic backend bootstrap with root-certificate trust
//! module handling and a factory for digest and cipher computation contexts.
//! The backend initializes exactly once per process no matter how many
//! threads race the first call, and degrades cleanly to an ephemeral store
//! when no certificate profile exists.

pub mod backend;
pub mod crypto;
pub mod lifecycle;
pub mod module;
pub mod profile;

pub use crypto::cipher::{CipherContext, CipherError};
pub use crypto::digest::{DigestContext, DigestKind};
pub use crypto::factory::{
    ArgumentError, CryptoFactory, NamedParam, CIPHER_AES_CBC_W3C, DIGEST_SHA1, DIGEST_SHA1_1K,
    DIGEST_SHA256, DIGEST_SHA256_1K, DIGEST_SHA512, DIGEST_SHA512_1K,
};
pub use lifecycle::{ensure_initialized, shutdown, Lifecycle};
pub use profile::{BackendContext, ProductFamily, ProfileDiscovery};
