//! Factory for digest and cipher contexts. Argument validation is surfaced
//! as a typed error carrying the offending argument position; a backend that
//! cannot be initialized yields `Ok(None)` instead, so callers can tell bad
//! input apart from an unavailable service.

use thiserror::Error;
use tracing::info;

use crate::crypto::cipher::{CipherContext, AES_BLOCK_LEN};
use crate::crypto::digest::{DigestContext, DigestKind};
use crate::lifecycle::{self, Lifecycle};
use crate::profile::BackendContext;

pub const DIGEST_SHA1: u32 = 1;
pub const DIGEST_SHA256: u32 = 2;
pub const DIGEST_SHA1_1K: u32 = 3;
pub const DIGEST_SHA256_1K: u32 = 4;
pub const DIGEST_SHA512: u32 = 5;
pub const DIGEST_SHA512_1K: u32 = 6;

pub const CIPHER_AES_CBC_W3C: u32 = 1;

/// Named argument accepted by the creation calls. No parameters are
/// recognized today; a non-empty list is always refused.
#[derive(Debug, Clone)]
pub struct NamedParam {
    pub name: String,
    pub value: String,
}

/// A caller error: unrecognized algorithm identifier, wrong key or IV
/// length, or unsupported parameters. `position` is the 1-based argument
/// position of the offender.
#[derive(Debug, Error)]
#[error("invalid argument at position {position}: {reason}")]
pub struct ArgumentError {
    pub position: u8,
    pub reason: String,
}

fn arg_err(position: u8, reason: &str) -> ArgumentError {
    ArgumentError {
        position,
        reason: reason.to_string(),
    }
}

/// Creates digest and cipher contexts bound to the process-wide backend,
/// initializing it on first use.
pub struct CryptoFactory {
    ctx: BackendContext,
    lifecycle: &'static Lifecycle,
}

impl CryptoFactory {
    pub fn new(ctx: BackendContext) -> Self {
        Self {
            ctx,
            lifecycle: lifecycle::global(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_lifecycle(ctx: BackendContext, lifecycle: &'static Lifecycle) -> Self {
        Self { ctx, lifecycle }
    }

    /// Creates a digest context for one of the six recognized digest ids.
    /// Returns `Ok(None)` when the backend cannot be initialized or the
    /// context cannot be allocated.
    pub fn create_digest_context(
        &self,
        digest_id: u32,
        params: &[NamedParam],
    ) -> Result<Option<DigestContext>, ArgumentError> {
        let (kind, one_k_block) = match digest_id {
            DIGEST_SHA1 | DIGEST_SHA1_1K => (DigestKind::Sha1, digest_id == DIGEST_SHA1_1K),
            DIGEST_SHA256 | DIGEST_SHA256_1K => {
                (DigestKind::Sha256, digest_id == DIGEST_SHA256_1K)
            }
            DIGEST_SHA512 | DIGEST_SHA512_1K => {
                (DigestKind::Sha512, digest_id == DIGEST_SHA512_1K)
            }
            _ => return Err(arg_err(1, "unexpected digest requested")),
        };
        if !params.is_empty() {
            return Err(arg_err(2, "unexpected arguments provided for digest creation"));
        }

        if !self.lifecycle.ensure_initialized(&self.ctx) {
            info!("crypto backend unavailable; digest context not created");
            return Ok(None);
        }
        Ok(DigestContext::begin(kind, one_k_block))
    }

    /// Creates a cipher context for the AES-CBC-with-W3C-padding mechanism.
    /// The IV length is validated only once the backend is up; an
    /// unavailable backend yields `Ok(None)` before the IV is ever looked at.
    pub fn create_cipher_context(
        &self,
        cipher_id: u32,
        key: &[u8],
        iv: &[u8],
        encrypting: bool,
        params: &[NamedParam],
    ) -> Result<Option<CipherContext>, ArgumentError> {
        if cipher_id != CIPHER_AES_CBC_W3C {
            return Err(arg_err(1, "unexpected cipher requested"));
        }
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(arg_err(2, "unexpected key length"));
        }
        if !params.is_empty() {
            return Err(arg_err(5, "unexpected arguments provided for cipher creation"));
        }

        if !self.lifecycle.ensure_initialized(&self.ctx) {
            info!("crypto backend unavailable; cipher context not created");
            return Ok(None);
        }
        if iv.len() != AES_BLOCK_LEN {
            return Err(arg_err(3, "unexpected length of initialization vector"));
        }
        Ok(CipherContext::create(key, iv, encrypting, true))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CryptoFactory, NamedParam, CIPHER_AES_CBC_W3C, DIGEST_SHA1, DIGEST_SHA256,
        DIGEST_SHA512_1K,
    };
    use crate::backend::Backend;
    use crate::lifecycle::Lifecycle;
    use crate::profile::BackendContext;

    static HEALTHY: Lifecycle = Lifecycle::new();
    static BROKEN: Lifecycle = Lifecycle::new();

    fn healthy_factory() -> CryptoFactory {
        HEALTHY.ensure_initialized_with(|| Some(Backend::open_ephemeral()));
        CryptoFactory::with_lifecycle(test_ctx(), &HEALTHY)
    }

    fn broken_factory() -> CryptoFactory {
        BROKEN.ensure_initialized_with(|| None);
        CryptoFactory::with_lifecycle(test_ctx(), &BROKEN)
    }

    fn test_ctx() -> BackendContext {
        BackendContext {
            certificate_folder_var: "TRUSTCORE_TEST_FACTORY_UNSET".to_string(),
            config_path: None,
            discovery: None,
        }
    }

    fn params(name: &str) -> Vec<NamedParam> {
        vec![NamedParam {
            name: name.to_string(),
            value: "1".to_string(),
        }]
    }

    #[test]
    fn unknown_digest_ids_fail_at_position_one() {
        let factory = healthy_factory();
        for id in [0u32, 7, 42, u32::MAX] {
            let err = factory.create_digest_context(id, &[]).unwrap_err();
            assert_eq!(err.position, 1, "id {id}");
        }
    }

    #[test]
    fn digest_params_must_be_empty() {
        let factory = healthy_factory();
        let err = factory
            .create_digest_context(DIGEST_SHA256, &params("block"))
            .unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn recognized_digest_ids_yield_contexts() {
        let factory = healthy_factory();
        let ctx = factory
            .create_digest_context(DIGEST_SHA1, &[])
            .expect("arguments are valid")
            .expect("backend is healthy");
        assert_eq!(ctx.output_len(), 20);

        let ctx = factory
            .create_digest_context(DIGEST_SHA512_1K, &[])
            .expect("arguments are valid")
            .expect("backend is healthy");
        assert_eq!(ctx.output_len(), 64);
    }

    #[test]
    fn unknown_cipher_id_fails_at_position_one() {
        let factory = healthy_factory();
        let err = factory
            .create_cipher_context(9, &[0u8; 16], &[0u8; 16], true, &[])
            .unwrap_err();
        assert_eq!(err.position, 1);
    }

    #[test]
    fn bad_key_length_fails_regardless_of_backend_state() {
        let factory = broken_factory();
        let err = factory
            .create_cipher_context(CIPHER_AES_CBC_W3C, &[0u8; 15], &[0u8; 16], true, &[])
            .unwrap_err();
        assert_eq!(err.position, 2);
    }

    #[test]
    fn cipher_params_must_be_empty() {
        let factory = healthy_factory();
        let err = factory
            .create_cipher_context(CIPHER_AES_CBC_W3C, &[0u8; 16], &[0u8; 16], true, &params("x"))
            .unwrap_err();
        assert_eq!(err.position, 5);
    }

    #[test]
    fn iv_is_checked_only_after_backend_init() {
        // Broken backend: the bad IV is never reached, the caller sees None.
        let factory = broken_factory();
        let result = factory
            .create_cipher_context(CIPHER_AES_CBC_W3C, &[0u8; 16], &[0u8; 8], true, &[])
            .expect("no argument error before init");
        assert!(result.is_none());

        // Healthy backend: the same call now fails at position 3.
        let factory = healthy_factory();
        let err = factory
            .create_cipher_context(CIPHER_AES_CBC_W3C, &[0u8; 16], &[0u8; 8], true, &[])
            .unwrap_err();
        assert_eq!(err.position, 3);
    }

    #[test]
    fn unavailable_backend_yields_none_without_reinit() {
        let factory = broken_factory();
        for _ in 0..3 {
            let result = factory
                .create_digest_context(DIGEST_SHA256, &[])
                .expect("arguments are valid");
            assert!(result.is_none());
        }
        assert_eq!(BROKEN.init_attempts(), 1);
    }

    #[test]
    fn healthy_backend_creates_cipher_contexts_for_all_key_lengths() {
        let factory = healthy_factory();
        for key_len in [16usize, 24, 32] {
            let key = vec![7u8; key_len];
            let ctx = factory
                .create_cipher_context(CIPHER_AES_CBC_W3C, &key, &[0u8; 16], true, &[])
                .expect("arguments are valid");
            assert!(ctx.is_some(), "key length {key_len}");
        }
    }
}
