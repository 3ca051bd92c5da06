//! Streaming AES-CBC cipher contexts with the W3C padding scheme: the block
//! is filled with random bytes and the final byte carries the padding count,
//! so every encryption adds between 1 and 16 bytes.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// Block and IV length of the AES-CBC mechanism.
pub const AES_BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not a whole number of blocks")]
    RaggedCiphertext,
    #[error("decrypted padding is invalid")]
    BadPadding,
}

#[derive(Debug)]
enum CbcState {
    Enc128(cbc::Encryptor<Aes128>),
    Enc192(cbc::Encryptor<Aes192>),
    Enc256(cbc::Encryptor<Aes256>),
    Dec128(cbc::Decryptor<Aes128>),
    Dec192(cbc::Decryptor<Aes192>),
    Dec256(cbc::Decryptor<Aes256>),
}

impl CbcState {
    fn new(key: &[u8], iv: &[u8], encrypting: bool) -> Option<Self> {
        let state = match (key.len(), encrypting) {
            (16, true) => CbcState::Enc128(cbc::Encryptor::new_from_slices(key, iv).ok()?),
            (24, true) => CbcState::Enc192(cbc::Encryptor::new_from_slices(key, iv).ok()?),
            (32, true) => CbcState::Enc256(cbc::Encryptor::new_from_slices(key, iv).ok()?),
            (16, false) => CbcState::Dec128(cbc::Decryptor::new_from_slices(key, iv).ok()?),
            (24, false) => CbcState::Dec192(cbc::Decryptor::new_from_slices(key, iv).ok()?),
            (32, false) => CbcState::Dec256(cbc::Decryptor::new_from_slices(key, iv).ok()?),
            _ => return None,
        };
        Some(state)
    }

    fn process_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            CbcState::Enc128(c) => c.encrypt_block_mut(block),
            CbcState::Enc192(c) => c.encrypt_block_mut(block),
            CbcState::Enc256(c) => c.encrypt_block_mut(block),
            CbcState::Dec128(c) => c.decrypt_block_mut(block),
            CbcState::Dec192(c) => c.decrypt_block_mut(block),
            CbcState::Dec256(c) => c.decrypt_block_mut(block),
        }
    }
}

/// A stateful handle bound to one encryption or decryption operation in
/// progress. Input may arrive in arbitrary chunks; output is produced in
/// whole blocks, with the padding applied or stripped by [`finish`].
///
/// [`finish`]: CipherContext::finish
#[derive(Debug)]
pub struct CipherContext {
    state: CbcState,
    encrypting: bool,
    w3c_padding: bool,
    pending: Vec<u8>,
    held_block: Option<[u8; AES_BLOCK_LEN]>,
}

impl CipherContext {
    pub(crate) fn create(
        key: &[u8],
        iv: &[u8],
        encrypting: bool,
        w3c_padding: bool,
    ) -> Option<Self> {
        let state = CbcState::new(key, iv, encrypting)?;
        Some(Self {
            state,
            encrypting,
            w3c_padding,
            pending: Vec::new(),
            held_block: None,
        })
    }

    /// Feeds more data through the cipher and returns whatever whole blocks
    /// are ready. During padded decryption the final block is held back
    /// until [`finish`](CipherContext::finish) strips the padding.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();

        if self.encrypting {
            let whole = self.pending.len() / AES_BLOCK_LEN * AES_BLOCK_LEN;
            for block in self.pending[..whole].chunks_exact_mut(AES_BLOCK_LEN) {
                self.state.process_block(block);
            }
            out.extend_from_slice(&self.pending[..whole]);
            self.pending.drain(..whole);
        } else {
            while self.pending.len() >= AES_BLOCK_LEN {
                let mut block = [0u8; AES_BLOCK_LEN];
                block.copy_from_slice(&self.pending[..AES_BLOCK_LEN]);
                self.pending.drain(..AES_BLOCK_LEN);
                self.state.process_block(&mut block);
                if self.w3c_padding {
                    if let Some(ready) = self.held_block.replace(block) {
                        out.extend_from_slice(&ready);
                    }
                } else {
                    out.extend_from_slice(&block);
                }
            }
        }

        Ok(out)
    }

    /// Completes the operation: applies the padding when encrypting, strips
    /// and validates it when decrypting.
    pub fn finish(mut self) -> Result<Vec<u8>, CipherError> {
        let mut out = Vec::new();

        if self.encrypting {
            if self.w3c_padding {
                let pad_len = AES_BLOCK_LEN - self.pending.len() % AES_BLOCK_LEN;
                let mut padding = vec![0u8; pad_len];
                OsRng.fill_bytes(&mut padding);
                padding[pad_len - 1] = pad_len as u8;
                self.pending.extend_from_slice(&padding);
            } else if self.pending.len() % AES_BLOCK_LEN != 0 {
                return Err(CipherError::RaggedCiphertext);
            }
            for block in self.pending.chunks_exact_mut(AES_BLOCK_LEN) {
                self.state.process_block(block);
            }
            out.extend_from_slice(&self.pending);
        } else {
            if !self.pending.is_empty() {
                return Err(CipherError::RaggedCiphertext);
            }
            if self.w3c_padding {
                let block = self.held_block.take().ok_or(CipherError::BadPadding)?;
                let pad_len = block[AES_BLOCK_LEN - 1] as usize;
                if pad_len == 0 || pad_len > AES_BLOCK_LEN {
                    return Err(CipherError::BadPadding);
                }
                out.extend_from_slice(&block[..AES_BLOCK_LEN - pad_len]);
            }
        }

        Ok(out)
    }
}

impl Drop for CipherContext {
    fn drop(&mut self) {
        self.pending.zeroize();
        if let Some(mut block) = self.held_block.take() {
            block.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CipherContext, CipherError, AES_BLOCK_LEN};

    const KEY: [u8; 16] = [0x11; 16];
    const IV: [u8; 16] = [0x22; 16];

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let mut ctx = CipherContext::create(&KEY, &IV, true, true).expect("create encryptor");
        let mut out = ctx.update(plaintext).expect("update should succeed");
        out.extend(ctx.finish().expect("finish should succeed"));
        out
    }

    fn decrypt(ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut ctx = CipherContext::create(&KEY, &IV, false, true).expect("create decryptor");
        let mut out = ctx.update(ciphertext)?;
        out.extend(ctx.finish()?);
        Ok(out)
    }

    #[test]
    fn pads_to_the_next_block_boundary() {
        assert_eq!(encrypt(b"hello").len(), AES_BLOCK_LEN);
        assert_eq!(encrypt(&[0u8; 16]).len(), 2 * AES_BLOCK_LEN);
        assert_eq!(encrypt(&[0u8; 17]).len(), 2 * AES_BLOCK_LEN);
    }

    #[test]
    fn round_trips_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 100] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let decrypted = decrypt(&encrypt(&plaintext)).expect("decrypt should succeed");
            assert_eq!(decrypted, plaintext, "length {len}");
        }
    }

    #[test]
    fn round_trips_across_chunked_updates() {
        let plaintext: Vec<u8> = (0..200u8).collect();
        let mut enc = CipherContext::create(&KEY, &IV, true, true).expect("create encryptor");
        let mut ciphertext = Vec::new();
        for chunk in plaintext.chunks(13) {
            ciphertext.extend(enc.update(chunk).expect("update should succeed"));
        }
        ciphertext.extend(enc.finish().expect("finish should succeed"));

        let mut dec = CipherContext::create(&KEY, &IV, false, true).expect("create decryptor");
        let mut decrypted = Vec::new();
        for chunk in ciphertext.chunks(9) {
            decrypted.extend(dec.update(chunk).expect("update should succeed"));
        }
        decrypted.extend(dec.finish().expect("finish should succeed"));
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn all_key_lengths_are_usable() {
        for key_len in [16usize, 24, 32] {
            let key = vec![0x42u8; key_len];
            let mut enc =
                CipherContext::create(&key, &IV, true, true).expect("create encryptor");
            let mut ciphertext = enc.update(b"payload").expect("update");
            ciphertext.extend(enc.finish().expect("finish"));

            let mut dec =
                CipherContext::create(&key, &IV, false, true).expect("create decryptor");
            let mut decrypted = dec.update(&ciphertext).expect("update");
            decrypted.extend(dec.finish().expect("finish"));
            assert_eq!(decrypted, b"payload", "key length {key_len}");
        }
    }

    #[test]
    fn unsupported_key_length_is_refused() {
        assert!(CipherContext::create(&[0u8; 15], &IV, true, true).is_none());
    }

    #[test]
    fn ragged_ciphertext_is_rejected() {
        let err = decrypt(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, CipherError::RaggedCiphertext));
    }

    #[test]
    fn empty_ciphertext_has_no_padding_to_strip() {
        let err = decrypt(&[]).unwrap_err();
        assert!(matches!(err, CipherError::BadPadding));
    }

    #[test]
    fn zero_pad_count_is_rejected() {
        // An unpadded encryption of a block ending in 0x00 decrypts to a pad
        // count of zero under the padded contract.
        let mut plain_block = [0x33u8; AES_BLOCK_LEN];
        plain_block[AES_BLOCK_LEN - 1] = 0;
        let mut enc = CipherContext::create(&KEY, &IV, true, false).expect("create encryptor");
        let mut ciphertext = enc.update(&plain_block).expect("update");
        ciphertext.extend(enc.finish().expect("finish"));

        let err = decrypt(&ciphertext).unwrap_err();
        assert!(matches!(err, CipherError::BadPadding));
    }
}
