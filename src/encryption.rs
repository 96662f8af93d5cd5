//! Stateless decryption of DRM-wrapped payloads.
//!
//! The engine decrypts complete ciphertext buffers with a named symmetric
//! scheme. It never operates on partial streamed chunks: block ciphers need
//! the full (or at least block-aligned) ciphertext, so callers accumulate
//! first and decrypt once.
//!
//! Sources that wrap content in a non-standard layout attach a custom
//! [`Decrypter`] object instead of a named scheme; the engine dispatches by
//! capability, so new schemes attach without modifying the engine itself.

use std::fmt;
use std::sync::Arc;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// A custom decryption capability supplied by a source.
///
/// Implementations must be pure: same ciphertext in, same plaintext out,
/// no side effects.
pub trait Decrypter: Send + Sync {
    /// Decrypts a complete ciphertext buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError`] when the ciphertext is malformed for the
    /// scheme or the key material is unusable.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError>;
}

/// A named, parameterized symmetric decryption scheme.
///
/// Constructed once per file reference and immutable afterwards.
#[derive(Clone)]
pub enum EncryptionScheme {
    /// AES in CBC mode. Ciphertext length must be a multiple of the block
    /// size; trailing padding is never stripped here (callers that need
    /// padding removed handle it themselves).
    AesCbc {
        /// AES key (16, 24, or 32 bytes).
        key: Vec<u8>,
        /// Initialization vector (16 bytes).
        iv: Vec<u8>,
    },
    /// AES in CTR mode; a stream cipher, so any ciphertext length is valid.
    /// The counter block is `nonce` followed by the big-endian counter.
    AesCtr {
        /// AES key (16, 24, or 32 bytes).
        key: Vec<u8>,
        /// Counter-block prefix (shorter than one block).
        nonce: Vec<u8>,
        /// Initial counter value.
        initial_counter: u64,
    },
    /// Repeating-key XOR stream cipher; trivially invertible.
    Xor {
        /// Non-empty key.
        key: Vec<u8>,
    },
    /// Source-supplied scheme dispatched through the [`Decrypter`] trait.
    Custom(Arc<dyn Decrypter>),
}

// Manual Debug that never prints key material.
impl fmt::Debug for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AesCbc { key, .. } => f
                .debug_struct("AesCbc")
                .field("key_len", &key.len())
                .finish_non_exhaustive(),
            Self::AesCtr {
                key,
                nonce,
                initial_counter,
            } => f
                .debug_struct("AesCtr")
                .field("key_len", &key.len())
                .field("nonce_len", &nonce.len())
                .field("initial_counter", initial_counter)
                .finish(),
            Self::Xor { key } => f
                .debug_struct("Xor")
                .field("key_len", &key.len())
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Errors from malformed ciphertext or unusable key material.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// CBC ciphertext whose length is not a block multiple.
    #[error("ciphertext length {length} is not a multiple of the {AES_BLOCK_SIZE}-byte AES block")]
    NotBlockAligned {
        /// Offending ciphertext length.
        length: usize,
    },

    /// Key, IV, or nonce that the scheme cannot use.
    #[error("invalid cipher parameters: {detail}")]
    InvalidParameters {
        /// What was wrong.
        detail: String,
    },

    /// Ciphertext shorter than the scheme's fixed header.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    TruncatedInput {
        /// Minimum length the scheme requires.
        expected: usize,
        /// Actual ciphertext length.
        actual: usize,
    },
}

impl DecryptionError {
    /// Creates a block-alignment error.
    #[must_use]
    pub fn not_block_aligned(length: usize) -> Self {
        Self::NotBlockAligned { length }
    }

    /// Creates an invalid-parameters error.
    #[must_use]
    pub fn invalid_parameters(detail: impl Into<String>) -> Self {
        Self::InvalidParameters {
            detail: detail.into(),
        }
    }

    /// Creates a truncated-input error.
    #[must_use]
    pub fn truncated_input(expected: usize, actual: usize) -> Self {
        Self::TruncatedInput { expected, actual }
    }
}

/// Decrypts a complete ciphertext buffer with the given scheme.
///
/// Pure and side-effect free.
///
/// # Errors
///
/// Returns [`DecryptionError`] when the ciphertext is malformed for the
/// scheme or the key material is unusable.
pub fn decrypt(ciphertext: &[u8], scheme: &EncryptionScheme) -> Result<Vec<u8>, DecryptionError> {
    match scheme {
        EncryptionScheme::AesCbc { key, iv } => decrypt_aes_cbc(ciphertext, key, iv),
        EncryptionScheme::AesCtr {
            key,
            nonce,
            initial_counter,
        } => decrypt_aes_ctr(ciphertext, key, nonce, *initial_counter),
        EncryptionScheme::Xor { key } => decrypt_xor(ciphertext, key),
        EncryptionScheme::Custom(custom) => custom.decrypt(ciphertext),
    }
}

fn decrypt_aes_cbc(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, DecryptionError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(DecryptionError::not_block_aligned(data.len()));
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(DecryptionError::invalid_parameters(format!(
            "AES-CBC IV must be {AES_BLOCK_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    let mut buffer = data.to_vec();
    match key.len() {
        16 => cbc_decrypt_in_place::<cbc::Decryptor<aes::Aes128>>(key, iv, &mut buffer)?,
        24 => cbc_decrypt_in_place::<cbc::Decryptor<aes::Aes192>>(key, iv, &mut buffer)?,
        32 => cbc_decrypt_in_place::<cbc::Decryptor<aes::Aes256>>(key, iv, &mut buffer)?,
        other => {
            return Err(DecryptionError::invalid_parameters(format!(
                "unsupported AES key length {other}"
            )));
        }
    }
    Ok(buffer)
}

fn cbc_decrypt_in_place<C>(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> Result<(), DecryptionError>
where
    C: KeyIvInit + BlockDecryptMut,
{
    let decryptor = C::new_from_slices(key, iv)
        .map_err(|_| DecryptionError::invalid_parameters("AES key or IV has the wrong length"))?;
    let buffer_len = buffer.len();
    decryptor
        .decrypt_padded_mut::<NoPadding>(buffer)
        .map_err(|_| DecryptionError::not_block_aligned(buffer_len))?;
    Ok(())
}

fn decrypt_aes_ctr(
    data: &[u8],
    key: &[u8],
    nonce: &[u8],
    initial_counter: u64,
) -> Result<Vec<u8>, DecryptionError> {
    if nonce.len() >= AES_BLOCK_SIZE {
        return Err(DecryptionError::invalid_parameters(format!(
            "AES-CTR nonce must be shorter than {AES_BLOCK_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    let block = counter_block(nonce, initial_counter)?;
    let mut buffer = data.to_vec();
    match key.len() {
        16 => ctr_apply::<ctr::Ctr128BE<aes::Aes128>>(key, &block, &mut buffer)?,
        24 => ctr_apply::<ctr::Ctr128BE<aes::Aes192>>(key, &block, &mut buffer)?,
        32 => ctr_apply::<ctr::Ctr128BE<aes::Aes256>>(key, &block, &mut buffer)?,
        other => {
            return Err(DecryptionError::invalid_parameters(format!(
                "unsupported AES key length {other}"
            )));
        }
    }
    Ok(buffer)
}

/// Builds the initial counter block: nonce, then the counter big-endian in
/// the remaining bytes.
fn counter_block(nonce: &[u8], initial_counter: u64) -> Result<[u8; AES_BLOCK_SIZE], DecryptionError> {
    let mut block = [0u8; AES_BLOCK_SIZE];
    block[..nonce.len()].copy_from_slice(nonce);

    let counter_space = AES_BLOCK_SIZE - nonce.len();
    let counter_bytes = initial_counter.to_be_bytes();
    if counter_space >= counter_bytes.len() {
        block[AES_BLOCK_SIZE - counter_bytes.len()..].copy_from_slice(&counter_bytes);
    } else {
        let dropped = counter_bytes.len() - counter_space;
        if counter_bytes[..dropped].iter().any(|byte| *byte != 0) {
            return Err(DecryptionError::invalid_parameters(format!(
                "initial counter {initial_counter} does not fit in {counter_space} bytes"
            )));
        }
        block[nonce.len()..].copy_from_slice(&counter_bytes[dropped..]);
    }
    Ok(block)
}

fn ctr_apply<C>(key: &[u8], block: &[u8], buffer: &mut [u8]) -> Result<(), DecryptionError>
where
    C: KeyIvInit + StreamCipher,
{
    let mut cipher = C::new_from_slices(key, block)
        .map_err(|_| DecryptionError::invalid_parameters("AES key has the wrong length"))?;
    cipher.apply_keystream(buffer);
    Ok(())
}

fn decrypt_xor(data: &[u8], key: &[u8]) -> Result<Vec<u8>, DecryptionError> {
    if key.is_empty() {
        return Err(DecryptionError::invalid_parameters("XOR key must not be empty"));
    }
    Ok(data
        .iter()
        .enumerate()
        .map(|(index, byte)| byte ^ key[index % key.len()])
        .collect())
}

/// Per-page scheme observed in the wild: the AES-256 key is derived from
/// `sha256(uuid + page_number + job_id + format_id)`, and the ciphertext
/// carries an 8-byte little-endian original-size field followed by a 16-byte
/// IV before the CBC payload. Plaintext is truncated to the declared size,
/// which is where this scheme's padding is removed.
pub struct SizePrefixedAesCbc {
    key: [u8; 32],
}

impl SizePrefixedAesCbc {
    const HEADER_LEN: usize = 24;

    /// Derives the per-page key from the source-supplied identifiers.
    #[must_use]
    pub fn new(uuid: &str, page_number: usize, job_id: &str, format_id: &str) -> Self {
        let seed = format!("{uuid}{page_number}{job_id}{format_id}");
        Self {
            key: Sha256::digest(seed.as_bytes()).into(),
        }
    }
}

impl fmt::Debug for SizePrefixedAesCbc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SizePrefixedAesCbc")
    }
}

impl Decrypter for SizePrefixedAesCbc {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if ciphertext.len() < Self::HEADER_LEN {
            return Err(DecryptionError::truncated_input(
                Self::HEADER_LEN,
                ciphertext.len(),
            ));
        }
        let Ok(size_bytes) = <[u8; 8]>::try_from(&ciphertext[..8]) else {
            return Err(DecryptionError::truncated_input(8, ciphertext.len()));
        };
        let original_size = usize::try_from(u64::from_le_bytes(size_bytes)).map_err(|_| {
            DecryptionError::invalid_parameters("declared original size does not fit in memory")
        })?;
        let iv = &ciphertext[8..Self::HEADER_LEN];
        let plain = decrypt_aes_cbc(&ciphertext[Self::HEADER_LEN..], &self.key, iv)?;
        if original_size > plain.len() {
            return Err(DecryptionError::invalid_parameters(format!(
                "declared original size {original_size} exceeds decrypted payload of {} bytes",
                plain.len()
            )));
        }
        Ok(plain[..original_size].to_vec())
    }
}
