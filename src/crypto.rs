// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Local cryptographic operations for key wrapping.
//!
//! This module provides the AES-GCM primitives used to wrap data encryption
//! keys under locally generated key encryption keys, and to generate random
//! keys. The bulk encryption of file pages is out of scope; only key bytes
//! ever pass through these functions.

use std::fmt::Debug;
use std::str::FromStr;

use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{Error, ErrorKind, Result};

/// AES-GCM with a 192-bit key and the standard 96-bit nonce.
type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// File encryption algorithm recorded in the produced encryption properties.
///
/// Selects how the (out-of-scope) writer encrypts pages: full AES-GCM, or
/// GCM for metadata modules combined with CTR for data pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-GCM applied to all file modules.
    AesGcmV1,
    /// AES-GCM for metadata modules, AES-CTR for data pages.
    AesGcmCtrV1,
}

impl CipherAlgorithm {
    /// Returns the string identifier for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AesGcmV1 => "AES_GCM_V1",
            Self::AesGcmCtrV1 => "AES_GCM_CTR_V1",
        }
    }
}

impl FromStr for CipherAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AES_GCM_V1" => Ok(Self::AesGcmV1),
            "AES_GCM_CTR_V1" => Ok(Self::AesGcmCtrV1),
            _ => Err(Error::new(
                ErrorKind::ConfigurationInvalid,
                format!("Unsupported encryption algorithm: {s}"),
            )),
        }
    }
}

/// A secure symmetric key that zeroes its memory on drop.
///
/// Valid lengths are 16, 24 and 32 bytes, matching the 128/192/256-bit data
/// key lengths the file format allows.
pub struct SecureKey {
    key: Zeroizing<Vec<u8>>,
}

impl SecureKey {
    /// Creates a secure key from raw bytes.
    ///
    /// # Errors
    /// Returns `DataInvalid` if the length is not 16, 24 or 32 bytes.
    pub fn new(key: Vec<u8>) -> Result<Self> {
        let key = Zeroizing::new(key);
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Invalid key length: expected 16, 24 or 32 bytes, got {}",
                    key.len()
                ),
            ));
        }
        Ok(Self { key })
    }

    /// Generates a new random key of the given length in bytes.
    pub fn generate(length: usize) -> Result<Self> {
        if !matches!(length, 16 | 24 | 32) {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid key length: expected 16, 24 or 32 bytes, got {length}"),
            ));
        }
        let mut key = Zeroizing::new(vec![0u8; length]);
        OsRng.fill_bytes(&mut key);
        Ok(Self { key })
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes must never reach logs.
        f.debug_struct("SecureKey")
            .field("length", &self.key.len())
            .finish()
    }
}

/// AES-GCM key encryptor for wrapping and unwrapping key bytes.
///
/// The produced blob layout is `[12-byte nonce][ciphertext][16-byte tag]`,
/// the same layout the Java and C++ Parquet key tools emit.
pub struct AesGcmKeyEncryptor {
    key: SecureKey,
}

impl AesGcmKeyEncryptor {
    /// Creates a new encryptor with the given key.
    pub fn new(key: SecureKey) -> Self {
        Self { key }
    }

    /// Encrypts `plaintext` with the held key, binding `aad` into the
    /// authentication tag.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        match self.key.as_bytes().len() {
            16 => seal::<Aes128Gcm>(self.key.as_bytes(), plaintext, aad),
            24 => seal::<Aes192Gcm>(self.key.as_bytes(), plaintext, aad),
            32 => seal::<Aes256Gcm>(self.key.as_bytes(), plaintext, aad),
            // SecureKey construction guarantees one of the above.
            n => Err(Error::new(
                ErrorKind::Unexpected,
                format!("Unreachable key length {n}"),
            )),
        }
    }

    /// Decrypts a blob produced by [`Self::encrypt`] with a matching `aad`.
    pub fn decrypt(&self, blob: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Wrapped key too short: expected at least {} bytes, got {}",
                    NONCE_LEN + TAG_LEN,
                    blob.len()
                ),
            ));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        match self.key.as_bytes().len() {
            16 => open::<Aes128Gcm>(self.key.as_bytes(), nonce, ciphertext, aad),
            24 => open::<Aes192Gcm>(self.key.as_bytes(), nonce, ciphertext, aad),
            32 => open::<Aes256Gcm>(self.key.as_bytes(), nonce, ciphertext, aad),
            n => Err(Error::new(
                ErrorKind::Unexpected,
                format!("Unreachable key length {n}"),
            )),
        }
    }
}

fn seal<C>(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key)
        .map_err(|e| Error::new(ErrorKind::Unexpected, "Invalid AES key").with_source(anyhow::anyhow!(e)))?;
    let nonce = C::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| {
            Error::new(ErrorKind::Unexpected, "AES-GCM key encryption failed")
                .with_source(anyhow::anyhow!(e))
        })?;

    let mut result = Vec::with_capacity(nonce.len() + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open<C>(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>>
where
    C: Aead + KeyInit + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key)
        .map_err(|e| Error::new(ErrorKind::Unexpected, "Invalid AES key").with_source(anyhow::anyhow!(e)))?;
    let nonce = Nonce::<U12>::from_slice(nonce);

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|e| {
            Error::new(ErrorKind::DataInvalid, "AES-GCM key decryption failed")
                .with_source(anyhow::anyhow!(e))
        })?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_algorithm() {
        assert_eq!(
            CipherAlgorithm::from_str("AES_GCM_V1").unwrap(),
            CipherAlgorithm::AesGcmV1
        );
        assert_eq!(
            CipherAlgorithm::from_str("AES_GCM_CTR_V1").unwrap(),
            CipherAlgorithm::AesGcmCtrV1
        );
        assert!(CipherAlgorithm::from_str("AES_CBC").is_err());

        assert_eq!(CipherAlgorithm::AesGcmV1.as_str(), "AES_GCM_V1");
        assert_eq!(CipherAlgorithm::AesGcmCtrV1.as_str(), "AES_GCM_CTR_V1");
    }

    #[test]
    fn test_secure_key_lengths() {
        for len in [16, 24, 32] {
            let key = SecureKey::generate(len).unwrap();
            assert_eq!(key.as_bytes().len(), len);
        }

        assert!(SecureKey::new(vec![0u8; 15]).is_err());
        assert!(SecureKey::new(vec![0u8; 20]).is_err());
        assert!(SecureKey::generate(0).is_err());
    }

    #[test]
    fn test_secure_key_debug_hides_bytes() {
        let key = SecureKey::new(vec![0xAB; 16]).unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("171")); // 0xAB
        assert!(printed.contains("16"));
    }

    #[test]
    fn test_wrap_roundtrip_all_key_lengths() {
        for len in [16, 24, 32] {
            let kek = SecureKey::generate(len).unwrap();
            let encryptor = AesGcmKeyEncryptor::new(kek);

            let dek = b"sixteen byte dek";
            let aad = b"kek-id-1";

            let wrapped = encryptor.encrypt(dek, aad).unwrap();
            assert_eq!(wrapped.len(), NONCE_LEN + dek.len() + TAG_LEN);
            assert_ne!(&wrapped[NONCE_LEN..NONCE_LEN + dek.len()], dek);

            let unwrapped = encryptor.decrypt(&wrapped, aad).unwrap();
            assert_eq!(&unwrapped[..], dek);
        }
    }

    #[test]
    fn test_wrap_rejects_wrong_aad() {
        let encryptor = AesGcmKeyEncryptor::new(SecureKey::generate(16).unwrap());
        let wrapped = encryptor.encrypt(b"dek bytes", b"aad-1").unwrap();
        assert!(encryptor.decrypt(&wrapped, b"aad-2").is_err());
    }

    #[test]
    fn test_wrap_rejects_tampered_blob() {
        let encryptor = AesGcmKeyEncryptor::new(SecureKey::generate(16).unwrap());
        let mut wrapped = encryptor.encrypt(b"dek bytes", b"aad").unwrap();
        wrapped[NONCE_LEN] ^= 0xFF;
        assert!(encryptor.decrypt(&wrapped, b"aad").is_err());
    }

    #[test]
    fn test_wrap_rejects_short_blob() {
        let encryptor = AesGcmKeyEncryptor::new(SecureKey::generate(16).unwrap());
        assert!(encryptor.decrypt(b"short", b"aad").is_err());
    }
}
