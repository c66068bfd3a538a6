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

//! High level encryption and decryption configuration.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::crypto::CipherAlgorithm;
use crate::{Error, ErrorKind, Result};

/// Default lifetime of cached entities (KMS client objects, key encryption
/// keys): 10 minutes.
pub const DEFAULT_CACHE_LIFETIME: Duration = Duration::from_secs(600);

/// Default data encryption key length in bits.
pub const DEFAULT_DATA_KEY_LENGTH_BITS: u32 = 128;

/// High level configuration for encrypting one file.
///
/// Exactly one of `column_keys` (non-empty) and `uniform_encryption` must be
/// set; [`EncryptionConfiguration::validate`] enforces this.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EncryptionConfiguration {
    /// ID of the master key used for footer encryption/signing.
    #[builder(setter(into))]
    pub footer_key: String,

    /// Columns to encrypt, with their column master key IDs.
    /// Format: `"columnKeyID:colName,colName;columnKeyID:colName..."`.
    #[builder(default, setter(into))]
    pub column_keys: String,

    /// Encrypt footer and all columns with the same single data key.
    #[builder(default = false)]
    pub uniform_encryption: bool,

    /// File encryption algorithm.
    #[builder(default = CipherAlgorithm::AesGcmV1)]
    pub cipher_algorithm: CipherAlgorithm,

    /// Write the file with a plaintext footer. The footer key is still
    /// produced and used for footer signing.
    #[builder(default = false)]
    pub plaintext_footer: bool,

    /// Use double wrapping: data keys are wrapped with key encryption keys,
    /// which in turn are wrapped with master keys. If false, data keys are
    /// wrapped directly with master keys.
    #[builder(default = true)]
    pub double_wrapping: bool,

    /// Lifetime of cached entities (key encryption keys, KMS client objects).
    #[builder(default = DEFAULT_CACHE_LIFETIME)]
    pub cache_lifetime: Duration,

    /// Store key material inside the file footer. If false, key material is
    /// written to a separate file next to the data file, which enables master
    /// key rotation for immutable files.
    #[builder(default = true)]
    pub internal_key_material: bool,

    /// Length of randomly generated data encryption keys, in bits.
    /// Can be 128, 192 or 256.
    #[builder(default = DEFAULT_DATA_KEY_LENGTH_BITS)]
    pub data_key_length_bits: u32,
}

impl EncryptionConfiguration {
    /// Checks the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.footer_key.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigurationInvalid,
                "Footer master key id must not be empty",
            ));
        }

        let has_column_keys = !self.column_keys.is_empty();
        if has_column_keys == self.uniform_encryption {
            return Err(Error::new(
                ErrorKind::ConfigurationInvalid,
                "Exactly one of column keys and uniform encryption must be set",
            )
            .with_context("column_keys", self.column_keys.clone())
            .with_context("uniform_encryption", self.uniform_encryption.to_string()));
        }

        self.data_key_length_bytes().map(|_| ())
    }

    /// Data key length in bytes, validating the configured bit length.
    pub(crate) fn data_key_length_bytes(&self) -> Result<usize> {
        match self.data_key_length_bits {
            128 | 192 | 256 => Ok(self.data_key_length_bits as usize / 8),
            other => Err(Error::new(
                ErrorKind::ConfigurationInvalid,
                format!("Data key length must be 128, 192 or 256 bits, got {other}"),
            )),
        }
    }
}

/// High level configuration for decrypting files.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DecryptionConfiguration {
    /// Lifetime of cached entities (key encryption keys, KMS client objects).
    #[builder(default = DEFAULT_CACHE_LIFETIME)]
    pub cache_lifetime: Duration,
}

impl Default for DecryptionConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EncryptionConfiguration::builder()
            .footer_key("kf")
            .uniform_encryption(true)
            .build();

        assert!(config.double_wrapping);
        assert!(config.internal_key_material);
        assert!(!config.plaintext_footer);
        assert_eq!(config.cipher_algorithm, CipherAlgorithm::AesGcmV1);
        assert_eq!(config.cache_lifetime, Duration::from_secs(600));
        assert_eq!(config.data_key_length_bits, 128);
        config.validate().unwrap();
    }

    #[test]
    fn test_column_keys_and_uniform_are_exclusive() {
        let both = EncryptionConfiguration::builder()
            .footer_key("kf")
            .column_keys("k1: a")
            .uniform_encryption(true)
            .build();
        assert!(both.validate().is_err());

        let neither = EncryptionConfiguration::builder().footer_key("kf").build();
        assert!(neither.validate().is_err());
    }

    #[test]
    fn test_empty_footer_key_rejected() {
        let config = EncryptionConfiguration::builder()
            .footer_key("")
            .uniform_encryption(true)
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_key_length_validation() {
        for bits in [128u32, 192, 256] {
            let config = EncryptionConfiguration::builder()
                .footer_key("kf")
                .uniform_encryption(true)
                .data_key_length_bits(bits)
                .build();
            config.validate().unwrap();
        }

        let config = EncryptionConfiguration::builder()
            .footer_key("kf")
            .uniform_encryption(true)
            .data_key_length_bits(512)
            .build();
        assert!(config.validate().is_err());
    }
}
