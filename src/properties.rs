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

//! File-level encryption and decryption properties.
//!
//! These are the hand-off types between this crate and a file writer or
//! reader: [`FileEncryptionProperties`] carries the generated data keys and
//! their key metadata, [`FileDecryptionProperties`] carries a lazy key
//! resolver that unwraps a key only when its column is read.

use std::collections::HashMap;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{CipherAlgorithm, SecureKey};
use crate::key_unwrapper::FileKeyUnwrapper;
use crate::Result;

/// The encryption key and key metadata of one column.
#[derive(Clone)]
pub struct ColumnEncryptionProperties {
    column_path: String,
    key: Arc<SecureKey>,
    key_metadata: Vec<u8>,
    master_key_id: String,
}

impl ColumnEncryptionProperties {
    pub(crate) fn new(
        column_path: String,
        key: Arc<SecureKey>,
        key_metadata: Vec<u8>,
        master_key_id: String,
    ) -> Self {
        Self {
            column_path,
            key,
            key_metadata,
            master_key_id,
        }
    }

    /// Path of the column these properties apply to.
    pub fn column_path(&self) -> &str {
        &self.column_path
    }

    /// The column's data encryption key.
    pub fn key(&self) -> &Arc<SecureKey> {
        &self.key
    }

    /// Key metadata to store with the column, from which the key can later
    /// be recovered.
    pub fn key_metadata(&self) -> &[u8] {
        &self.key_metadata
    }

    /// ID of the master key this column's data key is wrapped with.
    pub fn master_key_id(&self) -> &str {
        &self.master_key_id
    }
}

impl std::fmt::Debug for ColumnEncryptionProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnEncryptionProperties")
            .field("column_path", &self.column_path)
            .field("master_key_id", &self.master_key_id)
            .finish_non_exhaustive()
    }
}

/// Everything a file writer needs to encrypt one file.
pub struct FileEncryptionProperties {
    cipher_algorithm: CipherAlgorithm,
    plaintext_footer: bool,
    uniform_encryption: bool,
    footer_key: Arc<SecureKey>,
    footer_key_metadata: Vec<u8>,
    column_properties: HashMap<String, ColumnEncryptionProperties>,
}

impl FileEncryptionProperties {
    pub(crate) fn new(
        cipher_algorithm: CipherAlgorithm,
        plaintext_footer: bool,
        uniform_encryption: bool,
        footer_key: Arc<SecureKey>,
        footer_key_metadata: Vec<u8>,
        column_properties: HashMap<String, ColumnEncryptionProperties>,
    ) -> Self {
        Self {
            cipher_algorithm,
            plaintext_footer,
            uniform_encryption,
            footer_key,
            footer_key_metadata,
            column_properties,
        }
    }

    /// The cipher the file should be encrypted with.
    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        self.cipher_algorithm
    }

    /// Whether the footer is written in plaintext (and only signed with the
    /// footer key) rather than encrypted.
    pub fn plaintext_footer(&self) -> bool {
        self.plaintext_footer
    }

    /// Whether the whole file is encrypted with the single footer key.
    pub fn uniform_encryption(&self) -> bool {
        self.uniform_encryption
    }

    /// The footer encryption (or signing) key.
    pub fn footer_key(&self) -> &Arc<SecureKey> {
        &self.footer_key
    }

    /// Key metadata to store in the footer, from which the footer key can
    /// later be recovered.
    pub fn footer_key_metadata(&self) -> &[u8] {
        &self.footer_key_metadata
    }

    /// Per-column properties, keyed by column path. Empty under uniform
    /// encryption.
    pub fn column_properties(&self) -> &HashMap<String, ColumnEncryptionProperties> {
        &self.column_properties
    }

    /// Properties of one column, if it is encrypted with its own key.
    pub fn column(&self, column_path: &str) -> Option<&ColumnEncryptionProperties> {
        self.column_properties.get(column_path)
    }
}

impl std::fmt::Debug for FileEncryptionProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEncryptionProperties")
            .field("cipher_algorithm", &self.cipher_algorithm)
            .field("plaintext_footer", &self.plaintext_footer)
            .field("uniform_encryption", &self.uniform_encryption)
            .field("columns", &self.column_properties.keys())
            .finish_non_exhaustive()
    }
}

/// Everything a file reader needs to decrypt one file.
///
/// Holds no keys itself; each key is recovered from its key metadata on
/// demand through the shared KMS client and key-encryption-key caches.
#[derive(Clone)]
pub struct FileDecryptionProperties {
    key_unwrapper: Arc<FileKeyUnwrapper>,
}

impl FileDecryptionProperties {
    pub(crate) fn new(key_unwrapper: Arc<FileKeyUnwrapper>) -> Self {
        Self { key_unwrapper }
    }

    /// The lazy key resolver for this file.
    pub fn key_unwrapper(&self) -> &Arc<FileKeyUnwrapper> {
        &self.key_unwrapper
    }

    /// Recovers the data encryption key described by `key_metadata`, as
    /// stored in the footer or a column chunk.
    pub async fn retrieve_key(&self, key_metadata: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.key_unwrapper.unwrap_key(key_metadata).await
    }
}

impl std::fmt::Debug for FileDecryptionProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDecryptionProperties")
            .finish_non_exhaustive()
    }
}
