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

//! The crypto factory, entry point of the crate.
//!
//! A [`CryptoFactory`] is created once per process (or per KMS account) and
//! shared across all file reads and writes. It owns the KMS client and
//! key-encryption-key caches, so concurrent files encrypted against the same
//! master keys share KMS round trips.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::column_spec::parse_column_keys;
use crate::config::{DecryptionConfiguration, EncryptionConfiguration};
use crate::crypto::SecureKey;
use crate::io::FileSystem;
use crate::key_material::{
    column_key_id_in_file, key_material_file_path, parse_key_material_store,
    serialize_key_material_store, FOOTER_KEY_ID_IN_FILE,
};
use crate::key_toolkit::KeyToolkit;
use crate::key_unwrapper::FileKeyUnwrapper;
use crate::key_wrapper::FileKeyWrapper;
use crate::kms::{KmsClientFactory, KmsConnectionConfig};
use crate::properties::{
    ColumnEncryptionProperties, FileDecryptionProperties, FileEncryptionProperties,
};
use crate::{Error, ErrorKind, Result};

/// Translates encryption configuration into per-file encryption and
/// decryption properties, wrapping and unwrapping data keys through a
/// pluggable KMS.
pub struct CryptoFactory {
    key_toolkit: Arc<KeyToolkit>,
}

impl CryptoFactory {
    /// Creates a factory with empty caches and no KMS client factory
    /// registered.
    pub fn new() -> Self {
        Self {
            key_toolkit: Arc::new(KeyToolkit::new()),
        }
    }

    /// Registers the KMS client factory used to connect to the KMS.
    ///
    /// Must be called exactly once, before any encryption or decryption
    /// properties are requested. A second call fails with
    /// [`ErrorKind::ConfigurationInvalid`].
    pub fn register_kms_client_factory(
        &self,
        kms_client_factory: Arc<dyn KmsClientFactory>,
    ) -> Result<()> {
        self.key_toolkit
            .register_kms_client_factory(kms_client_factory)
    }

    /// Generates the data encryption keys for one file and wraps them
    /// through the KMS, per the encryption configuration.
    ///
    /// `file_path` and `file_system` locate the data file about to be
    /// written; they are required when the configuration stores key material
    /// externally, in which case the key material side file is written next
    /// to the data file before this returns.
    pub async fn get_file_encryption_properties(
        &self,
        kms_connection_config: &KmsConnectionConfig,
        encryption_config: &EncryptionConfiguration,
        file_path: Option<&str>,
        file_system: Option<Arc<dyn FileSystem>>,
    ) -> Result<FileEncryptionProperties> {
        encryption_config.validate()?;

        if !encryption_config.internal_key_material
            && (file_path.is_none() || file_system.is_none())
        {
            return Err(Error::new(
                ErrorKind::ConfigurationInvalid,
                "External key material requires a file path and file system to write the key \
                 material file",
            ));
        }

        let dek_length = encryption_config.data_key_length_bytes()?;

        let mut wrapper = FileKeyWrapper::new(
            self.key_toolkit.clone(),
            kms_connection_config.clone(),
            encryption_config.double_wrapping,
            encryption_config.cache_lifetime,
            encryption_config.internal_key_material,
        );

        // Footer key material is produced even for plaintext footers, which
        // are signed with the footer key instead of encrypted.
        let footer_key = Arc::new(SecureKey::generate(dek_length)?);
        let footer_material = wrapper
            .wrap_key(&footer_key, &encryption_config.footer_key, true)
            .await?;
        let footer_key_metadata = wrapper.key_metadata(FOOTER_KEY_ID_IN_FILE, footer_material)?;

        let mut column_properties = HashMap::new();
        if !encryption_config.uniform_encryption {
            for group in parse_column_keys(&encryption_config.column_keys)? {
                // One data key per group; every column in the group shares it.
                let group_key = Arc::new(SecureKey::generate(dek_length)?);
                let group_material = wrapper
                    .wrap_key(&group_key, &group.master_key_id, false)
                    .await?;

                for column_path in group.columns {
                    let key_metadata = wrapper.key_metadata(
                        &column_key_id_in_file(&column_path),
                        group_material.clone(),
                    )?;
                    column_properties.insert(
                        column_path.clone(),
                        ColumnEncryptionProperties::new(
                            column_path,
                            group_key.clone(),
                            key_metadata,
                            group.master_key_id.clone(),
                        ),
                    );
                }
            }
        }

        if let Some(store) = wrapper.into_key_material_store() {
            // Checked above; external storage always has path and fs here.
            let (file_path, file_system) = match (file_path, file_system) {
                (Some(path), Some(fs)) => (path, fs),
                _ => {
                    return Err(Error::new(
                        ErrorKind::Unexpected,
                        "Key material store produced without a file path and file system",
                    ))
                }
            };
            let side_file = key_material_file_path(file_path);
            tracing::debug!(side_file, records = store.len(), "writing key material file");
            file_system
                .write(&side_file, Bytes::from(serialize_key_material_store(&store)?))
                .await?;
        }

        Ok(FileEncryptionProperties::new(
            encryption_config.cipher_algorithm,
            encryption_config.plaintext_footer,
            encryption_config.uniform_encryption,
            footer_key,
            footer_key_metadata,
            column_properties,
        ))
    }

    /// Returns decryption properties holding a lazy key resolver for one
    /// file.
    ///
    /// No KMS interaction happens here; keys are unwrapped when the reader
    /// first asks for them. `file_path` and `file_system` are needed only to
    /// read files whose key material is stored externally.
    pub fn get_file_decryption_properties(
        &self,
        kms_connection_config: &KmsConnectionConfig,
        decryption_config: &DecryptionConfiguration,
        file_path: Option<&str>,
        file_system: Option<Arc<dyn FileSystem>>,
    ) -> FileDecryptionProperties {
        let unwrapper = FileKeyUnwrapper::new(
            self.key_toolkit.clone(),
            kms_connection_config.clone(),
            decryption_config.cache_lifetime,
            file_path.map(str::to_string),
            file_system,
        );
        FileDecryptionProperties::new(Arc::new(unwrapper))
    }

    /// Re-wraps every key material record of one file under the current
    /// version of its master key.
    ///
    /// Only files with external key material can be rotated. The old records
    /// are unwrapped through the KMS, which resolves the key version each
    /// record was wrapped with, and re-wrapped under the same master key id
    /// so the backend's latest version is used. The rewritten side file
    /// replaces the old one atomically; a crash mid-rotation leaves the old
    /// side file intact and readable.
    pub async fn rotate_master_keys(
        &self,
        kms_connection_config: &KmsConnectionConfig,
        file_path: &str,
        file_system: Arc<dyn FileSystem>,
        double_wrapping: bool,
        cache_lifetime: Duration,
    ) -> Result<()> {
        // KEKs and clients cached before rotation may be wrapped under the
        // old master key version; drop them so rotation sees current state.
        self.key_toolkit.remove_cache_entries_for_all_tokens().await;

        let side_file = key_material_file_path(file_path);
        if !file_system.exists(&side_file).await? {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                "Master key rotation requires external key material, but the file has no key \
                 material file",
            )
            .with_context("file_path", file_path));
        }

        let store = parse_key_material_store(&file_system.read(&side_file).await?)?;

        let unwrapper = FileKeyUnwrapper::new(
            self.key_toolkit.clone(),
            kms_connection_config.clone(),
            cache_lifetime,
            Some(file_path.to_string()),
            Some(file_system.clone()),
        );

        let mut unwrapped = Vec::with_capacity(store.len());
        for (key_id_in_file, material) in &store {
            if material.internal_storage {
                return Err(Error::new(
                    ErrorKind::FeatureUnsupported,
                    "Master key rotation is not supported for internal key material",
                )
                .with_context("key_id_in_file", key_id_in_file.as_str()));
            }

            let dek = unwrapper.unwrap_key_material(material).await?;
            unwrapped.push((key_id_in_file, material, dek));
        }

        // Unwrapping cached the old KEKs, which are wrapped under the master
        // key versions being rotated away. Drop them so re-wrapping generates
        // fresh KEKs under the current versions.
        self.key_toolkit.remove_cache_entries_for_all_tokens().await;

        let mut wrapper = FileKeyWrapper::new(
            self.key_toolkit.clone(),
            kms_connection_config.clone(),
            double_wrapping,
            cache_lifetime,
            false,
        );
        for (key_id_in_file, material, dek) in unwrapped {
            let rotated = wrapper
                .wrap_key(
                    &SecureKey::new(dek.to_vec())?,
                    &material.master_key_id,
                    material.is_footer_key,
                )
                .await?;
            wrapper.key_metadata(key_id_in_file, rotated)?;
        }

        let rotated_store = wrapper.into_key_material_store().ok_or_else(|| {
            Error::new(
                ErrorKind::Unexpected,
                "Rotation produced no key material store",
            )
        })?;

        tracing::debug!(
            side_file,
            records = rotated_store.len(),
            "rewriting key material file after rotation"
        );
        let temp_file = format!("{side_file}.tmp");
        file_system
            .write(
                &temp_file,
                Bytes::from(serialize_key_material_store(&rotated_store)?),
            )
            .await?;
        file_system.rename(&temp_file, &side_file).await
    }

    /// Evicts every cache entry created under `access_token`.
    pub async fn remove_cache_entries_for_token(&self, access_token: &str) {
        self.key_toolkit
            .remove_cache_entries_for_token(access_token)
            .await;
    }

    /// Flushes the KMS client and key-encryption-key caches entirely.
    pub async fn remove_cache_entries_for_all_tokens(&self) {
        self.key_toolkit.remove_cache_entries_for_all_tokens().await;
    }

    /// Sweeps expired entries from the caches.
    ///
    /// Expired entries are never returned regardless; this only releases
    /// their memory early for long-lived factories.
    pub async fn evict_expired_cache_entries(&self) {
        self.key_toolkit.evict_expired().await;
    }
}

impl Default for CryptoFactory {
    fn default() -> Self {
        Self::new()
    }
}
