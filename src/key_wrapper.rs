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

//! Per-file key wrapping.
//!
//! A [`FileKeyWrapper`] is scoped to a single file-encryption call. It wraps
//! the file's data encryption keys in single or double mode, and under
//! external key material storage accumulates the file's key material records
//! for the side file.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crypto::{AesGcmKeyEncryptor, SecureKey};
use crate::key_material::{KeyMaterial, KeyMaterialStore, KeyMetadata, KEY_MATERIAL_TYPE};
use crate::key_toolkit::KeyToolkit;
use crate::kms::KmsConnectionConfig;
use crate::{Error, ErrorKind, Result};

/// Wraps data encryption keys for one file.
pub(crate) struct FileKeyWrapper {
    toolkit: Arc<KeyToolkit>,
    kms_connection_config: KmsConnectionConfig,
    double_wrapping: bool,
    cache_lifetime: Duration,
    /// Accumulated side-file records; `Some` iff external key material.
    key_material_store: Option<KeyMaterialStore>,
}

impl FileKeyWrapper {
    pub(crate) fn new(
        toolkit: Arc<KeyToolkit>,
        kms_connection_config: KmsConnectionConfig,
        double_wrapping: bool,
        cache_lifetime: Duration,
        internal_key_material: bool,
    ) -> Self {
        Self {
            toolkit,
            kms_connection_config,
            double_wrapping,
            cache_lifetime,
            key_material_store: (!internal_key_material).then(KeyMaterialStore::new),
        }
    }

    /// Wraps one data encryption key under `master_key_id`.
    ///
    /// Single wrapping issues one KMS call per unique (DEK, master key) pair.
    /// Double wrapping seals the DEK locally under the toolkit's cached KEK
    /// for this master key, so many DEKs share one KMS wrap per cache
    /// lifetime.
    pub(crate) async fn wrap_key(
        &self,
        dek: &SecureKey,
        master_key_id: &str,
        is_footer_key: bool,
    ) -> Result<KeyMaterial> {
        let kms_client = self
            .toolkit
            .get_kms_client(&self.kms_connection_config, self.cache_lifetime)
            .await?;

        let internal_storage = self.key_material_store.is_none();

        if self.double_wrapping {
            let token = self.kms_connection_config.key_access_token().await;
            let kek = self
                .toolkit
                .get_or_create_kek(&kms_client, master_key_id, token, self.cache_lifetime)
                .await?;

            let encryptor = AesGcmKeyEncryptor::new(SecureKey::new(kek.as_bytes().to_vec())?);
            let sealed = encryptor.encrypt(dek.as_bytes(), &kek.kek_id()?)?;

            Ok(KeyMaterial {
                key_material_type: KEY_MATERIAL_TYPE.to_string(),
                internal_storage,
                is_footer_key,
                master_key_id: master_key_id.to_string(),
                double_wrapping: true,
                wrapped_dek: BASE64.encode(sealed),
                kek_id: Some(kek.encoded_kek_id().to_string()),
                wrapped_kek: Some(kek.wrapped().to_string()),
            })
        } else {
            tracing::debug!(master_key_id, "wrapping data key directly via KMS");
            let wrapped_dek = kms_client.wrap_key(dek.as_bytes(), master_key_id).await?;

            Ok(KeyMaterial {
                key_material_type: KEY_MATERIAL_TYPE.to_string(),
                internal_storage,
                is_footer_key,
                master_key_id: master_key_id.to_string(),
                double_wrapping: false,
                wrapped_dek,
                kek_id: None,
                wrapped_kek: None,
            })
        }
    }

    /// Produces the key metadata bytes for one logical key, recording the
    /// material in the side-file store when external.
    ///
    /// Columns sharing a group's data key call this once each with the same
    /// material; the wrapping work is not repeated.
    pub(crate) fn key_metadata(
        &mut self,
        key_id_in_file: &str,
        material: KeyMaterial,
    ) -> Result<Vec<u8>> {
        match &mut self.key_material_store {
            None => KeyMetadata::internal(material).to_bytes(),
            Some(store) => {
                if store
                    .insert(key_id_in_file.to_string(), material)
                    .is_some()
                {
                    return Err(Error::new(
                        ErrorKind::Unexpected,
                        format!("Duplicate key id in key material store: {key_id_in_file}"),
                    ));
                }
                KeyMetadata::external(key_id_in_file).to_bytes()
            }
        }
    }

    /// The accumulated side-file records, if this wrapper stores key material
    /// externally.
    pub(crate) fn into_key_material_store(self) -> Option<KeyMaterialStore> {
        self.key_material_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_material::FOOTER_KEY_ID_IN_FILE;
    use crate::kms::{LocalWrapKms, LocalWrapKmsFactory};

    fn toolkit_with_kms(kms: Arc<LocalWrapKms>) -> Arc<KeyToolkit> {
        let toolkit = KeyToolkit::new();
        toolkit
            .register_kms_client_factory(Arc::new(LocalWrapKmsFactory::new(kms)))
            .unwrap();
        Arc::new(toolkit)
    }

    #[tokio::test]
    async fn test_single_wrapping_material_shape() {
        let kms = Arc::new(LocalWrapKms::new_with_master_key("k1", vec![0u8; 16]));
        let toolkit = toolkit_with_kms(kms);
        let wrapper = FileKeyWrapper::new(
            toolkit,
            KmsConnectionConfig::default(),
            false,
            Duration::from_secs(60),
            true,
        );

        let dek = SecureKey::generate(16).unwrap();
        let material = wrapper.wrap_key(&dek, "k1", true).await.unwrap();

        assert!(!material.double_wrapping);
        assert!(material.internal_storage);
        assert!(material.is_footer_key);
        assert_eq!(material.master_key_id, "k1");
        assert!(material.kek_id.is_none());
        assert!(material.wrapped_kek.is_none());
    }

    #[tokio::test]
    async fn test_double_wrapping_reuses_kek() {
        let kms = Arc::new(LocalWrapKms::new_with_master_key("k1", vec![0u8; 16]));
        let toolkit = toolkit_with_kms(kms);
        let wrapper = FileKeyWrapper::new(
            toolkit,
            KmsConnectionConfig::default(),
            true,
            Duration::from_secs(60),
            true,
        );

        let dek1 = SecureKey::generate(16).unwrap();
        let dek2 = SecureKey::generate(16).unwrap();
        let m1 = wrapper.wrap_key(&dek1, "k1", false).await.unwrap();
        let m2 = wrapper.wrap_key(&dek2, "k1", false).await.unwrap();

        assert_eq!(m1.kek_id, m2.kek_id);
        assert_eq!(m1.wrapped_kek, m2.wrapped_kek);
        assert_ne!(m1.wrapped_dek, m2.wrapped_dek);
    }

    #[tokio::test]
    async fn test_external_storage_accumulates_records() {
        let kms = Arc::new(LocalWrapKms::new_with_master_key("k1", vec![0u8; 16]));
        let toolkit = toolkit_with_kms(kms);
        let mut wrapper = FileKeyWrapper::new(
            toolkit,
            KmsConnectionConfig::default(),
            true,
            Duration::from_secs(60),
            false,
        );

        let dek = SecureKey::generate(16).unwrap();
        let material = wrapper.wrap_key(&dek, "k1", true).await.unwrap();
        assert!(!material.internal_storage);

        let metadata_bytes = wrapper
            .key_metadata(FOOTER_KEY_ID_IN_FILE, material)
            .unwrap();
        match KeyMetadata::parse(&metadata_bytes).unwrap() {
            KeyMetadata::External(reference) => {
                assert_eq!(reference.key_reference, FOOTER_KEY_ID_IN_FILE)
            }
            other => panic!("expected external reference, got {other:?}"),
        }

        let store = wrapper.into_key_material_store().unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains_key(FOOTER_KEY_ID_IN_FILE));
    }
}
