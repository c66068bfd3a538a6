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

//! Per-file key unwrapping.
//!
//! A [`FileKeyUnwrapper`] recovers data encryption keys from key metadata,
//! mirroring the wrapping modes. It is handed to the reader inside
//! [`FileDecryptionProperties`](crate::FileDecryptionProperties) and resolves
//! keys lazily: a column's DEK is unwrapped only when that column is actually
//! read. External key material is loaded from the side file on first use.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::crypto::{AesGcmKeyEncryptor, SecureKey};
use crate::io::FileSystem;
use crate::key_material::{
    key_material_file_path, parse_key_material_store, KeyMaterial, KeyMaterialStore, KeyMetadata,
};
use crate::key_toolkit::{KeyEncryptionKey, KeyToolkit};
use crate::kms::KmsConnectionConfig;
use crate::{Error, ErrorKind, Result};

/// Unwraps data encryption keys for one file.
pub struct FileKeyUnwrapper {
    toolkit: Arc<KeyToolkit>,
    kms_connection_config: KmsConnectionConfig,
    cache_lifetime: Duration,
    /// Data file path and file system; required only for external material.
    file_path: Option<String>,
    file_system: Option<Arc<dyn FileSystem>>,
    /// Side-file records, loaded once on first external reference.
    external_store: OnceCell<KeyMaterialStore>,
}

impl FileKeyUnwrapper {
    pub(crate) fn new(
        toolkit: Arc<KeyToolkit>,
        kms_connection_config: KmsConnectionConfig,
        cache_lifetime: Duration,
        file_path: Option<String>,
        file_system: Option<Arc<dyn FileSystem>>,
    ) -> Self {
        Self {
            toolkit,
            kms_connection_config,
            cache_lifetime,
            file_path,
            file_system,
            external_store: OnceCell::new(),
        }
    }

    /// Recovers the data encryption key described by a key metadata document.
    pub async fn unwrap_key(&self, key_metadata: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match KeyMetadata::parse(key_metadata)? {
            KeyMetadata::Internal(material) => self.unwrap_key_material(&material).await,
            KeyMetadata::External(reference) => {
                let store = self.external_key_material().await?;
                let material = store.get(&reference.key_reference).ok_or_else(|| {
                    Error::new(
                        ErrorKind::DataInvalid,
                        "Key material side file has no record for reference",
                    )
                    .with_context("key_reference", reference.key_reference.clone())
                })?;
                self.unwrap_key_material(material).await
            }
        }
    }

    /// Recovers the data encryption key of one key material record.
    pub(crate) async fn unwrap_key_material(
        &self,
        material: &KeyMaterial,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if material.double_wrapping {
            let encoded_kek_id = material.kek_id.as_deref().ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Double wrapped key material is missing its KEK id",
                )
            })?;
            let wrapped_kek = material.wrapped_kek.as_deref().ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Double wrapped key material is missing its wrapped KEK",
                )
            })?;

            let kek = self
                .resolve_kek(&material.master_key_id, encoded_kek_id, wrapped_kek)
                .await?;

            let sealed_dek = BASE64.decode(&material.wrapped_dek)?;
            let encryptor = AesGcmKeyEncryptor::new(SecureKey::new(kek.as_bytes().to_vec())?);
            encryptor.decrypt(&sealed_dek, &kek.kek_id()?)
        } else {
            let kms_client = self
                .toolkit
                .get_kms_client(&self.kms_connection_config, self.cache_lifetime)
                .await?;
            kms_client
                .unwrap_key(&material.wrapped_dek, &material.master_key_id)
                .await
        }
    }

    /// Returns the KEK named by a key material record, from the toolkit's KEK
    /// cache when its id matches, otherwise by unwrapping via the KMS.
    async fn resolve_kek(
        &self,
        master_key_id: &str,
        encoded_kek_id: &str,
        wrapped_kek: &str,
    ) -> Result<Arc<KeyEncryptionKey>> {
        let token = self.kms_connection_config.key_access_token().await;

        if let Some(kek) = self
            .toolkit
            .get_kek_for_unwrap(master_key_id, token.clone(), encoded_kek_id)
            .await
        {
            return Ok(kek);
        }

        tracing::debug!(master_key_id, "unwrapping KEK via KMS");
        let kms_client = self
            .toolkit
            .get_kms_client(&self.kms_connection_config, self.cache_lifetime)
            .await?;
        let kek_bytes = kms_client.unwrap_key(wrapped_kek, master_key_id).await?;

        let kek = Arc::new(KeyEncryptionKey::new(
            SecureKey::new(kek_bytes.to_vec())?,
            encoded_kek_id.to_string(),
            wrapped_kek.to_string(),
        ));
        self.toolkit
            .cache_unwrapped_kek(master_key_id, token, self.cache_lifetime, kek.clone())
            .await;
        Ok(kek)
    }

    async fn external_key_material(&self) -> Result<&KeyMaterialStore> {
        self.external_store
            .get_or_try_init(|| async {
                let (file_path, file_system) =
                    match (self.file_path.as_deref(), self.file_system.as_ref()) {
                        (Some(path), Some(fs)) => (path, fs),
                        _ => {
                            return Err(Error::new(
                                ErrorKind::ConfigurationInvalid,
                                "File uses external key material but no file path and file \
                                 system were supplied for decryption",
                            ));
                        }
                    };

                let side_file = key_material_file_path(file_path);
                tracing::debug!(side_file, "loading external key material");
                let content = file_system.read(&side_file).await?;
                parse_key_material_store(&content)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_toolkit::KeyToolkit;
    use crate::key_wrapper::FileKeyWrapper;
    use crate::kms::{LocalWrapKms, LocalWrapKmsFactory};

    fn toolkit_with_kms(kms: Arc<LocalWrapKms>) -> Arc<KeyToolkit> {
        let toolkit = KeyToolkit::new();
        toolkit
            .register_kms_client_factory(Arc::new(LocalWrapKmsFactory::new(kms)))
            .unwrap();
        Arc::new(toolkit)
    }

    async fn roundtrip(double_wrapping: bool) {
        let kms = Arc::new(LocalWrapKms::new_with_master_key("k1", vec![0u8; 16]));
        let toolkit = toolkit_with_kms(kms);
        let config = KmsConnectionConfig::default();
        let ttl = Duration::from_secs(60);

        let mut wrapper = FileKeyWrapper::new(
            toolkit.clone(),
            config.clone(),
            double_wrapping,
            ttl,
            true,
        );
        let dek = SecureKey::generate(16).unwrap();
        let material = wrapper.wrap_key(&dek, "k1", true).await.unwrap();
        let metadata = wrapper.key_metadata("footerKey", material).unwrap();

        let unwrapper = FileKeyUnwrapper::new(toolkit, config, ttl, None, None);
        let recovered = unwrapper.unwrap_key(&metadata).await.unwrap();
        assert_eq!(&recovered[..], dek.as_bytes());
    }

    #[tokio::test]
    async fn test_roundtrip_single_wrapping() {
        roundtrip(false).await;
    }

    #[tokio::test]
    async fn test_roundtrip_double_wrapping() {
        roundtrip(true).await;
    }

    #[tokio::test]
    async fn test_external_reference_without_file_system_fails() {
        let kms = Arc::new(LocalWrapKms::new_with_master_key("k1", vec![0u8; 16]));
        let toolkit = toolkit_with_kms(kms);
        let unwrapper = FileKeyUnwrapper::new(
            toolkit,
            KmsConnectionConfig::default(),
            Duration::from_secs(60),
            None,
            None,
        );

        let metadata = KeyMetadata::external("footerKey").to_bytes().unwrap();
        let err = unwrapper.unwrap_key(&metadata).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
    }
}
