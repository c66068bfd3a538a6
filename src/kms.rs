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

//! KMS client trait and implementations.
//!
//! This module provides a pluggable interface for key wrapping and unwrapping
//! operations with Key Management Services (KMS). Master keys never leave KMS
//! custody; the crate only ever sends key bytes to be wrapped or wrapped
//! strings to be unwrapped.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::RwLock;
use typed_builder::TypedBuilder;
use zeroize::Zeroizing;

use crate::crypto::{AesGcmKeyEncryptor, SecureKey};
use crate::{Error, ErrorKind, Result};

/// Access token used when the KMS requires none.
pub const DEFAULT_ACCESS_TOKEN: &str = "DEFAULT";

/// Connection parameters for a KMS instance.
///
/// The access token is shared and refreshable: every clone of a config sees a
/// token update, so long-running readers keep working after a credential
/// rotation. Cache partitioning identity is (instance id, access token).
#[derive(Clone, TypedBuilder)]
pub struct KmsConnectionConfig {
    /// ID of the KMS instance holding the master keys.
    #[builder(default, setter(into))]
    pub kms_instance_id: String,

    /// URL of the KMS instance.
    #[builder(default, setter(into))]
    pub kms_instance_url: String,

    /// Authorization token passed to the KMS.
    #[builder(default = Arc::new(RwLock::new(DEFAULT_ACCESS_TOKEN.to_string())))]
    key_access_token: Arc<RwLock<String>>,

    /// Additional vendor specific parameters, passed through opaquely.
    #[builder(default)]
    pub custom_kms_conf: HashMap<String, String>,
}

impl Default for KmsConnectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KmsConnectionConfig {
    /// Returns the current access token.
    pub async fn key_access_token(&self) -> String {
        self.key_access_token.read().await.clone()
    }

    /// Replaces the access token, affecting all clones of this config.
    pub async fn refresh_key_access_token(&self, token: String) {
        *self.key_access_token.write().await = token;
    }
}

impl std::fmt::Debug for KmsConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The token is a credential and must never reach logs.
        f.debug_struct("KmsConnectionConfig")
            .field("kms_instance_id", &self.kms_instance_id)
            .field("kms_instance_url", &self.kms_instance_url)
            .field("custom_kms_conf", &self.custom_kms_conf)
            .finish()
    }
}

/// Trait for KMS clients that wrap and unwrap key bytes under a named master
/// key.
///
/// Implementations of this trait provide integration with various KMS
/// services (AWS KMS, Azure Key Vault, GCP KMS, etc.). Both operations are
/// remote calls; clients may apply their own retry policy, which this crate
/// does not override.
#[async_trait::async_trait]
pub trait KmsClient: Send + Sync {
    /// Wraps key bytes with the master key identified by `master_key_id`.
    ///
    /// Returns an opaque wrapped-key string; its layout is the client's own
    /// business and is only ever handed back to [`Self::unwrap_key`].
    async fn wrap_key(&self, key_bytes: &[u8], master_key_id: &str) -> Result<String>;

    /// Unwraps a wrapped-key string with the master key identified by
    /// `master_key_id`, returning the plaintext key bytes.
    async fn unwrap_key(
        &self,
        wrapped_key: &str,
        master_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>>;
}

/// Factory producing a [`KmsClient`] for given connection parameters.
///
/// A factory must be registered with the
/// [`CryptoFactory`](crate::CryptoFactory) exactly once before any key
/// retrieval call.
#[async_trait::async_trait]
pub trait KmsClientFactory: Send + Sync {
    /// Creates a client connected to the instance the config describes.
    async fn create_client(&self, config: &KmsConnectionConfig) -> Result<Arc<dyn KmsClient>>;
}

/// In-memory KMS for testing and development.
///
/// Stores master keys in memory and wraps with AES-GCM, with the master key
/// id bound as AAD. Master keys are versioned: replacing a key's bytes keeps
/// the old versions available for unwrapping, modelling the version semantics
/// real KMS backends apply during master key rotation.
///
/// # Security Warning
/// This implementation is for testing only. Master keys are stored in memory
/// without secure storage or access controls.
pub struct LocalWrapKms {
    /// Master key versions indexed by key ID; the last entry is current.
    /// Retired versions keep their slot as `None` so version numbers stay
    /// stable.
    keys: Arc<RwLock<HashMap<String, Vec<Option<Vec<u8>>>>>>,
}

impl LocalWrapKms {
    /// Creates a new in-memory KMS with no keys.
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a new in-memory KMS with a single master key.
    pub fn new_with_master_key(key_id: impl Into<String>, master_key: Vec<u8>) -> Self {
        let mut keys = HashMap::new();
        keys.insert(key_id.into(), vec![Some(master_key)]);
        Self {
            keys: Arc::new(RwLock::new(keys)),
        }
    }

    /// Adds a master key, or rotates it to a new version if the id exists.
    pub async fn add_master_key(&self, key_id: impl Into<String>, master_key: Vec<u8>) {
        let mut keys = self.keys.write().await;
        keys.entry(key_id.into()).or_default().push(Some(master_key));
    }

    /// Retires all but the current version of a master key.
    ///
    /// Unwrapping material wrapped under a retired version fails, modelling
    /// a backend that deletes old versions after rotation.
    pub async fn retire_old_versions(&self, key_id: &str) {
        let mut keys = self.keys.write().await;
        if let Some(versions) = keys.get_mut(key_id) {
            let current = versions.len() - 1;
            for version in &mut versions[..current] {
                *version = None;
            }
        }
    }

    async fn master_key_version(&self, key_id: &str, version: Option<usize>) -> Result<Vec<u8>> {
        let keys = self.keys.read().await;
        let versions = keys.get(key_id).ok_or_else(|| {
            Error::new(
                ErrorKind::KmsFailure,
                format!("Master key not found: {key_id}"),
            )
        })?;
        let (index, bytes) = match version {
            Some(v) => (v, versions.get(v).and_then(Option::as_ref)),
            None => (versions.len() - 1, versions.last().and_then(Option::as_ref)),
        };
        bytes.cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::KmsFailure,
                format!("Master key version not found: {key_id} v{index}"),
            )
        })
    }

    async fn current_version(&self, key_id: &str) -> Result<usize> {
        let keys = self.keys.read().await;
        keys.get(key_id)
            .map(|versions| versions.len() - 1)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::KmsFailure,
                    format!("Master key not found: {key_id}"),
                )
            })
    }
}

impl Default for LocalWrapKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KmsClient for LocalWrapKms {
    async fn wrap_key(&self, key_bytes: &[u8], master_key_id: &str) -> Result<String> {
        let version = self.current_version(master_key_id).await?;
        let master_key = self.master_key_version(master_key_id, Some(version)).await?;

        let encryptor = AesGcmKeyEncryptor::new(SecureKey::new(master_key)?);
        let wrapped = encryptor.encrypt(key_bytes, master_key_id.as_bytes())?;

        // The wrapped string records the master key version used, so that
        // unwrapping resolves the same version even after rotation.
        Ok(format!("{version}:{}", BASE64.encode(wrapped)))
    }

    async fn unwrap_key(
        &self,
        wrapped_key: &str,
        master_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let (version, encoded) = wrapped_key.split_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::KmsFailure,
                "Malformed wrapped key: missing version prefix",
            )
        })?;
        let version: usize = version.parse().map_err(|_| {
            Error::new(
                ErrorKind::KmsFailure,
                format!("Malformed wrapped key version: {version}"),
            )
        })?;

        let master_key = self.master_key_version(master_key_id, Some(version)).await?;
        let blob = BASE64.decode(encoded)?;

        let encryptor = AesGcmKeyEncryptor::new(SecureKey::new(master_key)?);
        encryptor.decrypt(&blob, master_key_id.as_bytes())
    }
}

/// Factory for [`LocalWrapKms`] clients.
///
/// Hands out the same shared key store for every connection, so tests can
/// rotate master keys underneath live clients.
pub struct LocalWrapKmsFactory {
    kms: Arc<LocalWrapKms>,
}

impl LocalWrapKmsFactory {
    /// Creates a factory serving the given KMS instance.
    pub fn new(kms: Arc<LocalWrapKms>) -> Self {
        Self { kms }
    }
}

#[async_trait::async_trait]
impl KmsClientFactory for LocalWrapKmsFactory {
    async fn create_client(&self, _config: &KmsConnectionConfig) -> Result<Arc<dyn KmsClient>> {
        Ok(self.kms.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_wrap_kms_roundtrip() {
        let kms = LocalWrapKms::new_with_master_key("test-key", vec![0u8; 16]);

        let dek = b"data_encryption_";
        let wrapped = kms.wrap_key(dek, "test-key").await.unwrap();
        assert_ne!(wrapped.as_bytes(), dek);

        let unwrapped = kms.unwrap_key(&wrapped, "test-key").await.unwrap();
        assert_eq!(&unwrapped[..], dek);
    }

    #[tokio::test]
    async fn test_local_wrap_kms_missing_key() {
        let kms = LocalWrapKms::new();
        let result = kms.wrap_key(b"dek", "nonexistent").await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::KmsFailure);
    }

    #[tokio::test]
    async fn test_local_wrap_kms_wrong_master_key() {
        let kms = LocalWrapKms::new();
        kms.add_master_key("key1", vec![1u8; 16]).await;
        kms.add_master_key("key2", vec![2u8; 16]).await;

        let wrapped = kms.wrap_key(b"dek bytes 123456", "key1").await.unwrap();
        assert!(kms.unwrap_key(&wrapped, "key2").await.is_err());
    }

    #[tokio::test]
    async fn test_local_wrap_kms_versioning() {
        let kms = LocalWrapKms::new_with_master_key("k1", vec![1u8; 16]);

        let wrapped_v0 = kms.wrap_key(b"old version dek!", "k1").await.unwrap();

        // Rotate the master key; old wrapped keys must still unwrap.
        kms.add_master_key("k1", vec![9u8; 16]).await;
        let unwrapped = kms.unwrap_key(&wrapped_v0, "k1").await.unwrap();
        assert_eq!(&unwrapped[..], b"old version dek!");

        // New wraps use the latest version.
        let wrapped_v1 = kms.wrap_key(b"new version dek!", "k1").await.unwrap();
        assert!(wrapped_v1.starts_with("1:"));
        assert!(wrapped_v0.starts_with("0:"));
    }

    #[tokio::test]
    async fn test_local_wrap_kms_retired_version_no_longer_unwraps() {
        let kms = LocalWrapKms::new_with_master_key("k1", vec![1u8; 16]);
        let wrapped_v0 = kms.wrap_key(b"old version dek!", "k1").await.unwrap();

        kms.add_master_key("k1", vec![9u8; 16]).await;
        let wrapped_v1 = kms.wrap_key(b"new version dek!", "k1").await.unwrap();
        kms.retire_old_versions("k1").await;

        let err = kms.unwrap_key(&wrapped_v0, "k1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KmsFailure);

        let unwrapped = kms.unwrap_key(&wrapped_v1, "k1").await.unwrap();
        assert_eq!(&unwrapped[..], b"new version dek!");
    }

    #[tokio::test]
    async fn test_connection_config_token_refresh() {
        let config = KmsConnectionConfig::default();
        let clone = config.clone();
        assert_eq!(config.key_access_token().await, DEFAULT_ACCESS_TOKEN);

        config.refresh_key_access_token("token2".to_string()).await;
        assert_eq!(clone.key_access_token().await, "token2");
    }

    #[tokio::test]
    async fn test_connection_config_debug_hides_token() {
        let config = KmsConnectionConfig::builder().kms_instance_id("inst").build();
        config
            .refresh_key_access_token("secret-token".to_string())
            .await;
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("inst"));
    }
}
