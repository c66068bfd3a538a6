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

//! Key toolkit: TTL caches for KMS clients and key encryption keys.
//!
//! Creating a KMS client and wrapping a key encryption key are expensive
//! remote operations, so both are cached with a lifetime scoped to the
//! calling operation's configuration. Cache misses are single-flight:
//! concurrent lookups for one key join the same in-flight creation instead of
//! issuing duplicate KMS calls. A failed creation is never cached; the next
//! lookup retries.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::OnceCell as SyncOnceCell;
use rand::RngCore;
use tokio::sync::{OnceCell, RwLock};

use crate::crypto::SecureKey;
use crate::kms::{KmsClient, KmsClientFactory, KmsConnectionConfig};
use crate::{Error, ErrorKind, Result};

/// Length in bytes of generated key encryption keys and their ids.
const KEK_LENGTH: usize = 16;

/// A cache entry: creation timestamp, the lifetime it was created under, and
/// a once-cell later joiners wait on.
struct CacheEntry<V> {
    created: Instant,
    ttl: Duration,
    cell: OnceCell<V>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self) -> bool {
        self.created.elapsed() <= self.ttl
    }
}

/// A concurrent TTL cache with single-flight creation.
///
/// Expiry is lazy: an expired entry is replaced at lookup time and never
/// returned, and [`TtlCache::evict_expired`] sweeps leftovers.
pub(crate) struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Arc<CacheEntry<V>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, creating it with `init` on a miss.
    ///
    /// Concurrent callers for the same key block on the same in-flight
    /// creation and all receive the resulting value. If `init` fails the
    /// error propagates to every waiter and nothing is cached.
    pub(crate) async fn get_or_try_init<F, Fut>(&self, key: K, ttl: Duration, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let entry = {
            let mut entries = self.entries.write().await;
            match entries.get(&key) {
                Some(entry) if entry.is_fresh() => entry.clone(),
                _ => {
                    let entry = Arc::new(CacheEntry {
                        created: Instant::now(),
                        ttl,
                        cell: OnceCell::new(),
                    });
                    entries.insert(key, entry.clone());
                    entry
                }
            }
        };

        entry.cell.get_or_try_init(init).await.cloned()
    }

    /// Returns the cached value for `key` if present, initialized and fresh.
    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .and_then(|entry| entry.cell.get().cloned())
    }

    /// Inserts a value directly, replacing any entry for `key`.
    pub(crate) async fn insert(&self, key: K, ttl: Duration, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Arc::new(CacheEntry {
                created: Instant::now(),
                ttl,
                cell: OnceCell::new_with(Some(value)),
            }),
        );
    }

    /// Removes every entry whose key matches the predicate.
    pub(crate) async fn remove_matching(&self, mut predicate: impl FnMut(&K) -> bool) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !predicate(key));
    }

    /// Removes expired entries.
    pub(crate) async fn evict_expired(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_fresh());
    }

    /// Removes all entries.
    pub(crate) async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Cache key of a KMS client: KMS instance identity plus access token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientCacheKey {
    kms_instance_id: String,
    access_token: String,
}

/// Cache key of a key encryption key: master key plus access token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KekCacheKey {
    master_key_id: String,
    access_token: String,
}

/// A locally generated key encryption key, KMS-wrapped under one master key.
///
/// Wrapping the KEK is the expensive remote call double wrapping amortizes:
/// every data key protected by the same master key reuses this KEK within the
/// cache lifetime.
pub struct KeyEncryptionKey {
    key: SecureKey,
    /// Base64 form of the random KEK id; stored in key material records and
    /// bound as AAD when sealing data keys.
    encoded_kek_id: String,
    /// The KEK wrapped by the master key via the KMS.
    wrapped_kek: String,
}

impl KeyEncryptionKey {
    pub(crate) fn new(key: SecureKey, encoded_kek_id: String, wrapped_kek: String) -> Self {
        Self {
            key,
            encoded_kek_id,
            wrapped_kek,
        }
    }

    /// The KEK bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// Base64 id of this KEK.
    pub fn encoded_kek_id(&self) -> &str {
        &self.encoded_kek_id
    }

    /// Raw id bytes of this KEK, used as AAD for sealed data keys.
    pub fn kek_id(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(&self.encoded_kek_id)?)
    }

    /// The KMS-wrapped form of this KEK.
    pub fn wrapped(&self) -> &str {
        &self.wrapped_kek
    }
}

/// Owns the KMS client cache and the KEK cache, and the registered KMS client
/// factory.
///
/// One `KeyToolkit` belongs to one [`CryptoFactory`](crate::CryptoFactory);
/// independent factories share no cache state.
pub struct KeyToolkit {
    kms_client_factory: SyncOnceCell<Arc<dyn KmsClientFactory>>,
    kms_client_cache: TtlCache<ClientCacheKey, Arc<dyn KmsClient>>,
    kek_cache: TtlCache<KekCacheKey, Arc<KeyEncryptionKey>>,
}

impl KeyToolkit {
    pub(crate) fn new() -> Self {
        Self {
            kms_client_factory: SyncOnceCell::new(),
            kms_client_cache: TtlCache::new(),
            kek_cache: TtlCache::new(),
        }
    }

    /// Registers the KMS client factory. Fails if one is already registered.
    pub(crate) fn register_kms_client_factory(
        &self,
        factory: Arc<dyn KmsClientFactory>,
    ) -> Result<()> {
        self.kms_client_factory.set(factory).map_err(|_| {
            Error::new(
                ErrorKind::ConfigurationInvalid,
                "A KMS client factory is already registered",
            )
        })
    }

    /// Returns the KMS client for the given connection, creating it through
    /// the registered factory on a cache miss.
    pub(crate) async fn get_kms_client(
        &self,
        config: &KmsConnectionConfig,
        cache_lifetime: Duration,
    ) -> Result<Arc<dyn KmsClient>> {
        let factory = self.kms_client_factory.get().cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::ConfigurationInvalid,
                "No KMS client factory registered; call register_kms_client_factory before \
                 retrieving encryption or decryption properties",
            )
        })?;

        let key = ClientCacheKey {
            kms_instance_id: config.kms_instance_id.clone(),
            access_token: config.key_access_token().await,
        };

        self.kms_client_cache
            .get_or_try_init(key, cache_lifetime, || async {
                tracing::debug!(
                    kms_instance_id = %config.kms_instance_id,
                    "creating KMS client"
                );
                factory.create_client(config).await
            })
            .await
    }

    /// Returns the key encryption key for `master_key_id`, generating and
    /// KMS-wrapping a fresh one on a cache miss.
    pub(crate) async fn get_or_create_kek(
        &self,
        kms_client: &Arc<dyn KmsClient>,
        master_key_id: &str,
        access_token: String,
        cache_lifetime: Duration,
    ) -> Result<Arc<KeyEncryptionKey>> {
        let key = KekCacheKey {
            master_key_id: master_key_id.to_string(),
            access_token,
        };

        self.kek_cache
            .get_or_try_init(key, cache_lifetime, || async {
                tracing::debug!(master_key_id, "generating and wrapping new KEK");
                let kek = SecureKey::generate(KEK_LENGTH)?;

                let mut kek_id = vec![0u8; KEK_LENGTH];
                OsRng.fill_bytes(&mut kek_id);

                let wrapped = kms_client.wrap_key(kek.as_bytes(), master_key_id).await?;
                Ok(Arc::new(KeyEncryptionKey::new(
                    kek,
                    BASE64.encode(kek_id),
                    wrapped,
                )))
            })
            .await
    }

    /// Returns the cached KEK for `master_key_id` on the unwrap path, if its
    /// id matches the one the key material record names.
    pub(crate) async fn get_kek_for_unwrap(
        &self,
        master_key_id: &str,
        access_token: String,
        encoded_kek_id: &str,
    ) -> Option<Arc<KeyEncryptionKey>> {
        let key = KekCacheKey {
            master_key_id: master_key_id.to_string(),
            access_token,
        };
        self.kek_cache
            .get(&key)
            .await
            .filter(|kek| kek.encoded_kek_id() == encoded_kek_id)
    }

    /// Caches a KEK recovered by unwrapping a key material record.
    pub(crate) async fn cache_unwrapped_kek(
        &self,
        master_key_id: &str,
        access_token: String,
        cache_lifetime: Duration,
        kek: Arc<KeyEncryptionKey>,
    ) {
        let key = KekCacheKey {
            master_key_id: master_key_id.to_string(),
            access_token,
        };
        self.kek_cache.insert(key, cache_lifetime, kek).await;
    }

    /// Evicts every cache entry associated with `access_token`, in both
    /// caches. Used when credentials are revoked or rotated.
    pub(crate) async fn remove_cache_entries_for_token(&self, access_token: &str) {
        self.kms_client_cache
            .remove_matching(|key| key.access_token == access_token)
            .await;
        self.kek_cache
            .remove_matching(|key| key.access_token == access_token)
            .await;
    }

    /// Flushes both caches entirely.
    pub(crate) async fn remove_cache_entries_for_all_tokens(&self) {
        self.kms_client_cache.clear().await;
        self.kek_cache.clear().await;
    }

    /// Sweeps expired entries from both caches.
    pub(crate) async fn evict_expired(&self) {
        self.kms_client_cache.evict_expired().await;
        self.kek_cache.evict_expired().await;
    }
}
