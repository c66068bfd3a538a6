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

//! Envelope-encryption key management for Parquet-style columnar files.
//!
//! This crate translates high level encryption intent (which columns, which
//! master keys, wrapping mode) into per-column data encryption keys wrapped
//! through a pluggable KMS, and recovers those keys on read. Wrapped-key
//! round trips to the KMS are cached with a TTL, and files with external key
//! material support in-place master key rotation.
//!
//! The entry point is [`CryptoFactory`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use parquet_key_management::{
//!     CryptoFactory, EncryptionConfiguration, KmsConnectionConfig, LocalWrapKms,
//!     LocalWrapKmsFactory,
//! };
//!
//! # async fn example() -> parquet_key_management::Result<()> {
//! let factory = CryptoFactory::new();
//! let kms = Arc::new(LocalWrapKms::new_with_master_key("kf", vec![0u8; 16]));
//! factory.register_kms_client_factory(Arc::new(LocalWrapKmsFactory::new(kms)))?;
//!
//! let encryption_config = EncryptionConfiguration::builder()
//!     .footer_key("kf")
//!     .column_keys("kc1:id,address;kc2:phone")
//!     .build();
//!
//! let file_encryption_properties = factory
//!     .get_file_encryption_properties(
//!         &KmsConnectionConfig::default(),
//!         &encryption_config,
//!         None,
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod column_spec;
pub mod config;
pub mod crypto;
mod crypto_factory;
pub mod io;
pub mod key_material;
mod key_toolkit;
mod key_unwrapper;
mod key_wrapper;
pub mod kms;
mod properties;

pub use config::{DecryptionConfiguration, EncryptionConfiguration};
pub use crypto::{CipherAlgorithm, SecureKey};
pub use crypto_factory::CryptoFactory;
pub use key_toolkit::KeyEncryptionKey;
pub use key_unwrapper::FileKeyUnwrapper;
pub use kms::{
    KmsClient, KmsClientFactory, KmsConnectionConfig, LocalWrapKms, LocalWrapKmsFactory,
};
pub use properties::{
    ColumnEncryptionProperties, FileDecryptionProperties, FileEncryptionProperties,
};
