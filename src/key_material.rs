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

//! Key material and key metadata documents.
//!
//! `KeyMaterial` is the wrapped-key record for one logical key (the footer
//! key or one column key group). `KeyMetadata` is the envelope stored in the
//! file footer's key-metadata field: either the full material inline
//! (internal storage) or a reference into the side file (external storage).
//!
//! Both use the cross-language Parquet key management JSON format, so files
//! written here are readable by the Java and C++ key tools and vice versa.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Format/version tag of the key material documents.
pub const KEY_MATERIAL_TYPE: &str = "PKMT1";

/// Key id of the footer key record inside a key material store.
pub const FOOTER_KEY_ID_IN_FILE: &str = "footerKey";

/// Key id prefix of column key records inside a key material store.
pub const COLUMN_KEY_ID_IN_FILE_PREFIX: &str = "columnKey";

/// The wrapped-key artifact for one logical key.
///
/// Created during encryption, consumed lazily during decryption, rewritten in
/// place during master key rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    /// Format version tag; always [`KEY_MATERIAL_TYPE`].
    pub key_material_type: String,

    /// Whether this record is stored inside the file footer or in a side
    /// file.
    pub internal_storage: bool,

    /// Whether this record protects the footer key.
    pub is_footer_key: bool,

    /// ID of the master key protecting this record.
    #[serde(rename = "masterKeyID")]
    pub master_key_id: String,

    /// Wrapping mode: true for DEK -> KEK -> master key, false for
    /// DEK -> master key.
    pub double_wrapping: bool,

    /// The wrapped data encryption key. Under double wrapping this is a
    /// base64 AES-GCM blob sealed with the KEK; under single wrapping it is
    /// the KMS client's opaque wrapped string.
    #[serde(rename = "wrappedDEK")]
    pub wrapped_dek: String,

    /// Base64 id of the key encryption key; present iff double wrapping.
    #[serde(rename = "kekID", skip_serializing_if = "Option::is_none")]
    pub kek_id: Option<String>,

    /// KMS-wrapped key encryption key; present iff double wrapping.
    #[serde(rename = "wrappedKEK", skip_serializing_if = "Option::is_none")]
    pub wrapped_kek: Option<String>,
}

impl KeyMaterial {
    /// Parses a key material record from its JSON form.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let material: KeyMaterial = serde_json::from_slice(bytes)?;
        if material.key_material_type != KEY_MATERIAL_TYPE {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Unsupported key material type: {}",
                    material.key_material_type
                ),
            ));
        }
        if material.double_wrapping && (material.kek_id.is_none() || material.wrapped_kek.is_none())
        {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Double wrapped key material is missing its KEK fields",
            ));
        }
        Ok(material)
    }

    /// Serializes this record to its JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Reference to an externally stored key material record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReference {
    /// Format version tag; always [`KEY_MATERIAL_TYPE`].
    pub key_material_type: String,

    /// Always false for a reference.
    pub internal_storage: bool,

    /// Key id of the referenced record inside the side file.
    pub key_reference: String,
}

/// The key-metadata document stored in a file footer.
///
/// Internal storage embeds the full key material; external storage carries a
/// reference resolved against the side file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyMetadata {
    /// Key material embedded in the footer.
    Internal(KeyMaterial),
    /// Key material stored in the side file.
    External(KeyReference),
}

impl KeyMetadata {
    /// Wraps key material for internal storage.
    pub fn internal(material: KeyMaterial) -> Self {
        KeyMetadata::Internal(material)
    }

    /// Builds a reference to a record stored externally.
    pub fn external(key_id_in_file: impl Into<String>) -> Self {
        KeyMetadata::External(KeyReference {
            key_material_type: KEY_MATERIAL_TYPE.to_string(),
            internal_storage: false,
            key_reference: key_id_in_file.into(),
        })
    }

    /// Parses a key metadata document from its JSON form.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let metadata: KeyMetadata = serde_json::from_slice(bytes)?;
        let material_type = match &metadata {
            KeyMetadata::Internal(material) => &material.key_material_type,
            KeyMetadata::External(reference) => &reference.key_material_type,
        };
        if material_type != KEY_MATERIAL_TYPE {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Unsupported key material type: {material_type}"),
            ));
        }
        Ok(metadata)
    }

    /// Serializes this document to its JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The side-file record set: key id in file -> key material.
///
/// `BTreeMap` keeps the serialized form deterministic, which makes rotation
/// rewrites byte-comparable in tests.
pub type KeyMaterialStore = BTreeMap<String, KeyMaterial>;

/// Key id under which a column's material is stored in the side file.
pub fn column_key_id_in_file(column_path: &str) -> String {
    format!("{COLUMN_KEY_ID_IN_FILE_PREFIX}.{column_path}")
}

/// Path of the key material side file for a data file.
///
/// The side file lives next to the data file:
/// `_KEY_MATERIAL_FOR_<data file name>.json`.
pub fn key_material_file_path(file_path: &str) -> String {
    match file_path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/_KEY_MATERIAL_FOR_{name}.json"),
        None => format!("_KEY_MATERIAL_FOR_{file_path}.json"),
    }
}

/// Serializes a key material store to its side-file JSON form.
pub fn serialize_key_material_store(store: &KeyMaterialStore) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(store)?)
}

/// Parses a key material store from its side-file JSON form.
pub fn parse_key_material_store(bytes: &[u8]) -> Result<KeyMaterialStore> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn double_wrapped_material() -> KeyMaterial {
        KeyMaterial {
            key_material_type: KEY_MATERIAL_TYPE.to_string(),
            internal_storage: true,
            is_footer_key: true,
            master_key_id: "kf".to_string(),
            double_wrapping: true,
            wrapped_dek: "d2Rlaw==".to_string(),
            kek_id: Some("a2VraWQ=".to_string()),
            wrapped_kek: Some("0:d2tlaw==".to_string()),
        }
    }

    #[test]
    fn test_key_material_roundtrip() {
        let material = double_wrapped_material();
        let bytes = material.to_bytes().unwrap();
        let parsed = KeyMaterial::parse(&bytes).unwrap();
        assert_eq!(parsed, material);
    }

    #[test]
    fn test_key_material_field_names_match_format() {
        let bytes = double_wrapped_material().to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for field in [
            "keyMaterialType",
            "internalStorage",
            "isFooterKey",
            "masterKeyID",
            "doubleWrapping",
            "wrappedDEK",
            "kekID",
            "wrappedKEK",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_single_wrapped_material_omits_kek_fields() {
        let material = KeyMaterial {
            double_wrapping: false,
            kek_id: None,
            wrapped_kek: None,
            ..double_wrapped_material()
        };
        let bytes = material.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("kekID").is_none());
        assert!(json.get("wrappedKEK").is_none());

        assert_eq!(KeyMaterial::parse(&bytes).unwrap(), material);
    }

    #[test]
    fn test_double_wrapped_material_requires_kek_fields() {
        let material = KeyMaterial {
            kek_id: None,
            wrapped_kek: None,
            ..double_wrapped_material()
        };
        let bytes = material.to_bytes().unwrap();
        assert!(KeyMaterial::parse(&bytes).is_err());
    }

    #[test]
    fn test_unknown_material_type_rejected() {
        let material = KeyMaterial {
            key_material_type: "PKMT9".to_string(),
            ..double_wrapped_material()
        };
        let bytes = material.to_bytes().unwrap();
        assert!(KeyMaterial::parse(&bytes).is_err());
    }

    #[test]
    fn test_key_metadata_internal_roundtrip() {
        let metadata = KeyMetadata::internal(double_wrapped_material());
        let bytes = metadata.to_bytes().unwrap();
        let parsed = KeyMetadata::parse(&bytes).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_key_metadata_external_roundtrip() {
        let metadata = KeyMetadata::external("columnKey.c1");
        let bytes = metadata.to_bytes().unwrap();
        match KeyMetadata::parse(&bytes).unwrap() {
            KeyMetadata::External(reference) => {
                assert_eq!(reference.key_reference, "columnKey.c1");
                assert!(!reference.internal_storage);
            }
            other => panic!("expected external reference, got {other:?}"),
        }
    }

    #[test]
    fn test_key_metadata_rejects_garbage() {
        assert!(KeyMetadata::parse(b"not json").is_err());
        assert!(KeyMetadata::parse(b"{\"foo\": 1}").is_err());
    }

    #[test]
    fn test_side_file_path() {
        assert_eq!(
            key_material_file_path("/data/part-0.parquet"),
            "/data/_KEY_MATERIAL_FOR_part-0.parquet.json"
        );
        assert_eq!(
            key_material_file_path("part-0.parquet"),
            "_KEY_MATERIAL_FOR_part-0.parquet.json"
        );
    }

    #[test]
    fn test_key_material_store_roundtrip() {
        let mut store = KeyMaterialStore::new();
        store.insert(
            FOOTER_KEY_ID_IN_FILE.to_string(),
            double_wrapped_material(),
        );
        store.insert(column_key_id_in_file("c1"), KeyMaterial {
            is_footer_key: false,
            internal_storage: false,
            ..double_wrapped_material()
        });

        let bytes = serialize_key_material_store(&store).unwrap();
        let parsed = parse_key_material_store(&bytes).unwrap();
        assert_eq!(parsed, store);
    }
}
