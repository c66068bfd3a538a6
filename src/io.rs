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

//! File system abstraction for external key material.
//!
//! The crate does not implement storage; it only reads and writes key
//! material side files through this narrow trait. Implementations must
//! provide an atomic `rename`, which master key rotation relies on for crash
//! safety.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{Error, ErrorKind, Result};

/// Blob storage for key material side files.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Reads the full content of the file at `path`.
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Writes `data` to `path`, replacing any existing file.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Atomically renames `from` to `to`, replacing `to` if it exists.
    ///
    /// Atomicity is a precondition: after a crash at any point, `to` must
    /// hold either its old content or the full new content, never a mix.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Returns whether a file exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local disk file system backed by `tokio::fs`.
///
/// `rename` maps to `std::fs::rename` semantics, which is atomic within one
/// file system on POSIX platforms.
#[derive(Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Creates a new local file system.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| Error::from(e).with_context("path", path))?;
        Ok(Bytes::from(content))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        tokio::fs::write(path, &data)
            .await
            .map_err(|e| Error::from(e).with_context("path", path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| Error::from(e).with_context("from", from).with_context("to", to))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path)
            .await
            .map_err(|e| Error::from(e).with_context("path", path))?)
    }
}

/// In-memory file system for tests.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    files: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryFileSystem {
    /// Creates a new empty in-memory file system.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FileSystem for InMemoryFileSystem {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let files = self.files.read().await;
        files.get(path).cloned().ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "File not found").with_context("path", path)
        })
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let mut files = self.files.write().await;
        files.insert(path.to_string(), data);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write().await;
        let data = files.remove(from).ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "File not found").with_context("path", from)
        })?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let files = self.files.read().await;
        Ok(files.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let fs = InMemoryFileSystem::new();
        assert!(!fs.exists("a").await.unwrap());

        fs.write("a", Bytes::from_static(b"content")).await.unwrap();
        assert!(fs.exists("a").await.unwrap());
        assert_eq!(fs.read("a").await.unwrap(), Bytes::from_static(b"content"));
    }

    #[tokio::test]
    async fn test_in_memory_rename_replaces() {
        let fs = InMemoryFileSystem::new();
        fs.write("old", Bytes::from_static(b"old")).await.unwrap();
        fs.write("tmp", Bytes::from_static(b"new")).await.unwrap();

        fs.rename("tmp", "old").await.unwrap();
        assert_eq!(fs.read("old").await.unwrap(), Bytes::from_static(b"new"));
        assert!(!fs.exists("tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_rename_missing_source() {
        let fs = InMemoryFileSystem::new();
        assert!(fs.rename("nope", "dest").await.is_err());
    }

    #[tokio::test]
    async fn test_local_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = dir.path().join("blob").to_string_lossy().to_string();

        fs.write(&path, Bytes::from_static(b"content")).await.unwrap();
        assert!(fs.exists(&path).await.unwrap());
        assert_eq!(fs.read(&path).await.unwrap(), Bytes::from_static(b"content"));

        let path2 = dir.path().join("blob2").to_string_lossy().to_string();
        fs.rename(&path, &path2).await.unwrap();
        assert!(!fs.exists(&path).await.unwrap());
        assert_eq!(fs.read(&path2).await.unwrap(), Bytes::from_static(b"content"));
    }
}
