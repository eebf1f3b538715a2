// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides an abstraction over target blob storage. Object-store backends
//! implement [`BlobStore`]; [`FsBlobStore`] keeps blobs on a local
//! filesystem and is what tests and local development use.

use crate::error::{self, Result};
use async_trait::async_trait;
use bytes::Bytes;
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tuf_schema::{RepoId, TargetFilename};
use uuid::Uuid;

/// Storage for target content, addressed by repository and target path.
/// All operations are idempotent on `(repo_id, filename)`.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    /// Stores `content`, replacing anything already there.
    async fn put(&self, repo_id: RepoId, filename: &TargetFilename, content: &[u8]) -> Result<()>;

    /// Fetches the content, or `None` when the blob is absent.
    async fn fetch(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<Option<Bytes>>;

    /// Whether the blob is present.
    async fn exists(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<bool>;

    /// Removes the blob. Idempotent.
    async fn delete(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<()>;
}

/// A blob store on the local filesystem, one directory per repository.
/// Writes go through a temporary file and a rename so readers never observe
/// partial content.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, repo_id: RepoId, filename: &TargetFilename) -> PathBuf {
        // TargetFilename validation already rules out traversal components.
        self.root.join(repo_id.to_string()).join(filename.as_str())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, repo_id: RepoId, filename: &TargetFilename, content: &[u8]) -> Result<()> {
        let path = self.blob_path(repo_id, filename);
        let parent = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .context(error::IoSnafu { path: parent })?;
        let staging = parent.join(format!(".upload-{}", Uuid::new_v4()));
        tokio::fs::write(&staging, content)
            .await
            .context(error::IoSnafu { path: &staging })?;
        tokio::fs::rename(&staging, &path)
            .await
            .context(error::IoSnafu { path: &path })?;
        Ok(())
    }

    async fn fetch(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<Option<Bytes>> {
        let path = self.blob_path(repo_id, filename);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(error::IoSnafu { path }),
        }
    }

    async fn exists(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<bool> {
        let path = self.blob_path(repo_id, filename);
        tokio::fs::try_exists(&path)
            .await
            .context(error::IoSnafu { path })
    }

    async fn delete(&self, repo_id: RepoId, filename: &TargetFilename) -> Result<()> {
        let path = self.blob_path(repo_id, filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context(error::IoSnafu { path }),
        }
    }
}
