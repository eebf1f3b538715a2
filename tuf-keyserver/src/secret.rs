// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides an abstraction over the store holding private key material. This
//! allows private keys to live in, for example, a vault service or a cloud
//! provider's parameter store, while the rest of the system only handles
//! opaque references.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::RwLock;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::RepoId;

/// A store for private key material, addressed by repository and key ID.
///
/// Keys are written exactly once and deleted at most once; deleting a key
/// that is already gone is a no-op ("taking a key offline" is idempotent).
#[async_trait]
pub trait SecretStore: Debug + Send + Sync {
    /// Stores the private half of a keypair as a PKCS#8 PEM document.
    async fn put(&self, repo_id: RepoId, key_id: &Decoded<Hex>, private_pem: &str) -> Result<()>;

    /// Fetches a private key, or `None` when the key is offline.
    async fn get(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<Option<String>>;

    /// Deletes a private key, taking it offline. Idempotent.
    async fn delete(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<()>;
}

/// An in-memory secret store for tests and local development.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    inner: RwLock<HashMap<(RepoId, Decoded<Hex>), String>>,
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, repo_id: RepoId, key_id: &Decoded<Hex>, private_pem: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .insert((repo_id, key_id.clone()), private_pem.to_string());
        Ok(())
    }

    async fn get(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<Option<String>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(repo_id, key_id.clone()))
            .cloned())
    }

    async fn delete(&self, repo_id: RepoId, key_id: &Decoded<Hex>) -> Result<()> {
        self.inner.write().await.remove(&(repo_id, key_id.clone()));
        Ok(())
    }
}
