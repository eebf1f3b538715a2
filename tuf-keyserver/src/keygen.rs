// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The key generation engine: a background loop that generates keypairs for
//! pending requests, persisting the public half to the key store and the
//! private half to the secret store.

use crate::config::KeyServerConfig;
use crate::error::{self, Result};
use crate::secret::SecretStore;
use crate::store::{KeyGenRequest, KeyGenRequestStore, KeyGenStatus, KeyRecord, KeyStore};
use log::{debug, error, info, warn};
use snafu::ResultExt;
use std::sync::Arc;
use tokio::sync::watch;

/// Failure causes recorded on a request are truncated to this many bytes.
const MAX_CAUSE_LEN: usize = 1024;

/// Processes `request`: generates a keypair, persists both halves, and moves
/// the request to its terminal state. On failure the request is marked
/// `Error` with a truncated cause, and the error is returned to the caller.
pub(crate) async fn generate_and_store(
    requests: &dyn KeyGenRequestStore,
    keys: &dyn KeyStore,
    secrets: &dyn SecretStore,
    request: &KeyGenRequest,
) -> Result<KeyRecord> {
    match try_generate(keys, secrets, request).await {
        Ok(record) => {
            requests
                .set_status(request.id, KeyGenStatus::Generated, None)
                .await?;
            debug!(
                "generated {} key {} for repo {} role {}",
                request.key_type, record.key_id, request.repo_id, request.role_type
            );
            Ok(record)
        }
        Err(err) => {
            let mut cause = err.to_string();
            if cause.len() > MAX_CAUSE_LEN {
                let mut end = MAX_CAUSE_LEN;
                while !cause.is_char_boundary(end) {
                    end -= 1;
                }
                cause.truncate(end);
            }
            warn!(
                "key generation request {} failed: {}",
                request.id, cause
            );
            requests
                .set_status(request.id, KeyGenStatus::Error, Some(cause))
                .await?;
            Err(err)
        }
    }
}

async fn try_generate(
    keys: &dyn KeyStore,
    secrets: &dyn SecretStore,
    request: &KeyGenRequest,
) -> Result<KeyRecord> {
    let generated = tuf_schema::keygen::generate(request.key_type, request.key_size)
        .await
        .context(error::SchemaSnafu {
            doing: "generating keypair",
        })?;
    let record = KeyRecord {
        key_id: generated.key_id,
        repo_id: request.repo_id,
        role_type: request.role_type,
        public: generated.public,
    };
    keys.persist(&record).await?;
    secrets
        .put(request.repo_id, &record.key_id, &generated.private_pem)
        .await?;
    Ok(record)
}

/// The background scheduler over pending [`KeyGenRequest`]s.
#[derive(Clone)]
pub struct KeyGenEngine {
    requests: Arc<dyn KeyGenRequestStore>,
    keys: Arc<dyn KeyStore>,
    secrets: Arc<dyn SecretStore>,
    config: KeyServerConfig,
}

impl std::fmt::Debug for KeyGenEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyGenEngine {
    /// Creates an engine over the given stores.
    pub fn new(
        requests: Arc<dyn KeyGenRequestStore>,
        keys: Arc<dyn KeyStore>,
        secrets: Arc<dyn SecretStore>,
        config: KeyServerConfig,
    ) -> Self {
        Self {
            requests,
            keys,
            secrets,
            config,
        }
    }

    /// Processes one bounded batch of pending requests, returning how many
    /// were picked up. Individual failures are recorded on the request and do
    /// not abort the batch.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .requests
            .fetch_requested(self.config.keygen_batch_size)
            .await?;
        for request in &batch {
            // generate_and_store records failures on the request itself.
            let _ = generate_and_store(
                self.requests.as_ref(),
                self.keys.as_ref(),
                self.secrets.as_ref(),
                request,
            )
            .await;
        }
        Ok(batch.len())
    }

    /// Polls for pending requests until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.keygen_poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(count) => debug!("processed {count} key generation requests"),
                        Err(err) => error!("key generation pass failed: {err}"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("key generation engine stopping");
                    return;
                }
            }
        }
    }
}
