// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Environment-driven configuration for the key server core.

use crate::error::{self, Result};
use chrono::Duration;
use snafu::ResultExt;

/// Settings for the key server core and its key generation engine.
#[derive(Debug, Clone)]
pub struct KeyServerConfig {
    /// How long a newly produced root role is valid.
    pub root_expiry: Duration,
    /// Upper bound on key generation requests processed per poll.
    pub keygen_batch_size: usize,
    /// How often the key generation engine polls for work.
    pub keygen_poll_interval: std::time::Duration,
}

impl Default for KeyServerConfig {
    fn default() -> Self {
        Self {
            root_expiry: Duration::days(365),
            keygen_batch_size: 1024,
            keygen_poll_interval: std::time::Duration::from_secs(1),
        }
    }
}

impl KeyServerConfig {
    /// Reads settings from the environment, falling back to the defaults
    /// above for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(days) = read_env("TUF_KEYSERVER_ROOT_EXPIRY_DAYS")? {
            config.root_expiry = Duration::days(days);
        }
        if let Some(size) = read_env("TUF_KEYSERVER_KEYGEN_BATCH_SIZE")? {
            config.keygen_batch_size = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(millis) = read_env("TUF_KEYSERVER_KEYGEN_POLL_MILLIS")? {
            config.keygen_poll_interval = std::time::Duration::from_millis(millis.unsigned_abs());
        }
        Ok(config)
    }
}

fn read_env(variable: &str) -> Result<Option<i64>> {
    match std::env::var(variable) {
        Ok(value) => Ok(Some(value.parse().context(error::ConfigSnafu { variable })?)),
        Err(_) => Ok(None),
    }
}
