// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Environment-driven configuration for the repo server core.

use crate::error::{self, Result};
use chrono::Duration;
use snafu::ResultExt;

/// Settings for the repo server core.
#[derive(Debug, Clone)]
pub struct RepoServerConfig {
    /// How long a newly produced targets role is valid.
    pub targets_expiry: Duration,
    /// How long a newly produced snapshot role is valid.
    pub snapshot_expiry: Duration,
    /// How long a newly produced timestamp role is valid.
    pub timestamp_expiry: Duration,
    /// A timestamp within this window of expiry is re-signed on read.
    pub timestamp_refresh_window: Duration,
    /// How far a re-signed timestamp's expiry is pushed out.
    pub timestamp_extension: Duration,
    /// Page size when a listing request does not name one.
    pub default_page_limit: u64,
    /// Hard cap on the page size of listing requests.
    pub max_page_limit: u64,
    /// Hard cap on uploaded target content.
    pub max_target_bytes: u64,
}

impl Default for RepoServerConfig {
    fn default() -> Self {
        Self {
            targets_expiry: Duration::days(31),
            snapshot_expiry: Duration::days(1),
            timestamp_expiry: Duration::days(1),
            timestamp_refresh_window: Duration::hours(1),
            timestamp_extension: Duration::days(1),
            default_page_limit: 50,
            max_page_limit: 1000,
            max_target_bytes: 3_000_000_000,
        }
    }
}

impl RepoServerConfig {
    /// Reads settings from the environment, falling back to the defaults
    /// above for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(days) = read_env("TUF_REPOSERVER_TARGETS_EXPIRY_DAYS")? {
            config.targets_expiry = Duration::days(days);
        }
        if let Some(days) = read_env("TUF_REPOSERVER_SNAPSHOT_EXPIRY_DAYS")? {
            config.snapshot_expiry = Duration::days(days);
        }
        if let Some(days) = read_env("TUF_REPOSERVER_TIMESTAMP_EXPIRY_DAYS")? {
            config.timestamp_expiry = Duration::days(days);
        }
        if let Some(limit) = read_env("TUF_REPOSERVER_DEFAULT_PAGE_LIMIT")? {
            config.default_page_limit = limit.unsigned_abs();
        }
        if let Some(limit) = read_env("TUF_REPOSERVER_MAX_PAGE_LIMIT")? {
            config.max_page_limit = limit.unsigned_abs();
        }
        if let Some(bytes) = read_env("TUF_REPOSERVER_MAX_TARGET_BYTES")? {
            config.max_target_bytes = bytes.unsigned_abs();
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
