// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for k8slaunch
//!
//! Stores defaults for the cluster target and watch limits.
//! All k8slaunch data is stored under ~/.k8slaunch/:
//! - ~/.k8slaunch/config.json - user configuration
//! - ~/.k8slaunch/log/ - rolling log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kubernetes::WatchOptions;

/// Get the base k8slaunch directory (~/.k8slaunch/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8slaunch"))
        .context("Could not determine home directory")
}

/// Write a file atomically via a temp file in the same directory
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use tempfile::NamedTempFile;

    let temp_file = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))
        .context("Failed to create temp file")?;

    fs::write(temp_file.path(), content)
        .with_context(|| format!("Failed to write temp file {:?}", temp_file.path()))?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file to {:?}", path))?;

    Ok(())
}

/// Limits for endpoint and log watches; unset means wait forever
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Overall limit for the watch phase, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Give up after this many Pending pod events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_limit: Option<u32>,
    /// Give up on a log stream that is silent this long, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_idle_timeout_secs: Option<u64>,
}

/// k8slaunch configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Kubeconfig context used when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Namespace used when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub watch: WatchSettings,
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        atomic_write(path, content.as_bytes())
    }

    /// Get the config file path (~/.k8slaunch/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    /// Watch limits as options for a new watch (with a fresh cancellation token)
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            timeout: self.watch.timeout_secs.map(Duration::from_secs),
            pending_limit: self.watch.pending_limit,
            log_idle_timeout: self.watch.log_idle_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }
}
