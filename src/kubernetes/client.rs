// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster credential resolution
//!
//! Credentials are resolved once at startup and the resulting client is
//! handed to every component explicitly.

use anyhow::{Context, Result};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Token mounted into every pod with a service account
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single read from the API.
/// Watches idle between events, so this stays well above the server-side
/// watch window.
const READ_TIMEOUT: Duration = Duration::from_secs(330);

/// What a client will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    /// Watches and request/response calls
    Api,
    /// Followed log streams. A training job can go quiet for a long time,
    /// so only the caller's idle timeout bounds a read.
    LogStream,
}

impl ClientProfile {
    fn apply(self, config: &mut Config) {
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = match self {
            ClientProfile::Api => Some(READ_TIMEOUT),
            ClientProfile::LogStream => None,
        };
    }
}

/// Where cluster credentials come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Service account of the pod we run in
    InCluster,
    /// Local kubeconfig, optionally pinned to a context
    Kubeconfig { context: Option<String> },
}

impl CredentialSource {
    /// In-cluster when a service account token is mounted, kubeconfig otherwise
    pub fn detect(context: Option<&str>) -> Self {
        Self::detect_with(Path::new(SERVICE_ACCOUNT_TOKEN), context)
    }

    fn detect_with(token: &Path, context: Option<&str>) -> Self {
        // An explicit context always means the caller wants kubeconfig
        if context.is_none() && token.exists() {
            CredentialSource::InCluster
        } else {
            CredentialSource::Kubeconfig {
                context: context.map(String::from),
            }
        }
    }

    /// Load the client configuration for this source
    pub async fn config(&self) -> Result<Config> {
        let mut config = match self {
            CredentialSource::InCluster => {
                Config::incluster().context("Failed to load in-cluster configuration")?
            }
            CredentialSource::Kubeconfig { context } => Config::from_kubeconfig(
                &KubeConfigOptions {
                    context: context.clone(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| match context {
                Some(ctx) => format!("Failed to load kubeconfig for context '{}'", ctx),
                None => "Failed to load kubeconfig".to_string(),
            })?,
        };

        ClientProfile::Api.apply(&mut config);
        Ok(config)
    }

    /// Resolve credentials and build the process-wide client
    pub async fn connect(&self) -> Result<Client> {
        let start = Instant::now();
        let config = self.config().await?;
        let client = self.build(config, ClientProfile::Api)?;
        info!(
            source = %self,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Connected to cluster"
        );
        Ok(client)
    }

    /// Resolve credentials once and build an API client plus a log stream client
    pub async fn connect_with_logs(&self) -> Result<(Client, Client)> {
        let start = Instant::now();
        let config = self.config().await?;
        let api = self.build(config.clone(), ClientProfile::Api)?;
        let logs = self.build(config, ClientProfile::LogStream)?;
        info!(
            source = %self,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Connected to cluster"
        );
        Ok((api, logs))
    }

    fn build(&self, mut config: Config, profile: ClientProfile) -> Result<Client> {
        profile.apply(&mut config);
        debug!(
            source = %self,
            cluster = %config.cluster_url,
            namespace = %config.default_namespace,
            profile = ?profile,
            "Loaded cluster configuration"
        );
        Client::try_from(config).with_context(|| format!("Failed to create client from {}", self))
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::InCluster => f.write_str("in-cluster service account"),
            CredentialSource::Kubeconfig { context: Some(ctx) } => {
                write!(f, "kubeconfig context '{}'", ctx)
            }
            CredentialSource::Kubeconfig { context: None } => f.write_str("kubeconfig"),
        }
    }
}
