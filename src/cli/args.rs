// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use k8slaunch::kubernetes::{Selector, WorkloadKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "k8slaunch")]
#[command(
    author,
    version,
    about = "Launch Kubernetes workloads and follow them until they are reachable or their logs are available"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Kubeconfig context to use (implies kubeconfig credentials even in-cluster)
    #[arg(short, long, global = true, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Namespace (defaults to the saved config, then the context's namespace)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for a prediction service to get an external address and print its URL
    Endpoint {
        /// Label selector of the service, e.g. "app=predictor,fairing-id=abc"
        #[arg(short = 'l', long)]
        selector: Selector,

        #[command(flatten)]
        limits: WatchLimits,
    },

    /// Wait for a workload's pod to start (or fail) and stream its logs
    Logs {
        /// Workload name, used in messages
        name: String,

        /// Label selector of the workload's pods
        #[arg(short = 'l', long)]
        selector: Selector,

        /// Container to read logs from (defaults to the pod's only container)
        #[arg(long, default_value = "")]
        container: String,

        /// Print the logs collected so far instead of following them
        #[arg(long)]
        no_follow: bool,

        #[command(flatten)]
        limits: WatchLimits,
    },

    /// Create a workload from a JSON or YAML manifest
    Create {
        /// job, training-job, deployment, serving-resource or secret
        kind: WorkloadKind,

        /// Manifest file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete a workload
    Delete {
        /// job, training-job, deployment, serving-resource or secret
        kind: WorkloadKind,

        name: String,
    },

    /// Check whether a secret exists
    SecretExists { name: String },

    /// Show or change saved defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the saved watch limits
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct WatchLimits {
    /// Give up if the watch has not finished after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Give up after this many Pending pod events
    #[arg(long, value_name = "COUNT")]
    pub pending_limit: Option<u32>,

    /// Give up on a log stream that is silent this many seconds
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the saved configuration
    Show,

    /// Update saved defaults; only the given values change
    Set {
        #[arg(long)]
        default_context: Option<String>,

        #[arg(long)]
        default_namespace: Option<String>,

        #[command(flatten)]
        limits: WatchLimits,
    },

    /// Remove all saved defaults
    Reset,
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}
