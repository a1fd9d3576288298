// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod output;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use kube::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use cli::{Args, Command, ConfigAction, OutputFormat, WatchLimits};
use k8slaunch::config::{self, Config};
use k8slaunch::kubernetes::{
    CredentialSource, EndpointDiscovery, KubeEventSource, KubeLogSource, KubeResourceClient,
    LogRequest, PodLogs, ResourceClient, WatchOptions, WriterSink,
};
use k8slaunch::progress::{ProgressHandle, WatchUpdate, create_progress_handle, create_spinner};
use output::{DeletedReport, EndpointReport, LogSummary, Report, SecretReport};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keeping 5 files
    let log_path = log_dir.join("k8slaunch.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(guard);

    let filter = if verbose {
        "k8slaunch=debug"
    } else {
        "k8slaunch=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Ignoring saved config: {:#}", e);
            Config::default()
        }
    };

    let context = args.context.clone().or_else(|| config.context.clone());
    let namespace = args.namespace.clone().or_else(|| config.namespace.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling watch");
                cancel.cancel();
            }
        });
    }

    let progress = create_progress_handle();

    match args.command {
        Command::Endpoint { selector, limits } => {
            let (client, namespace) = connect(context.as_deref(), namespace).await?;
            let options = watch_options(&config, &limits, cancel);
            let discovery =
                EndpointDiscovery::new(Arc::new(KubeEventSource::new(client)), Arc::clone(&progress));

            let url = with_spinner(
                &progress,
                "Waiting for prediction endpoint...",
                discovery.discover(&namespace, &selector, &options),
            )
            .await?;

            println!("{}", EndpointReport { url }.render(&args.output));
        }

        Command::Logs {
            name,
            selector,
            container,
            no_follow,
            limits,
        } => {
            let (client, log_client) = CredentialSource::detect(context.as_deref())
                .connect_with_logs()
                .await?;
            let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
            let options = watch_options(&config, &limits, cancel);
            let logs = PodLogs::new(
                Arc::new(KubeEventSource::new(client)),
                Arc::new(KubeLogSource::new(log_client)),
                Arc::clone(&progress),
            );
            let request = LogRequest {
                name: name.clone(),
                namespace,
                selector,
                container,
                follow: !no_follow,
            };

            let mut sink = WriterSink(std::io::stdout());
            let outcome = with_spinner(
                &progress,
                &format!("Waiting for {} to start...", name),
                logs.stream(&request, &options, &mut sink),
            )
            .await?;

            let summary = LogSummary::from(&outcome);
            summary.report(&args.output, &mut std::io::stderr())?;
            if summary.failed() {
                std::process::exit(1);
            }
        }

        Command::Create { kind, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read manifest {}", file.display()))?;
            // YAML is a superset of JSON, so this reads both
            let spec: serde_json::Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse manifest {}", file.display()))?;

            let (client, namespace) = connect(context.as_deref(), namespace).await?;
            let handle = KubeResourceClient::new(client)
                .create(kind, &namespace, spec)
                .await?;
            println!("{}", handle.render(&args.output));
        }

        Command::Delete { kind, name } => {
            let (client, namespace) = connect(context.as_deref(), namespace).await?;
            KubeResourceClient::new(client)
                .delete(kind, &name, &namespace)
                .await?;
            let report = DeletedReport {
                kind: kind.to_string(),
                name,
                namespace,
            };
            println!("{}", report.render(&args.output));
        }

        Command::SecretExists { name } => {
            let (client, namespace) = connect(context.as_deref(), namespace).await?;
            let exists = KubeResourceClient::new(client)
                .secret_exists(&name, &namespace)
                .await?;
            let report = SecretReport {
                name,
                namespace,
                exists,
            };
            println!("{}", report.render(&args.output));
            if !exists {
                std::process::exit(1);
            }
        }

        // Config commands never talk to the cluster
        Command::Config { action } => run_config(&action, config.clone(), &args.output)?,
    }

    Ok(())
}

/// Resolve credentials once and pick the namespace to work in
async fn connect(context: Option<&str>, namespace: Option<String>) -> Result<(Client, String)> {
    let client = CredentialSource::detect(context).connect().await?;
    let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
    Ok((client, namespace))
}

/// Saved watch limits, overridden by command line flags
fn watch_options(config: &Config, limits: &WatchLimits, cancel: CancellationToken) -> WatchOptions {
    let saved = config.watch_options();
    WatchOptions {
        timeout: limits.timeout.map(Duration::from_secs).or(saved.timeout),
        pending_limit: limits.pending_limit.or(saved.pending_limit),
        log_idle_timeout: limits
            .idle_timeout
            .map(Duration::from_secs)
            .or(saved.log_idle_timeout),
        cancel,
    }
}

fn run_config(action: &ConfigAction, mut config: Config, format: &OutputFormat) -> Result<()> {
    match action {
        ConfigAction::Show => {}
        ConfigAction::Set {
            default_context,
            default_namespace,
            limits,
        } => {
            if let Some(ctx) = default_context {
                config.context = Some(ctx.clone());
            }
            if let Some(ns) = default_namespace {
                config.namespace = Some(ns.clone());
            }
            if let Some(secs) = limits.timeout {
                config.watch.timeout_secs = Some(secs);
            }
            if let Some(limit) = limits.pending_limit {
                config.watch.pending_limit = Some(limit);
            }
            if let Some(secs) = limits.idle_timeout {
                config.watch.log_idle_timeout_secs = Some(secs);
            }
            config.save()?;
        }
        ConfigAction::Reset => {
            config = Config::default();
            config.save()?;
        }
    }
    println!("{}", config.render(format));
    Ok(())
}

/// Run `fut` while a spinner on stderr shows what the watch is waiting on
///
/// The spinner is cleared as soon as log lines start flowing to stdout.
async fn with_spinner<F: Future>(progress: &ProgressHandle, msg: &str, fut: F) -> F::Output {
    let spinner = create_spinner(msg);
    let mut progress_rx = progress.subscribe();
    tokio::pin!(fut);

    let result = loop {
        tokio::select! {
            biased;
            update = progress_rx.recv() => {
                match update {
                    Ok(WatchUpdate::WaitingForEndpoint { namespace, selector }) => {
                        spinner.set_message(format!("Waiting for service {} in {}...", selector, namespace));
                    }
                    Ok(WatchUpdate::PodPending { pod }) => {
                        spinner.set_message(format!("Pod {} is pending...", pod));
                    }
                    Ok(WatchUpdate::PodStarted { pod }) => {
                        spinner.set_message(format!("Pod {} started, attaching to logs...", pod));
                    }
                    Ok(WatchUpdate::LogOpened { .. }) => {
                        spinner.finish_and_clear();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Progress updates dropped");
                    }
                    Err(RecvError::Closed) => break (&mut fut).await,
                }
            }
            result = &mut fut => {
                break result;
            }
        }
    };

    spinner.finish_and_clear();
    result
}
