// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rendering of command results

use k8slaunch::config::Config;
use k8slaunch::kubernetes::{LogOutcome, ResourceHandle, Terminal};
use serde::Serialize;
use std::io::{self, Write};

use crate::cli::OutputFormat;

/// A command result that can be printed in any output format
pub trait Report: Serialize {
    /// Human readable form
    fn text(&self) -> String;

    fn render(&self, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Text => self.text(),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
            }
            OutputFormat::Yaml => serde_yaml::to_string(self).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EndpointReport {
    pub url: String,
}

impl Report for EndpointReport {
    fn text(&self) -> String {
        self.url.clone()
    }
}

/// Summary printed after the log lines
#[derive(Debug, Serialize)]
pub struct LogSummary {
    pub pod: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub chunks: usize,
}

impl LogSummary {
    pub fn failed(&self) -> bool {
        self.status == "failed"
    }

    /// Write the summary to `diagnostics` in any format
    ///
    /// Stdout carries the raw log lines, so the summary never goes there.
    pub fn report(&self, format: &OutputFormat, diagnostics: &mut impl Write) -> io::Result<()> {
        writeln!(diagnostics, "{}", self.render(format))
    }
}

impl From<&LogOutcome> for LogSummary {
    fn from(outcome: &LogOutcome) -> Self {
        let (status, reason, message) = match &outcome.terminal {
            Terminal::Eligible => ("started", None, None),
            Terminal::PodFailed { reason, message } => ("failed", reason.clone(), message.clone()),
        };
        Self {
            pod: outcome.pod.clone(),
            status,
            reason,
            message,
            chunks: outcome.chunks,
        }
    }
}

impl Report for LogSummary {
    fn text(&self) -> String {
        if !self.failed() {
            return format!("Pod {} finished streaming logs", self.pod);
        }
        let mut out = format!("Pod {} failed to launch", self.pod);
        if let Some(reason) = &self.reason {
            out.push_str(&format!(": {}", reason));
        }
        if let Some(message) = &self.message {
            out.push_str(&format!(" ({})", message));
        }
        out
    }
}

impl Report for ResourceHandle {
    fn text(&self) -> String {
        format!("{} {}/{} created", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedReport {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl Report for DeletedReport {
    fn text(&self) -> String {
        format!("{} {}/{} deleted", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Serialize)]
pub struct SecretReport {
    pub name: String,
    pub namespace: String,
    pub exists: bool,
}

impl Report for SecretReport {
    fn text(&self) -> String {
        let state = if self.exists { "exists" } else { "does not exist" };
        format!("secret {}/{} {}", self.namespace, self.name, state)
    }
}

impl Report for Config {
    fn text(&self) -> String {
        let show = |v: Option<String>| v.unwrap_or_else(|| "(unset)".to_string());
        [
            format!("context:          {}", show(self.context.clone())),
            format!("namespace:        {}", show(self.namespace.clone())),
            format!(
                "timeout:          {}",
                show(self.watch.timeout_secs.map(|s| format!("{}s", s)))
            ),
            format!(
                "pending limit:    {}",
                show(self.watch.pending_limit.map(|n| n.to_string()))
            ),
            format!(
                "log idle timeout: {}",
                show(self.watch.log_idle_timeout_secs.map(|s| format!("{}s", s)))
            ),
        ]
        .join("\n")
    }
}
