// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for long-running watches
//!
//! Watches report what they are waiting on through a broadcast channel, so
//! the CLI can drive a spinner and tests can assert on diagnostics without
//! scraping process output.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug, PartialEq)]
pub enum WatchUpdate {
    // === Endpoint discovery ===
    /// Waiting for a service to get an ingress address
    WaitingForEndpoint { namespace: String, selector: String },
    /// Service resolved to a URL
    EndpointResolved { service: String, url: String },

    // === Pod log acquisition ===
    /// Pod is still Pending
    PodPending { pod: String },
    /// Pod is running and ready, or already succeeded
    PodStarted { pod: String },
    /// Pod failed or was deleted before logs were attached
    PodFailed {
        pod: String,
        reason: Option<String>,
        message: Option<String>,
    },
    /// Log stream attached
    LogOpened { pod: String, container: String },
    /// Log stream released
    LogReleased { pod: String, chunks: usize },

    // === Terminal failures ===
    /// Watch gave up without reaching a terminal state
    WatchAborted { reason: String },
}

/// Broadcasts watch progress to any number of subscribers
pub struct ProgressReporter {
    sender: broadcast::Sender<WatchUpdate>,
    /// Events evaluated by the current watch
    events_seen: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            events_seen: AtomicUsize::new(0),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<WatchUpdate> {
        self.sender.subscribe()
    }

    /// Report a new endpoint watch
    pub fn waiting_for_endpoint(&self, namespace: &str, selector: &str) {
        self.events_seen.store(0, Ordering::SeqCst);
        let _ = self.sender.send(WatchUpdate::WaitingForEndpoint {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        });
    }

    pub fn endpoint_resolved(&self, service: &str, url: &str) {
        let _ = self.sender.send(WatchUpdate::EndpointResolved {
            service: service.to_string(),
            url: url.to_string(),
        });
    }

    /// Count one evaluated watch event
    pub fn event_seen(&self) {
        self.events_seen.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pod_pending(&self, pod: &str) {
        let _ = self.sender.send(WatchUpdate::PodPending {
            pod: pod.to_string(),
        });
    }

    pub fn pod_started(&self, pod: &str) {
        let _ = self.sender.send(WatchUpdate::PodStarted {
            pod: pod.to_string(),
        });
    }

    pub fn pod_failed(&self, pod: &str, reason: Option<&str>, message: Option<&str>) {
        let _ = self.sender.send(WatchUpdate::PodFailed {
            pod: pod.to_string(),
            reason: reason.map(String::from),
            message: message.map(String::from),
        });
    }

    pub fn log_opened(&self, pod: &str, container: &str) {
        let _ = self.sender.send(WatchUpdate::LogOpened {
            pod: pod.to_string(),
            container: container.to_string(),
        });
    }

    pub fn log_released(&self, pod: &str, chunks: usize) {
        let _ = self.sender.send(WatchUpdate::LogReleased {
            pod: pod.to_string(),
            chunks,
        });
    }

    pub fn watch_aborted(&self, reason: &str) {
        let _ = self.sender.send(WatchUpdate::WatchAborted {
            reason: reason.to_string(),
        });
    }

    /// Number of events the current watch has evaluated
    pub fn events_seen(&self) -> usize {
        self.events_seen.load(Ordering::SeqCst)
    }

    /// Reset the event counter at the start of a watch
    pub fn reset(&self) {
        self.events_seen.store(0, Ordering::SeqCst);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}

/// Drain everything currently buffered on a receiver
#[cfg(test)]
pub(crate) fn drain(rx: &mut broadcast::Receiver<WatchUpdate>) -> Vec<WatchUpdate> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter_new() {
        let reporter = ProgressReporter::new();
        assert_eq!(reporter.events_seen(), 0);
    }

    #[test]
    fn test_event_counter_resets_on_new_watch() {
        let reporter = ProgressReporter::default();
        reporter.event_seen();
        reporter.event_seen();
        assert_eq!(reporter.events_seen(), 2);

        reporter.waiting_for_endpoint("default", "app=predictor");
        assert_eq!(reporter.events_seen(), 0);
    }

    #[test]
    fn test_subscribe_receives_updates() {
        let reporter = ProgressReporter::new();
        let mut receiver = reporter.subscribe();

        reporter.pod_failed("train-0", Some("OOMKilled"), None);

        match receiver.try_recv().unwrap() {
            WatchUpdate::PodFailed {
                pod,
                reason,
                message,
            } => {
                assert_eq!(pod, "train-0");
                assert_eq!(reason.as_deref(), Some("OOMKilled"));
                assert!(message.is_none());
            }
            other => panic!("Expected PodFailed update, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_updates() {
        let reporter = ProgressReporter::new();
        let mut receiver = reporter.subscribe();

        reporter.waiting_for_endpoint("default", "app=predictor");
        reporter.endpoint_resolved("predictor", "http://10.0.0.5:5000/predict");
        reporter.pod_pending("p");
        reporter.pod_started("p");
        reporter.log_opened("p", "main");
        reporter.log_released("p", 3);
        reporter.watch_aborted("timeout");

        let updates = drain(&mut receiver);
        assert_eq!(updates.len(), 7);
        assert!(matches!(updates[0], WatchUpdate::WaitingForEndpoint { .. }));
        assert!(matches!(updates[1], WatchUpdate::EndpointResolved { .. }));
        assert!(matches!(updates[2], WatchUpdate::PodPending { .. }));
        assert!(matches!(updates[3], WatchUpdate::PodStarted { .. }));
        assert!(matches!(updates[4], WatchUpdate::LogOpened { .. }));
        assert!(matches!(updates[5], WatchUpdate::LogReleased { chunks: 3, .. }));
        assert!(matches!(updates[6], WatchUpdate::WatchAborted { .. }));
    }

    #[test]
    fn test_send_without_subscribers_is_harmless() {
        let handle = create_progress_handle();
        handle.pod_pending("nobody-listens");
        assert_eq!(handle.events_seen(), 0);
    }
}
