// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Endpoint discovery for prediction services
//!
//! Watches services matching a selector until one of them is assigned a
//! load balancer ingress, then returns the prediction URL for it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{EventSource, ResourceKind, ServiceSnapshot, Snapshot};
use super::selector::Selector;
use super::watch::{Deadline, WatchOptions, next_event};
use crate::error::WatchError;
use crate::progress::ProgressHandle;

/// Port the prediction server listens on
pub const PREDICT_PORT: u16 = 5000;

/// Path of the prediction handler
pub const PREDICT_PATH: &str = "/predict";

/// Resolved prediction URL, or why none was found
pub type DiscoveryResult = Result<String, WatchError>;

/// Build the prediction URL from the first ingress entry, if the service has one
pub fn endpoint_url(svc: &ServiceSnapshot) -> Option<String> {
    let address = svc.ingress.first()?.address()?;
    Some(format!("http://{}:{}{}", address, PREDICT_PORT, PREDICT_PATH))
}

/// Watches services until one becomes reachable
pub struct EndpointDiscovery<S: EventSource> {
    source: Arc<S>,
    progress: ProgressHandle,
}

impl<S: EventSource> EndpointDiscovery<S> {
    pub fn new(source: Arc<S>, progress: ProgressHandle) -> Self {
        Self { source, progress }
    }

    /// Wait for a service matching `selector` to get an ingress address
    pub async fn discover(
        &self,
        namespace: &str,
        selector: &Selector,
        options: &WatchOptions,
    ) -> DiscoveryResult {
        let result = self.run(namespace, selector, options).await;
        if let Err(e) = &result {
            warn!(
                namespace = %namespace,
                selector = %selector,
                error = %e,
                "Error getting endpoint"
            );
            self.progress.watch_aborted(&e.to_string());
        }
        result
    }

    async fn run(
        &self,
        namespace: &str,
        selector: &Selector,
        options: &WatchOptions,
    ) -> DiscoveryResult {
        let label_selector = selector.require_non_empty()?;
        let deadline = Deadline::after(options.timeout);

        info!(namespace = %namespace, selector = %label_selector, "Waiting for prediction endpoint to come up");
        self.progress.waiting_for_endpoint(namespace, &label_selector);

        let mut events = deadline
            .guard(
                &options.cancel,
                self.source.open(ResourceKind::Service, namespace, selector),
            )
            .await??;

        loop {
            let event = next_event(&mut events, &options.cancel, &deadline).await?;
            self.progress.event_seen();

            let svc = match event.snapshot() {
                Snapshot::Service(svc) => svc,
                other => {
                    warn!(name = %other.name(), "Ignoring non-service object on service watch");
                    continue;
                }
            };

            debug!(
                event = event.type_str(),
                service = %svc.name,
                ingress = svc.ingress.len(),
                "Service event"
            );

            if let Some(url) = endpoint_url(svc) {
                info!(service = %svc.name, url = %url, "Prediction endpoint is ready");
                self.progress.endpoint_resolved(&svc.name, &url);
                return Ok(url);
            }
        }
    }
}
