// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Event stream source for service and pod watches
//!
//! Watches are exposed as a lazy stream of typed snapshots. The stream only
//! ever ends with an error: when the API server closes a watch window the
//! kube implementation resumes from the last resource version it saw.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, Service};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::selector::Selector;
use crate::error::WatchError;

/// Resource version that asks the server to replay existing objects as `Added`
const REPLAY_VERSION: &str = "0";

/// HTTP status the server uses when our resource version has been compacted
const GONE: u16 = 410;

/// Pause before reopening a watch window that delivered nothing
const EMPTY_WINDOW_DELAY: Duration = Duration::from_secs(1);

/// Resource kinds that can be watched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Service,
    Pod,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Pod => "pod",
        }
    }
}

/// Point-in-time copy of a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Service(ServiceSnapshot),
    Pod(PodSnapshot),
}

impl Snapshot {
    pub fn name(&self) -> &str {
        match self {
            Snapshot::Service(svc) => &svc.name,
            Snapshot::Pod(pod) => &pod.name,
        }
    }
}

/// A single watch notification
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Added(Snapshot),
    Modified(Snapshot),
    Deleted(Snapshot),
}

impl ResourceEvent {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            ResourceEvent::Added(s) | ResourceEvent::Modified(s) | ResourceEvent::Deleted(s) => s,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, ResourceEvent::Deleted(_))
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "ADDED",
            ResourceEvent::Modified(_) => "MODIFIED",
            ResourceEvent::Deleted(_) => "DELETED",
        }
    }
}

/// Routable address assigned to a load balancer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressPoint {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

impl IngressPoint {
    /// IP takes precedence over hostname
    pub fn address(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.hostname.as_deref().filter(|h| !h.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub namespace: String,
    pub ingress: Vec<IngressPoint>,
}

impl ServiceSnapshot {
    pub fn is_ready(&self) -> bool {
        !self.ingress.is_empty()
    }
}

impl From<Service> for ServiceSnapshot {
    fn from(svc: Service) -> Self {
        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .map(|entries| {
                entries
                    .iter()
                    .map(|i| IngressPoint {
                        ip: i.ip.clone(),
                        hostname: i.hostname.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: svc.name_any(),
            namespace: svc.namespace().unwrap_or_default(),
            ingress,
        }
    }
}

/// Coarse pod lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Anything the API does not document maps to `Unknown`
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Running,
    Terminated {
        reason: Option<String>,
        message: Option<String>,
        exit_code: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatusSnapshot {
    pub name: String,
    pub ready: bool,
    pub state: Option<ContainerState>,
}

impl From<&ContainerStatus> for ContainerStatusSnapshot {
    fn from(cs: &ContainerStatus) -> Self {
        // The API sets at most one of the three; terminated wins if it doesn't
        let state = cs.state.as_ref().and_then(|st| {
            if let Some(t) = &st.terminated {
                Some(ContainerState::Terminated {
                    reason: t.reason.clone(),
                    message: t.message.clone(),
                    exit_code: t.exit_code,
                })
            } else if let Some(w) = &st.waiting {
                Some(ContainerState::Waiting {
                    reason: w.reason.clone(),
                    message: w.message.clone(),
                })
            } else {
                st.running.as_ref().map(|_| ContainerState::Running)
            }
        });

        Self {
            name: cs.name.clone(),
            ready: cs.ready,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    /// Pod-level reason, e.g. "Evicted"
    pub reason: Option<String>,
    pub message: Option<String>,
    /// Empty until the pod has been scheduled
    pub containers: Vec<ContainerStatusSnapshot>,
}

impl PodSnapshot {
    pub fn first_container(&self) -> Option<&ContainerStatusSnapshot> {
        self.containers.first()
    }
}

impl From<Pod> for PodSnapshot {
    fn from(pod: Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            reason: status.and_then(|s| s.reason.clone()),
            message: status.and_then(|s| s.message.clone()),
            containers: status
                .and_then(|s| s.container_statuses.as_ref())
                .map(|list| list.iter().map(ContainerStatusSnapshot::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Lazy, unbounded sequence of watch events
pub type EventStream = BoxStream<'static, Result<ResourceEvent, WatchError>>;

/// Opens watches scoped by namespace and label selector
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<EventStream, WatchError>;
}

/// Event source backed by the Kubernetes watch API
#[derive(Clone)]
pub struct KubeEventSource {
    client: Client,
}

impl KubeEventSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn open(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<EventStream, WatchError> {
        let label_selector = selector.require_non_empty()?;
        let params = WatchParams::default().labels(&label_selector);

        debug!(
            kind = kind.as_str(),
            namespace = %namespace,
            selector = %label_selector,
            "Opening watch"
        );

        let stream = match kind {
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                watch_resource(api, params, |svc| Snapshot::Service(svc.into()))
            }
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                watch_resource(api, params, |pod| Snapshot::Pod(pod.into()))
            }
        };
        Ok(stream)
    }
}

/// Watch one resource type, resuming across server-side watch timeouts
fn watch_resource<K>(api: Api<K>, params: WatchParams, convert: fn(K) -> Snapshot) -> EventStream
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let stream = async_stream::stream! {
        let mut version = REPLAY_VERSION.to_string();

        loop {
            let events = match api.watch(&params, &version).await {
                Ok(events) => events,
                Err(e) => {
                    yield Err(WatchError::from(e));
                    return;
                }
            };
            futures::pin_mut!(events);
            let mut received = 0usize;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(WatchError::from(e));
                        return;
                    }
                };

                if !matches!(event, WatchEvent::Error(_)) {
                    received += 1;
                }
                match event {
                    WatchEvent::Added(obj) => {
                        remember_version(&mut version, &obj);
                        yield Ok(ResourceEvent::Added(convert(obj)));
                    }
                    WatchEvent::Modified(obj) => {
                        remember_version(&mut version, &obj);
                        yield Ok(ResourceEvent::Modified(convert(obj)));
                    }
                    WatchEvent::Deleted(obj) => {
                        remember_version(&mut version, &obj);
                        yield Ok(ResourceEvent::Deleted(convert(obj)));
                    }
                    WatchEvent::Bookmark(bookmark) => {
                        trace!(version = %bookmark.metadata.resource_version, "Watch bookmark");
                        version = bookmark.metadata.resource_version;
                    }
                    WatchEvent::Error(status) if status.code == GONE => {
                        warn!(version = %version, "Resource version expired, replaying from start");
                        version = REPLAY_VERSION.to_string();
                        break;
                    }
                    WatchEvent::Error(status) => {
                        yield Err(WatchError::from_status(status.code, &status.message));
                        return;
                    }
                }
            }

            debug!(version = %version, events = received, "Watch window closed, resuming");
            if received == 0 {
                tokio::time::sleep(EMPTY_WINDOW_DELAY).await;
            }
        }
    };

    Box::pin(stream)
}

fn remember_version<K: Resource>(version: &mut String, obj: &K) {
    if let Some(rv) = obj.meta().resource_version.as_ref() {
        version.clone_from(rv);
    }
}
