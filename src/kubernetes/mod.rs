// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod client;
pub mod endpoint;
pub mod events;
pub mod logs;
pub mod resources;
mod selector;
mod watch;

pub use client::{ClientProfile, CredentialSource};
pub use endpoint::{EndpointDiscovery, endpoint_url};
pub use events::{EventSource, KubeEventSource, ResourceEvent, ResourceKind, Snapshot};
pub use logs::{KubeLogSource, LineSink, LogOutcome, LogRequest, LogSource, PodLogs, Terminal, WriterSink};
pub use resources::{KubeResourceClient, ResourceClient, ResourceHandle, WorkloadKind};
pub use selector::Selector;
pub use watch::WatchOptions;
