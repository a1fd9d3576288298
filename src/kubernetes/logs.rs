// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Pod log acquisition
//!
//! Watches the pods of a workload until one of them either starts (Running
//! with a ready container, or Succeeded) or fails, then attaches to its log
//! stream and relays it in bounded chunks.
//!
//! ## Phase decisions
//!
//! | Event / phase                                  | Decision |
//! |------------------------------------------------|----------|
//! | Succeeded, or Running with first container ready | eligible |
//! | DELETED event for a pod that has not started   | failed   |
//! | Pending                                        | pending  |
//! | Failed, or first container waiting/terminated  | failed   |
//! | anything else                                  | waiting  |
//!
//! A failed pod still gets its log stream opened, since whatever it printed
//! before dying is usually the most useful thing to show.

use async_trait::async_trait;
use futures::io::AsyncRead;
use futures::{AsyncReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, LogParams};
use std::io::Write;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::events::{ContainerState, EventSource, PodPhase, PodSnapshot, ResourceEvent, ResourceKind, Snapshot};
use super::selector::Selector;
use super::watch::{Deadline, WatchOptions, next_event};
use crate::error::WatchError;
use crate::progress::ProgressHandle;

/// Upper bound on a single read from the log stream
pub const MAX_STREAM_BYTES: usize = 1024;

/// Chunks buffered between the log pump task and the reader
const LOG_CHANNEL_DEPTH: usize = 16;

/// What one pod event means for log acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodDecision {
    /// Pod not scheduled or still pulling images
    Pending,
    /// Nothing conclusive yet
    Waiting,
    /// Logs can be attached
    Eligible,
    /// Pod will not start; logs are fetched best effort
    Failed {
        reason: Option<String>,
        message: Option<String>,
    },
}

/// Decide what a single pod event means
///
/// A deleted pod that has not started is treated as failed, so it cannot
/// keep the watch waiting forever.
pub fn evaluate(event: &ResourceEvent, pod: &PodSnapshot) -> PodDecision {
    match phase_decision(pod) {
        PodDecision::Pending | PodDecision::Waiting if event.is_deleted() => failure(pod),
        decision => decision,
    }
}

fn phase_decision(pod: &PodSnapshot) -> PodDecision {
    let first = pod.first_container();
    match pod.phase {
        PodPhase::Pending => PodDecision::Pending,
        PodPhase::Succeeded => PodDecision::Eligible,
        PodPhase::Running if first.is_some_and(|c| c.ready) => PodDecision::Eligible,
        PodPhase::Failed => failure(pod),
        _ if first.is_some_and(|c| {
            matches!(
                c.state,
                Some(ContainerState::Waiting { .. }) | Some(ContainerState::Terminated { .. })
            )
        }) =>
        {
            failure(pod)
        }
        _ => PodDecision::Waiting,
    }
}

/// Pick the most specific reason available: terminated container, waiting
/// container, then the pod itself
fn failure(pod: &PodSnapshot) -> PodDecision {
    let terminated = pod.containers.iter().find_map(|c| match &c.state {
        Some(ContainerState::Terminated { reason, message, .. }) => Some((reason, message)),
        _ => None,
    });
    let waiting = || {
        pod.containers.iter().find_map(|c| match &c.state {
            Some(ContainerState::Waiting { reason, message }) => Some((reason, message)),
            _ => None,
        })
    };

    let (reason, message) = terminated
        .or_else(waiting)
        .map(|(r, m)| (r.clone(), m.clone()))
        .unwrap_or_else(|| (pod.reason.clone(), pod.message.clone()));

    PodDecision::Failed { reason, message }
}

/// How the pod watch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Eligible,
    PodFailed {
        reason: Option<String>,
        message: Option<String>,
    },
}

/// Result of a completed log acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOutcome {
    /// Pod whose logs were read
    pub pod: String,
    pub terminal: Terminal,
    /// Chunks delivered to the sink
    pub chunks: usize,
    /// The sink asked to stop before the stream ended
    pub stopped_early: bool,
}

/// Parameters of a log acquisition
#[derive(Debug, Clone)]
pub struct LogRequest {
    /// Workload name, used in diagnostics
    pub name: String,
    pub namespace: String,
    pub selector: Selector,
    /// Container to read; empty selects the pod's default container
    pub container: String,
    pub follow: bool,
}

/// Receives decoded log chunks
pub trait LineSink: Send {
    /// Return `Break` to stop reading
    fn accept(&mut self, line: &str) -> ControlFlow<()>;
}

impl LineSink for Vec<String> {
    fn accept(&mut self, line: &str) -> ControlFlow<()> {
        self.push(line.to_string());
        ControlFlow::Continue(())
    }
}

/// Writes each chunk as a line; stops on the first write error
pub struct WriterSink<W: Write + Send>(pub W);

impl<W: Write + Send> LineSink for WriterSink<W> {
    fn accept(&mut self, line: &str) -> ControlFlow<()> {
        match writeln!(self.0, "{}", line).and_then(|_| self.0.flush()) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                debug!(error = %e, "Log sink closed");
                ControlFlow::Break(())
            }
        }
    }
}

/// Open log stream for one pod/container
///
/// The underlying connection is released when the handle is dropped, which
/// happens exactly once whichever way the relay ends.
pub struct LogHandle {
    pod: String,
    container: String,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl LogHandle {
    pub fn new(pod: &str, container: &str, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            pod: pod.to_string(),
            container: container.to_string(),
            reader: Box::pin(reader),
        }
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf).await
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        debug!(pod = %self.pod, container = %self.container, "Released log stream");
    }
}

/// Opens pod log streams
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open_log(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        follow: bool,
    ) -> Result<LogHandle, WatchError>;
}

/// Log source backed by the Kubernetes pod log API
#[derive(Clone)]
pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    /// Opens the stream on a dedicated task that pumps bytes over a channel
    ///
    /// Dropping the returned handle closes the channel, which ends the task
    /// and with it the HTTP connection.
    async fn open_log(
        &self,
        pod: &str,
        namespace: &str,
        container: &str,
        follow: bool,
    ) -> Result<LogHandle, WatchError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow,
            pretty: true,
            container: (!container.is_empty()).then(|| container.to_string()),
            ..Default::default()
        };
        let name = pod.to_string();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(LOG_CHANNEL_DEPTH);

        tokio::spawn(async move {
            let reader = match api.log_stream(&name, &params).await {
                Ok(reader) => {
                    let _ = opened_tx.send(Ok(()));
                    reader
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(WatchError::LogOpen(e.to_string())));
                    return;
                }
            };
            futures::pin_mut!(reader);

            let mut buf = vec![0u8; MAX_STREAM_BYTES];
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
            }
            trace!(pod = %name, "Log pump finished");
        });

        opened_rx
            .await
            .map_err(|_| WatchError::LogOpen("log task exited before opening".to_string()))??;

        let chunks = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        Ok(LogHandle::new(pod, container, chunks.boxed().into_async_read()))
    }
}

/// Incremental UTF-8 decoding across chunk boundaries
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    /// Decode as much as possible, holding back an incomplete trailing character
    ///
    /// Invalid sequences are replaced one at a time, so a split character
    /// after them is still carried into the next chunk.
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    match e.error_len() {
                        None => {
                            text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                            self.pending.drain(..valid);
                            return text;
                        }
                        Some(invalid) => {
                            let end = valid + invalid;
                            text.push_str(&String::from_utf8_lossy(&self.pending[..end]));
                            self.pending.drain(..end);
                        }
                    }
                }
            }
        }
    }

    /// Whatever is left once the stream has ended
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Watches pods and relays the logs of the first one that starts or fails
pub struct PodLogs<S: EventSource, L: LogSource> {
    events: Arc<S>,
    logs: Arc<L>,
    progress: ProgressHandle,
}

impl<S: EventSource, L: LogSource> PodLogs<S, L> {
    pub fn new(events: Arc<S>, logs: Arc<L>, progress: ProgressHandle) -> Self {
        Self {
            events,
            logs,
            progress,
        }
    }

    /// Wait for a pod matching the request, then stream its logs into `sink`
    ///
    /// Produces no lines when the watch fails before a pod starts or fails.
    pub async fn stream(
        &self,
        request: &LogRequest,
        options: &WatchOptions,
        sink: &mut dyn LineSink,
    ) -> Result<LogOutcome, WatchError> {
        let (pod, terminal) = match self.acquire(request, options).await {
            Ok(found) => found,
            Err(e) => {
                error!(name = %request.name, error = %e, "Error getting status");
                self.progress.watch_aborted(&e.to_string());
                return Err(e);
            }
        };

        let opening = Deadline::after(options.log_idle_timeout)
            .guard(
                &options.cancel,
                self.logs
                    .open_log(&pod, &request.namespace, &request.container, request.follow),
            )
            .await;
        let opened = match opening {
            Ok(opened) => opened,
            Err(e) => {
                self.progress.watch_aborted(&e.to_string());
                return Err(e);
            }
        };

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) if matches!(terminal, Terminal::PodFailed { .. }) => {
                warn!(pod = %pod, error = %e, "No logs available for failed pod");
                return Ok(LogOutcome {
                    pod,
                    terminal,
                    chunks: 0,
                    stopped_early: false,
                });
            }
            Err(e) => {
                self.progress.watch_aborted(&e.to_string());
                return Err(e);
            }
        };
        self.progress.log_opened(&pod, &request.container);

        let mut chunks = 0;
        let relayed = self.relay(handle, options, sink, &mut chunks).await;
        self.progress.log_released(&pod, chunks);

        Ok(LogOutcome {
            pod,
            terminal,
            chunks,
            stopped_early: relayed?,
        })
    }

    /// Run the phase state machine until a pod starts or fails
    async fn acquire(
        &self,
        request: &LogRequest,
        options: &WatchOptions,
    ) -> Result<(String, Terminal), WatchError> {
        request.selector.require_non_empty()?;
        let deadline = Deadline::after(options.timeout);
        self.progress.reset();

        let mut events = deadline
            .guard(
                &options.cancel,
                self.events
                    .open(ResourceKind::Pod, &request.namespace, &request.selector),
            )
            .await??;

        let mut pending = 0u32;
        loop {
            let event = next_event(&mut events, &options.cancel, &deadline).await?;
            self.progress.event_seen();

            let pod = match event.snapshot() {
                Snapshot::Pod(pod) => pod,
                other => {
                    warn!(name = %other.name(), "Ignoring non-pod object on pod watch");
                    continue;
                }
            };

            debug!(
                event = event.type_str(),
                pod = %pod.name,
                phase = ?pod.phase,
                "Pod event"
            );

            match evaluate(&event, pod) {
                PodDecision::Pending => {
                    pending += 1;
                    warn!(pod = %pod.name, "Waiting for {} to start...", pod.name);
                    self.progress.pod_pending(&pod.name);
                    if let Some(limit) = options.pending_limit
                        && pending > limit
                    {
                        return Err(WatchError::PendingLimit { limit });
                    }
                }
                PodDecision::Waiting => {}
                PodDecision::Eligible => {
                    info!(
                        pod = %pod.name,
                        ready = pod.first_container().is_some_and(|c| c.ready),
                        "Pod started running"
                    );
                    self.progress.pod_started(&pod.name);
                    return Ok((pod.name.clone(), Terminal::Eligible));
                }
                PodDecision::Failed { reason, message } => {
                    error!(
                        pod = %pod.name,
                        reason = reason.as_deref().unwrap_or("unknown"),
                        message = message.as_deref().unwrap_or(""),
                        "Failed to launch"
                    );
                    self.progress
                        .pod_failed(&pod.name, reason.as_deref(), message.as_deref());
                    return Ok((pod.name.clone(), Terminal::PodFailed { reason, message }));
                }
            }
        }
    }

    /// Copy the log stream to the sink in bounded chunks
    ///
    /// Takes ownership of the handle so it is released on every return path.
    /// Returns whether the sink stopped early.
    async fn relay(
        &self,
        mut handle: LogHandle,
        options: &WatchOptions,
        sink: &mut dyn LineSink,
        chunks: &mut usize,
    ) -> Result<bool, WatchError> {
        let mut buf = [0u8; MAX_STREAM_BYTES];
        let mut decoder = ChunkDecoder::default();

        loop {
            let idle = Deadline::after(options.log_idle_timeout);
            let read = idle
                .guard(&options.cancel, handle.read_chunk(&mut buf))
                .await?
                .map_err(|e| WatchError::Transport(e.to_string()))?;

            if read == 0 {
                if let Some(rest) = decoder.finish() {
                    *chunks += 1;
                    if sink.accept(rest.trim_end()).is_break() {
                        return Ok(true);
                    }
                }
                debug!(pod = %handle.pod(), chunks = *chunks, "Log stream finished");
                return Ok(false);
            }

            let text = decoder.decode(&buf[..read]);
            if text.is_empty() {
                continue;
            }
            *chunks += 1;
            if sink.accept(text.trim_end()).is_break() {
                debug!(pod = %handle.pod(), chunks = *chunks, "Log consumer stopped early");
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::events::testing::{ScriptedSource, container, pod, terminated};
    use crate::progress::{WatchUpdate, create_progress_handle, drain};
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Reader that counts how often it is dropped
    struct TrackedReader {
        inner: futures::io::Cursor<Vec<u8>>,
        released: Arc<AtomicUsize>,
        hang_at_end: bool,
    }

    impl AsyncRead for TrackedReader {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            match Pin::new(&mut this.inner).poll_read(cx, buf) {
                Poll::Ready(Ok(0)) if this.hang_at_end => Poll::Pending,
                other => other,
            }
        }
    }

    impl Drop for TrackedReader {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeLogs {
        content: Vec<u8>,
        fail_open: bool,
        hang_open: bool,
        hang_at_end: bool,
        opened: Mutex<Vec<(String, String, String, bool)>>,
        released: Arc<AtomicUsize>,
    }

    impl FakeLogs {
        fn with_content(content: &[u8]) -> Self {
            Self {
                content: content.to_vec(),
                ..Default::default()
            }
        }

        fn open_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn release_count(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LogSource for FakeLogs {
        async fn open_log(
            &self,
            pod: &str,
            namespace: &str,
            container: &str,
            follow: bool,
        ) -> Result<LogHandle, WatchError> {
            self.opened.lock().unwrap().push((
                pod.to_string(),
                namespace.to_string(),
                container.to_string(),
                follow,
            ));
            if self.hang_open {
                std::future::pending::<()>().await;
            }
            if self.fail_open {
                return Err(WatchError::LogOpen("container not found".to_string()));
            }
            let reader = TrackedReader {
                inner: futures::io::Cursor::new(self.content.clone()),
                released: Arc::clone(&self.released),
                hang_at_end: self.hang_at_end,
            };
            Ok(LogHandle::new(pod, container, reader))
        }
    }

    /// Stops after accepting `limit` lines
    struct StopAfter {
        limit: usize,
        lines: Vec<String>,
    }

    impl LineSink for StopAfter {
        fn accept(&mut self, line: &str) -> ControlFlow<()> {
            self.lines.push(line.to_string());
            if self.lines.len() >= self.limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    fn request() -> LogRequest {
        LogRequest {
            name: "train".to_string(),
            namespace: "kubeflow".to_string(),
            selector: Selector::new([("fairing-id", "abc123")]),
            container: "tensorflow".to_string(),
            follow: true,
        }
    }

    fn pod_logs(
        events: Vec<Result<ResourceEvent, WatchError>>,
        logs: FakeLogs,
    ) -> (PodLogs<ScriptedSource, FakeLogs>, Arc<FakeLogs>) {
        let logs = Arc::new(logs);
        (
            PodLogs::new(
                Arc::new(ScriptedSource::new(events)),
                Arc::clone(&logs),
                create_progress_handle(),
            ),
            logs,
        )
    }

    fn modified(snapshot: Snapshot) -> Result<ResourceEvent, WatchError> {
        Ok(ResourceEvent::Modified(snapshot))
    }

    #[tokio::test]
    async fn test_waits_for_ready_container() {
        let (pod_logs, logs) = pod_logs(
            vec![
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Running, vec![container(false, Some(ContainerState::Running))])),
                modified(pod(PodPhase::Running, vec![container(true, Some(ContainerState::Running))])),
            ],
            FakeLogs::with_content(b"epoch 1 loss=0.3\n"),
        );
        let progress = Arc::clone(&pod_logs.progress);
        let mut rx = progress.subscribe();
        let mut lines: Vec<String> = Vec::new();

        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();

        assert_eq!(outcome.terminal, Terminal::Eligible);
        assert_eq!(outcome.pod, "train-x7k2p");
        assert_eq!(lines, vec!["epoch 1 loss=0.3"]);
        assert_eq!(progress.events_seen(), 4);
        assert_eq!(
            *logs.opened.lock().unwrap(),
            vec![(
                "train-x7k2p".to_string(),
                "kubeflow".to_string(),
                "tensorflow".to_string(),
                true
            )]
        );
        assert_eq!(logs.release_count(), 1);

        let updates = drain(&mut rx);
        let pending = updates
            .iter()
            .filter(|u| matches!(u, WatchUpdate::PodPending { .. }))
            .count();
        assert_eq!(pending, 2);
        assert!(updates.contains(&WatchUpdate::LogReleased {
            pod: "train-x7k2p".to_string(),
            chunks: 1
        }));
    }

    #[tokio::test]
    async fn test_opens_exactly_one_handle() {
        let ready = || modified(pod(PodPhase::Running, vec![container(true, None)]));
        let (pod_logs, logs) = pod_logs(vec![ready(), ready(), ready()], FakeLogs::with_content(b"x"));

        pod_logs
            .stream(&request(), &WatchOptions::default(), &mut Vec::<String>::new())
            .await
            .unwrap();

        assert_eq!(logs.open_count(), 1);
        assert_eq!(logs.release_count(), 1);
    }

    #[tokio::test]
    async fn test_succeeded_pod_is_eligible() {
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs::with_content(b"done\n"),
        );
        let mut lines: Vec<String> = Vec::new();
        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();
        assert_eq!(outcome.terminal, Terminal::Eligible);
        assert_eq!(lines, vec!["done"]);
        assert_eq!(logs.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_pod_surfaces_reason_and_still_reads_logs() {
        let (pod_logs, logs) = pod_logs(
            vec![
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(
                    PodPhase::Failed,
                    vec![container(false, Some(terminated("OOMKilled", "memory limit exceeded")))],
                )),
            ],
            FakeLogs::with_content(b"allocating tensors\n"),
        );
        let progress = Arc::clone(&pod_logs.progress);
        let mut rx = progress.subscribe();
        let mut lines: Vec<String> = Vec::new();

        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();

        assert_eq!(
            outcome.terminal,
            Terminal::PodFailed {
                reason: Some("OOMKilled".to_string()),
                message: Some("memory limit exceeded".to_string()),
            }
        );
        assert_eq!(lines, vec!["allocating tensors"]);
        assert_eq!(logs.open_count(), 1);
        assert_eq!(logs.release_count(), 1);
        assert!(drain(&mut rx).contains(&WatchUpdate::PodFailed {
            pod: "train-x7k2p".to_string(),
            reason: Some("OOMKilled".to_string()),
            message: Some("memory limit exceeded".to_string()),
        }));
    }

    #[tokio::test]
    async fn test_failed_pod_without_logs_is_not_an_error() {
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Failed, vec![]))],
            FakeLogs {
                fail_open: true,
                ..Default::default()
            },
        );
        let mut lines: Vec<String> = Vec::new();
        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();

        assert!(matches!(outcome.terminal, Terminal::PodFailed { .. }));
        assert_eq!(outcome.chunks, 0);
        assert!(lines.is_empty());
        assert_eq!(logs.open_count(), 1);
    }

    #[tokio::test]
    async fn test_eligible_pod_open_failure_is_an_error() {
        let (pod_logs, _) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs {
                fail_open: true,
                ..Default::default()
            },
        );
        let result = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut Vec::<String>::new())
            .await;
        assert!(matches!(result, Err(WatchError::LogOpen(_))));
    }

    #[tokio::test]
    async fn test_stream_failure_produces_no_logs() {
        let (pod_logs, logs) = pod_logs(
            vec![
                modified(pod(PodPhase::Pending, vec![])),
                Err(WatchError::Authorization("pods is forbidden".to_string())),
            ],
            FakeLogs::with_content(b"never read"),
        );
        let mut lines: Vec<String> = Vec::new();
        let result = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await;

        assert_eq!(
            result,
            Err(WatchError::Authorization("pods is forbidden".to_string()))
        );
        assert!(lines.is_empty());
        assert_eq!(logs.open_count(), 0);
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let content = vec![b'a'; 2500];
        let (pod_logs, _) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs::with_content(&content),
        );
        let mut lines: Vec<String> = Vec::new();
        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 3);
        let lengths: Vec<_> = lines.iter().map(String::len).collect();
        assert_eq!(lengths, vec![1024, 1024, 452]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let mut content = vec![b'a'; MAX_STREAM_BYTES - 1];
        content.extend_from_slice("éb".as_bytes());
        let (pod_logs, _) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs::with_content(&content),
        );
        let mut lines: Vec<String> = Vec::new();
        pod_logs
            .stream(&request(), &WatchOptions::default(), &mut lines)
            .await
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_STREAM_BYTES - 1);
        assert_eq!(lines[1], "éb");
    }

    #[tokio::test]
    async fn test_early_stop_releases_handle_once() {
        let content = vec![b'z'; 4096];
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs::with_content(&content),
        );
        let mut sink = StopAfter {
            limit: 1,
            lines: Vec::new(),
        };

        let outcome = pod_logs
            .stream(&request(), &WatchOptions::default(), &mut sink)
            .await
            .unwrap();

        assert!(outcome.stopped_early);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(sink.lines.len(), 1);
        assert_eq!(logs.release_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_log_read_releases_handle() {
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs {
                content: b"first\n".to_vec(),
                hang_at_end: true,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let options = WatchOptions::default().with_cancel(cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let mut lines: Vec<String> = Vec::new();
        let result = pod_logs.stream(&request(), &options, &mut lines).await;
        canceller.await.unwrap();

        assert_eq!(result, Err(WatchError::Cancelled));
        assert_eq!(lines, vec!["first"]);
        assert_eq!(logs.release_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_opening_log() {
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Failed, vec![]))],
            FakeLogs {
                hang_open: true,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let options = WatchOptions::default().with_cancel(cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = pod_logs.stream(&request(), &options, &mut Vec::<String>::new()).await;
        canceller.await.unwrap();

        assert_eq!(result, Err(WatchError::Cancelled));
        assert_eq!(logs.open_count(), 1);
        assert_eq!(logs.release_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_log_stream_times_out() {
        let (pod_logs, logs) = pod_logs(
            vec![modified(pod(PodPhase::Succeeded, vec![]))],
            FakeLogs {
                hang_at_end: true,
                ..Default::default()
            },
        );
        let options = WatchOptions {
            log_idle_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let result = pod_logs.stream(&request(), &options, &mut Vec::<String>::new()).await;
        assert_eq!(
            result,
            Err(WatchError::Timeout {
                after: Duration::from_secs(60)
            })
        );
        assert_eq!(logs.release_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let (pod_logs, logs) = pod_logs(
            vec![
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Succeeded, vec![])),
            ],
            FakeLogs::default(),
        );
        let options = WatchOptions::default().with_pending_limit(2);
        let result = pod_logs.stream(&request(), &options, &mut Vec::<String>::new()).await;
        assert_eq!(result, Err(WatchError::PendingLimit { limit: 2 }));
        assert_eq!(logs.open_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_within_limit_succeeds() {
        let (pod_logs, _) = pod_logs(
            vec![
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Pending, vec![])),
                modified(pod(PodPhase::Succeeded, vec![])),
            ],
            FakeLogs::default(),
        );
        let options = WatchOptions::default().with_pending_limit(2);
        let outcome = pod_logs
            .stream(&request(), &options, &mut Vec::<String>::new())
            .await
            .unwrap();
        assert_eq!(outcome.terminal, Terminal::Eligible);
    }

    #[test]
    fn test_deleted_pending_pod_fails() {
        let event = ResourceEvent::Deleted(pod(PodPhase::Pending, vec![]));
        let Snapshot::Pod(snap) = event.snapshot() else {
            panic!("expected pod");
        };
        assert!(matches!(evaluate(&event, snap), PodDecision::Failed { .. }));
    }

    #[test]
    fn test_deleted_started_pod_stays_eligible() {
        for snapshot in [
            pod(PodPhase::Running, vec![container(true, Some(ContainerState::Running))]),
            pod(PodPhase::Succeeded, vec![]),
        ] {
            let event = ResourceEvent::Deleted(snapshot);
            let Snapshot::Pod(snap) = event.snapshot() else {
                panic!("expected pod");
            };
            assert_eq!(evaluate(&event, snap), PodDecision::Eligible);
        }
    }

    #[test]
    fn test_deleted_running_pod_not_ready_fails() {
        let event = ResourceEvent::Deleted(pod(
            PodPhase::Running,
            vec![container(false, Some(ContainerState::Running))],
        ));
        let Snapshot::Pod(snap) = event.snapshot() else {
            panic!("expected pod");
        };
        assert!(matches!(evaluate(&event, snap), PodDecision::Failed { .. }));
    }

    #[test]
    fn test_crash_loop_is_failure() {
        let waiting = ContainerState::Waiting {
            reason: Some("CrashLoopBackOff".to_string()),
            message: Some("back-off restarting".to_string()),
        };
        let Snapshot::Pod(snap) = pod(PodPhase::Running, vec![container(false, Some(waiting))]) else {
            panic!("expected pod");
        };
        let event = ResourceEvent::Modified(Snapshot::Pod(snap.clone()));
        assert_eq!(
            evaluate(&event, &snap),
            PodDecision::Failed {
                reason: Some("CrashLoopBackOff".to_string()),
                message: Some("back-off restarting".to_string()),
            }
        );
    }

    #[test]
    fn test_running_without_statuses_waits() {
        let Snapshot::Pod(snap) = pod(PodPhase::Running, vec![]) else {
            panic!("expected pod");
        };
        let event = ResourceEvent::Added(Snapshot::Pod(snap.clone()));
        assert_eq!(evaluate(&event, &snap), PodDecision::Waiting);

        let unknown = PodSnapshot {
            phase: PodPhase::Unknown,
            ..snap
        };
        assert_eq!(evaluate(&event, &unknown), PodDecision::Waiting);
    }

    #[test]
    fn test_pod_level_reason_fallback() {
        let Snapshot::Pod(mut snap) = pod(PodPhase::Failed, vec![]) else {
            panic!("expected pod");
        };
        snap.reason = Some("Evicted".to_string());
        let event = ResourceEvent::Modified(Snapshot::Pod(snap.clone()));
        assert_eq!(
            evaluate(&event, &snap),
            PodDecision::Failed {
                reason: Some("Evicted".to_string()),
                message: None,
            }
        );
    }

    #[test]
    fn test_decoder_invalid_bytes_are_replaced() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.decode(&[b'o', b'k', 0xff, b'!']), "ok\u{fffd}!");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_keeps_split_char_after_invalid_byte() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xff, 0xc3]), "x\u{fffd}");
        assert_eq!(decoder.decode(&[0xa9, b'y']), "\u{e9}y");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_flushes_truncated_tail() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xc3]), "a");
        assert_eq!(decoder.finish().as_deref(), Some("\u{fffd}"));
    }

    /// Client whose pod log endpoint sends `first` and then stays open
    ///
    /// The returned receiver resolves once the response body is dropped.
    fn streaming_log_client(
        first: &'static [u8],
    ) -> (Client, Arc<Mutex<Vec<String>>>, oneshot::Receiver<()>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (body_dropped, dropped) = oneshot::channel::<()>();
        let mut body_dropped = Some(body_dropped);

        let service = tower::service_fn(move |req: http::Request<kube::client::Body>| {
            seen.lock().unwrap().push(req.uri().to_string());
            let guard = body_dropped.take();
            let frames = futures::stream::iter([Ok::<_, std::convert::Infallible>(
                http_body::Frame::data(bytes::Bytes::from_static(first)),
            )])
            .chain(futures::stream::pending())
            .map(move |frame| {
                let _held = &guard;
                frame
            });
            let body = http_body_util::StreamBody::new(frames);
            async move { Ok::<_, std::convert::Infallible>(http::Response::new(body)) }
        });
        (Client::new(service, "default"), requests, dropped)
    }

    #[tokio::test]
    async fn test_kube_log_source_reads_followed_stream() {
        let (client, requests, _dropped) = streaming_log_client(b"epoch 1 loss=0.3\n");
        let source = KubeLogSource::new(client);

        let mut handle = source
            .open_log("train-x7k2p", "kubeflow", "tensorflow", true)
            .await
            .unwrap();
        let mut buf = [0u8; MAX_STREAM_BYTES];
        let n = handle.read_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"epoch 1 loss=0.3\n");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("/namespaces/kubeflow/pods/train-x7k2p/log"));
        assert!(requests[0].contains("container=tensorflow"));
        assert!(requests[0].contains("follow=true"));
    }

    #[tokio::test]
    async fn test_dropping_log_handle_closes_connection() {
        let (client, _, dropped) = streaming_log_client(b"first\n");
        let source = KubeLogSource::new(client);

        let mut handle = source
            .open_log("train-x7k2p", "kubeflow", "", true)
            .await
            .unwrap();
        let mut buf = [0u8; MAX_STREAM_BYTES];
        assert!(handle.read_chunk(&mut buf).await.unwrap() > 0);
        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(5), dropped).await;
        assert!(closed.is_ok(), "log connection still open after the handle was dropped");
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink(Vec::<u8>::new());
        assert!(sink.accept("hello").is_continue());
        assert_eq!(sink.0, b"hello\n".to_vec());
    }
}
