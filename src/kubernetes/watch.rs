// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cancellation and deadline handling shared by all watches
//!
//! Every blocking pull (next watch event, next log chunk) goes through
//! [`Deadline::guard`], which races it against the caller's cancellation
//! token and an optional deadline.

use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EventStream, ResourceEvent};
use crate::error::WatchError;

/// Limits applied to a single endpoint or log watch
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Give up on the watch phase after this long (None waits forever)
    pub timeout: Option<Duration>,
    /// Give up after this many Pending pod events (None waits forever)
    pub pending_limit: Option<u32>,
    /// Give up on a log stream that produces no data for this long
    pub log_idle_timeout: Option<Duration>,
    /// Cancels the watch and any log read in progress
    pub cancel: CancellationToken,
}

impl WatchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pending_limit(mut self, limit: u32) -> Self {
        self.pending_limit = Some(limit);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Point in time after which a blocking pull fails with `Timeout`
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now, or none
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
            timeout: timeout.unwrap_or_default(),
        }
    }

    /// Run `fut` unless cancellation or the deadline wins first
    pub async fn guard<F, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T, WatchError>
    where
        F: Future<Output = T>,
    {
        let expired = async {
            match self.at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WatchError::Cancelled),
            _ = expired => Err(WatchError::Timeout { after: self.timeout }),
            value = fut => Ok(value),
        }
    }
}

/// Pull the next event, mapping a closed stream to `StreamEnded`
pub(crate) async fn next_event(
    events: &mut EventStream,
    cancel: &CancellationToken,
    deadline: &Deadline,
) -> Result<ResourceEvent, WatchError> {
    match deadline.guard(cancel, events.next()).await? {
        Some(event) => event,
        None => Err(WatchError::StreamEnded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Some(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        let result = deadline
            .guard(&cancel, std::future::pending::<()>())
            .await;
        assert_eq!(
            result,
            Err(WatchError::Timeout {
                after: Duration::from_secs(5)
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_wins() {
        let deadline = Deadline::after(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = deadline.guard(&cancel, async { 1 }).await;
        assert_eq!(result, Err(WatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_ready_future_passes_through() {
        let deadline = Deadline::after(Some(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        assert_eq!(deadline.guard(&cancel, async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let mut events: EventStream = futures::stream::empty().boxed();
        let result = next_event(&mut events, &CancellationToken::new(), &Deadline::after(None)).await;
        assert_eq!(result, Err(WatchError::StreamEnded));
    }

    #[test]
    fn test_options_builders() {
        let options = WatchOptions::default()
            .with_timeout(Duration::from_secs(30))
            .with_pending_limit(10);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.pending_limit, Some(10));
        assert!(options.log_idle_timeout.is_none());
    }
}
