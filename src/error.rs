// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error types for watches and resource operations
//!
//! Both enums classify the raw `kube::Error` into the handful of cases a
//! caller can act on. Anything that is not an API status or a payload problem
//! is treated as a transport failure.

use std::time::Duration;
use thiserror::Error;

/// Errors that end an endpoint or log watch without a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The label selector was empty and would match the whole namespace
    #[error("Label selector must not be empty")]
    EmptySelector,

    /// The watch or log connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The API server rejected the request (401/403)
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The server sent a payload that could not be decoded
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// The event stream closed without an error
    #[error("Event stream ended unexpectedly")]
    StreamEnded,

    /// The watch deadline expired before a terminal state was reached
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration },

    /// The caller cancelled the watch
    #[error("Watch cancelled")]
    Cancelled,

    /// The pod stayed Pending for more events than the configured limit
    #[error("Pod still pending after {limit} events")]
    PendingLimit { limit: u32 },

    /// The pod became log-eligible but its log stream could not be opened
    #[error("Failed to open log stream: {0}")]
    LogOpen(String),
}

impl WatchError {
    /// Classify a watch status object returned inside the event stream
    pub fn from_status(code: u16, message: &str) -> Self {
        match code {
            401 | 403 => WatchError::Authorization(message.to_string()),
            _ => WatchError::Transport(format!("{} ({})", message, code)),
        }
    }
}

impl From<kube::Error> for WatchError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(status) => WatchError::from_status(status.code, &status.message),
            kube::Error::SerdeError(e) => WatchError::Decode(e.to_string()),
            _ => WatchError::Transport(err.to_string()),
        }
    }
}

/// Errors from create/delete calls against the cluster
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// An object with the same name already exists
    #[error("{kind} '{name}' already exists")]
    Conflict { kind: String, name: String },

    /// The API server rejected the object
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The custom resource definition is not installed
    #[error("Failed to create {kind}. Perhaps the CRD {kind} version {api_version} is not installed?")]
    CrdMissing { kind: String, api_version: String },

    /// The object to delete does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The API server refused the request (401/403)
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The request never got a usable answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The supplied object could not be turned into a request body
    #[error("Invalid resource spec: {0}")]
    InvalidSpec(String),
}
