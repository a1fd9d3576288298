// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Watch Kubernetes workloads until they are reachable or their logs can be read

pub mod config;
pub mod error;
pub mod kubernetes;
pub mod progress;
