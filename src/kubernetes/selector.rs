// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Label selectors used to scope watches
//!
//! A selector is a set of `key=value` equality constraints. Keys are kept
//! sorted so the same set of labels always renders to the same selector
//! string, independent of the order the caller supplied them in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::WatchError;

/// Immutable set of label equality constraints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    labels: BTreeMap<String, String>,
}

impl Selector {
    /// Build a selector from any iterator of key/value pairs
    ///
    /// Later duplicates of the same key win.
    pub fn new<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a Kubernetes label selector string
    ///
    /// Examples:
    /// - `{app: predictor}` → `"app=predictor"`
    /// - `{tier: web, app: shop}` → `"app=shop,tier=web"`
    pub fn to_k8s_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Same as `to_k8s_string`, but refuses to produce a namespace-wide selector
    pub fn require_non_empty(&self) -> Result<String, WatchError> {
        if self.is_empty() {
            return Err(WatchError::EmptySelector);
        }
        Ok(self.to_k8s_string())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_k8s_string())
    }
}

impl FromStr for Selector {
    type Err = String;

    /// Parse `key=value` pairs separated by commas (whitespace tolerated)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = BTreeMap::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("Invalid label '{}', expected key=value", part))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid label '{}', key is empty", part));
            }
            labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { labels })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Selector {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter)
    }
}
