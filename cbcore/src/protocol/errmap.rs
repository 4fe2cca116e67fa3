//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The server-published error map.
//!
//! After HELLO every session requests error map v2: a JSON table classifying
//! each 16-bit status with a set of attributes and, for retryable statuses, a
//! retry strategy. The map is the authoritative retry oracle for key/value
//! errors on that session; statuses absent from the map fall back to the
//! client's static classification.

use crate::error::Error;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Attribute names the client acts on. The server may publish more; unknown
/// attributes are carried verbatim but ignored.
pub mod attrs {
    /// The operation may succeed if retried.
    pub const RETRY_NOW: &str = "retry-now";
    /// The operation may succeed if retried after a delay.
    pub const RETRY_LATER: &str = "retry-later";
    /// The error is specific to the addressed item.
    pub const ITEM_ONLY: &str = "item-only";
    /// The error relates to authentication.
    pub const AUTH: &str = "auth";
    /// The condition is temporary on the server.
    pub const TEMP: &str = "temp";
    /// The connection state is no longer valid; the session must close.
    pub const CONN_STATE_INVALIDATED: &str = "conn-state-invalidated";
    /// The status indicates success.
    pub const SUCCESS: &str = "success";
    /// The client should fetch a new cluster config.
    pub const FETCH_CONFIG: &str = "fetch-config";
}

/// Retry strategy attached to a status entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetrySpec {
    /// One of `constant`, `linear`, `exponential`.
    pub strategy: String,
    /// Base interval in milliseconds.
    #[serde(default)]
    pub interval: u64,
    /// Initial delay before the first retry, milliseconds.
    #[serde(default)]
    pub after: u64,
    /// Hard ceiling on a single delay, milliseconds.
    #[serde(default)]
    pub ceil: Option<u64>,
    /// Total budget across retries, milliseconds.
    #[serde(default, rename = "max-duration")]
    pub max_duration: Option<u64>,
}

impl RetrySpec {
    /// Delay before attempt number `attempt` (0-based), per the server's
    /// strategy. The caller still clamps to the operation deadline.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.interval.max(1);
        let millis = match self.strategy.as_str() {
            "exponential" => base.saturating_pow(attempt.saturating_add(1).min(16)),
            "linear" => base.saturating_mul(u64::from(attempt) + 1),
            _ => base,
        };
        let millis = match self.ceil {
            Some(ceil) => millis.min(ceil),
            None => millis,
        };
        Duration::from_millis(self.after.saturating_add(millis))
    }
}

/// One status entry of the error map.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMapEntry {
    /// Short symbolic name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub desc: String,
    /// Attribute set.
    #[serde(default)]
    pub attrs: Vec<String>,
    /// Retry strategy, present when the server wants client-side retry.
    #[serde(default)]
    pub retry: Option<RetrySpec>,
}

impl ErrorMapEntry {
    /// Returns `true` if this entry carries the given attribute.
    #[must_use]
    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.iter().any(|a| a == attr)
    }

    /// Returns `true` when the server classifies this status as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.has_attr(attrs::RETRY_NOW) || self.has_attr(attrs::RETRY_LATER)
    }

    /// Returns `true` when this status poisons the connection.
    #[must_use]
    pub fn invalidates_connection(&self) -> bool {
        self.has_attr(attrs::CONN_STATE_INVALIDATED)
    }
}

#[derive(Debug, Deserialize)]
struct WireErrorMap {
    version: u16,
    revision: u16,
    errors: HashMap<String, ErrorMapEntry>,
}

/// Parsed error map, indexed by status code.
#[derive(Debug, Clone, Default)]
pub struct ErrorMap {
    /// Map format version.
    pub version: u16,
    /// Map revision, monotonically increased by the server.
    pub revision: u16,
    entries: HashMap<u16, ErrorMapEntry>,
}

impl ErrorMap {
    /// Parses the JSON body of a GET_ERROR_MAP response.
    ///
    /// Status keys are lower-case hex without a `0x` prefix; keys that do not
    /// parse are rejected rather than skipped, since a malformed map leaves
    /// retry classification undefined.
    pub fn parse(body: &[u8]) -> Result<Self, Error> {
        let wire: WireErrorMap =
            serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
                message: format!("error map: {e}"),
            })?;
        let mut entries = HashMap::with_capacity(wire.errors.len());
        for (key, entry) in wire.errors {
            let code = u16::from_str_radix(&key, 16).map_err(|_| Error::ParsingFailure {
                message: format!("error map key {key:?} is not hex"),
            })?;
            entries.insert(code, entry);
        }
        Ok(Self {
            version: wire.version,
            revision: wire.revision,
            entries,
        })
    }

    /// Looks up the entry for a status code.
    #[must_use]
    pub fn get(&self, status: u16) -> Option<&ErrorMapEntry> {
        self.entries.get(&status)
    }

    /// Number of classified statuses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the map carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 2,
        "revision": 1,
        "errors": {
            "0": {"name": "SUCCESS", "desc": "Success", "attrs": ["success"]},
            "7": {
                "name": "NOT_MY_VBUCKET",
                "desc": "Wrong vbucket",
                "attrs": ["fetch-config", "item-only", "retry-now"]
            },
            "86": {
                "name": "ETMPFAIL",
                "desc": "Temporary failure",
                "attrs": ["temp", "retry-later"],
                "retry": {
                    "strategy": "exponential",
                    "interval": 2,
                    "after": 4,
                    "ceil": 1000,
                    "max-duration": 30000
                }
            },
            "20": {
                "name": "EAUTH",
                "desc": "Auth failure",
                "attrs": ["auth", "conn-state-invalidated"]
            }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let map = ErrorMap::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(map.version, 2);
        assert_eq!(map.revision, 1);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_attribute_queries() {
        let map = ErrorMap::parse(SAMPLE.as_bytes()).unwrap();
        let nmvb = map.get(0x07).unwrap();
        assert!(nmvb.is_retryable());
        assert!(nmvb.has_attr(attrs::FETCH_CONFIG));
        assert!(!nmvb.invalidates_connection());

        let auth = map.get(0x20).unwrap();
        assert!(!auth.is_retryable());
        assert!(auth.invalidates_connection());
    }

    #[test]
    fn test_hex_keys() {
        let map = ErrorMap::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(map.get(0x86).unwrap().name, "ETMPFAIL");
        assert!(map.get(0x0086 + 1).is_none());
    }

    #[test]
    fn test_retry_spec_delays() {
        let map = ErrorMap::parse(SAMPLE.as_bytes()).unwrap();
        let retry = map.get(0x86).unwrap().retry.as_ref().unwrap();
        assert_eq!(retry.delay(0), Duration::from_millis(4 + 2));
        assert_eq!(retry.delay(1), Duration::from_millis(4 + 4));
        assert_eq!(retry.delay(2), Duration::from_millis(4 + 8));
        // Ceiling kicks in for deep attempts.
        assert_eq!(retry.delay(15), Duration::from_millis(4 + 1000));
    }

    #[test]
    fn test_rejects_non_hex_keys() {
        let bad = r#"{"version":2,"revision":1,"errors":{"zz":{"name":"X"}}}"#;
        assert!(ErrorMap::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ErrorMap::parse(b"not json").is_err());
    }
}
