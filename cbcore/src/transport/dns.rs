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

//! Endpoint resolution.
//!
//! Two lookups live here: plain A/AAAA resolution of `host:port` endpoints,
//! and the DNS-SRV expansion applied when a connection string names a single
//! host with no port (`_couchbase._tcp.<host>` / `_couchbases._tcp.<host>`).

use super::TransportError;
use std::net::SocketAddr;
use tokio::net::lookup_host;
use tracing::debug;

/// SRV service label for plain connections.
pub const SRV_PLAIN: &str = "_couchbase._tcp";
/// SRV service label for TLS connections.
pub const SRV_TLS: &str = "_couchbases._tcp";

/// Resolves `host:port` into socket addresses, preserving resolver order.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| TransportError::ResolveFailed {
            host: host.to_string(),
            detail: e.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::ResolveFailed {
            host: host.to_string(),
            detail: "no addresses".to_string(),
        });
    }
    debug!(host, count = addrs.len(), "resolved endpoint");
    Ok(addrs)
}

/// Expands a bare seed host through DNS-SRV.
///
/// Returns the `(target, port)` pairs published for the service, ordered by
/// priority then weight, or an empty list when the record does not exist so
/// the caller can fall back to the host itself on the default port.
pub async fn srv_expand(host: &str, tls: bool) -> Result<Vec<(String, u16)>, TransportError> {
    let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf().map_err(
        |e| TransportError::ResolveFailed {
            host: host.to_string(),
            detail: format!("resolver init: {e}"),
        },
    )?;
    let service = if tls { SRV_TLS } else { SRV_PLAIN };
    let name = format!("{service}.{host}.");
    let lookup = match resolver.srv_lookup(name.clone()).await {
        Ok(lookup) => lookup,
        Err(e) => {
            debug!(%name, error = %e, "no srv record, using seed host directly");
            return Ok(Vec::new());
        }
    };
    let mut records: Vec<_> = lookup.iter().collect();
    records.sort_by_key(|srv| (srv.priority(), std::cmp::Reverse(srv.weight())));
    let seeds = records
        .into_iter()
        .map(|srv| {
            let target = srv.target().to_utf8();
            (target.trim_end_matches('.').to_string(), srv.port())
        })
        .collect();
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_loopback() {
        let addrs = resolve("localhost", 11210).await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 11210));
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let result = resolve("definitely-not-a-real-host.invalid", 11210).await;
        assert!(result.is_err());
    }
}
