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

//! Cluster topology model.
//!
//! A [`ClusterConfig`] is an immutable snapshot of what the server published:
//! revision, nodes with their per-service ports, bucket capabilities, and the
//! partition (vbucket) map. Snapshots are shared as `Arc` and replaced
//! atomically by the owning bucket; a dispatch holds the snapshot it started
//! with for its whole lifetime, so it never observes a half-applied change.
//!
//! The partition map indexes into the key/value server list, which the
//! server orders independently from the node list; both orders are preserved
//! as published.

pub mod connstr;

pub use connstr::{ClusterOptions, ConnectionString, Network};

use crate::error::Error;
use crate::transport::Endpoint;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Services a node can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Binary key/value protocol.
    KeyValue,
    /// N1QL query service.
    Query,
    /// Analytics service.
    Analytics,
    /// Full-text search service.
    Search,
    /// Map/reduce view service.
    Views,
    /// Cluster management REST API.
    Management,
}

impl ServiceType {
    /// Human-readable service name for error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::KeyValue => "key_value",
            Self::Query => "query",
            Self::Analytics => "analytics",
            Self::Search => "search",
            Self::Views => "views",
            Self::Management => "management",
        }
    }
}

/// Bucket flavor, which constrains the operations the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketType {
    /// Persistent, vbucket-distributed.
    Couchbase,
    /// In-memory only, vbucket-distributed.
    Ephemeral,
    /// Legacy ketama-distributed cache bucket.
    Memcached,
}

/// Ports one node advertises, plain and TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePorts {
    /// Key/value port.
    pub kv: Option<u16>,
    /// Key/value TLS port.
    pub kv_tls: Option<u16>,
    /// Management port.
    pub mgmt: Option<u16>,
    /// Management TLS port.
    pub mgmt_tls: Option<u16>,
    /// Query port.
    pub query: Option<u16>,
    /// Query TLS port.
    pub query_tls: Option<u16>,
    /// Search port.
    pub search: Option<u16>,
    /// Search TLS port.
    pub search_tls: Option<u16>,
    /// Analytics port.
    pub analytics: Option<u16>,
    /// Analytics TLS port.
    pub analytics_tls: Option<u16>,
    /// Views port.
    pub views: Option<u16>,
    /// Views TLS port.
    pub views_tls: Option<u16>,
}

impl ServicePorts {
    /// Port for a service in the requested security mode.
    #[must_use]
    pub fn get(&self, service: ServiceType, tls: bool) -> Option<u16> {
        match (service, tls) {
            (ServiceType::KeyValue, false) => self.kv,
            (ServiceType::KeyValue, true) => self.kv_tls,
            (ServiceType::Management, false) => self.mgmt,
            (ServiceType::Management, true) => self.mgmt_tls,
            (ServiceType::Query, false) => self.query,
            (ServiceType::Query, true) => self.query_tls,
            (ServiceType::Search, false) => self.search,
            (ServiceType::Search, true) => self.search_tls,
            (ServiceType::Analytics, false) => self.analytics,
            (ServiceType::Analytics, true) => self.analytics_tls,
            (ServiceType::Views, false) => self.views,
            (ServiceType::Views, true) => self.views_tls,
        }
    }
}

/// One node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Hostname after `$HOST` substitution.
    pub hostname: String,
    /// Advertised ports.
    pub services: ServicePorts,
    /// Externally reachable hostname, when the cluster publishes alternate
    /// addresses.
    pub external_hostname: Option<String>,
    /// Externally reachable ports.
    pub external_services: ServicePorts,
    /// Whether this entry describes the node the config was fetched from.
    pub this_node: bool,
}

impl NodeInfo {
    /// Host and port for a service on the selected network.
    ///
    /// On the external network, nodes that publish no alternate entry fall
    /// back to their internal address.
    #[must_use]
    pub fn address_for(
        &self,
        service: ServiceType,
        tls: bool,
        network: Network,
    ) -> Option<(String, u16)> {
        match network {
            Network::Default => {
                let port = self.services.get(service, tls)?;
                Some((self.hostname.clone(), port))
            }
            Network::External => match self.external_services.get(service, tls) {
                Some(port) => {
                    let host = self
                        .external_hostname
                        .clone()
                        .unwrap_or_else(|| self.hostname.clone());
                    Some((host, port))
                }
                None => self.address_for(service, tls, Network::Default),
            },
        }
    }
}

/// The vbucket map: for each partition, the key/value server indexes of the
/// master (position 0) and replicas (1..N). An index of -1 marks a vacant
/// slot during rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
    entries: Vec<Vec<i32>>,
}

impl PartitionMap {
    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Key/value server index of the master for a partition.
    #[must_use]
    pub fn master(&self, partition: u16) -> Option<usize> {
        self.chain_entry(partition, 0)
    }

    /// Key/value server index of the n-th replica (0-based) for a partition.
    #[must_use]
    pub fn replica(&self, partition: u16, replica_index: usize) -> Option<usize> {
        self.chain_entry(partition, replica_index + 1)
    }

    fn chain_entry(&self, partition: u16, position: usize) -> Option<usize> {
        let chain = self.entries.get(partition as usize)?;
        match chain.get(position) {
            Some(&index) if index >= 0 => Some(index as usize),
            _ => None,
        }
    }
}

/// An immutable topology snapshot.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Config epoch; bumps on cluster rebuilds, orders above `rev`.
    pub rev_epoch: u64,
    /// Config revision within the epoch.
    pub rev: u64,
    /// Bucket name for bucket-scoped configs.
    pub name: Option<String>,
    /// Bucket uuid.
    pub uuid: Option<String>,
    /// Bucket flavor; `None` for cluster-scoped configs.
    pub bucket_type: Option<BucketType>,
    /// Cluster nodes in published order.
    pub nodes: Vec<NodeInfo>,
    /// Bucket capability strings as published.
    pub capabilities: HashSet<String>,
    /// Key/value endpoints in vbucket-map order (plain ports).
    pub server_list: Vec<Endpoint>,
    /// The vbucket map, absent for cluster-scoped and memcached configs.
    pub partition_map: Option<PartitionMap>,
    /// Replica count the bucket was created with.
    pub num_replicas: u32,
}

#[derive(Debug, Deserialize)]
struct WireAlternate {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    ports: HashMap<String, u16>,
}

#[derive(Debug, Deserialize)]
struct WireAlternateAddresses {
    #[serde(default)]
    external: Option<WireAlternate>,
}

#[derive(Debug, Deserialize)]
struct WireNodeExt {
    #[serde(default)]
    services: HashMap<String, u16>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "alternateAddresses")]
    alternate_addresses: Option<WireAlternateAddresses>,
    #[serde(default, rename = "thisNode")]
    this_node: bool,
}

#[derive(Debug, Deserialize)]
struct WireVbucketServerMap {
    #[serde(rename = "hashAlgorithm")]
    hash_algorithm: String,
    #[serde(rename = "numReplicas")]
    num_replicas: u32,
    #[serde(rename = "serverList")]
    server_list: Vec<String>,
    #[serde(rename = "vBucketMap")]
    vbucket_map: Vec<Vec<i32>>,
}

#[derive(Debug, Deserialize)]
struct WireConfig {
    rev: u64,
    #[serde(default, rename = "revEpoch")]
    rev_epoch: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default, rename = "bucketType")]
    bucket_type: Option<String>,
    #[serde(default, rename = "nodeLocator")]
    node_locator: Option<String>,
    #[serde(default, rename = "nodesExt")]
    nodes_ext: Vec<WireNodeExt>,
    #[serde(default, rename = "bucketCapabilities")]
    bucket_capabilities: Vec<String>,
    #[serde(default, rename = "vBucketServerMap")]
    vbucket_server_map: Option<WireVbucketServerMap>,
}

impl ClusterConfig {
    /// Parses a config JSON body.
    ///
    /// `origin_host` replaces the `$HOST` placeholder the server uses for
    /// "the address you reached me on" in single-node setups, and fills in
    /// nodes that omit their hostname entirely.
    pub fn parse(body: &[u8], origin_host: &str) -> Result<Self, Error> {
        let wire: WireConfig = serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
            message: format!("cluster config: {e}"),
        })?;

        let nodes = wire
            .nodes_ext
            .iter()
            .map(|node| {
                let hostname = match &node.hostname {
                    Some(host) => host.replace("$HOST", origin_host),
                    None => origin_host.to_string(),
                };
                let external = node
                    .alternate_addresses
                    .as_ref()
                    .and_then(|alt| alt.external.as_ref());
                NodeInfo {
                    hostname,
                    services: service_ports(&node.services),
                    external_hostname: external.and_then(|alt| alt.hostname.clone()),
                    external_services: external
                        .map(|alt| service_ports(&alt.ports))
                        .unwrap_or_default(),
                    this_node: node.this_node,
                }
            })
            .collect();

        let bucket_type = match wire.bucket_type.as_deref() {
            Some("membase") | Some("couchbase") => Some(BucketType::Couchbase),
            Some("ephemeral") => Some(BucketType::Ephemeral),
            Some("memcached") => Some(BucketType::Memcached),
            Some(other) => {
                return Err(Error::ParsingFailure {
                    message: format!("unknown bucket type {other:?}"),
                })
            }
            // The terse config carries the locator instead of the type.
            None => match wire.node_locator.as_deref() {
                Some("vbucket") => Some(BucketType::Couchbase),
                Some("ketama") => Some(BucketType::Memcached),
                _ => None,
            },
        };

        let (server_list, partition_map, num_replicas) = match wire.vbucket_server_map {
            Some(map) => {
                if map.hash_algorithm != "CRC" {
                    return Err(Error::ParsingFailure {
                        message: format!("unsupported hash algorithm {:?}", map.hash_algorithm),
                    });
                }
                let servers = map
                    .server_list
                    .iter()
                    .map(|entry| parse_kv_endpoint(entry, origin_host))
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    servers,
                    Some(PartitionMap {
                        entries: map.vbucket_map,
                    }),
                    map.num_replicas,
                )
            }
            None => (Vec::new(), None, 0),
        };

        Ok(Self {
            rev_epoch: wire.rev_epoch,
            rev: wire.rev,
            name: wire.name,
            uuid: wire.uuid,
            bucket_type,
            nodes,
            capabilities: wire.bucket_capabilities.into_iter().collect(),
            server_list,
            partition_map,
            num_replicas,
        })
    }

    /// Returns `true` when this snapshot strictly supersedes `other`.
    ///
    /// Ordering is `(rev_epoch, rev)` lexicographic; equal revisions never
    /// replace the installed snapshot.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        (self.rev_epoch, self.rev) > (other.rev_epoch, other.rev)
    }

    /// Number of partitions, 0 when no map is present.
    #[must_use]
    pub fn partition_count(&self) -> u16 {
        self.partition_map
            .as_ref()
            .map_or(0, PartitionMap::partition_count)
    }

    /// Returns `true` when the bucket advertises a capability.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Key/value endpoint by vbucket-map server index, honoring TLS and the
    /// selected network.
    ///
    /// The server list always publishes internal plain addresses; the TLS
    /// port and any alternate address are looked up on the node entry with
    /// the same hostname.
    #[must_use]
    pub fn kv_endpoint(
        &self,
        server_index: usize,
        tls: bool,
        network: Network,
    ) -> Option<Endpoint> {
        let plain = self.server_list.get(server_index)?;
        if !tls && network == Network::Default {
            return Some(plain.clone());
        }
        let node = self.nodes.iter().find(|n| n.hostname == plain.host)?;
        let (host, port) = node.address_for(ServiceType::KeyValue, tls, network)?;
        Some(Endpoint::new(host, port))
    }

    /// All endpoints advertising a service, in node order.
    #[must_use]
    pub fn endpoints_for_service(
        &self,
        service: ServiceType,
        tls: bool,
        network: Network,
    ) -> Vec<Endpoint> {
        self.nodes
            .iter()
            .filter_map(|node| {
                node.address_for(service, tls, network)
                    .map(|(host, port)| Endpoint::new(host, port))
            })
            .collect()
    }
}

fn service_ports(map: &HashMap<String, u16>) -> ServicePorts {
    ServicePorts {
        kv: map.get("kv").copied(),
        kv_tls: map.get("kvSSL").copied(),
        mgmt: map.get("mgmt").copied(),
        mgmt_tls: map.get("mgmtSSL").copied(),
        query: map.get("n1ql").copied(),
        query_tls: map.get("n1qlSSL").copied(),
        search: map.get("fts").copied(),
        search_tls: map.get("ftsSSL").copied(),
        analytics: map.get("cbas").copied(),
        analytics_tls: map.get("cbasSSL").copied(),
        views: map.get("capi").copied(),
        views_tls: map.get("capiSSL").copied(),
    }
}

fn parse_kv_endpoint(entry: &str, origin_host: &str) -> Result<Endpoint, Error> {
    let (host, port) = entry.rsplit_once(':').ok_or_else(|| Error::ParsingFailure {
        message: format!("server list entry {entry:?} lacks a port"),
    })?;
    let port: u16 = port.parse().map_err(|_| Error::ParsingFailure {
        message: format!("server list entry {entry:?} has a bad port"),
    })?;
    let host = host.replace("$HOST", origin_host);
    Ok(Endpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "rev": 2068,
        "revEpoch": 1,
        "name": "travel-sample",
        "uuid": "b24d2a58",
        "nodeLocator": "vbucket",
        "nodesExt": [
            {
                "services": {"kv": 11210, "kvSSL": 11207, "mgmt": 8091,
                             "mgmtSSL": 18091, "n1ql": 8093, "n1qlSSL": 18093,
                             "capi": 8092},
                "hostname": "node-a.example.com",
                "thisNode": true
            },
            {
                "services": {"kv": 11210, "kvSSL": 11207, "mgmt": 8091,
                             "fts": 8094},
                "hostname": "node-b.example.com"
            }
        ],
        "bucketCapabilities": ["xattr", "collections", "durableWrite"],
        "vBucketServerMap": {
            "hashAlgorithm": "CRC",
            "numReplicas": 1,
            "serverList": ["node-a.example.com:11210", "node-b.example.com:11210"],
            "vBucketMap": [[0, 1], [1, 0], [0, -1], [1, 0]]
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = ClusterConfig::parse(SAMPLE.as_bytes(), "node-a.example.com").unwrap();
        assert_eq!(config.rev, 2068);
        assert_eq!(config.rev_epoch, 1);
        assert_eq!(config.name.as_deref(), Some("travel-sample"));
        assert_eq!(config.bucket_type, Some(BucketType::Couchbase));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.partition_count(), 4);
        assert_eq!(config.num_replicas, 1);
        assert!(config.has_capability("collections"));
        assert!(!config.has_capability("rangeScan"));
    }

    #[test]
    fn test_partition_chains() {
        let config = ClusterConfig::parse(SAMPLE.as_bytes(), "node-a.example.com").unwrap();
        let map = config.partition_map.as_ref().unwrap();
        assert_eq!(map.master(0), Some(0));
        assert_eq!(map.replica(0, 0), Some(1));
        assert_eq!(map.master(1), Some(1));
        // Vacant replica slot during rebalance.
        assert_eq!(map.replica(2, 0), None);
        // Out of range.
        assert_eq!(map.master(99), None);
        assert_eq!(map.replica(0, 5), None);
    }

    #[test]
    fn test_host_substitution() {
        let body = r#"{
            "rev": 1,
            "nodesExt": [{"services": {"kv": 11210}, "hostname": "$HOST"}],
            "vBucketServerMap": {
                "hashAlgorithm": "CRC",
                "numReplicas": 0,
                "serverList": ["$HOST:11210"],
                "vBucketMap": [[0]]
            }
        }"#;
        let config = ClusterConfig::parse(body.as_bytes(), "10.0.0.5").unwrap();
        assert_eq!(config.nodes[0].hostname, "10.0.0.5");
        assert_eq!(config.server_list[0], Endpoint::new("10.0.0.5", 11210));
    }

    #[test]
    fn test_revision_ordering() {
        let older = ClusterConfig::parse(SAMPLE.as_bytes(), "h").unwrap();
        let mut newer = older.clone();
        newer.rev += 1;
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older));

        // Epoch dominates revision.
        let mut next_epoch = older.clone();
        next_epoch.rev_epoch += 1;
        next_epoch.rev = 0;
        assert!(next_epoch.is_newer_than(&newer));
    }

    #[test]
    fn test_tls_kv_endpoints() {
        let config = ClusterConfig::parse(SAMPLE.as_bytes(), "node-a.example.com").unwrap();
        assert_eq!(
            config.kv_endpoint(0, false, Network::Default),
            Some(Endpoint::new("node-a.example.com", 11210))
        );
        assert_eq!(
            config.kv_endpoint(0, true, Network::Default),
            Some(Endpoint::new("node-a.example.com", 11207))
        );
        assert_eq!(config.kv_endpoint(9, false, Network::Default), None);
    }

    #[test]
    fn test_service_endpoints() {
        let config = ClusterConfig::parse(SAMPLE.as_bytes(), "node-a.example.com").unwrap();
        let query = config.endpoints_for_service(ServiceType::Query, false, Network::Default);
        assert_eq!(query.len(), 1);
        assert_eq!(query[0].port, 8093);

        let search = config.endpoints_for_service(ServiceType::Search, false, Network::Default);
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].host, "node-b.example.com");

        let mgmt = config.endpoints_for_service(ServiceType::Management, false, Network::Default);
        assert_eq!(mgmt.len(), 2);
    }

    #[test]
    fn test_external_network_addresses() {
        let body = r#"{
            "rev": 5,
            "nodesExt": [{
                "services": {"kv": 11210, "kvSSL": 11207, "n1ql": 8093},
                "hostname": "10.0.0.5",
                "alternateAddresses": {
                    "external": {
                        "hostname": "db.public.example.com",
                        "ports": {"kv": 21210, "kvSSL": 21207}
                    }
                }
            }],
            "vBucketServerMap": {
                "hashAlgorithm": "CRC",
                "numReplicas": 0,
                "serverList": ["10.0.0.5:11210"],
                "vBucketMap": [[0]]
            }
        }"#;
        let config = ClusterConfig::parse(body.as_bytes(), "10.0.0.5").unwrap();

        assert_eq!(
            config.kv_endpoint(0, false, Network::External),
            Some(Endpoint::new("db.public.example.com", 21210))
        );
        assert_eq!(
            config.kv_endpoint(0, true, Network::External),
            Some(Endpoint::new("db.public.example.com", 21207))
        );
        // Services without an alternate port fall back to the internal
        // address.
        let query = config.endpoints_for_service(ServiceType::Query, false, Network::External);
        assert_eq!(query, vec![Endpoint::new("10.0.0.5", 8093)]);
    }

    #[test]
    fn test_rejects_unknown_hash_algorithm() {
        let body = r#"{
            "rev": 1,
            "vBucketServerMap": {
                "hashAlgorithm": "KETAMA",
                "numReplicas": 0,
                "serverList": [],
                "vBucketMap": []
            }
        }"#;
        assert!(ClusterConfig::parse(body.as_bytes(), "h").is_err());
    }
}
