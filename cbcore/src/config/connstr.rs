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

//! Connection string parsing.
//!
//! Grammar: `scheme://host[:port][,host[:port]…][/bucket][?option=value&…]`
//! with scheme one of `couchbase`, `couchbases`, `http`, `https`. The secure
//! schemes imply TLS. A single host with no explicit port is eligible for
//! DNS-SRV expansion during bootstrap.

use crate::error::Error;
use std::path::PathBuf;
use std::time::Duration;

/// Which advertised address family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Internal addresses, the default.
    #[default]
    Default,
    /// Alternate (external) addresses for clients outside the cluster
    /// network.
    External,
}

/// Tunables recognized in the connection string query section.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Use TLS for every connection. Implied by `couchbases`/`https`.
    pub enable_tls: bool,
    /// PEM file with the trust anchor(s) to use instead of the platform
    /// store.
    pub trust_certificate: Option<PathBuf>,
    /// Request mutation tokens on mutations.
    pub enable_mutation_tokens: bool,
    /// Negotiate out-of-order execution on sessions.
    pub enable_unordered_execution: bool,
    /// Enable TCP keepalive on sockets.
    pub enable_tcp_keepalive: bool,
    /// Permit SASL PLAIN on non-TLS streams.
    pub allow_plain_without_tls: bool,
    /// Default deadline for key/value operations.
    pub key_value_timeout: Duration,
    /// Default deadline for query/analytics/search requests.
    pub query_timeout: Duration,
    /// Default deadline for management requests.
    pub management_timeout: Duration,
    /// Address family selection.
    pub network: Network,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            enable_tls: false,
            trust_certificate: None,
            enable_mutation_tokens: true,
            enable_unordered_execution: true,
            enable_tcp_keepalive: true,
            allow_plain_without_tls: false,
            key_value_timeout: Duration::from_millis(2500),
            query_timeout: Duration::from_secs(75),
            management_timeout: Duration::from_secs(75),
            network: Network::Default,
        }
    }
}

/// A parsed connection string.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    /// Scheme as written.
    pub scheme: String,
    /// Seed hosts with optional explicit ports.
    pub hosts: Vec<(String, Option<u16>)>,
    /// Default bucket, from the path section.
    pub bucket: Option<String>,
    /// Parsed options.
    pub options: ClusterOptions,
}

impl ConnectionString {
    /// Parses a connection string.
    ///
    /// ```
    /// use cbcore::config::ConnectionString;
    ///
    /// let conn = ConnectionString::parse(
    ///     "couchbases://db1.example.com,db2.example.com/travel?key_value_timeout_ms=5000",
    /// ).unwrap();
    /// assert!(conn.options.enable_tls);
    /// assert_eq!(conn.hosts.len(), 2);
    /// assert_eq!(conn.bucket.as_deref(), Some("travel"));
    /// ```
    pub fn parse(input: &str) -> Result<Self, Error> {
        let (scheme, rest) = input.split_once("://").ok_or_else(|| invalid(input))?;
        let tls = match scheme {
            "couchbase" | "http" => false,
            "couchbases" | "https" => true,
            _ => {
                return Err(Error::InvalidArgument {
                    message: format!("unknown scheme {scheme:?}"),
                })
            }
        };

        let (authority_and_path, query) = match rest.split_once('?') {
            Some((ap, q)) => (ap, Some(q)),
            None => (rest, None),
        };
        let (authority, bucket) = match authority_and_path.split_once('/') {
            Some((a, b)) if !b.is_empty() => (a, Some(b.to_string())),
            Some((a, _)) => (a, None),
            None => (authority_and_path, None),
        };
        if authority.is_empty() {
            return Err(invalid(input));
        }

        let hosts = authority
            .split(',')
            .map(parse_host)
            .collect::<Result<Vec<_>, _>>()?;

        let mut options = ClusterOptions {
            enable_tls: tls,
            ..ClusterOptions::default()
        };
        if let Some(query) = query {
            apply_options(&mut options, query)?;
        }

        Ok(Self {
            scheme: scheme.to_string(),
            hosts,
            bucket,
            options,
        })
    }

    /// Returns `true` when the seed list is eligible for DNS-SRV expansion:
    /// exactly one host, no explicit port.
    #[must_use]
    pub fn srv_eligible(&self) -> bool {
        self.hosts.len() == 1 && self.hosts[0].1.is_none()
    }
}

fn invalid(input: &str) -> Error {
    Error::InvalidArgument {
        message: format!("malformed connection string {input:?}"),
    }
}

fn parse_host(part: &str) -> Result<(String, Option<u16>), Error> {
    let part = part.trim();
    if part.is_empty() {
        return Err(Error::InvalidArgument {
            message: "empty host in connection string".to_string(),
        });
    }
    // Bracketed IPv6 literal, optionally with a port.
    if let Some(rest) = part.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']').ok_or_else(|| Error::InvalidArgument {
            message: format!("unterminated ipv6 literal {part:?}"),
        })?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().map_err(|_| Error::InvalidArgument {
                message: format!("bad port in {part:?}"),
            })?),
            None => None,
        };
        return Ok((addr.to_string(), port));
    }
    match part.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| Error::InvalidArgument {
                message: format!("bad port in {part:?}"),
            })?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((part.to_string(), None)),
    }
}

fn apply_options(options: &mut ClusterOptions, query: &str) -> Result<(), Error> {
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| Error::InvalidArgument {
            message: format!("option {pair:?} lacks a value"),
        })?;
        match key {
            "enable_tls" => options.enable_tls = parse_bool(key, value)?,
            "trust_certificate" => options.trust_certificate = Some(PathBuf::from(value)),
            "enable_mutation_tokens" => {
                options.enable_mutation_tokens = parse_bool(key, value)?;
            }
            "enable_unordered_execution" => {
                options.enable_unordered_execution = parse_bool(key, value)?;
            }
            "enable_tcp_keepalive" => options.enable_tcp_keepalive = parse_bool(key, value)?,
            "allow_plain_without_tls" => {
                options.allow_plain_without_tls = parse_bool(key, value)?;
            }
            "key_value_timeout_ms" => {
                options.key_value_timeout = Duration::from_millis(parse_ms(key, value)?);
            }
            "query_timeout_ms" => {
                options.query_timeout = Duration::from_millis(parse_ms(key, value)?);
            }
            "management_timeout_ms" => {
                options.management_timeout = Duration::from_millis(parse_ms(key, value)?);
            }
            "network" => {
                options.network = match value {
                    "default" => Network::Default,
                    "external" => Network::External,
                    _ => {
                        return Err(Error::InvalidArgument {
                            message: format!("network must be default or external, got {value:?}"),
                        })
                    }
                };
            }
            _ => {
                return Err(Error::InvalidArgument {
                    message: format!("unknown option {key:?}"),
                })
            }
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(Error::InvalidArgument {
            message: format!("{key} must be a boolean, got {value:?}"),
        }),
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64, Error> {
    value.parse().map_err(|_| Error::InvalidArgument {
        message: format!("{key} must be milliseconds, got {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal() {
        let conn = ConnectionString::parse("couchbase://127.0.0.1").unwrap();
        assert_eq!(conn.scheme, "couchbase");
        assert_eq!(conn.hosts, vec![("127.0.0.1".to_string(), None)]);
        assert!(conn.bucket.is_none());
        assert!(!conn.options.enable_tls);
        assert!(conn.srv_eligible());
    }

    #[test]
    fn test_multiple_hosts_and_ports() {
        let conn =
            ConnectionString::parse("couchbase://a.example.com:11210,b.example.com").unwrap();
        assert_eq!(conn.hosts.len(), 2);
        assert_eq!(conn.hosts[0], ("a.example.com".to_string(), Some(11210)));
        assert_eq!(conn.hosts[1], ("b.example.com".to_string(), None));
        assert!(!conn.srv_eligible());
    }

    #[test]
    fn test_tls_scheme_and_bucket() {
        let conn = ConnectionString::parse("couchbases://db.example.com/beers").unwrap();
        assert!(conn.options.enable_tls);
        assert_eq!(conn.bucket.as_deref(), Some("beers"));
    }

    #[test]
    fn test_options() {
        let conn = ConnectionString::parse(
            "couchbase://h/b?enable_tls=true&key_value_timeout_ms=750&network=external\
             &enable_mutation_tokens=false&trust_certificate=/etc/ca.pem",
        )
        .unwrap();
        assert!(conn.options.enable_tls);
        assert_eq!(conn.options.key_value_timeout, Duration::from_millis(750));
        assert_eq!(conn.options.network, Network::External);
        assert!(!conn.options.enable_mutation_tokens);
        assert_eq!(
            conn.options.trust_certificate.as_deref(),
            Some(std::path::Path::new("/etc/ca.pem"))
        );
    }

    #[test]
    fn test_defaults() {
        let options = ClusterOptions::default();
        assert!(options.enable_mutation_tokens);
        assert!(options.enable_tcp_keepalive);
        assert!(!options.allow_plain_without_tls);
        assert_eq!(options.key_value_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_ipv6_literal() {
        let conn = ConnectionString::parse("couchbase://[::1]:11210,[fe80::2]").unwrap();
        assert_eq!(conn.hosts[0], ("::1".to_string(), Some(11210)));
        assert_eq!(conn.hosts[1], ("fe80::2".to_string(), None));
    }

    #[test]
    fn test_rejections() {
        assert!(ConnectionString::parse("tcp://h").is_err());
        assert!(ConnectionString::parse("couchbase://").is_err());
        assert!(ConnectionString::parse("no-scheme").is_err());
        assert!(ConnectionString::parse("couchbase://h?bogus=1").is_err());
        assert!(ConnectionString::parse("couchbase://h?enable_tls=maybe").is_err());
        assert!(ConnectionString::parse("couchbase://h:port").is_err());
    }

    #[test]
    fn test_trailing_slash_means_no_bucket() {
        let conn = ConnectionString::parse("couchbase://h/").unwrap();
        assert!(conn.bucket.is_none());
    }
}
