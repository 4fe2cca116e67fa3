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

//! TLS client configuration.
//!
//! Builds the `rustls` client config shared by every TLS stream of a
//! cluster: either the platform trust store or an explicit trust anchor file
//! supplied through the `trust_certificate` connection-string option.

use super::TransportError;
use rustls::pki_types::ServerName;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Builds a TLS connector trusting the platform's native roots.
pub fn connector_with_native_roots() -> Result<TlsConnector, TransportError> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().map_err(|e| {
        TransportError::InvalidTlsConfiguration {
            detail: format!("loading native roots: {e}"),
        }
    })? {
        root_store
            .add(cert)
            .map_err(|e| TransportError::InvalidTlsConfiguration {
                detail: format!("adding native root: {e}"),
            })?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Builds a TLS connector trusting exactly the certificates in a PEM file.
pub fn connector_with_trust_certificate(path: &Path) -> Result<TlsConnector, TransportError> {
    let pem = std::fs::read(path).map_err(|e| TransportError::InvalidTlsConfiguration {
        detail: format!("reading {}: {e}", path.display()),
    })?;
    let mut reader = io::BufReader::new(&pem[..]);
    let mut root_store = rustls::RootCertStore::empty();
    let mut found = false;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| TransportError::InvalidTlsConfiguration {
            detail: format!("parsing {}: {e}", path.display()),
        })?;
        root_store
            .add(cert)
            .map_err(|e| TransportError::InvalidTlsConfiguration {
                detail: format!("adding trust anchor: {e}"),
            })?;
        found = true;
    }
    if !found {
        return Err(TransportError::InvalidTlsConfiguration {
            detail: format!("{} contains no certificates", path.display()),
        });
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Converts a hostname into the SNI server name.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TransportError> {
    ServerName::try_from(host.to_string()).map_err(|e| TransportError::InvalidTlsConfiguration {
        detail: format!("invalid server name {host:?}: {e}"),
    })
}
