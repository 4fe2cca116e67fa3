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

//! Transport layer error types.
//!
//! Transport errors are the lowest layer of the error hierarchy: failures to
//! resolve, connect, handshake, read or write. They never reach completion
//! handlers directly; the session converts them into the uniform taxonomy,
//! and the retry orchestrator decides whether the dispatch is re-attempted.

use std::io;
use thiserror::Error;

/// Errors raised while establishing or using a byte stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// DNS resolution produced no usable address.
    #[error("failed to resolve {host}: {detail}")]
    ResolveFailed {
        /// Hostname as given.
        host: String,
        /// Resolver detail.
        detail: String,
    },

    /// Failed to establish a connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed after the TCP connect succeeded.
    #[error("tls handshake with {address} failed: {source}")]
    HandshakeFailed {
        /// The address that failed the handshake.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An established connection was lost.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the connection went away.
        reason: String,
        /// The underlying I/O error, if available.
        #[source]
        source: Option<io::Error>,
    },

    /// A read from the stream failed.
    #[error("read failed: {source}")]
    ReadFailed {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A write to the stream failed.
    #[error("write failed: {source}")]
    WriteFailed {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS configuration could not be built.
    #[error("invalid tls configuration: {detail}")]
    InvalidTlsConfiguration {
        /// What was wrong.
        detail: String,
    },

    /// The stream was closed while the operation was queued or in flight.
    #[error("stream closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` when re-dialing may succeed.
    ///
    /// Configuration problems are permanent; everything network-shaped is
    /// worth another attempt.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidTlsConfiguration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = TransportError::ConnectionFailed {
            address: "127.0.0.1:11210".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_recoverable());

        let err = TransportError::InvalidTlsConfiguration {
            detail: "bad trust anchor".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;
        let err = TransportError::ReadFailed {
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("read failed"));
    }
}
