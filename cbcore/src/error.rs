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

//! Uniform error taxonomy for the client core.
//!
//! Every operation resolves to either a typed response or exactly one
//! [`Error`] from this namespace, regardless of which service produced it.
//! Locally recoverable conditions are consumed by the retry orchestrator and
//! never reach the caller; what does reach the caller is the final
//! classification, with timeouts carrying the trace of retry reasons that
//! preceded them.
//!
//! The taxonomy is split in four groups mirroring the services that raise
//! them: common, key/value, query-family, and management. Transport failures
//! are wrapped so that lower layers can propagate `io::Error` context without
//! leaking `io::Error` into completion handlers.

use crate::retry::RetryReason;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// The single error namespace surfaced by every operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // -- common ------------------------------------------------------------
    /// The request was canceled before a response was observed.
    #[error("request canceled: {reason}")]
    RequestCanceled {
        /// Why the request was canceled (teardown, explicit cancel, ...).
        reason: String,
    },

    /// The caller supplied an argument the server or client rejects outright.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },

    /// No node currently advertises the service the request targets.
    #[error("service not available: {service}")]
    ServiceNotAvailable {
        /// Human-readable service name.
        service: String,
    },

    /// The server reported an internal failure it could not classify.
    #[error("internal server failure")]
    InternalServerFailure,

    /// Authentication was rejected or could not be completed.
    #[error("authentication failure: {message}")]
    AuthenticationFailure {
        /// Mechanism-level detail.
        message: String,
    },

    /// The server is temporarily unable to process the request.
    #[error("temporary failure")]
    TemporaryFailure,

    /// A server payload could not be parsed.
    #[error("parsing failure: {message}")]
    ParsingFailure {
        /// What failed to parse.
        message: String,
    },

    /// A compare-and-swap precondition did not hold.
    #[error("cas mismatch")]
    CasMismatch,

    /// The addressed bucket does not exist or is not accessible.
    #[error("bucket not found: {name}")]
    BucketNotFound {
        /// Bucket name as requested.
        name: String,
    },

    /// The addressed collection does not exist in the current manifest.
    #[error("collection not found")]
    CollectionNotFound,

    /// The operation is not supported by this server or bucket type.
    #[error("unsupported operation")]
    UnsupportedOperation,

    /// The deadline elapsed and the operation may have taken effect.
    #[error("ambiguous timeout after {elapsed:?} ({attempts} attempts)")]
    AmbiguousTimeout {
        /// Wall-clock time spent including retries.
        elapsed: Duration,
        /// Number of dispatch attempts made.
        attempts: u32,
        /// Retry reasons observed along the way, oldest first.
        reasons: Vec<RetryReason>,
    },

    /// The deadline elapsed and the operation definitely did not take effect.
    #[error("unambiguous timeout after {elapsed:?} ({attempts} attempts)")]
    UnambiguousTimeout {
        /// Wall-clock time spent including retries.
        elapsed: Duration,
        /// Number of dispatch attempts made.
        attempts: u32,
        /// Retry reasons observed along the way, oldest first.
        reasons: Vec<RetryReason>,
    },

    /// A feature required by the request was not negotiated with the server.
    #[error("feature not available: {feature}")]
    FeatureNotAvailable {
        /// Feature name.
        feature: String,
    },

    /// The addressed scope does not exist.
    #[error("scope not found")]
    ScopeNotFound,

    /// The referenced index does not exist.
    #[error("index not found")]
    IndexNotFound,

    /// The index being created already exists.
    #[error("index exists")]
    IndexExists,

    /// A request could not be encoded for the wire.
    #[error("encoding failure: {message}")]
    EncodingFailure {
        /// What failed to encode.
        message: String,
    },

    /// A response could not be decoded from the wire.
    #[error("decoding failure: {message}")]
    DecodingFailure {
        /// What failed to decode.
        message: String,
    },

    /// The server applied rate limiting to this tenant.
    #[error("rate limited")]
    RateLimited,

    /// The server applied a quota limit to this tenant.
    #[error("quota limited")]
    QuotaLimited,

    // -- key/value ---------------------------------------------------------
    /// The document does not exist.
    #[error("document not found")]
    DocumentNotFound,

    /// The document already exists.
    #[error("document exists")]
    DocumentExists,

    /// The document is locked by another holder.
    #[error("document locked")]
    DocumentLocked,

    /// The value exceeds the server's size limit.
    #[error("value too large")]
    ValueTooLarge,

    /// The value was rejected by the server (for example non-JSON where JSON
    /// is required).
    #[error("value invalid")]
    ValueInvalid,

    /// The requested durability level is not valid.
    #[error("durability level invalid")]
    DurabilityLevelInvalid,

    /// The requested durability level cannot currently be satisfied.
    #[error("durability impossible")]
    DurabilityImpossible,

    /// The durable write timed out in an ambiguous state.
    #[error("durability ambiguous")]
    DurabilityAmbiguous,

    /// Another durable write on the same key is in progress.
    #[error("durable write in progress")]
    DurableWriteInProgress,

    /// A durable write on the same key is being re-committed.
    #[error("durable write re-commit in progress")]
    DurableWriteReCommitInProgress,

    /// The sub-document path does not exist.
    #[error("path not found")]
    PathNotFound,

    /// The sub-document path conflicts with the document structure.
    #[error("path mismatch")]
    PathMismatch,

    /// The sub-document path is not syntactically valid.
    #[error("path invalid")]
    PathInvalid,

    /// The sub-document path exceeds depth or length limits.
    #[error("path too big")]
    PathTooBig,

    /// The sub-document path already exists.
    #[error("path exists")]
    PathExists,

    /// The xattr flag combination is not valid.
    #[error("xattr invalid flag combination")]
    XattrInvalidFlagCombo,

    /// The xattr key combination is not valid.
    #[error("xattr invalid key combination")]
    XattrInvalidKeyCombo,

    /// The xattr macro is not known to the server.
    #[error("xattr unknown macro")]
    XattrUnknownMacro,

    /// The virtual xattr is not known to the server.
    #[error("xattr unknown virtual attribute")]
    XattrUnknownVirtualAttribute,

    /// The virtual xattr cannot be modified.
    #[error("xattr cannot modify virtual attribute")]
    XattrCannotModifyVirtualAttribute,

    // -- query / analytics / search / views --------------------------------
    /// The query planner rejected the statement.
    #[error("planning failure")]
    PlanningFailure,

    /// An index failed while serving the request.
    #[error("index failure")]
    IndexFailure,

    /// A prepared statement could not be found or re-prepared.
    #[error("prepared statement failure")]
    PreparedStatementFailure,

    /// A DML statement failed after partial application.
    #[error("dml failure")]
    DmlFailure,

    /// The analytics compiler rejected the statement.
    #[error("compilation failure")]
    CompilationFailure,

    /// The analytics job queue is full.
    #[error("job queue full")]
    JobQueueFull,

    /// The referenced analytics dataset does not exist.
    #[error("dataset not found")]
    DatasetNotFound,

    /// The referenced analytics link does not exist.
    #[error("link not found")]
    LinkNotFound,

    // -- management --------------------------------------------------------
    /// The referenced user does not exist.
    #[error("user not found")]
    UserNotFound,

    /// The referenced group does not exist.
    #[error("group not found")]
    GroupNotFound,

    /// The bucket being created already exists.
    #[error("bucket exists")]
    BucketExists,

    /// The user being created already exists.
    #[error("user exists")]
    UserExists,

    /// The collection being created already exists.
    #[error("collection exists")]
    CollectionExists,

    // -- plumbing ----------------------------------------------------------
    /// A transport-level failure that escaped the retry budget.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Returns `true` when the condition may clear on its own and the
    /// operation is worth re-dispatching, absent an error-map override.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TemporaryFailure | Self::DocumentLocked | Self::DurableWriteInProgress => true,
            Self::Transport(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Returns `true` for either timeout classification.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousTimeout { .. } | Self::UnambiguousTimeout { .. }
        )
    }

    /// Builds the timeout variant appropriate for the operation kind.
    ///
    /// Mutations that may already be on the wire time out ambiguously; pure
    /// reads always time out unambiguously.
    #[must_use]
    pub fn timeout(
        ambiguous: bool,
        elapsed: Duration,
        attempts: u32,
        reasons: Vec<RetryReason>,
    ) -> Self {
        if ambiguous {
            Self::AmbiguousTimeout {
                elapsed,
                attempts,
                reasons,
            }
        } else {
            Self::UnambiguousTimeout {
                elapsed,
                attempts,
                reasons,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::TemporaryFailure.is_retryable());
        assert!(Error::DocumentLocked.is_retryable());
        assert!(!Error::CasMismatch.is_retryable());
        assert!(!Error::DocumentNotFound.is_retryable());
    }

    #[test]
    fn test_timeout_constructor() {
        let err = Error::timeout(true, Duration::from_millis(2500), 3, vec![]);
        assert!(matches!(err, Error::AmbiguousTimeout { attempts: 3, .. }));
        assert!(err.is_timeout());

        let err = Error::timeout(false, Duration::from_millis(2500), 1, vec![]);
        assert!(matches!(err, Error::UnambiguousTimeout { .. }));
    }

    #[test]
    fn test_display_is_lowercase_and_stable() {
        assert_eq!(Error::CasMismatch.to_string(), "cas mismatch");
        assert_eq!(Error::DocumentNotFound.to_string(), "document not found");
    }
}
