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

//! SASL authentication.
//!
//! Mechanism selection is the strongest common mechanism between what the
//! client implements and what the server advertises via SASL_LIST_MECHS.
//! PLAIN on a non-TLS stream is refused unless configuration explicitly
//! allows it — credentials would otherwise cross the wire in the clear.

pub mod scram;

pub use scram::ScramClient;

use crate::error::Error;

/// Credentials used for both SASL and the HTTP services.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// SASL mechanisms the client implements, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// SCRAM with SHA-512.
    ScramSha512,
    /// SCRAM with SHA-256.
    ScramSha256,
    /// SCRAM with SHA-1.
    ScramSha1,
    /// RFC 4616 PLAIN.
    Plain,
}

impl Mechanism {
    /// Wire name of the mechanism.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ScramSha512 => "SCRAM-SHA512",
            Self::ScramSha256 => "SCRAM-SHA256",
            Self::ScramSha1 => "SCRAM-SHA1",
            Self::Plain => "PLAIN",
        }
    }
}

/// Preference order applied during selection.
const PREFERENCE: [Mechanism; 4] = [
    Mechanism::ScramSha512,
    Mechanism::ScramSha256,
    Mechanism::ScramSha1,
    Mechanism::Plain,
];

/// Picks the strongest mechanism both sides support.
///
/// `server_mechs` is the space-separated SASL_LIST_MECHS payload. PLAIN is
/// excluded on non-TLS streams unless `allow_plain_without_tls` is set.
pub fn select_mechanism(
    server_mechs: &str,
    tls: bool,
    allow_plain_without_tls: bool,
) -> Result<Mechanism, Error> {
    let advertised: Vec<&str> = server_mechs.split_ascii_whitespace().collect();
    for candidate in PREFERENCE {
        if !advertised.contains(&candidate.name()) {
            continue;
        }
        if candidate == Mechanism::Plain && !tls && !allow_plain_without_tls {
            continue;
        }
        return Ok(candidate);
    }
    Err(Error::AuthenticationFailure {
        message: format!("no common sasl mechanism in {server_mechs:?}"),
    })
}

/// Builds the PLAIN initial response: `\0user\0password`.
#[must_use]
pub fn plain_payload(credentials: &Credentials) -> Vec<u8> {
    let mut payload = Vec::with_capacity(
        credentials.username.len() + credentials.password.len() + 2,
    );
    payload.push(0);
    payload.extend_from_slice(credentials.username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(credentials.password.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_strongest_common() {
        let mech = select_mechanism("PLAIN SCRAM-SHA1 SCRAM-SHA256", true, false).unwrap();
        assert_eq!(mech, Mechanism::ScramSha256);

        let mech = select_mechanism("SCRAM-SHA512 SCRAM-SHA256", true, false).unwrap();
        assert_eq!(mech, Mechanism::ScramSha512);
    }

    #[test]
    fn test_plain_requires_tls() {
        assert!(select_mechanism("PLAIN", false, false).is_err());
        assert_eq!(
            select_mechanism("PLAIN", true, false).unwrap(),
            Mechanism::Plain
        );
        assert_eq!(
            select_mechanism("PLAIN", false, true).unwrap(),
            Mechanism::Plain
        );
    }

    #[test]
    fn test_no_common_mechanism() {
        assert!(select_mechanism("CRAM-MD5", true, false).is_err());
    }

    #[test]
    fn test_plain_payload_layout() {
        let creds = Credentials::new("user", "pass");
        assert_eq!(plain_payload(&creds), b"\0user\0pass");
    }
}
