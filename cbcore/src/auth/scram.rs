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

//! SCRAM client exchange (RFC 5802).
//!
//! Flow: client-first → server-first → client-final → server-final. The
//! client derives the salted password with the server-supplied salt and
//! iteration count, proves possession without sending the password, and
//! verifies the server signature locally — a mismatched signature means the
//! peer does not actually hold the credential database and authentication
//! fails even though the server said "ok".

use super::{Credentials, Mechanism};
use crate::error::Error;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Hash family backing a SCRAM mechanism.
#[derive(Debug, Clone, Copy)]
enum ScramHash {
    Sha1,
    Sha256,
    Sha512,
}

impl ScramHash {
    fn for_mechanism(mechanism: Mechanism) -> Result<Self, Error> {
        match mechanism {
            Mechanism::ScramSha1 => Ok(Self::Sha1),
            Mechanism::ScramSha256 => Ok(Self::Sha256),
            Mechanism::ScramSha512 => Ok(Self::Sha512),
            Mechanism::Plain => Err(Error::AuthenticationFailure {
                message: "plain is not a scram mechanism".to_string(),
            }),
        }
    }

    fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, Error> {
        fn run<M: Mac>(mut mac: M, parts: &[&[u8]]) -> Vec<u8> {
            for part in parts {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        let invalid = |_| Error::AuthenticationFailure {
            message: "hmac key rejected".to_string(),
        };
        Ok(match self {
            Self::Sha1 => run(Hmac::<Sha1>::new_from_slice(key).map_err(invalid)?, parts),
            Self::Sha256 => run(Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?, parts),
            Self::Sha512 => run(Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?, parts),
        })
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// `Hi(str, salt, i)` from RFC 5802: PBKDF2 with HMAC as the PRF.
    fn hi(self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>, Error> {
        let mut block = self.hmac(password, &[salt, &1u32.to_be_bytes()])?;
        let mut result = block.clone();
        for _ in 1..iterations {
            block = self.hmac(password, &[&block])?;
            for (acc, byte) in result.iter_mut().zip(&block) {
                *acc ^= byte;
            }
        }
        Ok(result)
    }
}

/// Client side of one SCRAM exchange.
///
/// One instance covers exactly one authentication; the session creates it
/// after mechanism selection and drives it with the two server payloads.
pub struct ScramClient {
    hash: ScramHash,
    credentials: Credentials,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    /// Creates a client for the selected mechanism with a random nonce.
    pub fn new(mechanism: Mechanism, credentials: Credentials) -> Result<Self, Error> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_nonce(mechanism, credentials, nonce)
    }

    /// Creates a client with a caller-supplied nonce. Exposed for tests that
    /// need a deterministic exchange.
    pub fn with_nonce(
        mechanism: Mechanism,
        credentials: Credentials,
        nonce: String,
    ) -> Result<Self, Error> {
        let hash = ScramHash::for_mechanism(mechanism)?;
        let client_first_bare = format!(
            "n={},r={}",
            saslname(&credentials.username),
            nonce
        );
        Ok(Self {
            hash,
            credentials,
            client_nonce: nonce,
            client_first_bare,
            server_signature: None,
        })
    }

    /// The client-first message, sent as the SASL_AUTH value.
    #[must_use]
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consumes the server-first message and produces the client-final
    /// message for SASL_STEP.
    ///
    /// Also fixes the expected server signature, verified later by
    /// [`verify_server_final`](Self::verify_server_final).
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, Error> {
        let fields = parse_fields(server_first)?;
        let combined_nonce = fields.get('r').ok_or_else(|| malformed("missing nonce"))?;
        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(Error::AuthenticationFailure {
                message: "server nonce does not extend client nonce".to_string(),
            });
        }
        let salt = BASE64
            .decode(fields.get('s').ok_or_else(|| malformed("missing salt"))?)
            .map_err(|_| malformed("salt is not base64"))?;
        let iterations: u32 = fields
            .get('i')
            .ok_or_else(|| malformed("missing iteration count"))?
            .parse()
            .map_err(|_| malformed("iteration count is not a number"))?;
        if iterations == 0 {
            return Err(malformed("iteration count is zero"));
        }

        let client_final_bare = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_bare
        );

        let salted = self
            .hash
            .hi(self.credentials.password.as_bytes(), &salt, iterations)?;
        let client_key = self.hash.hmac(&salted, &[b"Client Key"])?;
        let stored_key = self.hash.digest(&client_key);
        let client_signature = self.hash.hmac(&stored_key, &[auth_message.as_bytes()])?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = self.hash.hmac(&salted, &[b"Server Key"])?;
        self.server_signature =
            Some(self.hash.hmac(&server_key, &[auth_message.as_bytes()])?);

        Ok(format!("{client_final_bare},p={}", BASE64.encode(proof)))
    }

    /// Verifies the server-final message against the locally computed
    /// signature.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), Error> {
        let fields = parse_fields(server_final)?;
        if let Some(err) = fields.get('e') {
            return Err(Error::AuthenticationFailure {
                message: format!("server rejected credentials: {err}"),
            });
        }
        let verifier = fields
            .get('v')
            .ok_or_else(|| malformed("missing server signature"))?;
        let received = BASE64
            .decode(verifier)
            .map_err(|_| malformed("server signature is not base64"))?;
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| Error::AuthenticationFailure {
                message: "server-final before server-first".to_string(),
            })?;
        if &received != expected {
            return Err(Error::AuthenticationFailure {
                message: "server signature mismatch".to_string(),
            });
        }
        Ok(())
    }
}

/// Escapes `,` and `=` in a saslname per RFC 5802.
fn saslname(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

fn malformed(detail: &str) -> Error {
    Error::AuthenticationFailure {
        message: format!("malformed scram message: {detail}"),
    }
}

struct Fields<'a>(Vec<(char, &'a str)>);

impl<'a> Fields<'a> {
    fn get(&self, key: char) -> Option<&'a str> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

fn parse_fields(message: &str) -> Result<Fields<'_>, Error> {
    let mut fields = Vec::new();
    for part in message.split(',') {
        let mut chars = part.chars();
        let key = chars.next().ok_or_else(|| malformed("empty field"))?;
        if !key.is_ascii() || chars.next() != Some('=') {
            return Err(malformed("field without '='"));
        }
        fields.push((key, &part[2..]));
    }
    Ok(Fields(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5802 §5 example exchange (SCRAM-SHA-1, user/pencil).
    #[test]
    fn test_rfc5802_vectors() {
        let creds = Credentials::new("user", "pencil");
        let mut client = ScramClient::with_nonce(
            Mechanism::ScramSha1,
            creds,
            "fyko+d2lbbFgONRv9qkxdawL".to_string(),
        )
        .unwrap();

        assert_eq!(
            client.client_first(),
            "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );

        let server_first = "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,\
                            i=4096";
        let client_final = client.handle_server_first(server_first).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,\
             p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        client
            .verify_server_final("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
            .unwrap();
    }

    #[test]
    fn test_rejects_tampered_server_signature() {
        let creds = Credentials::new("user", "pencil");
        let mut client = ScramClient::with_nonce(
            Mechanism::ScramSha1,
            creds,
            "fyko+d2lbbFgONRv9qkxdawL".to_string(),
        )
        .unwrap();
        let server_first = "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,\
                            i=4096";
        client.handle_server_first(server_first).unwrap();
        assert!(client
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .is_err());
    }

    #[test]
    fn test_rejects_foreign_nonce() {
        let creds = Credentials::new("user", "pencil");
        let mut client = ScramClient::with_nonce(
            Mechanism::ScramSha256,
            creds,
            "clientnonce".to_string(),
        )
        .unwrap();
        let err = client.handle_server_first("r=attacker,s=QSXCR+Q6sek8bf92,i=4096");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_server_error_field() {
        let creds = Credentials::new("user", "pencil");
        let mut client =
            ScramClient::with_nonce(Mechanism::ScramSha256, creds, "n".to_string()).unwrap();
        client
            .handle_server_first("r=nXY,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        assert!(client
            .verify_server_final("e=invalid-encoding")
            .is_err());
    }

    #[test]
    fn test_saslname_escaping() {
        assert_eq!(saslname("a=b,c"), "a=3Db=2Cc");
        let creds = Credentials::new("who=me,yes", "pw");
        let client =
            ScramClient::with_nonce(Mechanism::ScramSha256, creds, "r".to_string()).unwrap();
        assert!(client.client_first().contains("n=who=3Dme=2Cyes"));
    }

    #[test]
    fn test_plain_is_not_scram() {
        let creds = Credentials::new("u", "p");
        assert!(ScramClient::new(Mechanism::Plain, creds).is_err());
    }
}
