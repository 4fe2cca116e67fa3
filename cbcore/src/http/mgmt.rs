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

//! Cluster management REST operations.
//!
//! Each operation implements [`ManagementOperation`]: a pure envelope
//! builder plus a `(status, body)` decoder. The management API takes
//! form-encoded bodies on writes and returns JSON on reads; error mapping is
//! mostly by status code, with a body sniff where the server multiplexes
//! different failures onto 400.

use super::{common_http_error, HttpEnvelope};
use crate::error::Error;
use serde::Deserialize;
use serde_json::Value;

/// A typed management request/response pair.
pub trait ManagementOperation: Send + Sync {
    /// Decoded response type.
    type Output: Send;

    /// Builds the REST envelope.
    fn encode(&self) -> Result<HttpEnvelope, Error>;

    /// Interprets the reply.
    fn decode(&self, status: u16, body: &[u8]) -> Result<Self::Output, Error>;
}

fn form_encode(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", form_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// -- buckets ----------------------------------------------------------------

/// Bucket settings for create.
#[derive(Debug, Clone)]
pub struct BucketSettings {
    /// Bucket name.
    pub name: String,
    /// Memory quota in megabytes.
    pub ram_quota_mb: u64,
    /// Replica count.
    pub num_replicas: u32,
    /// Whether flush is enabled.
    pub flush_enabled: bool,
    /// Bucket flavor, one of `couchbase`, `ephemeral`, `memcached`.
    pub bucket_type: String,
}

impl BucketSettings {
    /// Conventional defaults for a couchbase bucket.
    #[must_use]
    pub fn new(name: impl Into<String>, ram_quota_mb: u64) -> Self {
        Self {
            name: name.into(),
            ram_quota_mb,
            num_replicas: 1,
            flush_enabled: false,
            bucket_type: "couchbase".to_string(),
        }
    }
}

/// Creates a bucket.
#[derive(Debug, Clone)]
pub struct BucketCreate {
    /// Settings of the new bucket.
    pub settings: BucketSettings,
}

impl ManagementOperation for BucketCreate {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        if self.settings.name.is_empty() {
            return Err(Error::InvalidArgument {
                message: "bucket name is empty".to_string(),
            });
        }
        let body = form_encode(&[
            ("name", self.settings.name.clone()),
            ("ramQuotaMB", self.settings.ram_quota_mb.to_string()),
            ("replicaNumber", self.settings.num_replicas.to_string()),
            (
                "flushEnabled",
                if self.settings.flush_enabled { "1" } else { "0" }.to_string(),
            ),
            ("bucketType", self.settings.bucket_type.clone()),
        ]);
        Ok(HttpEnvelope::post_form("/pools/default/buckets", body))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 | 202 => Ok(()),
            400 if String::from_utf8_lossy(body).contains("already exists") => {
                Err(Error::BucketExists)
            }
            400 => Err(Error::InvalidArgument {
                message: String::from_utf8_lossy(body).into_owned(),
            }),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Drops a bucket.
#[derive(Debug, Clone)]
pub struct BucketDrop {
    /// Bucket to drop.
    pub name: String,
}

impl ManagementOperation for BucketDrop {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::delete(format!(
            "/pools/default/buckets/{}",
            self.name
        )))
    }

    fn decode(&self, status: u16, _body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::BucketNotFound {
                name: self.name.clone(),
            }),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Summary of one bucket from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Bucket flavor.
    #[serde(default, rename = "bucketType")]
    pub bucket_type: String,
    /// Replica count.
    #[serde(default, rename = "replicaNumber")]
    pub num_replicas: u32,
}

/// Lists all buckets.
#[derive(Debug, Clone, Default)]
pub struct BucketGetAll;

impl ManagementOperation for BucketGetAll {
    type Output = Vec<BucketInfo>;

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::get("/pools/default/buckets"))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<Vec<BucketInfo>, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        if status != 200 {
            return Err(Error::InternalServerFailure);
        }
        serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
            message: format!("bucket list: {e}"),
        })
    }
}

// -- users ------------------------------------------------------------------

/// Creates or updates a local user.
#[derive(Debug, Clone)]
pub struct UserUpsert {
    /// User name (id).
    pub username: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Password; required on create, optional on update.
    pub password: Option<String>,
    /// Role strings, e.g. `data_reader[travel-sample]`.
    pub roles: Vec<String>,
}

impl ManagementOperation for UserUpsert {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        if self.username.is_empty() {
            return Err(Error::InvalidArgument {
                message: "username is empty".to_string(),
            });
        }
        let mut pairs = vec![("roles", self.roles.join(","))];
        if let Some(name) = &self.display_name {
            pairs.push(("name", name.clone()));
        }
        if let Some(password) = &self.password {
            pairs.push(("password", password.clone()));
        }
        Ok(HttpEnvelope::put_form(
            format!("/settings/rbac/users/local/{}", self.username),
            form_encode(&pairs),
        ))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            400 => Err(Error::InvalidArgument {
                message: String::from_utf8_lossy(body).into_owned(),
            }),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Drops a local user.
#[derive(Debug, Clone)]
pub struct UserDrop {
    /// User to drop.
    pub username: String,
}

impl ManagementOperation for UserDrop {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::delete(format!(
            "/settings/rbac/users/local/{}",
            self.username
        )))
    }

    fn decode(&self, status: u16, _body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::UserNotFound),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// One user from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    /// User name (id).
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Assigned roles, raw.
    #[serde(default)]
    pub roles: Vec<Value>,
}

/// Lists all users.
#[derive(Debug, Clone, Default)]
pub struct UserGetAll;

impl ManagementOperation for UserGetAll {
    type Output = Vec<UserInfo>;

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::get("/settings/rbac/users"))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<Vec<UserInfo>, Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        if status != 200 {
            return Err(Error::InternalServerFailure);
        }
        serde_json::from_slice(body).map_err(|e| Error::ParsingFailure {
            message: format!("user list: {e}"),
        })
    }
}

// -- scopes and collections -------------------------------------------------

/// Creates a scope in a bucket.
#[derive(Debug, Clone)]
pub struct ScopeCreate {
    /// Owning bucket.
    pub bucket: String,
    /// Scope name.
    pub scope: String,
}

impl ManagementOperation for ScopeCreate {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::post_form(
            format!("/pools/default/buckets/{}/scopes", self.bucket),
            form_encode(&[("name", self.scope.clone())]),
        ))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::BucketNotFound {
                name: self.bucket.clone(),
            }),
            400 => Err(Error::InvalidArgument {
                message: String::from_utf8_lossy(body).into_owned(),
            }),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Drops a scope.
#[derive(Debug, Clone)]
pub struct ScopeDrop {
    /// Owning bucket.
    pub bucket: String,
    /// Scope to drop.
    pub scope: String,
}

impl ManagementOperation for ScopeDrop {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::delete(format!(
            "/pools/default/buckets/{}/scopes/{}",
            self.bucket, self.scope
        )))
    }

    fn decode(&self, status: u16, _body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::ScopeNotFound),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Creates a collection in a scope.
#[derive(Debug, Clone)]
pub struct CollectionCreate {
    /// Owning bucket.
    pub bucket: String,
    /// Owning scope.
    pub scope: String,
    /// Collection name.
    pub collection: String,
    /// Maximum document expiry in seconds, 0 for the bucket default.
    pub max_expiry: u32,
}

impl ManagementOperation for CollectionCreate {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        let mut pairs = vec![("name", self.collection.clone())];
        if self.max_expiry > 0 {
            pairs.push(("maxTTL", self.max_expiry.to_string()));
        }
        Ok(HttpEnvelope::post_form(
            format!(
                "/pools/default/buckets/{}/scopes/{}/collections",
                self.bucket, self.scope
            ),
            form_encode(&pairs),
        ))
    }

    fn decode(&self, status: u16, body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::ScopeNotFound),
            400 if String::from_utf8_lossy(body).contains("already exists") => {
                Err(Error::CollectionExists)
            }
            400 => Err(Error::InvalidArgument {
                message: String::from_utf8_lossy(body).into_owned(),
            }),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

/// Drops a collection.
#[derive(Debug, Clone)]
pub struct CollectionDrop {
    /// Owning bucket.
    pub bucket: String,
    /// Owning scope.
    pub scope: String,
    /// Collection to drop.
    pub collection: String,
}

impl ManagementOperation for CollectionDrop {
    type Output = ();

    fn encode(&self) -> Result<HttpEnvelope, Error> {
        Ok(HttpEnvelope::delete(format!(
            "/pools/default/buckets/{}/scopes/{}/collections/{}",
            self.bucket, self.scope, self.collection
        )))
    }

    fn decode(&self, status: u16, _body: &[u8]) -> Result<(), Error> {
        if let Some(err) = common_http_error(status) {
            return Err(err);
        }
        match status {
            200 => Ok(()),
            404 => Err(Error::CollectionNotFound),
            _ => Err(Error::InternalServerFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[test]
    fn test_bucket_create_form() {
        let op = BucketCreate {
            settings: BucketSettings::new("travel sample", 256),
        };
        let envelope = op.encode().unwrap();
        assert_eq!(envelope.method, Method::Post);
        assert_eq!(envelope.path, "/pools/default/buckets");
        let body = String::from_utf8(envelope.body.unwrap()).unwrap();
        assert!(body.contains("name=travel+sample"));
        assert!(body.contains("ramQuotaMB=256"));
        assert!(body.contains("bucketType=couchbase"));
    }

    #[test]
    fn test_bucket_create_exists() {
        let op = BucketCreate {
            settings: BucketSettings::new("b", 100),
        };
        assert!(matches!(
            op.decode(400, b"Bucket with given name already exists"),
            Err(Error::BucketExists)
        ));
        assert!(op.decode(202, b"").is_ok());
    }

    #[test]
    fn test_bucket_drop_not_found() {
        let op = BucketDrop {
            name: "ghost".to_string(),
        };
        assert!(matches!(
            op.decode(404, b""),
            Err(Error::BucketNotFound { .. })
        ));
    }

    #[test]
    fn test_user_upsert_form() {
        let op = UserUpsert {
            username: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            password: Some("p@ss w0rd".to_string()),
            roles: vec!["data_reader[*]".to_string(), "query_select[*]".to_string()],
        };
        let envelope = op.encode().unwrap();
        assert_eq!(envelope.path, "/settings/rbac/users/local/alice");
        let body = String::from_utf8(envelope.body.unwrap()).unwrap();
        assert!(body.contains("roles=data_reader%5B%2A%5D%2Cquery_select%5B%2A%5D"));
        assert!(body.contains("password=p%40ss+w0rd"));
    }

    #[test]
    fn test_collection_lifecycle_decoding() {
        let create = CollectionCreate {
            bucket: "b".to_string(),
            scope: "s".to_string(),
            collection: "c".to_string(),
            max_expiry: 0,
        };
        assert!(create.decode(200, b"").is_ok());
        assert!(matches!(create.decode(404, b""), Err(Error::ScopeNotFound)));
        assert!(matches!(
            create.decode(400, b"Collection with name \"c\" already exists"),
            Err(Error::CollectionExists)
        ));

        let drop = CollectionDrop {
            bucket: "b".to_string(),
            scope: "s".to_string(),
            collection: "c".to_string(),
        };
        assert!(matches!(
            drop.decode(404, b""),
            Err(Error::CollectionNotFound)
        ));
    }

    #[test]
    fn test_bucket_list_decode() {
        let op = BucketGetAll;
        let body = r#"[{"name": "travel", "bucketType": "membase", "replicaNumber": 1}]"#;
        let buckets = op.decode(200, body.as_bytes()).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "travel");
    }
}
