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

//! A loopback mock key/value node.
//!
//! Implements just enough of the server side — HELLO, error map, SASL
//! PLAIN, select-bucket, cluster config, and a tiny document store — to
//! drive real sessions through bootstrap and dispatch. Fault injection
//! knobs cover the NOT_MY_VBUCKET and timeout scenarios.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use cbcore::protocol::frame::read_frame;
use cbcore::protocol::{features, Feature, Opcode, RequestFrame, ResponseFrame, Status};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "app";
pub const PASSWORD: &str = "secret";
pub const BUCKET: &str = "default";
pub const PARTITIONS: usize = 64;

#[derive(Debug, Clone)]
pub struct Doc {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

#[derive(Default)]
pub struct MockState {
    pub docs: Mutex<HashMap<Vec<u8>, Doc>>,
    pub cas_counter: AtomicU64,
    pub seqno_counter: AtomicU64,
    /// Mutations left to answer with NOT_MY_VBUCKET plus a newer config.
    pub nmvb_remaining: AtomicU32,
    pub config_rev: AtomicU64,
    /// When set, GET requests are read but never answered.
    pub swallow_gets: AtomicBool,
}

pub struct MockNode {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        let state = Arc::new(MockState {
            config_rev: AtomicU64::new(1),
            ..MockState::default()
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, state, addr.port()).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn config_json(rev: u64, port: u16) -> String {
    let map: Vec<String> = (0..PARTITIONS).map(|_| "[0]".to_string()).collect();
    format!(
        r#"{{
            "rev": {rev},
            "name": "{BUCKET}",
            "nodeLocator": "vbucket",
            "nodesExt": [
                {{"services": {{"kv": {port}, "mgmt": 8091}}, "hostname": "$HOST", "thisNode": true}}
            ],
            "bucketCapabilities": ["xattr", "durableWrite"],
            "vBucketServerMap": {{
                "hashAlgorithm": "CRC",
                "numReplicas": 0,
                "serverList": ["$HOST:{port}"],
                "vBucketMap": [{}]
            }}
        }}"#,
        map.join(",")
    )
}

const ERROR_MAP_JSON: &str = r#"{
    "version": 2,
    "revision": 1,
    "errors": {
        "7": {"name": "NOT_MY_VBUCKET", "desc": "vbucket moved",
              "attrs": ["fetch-config", "item-only", "retry-now"]},
        "86": {"name": "ETMPFAIL", "desc": "busy", "attrs": ["temp", "retry-later"]}
    }
}"#;

fn response(req: &RequestFrame, status: Status) -> ResponseFrame {
    ResponseFrame {
        opcode: req.opcode,
        datatype: 0,
        status,
        opaque: req.opaque,
        cas: 0,
        extras: Bytes::new(),
        key: Bytes::new(),
        value: Bytes::new(),
    }
}

fn mutation_extras(state: &MockState) -> Bytes {
    let mut extras = BytesMut::with_capacity(16);
    extras.put_u64(0x00c0_ffee_0000_0001);
    extras.put_u64(state.seqno_counter.fetch_add(1, Ordering::Relaxed) + 1);
    extras.freeze()
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<MockState>,
    port: u16,
) -> std::io::Result<()> {
    loop {
        let Ok((header, body)) = read_frame(&mut stream).await else {
            return Ok(());
        };
        let Ok(req) = RequestFrame::decode(&header, body) else {
            return Ok(());
        };

        let reply = match req.opcode {
            Opcode::Hello => {
                // No snappy: the store would have to track datatypes to
                // echo compressed bodies back correctly.
                let granted = [
                    Feature::Datatype,
                    Feature::TcpNodelay,
                    Feature::MutationSeqno,
                    Feature::Xerror,
                    Feature::SelectBucket,
                    Feature::Json,
                    Feature::AltRequest,
                ];
                let mut reply = response(&req, Status::Success);
                reply.value = features::encode_features(&granted);
                reply
            }
            Opcode::GetErrorMap => {
                let mut reply = response(&req, Status::Success);
                reply.value = Bytes::from_static(ERROR_MAP_JSON.as_bytes());
                reply
            }
            Opcode::SaslListMechs => {
                let mut reply = response(&req, Status::Success);
                reply.value = Bytes::from_static(b"PLAIN");
                reply
            }
            Opcode::SaslAuth => {
                let expected = format!("\0{USERNAME}\0{PASSWORD}");
                if req.key.as_ref() == b"PLAIN" && req.value.as_ref() == expected.as_bytes() {
                    response(&req, Status::Success)
                } else {
                    response(&req, Status::AuthError)
                }
            }
            Opcode::SelectBucket => {
                if req.key.as_ref() == BUCKET.as_bytes() {
                    response(&req, Status::Success)
                } else {
                    response(&req, Status::KeyNotFound)
                }
            }
            Opcode::GetClusterConfig => {
                let rev = state.config_rev.load(Ordering::Relaxed);
                let mut reply = response(&req, Status::Success);
                reply.datatype = cbcore::protocol::datatype::JSON;
                reply.value = Bytes::from(config_json(rev, port));
                reply
            }
            Opcode::Get => {
                if state.swallow_gets.load(Ordering::Relaxed) {
                    continue;
                }
                let docs = state.docs.lock().expect("docs lock");
                match docs.get(req.key.as_ref()) {
                    Some(doc) => {
                        let mut reply = response(&req, Status::Success);
                        reply.cas = doc.cas;
                        let mut extras = BytesMut::with_capacity(4);
                        extras.put_u32(doc.flags);
                        reply.extras = extras.freeze();
                        reply.value = Bytes::from(doc.value.clone());
                        reply
                    }
                    None => response(&req, Status::KeyNotFound),
                }
            }
            Opcode::Set | Opcode::Add | Opcode::Replace | Opcode::Delete => {
                if state.nmvb_remaining.load(Ordering::Relaxed) > 0 {
                    state.nmvb_remaining.fetch_sub(1, Ordering::Relaxed);
                    let rev = state.config_rev.fetch_add(1, Ordering::Relaxed) + 1;
                    let mut reply = response(&req, Status::NotMyVbucket);
                    reply.datatype = cbcore::protocol::datatype::JSON;
                    reply.value = Bytes::from(config_json(rev, port));
                    reply
                } else {
                    handle_mutation(&req, &state)
                }
            }
            _ => response(&req, Status::NotSupported),
        };

        let wire = reply.encode().expect("encode reply");
        stream.write_all(&wire).await?;
        stream.flush().await?;
    }
}

fn handle_mutation(req: &RequestFrame, state: &MockState) -> ResponseFrame {
    let mut docs = state.docs.lock().expect("docs lock");
    let key = req.key.to_vec();
    let exists = docs.contains_key(&key);

    match req.opcode {
        Opcode::Add if exists => return response(req, Status::KeyExists),
        Opcode::Replace | Opcode::Delete if !exists => {
            return response(req, Status::KeyNotFound);
        }
        Opcode::Replace | Opcode::Delete if req.cas != 0 => {
            let current = docs.get(&key).map(|d| d.cas).unwrap_or(0);
            if current != req.cas {
                return response(req, Status::KeyExists);
            }
        }
        _ => {}
    }

    if req.opcode == Opcode::Delete {
        docs.remove(&key);
        let mut reply = response(req, Status::Success);
        reply.cas = state.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
        reply.extras = mutation_extras(state);
        return reply;
    }

    let flags = if req.extras.len() >= 4 {
        u32::from_be_bytes([req.extras[0], req.extras[1], req.extras[2], req.extras[3]])
    } else {
        0
    };
    let cas = state.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
    docs.insert(
        key,
        Doc {
            value: req.value.to_vec(),
            flags,
            cas,
        },
    );
    let mut reply = response(req, Status::Success);
    reply.cas = cas;
    reply.extras = mutation_extras(state);
    reply
}
