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

//! The in-flight command table.
//!
//! Every written frame registers its opaque here; the reader task routes the
//! matching response back through a oneshot. Exactly one of three things
//! happens to every entry: completion by response, cancellation by timeout,
//! or drain at teardown — each consumes the entry, so a completion can fire
//! at most once.

use crate::error::Error;
use crate::protocol::ResponseFrame;
use crate::transport::TransportError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

type Completion = oneshot::Sender<Result<ResponseFrame, Error>>;

/// Table of commands awaiting responses, keyed by opaque.
#[derive(Debug, Default)]
pub struct PendingCommands {
    commands: Mutex<HashMap<u32, Completion>>,
}

impl PendingCommands {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command and returns the receiver its completion fires on.
    pub fn register(&self, opaque: u32) -> oneshot::Receiver<Result<ResponseFrame, Error>> {
        let (tx, rx) = oneshot::channel();
        self.commands.lock().insert(opaque, tx);
        rx
    }

    /// Completes the command with a response. Returns `false` when no command
    /// holds this opaque (timed out or canceled earlier).
    pub fn complete(&self, opaque: u32, frame: ResponseFrame) -> bool {
        match self.commands.lock().remove(&opaque) {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Removes a command without completing it (timeout path). The response
    /// arriving later is consumed and discarded by the reader.
    pub fn cancel(&self, opaque: u32) -> bool {
        self.commands.lock().remove(&opaque).is_some()
    }

    /// Fails every in-flight command; used at session teardown.
    pub fn drain(&self) {
        let drained: Vec<Completion> = {
            let mut commands = self.commands.lock();
            commands.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(Error::Transport(TransportError::Closed)));
        }
    }

    /// Number of commands in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Opcode, Status};
    use bytes::Bytes;

    fn frame(opaque: u32) -> ResponseFrame {
        ResponseFrame {
            opcode: Opcode::Get,
            datatype: 0,
            status: Status::Success,
            opaque,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_complete_routes_by_opaque() {
        let pending = PendingCommands::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        assert!(pending.complete(2, frame(2)));
        assert!(pending.complete(1, frame(1)));

        assert_eq!(rx1.await.unwrap().unwrap().opaque, 1);
        assert_eq!(rx2.await.unwrap().unwrap().opaque, 2);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_complete_unknown_opaque() {
        let pending = PendingCommands::new();
        assert!(!pending.complete(9, frame(9)));
    }

    #[tokio::test]
    async fn test_cancel_consumes_entry() {
        let pending = PendingCommands::new();
        let rx = pending.register(5);
        assert!(pending.cancel(5));
        assert!(!pending.cancel(5));
        assert!(rx.await.is_err());
        // A late response for the canceled command finds nothing.
        assert!(!pending.complete(5, frame(5)));
    }

    #[tokio::test]
    async fn test_drain_fails_everything() {
        let pending = PendingCommands::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);
        pending.drain();
        assert!(pending.is_empty());
        assert!(matches!(
            rx1.await.unwrap(),
            Err(Error::Transport(TransportError::Closed))
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(Error::Transport(TransportError::Closed))
        ));
    }
}
