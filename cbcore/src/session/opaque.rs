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

//! Opaque generation for request/response matching.

use std::sync::atomic::{AtomicU32, Ordering};

/// Generates the per-session opaques stamped on outgoing frames.
///
/// Opaques start at 1 (0 is reserved for bootstrap frames written before the
/// demux loop exists) and increment monotonically, wrapping after 2^32
/// commands. A wrap cannot collide in practice: a command would have to stay
/// in flight across four billion successors on the same session.
#[derive(Debug)]
pub struct OpaqueGenerator {
    next: AtomicU32,
}

impl OpaqueGenerator {
    /// Creates a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Returns the next opaque. Lock-free and thread-safe.
    #[must_use]
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for OpaqueGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one_and_increments() {
        let generator = OpaqueGenerator::new();
        assert_eq!(generator.next(), 1);
        assert_eq!(generator.next(), 2);
    }

    #[test]
    fn test_unique_across_tasks() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let generator = Arc::new(OpaqueGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = generator.clone();
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| generator.next()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for opaque in handle.join().expect("thread panicked") {
                assert!(seen.insert(opaque), "duplicate opaque {opaque}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
