// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Opaque wire handles
//!
//! Every node gets a fixed-size byte identity at creation, derived from its
//! full path at that moment and immutable afterwards. The layout is
//! self-describing: an 8-byte path hash, a 2-byte path length, then as many
//! literal path bytes as fit, zero-padded. The hash keeps short handles
//! collision resistant; the literal bytes exist for disambiguation and
//! debugging. Resolution never decodes a handle — the [`HandleTable`] maps
//! handle bytes back to live nodes by exact comparison.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::error::{FsError, FsResult};
use crate::node::MemNode;

/// Total size of a wire handle: the opaque area of a 128-byte NFSv4-style
/// file handle after its 5-byte header. Encoding never grows past this.
pub const WIRE_HANDLE_SIZE: usize = 123;

const HASH_BYTES: usize = 8;
const LEN_BYTES: usize = 2;

/// Literal path bytes that fit after the hash and length prefix
pub const WIRE_PATH_BUDGET: usize = WIRE_HANDLE_SIZE - HASH_BYTES - LEN_BYTES;

/// Fixed-size opaque node identity, safe to ship off-process
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireHandle([u8; WIRE_HANDLE_SIZE]);

impl WireHandle {
    /// Package a handle from a node's full path
    pub fn from_path(path: &str) -> Self {
        let bytes = path.as_bytes();
        let mut buf = [0u8; WIRE_HANDLE_SIZE];

        buf[..HASH_BYTES].copy_from_slice(&xxh64(bytes, 0).to_le_bytes());
        // Path length rides along so a decoder can tell truncation happened.
        // Real paths fit a short.
        let len = bytes.len().min(u16::MAX as usize) as u16;
        buf[HASH_BYTES..HASH_BYTES + LEN_BYTES].copy_from_slice(&len.to_le_bytes());

        let literal = bytes.len().min(WIRE_PATH_BUDGET);
        buf[HASH_BYTES + LEN_BYTES..HASH_BYTES + LEN_BYTES + literal]
            .copy_from_slice(&bytes[..literal]);

        Self(buf)
    }

    /// Reconstruct a handle from wire bytes; the length must be exact
    pub fn from_bytes(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() != WIRE_HANDLE_SIZE {
            return Err(FsError::BadHandle);
        }
        let mut buf = [0u8; WIRE_HANDLE_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The embedded 64-bit path hash
    pub fn path_hash(&self) -> u64 {
        let mut hash = [0u8; HASH_BYTES];
        hash.copy_from_slice(&self.0[..HASH_BYTES]);
        u64::from_le_bytes(hash)
    }

    /// Length of the original path, even when the literal bytes were truncated
    pub fn path_len(&self) -> u16 {
        u16::from_le_bytes([self.0[HASH_BYTES], self.0[HASH_BYTES + 1]])
    }
}

impl std::fmt::Debug for WireHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WireHandle({}.., len={})",
            hex::encode(&self.0[..HASH_BYTES]),
            self.path_len()
        )
    }
}

/// Process-wide registry mapping wire handles back to live nodes.
///
/// Entries hold weak references: the table never keeps a node alive, it only
/// answers "is the node this handle named still around". Dead entries are
/// pruned as resolution stumbles over them.
pub struct HandleTable {
    inner: Mutex<HashMap<WireHandle, Weak<MemNode>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, node: &Arc<MemNode>) {
        self.inner.lock().insert(*node.wire(), Arc::downgrade(node));
    }

    /// Resolve wire bytes to a live node by exact byte match
    pub fn resolve(&self, bytes: &[u8]) -> FsResult<Arc<MemNode>> {
        let key = WireHandle::from_bytes(bytes)?;
        let mut map = self.inner.lock();
        match map.get(&key).map(Weak::upgrade) {
            Some(Some(node)) => Ok(node),
            Some(None) => {
                map.remove(&key);
                debug!(handle = ?key, "handle names a destroyed node");
                Err(FsError::Stale)
            }
            None => {
                debug!(handle = ?key, "no node registered for handle");
                Err(FsError::Stale)
            }
        }
    }

    /// Drop a node's entry. A same-path successor that has since taken the
    /// slot is left in place.
    pub(crate) fn unregister(&self, node: &Arc<MemNode>) {
        let mut map = self.inner.lock();
        if let Some(weak) = map.get(node.wire()) {
            match weak.upgrade() {
                Some(current) if !Arc::ptr_eq(&current, node) => {}
                _ => {
                    map.remove(node.wire());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
