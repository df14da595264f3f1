// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory filesystem nodes
//!
//! A node's identity (fileid, wire handle, type) is fixed at creation. Its
//! mutable state — name, parent back-reference, attributes, payload — sits
//! behind the node's own reader/writer lock. Link counts and the liveness
//! bit are atomics so attribute queries can read them without the lock;
//! they are advisory freshness, the lock is still what makes mutations
//! correct.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::dir::DirIndex;
use crate::error::{FsError, FsResult};
use crate::handle::WireHandle;
use crate::storage::FileContent;
use crate::types::{DeviceId, FileId, FileTimes, FileType, OpenFlags, Verifier};

/// Share reservation counters for one regular file
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ShareCounters {
    pub access_read: u32,
    pub access_write: u32,
    pub deny_read: u32,
    pub deny_write: u32,
}

impl ShareCounters {
    /// Would an open with `flags` collide with the modes already granted?
    pub fn conflicts(&self, flags: OpenFlags) -> bool {
        (flags.contains(OpenFlags::READ) && self.deny_read > 0)
            || (flags.contains(OpenFlags::WRITE) && self.deny_write > 0)
            || (flags.contains(OpenFlags::DENY_READ) && self.access_read > 0)
            || (flags.contains(OpenFlags::DENY_WRITE) && self.access_write > 0)
    }

    /// Move the counters from reflecting `old` to reflecting `new`
    pub fn update(&mut self, old: OpenFlags, new: OpenFlags) {
        if old.contains(OpenFlags::READ) {
            self.access_read = self.access_read.saturating_sub(1);
        }
        if old.contains(OpenFlags::WRITE) {
            self.access_write = self.access_write.saturating_sub(1);
        }
        if old.contains(OpenFlags::DENY_READ) {
            self.deny_read = self.deny_read.saturating_sub(1);
        }
        if old.contains(OpenFlags::DENY_WRITE) {
            self.deny_write = self.deny_write.saturating_sub(1);
        }
        if new.contains(OpenFlags::READ) {
            self.access_read += 1;
        }
        if new.contains(OpenFlags::WRITE) {
            self.access_write += 1;
        }
        if new.contains(OpenFlags::DENY_READ) {
            self.deny_read += 1;
        }
        if new.contains(OpenFlags::DENY_WRITE) {
            self.deny_write += 1;
        }
    }
}

/// Open state of a regular file: granted reservations plus the global
/// (stateless) descriptor's mode
#[derive(Debug, Default)]
pub(crate) struct OpenState {
    pub share: ShareCounters,
    pub global: OpenFlags,
}

/// Per-kind storage payload
#[derive(Debug)]
pub(crate) enum Payload {
    Directory(DirIndex<Arc<MemNode>>),
    Regular {
        content: FileContent,
        open: OpenState,
    },
    Symlink {
        target: String,
    },
    Device {
        dev: DeviceId,
    },
    Fifo,
    Socket,
}

impl Payload {
    pub fn as_dir(&self) -> FsResult<&DirIndex<Arc<MemNode>>> {
        match self {
            Payload::Directory(index) => Ok(index),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub fn as_dir_mut(&mut self) -> FsResult<&mut DirIndex<Arc<MemNode>>> {
        match self {
            Payload::Directory(index) => Ok(index),
            _ => Err(FsError::NotADirectory),
        }
    }
}

/// Mutable attributes, guarded by the node lock
#[derive(Clone, Copy, Debug)]
pub(crate) struct NodeAttrs {
    /// Logical length; independent of how many bytes the payload retains
    pub size: u64,
    pub spaceused: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub times: FileTimes,
    pub change: u64,
}

/// Everything about a node that mutates after creation
#[derive(Debug)]
pub(crate) struct NodeState {
    pub name: String,
    /// Back-reference for path reconstruction; never an ownership edge
    pub parent: Weak<MemNode>,
    pub attrs: NodeAttrs,
    /// Exclusive-create verifier, if one was ever stored
    pub verifier: Option<Verifier>,
    pub payload: Payload,
}

/// Constructor arguments for a node
pub(crate) struct NodeSeed {
    pub fileid: FileId,
    pub kind: FileType,
    pub wire: WireHandle,
    pub name: String,
    pub parent: Weak<MemNode>,
    pub root: bool,
    pub attrs: NodeAttrs,
    pub payload: Payload,
}

/// One filesystem object
pub struct MemNode {
    fileid: FileId,
    kind: FileType,
    wire: WireHandle,
    root: bool,
    nlink: AtomicU32,
    linked: AtomicBool,
    pub(crate) state: RwLock<NodeState>,
}

impl MemNode {
    pub(crate) fn new(seed: NodeSeed) -> Arc<Self> {
        let nlink = if seed.kind.is_dir() { 2 } else { 1 };
        Arc::new(Self {
            fileid: seed.fileid,
            kind: seed.kind,
            wire: seed.wire,
            root: seed.root,
            nlink: AtomicU32::new(nlink),
            linked: AtomicBool::new(false),
            state: RwLock::new(NodeState {
                name: seed.name,
                parent: seed.parent,
                attrs: seed.attrs,
                verifier: None,
                payload: seed.payload,
            }),
        })
    }

    pub fn fileid(&self) -> FileId {
        self.fileid
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    /// The node's wire identity, fixed at creation
    pub fn wire(&self) -> &WireHandle {
        &self.wire
    }

    /// Current name; mutates only under rename
    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Linked into a parent directory right now?
    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }

    /// Live means discoverable: the root, or currently linked
    pub fn is_live(&self) -> bool {
        self.root || self.is_linked()
    }

    pub(crate) fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::Release);
    }

    pub fn link_count(&self) -> u32 {
        self.nlink.load(Ordering::Relaxed)
    }

    pub(crate) fn link_count_inc(&self) -> u32 {
        self.nlink.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn link_count_dec(&self) -> u32 {
        self.nlink.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }
}

impl std::fmt::Debug for MemNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemNode")
            .field("fileid", &self.fileid)
            .field("kind", &self.kind)
            .field("linked", &self.is_linked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_counter_conflicts() {
        let mut share = ShareCounters::default();
        share.update(OpenFlags::empty(), OpenFlags::READ | OpenFlags::DENY_WRITE);

        // A plain reader coexists with a deny-write reader
        assert!(!share.conflicts(OpenFlags::READ));
        // A writer collides with the outstanding deny-write
        assert!(share.conflicts(OpenFlags::WRITE));
        // Denying reads collides with the outstanding read access
        assert!(share.conflicts(OpenFlags::DENY_READ));
    }

    #[test]
    fn share_counter_update_reverses() {
        let mut share = ShareCounters::default();
        let flags = OpenFlags::READ | OpenFlags::WRITE | OpenFlags::DENY_READ;

        share.update(OpenFlags::empty(), flags);
        assert_eq!(share.access_read, 1);
        assert_eq!(share.access_write, 1);
        assert_eq!(share.deny_read, 1);

        share.update(flags, OpenFlags::empty());
        assert_eq!(share.access_read, 0);
        assert_eq!(share.access_write, 0);
        assert_eq!(share.deny_read, 0);
        assert!(!share.conflicts(OpenFlags::WRITE | OpenFlags::DENY_READ | OpenFlags::DENY_WRITE));
    }

    #[test]
    fn reopen_style_update_swaps_modes() {
        let mut share = ShareCounters::default();
        share.update(OpenFlags::empty(), OpenFlags::READ);
        share.update(OpenFlags::READ, OpenFlags::READ | OpenFlags::WRITE);
        assert_eq!(share.access_read, 1);
        assert_eq!(share.access_write, 1);
    }
}
