// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the memfs namespace engine

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Stable numeric identity of a node. Assigned from the namespace-owned
/// counter at creation, monotonically increasing, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl FileId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an open file handle (a granted share reservation)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Content identifier for the storage backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentId(pub u64);

impl ContentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Filesystem object types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Directory,
    Regular,
    Symlink,
    Block,
    Char,
    Fifo,
    Socket,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, FileType::Regular)
    }
}

/// Device id pair for block and character nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

/// Node timestamps, nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
    pub birthtime: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Node attributes as surfaced by `getattr` and readdir visits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attributes {
    pub fileid: FileId,
    pub kind: FileType,
    /// Logical length. May exceed what the fixed payload buffer retains.
    pub size: u64,
    pub spaceused: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub times: FileTimes,
    /// Change counter, bumped with every ctime update
    pub change: u64,
    pub rawdev: Option<DeviceId>,
}

/// A timestamp update request: an explicit time, or the server's clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetTime {
    Now,
    At(i64),
}

/// Attribute changes for create and setattr. Unset fields are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetAttrs {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
    pub rawdev: Option<DeviceId>,
}

impl SetAttrs {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && self.atime.is_none()
            && self.mtime.is_none()
            && self.rawdev.is_none()
    }
}

/// Opaque verifier carried by exclusive creates
pub type Verifier = [u8; 8];

bitflags::bitflags! {
    /// Access and deny modes for an open. The empty set means "closed".
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const TRUNC = 0x04;
        const DENY_READ = 0x08;
        const DENY_WRITE = 0x10;
    }
}

impl OpenFlags {
    /// True when no access mode is held
    pub fn is_closed(&self) -> bool {
        !self.intersects(OpenFlags::READ | OpenFlags::WRITE)
    }
}

/// Create disposition for open-by-name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    /// Open only; a missing name is an error
    NoCreate,
    /// Create if missing, open if present
    Unchecked,
    /// Create only; an existing name is an error
    Guarded,
    /// Create with a verifier; reopening with the same verifier succeeds,
    /// any other collision is an error
    Exclusive(Verifier),
}

/// Lock kind for byte-range locking
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Byte range lock specification
#[derive(Clone, Copy, Debug)]
pub struct LockRange {
    pub offset: u64,
    pub len: u64,
    pub kind: LockKind,
}

/// Identity of the caller on whose behalf an operation runs, plus the
/// export-scoped umask applied when mode attributes are set.
#[derive(Clone, Copy, Debug)]
pub struct CallerContext {
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
}

impl CallerContext {
    pub fn new(uid: u32, gid: u32, umask: u32) -> Self {
        Self { uid, gid, umask }
    }
}

/// Clock collaborator used for all node timestamps
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Nanoseconds since the Unix epoch
    fn now_ns(&self) -> i64;
}

/// Default wall-clock implementation
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// Namespace statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    /// Nodes currently registered in the wire-handle table
    pub nodes: u64,
    /// Currently open (stateful) file handles
    pub open_handles: u64,
}
