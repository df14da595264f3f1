// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory filesystem namespace core
//!
//! This crate keeps an entire filesystem tree in process memory: nodes with
//! POSIX-like attributes, dual-ordered directories with resumable readdir
//! cursors, fixed-size opaque wire handles that survive cache eviction on a
//! remote peer, share-reservation arbitration between concurrent openers,
//! and file I/O against fixed-capacity payload buffers. Nothing persists
//! across a restart; the namespace is volatile by design.
//!
//! The surrounding protocol machinery — request dispatch, credential
//! plumbing, permission policy, export configuration — lives elsewhere and
//! talks to this crate through [`MemFs`] and the [`CallerContext`] / [`Clock`]
//! collaborators.
//!
//! ```
//! use memfs_core::{CallerContext, FsConfig, FileType, MemFs, SetAttrs};
//!
//! let fs = MemFs::new(FsConfig::default()).unwrap();
//! let ctx = CallerContext::new(1000, 1000, 0o022);
//! let root = fs.root();
//!
//! let file = fs.create(&ctx, &root, "hello", FileType::Regular, &SetAttrs::default()).unwrap();
//! fs.write(&file, None, 0, b"hi").unwrap();
//! assert_eq!(fs.getattr(&file).unwrap().size, 2);
//!
//! // An external peer can come back to the node by its opaque identity
//! let again = fs.resolve_handle(file.wire().as_bytes()).unwrap();
//! assert_eq!(again.fileid(), file.fileid());
//! ```

pub mod config;
pub mod dir;
pub mod error;
pub mod handle;
pub mod node;
pub mod storage;
pub mod types;
pub mod vfs;

pub use config::{FsConfig, FILLER_BYTE};
pub use dir::{DirResult, DIR_COOKIE_PARENT, DIR_COOKIE_SELF, DIR_COOKIE_START};
pub use error::{FsError, FsResult};
pub use handle::{HandleTable, WireHandle, WIRE_HANDLE_SIZE, WIRE_PATH_BUDGET};
pub use node::MemNode;
pub use storage::{FixedBufferBackend, StorageBackend};
pub use types::{
    Attributes, CallerContext, Clock, ContentId, CreateMode, DeviceId, FileId, FileTimes,
    FileType, FsStats, HandleId, LockKind, LockRange, OpenFlags, SetAttrs, SetTime, SystemClock,
    Verifier,
};
pub use vfs::MemFs;
