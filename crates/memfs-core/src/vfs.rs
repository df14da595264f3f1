// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The namespace engine
//!
//! [`MemFs`] owns the tree: it creates nodes, links and unlinks them under
//! the parent's write lock, enumerates directories with resumable cursors,
//! arbitrates open share reservations, and moves bytes in and out of file
//! payloads. Every node carries its own reader/writer lock; directory
//! membership changes always run under the write lock of the directory that
//! owns the entry.
//!
//! Rename is not globally atomic: it unlinks from the source directory,
//! renames, then links into the destination, each step under its own lock.
//! A concurrent reader can observe the window where the node is in neither
//! directory. That window is accepted; no global serialization is attempted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::{FsConfig, FILLER_BYTE};
use crate::dir::{DirIndex, DirResult, DIR_COOKIE_START};
use crate::error::{FsError, FsResult};
use crate::handle::{HandleTable, WireHandle};
use crate::node::{MemNode, NodeAttrs, NodeSeed, NodeState, Payload};
use crate::storage::{FileContent, FixedBufferBackend, StorageBackend};
use crate::types::{
    Attributes, CallerContext, Clock, CreateMode, DeviceId, FileId, FileTimes, FileType, FsStats,
    HandleId, LockRange, OpenFlags, SetAttrs, SetTime, SystemClock,
};

/// A granted share reservation: one stateful open of a regular file
struct OpenHandle {
    node: Arc<MemNode>,
    /// Flags the reservation was granted with; reversed at close
    granted: OpenFlags,
    /// Effective descriptor flags (write access implies read)
    flags: OpenFlags,
}

/// The in-memory namespace
pub struct MemFs {
    config: FsConfig,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn StorageBackend>,
    root: Arc<MemNode>,
    wire_table: HandleTable,
    open_handles: Mutex<HashMap<HandleId, OpenHandle>>,
    next_fileid: AtomicU64,
    next_handle_id: AtomicU64,
}

impl MemFs {
    /// Create a namespace with the default clock and storage backend
    pub fn new(config: FsConfig) -> FsResult<Self> {
        Self::with_backend(config, Arc::new(SystemClock), Arc::new(FixedBufferBackend::new()))
    }

    /// Create a namespace with an injected clock
    pub fn with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> FsResult<Self> {
        Self::with_backend(config, clock, Arc::new(FixedBufferBackend::new()))
    }

    /// Create a namespace with injected collaborators. The storage backend
    /// choice is fixed here for the lifetime of the namespace.
    pub fn with_backend(
        config: FsConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn StorageBackend>,
    ) -> FsResult<Self> {
        let now = clock.now_ns();
        let root = MemNode::new(NodeSeed {
            fileid: FileId::new(1),
            kind: FileType::Directory,
            wire: WireHandle::from_path(&config.export_path),
            name: config.export_path.clone(),
            parent: Weak::new(),
            root: true,
            attrs: NodeAttrs {
                size: 0,
                spaceused: 0,
                mode: 0o755,
                uid: config.root_uid,
                gid: config.root_gid,
                times: FileTimes {
                    birthtime: now,
                    atime: now,
                    mtime: now,
                    ctime: now,
                },
                change: now as u64,
            },
            payload: Payload::Directory(DirIndex::new()),
        });

        let wire_table = HandleTable::new();
        wire_table.register(&root);

        Ok(Self {
            config,
            clock,
            storage,
            root,
            wire_table,
            open_handles: Mutex::new(HashMap::new()),
            next_fileid: AtomicU64::new(2),
            next_handle_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// The export root
    pub fn root(&self) -> Arc<MemNode> {
        Arc::clone(&self.root)
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            nodes: self.wire_table.len() as u64,
            open_handles: self.open_handles.lock().len() as u64,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_ns()
    }

    fn alloc_fileid(&self) -> FileId {
        FileId::new(self.next_fileid.fetch_add(1, Ordering::SeqCst))
    }

    fn alloc_handle_id(&self) -> HandleId {
        HandleId::new(self.next_handle_id.fetch_add(1, Ordering::SeqCst))
    }

    // ---- namespace operations ----------------------------------------------

    /// Find `name` in `dir`. `"."` is the directory itself; `".."` is its
    /// parent and fails with `NotFound` at the root.
    pub fn lookup(&self, dir: &Arc<MemNode>, name: &str) -> FsResult<Arc<MemNode>> {
        let st = dir.state.read();
        Self::lookup_locked(dir, &st, name)
    }

    /// Lookup against an already-held directory guard. Callers that hold the
    /// lock (readdir's visit path) call this directly instead of re-locking.
    fn lookup_locked(dir: &Arc<MemNode>, st: &NodeState, name: &str) -> FsResult<Arc<MemNode>> {
        if name == ".." {
            return st.parent.upgrade().ok_or(FsError::NotFound);
        }
        if name == "." {
            return Ok(Arc::clone(dir));
        }
        let index = st.payload.as_dir()?;
        match index.get(name) {
            Some(node) => Ok(Arc::clone(node)),
            None => {
                trace!(name, "lookup miss");
                Err(FsError::NotFound)
            }
        }
    }

    /// Create a node of `kind` under `dir`. Lookup-then-insert runs under a
    /// single hold of the parent's write lock, so two racing creators cannot
    /// both observe "not found".
    pub fn create(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        kind: FileType,
        attrs: &SetAttrs,
    ) -> FsResult<Arc<MemNode>> {
        self.create_obj(ctx, dir, name, kind, attrs, None)
    }

    pub fn mkdir(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        attrs: &SetAttrs,
    ) -> FsResult<Arc<MemNode>> {
        self.create_obj(ctx, dir, name, FileType::Directory, attrs, None)
    }

    pub fn symlink(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        target: &str,
        attrs: &SetAttrs,
    ) -> FsResult<Arc<MemNode>> {
        self.create_obj(ctx, dir, name, FileType::Symlink, attrs, Some(target))
    }

    pub fn mkfifo(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        mode: u32,
    ) -> FsResult<Arc<MemNode>> {
        let attrs = SetAttrs {
            mode: Some(mode),
            ..Default::default()
        };
        self.create_obj(ctx, dir, name, FileType::Fifo, &attrs, None)
    }

    /// Create a node from a raw mode word, dispatching on its format bits
    pub fn mknod(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        mode: u32,
        dev: Option<DeviceId>,
    ) -> FsResult<Arc<MemNode>> {
        let file_type = mode & libc::S_IFMT as u32;
        let kind = match file_type {
            t if t == 0 || t == libc::S_IFREG as u32 => FileType::Regular,
            t if t == libc::S_IFIFO as u32 => FileType::Fifo,
            t if t == libc::S_IFCHR as u32 => FileType::Char,
            t if t == libc::S_IFBLK as u32 => FileType::Block,
            t if t == libc::S_IFSOCK as u32 => FileType::Socket,
            _ => return Err(FsError::Unsupported),
        };
        let attrs = SetAttrs {
            mode: Some(mode),
            rawdev: dev,
            ..Default::default()
        };
        self.create_obj(ctx, dir, name, kind, &attrs, None)
    }

    fn create_obj(
        &self,
        ctx: &CallerContext,
        parent: &Arc<MemNode>,
        name: &str,
        kind: FileType,
        attrs: &SetAttrs,
        link_target: Option<&str>,
    ) -> FsResult<Arc<MemNode>> {
        if !parent.kind().is_dir() {
            return Err(FsError::NotADirectory);
        }
        validate_name(name)?;

        // The parent's path is reconstructed before its lock is taken;
        // walking ancestors takes their locks one at a time.
        let parent_path = self.full_path(parent);

        let mut st = parent.state.write();
        match Self::lookup_locked(parent, &st, name) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let node = self.alloc_node(ctx, parent, &parent_path, name, kind, attrs, link_target)?;
        self.wire_table.register(&node);

        let index = st.payload.as_dir_mut()?;
        let seq = index.insert(name.to_string(), Arc::clone(&node));
        node.set_linked(true);
        let numlinks = parent.link_count_inc();
        debug!(name, kind = ?kind, fileid = %node.fileid(), seq, numlinks, "create");

        Ok(node)
    }

    /// Build a fully-initialized node. Nothing is linked or registered yet,
    /// so a failure here (payload allocation) unwinds by plain drop.
    #[allow(clippy::too_many_arguments)]
    fn alloc_node(
        &self,
        ctx: &CallerContext,
        parent: &Arc<MemNode>,
        parent_path: &str,
        name: &str,
        kind: FileType,
        attrs: &SetAttrs,
        link_target: Option<&str>,
    ) -> FsResult<Arc<MemNode>> {
        let now = self.now();

        let payload = match kind {
            FileType::Directory => Payload::Directory(DirIndex::new()),
            FileType::Regular => Payload::Regular {
                content: FileContent::allocate(&self.storage, self.config.file_capacity)?,
                open: Default::default(),
            },
            FileType::Symlink => Payload::Symlink {
                target: link_target.unwrap_or_default().to_string(),
            },
            FileType::Block | FileType::Char => Payload::Device {
                dev: attrs.rawdev.unwrap_or_default(),
            },
            FileType::Fifo => Payload::Fifo,
            FileType::Socket => Payload::Socket,
        };

        let (size, spaceused) = match (kind, attrs.size) {
            (FileType::Regular, Some(size)) => (size, size),
            _ => (0, 0),
        };

        let times = FileTimes {
            birthtime: now,
            atime: resolve_time(attrs.atime, now),
            mtime: resolve_time(attrs.mtime, now),
            ctime: now,
        };

        Ok(MemNode::new(NodeSeed {
            fileid: self.alloc_fileid(),
            kind,
            wire: WireHandle::from_path(&join_path(parent_path, name)),
            name: name.to_string(),
            parent: Arc::downgrade(parent),
            root: false,
            attrs: NodeAttrs {
                size,
                spaceused,
                mode: attrs.mode.map(|m| mode_mask(m, ctx.umask)).unwrap_or(0o600),
                uid: attrs.uid.unwrap_or(ctx.uid),
                gid: attrs.gid.unwrap_or(ctx.gid),
                times,
                change: now as u64,
            },
            payload,
        }))
    }

    /// Reconstruct the node's full path by walking parent back-references.
    /// The root's name is itself a full path, so the walk stops there.
    pub fn full_path(&self, node: &Arc<MemNode>) -> String {
        let mut names = Vec::new();
        let mut cur = Arc::clone(node);
        loop {
            let (name, parent) = {
                let st = cur.state.read();
                (st.name.clone(), st.parent.upgrade())
            };
            names.push(name);
            match parent {
                Some(p) => cur = p,
                None => break,
            }
        }

        let mut path = names.pop().unwrap_or_default();
        for name in names.iter().rev() {
            path = join_path(&path, name);
        }
        path
    }

    /// Enumerate `dir` in insertion-sequence order, starting at the first
    /// entry with sequence >= `whence` (`None` starts from the beginning).
    /// The visit callback receives the cookie that resumes *after* the entry;
    /// returning [`DirResult::Terminate`] stops with eof = false.
    pub fn readdir<F>(&self, dir: &Arc<MemNode>, whence: Option<u64>, mut visit: F) -> FsResult<bool>
    where
        F: FnMut(&str, &Arc<MemNode>, &Attributes, u64) -> DirResult,
    {
        let st = dir.state.read();
        let index = st.payload.as_dir()?;
        let seekloc = whence.unwrap_or(DIR_COOKIE_START);

        let mut eof = true;
        for (seq, slot) in index.iter_from(seekloc) {
            let attrs = self.node_attributes(&slot.node);
            if visit(&slot.name, &slot.node, &attrs, seq + 1) == DirResult::Terminate {
                eof = false;
                break;
            }
        }
        Ok(eof)
    }

    /// Attributes of a live node. A node that has been unlinked answers
    /// `Stale`; re-resolving through the parent is the only recovery.
    pub fn getattr(&self, node: &Arc<MemNode>) -> FsResult<Attributes> {
        if !node.is_live() {
            debug!(fileid = %node.fileid(), "attribute query on removed node");
            return Err(FsError::Stale);
        }
        Ok(self.node_attributes(node))
    }

    fn node_attributes(&self, node: &Arc<MemNode>) -> Attributes {
        let st = node.state.read();
        let rawdev = match &st.payload {
            Payload::Device { dev } => Some(*dev),
            _ => None,
        };
        Attributes {
            fileid: node.fileid(),
            kind: node.kind(),
            size: st.attrs.size,
            spaceused: st.attrs.spaceused,
            mode: st.attrs.mode,
            uid: st.attrs.uid,
            gid: st.attrs.gid,
            nlink: node.link_count(),
            times: st.attrs.times,
            change: st.attrs.change,
            rawdev,
        }
    }

    /// Apply attribute changes. A size change is a logical truncate/extend:
    /// it never touches retained payload bytes.
    pub fn setattr(&self, ctx: &CallerContext, node: &Arc<MemNode>, set: &SetAttrs) -> FsResult<()> {
        if set.size.is_some() && !node.kind().is_regular() {
            return Err(FsError::InvalidArgument);
        }

        let now = self.now();
        let mut st = node.state.write();
        if let Some(size) = set.size {
            st.attrs.size = size;
            st.attrs.spaceused = size;
        }
        if let Some(mode) = set.mode {
            st.attrs.mode = mode_mask(mode, ctx.umask);
        }
        if let Some(uid) = set.uid {
            st.attrs.uid = uid;
        }
        if let Some(gid) = set.gid {
            st.attrs.gid = gid;
        }
        if let Some(atime) = set.atime {
            st.attrs.times.atime = resolve_time(Some(atime), now);
        }
        if let Some(mtime) = set.mtime {
            st.attrs.times.mtime = resolve_time(Some(mtime), now);
        }
        st.attrs.times.ctime = now;
        st.attrs.change = now as u64;
        Ok(())
    }

    /// Target of a symlink
    pub fn readlink(&self, node: &Arc<MemNode>) -> FsResult<String> {
        let st = node.state.read();
        match &st.payload {
            Payload::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Move `node` from `old_dir`/`old_name` to `new_dir`/`new_name`.
    ///
    /// An occupied destination must match in directory-ness (`WrongType`),
    /// an occupied destination directory must be empty (`NotEmpty`), and an
    /// occupied destination is unlinked first. Renaming a node onto itself
    /// succeeds without touching anything. The steps run under one lock at
    /// a time; see the module docs for the visibility window this admits.
    pub fn rename(
        &self,
        node: &Arc<MemNode>,
        old_dir: &Arc<MemNode>,
        old_name: &str,
        new_dir: &Arc<MemNode>,
        new_name: &str,
    ) -> FsResult<()> {
        if node.is_root() {
            return Err(FsError::InvalidArgument);
        }
        validate_name(new_name)?;

        match self.lookup(new_dir, new_name) {
            Ok(existing) => {
                if Arc::ptr_eq(&existing, node) {
                    return Ok(());
                }
                if existing.kind().is_dir() != node.kind().is_dir() {
                    return Err(FsError::WrongType);
                }
                if existing.kind().is_dir() && existing.link_count() > 2 {
                    return Err(FsError::NotEmpty);
                }
                self.unlink(new_dir, &existing, new_name)?;
            }
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        {
            let mut st = old_dir.state.write();
            if let Ok(index) = st.payload.as_dir_mut() {
                Self::detach_locked(old_dir, index, node, old_name);
            }
        }

        {
            let mut st = node.state.write();
            st.name = new_name.to_string();
            st.parent = Arc::downgrade(new_dir);
        }

        {
            let mut st = new_dir.state.write();
            let index = st.payload.as_dir_mut()?;
            index.insert(new_name.to_string(), Arc::clone(node));
            node.set_linked(true);
            new_dir.link_count_inc();
        }

        debug!(fileid = %node.fileid(), old_name, new_name, "rename");
        Ok(())
    }

    /// Unlink `node` (linked as `name`) from `dir`. Directories must be
    /// empty; a regular file still open through its global descriptor is
    /// `Busy`. Storage is reclaimed when the last reference drops.
    pub fn unlink(&self, dir: &Arc<MemNode>, node: &Arc<MemNode>, name: &str) -> FsResult<()> {
        if node.is_root() {
            return Err(FsError::InvalidArgument);
        }

        let mut st = dir.state.write();
        let index = st.payload.as_dir_mut()?;

        match node.kind() {
            FileType::Directory => {
                let numlinks = node.link_count();
                if numlinks > 2 {
                    trace!(name, numlinks, "unlink of non-empty directory");
                    return Err(FsError::NotEmpty);
                }
            }
            FileType::Regular => {
                let child = node.state.read();
                if let Payload::Regular { open, .. } = &child.payload {
                    if !open.global.is_closed() {
                        return Err(FsError::Busy);
                    }
                }
            }
            // Unopenable kinds detach without further checks
            _ => {}
        }

        Self::detach_locked(dir, index, node, name);
        debug!(name, fileid = %node.fileid(), "unlink");
        Ok(())
    }

    /// Remove the entry under the already-held parent write lock. Idempotent:
    /// a node that is no longer linked (or linked elsewhere) is left alone.
    fn detach_locked(
        dir: &Arc<MemNode>,
        index: &mut DirIndex<Arc<MemNode>>,
        node: &Arc<MemNode>,
        name: &str,
    ) {
        if !node.is_linked() {
            return;
        }
        let matches = index.get(name).map(|entry| Arc::ptr_eq(entry, node)).unwrap_or(false);
        if matches {
            index.remove(name);
            node.set_linked(false);
            let numlinks = dir.link_count_dec();
            trace!(name, numlinks, "detached child");
        }
    }

    /// Let go of a caller-held node reference. Live nodes are untouched; a
    /// defunct directory drains its descendants and the wire-handle entry is
    /// dropped so storage can be reclaimed with the last reference.
    pub fn release(&self, node: Arc<MemNode>) {
        if node.is_live() {
            trace!(fileid = %node.fileid(), "release of live node");
            return;
        }
        debug!(fileid = %node.fileid(), name = %node.name(), "releasing node");
        if node.kind().is_dir() {
            self.remove_subtree(&node);
        }
        self.wire_table.unregister(&node);
    }

    /// Drain and destroy every child of `dir`, recursively
    pub fn remove_subtree(&self, dir: &Arc<MemNode>) {
        let children = {
            let mut st = dir.state.write();
            match st.payload.as_dir_mut() {
                Ok(index) => index.drain(),
                Err(_) => return,
            }
        };
        for child in children {
            child.set_linked(false);
            dir.link_count_dec();
            self.wire_table.unregister(&child);
            if child.kind().is_dir() {
                self.remove_subtree(&child);
            }
        }
    }

    // ---- wire handles ------------------------------------------------------

    /// The node's wire identity, as first encoded at creation
    pub fn wire_handle(&self, node: &Arc<MemNode>) -> WireHandle {
        *node.wire()
    }

    /// Resolve wire bytes presented without any parent context
    pub fn resolve_handle(&self, bytes: &[u8]) -> FsResult<Arc<MemNode>> {
        self.wire_table.resolve(bytes)
    }

    // ---- open / share reservations -----------------------------------------

    /// Open a regular file, taking a share reservation. The conflict check
    /// and the counter update happen in one critical section. `TRUNC` resets
    /// the logical length; an exclusive create-mode compares the stored
    /// verifier and reports a collision as `AlreadyExists`.
    pub fn open(
        &self,
        node: &Arc<MemNode>,
        flags: OpenFlags,
        create_mode: CreateMode,
    ) -> FsResult<HandleId> {
        {
            let mut st = node.state.write();
            let NodeState {
                attrs,
                verifier,
                payload,
                ..
            } = &mut *st;
            let open = match payload {
                Payload::Regular { open, .. } => open,
                Payload::Directory(_) => return Err(FsError::IsADirectory),
                _ => return Err(FsError::InvalidArgument),
            };

            if open.share.conflicts(flags) {
                trace!(fileid = %node.fileid(), ?flags, "share reservation denied");
                return Err(FsError::ShareDenied);
            }
            open.share.update(OpenFlags::empty(), flags);

            if flags.contains(OpenFlags::TRUNC) {
                attrs.size = 0;
                attrs.spaceused = 0;
            }

            if let CreateMode::Exclusive(v) = create_mode {
                if *verifier != Some(v) {
                    open.share.update(flags, OpenFlags::empty());
                    return Err(FsError::AlreadyExists);
                }
            }
        }

        let id = self.alloc_handle_id();
        self.open_handles.lock().insert(
            id,
            OpenHandle {
                node: Arc::clone(node),
                granted: flags,
                flags: implied_read(flags),
            },
        );
        Ok(id)
    }

    /// Open through the node's global descriptor — the reservation-less path
    /// a stateless caller uses. No share counters are taken.
    pub fn open_stateless(
        &self,
        node: &Arc<MemNode>,
        flags: OpenFlags,
        create_mode: CreateMode,
    ) -> FsResult<()> {
        let mut st = node.state.write();
        let NodeState {
            attrs,
            verifier,
            payload,
            ..
        } = &mut *st;
        let open = match payload {
            Payload::Regular { open, .. } => open,
            Payload::Directory(_) => return Err(FsError::IsADirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        open.global = implied_read(flags);
        if flags.contains(OpenFlags::TRUNC) {
            attrs.size = 0;
            attrs.spaceused = 0;
        }

        if let CreateMode::Exclusive(v) = create_mode {
            if *verifier != Some(v) {
                open.global = OpenFlags::empty();
                return Err(FsError::AlreadyExists);
            }
        }
        Ok(())
    }

    /// Open by name with a create disposition. A missing name is created as
    /// a regular file under the parent's write lock; a fresh creation cannot
    /// conflict with anyone, so its reservation is taken unconditionally.
    pub fn open_at(
        &self,
        ctx: &CallerContext,
        dir: &Arc<MemNode>,
        name: &str,
        flags: OpenFlags,
        create_mode: CreateMode,
        attrs: &SetAttrs,
    ) -> FsResult<(Arc<MemNode>, HandleId)> {
        match self.lookup(dir, name) {
            Ok(node) => {
                match create_mode {
                    CreateMode::Guarded => return Err(FsError::AlreadyExists),
                    CreateMode::Exclusive(_) => {}
                    _ => {
                        if !attrs.is_empty() {
                            self.setattr(ctx, &node, attrs)?;
                        }
                    }
                }
                let id = self.open(&node, flags, create_mode)?;
                Ok((node, id))
            }
            Err(FsError::NotFound) => {
                if create_mode == CreateMode::NoCreate {
                    return Err(FsError::NotFound);
                }
                let node = self.create(ctx, dir, name, FileType::Regular, attrs)?;
                if let CreateMode::Exclusive(v) = create_mode {
                    node.state.write().verifier = Some(v);
                }
                let id = self.open(&node, flags, CreateMode::Unchecked)?;
                Ok((node, id))
            }
            Err(e) => Err(e),
        }
    }

    /// Change the access mode of an existing reservation. The conflict check
    /// runs against the current counters — including the caller's own.
    pub fn reopen(&self, handle: HandleId, flags: OpenFlags) -> FsResult<()> {
        let mut handles = self.open_handles.lock();
        let h = handles.get_mut(&handle).ok_or(FsError::InvalidArgument)?;

        let mut st = h.node.state.write();
        let NodeState { attrs, payload, .. } = &mut *st;
        let open = match payload {
            Payload::Regular { open, .. } => open,
            _ => return Err(FsError::InvalidArgument),
        };

        if open.share.conflicts(flags) {
            return Err(FsError::ShareDenied);
        }
        open.share.update(h.granted, flags);

        if flags.contains(OpenFlags::TRUNC) {
            attrs.size = 0;
            attrs.spaceused = 0;
        }
        drop(st);

        h.granted = flags;
        h.flags = flags;
        Ok(())
    }

    /// Drop a reservation, reversing its share-counter update
    pub fn close(&self, handle: HandleId) -> FsResult<()> {
        let h = self.open_handles.lock().remove(&handle).ok_or(FsError::InvalidArgument)?;
        let mut st = h.node.state.write();
        if let Payload::Regular { open, .. } = &mut st.payload {
            open.share.update(h.granted, OpenFlags::empty());
        }
        Ok(())
    }

    /// Close the node's global descriptor
    pub fn close_stateless(&self, node: &Arc<MemNode>) -> FsResult<()> {
        let mut st = node.state.write();
        match &mut st.payload {
            Payload::Regular { open, .. } => {
                open.global = OpenFlags::empty();
                Ok(())
            }
            _ => Err(FsError::InvalidArgument),
        }
    }

    // ---- file I/O ----------------------------------------------------------

    /// Read from a regular file. The span is clamped to the logical length;
    /// bytes the payload buffer never retained come back as the filler
    /// pattern. eof is reported only when the clamped span is empty.
    pub fn read(
        &self,
        node: &Arc<MemNode>,
        state: Option<HandleId>,
        offset: u64,
        buf: &mut [u8],
    ) -> FsResult<(usize, bool)> {
        if let Some(id) = state {
            let handles = self.open_handles.lock();
            let h = handles.get(&id).ok_or(FsError::InvalidArgument)?;
            if !h.flags.contains(OpenFlags::READ) {
                return Err(FsError::NotOpened);
            }
        }

        let now = self.now();
        let mut st = node.state.write();
        let NodeState { attrs, payload, .. } = &mut *st;
        let (content, open) = match payload {
            Payload::Regular { content, open } => (content, open),
            Payload::Directory(_) => return Err(FsError::IsADirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        if open.share.conflicts(OpenFlags::READ) {
            return Err(FsError::ShareDenied);
        }

        let mut span = buf.len() as u64;
        if offset > attrs.size {
            span = 0;
        } else if offset + span > attrs.size {
            span = attrs.size - offset;
        }
        let span = span as usize;

        let copied = content.read(offset, &mut buf[..span])?;
        for byte in &mut buf[copied..span] {
            *byte = FILLER_BYTE;
        }

        attrs.times.atime = now;
        Ok((span, span == 0))
    }

    /// Write to a regular file. The logical length grows to cover the span;
    /// only the prefix that fits the fixed payload buffer is retained, the
    /// rest is deliberately dropped. Reports the full input length — a write
    /// never fails for capacity reasons.
    pub fn write(
        &self,
        node: &Arc<MemNode>,
        state: Option<HandleId>,
        offset: u64,
        data: &[u8],
    ) -> FsResult<usize> {
        if let Some(id) = state {
            let handles = self.open_handles.lock();
            let h = handles.get(&id).ok_or(FsError::InvalidArgument)?;
            if !h.flags.contains(OpenFlags::WRITE) {
                return Err(FsError::NotOpened);
            }
        }

        let now = self.now();
        let mut st = node.state.write();
        let NodeState { attrs, payload, .. } = &mut *st;
        let (content, open) = match payload {
            Payload::Regular { content, open } => (content, open),
            Payload::Directory(_) => return Err(FsError::IsADirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        if state.is_none() && open.share.conflicts(OpenFlags::WRITE) {
            return Err(FsError::ShareDenied);
        }

        let end = offset + data.len() as u64;
        if end > attrs.size {
            attrs.size = end;
            attrs.spaceused = end;
        }

        content.write(offset, data)?;

        attrs.times.mtime = now;
        attrs.times.ctime = now;
        attrs.change = now as u64;
        Ok(data.len())
    }

    /// Flush a written range. Nothing is buffered, so nothing to do.
    pub fn commit(&self, _node: &Arc<MemNode>, _offset: u64, _len: u64) -> FsResult<()> {
        Ok(())
    }

    /// Byte-range locking is deliberately unimplemented: every request
    /// succeeds and no state is recorded. Callers needing real exclusion
    /// must coordinate outside this core.
    pub fn lock(
        &self,
        node: &Arc<MemNode>,
        _state: Option<HandleId>,
        _range: LockRange,
    ) -> FsResult<()> {
        trace!(fileid = %node.fileid(), "byte-range lock treated as success");
        Ok(())
    }
}

/// Write access on a descriptor implies read access
fn implied_read(flags: OpenFlags) -> OpenFlags {
    if flags.contains(OpenFlags::WRITE) {
        flags | OpenFlags::READ
    } else {
        flags
    }
}

/// Strip format bits and apply the caller's umask
fn mode_mask(mode: u32, umask: u32) -> u32 {
    mode & (!(libc::S_IFMT as u32) & 0xffff) & !umask
}

fn resolve_time(set: Option<SetTime>, now: i64) -> i64 {
    match set {
        Some(SetTime::At(t)) => t,
        Some(SetTime::Now) | None => now,
    }
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
