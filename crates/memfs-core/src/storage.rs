// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Payload storage backends
//!
//! A regular file's byte payload lives behind the `StorageBackend` capability,
//! selected when the namespace is constructed. The backend only retains bytes;
//! logical length, clamping and filler synthesis are the namespace's concern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FsError, FsResult};
use crate::types::ContentId;

/// Storage capability for fixed-capacity file payloads
pub trait StorageBackend: Send + Sync {
    /// Allocate a zeroed payload of exactly `capacity` bytes
    fn allocate(&self, capacity: usize) -> FsResult<ContentId>;
    /// Copy retained bytes at `offset` into `buf`, returning how many were
    /// copied. Reads at or past the capacity return 0.
    fn read(&self, id: ContentId, offset: u64, buf: &mut [u8]) -> FsResult<usize>;
    /// Retain the prefix of `data` that fits below the capacity, returning
    /// how many bytes were kept. Never errors for capacity reasons.
    fn write(&self, id: ContentId, offset: u64, data: &[u8]) -> FsResult<usize>;
    /// Release the payload. Idempotent.
    fn release(&self, id: ContentId);
    /// Capacity of the payload in bytes
    fn capacity(&self, id: ContentId) -> u64;
}

/// In-memory backend holding one fixed-size buffer per content id
pub struct FixedBufferBackend {
    next_id: AtomicU64,
    slots: Mutex<HashMap<ContentId, Box<[u8]>>>,
}

impl FixedBufferBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FixedBufferBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for FixedBufferBackend {
    fn allocate(&self, capacity: usize) -> FsResult<ContentId> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(capacity).map_err(|_| FsError::OutOfMemory)?;
        bytes.resize(capacity, 0);

        let id = ContentId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.slots.lock().insert(id, bytes.into_boxed_slice());
        Ok(id)
    }

    fn read(&self, id: ContentId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let slots = self.slots.lock();
        let slot = slots.get(&id).ok_or(FsError::NotFound)?;

        let start = offset as usize;
        if start >= slot.len() {
            return Ok(0);
        }
        let n = buf.len().min(slot.len() - start);
        buf[..n].copy_from_slice(&slot[start..start + n]);
        Ok(n)
    }

    fn write(&self, id: ContentId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&id).ok_or(FsError::NotFound)?;

        let start = offset as usize;
        if start >= slot.len() {
            return Ok(0);
        }
        let n = data.len().min(slot.len() - start);
        slot[start..start + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn release(&self, id: ContentId) {
        self.slots.lock().remove(&id);
    }

    fn capacity(&self, id: ContentId) -> u64 {
        self.slots.lock().get(&id).map(|s| s.len() as u64).unwrap_or(0)
    }
}

/// Owned reference to one allocated payload; releases it on drop
pub(crate) struct FileContent {
    id: ContentId,
    store: Arc<dyn StorageBackend>,
}

impl FileContent {
    pub(crate) fn allocate(store: &Arc<dyn StorageBackend>, capacity: usize) -> FsResult<Self> {
        let id = store.allocate(capacity)?;
        Ok(Self {
            id,
            store: Arc::clone(store),
        })
    }

    pub(crate) fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.store.read(self.id, offset, buf)
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.store.write(self.id, offset, data)
    }
}

impl Drop for FileContent {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

impl std::fmt::Debug for FileContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileContent({})", self.id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_within_capacity() {
        let backend = FixedBufferBackend::new();
        let id = backend.allocate(16).unwrap();

        let n = backend.write(id, 0, b"hello world").unwrap();
        assert_eq!(n, 11);

        let mut buf = [0u8; 5];
        let n = backend.read(id, 6, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn write_clamped_at_capacity() {
        let backend = FixedBufferBackend::new();
        let id = backend.allocate(8).unwrap();

        // Only the first 4 bytes fit starting at offset 4
        let n = backend.write(id, 4, b"abcdefgh").unwrap();
        assert_eq!(n, 4);

        // Entirely past the buffer retains nothing
        let n = backend.write(id, 8, b"xyz").unwrap();
        assert_eq!(n, 0);

        let mut buf = [0u8; 8];
        let n = backend.read(id, 0, &mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, b"\0\0\0\0abcd");
    }

    #[test]
    fn unwritten_bytes_read_as_zero() {
        let backend = FixedBufferBackend::new();
        let id = backend.allocate(4).unwrap();

        let mut buf = [0xffu8; 4];
        let n = backend.read(id, 0, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, &[0, 0, 0, 0]);
    }

    #[test]
    fn release_drops_slot() {
        let backend = FixedBufferBackend::new();
        let id = backend.allocate(4).unwrap();
        assert_eq!(backend.capacity(id), 4);

        backend.release(id);
        assert_eq!(backend.capacity(id), 0);
        let mut buf = [0u8; 1];
        assert_eq!(backend.read(id, 0, &mut buf), Err(FsError::NotFound));
    }

    #[test]
    fn content_releases_on_drop() {
        let backend: Arc<dyn StorageBackend> = Arc::new(FixedBufferBackend::new());
        let content = FileContent::allocate(&backend, 8).unwrap();
        let id = content.id;
        assert_eq!(backend.capacity(id), 8);
        drop(content);
        assert_eq!(backend.capacity(id), 0);
    }
}
