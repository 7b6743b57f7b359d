//! # Key Batch
//!
//! Purpose: Accumulate the keys of one multi-key fetch, each annotated with
//! its routing hash, before the dispatch layer splits them per server.
//!
//! ## Design Principles
//! 1. **Single Sequence**: Key bytes, length and hash live together in one
//!    `BatchEntry`, so the index-parallel invariant holds by construction.
//! 2. **Doubling Growth**: Logical capacity doubles whenever a key would not
//!    fit; the allocator capability approves every growth step.
//! 3. **Reusable**: `reset` clears entries but keeps the storage for the
//!    next dispatch cycle.
//! 4. **No Deduplication**: Repeated keys are stored repeatedly. The protocol
//!    layer may coalesce responses itself, and a caller asking for a key
//!    twice gets two entries.

use std::mem;
use std::sync::Arc;

use mcnet_common::{AllocError, Allocator, BatchError, BatchResult, KeyHasher};

use crate::client::Client;

/// One requested key and its routing hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    key: Box<[u8]>,
    hash: u32,
}

impl BatchEntry {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// Growable set of keys for a single pipelined multi-get.
///
/// The batch shares the client's hasher and allocator but never keeps the
/// client itself alive.
pub struct Batch {
    hasher: Arc<dyn KeyHasher>,
    allocator: Arc<dyn Allocator>,
    flags: u32,
    owns_header: bool,
    capacity: usize,
    entries: Vec<BatchEntry>,
}

impl Batch {
    /// Bytes charged to the allocator per slot of capacity.
    pub const SLOT_BYTES: usize = mem::size_of::<BatchEntry>();

    /// Creates a batch with room for one key.
    pub fn create(client: &Client) -> BatchResult<Self> {
        Self::create_sized(client, 1)
    }

    /// Creates a batch with room for `capacity_hint` keys (at least one).
    pub fn create_sized(client: &Client, capacity_hint: usize) -> BatchResult<Self> {
        let capacity = capacity_hint.max(1);
        let allocator = client.allocator();
        let bytes = slot_bytes(capacity)?;
        allocator.allocate(bytes)?;

        let mut entries = Vec::new();
        if entries.try_reserve_exact(capacity).is_err() {
            allocator.free(bytes);
            return Err(BatchError::OutOfMemory);
        }

        Ok(Batch {
            hasher: client.hasher(),
            allocator,
            flags: 0,
            owns_header: false,
            capacity,
            entries,
        })
    }

    /// Heap-allocated variant of [`Batch::create_sized`]; the batch owns its
    /// header and releases it on free.
    pub fn boxed_sized(client: &Client, capacity_hint: usize) -> BatchResult<Box<Self>> {
        let mut batch = Box::new(Self::create_sized(client, capacity_hint)?);
        batch.owns_header = true;
        Ok(batch)
    }

    /// Adds `key`, routed by its own hash.
    pub fn add_key(&mut self, key: &[u8]) -> BatchResult<()> {
        let hash = self.hasher.hash(key);
        self.add_key_by_hash(key, hash)
    }

    /// Adds `key`, routed by the hash of `master_key`.
    ///
    /// Lets related entries with distinct storage keys land on one server.
    pub fn add_key_by_master(&mut self, key: &[u8], master_key: &[u8]) -> BatchResult<()> {
        let hash = self.hasher.hash(master_key);
        self.add_key_by_hash(key, hash)
    }

    /// Adds `key` with a caller-supplied routing hash.
    ///
    /// On error the batch is left exactly as it was before the call.
    pub fn add_key_by_hash(&mut self, key: &[u8], hash: u32) -> BatchResult<()> {
        if self.entries.len() == self.capacity {
            self.grow()?;
        }
        self.entries.push(BatchEntry {
            key: key.into(),
            hash,
        });
        Ok(())
    }

    fn grow(&mut self) -> BatchResult<()> {
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .ok_or(AllocError::CapacityOverflow)?;
        let old_bytes = slot_bytes(self.capacity)?;
        let new_bytes = slot_bytes(new_capacity)?;
        self.allocator.reallocate(old_bytes, new_bytes)?;

        let additional = new_capacity - self.entries.len();
        if self.entries.try_reserve_exact(additional).is_err() {
            self.allocator.free(new_bytes - old_bytes);
            return Err(BatchError::OutOfMemory);
        }
        self.capacity = new_capacity;
        Ok(())
    }

    /// Drops every entry and clears flags; capacity is retained.
    pub fn reset(&mut self) {
        self.flags = 0;
        self.entries.clear();
    }

    /// Releases the key copies and backing storage.
    pub fn free(self) {
        drop(self);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots allocated; always at least `len()`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// True when the batch was created by [`Batch::boxed_sized`].
    pub fn owns_header(&self) -> bool {
        self.owns_header
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.entries.iter().map(BatchEntry::key)
    }

    pub fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(BatchEntry::len)
    }

    pub fn hashes(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(BatchEntry::hash)
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if let Ok(bytes) = slot_bytes(self.capacity) {
            self.allocator.free(bytes);
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("flags", &self.flags)
            .field("owns_header", &self.owns_header)
            .finish()
    }
}

fn slot_bytes(capacity: usize) -> Result<usize, AllocError> {
    capacity
        .checked_mul(Batch::SLOT_BYTES)
        .ok_or(AllocError::CapacityOverflow)
}
