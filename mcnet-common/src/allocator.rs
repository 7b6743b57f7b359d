//! # Allocator Capability
//!
//! Purpose: Let the client decide how much memory batch storage may claim.
//! Batches ask the allocator before they grow and report back when they
//! shrink or are released, so a caller can cap or account for batch memory
//! without replacing the global allocator.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The client is built with any `Allocator`.
//! 2. **Accounting Only**: Backing memory still comes from the global
//!    allocator; the capability grants or refuses byte budgets.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AllocError;

/// Budget authority consulted for batch backing storage.
pub trait Allocator: Send + Sync {
    /// Requests `bytes` of new storage.
    fn allocate(&self, bytes: usize) -> Result<(), AllocError>;

    /// Resizes an existing grant from `old_bytes` to `new_bytes`.
    fn reallocate(&self, old_bytes: usize, new_bytes: usize) -> Result<(), AllocError> {
        if new_bytes >= old_bytes {
            self.allocate(new_bytes - old_bytes)
        } else {
            self.free(old_bytes - new_bytes);
            Ok(())
        }
    }

    /// Returns `bytes` previously granted.
    fn free(&self, bytes: usize);
}

/// Grants every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, _bytes: usize) -> Result<(), AllocError> {
        Ok(())
    }

    fn free(&self, _bytes: usize) {}
}

/// Grants requests until a fixed byte budget is exhausted.
#[derive(Debug)]
pub struct BoundedAllocator {
    limit: usize,
    used: AtomicUsize,
}

impl BoundedAllocator {
    pub fn new(limit: usize) -> Self {
        BoundedAllocator {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Bytes currently granted.
    pub fn in_use(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

impl Allocator for BoundedAllocator {
    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|next| *next <= self.limit)
            })
            .map(|_| ())
            .map_err(|_| AllocError::Refused { requested: bytes })
    }

    fn free(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}
