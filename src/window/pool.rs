//! Shared reuse pool for digests and rebuild scratch buffers.
//!
//! Rebuilds churn through a digest and a batch vector each time; the pool
//! keeps a small free list of both so steady-state rebuilds allocate
//! nothing. Strictly optional: a disabled pool hands out fresh instances and
//! drops returns, and the engine behaves identically either way.
//!
//! Returned instances are cleared before they enter the free list, and a
//! pooled digest is only handed back out to a caller asking for the same
//! compression factor (the digest cannot be re-parameterized after
//! construction; mismatches are dropped rather than recycled).

use parking_lot::Mutex;

use crate::digest::Digest;
use crate::error::WdResult;

/// Retained instances per free list.
const POOL_CAP: usize = 8;

#[derive(Debug, Default)]
pub struct ScratchPool {
    digests: Mutex<Vec<Digest>>,
    batches: Mutex<Vec<Vec<f64>>>,
    disabled: bool,
}

impl ScratchPool {
    pub fn new() -> Self {
        ScratchPool::default()
    }

    /// A pool that always allocates fresh and never retains returns.
    pub fn disabled() -> Self {
        ScratchPool {
            digests: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            disabled: true,
        }
    }

    /// Borrow a cleared digest with the given compression, reusing a pooled
    /// one when available.
    pub fn take_digest(&self, compression: f64) -> WdResult<Digest> {
        if !self.disabled {
            let mut free = self.digests.lock();
            while let Some(d) = free.pop() {
                if d.compression() == compression {
                    debug_assert!(d.is_empty());
                    return Ok(d);
                }
                // Wrong parameterization; drop it instead of recycling.
            }
        }
        Digest::new(compression)
    }

    /// Return a digest to the pool. It is cleared here; the caller must not
    /// retain any reference to it.
    pub fn put_digest(&self, mut digest: Digest) {
        if self.disabled {
            return;
        }
        digest.clear();
        let mut free = self.digests.lock();
        if free.len() < POOL_CAP {
            free.push(digest);
        }
    }

    pub(crate) fn take_batch(&self) -> Vec<f64> {
        if !self.disabled {
            if let Some(b) = self.batches.lock().pop() {
                debug_assert!(b.is_empty());
                return b;
            }
        }
        Vec::new()
    }

    pub(crate) fn put_batch(&self, mut batch: Vec<f64>) {
        if self.disabled {
            return;
        }
        batch.clear();
        let mut free = self.batches.lock();
        if free.len() < POOL_CAP {
            free.push(batch);
        }
    }
}
