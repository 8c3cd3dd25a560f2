//! A reusable-buffer memory pool (C1).
//!
//! Mirrors the stack-based free list of the original memory manager: buffers
//! are pushed back on drop and the next `get` pops the most recently freed
//! one if it is big enough, to keep hot allocations warm in cache.

use std::sync::{Arc, Mutex};

use crate::geometry::Voxel;

struct Inner<T: Voxel> {
    free: Mutex<Vec<Vec<T>>>,
}

/// Shared handle to a pool of buffers of element type `T`.
#[derive(Clone)]
pub struct Pool<T: Voxel> {
    inner: Arc<Inner<T>>,
}

impl<T: Voxel> Pool<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { free: Mutex::new(Vec::new()) }),
        }
    }

    /// Returns a zero-filled buffer of exactly `len` elements. Buffers
    /// popped from the free list are truncated or extended (with zeros) to
    /// the requested length — recycled memory is never handed out without a
    /// full overwrite, since this crate forbids `unsafe` and therefore
    /// cannot give out uninitialized memory the way the original allocator did.
    pub fn get(&self, len: usize) -> PooledBuffer<T> {
        let mut free = self.inner.free.lock().unwrap();
        let mut buffer = free.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, T::default());
        drop(free);

        PooledBuffer {
            data: Some(buffer),
            pool: self.inner.clone(),
        }
    }
}

impl<T: Voxel> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer on loan from a [`Pool`]. Returned to the pool's free list on drop.
pub struct PooledBuffer<T: Voxel> {
    data: Option<Vec<T>>,
    pool: Arc<Inner<T>>,
}

impl<T: Voxel> PooledBuffer<T> {
    pub fn as_slice(&self) -> &[T] {
        self.data.as_deref().unwrap()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.as_deref_mut().unwrap()
    }

    /// Detaches the underlying `Vec` from the pool, e.g. to hand it to the
    /// writer pipeline without returning it on drop.
    pub fn into_vec(mut self) -> Vec<T> {
        self.data.take().unwrap()
    }
}

impl<T: Voxel> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.data.take() {
            self.pool.free.lock().unwrap().push(buffer);
        }
    }
}
