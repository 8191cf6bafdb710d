// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Reference-counted shuffle block buffers.
//!
//! A [BlockBuf] is shared between the write path, the flush path and any
//! number of merge readers. The flush path releases its reference once the
//! block is on disk, and a released buffer frees its payload as soon as the
//! count reaches zero. Readers therefore never dereference a cached buffer
//! directly: they call [BlockBuf::try_retain] immediately before use and
//! fall back to the on-disk copy when it refuses. The refusal is a normal
//! signal, not an error.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

/// A shareable, reference-counted block payload.
///
/// Cloning a `BlockBuf` clones the handle, not the reference count; the
/// count tracks liveness, not the number of handles.
#[derive(Debug, Clone)]
pub struct BlockBuf {
    inner: Arc<BufInner>,
}

#[derive(Debug)]
struct BufInner {
    len: usize,
    refs: AtomicI32,
    data: RwLock<Option<Bytes>>,
}

impl BufInner {
    // Decrements the count; the payload is dropped when it reaches zero.
    // Refuses below zero so a racing double release stays harmless.
    fn release_one(&self) -> bool {
        loop {
            let current = self.refs.load(Ordering::Acquire);
            if current <= 0 {
                return false;
            }
            if self
                .refs
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if current == 1 {
                    *self.data.write() = None;
                }
                return true;
            }
        }
    }
}

impl BlockBuf {
    /// Wraps a payload with an initial reference count of one, owned by the
    /// write path until the flush cleanup releases it.
    pub fn new(data: Bytes) -> Self {
        Self {
            inner: Arc::new(BufInner {
                len: data.len(),
                refs: AtomicI32::new(1),
                data: RwLock::new(Some(data)),
            }),
        }
    }

    /// Atomically increments the reference count unless it has already
    /// reached zero.
    ///
    /// Returns a [BlockLease] whose drop releases the reference, or `None`
    /// when the buffer has been released by a concurrent flush cleanup. The
    /// caller is expected to fall back to the on-disk copy in that case.
    pub fn try_retain(&self) -> Option<BlockLease> {
        loop {
            let current = self.inner.refs.load(Ordering::Acquire);
            if current <= 0 {
                return None;
            }
            if self
                .inner
                .refs
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // the count is ours now, so the payload cannot have been
                // dropped between the exchange and this read
                let data = self.inner.data.read().clone();
                return match data {
                    Some(bytes) => Some(BlockLease {
                        inner: self.inner.clone(),
                        data: bytes,
                    }),
                    None => {
                        self.inner.release_one();
                        None
                    }
                };
            }
        }
    }

    /// Releases one reference. The payload is dropped when the count reaches
    /// zero. Returns false if the buffer was already fully released.
    pub fn release(&self) -> bool {
        self.inner.release_one()
    }

    /// Current reference count. Zero means the payload is gone.
    pub fn ref_count(&self) -> i32 {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// Whether the payload is still resident.
    pub fn is_live(&self) -> bool {
        self.ref_count() > 0
    }

    /// Payload length in bytes. Stable across release.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }
}

/// A held reference to a live block payload.
///
/// The payload stays resident at least until the lease drops.
#[derive(Debug)]
pub struct BlockLease {
    inner: Arc<BufInner>,
    data: Bytes,
}

impl BlockLease {
    /// The retained payload.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// The retained payload as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        self.inner.release_one();
    }
}
