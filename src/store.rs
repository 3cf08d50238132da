// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The Traffic Store (component A, §4.1): a fixed 64 KiB region holding
//! the latest PD payloads at caller-defined offsets, protected by a single
//! mutex.

use crate::constant::{TRAFFIC_STORE_SIZE, WriteSubnet};
use parking_lot::{Mutex, MutexGuard};

/// Shared memory region exposing PD payloads at fixed offsets.
///
/// Invariant: readers and writers must hold the lock while touching any
/// byte; there is no interior per-slot locking, matching §4.1.
pub struct TrafficStore {
    bytes: Mutex<[u8; TRAFFIC_STORE_SIZE]>,
    write_subnet: Mutex<WriteSubnet>,
}

/// RAII guard returned by [`TrafficStore::lock`]. Dropping it is the
/// `unlock()` operation of §4.1.
pub struct StoreGuard<'a> {
    inner: MutexGuard<'a, [u8; TRAFFIC_STORE_SIZE]>,
}

impl<'a> StoreGuard<'a> {
    /// Unchecked copy out of the store. Bounds must already have been
    /// enforced by the caller (registry, at publish/subscribe time) from
    /// the schema's payload size.
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        let end = offset + out.len();
        out.copy_from_slice(&self.inner[offset..end]);
    }

    /// Unchecked copy into the store.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        self.inner[offset..end].copy_from_slice(data);
    }

    /// Zero a range, used by the `ZERO` timeout behavior (§4.4).
    pub fn zero(&mut self, offset: usize, len: usize) {
        let end = offset + len;
        for b in &mut self.inner[offset..end] {
            *b = 0;
        }
    }
}

impl TrafficStore {
    pub fn new() -> TrafficStore {
        TrafficStore {
            bytes: Mutex::new([0u8; TRAFFIC_STORE_SIZE]),
            write_subnet: Mutex::new(WriteSubnet::Auto),
        }
    }

    /// Acquire the single mutex protecting the store.
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            inner: self.bytes.lock(),
        }
    }

    pub fn set_write_subnet(&self, id: WriteSubnet) {
        *self.write_subnet.lock() = id;
    }

    pub fn get_write_subnet(&self) -> WriteSubnet {
        *self.write_subnet.lock()
    }
}

impl Default for TrafficStore {
    fn default() -> Self {
        Self::new()
    }
}
