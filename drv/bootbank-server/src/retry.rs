// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single retry of storage operations.
//!
//! Every storage access this driver makes goes through [`Retrying`], which
//! repeats an operation once if it fails with a transient error and then
//! gives up. Boot time stays bounded no matter how badly storage behaves.

use drv_bootbank_api::{
    BootChainId, PartitionRef, PartitionStore, PersistentWords, StorageError,
};
use ringbuf::{ringbuf, ringbuf_entry};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Retrying(StorageError),
    GaveUp(StorageError),
}

ringbuf!(Trace, 8, Trace::None);

fn once<T>(
    mut op: impl FnMut() -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    match op() {
        Err(e) if e.is_transient() => {
            ringbuf_entry!(Trace::Retrying(e));
            op().inspect_err(|&e| ringbuf_entry!(Trace::GaveUp(e)))
        }
        r => r,
    }
}

/// Wraps a storage collaborator so each operation is retried once.
pub struct Retrying<'a, T>(pub &'a mut T);

impl<W: PersistentWords> PersistentWords for Retrying<'_, W> {
    fn read_word(&self, addr: u32) -> u32 {
        self.0.read_word(addr)
    }

    fn write_word(
        &mut self,
        addr: u32,
        value: u32,
    ) -> Result<(), StorageError> {
        once(|| self.0.write_word(addr, value))
    }
}

impl<S: PartitionStore> PartitionStore for Retrying<'_, S> {
    fn partition_count(&self) -> usize {
        self.0.partition_count()
    }

    fn partition(&self, index: usize) -> Option<PartitionRef> {
        self.0.partition(index)
    }

    fn partition_exists(&self, base: &str, chain: BootChainId) -> bool {
        self.0.partition_exists(base, chain)
    }

    fn read_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        once(|| self.0.read_partition(part, offset, buf))
    }

    fn write_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        once(|| self.0.write_partition(part, offset, data))
    }
}
