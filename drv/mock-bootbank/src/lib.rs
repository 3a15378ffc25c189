// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mock boot-bank storage.
//!
//! In-memory persistent words and partition flash, a verifier with a fixed
//! verdict, and a switchable image-update flag. Both storage mocks can be
//! told to fail upcoming operations or to lose power after a given number of
//! writes, so tests can stop the driver at any point in a write sequence and
//! then "reboot" it over the same storage.

use drv_bootbank_api::{
    split_chain, BootChainId, BootSlot, ImageUpdateMonitor, PartitionRef,
    PartitionStore, PersistentWords, SlotMask, SlotVerifier, StorageError,
};
use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};

/// Scheduled failures for one mock.
#[derive(Debug, Default)]
pub struct Faults {
    write_failures: VecDeque<StorageError>,
    read_failures: VecDeque<StorageError>,
    writes_until_crash: Option<usize>,
    crashed: bool,
}

impl Faults {
    /// Makes the next `n` writes fail with `e`.
    pub fn fail_writes(&mut self, n: usize, e: StorageError) {
        self.write_failures.extend(std::iter::repeat(e).take(n));
    }

    /// Makes the next `n` reads fail with `e`.
    pub fn fail_reads(&mut self, n: usize, e: StorageError) {
        self.read_failures.extend(std::iter::repeat(e).take(n));
    }

    /// Lets `n` more writes through, then loses power: every write after
    /// that fails without changing anything, until [`Faults::power_cycle`].
    pub fn crash_after_writes(&mut self, n: usize) {
        self.writes_until_crash = Some(n);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// Restores power and forgets anything still scheduled.
    pub fn power_cycle(&mut self) {
        *self = Self::default();
    }

    fn check_write(&mut self) -> Result<(), StorageError> {
        if self.crashed {
            return Err(StorageError::Io);
        }
        if let Some(e) = self.write_failures.pop_front() {
            return Err(e);
        }
        match self.writes_until_crash {
            Some(0) => {
                self.crashed = true;
                Err(StorageError::Io)
            }
            Some(n) => {
                self.writes_until_crash = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_read(&mut self) -> Result<(), StorageError> {
        match self.read_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Persistent words backed by a map. Words never written read as `blank`.
#[derive(Debug, Default)]
pub struct MockWords {
    words: BTreeMap<u32, u32>,
    blank: u32,
    writes: usize,
    faults: Faults,
}

impl MockWords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Words that read as `blank` until written, as erased storage would.
    pub fn with_blank(blank: u32) -> Self {
        Self {
            blank,
            ..Self::default()
        }
    }

    pub fn get(&self, addr: u32) -> u32 {
        self.words.get(&addr).copied().unwrap_or(self.blank)
    }

    /// Sets a word directly, bypassing fault injection.
    pub fn set(&mut self, addr: u32, value: u32) {
        self.words.insert(addr, value);
    }

    /// Number of writes that went through.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }
}

impl PersistentWords for MockWords {
    fn read_word(&self, addr: u32) -> u32 {
        self.get(addr)
    }

    fn write_word(
        &mut self,
        addr: u32,
        value: u32,
    ) -> Result<(), StorageError> {
        self.faults.check_write()?;
        self.words.insert(addr, value);
        self.writes += 1;
        Ok(())
    }
}

/// One write that reached a [`MockFlash`] partition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlashWrite {
    pub partition: String,
    pub offset: u64,
    pub len: usize,
}

/// Erase value of mock flash.
pub const ERASED: u8 = 0xff;

/// Block size reported for every mock partition.
pub const MOCK_ERASE_BLOCK: u32 = 0x1000;

/// Partition flash backed by vectors.
#[derive(Debug, Default)]
pub struct MockFlash {
    parts: Vec<(PartitionRef, Vec<u8>)>,
    next_offset: u64,
    log: Vec<FlashWrite>,
    faults: Faults,
}

impl MockFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rootfs slots `APP_a`/`APP_b` and boot configuration `BCT_a`/`BCT_b`.
    pub fn dual_slot() -> Self {
        Self::new()
            .with_partition("APP_a", 0x4000)
            .with_partition("APP_b", 0x4000)
            .with_partition("BCT_a", 0x2000)
            .with_partition("BCT_b", 0x2000)
    }

    /// Like [`MockFlash::dual_slot`] without `APP_b`.
    pub fn single_slot() -> Self {
        Self::new()
            .with_partition("APP_a", 0x4000)
            .with_partition("BCT_a", 0x2000)
            .with_partition("BCT_b", 0x2000)
    }

    pub fn with_partition(mut self, name: &str, size: u64) -> Self {
        self.add_partition(name, size);
        self
    }

    /// Adds an erased partition after the existing ones.
    ///
    /// # Panics
    ///
    /// If `name` carries no chain marker.
    pub fn add_partition(&mut self, name: &str, size: u64) {
        let part =
            PartitionRef::new(name, self.next_offset, size, MOCK_ERASE_BLOCK)
                .expect("mock partition names need a chain marker");
        self.next_offset += size;
        self.parts.push((part, vec![ERASED; size as usize]));
    }

    /// # Panics
    ///
    /// If there is no partition called `name`.
    pub fn contents(&self, name: &str) -> &[u8] {
        &self.find(name).expect("no such partition").1
    }

    /// Direct access to a partition, bypassing fault injection.
    pub fn contents_mut(&mut self, name: &str) -> &mut [u8] {
        let i = self.index(name).expect("no such partition");
        &mut self.parts[i].1
    }

    /// Every write that went through, oldest first.
    pub fn write_log(&self) -> &[FlashWrite] {
        &self.log
    }

    pub fn clear_write_log(&mut self) {
        self.log.clear();
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.parts.iter().position(|(p, _)| p.name.as_str() == name)
    }

    fn find(&self, name: &str) -> Option<&(PartitionRef, Vec<u8>)> {
        self.index(name).map(|i| &self.parts[i])
    }

    fn range(
        data: &[u8],
        offset: u64,
        len: usize,
    ) -> Result<std::ops::Range<usize>, StorageError> {
        let start =
            usize::try_from(offset).map_err(|_| StorageError::NoSpace)?;
        let end = start.checked_add(len).ok_or(StorageError::NoSpace)?;
        if end > data.len() {
            return Err(StorageError::NoSpace);
        }
        Ok(start..end)
    }
}

impl PartitionStore for MockFlash {
    fn partition_count(&self) -> usize {
        self.parts.len()
    }

    fn partition(&self, index: usize) -> Option<PartitionRef> {
        self.parts.get(index).map(|(p, _)| p.clone())
    }

    fn partition_exists(&self, base: &str, chain: BootChainId) -> bool {
        self.parts
            .iter()
            .any(|(p, _)| split_chain(&p.name) == Some((base, chain)))
    }

    fn read_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        self.faults.check_read()?;
        let (_, data) = self.find(&part.name).ok_or(StorageError::Io)?;
        let r = Self::range(data, offset, buf.len())?;
        buf.copy_from_slice(&data[r]);
        Ok(())
    }

    fn write_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let i = self.index(&part.name).ok_or(StorageError::Io)?;
        let r = Self::range(&self.parts[i].1, offset, data.len())?;
        self.faults.check_write()?;
        self.parts[i].1[r].copy_from_slice(data);
        self.log.push(FlashWrite {
            partition: part.name.as_str().to_string(),
            offset,
            len: data.len(),
        });
        Ok(())
    }
}

/// Verifier with a fixed set of bootable slots.
#[derive(Copy, Clone, Debug)]
pub struct MockVerifier {
    pub bootable: SlotMask,
}

impl MockVerifier {
    pub fn all() -> Self {
        Self {
            bootable: SlotMask::all(),
        }
    }

    pub fn none() -> Self {
        Self {
            bootable: SlotMask::empty(),
        }
    }
}

impl SlotVerifier for MockVerifier {
    fn is_slot_bootable(&self, slot: BootSlot) -> bool {
        self.bootable.contains_slot(slot)
    }
}

/// Image-update flag that tests can flip through a shared reference.
#[derive(Debug, Default)]
pub struct MockImageUpdates {
    in_flight: Cell<bool>,
}

impl MockImageUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.set(in_flight);
    }
}

impl ImageUpdateMonitor for MockImageUpdates {
    fn is_update_in_flight(&self) -> bool {
        self.in_flight.get()
    }
}
