// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the dual-bank boot redundancy manager.
//!
//! The boot-bank driver keeps two copies of everything it needs to boot: two
//! root filesystem slots (A and B) and two boot chains (A and B) of
//! firmware partitions. This crate holds the types shared between the driver,
//! its platform glue and its test doubles: slot and chain identifiers, the
//! packed persistent words, partition references, errors, and the traits the
//! driver uses to reach storage.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use num_derive::FromPrimitive;

mod partition;
mod status;
mod update;

pub use num_traits::FromPrimitive;
pub use partition::*;
pub use status::*;
pub use update::*;

/// Errors that can be produced by the boot-bank driver.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum BankError {
    /// A named partition (or its sibling) does not exist.
    NotFound = 1,
    /// Another agent holds the storage claim.
    Conflict,
    /// Nothing was changed: the backup copy could not be read, written or
    /// verified, or the update request ran out of attempts.
    Aborted,
    /// The backup copy was written but the primary was not.
    PartialWrite,
    /// A table, buffer or counter is full.
    OutOfResources,
    /// Storage failed, even after a retry.
    IoError,
    /// The caller handed us something we cannot use.
    BadArgument,
    /// Neither copy of a replicated record is valid.
    NoValidCopy,
    /// Both copies of a replicated record are valid under the same sequence
    /// number but hold different records.
    Diverged,
}

/// Errors reported by the storage collaborators.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum StorageError {
    Io = 1,
    Timeout,
    NoSpace,
}

impl StorageError {
    /// Returns `true` if trying the same operation again might succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, StorageError::Io | StorageError::Timeout)
    }
}

impl From<StorageError> for BankError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io | StorageError::Timeout => BankError::IoError,
            StorageError::NoSpace => BankError::OutOfResources,
        }
    }
}

/// One of the two root filesystem slots.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum BootSlot {
    A = 0,
    B = 1,
}

impl core::ops::Not for BootSlot {
    type Output = Self;
    fn not(self) -> Self::Output {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl BootSlot {
    /// Returns the boot chain whose partition names this slot's partitions
    /// share a suffix with.
    pub fn chain(self) -> BootChainId {
        match self {
            Self::A => BootChainId::A,
            Self::B => BootChainId::B,
        }
    }

    pub fn mask(self) -> SlotMask {
        match self {
            Self::A => SlotMask::A,
            Self::B => SlotMask::B,
        }
    }
}

/// One of the two firmware boot chains.
///
/// Chain A is chain 0 and its partitions carry the `_a` suffix; chain B is
/// chain 1 and carries `_b`.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum BootChainId {
    A = 0,
    B = 1,
}

impl core::ops::Not for BootChainId {
    type Output = Self;
    fn not(self) -> Self::Output {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl BootChainId {
    /// Partition name suffix for this chain.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::A => "_a",
            Self::B => "_b",
        }
    }

    pub fn slot(self) -> BootSlot {
        match self {
            Self::A => BootSlot::A,
            Self::B => BootSlot::B,
        }
    }
}

/// Where the next boot should go.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootTarget {
    Slot(BootSlot),
    Recovery,
}

bitflags! {
    /// A set of root filesystem slots.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SlotMask: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
    }
}

impl SlotMask {
    pub fn contains_slot(self, slot: BootSlot) -> bool {
        self.contains(slot.mask())
    }
}

/// Fixed-width words that survive resets (the rootfs status word, the
/// pending-update marker and friends).
///
/// Reads never fail: storage that was never written, or that cannot be read,
/// hands back whatever value the platform uses for "blank", and the decoders
/// in this crate treat anything unrecognized as absent.
pub trait PersistentWords {
    fn read_word(&self, addr: u32) -> u32;
    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), StorageError>;
}

/// Block storage holding the replicated partitions.
///
/// Partitions are enumerated by index; `partition` returns `None` once
/// `index` runs past the end. Only partitions whose names carry a chain
/// marker are reported.
pub trait PartitionStore {
    fn partition_count(&self) -> usize;
    fn partition(&self, index: usize) -> Option<PartitionRef>;

    /// Returns `true` if the chain-specific copy of `base` exists.
    fn partition_exists(&self, base: &str, chain: BootChainId) -> bool;

    /// Reads `buf.len()` bytes starting `offset` bytes into `part`.
    fn read_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), StorageError>;

    /// Writes `data` starting `offset` bytes into `part`, erasing as needed.
    fn write_partition(
        &mut self,
        part: &PartitionRef,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;
}

/// Platform check that decides whether a rootfs slot holds something that
/// can boot. Anything the verifier does not vouch for is not bootable.
pub trait SlotVerifier {
    fn is_slot_bootable(&self, slot: BootSlot) -> bool;
}

/// Reports whether a firmware image update to mass storage is underway.
pub trait ImageUpdateMonitor {
    fn is_update_in_flight(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_bank_errors() {
        assert_eq!(BankError::from(StorageError::Io), BankError::IoError);
        assert_eq!(BankError::from(StorageError::Timeout), BankError::IoError);
        assert_eq!(
            BankError::from(StorageError::NoSpace),
            BankError::OutOfResources
        );
        assert!(StorageError::Timeout.is_transient());
        assert!(!StorageError::NoSpace.is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(BankError::from_u32(0), None);
        assert_eq!(BankError::from_u32(1), Some(BankError::NotFound));
        assert_eq!(BankError::from_u32(3), Some(BankError::Aborted));
        assert_eq!(BankError::from_u32(9), Some(BankError::Diverged));
        assert_eq!(BankError::from_u32(10), None);
    }

    #[test]
    fn slots_and_chains_line_up() {
        assert_eq!(!BootSlot::A, BootSlot::B);
        assert_eq!(!BootChainId::B, BootChainId::A);
        assert_eq!(BootSlot::B.chain(), BootChainId::B);
        assert_eq!(BootChainId::A.slot(), BootSlot::A);
        assert_eq!(BootChainId::B.suffix(), "_b");
        assert_eq!(BootSlot::from_u8(1), Some(BootSlot::B));
        assert_eq!(BootChainId::from_u8(2), None);
    }

    #[test]
    fn slot_mask() {
        let m = SlotMask::A | SlotMask::B;
        assert!(m.contains_slot(BootSlot::A));
        assert!(!SlotMask::B.contains_slot(BootSlot::A));
        assert!(SlotMask::empty().is_empty());
    }
}
