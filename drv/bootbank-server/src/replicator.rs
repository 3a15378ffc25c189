// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crash-safe writes to chain-replicated partitions.
//!
//! A replicated write names a partition and the chain whose copy is the
//! primary; the other chain's copy is the backup. The backup is always
//! written and read back first. If power goes away before the primary is
//! touched, the primary still holds its old, self-consistent record and the
//! backup holds the new one; the repair pass on the next boot picks the newer
//! valid copy and copies it over the other.

use crate::claim::StorageClaim;
use crate::record::{
    self, read_valid_header, RecordHeader, CHUNK_SIZE, RECORD_HEADER_LEN,
};
use crate::retry::Retrying;
use crate::table::PartitionTable;
use drv_bootbank_api::{
    BankError, BootChainId, PartitionRef, PartitionStore, StorageError,
};
use ringbuf::{ringbuf, ringbuf_entry};
use zerocopy::IntoBytes;

/// What happened to one copy during a replicated write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CopyAction {
    Written,
    /// The copy already held the record, so it was left alone.
    AlreadyCurrent,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WriteReport {
    pub sequence: u64,
    pub backup: CopyAction,
    pub primary: CopyAction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RepairOutcome {
    /// Both copies were valid and identical.
    Consistent { sequence: u64 },
    /// The copy in `from` was copied over the one in `to`.
    Restored {
        from: BootChainId,
        to: BootChainId,
        sequence: u64,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum CopyFailure {
    Storage(StorageError),
    Verify,
}

impl From<StorageError> for CopyFailure {
    fn from(e: StorageError) -> Self {
        CopyFailure::Storage(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Unreadable(BootChainId, StorageError),
    Writing { primary: BootChainId, sequence: u64 },
    BackupWritten(BootChainId),
    BackupCurrent(BootChainId),
    BackupFailed(BootChainId, CopyFailure),
    PrimaryWritten(BootChainId),
    PrimaryCurrent(BootChainId),
    /// Backup is good, primary is not: update incomplete, will retry.
    PartialWrite(BootChainId, CopyFailure),
    RepairConsistent(u64),
    RepairCopying { from: BootChainId, to: BootChainId, sequence: u64 },
    RepairFailed(BankError),
    NoValidCopy,
}

ringbuf!(Trace, 32, Trace::None);

pub struct PartitionReplicator {
    table: PartitionTable,
    verify_before_write: bool,
}

impl PartitionReplicator {
    pub fn new(table: PartitionTable, verify_before_write: bool) -> Self {
        Self {
            table,
            verify_before_write,
        }
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// Resolves the copy of `name` that belongs to `chain`.
    pub fn resolve_sibling(
        &self,
        name: &str,
        chain: BootChainId,
    ) -> Result<&PartitionRef, BankError> {
        self.table.resolve_sibling(name, chain)
    }

    ///
    /// Resolves both copies of `name`, primary first, and checks that a
    /// record holding `payload` fits in each. Fails with `NotFound` if a copy
    /// is missing and `BadArgument` if `payload` is too large.
    ///
    pub fn resolve_for_write(
        &self,
        name: &str,
        primary: BootChainId,
        payload: &[u8],
    ) -> Result<(&PartitionRef, &PartitionRef), BankError> {
        let primary_part = self.table.resolve_sibling(name, primary)?;
        let backup_part = self.table.resolve_sibling(name, !primary)?;

        let need = record::record_len(payload.len());
        if u32::try_from(payload.len()).is_err()
            || need > primary_part.size
            || need > backup_part.size
        {
            return Err(BankError::BadArgument);
        }
        Ok((primary_part, backup_part))
    }

    ///
    /// Writes `payload` as a new record to both copies of `name`: first the
    /// copy in `!primary`, then, once that has been read back intact, the copy
    /// in `primary`.
    ///
    /// Fails with `Aborted` if either copy could not be read beforehand, or if
    /// the backup could not be written or verified; the primary has not been
    /// touched. Fails with `PartialWrite` if the backup is good but the
    /// primary is not; a repair pass will finish the job.
    ///
    pub fn write_replicated<S: PartitionStore>(
        &self,
        store: &mut S,
        _claim: &StorageClaim<'_>,
        name: &str,
        primary: BootChainId,
        payload: &[u8],
    ) -> Result<WriteReport, BankError> {
        let store = &mut Retrying(store);
        let (primary_part, backup_part) =
            self.resolve_for_write(name, primary, payload)?;

        // The next sequence number is only known once both copies have been
        // read.
        let mut current = [None, None];
        for (hdr, part) in current.iter_mut().zip([backup_part, primary_part])
        {
            *hdr = read_valid_header(store, part).map_err(|e| {
                ringbuf_entry!(Trace::Unreadable(part.chain, e));
                BankError::Aborted
            })?;
        }
        let newest = current.iter().flatten().map(|h| h.sequence).max();

        let mut header =
            RecordHeader::new(newest.map_or(1, |s| s + 1), payload);
        if self.verify_before_write {
            // Keep the newest record as is if it already holds `payload`,
            // so that rewriting the same table leaves both copies alone.
            for (hdr, part) in current.iter().zip([backup_part, primary_part])
            {
                if let Some(h) = hdr {
                    if Some(h.sequence) == newest
                        && h.payload_len as usize == payload.len()
                        && record::payload_matches(store, part, payload)
                            .unwrap_or(false)
                    {
                        header = *h;
                        break;
                    }
                }
            }
        }

        ringbuf_entry!(Trace::Writing {
            primary,
            sequence: header.sequence
        });

        let backup = match self.write_copy(store, backup_part, &header, payload)
        {
            Ok(action) => action,
            Err(e) => {
                ringbuf_entry!(Trace::BackupFailed(backup_part.chain, e));
                return Err(BankError::Aborted);
            }
        };
        ringbuf_entry!(match backup {
            CopyAction::Written => Trace::BackupWritten(backup_part.chain),
            CopyAction::AlreadyCurrent =>
                Trace::BackupCurrent(backup_part.chain),
        });

        let primary = match self.write_copy(
            store,
            primary_part,
            &header,
            payload,
        ) {
            Ok(action) => action,
            Err(e) => {
                ringbuf_entry!(Trace::PartialWrite(primary_part.chain, e));
                return Err(BankError::PartialWrite);
            }
        };
        ringbuf_entry!(match primary {
            CopyAction::Written => Trace::PrimaryWritten(primary_part.chain),
            CopyAction::AlreadyCurrent =>
                Trace::PrimaryCurrent(primary_part.chain),
        });

        Ok(WriteReport {
            sequence: header.sequence,
            backup,
            primary,
        })
    }

    fn write_copy(
        &self,
        store: &mut impl PartitionStore,
        part: &PartitionRef,
        header: &RecordHeader,
        payload: &[u8],
    ) -> Result<CopyAction, CopyFailure> {
        if self.verify_before_write
            && record::matches(store, part, header, payload).unwrap_or(false)
        {
            return Ok(CopyAction::AlreadyCurrent);
        }

        // Payload first; the header commits the copy.
        store.write_partition(part, RECORD_HEADER_LEN as u64, payload)?;
        store.write_partition(part, 0, header.as_bytes())?;

        if record::matches(store, part, header, payload)? {
            Ok(CopyAction::Written)
        } else {
            Err(CopyFailure::Verify)
        }
    }

    ///
    /// Makes both copies of `name` hold the same valid record.
    ///
    /// If only one copy is valid, or both are but one is newer, the newer
    /// valid copy is copied over the other and checked. Fails with
    /// `NoValidCopy` if neither copy is valid, and with `Diverged` if both are
    /// valid under the same sequence number but hold different records; the
    /// next replicated write settles those.
    ///
    pub fn repair<S: PartitionStore>(
        &self,
        store: &mut S,
        _claim: &StorageClaim<'_>,
        name: &str,
    ) -> Result<RepairOutcome, BankError> {
        let r = self.repair_inner(&mut Retrying(store), name);
        match r {
            Ok(RepairOutcome::Consistent { sequence }) => {
                ringbuf_entry!(Trace::RepairConsistent(sequence))
            }
            Ok(RepairOutcome::Restored { .. }) => (),
            Err(BankError::NoValidCopy) => ringbuf_entry!(Trace::NoValidCopy),
            Err(e) => ringbuf_entry!(Trace::RepairFailed(e)),
        }
        r
    }

    fn repair_inner(
        &self,
        store: &mut impl PartitionStore,
        name: &str,
    ) -> Result<RepairOutcome, BankError> {
        let (a, b) = self.table.resolve_pair(name)?;
        let ha = read_valid_header(store, a)?;
        let hb = read_valid_header(store, b)?;

        let (src, dst, hdr) = match (ha, hb) {
            (None, None) => return Err(BankError::NoValidCopy),
            (Some(x), Some(y)) if x == y => {
                return Ok(RepairOutcome::Consistent {
                    sequence: x.sequence,
                })
            }
            (Some(x), Some(y)) if x.sequence == y.sequence => {
                return Err(BankError::Diverged)
            }
            (Some(x), Some(y)) if y.sequence > x.sequence => (b, a, y),
            (Some(x), _) => (a, b, x),
            (None, Some(y)) => (b, a, y),
        };

        if record::record_len(hdr.payload_len as usize) > dst.size {
            return Err(BankError::OutOfResources);
        }

        ringbuf_entry!(Trace::RepairCopying {
            from: src.chain,
            to: dst.chain,
            sequence: hdr.sequence
        });

        let mut buf = [0u8; CHUNK_SIZE];
        let len = hdr.payload_len as usize;
        let mut offset = 0usize;
        while offset < len {
            let n = usize::min(CHUNK_SIZE, len - offset);
            let at = (RECORD_HEADER_LEN + offset) as u64;
            store.read_partition(src, at, &mut buf[..n])?;
            store.write_partition(dst, at, &buf[..n])?;
            offset += n;
        }
        store.write_partition(dst, 0, hdr.as_bytes())?;

        if read_valid_header(store, dst)? != Some(hdr) {
            return Err(BankError::IoError);
        }

        Ok(RepairOutcome::Restored {
            from: src.chain,
            to: dst.chain,
            sequence: hdr.sequence,
        })
    }
}
