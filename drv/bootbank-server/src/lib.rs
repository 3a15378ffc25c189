// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dual-bank boot redundancy manager.
//!
//! This driver decides, after every reset, which of two rootfs slots to boot
//! (or whether to fall back to recovery), and carries out crash-safe switches
//! between the two firmware boot chains. Everything it knows survives resets
//! in a handful of persistent words and in chain-replicated partitions; both
//! are reached through the collaborator traits in `drv_bootbank_api`.
//!
//! [`BootBank`] ties the pieces together:
//!
//! - [`selector`] picks the rootfs slot and updates the retry accounting,
//! - [`replicator`] writes and repairs the two copies of a replicated
//!   partition, backup first,
//! - [`coordinator`] runs the boot-chain update protocol,
//! - [`claim`] makes sure only one agent writes configuration storage at a
//!   time.

#![cfg_attr(not(test), no_std)]

pub mod claim;
pub mod config;
pub mod coordinator;
pub mod record;
pub mod replicator;
pub mod retry;
pub mod selector;
pub mod table;

pub use claim::{Claimant, StorageArbiter, StorageClaim};
pub use config::{BankConfig, CONFIG};
pub use coordinator::{BootChainUpdateCoordinator, UpdateOutcome, UpdateState};
pub use replicator::{
    CopyAction, PartitionReplicator, RepairOutcome, WriteReport,
};
pub use selector::SlotLayout;
pub use table::PartitionTable;

use drv_bootbank_api::{
    BankError, BootChainId, BootSlot, BootTarget, ImageUpdateMonitor,
    PartitionStore, PendingMarker, PersistentWords, SlotMask, SlotVerifier,
    StatusWord, StorageError, UpdateStatus,
};
use retry::Retrying;
use ringbuf::{ringbuf, ringbuf_entry};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Partitions(usize),
    Decided {
        target: BootTarget,
        status: u32,
    },
    StatusPersistFailed(StorageError),
    Confirmed(BootSlot),
    ImageUpdateBegun {
        cancelled: bool,
    },
    StartupRepair(Result<RepairOutcome, BankError>),
}

ringbuf!(Trace, 16, Trace::None);

/// Everything decided by one call to [`BootBank::select_boot_target`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootDecision {
    pub target: BootTarget,
    /// Status as read at the start of this boot.
    pub previous: StatusWord,
    /// Status after this boot's accounting.
    pub status: StatusWord,
    pub layout: SlotLayout,
    /// The current slot changed to the other one.
    pub switched: bool,
    /// Slots with no attempts left.
    pub exhausted: SlotMask,
    /// `false` if the new status could not be written. The boot goes ahead
    /// anyway; only this boot's accounting is lost.
    pub persisted: bool,
}

/// The boot-bank driver, over its storage collaborators.
pub struct BootBank<'a, W, S, V, I> {
    config: BankConfig,
    arbiter: &'a StorageArbiter,
    words: W,
    storage: S,
    verifier: V,
    image_updates: I,
    replicator: PartitionReplicator,
    coordinator: BootChainUpdateCoordinator,
}

impl<'a, W, S, V, I> BootBank<'a, W, S, V, I>
where
    W: PersistentWords,
    S: PartitionStore,
    V: SlotVerifier,
    I: ImageUpdateMonitor,
{
    ///
    /// Reads the partition table, picks up any pending update, and runs a
    /// repair pass over the boot-configuration partitions.
    ///
    /// Fails only if the partition table does not fit or names the same
    /// partition twice (`BCT_a` and `A_BCT`, say); a failed repair is
    /// traced and left for [`repair_boot_config`](Self::repair_boot_config).
    ///
    pub fn new(
        config: BankConfig,
        arbiter: &'a StorageArbiter,
        words: W,
        storage: S,
        verifier: V,
        image_updates: I,
    ) -> Result<Self, BankError> {
        let table = PartitionTable::from_store(&storage)?;
        ringbuf_entry!(Trace::Partitions(table.len()));

        let replicator =
            PartitionReplicator::new(table, config.verify_before_write);
        let coordinator = BootChainUpdateCoordinator::new(&config, &words);
        let mut bank = Self {
            config,
            arbiter,
            words,
            storage,
            verifier,
            image_updates,
            replicator,
            coordinator,
        };

        let r = bank.repair_boot_config();
        ringbuf_entry!(Trace::StartupRepair(r));
        Ok(bank)
    }

    /// Whether this platform has a second rootfs slot.
    pub fn slot_layout(&self) -> SlotLayout {
        if self
            .storage
            .partition_exists(self.config.rootfs_partition, BootChainId::B)
        {
            SlotLayout::Dual
        } else {
            SlotLayout::Single
        }
    }

    ///
    /// Decides what to boot and records the retry accounting for this boot.
    ///
    /// Call once per boot. The new status is written before this returns; if
    /// that write fails the decision stands and `persisted` is `false`.
    ///
    pub fn select_boot_target(&mut self) -> BootDecision {
        let addr = self.config.status_word_addr;
        let raw = self.words.read_word(addr);
        let previous = self.config.codec().decode(raw);
        let layout = self.slot_layout();

        let sel = selector::select(previous, layout, &self.verifier);
        let encoded = sel.status.encode();

        let persisted = encoded == raw
            || match Retrying(&mut self.words).write_word(addr, encoded) {
                Ok(()) => true,
                Err(e) => {
                    ringbuf_entry!(Trace::StatusPersistFailed(e));
                    false
                }
            };

        ringbuf_entry!(Trace::Decided {
            target: sel.target,
            status: encoded
        });
        BootDecision {
            target: sel.target,
            previous,
            status: sel.status,
            layout,
            switched: sel.switched,
            exhausted: sel.exhausted,
            persisted,
        }
    }

    ///
    /// Marks `slot` as having booted successfully, restoring its full retry
    /// budget. Fails with `BadArgument` for slot B on a single-slot layout.
    ///
    pub fn confirm_boot_success(
        &mut self,
        slot: BootSlot,
    ) -> Result<(), BankError> {
        if slot == BootSlot::B && self.slot_layout() == SlotLayout::Single {
            return Err(BankError::BadArgument);
        }

        let addr = self.config.status_word_addr;
        let codec = self.config.codec();
        let mut status = codec.decode(self.words.read_word(addr));
        status.set_retry(slot, codec.retry_max());
        Retrying(&mut self.words).write_word(addr, status.encode())?;

        ringbuf_entry!(Trace::Confirmed(slot));
        Ok(())
    }

    /// Cancels a pending boot-chain update. Returns `true` if there was one.
    pub fn check_and_cancel_pending_update(
        &mut self,
    ) -> Result<bool, BankError> {
        self.coordinator.check_and_cancel(&mut self.words)
    }

    ///
    /// Takes configuration storage for a firmware image update, cancelling
    /// any pending boot-chain update first. Boot-chain updates are refused
    /// with `Conflict` until the returned claim is dropped.
    ///
    pub fn begin_image_update(
        &mut self,
    ) -> Result<StorageClaim<'a>, BankError> {
        let claim = self
            .arbiter
            .claim(Claimant::ImageUpdate)
            .map_err(|_| BankError::Conflict)?;
        let cancelled = self.coordinator.check_and_cancel(&mut self.words)?;
        ringbuf_entry!(Trace::ImageUpdateBegun { cancelled });
        Ok(claim)
    }

    /// Arms a switch to boot chain `chain`.
    pub fn request_boot_chain_update(
        &mut self,
        chain: BootChainId,
    ) -> Result<(), BankError> {
        self.coordinator.request(
            &mut self.words,
            &self.image_updates,
            self.arbiter,
            chain,
        )
    }

    /// Carries out the armed switch, installing `table` as the target
    /// chain's boot configuration.
    pub fn execute_boot_chain_update(
        &mut self,
        table: &[u8],
    ) -> Result<UpdateOutcome, BankError> {
        self.coordinator.execute(
            &mut self.words,
            &mut self.storage,
            &self.image_updates,
            self.arbiter,
            &self.replicator,
            table,
        )
    }

    /// Brings both boot-configuration copies back in step.
    pub fn repair_boot_config(&mut self) -> Result<RepairOutcome, BankError> {
        let claim = self
            .arbiter
            .claim(Claimant::Repair)
            .map_err(|_| BankError::Conflict)?;
        self.replicator.repair(
            &mut self.storage,
            &claim,
            self.config.boot_config_partition,
        )
    }

    pub fn active_chain(&self) -> BootChainId {
        self.coordinator.active_chain(&self.words)
    }

    pub fn pending_update(&self) -> Option<PendingMarker> {
        self.coordinator.pending(&self.words)
    }

    pub fn last_update_status(&self) -> Option<UpdateStatus> {
        self.coordinator.last_status(&self.words)
    }

    pub fn update_state(&self) -> UpdateState {
        self.coordinator.state()
    }

    /// Returns `true` if partition `name` is used by the active chain.
    pub fn is_partition_active(&self, name: &str) -> bool {
        self.replicator.table().is_active(name, self.active_chain())
    }

    pub fn partitions(&self) -> &PartitionTable {
        self.replicator.table()
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn words(&self) -> &W {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut W {
        &mut self.words
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn image_updates(&self) -> &I {
        &self.image_updates
    }

    /// Hands the collaborators back, as at a reset.
    pub fn into_parts(self) -> (W, S, V, I) {
        (self.words, self.storage, self.verifier, self.image_updates)
    }
}
