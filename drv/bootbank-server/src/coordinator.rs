// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-chain update protocol.
//!
//! A switch of the active boot chain is requested ([`request`]), which arms
//! the pending marker, and later carried out ([`execute`]), which replicates
//! the new boot-configuration table and only then flips the active-chain
//! indicator. Until the indicator is written the platform keeps booting the
//! chain it was on. A failed execution leaves the marker armed so the next
//! boot can try again, up to a configured number of attempts.
//!
//! Arming an update and accepting a firmware image update are mutually
//! exclusive: a request is refused while an image update is in flight, and
//! accepting an image update first cancels any pending request
//! ([`check_and_cancel`]).
//!
//! [`request`]: BootChainUpdateCoordinator::request
//! [`execute`]: BootChainUpdateCoordinator::execute
//! [`check_and_cancel`]: BootChainUpdateCoordinator::check_and_cancel

use crate::claim::{Claimant, StorageArbiter};
use crate::config::BankConfig;
use crate::replicator::{PartitionReplicator, WriteReport};
use crate::retry::Retrying;
use drv_bootbank_api::{
    ActiveChainWord, BankError, BootChainId, ImageUpdateMonitor,
    PartitionStore, PendingMarker, PersistentWords, UpdateStatus,
};
use ringbuf::{ringbuf, ringbuf_entry};

/// Where the current (or most recent) update request stands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateState {
    Idle,
    Armed(BootChainId),
    Executing(BootChainId),
    Committed(BootChainId),
    Cancelled,
    /// The last attempt failed; the request is still armed.
    Failed(BootChainId),
    /// The request ran out of attempts and was dropped.
    Abandoned(BootChainId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    Committed(WriteReport),
    /// The requested chain was already active.
    NoOperationRequired,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Armed {
        target: BootChainId,
        previous: BootChainId,
    },
    ImageUpdateInFlight,
    StorageBusy(Claimant),
    Cancelled(BootChainId),
    NothingPending,
    NoOp(BootChainId),
    Rejected(BootChainId, BankError),
    AttemptsExhausted(BootChainId, u8),
    Executing {
        target: BootChainId,
        attempt: u8,
    },
    Failed(BootChainId, BankError),
    ActiveChainWriteFailed(BootChainId),
    Committed(BootChainId),
    MarkerClearFailed,
    StatusWriteFailed(UpdateStatus),
}

ringbuf!(Trace, 32, Trace::None);

pub struct BootChainUpdateCoordinator {
    pending_marker_addr: u32,
    active_chain_addr: u32,
    update_status_addr: u32,
    max_attempts: u8,
    boot_config_partition: &'static str,
    state: UpdateState,
}

impl BootChainUpdateCoordinator {
    /// Picks up where the last boot left off: an armed marker means the
    /// coordinator starts out `Armed`.
    pub fn new(config: &BankConfig, words: &impl PersistentWords) -> Self {
        let mut out = Self {
            pending_marker_addr: config.pending_marker_addr,
            active_chain_addr: config.active_chain_addr,
            update_status_addr: config.update_status_addr,
            max_attempts: config.max_update_attempts,
            boot_config_partition: config.boot_config_partition,
            state: UpdateState::Idle,
        };
        if let Some(m) = out.pending(words) {
            out.state = UpdateState::Armed(m.target);
        }
        out
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn active_chain(&self, words: &impl PersistentWords) -> BootChainId {
        ActiveChainWord::decode(words.read_word(self.active_chain_addr)).0
    }

    pub fn pending(
        &self,
        words: &impl PersistentWords,
    ) -> Option<PendingMarker> {
        PendingMarker::decode(words.read_word(self.pending_marker_addr))
    }

    pub fn last_status(
        &self,
        words: &impl PersistentWords,
    ) -> Option<UpdateStatus> {
        UpdateStatus::decode(words.read_word(self.update_status_addr))
    }

    ///
    /// Cancels a pending update, if there is one, ahead of accepting a
    /// firmware image update. Returns `true` if something was cancelled.
    ///
    pub fn check_and_cancel(
        &mut self,
        words: &mut impl PersistentWords,
    ) -> Result<bool, BankError> {
        let Some(marker) = self.pending(&*words) else {
            self.state = UpdateState::Idle;
            return Ok(false);
        };

        Retrying(words)
            .write_word(self.pending_marker_addr, PendingMarker::CLEAR)?;
        self.record_status(words, UpdateStatus::CancelledForImageUpdate);
        ringbuf_entry!(Trace::Cancelled(marker.target));
        self.state = UpdateState::Cancelled;
        Ok(true)
    }

    ///
    /// Arms a switch to `chain` at the next execution.
    ///
    /// Fails with `Conflict`, without touching the marker, if a firmware
    /// image update is in flight or anyone holds configuration storage.
    ///
    pub fn request(
        &mut self,
        words: &mut impl PersistentWords,
        images: &impl ImageUpdateMonitor,
        arbiter: &StorageArbiter,
        chain: BootChainId,
    ) -> Result<(), BankError> {
        if images.is_update_in_flight() {
            ringbuf_entry!(Trace::ImageUpdateInFlight);
            return Err(BankError::Conflict);
        }
        if let Some(holder) = arbiter.holder() {
            ringbuf_entry!(Trace::StorageBusy(holder));
            return Err(BankError::Conflict);
        }

        let previous = self.active_chain(&*words);
        let marker = PendingMarker::new(chain, previous);
        Retrying(words).write_word(self.pending_marker_addr, marker.encode())?;
        self.record_status(words, UpdateStatus::InProgress);

        ringbuf_entry!(Trace::Armed {
            target: chain,
            previous
        });
        self.state = UpdateState::Armed(chain);
        Ok(())
    }

    ///
    /// Carries out the armed update: replicates `table` into the target
    /// chain's boot-configuration partition (backup copy first), then makes
    /// the target chain active and clears the marker.
    ///
    /// A `table` that does not fit the partition pair, or a pair that does
    /// not exist, is refused before anything is written; the attempt count,
    /// the recorded status and the state are left alone.
    ///
    pub fn execute<W, S>(
        &mut self,
        words: &mut W,
        store: &mut S,
        images: &impl ImageUpdateMonitor,
        arbiter: &StorageArbiter,
        replicator: &PartitionReplicator,
        table: &[u8],
    ) -> Result<UpdateOutcome, BankError>
    where
        W: PersistentWords,
        S: PartitionStore,
    {
        let Some(mut marker) = self.pending(&*words) else {
            ringbuf_entry!(Trace::NothingPending);
            return Err(BankError::BadArgument);
        };
        let target = marker.target;

        if images.is_update_in_flight() {
            ringbuf_entry!(Trace::ImageUpdateInFlight);
            return Err(BankError::Conflict);
        }
        let claim = arbiter.claim(Claimant::BootChainUpdate).map_err(|who| {
            ringbuf_entry!(Trace::StorageBusy(who));
            BankError::Conflict
        })?;

        if target == self.active_chain(&*words) {
            Retrying(words)
                .write_word(self.pending_marker_addr, PendingMarker::CLEAR)?;
            self.record_status(words, UpdateStatus::NoOperationRequired);
            ringbuf_entry!(Trace::NoOp(target));
            self.state = UpdateState::Idle;
            return Ok(UpdateOutcome::NoOperationRequired);
        }

        // A table that cannot be stored leaves the request as it was.
        if let Err(e) = replicator.resolve_for_write(
            self.boot_config_partition,
            target,
            table,
        ) {
            ringbuf_entry!(Trace::Rejected(target, e));
            return Err(e);
        }

        if marker.attempts >= self.max_attempts {
            ringbuf_entry!(Trace::AttemptsExhausted(target, marker.attempts));
            Retrying(words)
                .write_word(self.pending_marker_addr, PendingMarker::CLEAR)?;
            self.record_status(words, UpdateStatus::MaxAttemptsReached);
            self.state = UpdateState::Abandoned(target);
            return Err(BankError::Aborted);
        }

        marker.attempts += 1;
        if let Err(e) = Retrying(words)
            .write_word(self.pending_marker_addr, marker.encode())
        {
            self.state = UpdateState::Failed(target);
            return Err(e.into());
        }

        ringbuf_entry!(Trace::Executing {
            target,
            attempt: marker.attempts
        });
        self.state = UpdateState::Executing(target);

        let report = match replicator.write_replicated(
            store,
            &claim,
            self.boot_config_partition,
            target,
            table,
        ) {
            Ok(report) => report,
            Err(e) => {
                ringbuf_entry!(Trace::Failed(target, e));
                let status = match e {
                    BankError::PartialWrite => UpdateStatus::WriteIncomplete,
                    _ => UpdateStatus::WriteAborted,
                };
                self.record_status(words, status);
                self.state = UpdateState::Failed(target);
                return Err(e);
            }
        };

        // The table is durably in place on both sides; only now does the
        // platform get pointed at it.
        if let Err(e) = Retrying(words).write_word(
            self.active_chain_addr,
            ActiveChainWord(target).encode(),
        ) {
            ringbuf_entry!(Trace::ActiveChainWriteFailed(target));
            self.record_status(words, UpdateStatus::ActiveChainWriteFailed);
            self.state = UpdateState::Failed(target);
            return Err(e.into());
        }

        // If this fails, the next execution finds the target already active
        // and clears the marker then.
        if Retrying(words)
            .write_word(self.pending_marker_addr, PendingMarker::CLEAR)
            .is_err()
        {
            ringbuf_entry!(Trace::MarkerClearFailed);
        }
        self.record_status(words, UpdateStatus::Committed);

        ringbuf_entry!(Trace::Committed(target));
        self.state = UpdateState::Committed(target);
        Ok(UpdateOutcome::Committed(report))
    }

    /// Records `status` for [`last_status`](Self::last_status). This is
    /// bookkeeping only, so a failure is traced and otherwise ignored.
    fn record_status(
        &self,
        words: &mut impl PersistentWords,
        status: UpdateStatus,
    ) {
        if Retrying(words)
            .write_word(self.update_status_addr, status.encode())
            .is_err()
        {
            ringbuf_entry!(Trace::StatusWriteFailed(status));
        }
    }
}
