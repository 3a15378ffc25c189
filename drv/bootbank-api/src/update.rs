// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted words used by boot-chain updates.
//!
//! Each of these lives in its own persistent word and is always read and
//! written whole. Blank storage (all zeros or all ones) fails the magic check
//! and reads back as "nothing recorded".

use crate::BootChainId;
use bitfield::bitfield;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

pub const PENDING_MARKER_MAGIC: u16 = 0xB0C5;
pub const ACTIVE_CHAIN_MAGIC: u16 = 0xC4A1;

/// Largest attempt count the pending marker can hold.
pub const MAX_MARKER_ATTEMPTS: u8 = 0xf;

bitfield! {
    /// Packed form of [`PendingMarker`].
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct RawPendingMarker(u32);
    impl Debug;
    pub u16, magic, set_magic: 15, 0;
    pub u8, target, set_target: 17, 16;
    pub u8, previous, set_previous: 19, 18;
    pub u8, attempts, set_attempts: 23, 20;
}

/// A boot-chain switch that has been requested but not yet carried out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PendingMarker {
    /// Chain to make active.
    pub target: BootChainId,
    /// Chain that was active when the request was made.
    pub previous: BootChainId,
    /// Number of times execution of this request has been started.
    pub attempts: u8,
}

impl PendingMarker {
    /// Value written to clear the marker.
    pub const CLEAR: u32 = 0;

    pub fn new(target: BootChainId, previous: BootChainId) -> Self {
        Self {
            target,
            previous,
            attempts: 0,
        }
    }

    pub fn encode(&self) -> u32 {
        let mut raw = RawPendingMarker(0);
        raw.set_magic(PENDING_MARKER_MAGIC);
        raw.set_target(self.target as u8);
        raw.set_previous(self.previous as u8);
        raw.set_attempts(self.attempts.min(MAX_MARKER_ATTEMPTS));
        raw.0
    }

    /// Returns `None` if no update is pending.
    pub fn decode(raw: u32) -> Option<Self> {
        let raw = RawPendingMarker(raw);
        if raw.magic() != PENDING_MARKER_MAGIC {
            return None;
        }
        Some(Self {
            target: BootChainId::from_u8(raw.target())?,
            previous: BootChainId::from_u8(raw.previous())?,
            attempts: raw.attempts(),
        })
    }
}

bitfield! {
    /// Packed form of the active-chain indicator.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct RawActiveChain(u32);
    impl Debug;
    pub u16, magic, set_magic: 15, 0;
    pub u8, chain, set_chain: 17, 16;
}

/// The active boot chain, as persisted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActiveChainWord(pub BootChainId);

impl ActiveChainWord {
    pub fn encode(&self) -> u32 {
        let mut raw = RawActiveChain(0);
        raw.set_magic(ACTIVE_CHAIN_MAGIC);
        raw.set_chain(self.0 as u8);
        raw.0
    }

    /// Decodes the indicator. Storage that has never held one means the
    /// platform is still on chain A.
    pub fn decode(raw: u32) -> Self {
        let raw = RawActiveChain(raw);
        let chain = if raw.magic() == ACTIVE_CHAIN_MAGIC {
            BootChainId::from_u8(raw.chain())
        } else {
            None
        };
        Self(chain.unwrap_or(BootChainId::A))
    }
}

/// Outcome of the most recent boot-chain update request.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum UpdateStatus {
    InProgress = 1,
    Committed,
    CancelledForImageUpdate,
    NoOperationRequired,
    WriteAborted,
    WriteIncomplete,
    MaxAttemptsReached,
    ActiveChainWriteFailed,
}

impl UpdateStatus {
    pub fn encode(self) -> u32 {
        self as u32
    }

    /// Returns `None` if nothing (or nothing recognizable) is recorded.
    pub fn decode(raw: u32) -> Option<Self> {
        Self::from_u32(raw)
    }
}
