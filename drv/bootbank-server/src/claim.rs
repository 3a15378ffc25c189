// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exclusive access to configuration storage.
//!
//! Boot-chain updates, firmware-image updates and the repair pass all rewrite
//! the same replicated configuration partitions, so only one of them may be
//! under way at a time. Whoever wants to write takes a [`StorageClaim`] from
//! the one [`StorageArbiter`]; the claim is released when it is dropped.
//! Functions that write replicated data take a `&StorageClaim`, so holding
//! one is the only way to call them.

use spin::Mutex;

/// Who is holding configuration storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Claimant {
    BootChainUpdate,
    ImageUpdate,
    Repair,
}

#[derive(Debug, Default)]
pub struct StorageArbiter {
    current_owner: Mutex<Option<Claimant>>,
}

impl StorageArbiter {
    pub const fn new() -> Self {
        Self {
            current_owner: Mutex::new(None),
        }
    }

    /// Claims storage for `who`.
    ///
    /// On failure, returns whoever holds it now.
    pub fn claim(&self, who: Claimant) -> Result<StorageClaim<'_>, Claimant> {
        let mut owner = self.current_owner.lock();
        match *owner {
            Some(holder) => Err(holder),
            None => {
                *owner = Some(who);
                Ok(StorageClaim {
                    owner: &self.current_owner,
                    who,
                })
            }
        }
    }

    /// Returns the current holder, if any.
    pub fn holder(&self) -> Option<Claimant> {
        *self.current_owner.lock()
    }
}

/// Proof of exclusive access to configuration storage.
#[derive(Debug)]
pub struct StorageClaim<'a> {
    owner: &'a Mutex<Option<Claimant>>,
    who: Claimant,
}

impl StorageClaim<'_> {
    pub fn claimant(&self) -> Claimant {
        self.who
    }
}

impl Drop for StorageClaim<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}
