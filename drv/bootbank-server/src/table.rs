// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sibling lookup for chain-replicated partitions.
//!
//! The platform's partition table is read once at startup into a fixed-size
//! table keyed by `(base name, chain)`. Entries never move once inserted, so
//! a reference handed out stays valid for the life of the table.

use drv_bootbank_api::{
    base_name, split_chain, BankError, BootChainId, PartitionRef,
    PartitionStore,
};

/// Most chain-qualified partitions we track.
pub const MAX_PARTITIONS: usize = 64;

#[derive(Clone, Debug, Default)]
pub struct PartitionTable {
    entries: heapless::Vec<PartitionRef, MAX_PARTITIONS>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from everything `store` reports.
    pub fn from_store(store: &impl PartitionStore) -> Result<Self, BankError> {
        let mut table = Self::new();
        for part in
            (0..store.partition_count()).filter_map(|i| store.partition(i))
        {
            table.insert(part)?;
        }
        Ok(table)
    }

    ///
    /// Inserts `part`. Fails with `BadArgument` if the table already holds a
    /// partition with the same base name and chain (say `BCT_a` and `A_BCT`),
    /// and with `OutOfResources` if the table is full.
    ///
    pub fn insert(&mut self, part: PartitionRef) -> Result<(), BankError> {
        if self.get(part.base_name(), part.chain).is_some() {
            return Err(BankError::BadArgument);
        }
        self.entries
            .push(part)
            .map_err(|_| BankError::OutOfResources)
    }

    /// Looks up the copy of `base` that belongs to `chain`.
    pub fn get(&self, base: &str, chain: BootChainId) -> Option<&PartitionRef> {
        self.entries
            .iter()
            .find(|p| p.chain == chain && p.base_name() == base)
    }

    ///
    /// Resolves the copy of partition `name` in `chain`. `name` may be a base
    /// name or the name of either chain's copy.
    ///
    pub fn resolve_sibling(
        &self,
        name: &str,
        chain: BootChainId,
    ) -> Result<&PartitionRef, BankError> {
        self.get(base_name(name), chain).ok_or(BankError::NotFound)
    }

    /// Resolves both copies of `name`, chain A first.
    pub fn resolve_pair(
        &self,
        name: &str,
    ) -> Result<(&PartitionRef, &PartitionRef), BankError> {
        Ok((
            self.resolve_sibling(name, BootChainId::A)?,
            self.resolve_sibling(name, BootChainId::B)?,
        ))
    }

    ///
    /// Returns `true` if partition `name` is in use while `active` boots.
    /// Names without a chain marker belong to both chains; a chain-qualified
    /// name that is not in the table is never active.
    ///
    pub fn is_active(&self, name: &str, active: BootChainId) -> bool {
        match split_chain(name) {
            Some((base, chain)) => {
                chain == active && self.get(base, chain).is_some()
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionRef> {
        self.entries.iter()
    }
}
