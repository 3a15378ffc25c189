// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partition references and chain-qualified partition names.
//!
//! A partition belongs to a boot chain by name. The usual form is a suffix,
//! `<base>_a` or `<base>_b`; some platforms use a prefix, `A_<base>` or
//! `B_<base>`, and those are understood as well. Names this crate builds
//! always use the suffix form.

use crate::{BankError, BootChainId};

/// Longest partition name we handle, matching the GPT name field.
pub const MAX_PARTITION_NAME_LEN: usize = 36;

pub type PartitionName = heapless::String<MAX_PARTITION_NAME_LEN>;

/// A partition on block storage that belongs to one boot chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionRef {
    pub name: PartitionName,
    pub base_offset: u64,
    pub size: u64,
    pub erase_block_size: u32,
    pub chain: BootChainId,
}

impl PartitionRef {
    /// Builds a reference, working out the chain from `name`.
    pub fn new(
        name: &str,
        base_offset: u64,
        size: u64,
        erase_block_size: u32,
    ) -> Result<Self, BankError> {
        let (_, chain) = split_chain(name).ok_or(BankError::BadArgument)?;
        let mut n = PartitionName::new();
        n.push_str(name).map_err(|_| BankError::BadArgument)?;
        Ok(Self {
            name: n,
            base_offset,
            size,
            erase_block_size,
            chain,
        })
    }

    /// The name with its chain marker removed.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }
}

/// Splits a chain-qualified name into its base name and chain.
///
/// Returns `None` if `name` carries no chain marker, or if removing the
/// marker would leave nothing behind.
pub fn split_chain(name: &str) -> Option<(&str, BootChainId)> {
    let suffixed = [("_a", BootChainId::A), ("_b", BootChainId::B)]
        .into_iter()
        .find_map(|(s, c)| name.strip_suffix(s).map(|b| (b, c)));
    let prefixed = || {
        [("A_", BootChainId::A), ("B_", BootChainId::B)]
            .into_iter()
            .find_map(|(p, c)| name.strip_prefix(p).map(|b| (b, c)))
    };
    suffixed
        .or_else(prefixed)
        .filter(|(base, _)| !base.is_empty())
}

/// Strips the chain marker from `name`, if it has one.
pub fn base_name(name: &str) -> &str {
    split_chain(name).map(|(base, _)| base).unwrap_or(name)
}

/// Builds the name of `base`'s copy in `chain`.
pub fn chain_name(
    base: &str,
    chain: BootChainId,
) -> Result<PartitionName, BankError> {
    let mut n = PartitionName::new();
    n.push_str(base).map_err(|_| BankError::BadArgument)?;
    n.push_str(chain.suffix()).map_err(|_| BankError::BadArgument)?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_names() {
        assert_eq!(split_chain("BCT_a"), Some(("BCT", BootChainId::A)));
        assert_eq!(split_chain("APP_b"), Some(("APP", BootChainId::B)));
        assert_eq!(
            split_chain("kernel-dtb_b"),
            Some(("kernel-dtb", BootChainId::B))
        );
    }

    #[test]
    fn prefix_names() {
        assert_eq!(
            split_chain("A_cpu-bootloader"),
            Some(("cpu-bootloader", BootChainId::A))
        );
        assert_eq!(split_chain("B_mb1"), Some(("mb1", BootChainId::B)));
    }

    #[test]
    fn unmarked_names() {
        assert_eq!(split_chain("UDA"), None);
        assert_eq!(split_chain("_a"), None);
        assert_eq!(split_chain("A_"), None);
        assert_eq!(base_name("UDA"), "UDA");
        assert_eq!(base_name("A_mb2"), "mb2");
    }

    #[test]
    fn builds_suffix_form() {
        assert_eq!(
            chain_name("BCT", BootChainId::B).unwrap().as_str(),
            "BCT_b"
        );
        let long = "x".repeat(MAX_PARTITION_NAME_LEN - 1);
        assert_eq!(
            chain_name(&long, BootChainId::A),
            Err(BankError::BadArgument)
        );
    }

    #[test]
    fn partition_ref_needs_a_chain() {
        let p = PartitionRef::new("A_mb1", 0x1000, 0x4000, 0x1000).unwrap();
        assert_eq!(p.chain, BootChainId::A);
        assert_eq!(p.base_name(), "mb1");
        assert_eq!(
            PartitionRef::new("UDA", 0, 0x1000, 0x1000),
            Err(BankError::BadArgument)
        );
    }
}
