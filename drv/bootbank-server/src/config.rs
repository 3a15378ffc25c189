// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board configuration.
//!
//! [`CONFIG`] is generated at build time from `$BOOTBANK_CONFIG`; tests build
//! their own [`BankConfig`] values.

use drv_bootbank_api::{RetryCount, StatusCodec};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BankConfig {
    /// Address of the rootfs status word.
    pub status_word_addr: u32,
    /// Address of the pending boot-chain update marker.
    pub pending_marker_addr: u32,
    /// Address of the active-chain indicator.
    pub active_chain_addr: u32,
    /// Address of the last update status.
    pub update_status_addr: u32,
    /// Retry budget given to a slot when it is (re)activated.
    pub retry_max: RetryCount,
    /// How many times one update request may be executed before it is
    /// abandoned.
    pub max_update_attempts: u8,
    /// Base name of the rootfs partitions.
    pub rootfs_partition: &'static str,
    /// Base name of the replicated boot-configuration partitions.
    pub boot_config_partition: &'static str,
    /// Leave alone any copy that already holds the record being written.
    pub verify_before_write: bool,
}

impl BankConfig {
    pub fn codec(&self) -> StatusCodec {
        StatusCodec::new(self.retry_max)
    }
}

include!(concat!(env!("OUT_DIR"), "/bootbank_config.rs"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_config_is_sane() {
        assert!(CONFIG.retry_max.get() >= 1);
        assert!(CONFIG.max_update_attempts >= 1);
        assert!(!CONFIG.rootfs_partition.is_empty());
        assert_ne!(CONFIG.status_word_addr, CONFIG.pending_marker_addr);
    }
}
