// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use drv_bootbank_api::{BootSlot, RetryCount, StatusWord};
use drv_bootbank_server::{BankConfig, BootBank, StorageArbiter};
use drv_mock_bootbank::{MockFlash, MockImageUpdates, MockVerifier, MockWords};

pub const STATUS: u32 = 0x100;
pub const MARKER: u32 = 0x104;
pub const ACTIVE: u32 = 0x108;
pub const UPDATE_STATUS: u32 = 0x10c;

pub const TEST_CONFIG: BankConfig = BankConfig {
    status_word_addr: STATUS,
    pending_marker_addr: MARKER,
    active_chain_addr: ACTIVE,
    update_status_addr: UPDATE_STATUS,
    retry_max: RetryCount::MAX,
    max_update_attempts: 3,
    rootfs_partition: "APP",
    boot_config_partition: "BCT",
    verify_before_write: true,
};

pub type Bank<'a> =
    BootBank<'a, MockWords, MockFlash, MockVerifier, MockImageUpdates>;

pub type Parts = (MockWords, MockFlash, MockVerifier, MockImageUpdates);

pub fn parts(flash: MockFlash) -> Parts {
    (
        MockWords::new(),
        flash,
        MockVerifier::all(),
        MockImageUpdates::new(),
    )
}

pub fn boot(arbiter: &StorageArbiter, parts: Parts) -> Bank<'_> {
    boot_with(TEST_CONFIG, arbiter, parts)
}

pub fn boot_with(
    config: BankConfig,
    arbiter: &StorageArbiter,
    (words, flash, verifier, images): Parts,
) -> Bank<'_> {
    BootBank::new(config, arbiter, words, flash, verifier, images).unwrap()
}

/// Power-cycles the storage and brings the driver back up over it.
pub fn reboot<'a>(arbiter: &'a StorageArbiter, bank: Bank<'_>) -> Bank<'a> {
    let (mut words, mut flash, verifier, images) = bank.into_parts();
    words.faults_mut().power_cycle();
    flash.faults_mut().power_cycle();
    boot(arbiter, (words, flash, verifier, images))
}

pub fn status(current: BootSlot, a: u8, b: u8) -> StatusWord {
    StatusWord {
        current,
        retry_a: RetryCount::new(a).unwrap(),
        retry_b: RetryCount::new(b).unwrap(),
    }
}

/// A boot-configuration table whose bytes depend on `tag`.
pub fn table(tag: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ tag).collect()
}
