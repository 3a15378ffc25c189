// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::io::Write;

/// Board configuration for the boot-bank driver, taken from
/// `$BOOTBANK_CONFIG`.
#[derive(Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct BootBankConfig {
    status_word_addr: u32,
    pending_marker_addr: u32,
    active_chain_addr: u32,
    update_status_addr: u32,
    retry_max: u8,
    max_update_attempts: u8,
    rootfs_partition: String,
    boot_config_partition: String,
    verify_before_write: bool,
}

impl Default for BootBankConfig {
    fn default() -> Self {
        Self {
            status_word_addr: 0x100,
            pending_marker_addr: 0x104,
            active_chain_addr: 0x108,
            update_status_addr: 0x10c,
            retry_max: 3,
            max_update_attempts: 3,
            rootfs_partition: "APP".into(),
            boot_config_partition: "BCT".into(),
            verify_before_write: true,
        }
    }
}

impl BootBankConfig {
    fn check(&self) -> Result<()> {
        if !(1..=3).contains(&self.retry_max) {
            bail!("retry-max must be in 1..=3, got {}", self.retry_max);
        }
        // The pending marker holds the attempt count in four bits.
        if !(1..=15).contains(&self.max_update_attempts) {
            bail!(
                "max-update-attempts must be in 1..=15, got {}",
                self.max_update_attempts
            );
        }
        let addrs = [
            self.status_word_addr,
            self.pending_marker_addr,
            self.active_chain_addr,
            self.update_status_addr,
        ];
        for (i, a) in addrs.iter().enumerate() {
            if addrs[i + 1..].contains(a) {
                bail!("persistent word address {a:#x} is used twice");
            }
        }
        for name in [&self.rootfs_partition, &self.boot_config_partition] {
            // Room for the two-byte chain suffix in a 36-byte name.
            if name.is_empty() || name.len() > 34 || !name.is_ascii() {
                bail!("bad partition base name {name:?}");
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cfg: BootBankConfig = build_util::bootbank_config_or_default()?;
    cfg.check()?;

    let dest_path = build_util::out_dir()?.join("bootbank_config.rs");
    let mut out = std::fs::File::create(&dest_path)?;

    writeln!(
        out,
        r#"pub const CONFIG: BankConfig = BankConfig {{
    status_word_addr: {:#x},
    pending_marker_addr: {:#x},
    active_chain_addr: {:#x},
    update_status_addr: {:#x},
    retry_max: RetryCount::saturating({}),
    max_update_attempts: {},
    rootfs_partition: {:?},
    boot_config_partition: {:?},
    verify_before_write: {},
}};"#,
        cfg.status_word_addr,
        cfg.pending_marker_addr,
        cfg.active_chain_addr,
        cfg.update_status_addr,
        cfg.retry_max,
        cfg.max_update_attempts,
        cfg.rootfs_partition,
        cfg.boot_config_partition,
        cfg.verify_before_write,
    )?;

    Ok(())
}
