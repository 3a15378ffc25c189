// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::*;
use drv_bootbank_api::{
    BankError, BootSlot, BootTarget, SlotMask, StorageError,
};
use drv_bootbank_server::{SlotLayout, StorageArbiter};
use drv_mock_bootbank::{MockFlash, MockVerifier};

#[test]
fn fails_over_after_current_slot_runs_out() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::A, 1, 3).encode());

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.layout, SlotLayout::Dual);
    assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
    assert_eq!(d.status, status(BootSlot::A, 0, 3));
    assert!(d.persisted);
    assert_eq!(bank.words().get(STATUS), status(BootSlot::A, 0, 3).encode());

    // Slot A never confirmed; next boot moves to B without spending B.
    let mut bank = reboot(&arbiter, bank);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::B));
    assert!(d.switched);
    assert_eq!(d.status, status(BootSlot::B, 0, 3));
    assert_eq!(bank.words().get(STATUS), status(BootSlot::B, 0, 3).encode());

    // From here on B's own budget is spent.
    let mut bank = reboot(&arbiter, bank);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::B));
    assert!(!d.switched);
    assert_eq!(d.status, status(BootSlot::B, 0, 2));
}

#[test]
fn blank_status_word_is_first_boot() {
    for blank in [0, u32::MAX] {
        let arbiter = StorageArbiter::new();
        let mut p = parts(MockFlash::dual_slot());
        p.0 = drv_mock_bootbank::MockWords::with_blank(blank);

        let mut bank = boot(&arbiter, p);
        let d = bank.select_boot_target();
        assert_eq!(d.previous, status(BootSlot::A, 3, 3));
        assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
        assert_eq!(
            bank.words().get(STATUS),
            status(BootSlot::A, 2, 3).encode()
        );
    }
}

#[test]
fn exhausted_slots_boot_recovery_without_writing() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    let before = status(BootSlot::B, 0, 0);
    p.0.set(STATUS, before.encode());

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Recovery);
    assert_eq!(d.status, before);
    assert_eq!(d.exhausted, SlotMask::A | SlotMask::B);
    assert!(d.persisted);
    assert_eq!(bank.words().writes(), 0);
}

#[test]
fn unverified_other_slot_means_recovery() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::A, 0, 3).encode());
    p.2 = MockVerifier::none();

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Recovery);
    assert_eq!(d.status, status(BootSlot::A, 0, 3));
    assert_eq!(d.exhausted, SlotMask::A);
}

#[test]
fn other_slot_must_be_vouched_for() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::B, 3, 0).encode());
    p.2 = MockVerifier {
        bootable: SlotMask::A,
    };

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
    assert_eq!(d.status, status(BootSlot::A, 3, 0));
}

#[test]
fn failed_persist_still_boots() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::A, 2, 3).encode());
    p.0.faults_mut().fail_writes(2, StorageError::Io);

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
    assert!(!d.persisted);
    assert_eq!(bank.words().get(STATUS), status(BootSlot::A, 2, 3).encode());
}

#[test]
fn one_failed_persist_is_retried() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::A, 2, 3).encode());
    p.0.faults_mut().fail_writes(1, StorageError::Timeout);

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert!(d.persisted);
    assert_eq!(bank.words().get(STATUS), status(BootSlot::A, 1, 3).encode());
}

#[test]
fn confirming_a_boot_restores_its_budget() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::dual_slot());
    p.0.set(STATUS, status(BootSlot::B, 1, 1).encode());

    let mut bank = boot(&arbiter, p);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::B));
    bank.confirm_boot_success(BootSlot::B).unwrap();
    assert_eq!(bank.words().get(STATUS), status(BootSlot::B, 1, 3).encode());
}

#[test]
fn confirm_write_failure_surfaces() {
    let arbiter = StorageArbiter::new();
    let mut bank = boot(&arbiter, parts(MockFlash::dual_slot()));
    bank.words_mut()
        .faults_mut()
        .fail_writes(2, StorageError::Timeout);
    assert_eq!(
        bank.confirm_boot_success(BootSlot::A),
        Err(BankError::IoError)
    );
}

#[test]
fn single_slot_layout() {
    let arbiter = StorageArbiter::new();
    let mut p = parts(MockFlash::single_slot());
    p.0.set(STATUS, status(BootSlot::B, 1, 3).encode());

    let mut bank = boot(&arbiter, p);
    assert_eq!(bank.slot_layout(), SlotLayout::Single);

    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
    assert_eq!(d.status, status(BootSlot::A, 0, 3));

    let mut bank = reboot(&arbiter, bank);
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Recovery);
    assert_eq!(d.exhausted, SlotMask::A);

    assert_eq!(
        bank.confirm_boot_success(BootSlot::B),
        Err(BankError::BadArgument)
    );
    bank.confirm_boot_success(BootSlot::A).unwrap();
    let d = bank.select_boot_target();
    assert_eq!(d.target, BootTarget::Slot(BootSlot::A));
}
