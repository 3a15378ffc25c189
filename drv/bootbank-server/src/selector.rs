// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rootfs slot selection.
//!
//! A slot keeps being chosen until its own retry budget runs out; only then
//! do we consider the other slot, and only if the verifier vouches for it and
//! it still has attempts left. When nothing is left we boot recovery. Running
//! out of retries is an expected outcome here, never an error.

use drv_bootbank_api::{
    BootSlot, BootTarget, SlotMask, SlotVerifier, StatusWord,
};
use ringbuf::{ringbuf, ringbuf_entry};

/// Whether the platform has one rootfs copy or two.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotLayout {
    Single,
    Dual,
}

/// Result of one selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    pub target: BootTarget,
    /// Status to persist before handing off to `target`.
    pub status: StatusWord,
    /// Set when this selection moved `current` to the other slot.
    pub switched: bool,
    /// Slots with no retries left, as seen by this selection.
    pub exhausted: SlotMask,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Chose(BootSlot, u8),
    Switched { from: BootSlot, to: BootSlot },
    OtherNotBootable(BootSlot),
    Recovery(SlotMask),
}

ringbuf!(Trace, 16, Trace::None);

pub fn select(
    status: StatusWord,
    layout: SlotLayout,
    verifier: &impl SlotVerifier,
) -> Selection {
    let mut status = status;
    if layout == SlotLayout::Single {
        status.current = BootSlot::A;
    }

    let mut exhausted = SlotMask::empty();
    for slot in [BootSlot::A, BootSlot::B] {
        if status.retry(slot).is_exhausted() {
            exhausted |= slot.mask();
        }
    }

    let cur = status.current;
    let left = status.retry(cur);
    if !left.is_exhausted() {
        status.set_retry(cur, left.decrement());
        ringbuf_entry!(Trace::Chose(cur, status.retry(cur).get()));
        return Selection {
            target: BootTarget::Slot(cur),
            status,
            switched: false,
            exhausted,
        };
    }

    if layout == SlotLayout::Dual {
        let other = !cur;
        if status.retry(other).is_exhausted() {
            // Nothing left to try on either side.
        } else if verifier.is_slot_bootable(other) {
            ringbuf_entry!(Trace::Switched {
                from: cur,
                to: other
            });
            status.current = other;
            return Selection {
                target: BootTarget::Slot(other),
                status,
                switched: true,
                exhausted,
            };
        } else {
            ringbuf_entry!(Trace::OtherNotBootable(other));
        }
    }

    ringbuf_entry!(Trace::Recovery(exhausted));
    Selection {
        target: BootTarget::Recovery,
        status,
        switched: false,
        exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_bootbank_api::RetryCount;
    use proptest::prelude::*;

    struct Verdict(bool);

    impl SlotVerifier for Verdict {
        fn is_slot_bootable(&self, _slot: BootSlot) -> bool {
            self.0
        }
    }

    fn status(current: BootSlot, a: u8, b: u8) -> StatusWord {
        StatusWord {
            current,
            retry_a: RetryCount::saturating(a),
            retry_b: RetryCount::saturating(b),
        }
    }

    fn single(s: StatusWord) -> Selection {
        select(s, SlotLayout::Single, &Verdict(true))
    }

    fn dual(s: StatusWord, bootable: bool) -> Selection {
        select(s, SlotLayout::Dual, &Verdict(bootable))
    }

    #[test]
    fn single_slot_consumes_a() {
        let s = single(status(BootSlot::A, 2, 3));
        assert_eq!(s.target, BootTarget::Slot(BootSlot::A));
        assert_eq!(s.status, status(BootSlot::A, 1, 3));
    }

    #[test]
    fn single_slot_exhausted_is_recovery() {
        let before = status(BootSlot::A, 0, 3);
        let s = single(before);
        assert_eq!(s.target, BootTarget::Recovery);
        assert_eq!(s.status, before);
        assert_eq!(s.exhausted, SlotMask::A);
    }

    #[test]
    fn single_slot_pins_current_to_a() {
        let s = single(status(BootSlot::B, 1, 3));
        assert_eq!(s.target, BootTarget::Slot(BootSlot::A));
        assert_eq!(s.status, status(BootSlot::A, 0, 3));
    }

    #[test]
    fn switches_when_current_is_spent() {
        let s = dual(status(BootSlot::A, 0, 2), true);
        assert_eq!(s.target, BootTarget::Slot(BootSlot::B));
        assert!(s.switched);
        assert_eq!(s.status, status(BootSlot::B, 0, 2));
    }

    #[test]
    fn unbootable_other_means_recovery() {
        let before = status(BootSlot::A, 0, 3);
        let s = dual(before, false);
        assert_eq!(s.target, BootTarget::Recovery);
        assert_eq!(s.status, before);
    }

    #[test]
    fn both_spent_is_recovery() {
        let before = status(BootSlot::B, 0, 0);
        let s = dual(before, true);
        assert_eq!(s.target, BootTarget::Recovery);
        assert_eq!(s.status, before);
        assert_eq!(s.exhausted, SlotMask::A | SlotMask::B);
    }

    #[test]
    fn retries_come_before_switching() {
        // The other slot being fine does not pull us off a slot with budget.
        let s = dual(status(BootSlot::B, 3, 1), true);
        assert_eq!(s.target, BootTarget::Slot(BootSlot::B));
        assert_eq!(s.status, status(BootSlot::B, 3, 0));
    }

    fn any_status() -> impl Strategy<Value = StatusWord> {
        (any::<bool>(), 0u8..=3, 0u8..=3).prop_map(|(b, a, r)| {
            let cur = if b { BootSlot::B } else { BootSlot::A };
            status(cur, a, r)
        })
    }

    proptest! {
        #[test]
        fn choosing_a_slot_costs_exactly_one(
            before in any_status(),
            bootable in any::<bool>(),
        ) {
            let s = select(before, SlotLayout::Dual, &Verdict(bootable));
            if let BootTarget::Slot(slot) = s.target {
                if !s.switched {
                    let mut expect = before;
                    expect.set_retry(slot, before.retry(slot).decrement());
                    prop_assert_eq!(s.status, expect);
                    prop_assert!(!before.retry(slot).is_exhausted());
                }
            }
        }

        #[test]
        fn switching_touches_only_current(
            before in any_status(),
        ) {
            let s = dual(before, true);
            if s.switched {
                prop_assert!(before.retry(before.current).is_exhausted());
                prop_assert_eq!(s.status.current, !before.current);
                prop_assert_eq!(s.status.retry_a, before.retry_a);
                prop_assert_eq!(s.status.retry_b, before.retry_b);
            }
        }

        #[test]
        fn recovery_leaves_status_alone(
            before in any_status(),
            bootable in any::<bool>(),
        ) {
            let s = select(before, SlotLayout::Dual, &Verdict(bootable));
            if s.target == BootTarget::Recovery {
                prop_assert_eq!(s.status, before);
                prop_assert!(before.retry(before.current).is_exhausted());
            }
        }
    }
}
