// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The rootfs status word.
//!
//! A single 32-bit word records which rootfs slot is current and how many
//! boot attempts each slot has left:
//!
//! | bits   | field                      |
//! |--------|----------------------------|
//! | 0..16  | magic, `0xFACE`            |
//! | 16..18 | current slot (0 = A, 1 = B)|
//! | 18..20 | retry count for slot B     |
//! | 20..22 | retry count for slot A     |
//! | 22..32 | reserved, written as zero  |
//!
//! A word whose magic is wrong, or whose current-slot field names neither
//! slot, is not trusted at all and decodes to the first-boot state.

use crate::BootSlot;
use bitfield::bitfield;

pub const STATUS_WORD_MAGIC: u16 = 0xFACE;

bitfield! {
    /// Packed form of [`StatusWord`].
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct RawStatusWord(u32);
    impl Debug;
    pub u16, magic, set_magic: 15, 0;
    pub u8, current_slot, set_current_slot: 17, 16;
    pub u8, retry_b, set_retry_b: 19, 18;
    pub u8, retry_a, set_retry_a: 21, 20;
}

/// Remaining boot attempts for a slot, in `0..=3`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct RetryCount(u8);

impl RetryCount {
    /// Largest count the status word can hold.
    pub const MAX: Self = Self(3);
    pub const ZERO: Self = Self(0);

    pub const fn new(n: u8) -> Option<Self> {
        if n <= Self::MAX.0 {
            Some(Self(n))
        } else {
            None
        }
    }

    /// Builds a count, clamping anything too large to [`RetryCount::MAX`].
    pub const fn saturating(n: u8) -> Self {
        if n <= Self::MAX.0 {
            Self(n)
        } else {
            Self::MAX
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn is_exhausted(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn decrement(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

/// Decoded rootfs status word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusWord {
    pub current: BootSlot,
    pub retry_a: RetryCount,
    pub retry_b: RetryCount,
}

impl StatusWord {
    pub fn retry(&self, slot: BootSlot) -> RetryCount {
        match slot {
            BootSlot::A => self.retry_a,
            BootSlot::B => self.retry_b,
        }
    }

    pub fn set_retry(&mut self, slot: BootSlot, count: RetryCount) {
        match slot {
            BootSlot::A => self.retry_a = count,
            BootSlot::B => self.retry_b = count,
        }
    }

    /// Packs this status into its stored form. Reserved bits are zero.
    pub fn encode(&self) -> u32 {
        let mut raw = RawStatusWord(0);
        raw.set_magic(STATUS_WORD_MAGIC);
        raw.set_current_slot(self.current as u8);
        raw.set_retry_a(self.retry_a.get());
        raw.set_retry_b(self.retry_b.get());
        raw.0
    }
}

/// Decoder for the status word, carrying the platform's retry budget.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusCodec {
    retry_max: RetryCount,
}

impl StatusCodec {
    pub const fn new(retry_max: RetryCount) -> Self {
        Self { retry_max }
    }

    pub const fn retry_max(&self) -> RetryCount {
        self.retry_max
    }

    /// State assumed when nothing trustworthy has been stored yet.
    pub const fn first_boot(&self) -> StatusWord {
        StatusWord {
            current: BootSlot::A,
            retry_a: self.retry_max,
            retry_b: self.retry_max,
        }
    }

    pub fn decode(&self, raw: u32) -> StatusWord {
        let raw = RawStatusWord(raw);
        if raw.magic() != STATUS_WORD_MAGIC {
            return self.first_boot();
        }
        let current = match raw.current_slot() {
            0 => BootSlot::A,
            1 => BootSlot::B,
            _ => return self.first_boot(),
        };
        StatusWord {
            current,
            retry_a: RetryCount(raw.retry_a()),
            retry_b: RetryCount(raw.retry_b()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CODEC: StatusCodec = StatusCodec::new(RetryCount::MAX);

    fn retry_count() -> impl Strategy<Value = RetryCount> {
        (0u8..=3).prop_map(RetryCount)
    }

    fn status_word() -> impl Strategy<Value = StatusWord> {
        (any::<BootSlot>(), retry_count(), retry_count()).prop_map(
            |(current, retry_a, retry_b)| StatusWord {
                current,
                retry_a,
                retry_b,
            },
        )
    }

    #[test]
    fn known_layout() {
        let s = StatusWord {
            current: BootSlot::B,
            retry_a: RetryCount(2),
            retry_b: RetryCount(1),
        };
        assert_eq!(s.encode(), 0x0025_FACE);
        assert_eq!(CODEC.decode(0x0025_FACE), s);
    }

    #[test]
    fn blank_storage_is_first_boot() {
        assert_eq!(CODEC.decode(0), CODEC.first_boot());
        assert_eq!(CODEC.decode(u32::MAX), CODEC.first_boot());
    }

    #[test]
    fn first_boot_uses_configured_budget() {
        let codec = StatusCodec::new(RetryCount::saturating(2));
        let s = codec.decode(0xdead_beef);
        assert_eq!(s.current, BootSlot::A);
        assert_eq!(s.retry_a.get(), 2);
        assert_eq!(s.retry_b.get(), 2);
    }

    #[test]
    fn bad_slot_field_is_untrusted() {
        // Good magic, slot field = 2, nonzero retries.
        assert_eq!(CODEC.decode(0x0012_FACE), CODEC.first_boot());
        assert_eq!(CODEC.decode(0x0003_FACE), CODEC.first_boot());
    }

    #[test]
    fn retry_count_bounds() {
        assert_eq!(RetryCount::new(4), None);
        assert_eq!(RetryCount::saturating(9), RetryCount::MAX);
        assert_eq!(RetryCount::ZERO.decrement(), RetryCount::ZERO);
        assert_eq!(RetryCount::MAX.decrement().get(), 2);
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(s in status_word()) {
            let raw = s.encode();
            prop_assert_eq!(raw & 0xffff, u32::from(STATUS_WORD_MAGIC));
            prop_assert_eq!(raw >> 22, 0);
            prop_assert_eq!(CODEC.decode(raw), s);
        }

        #[test]
        fn wrong_magic_always_defaults(raw in any::<u32>()) {
            prop_assume!(raw & 0xffff != u32::from(STATUS_WORD_MAGIC));
            prop_assert_eq!(CODEC.decode(raw), CODEC.first_boot());
        }

        #[test]
        fn reserved_bits_are_ignored(
            s in status_word(),
            junk in 0u32..(1 << 10),
        ) {
            let raw = s.encode() | (junk << 22);
            prop_assert_eq!(CODEC.decode(raw), s);
        }
    }
}
