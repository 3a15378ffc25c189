// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash format of a replicated record.
//!
//! Each copy of a replicated artifact starts at offset 0 of its partition with
//! a [`RecordHeader`], immediately followed by the payload. The header carries
//! a sequence number that increases with every write; when both copies are
//! valid, the one with the higher sequence is newer.
//!
//! The payload is written before the header, so a copy interrupted part way
//! through fails its checksum rather than pairing a new header with stale
//! data.

use drv_bootbank_api::{PartitionRef, PartitionStore, StorageError};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const RECORD_MAGIC: u32 = 0xb007_c0f9;
pub const RECORD_HEADER_VERSION: u32 = 1;
pub const RECORD_HEADER_LEN: usize = core::mem::size_of::<RecordHeader>();

/// Bytes moved per read when checking or copying a record.
pub const CHUNK_SIZE: usize = 256;

static_assertions::const_assert_eq!(RECORD_HEADER_LEN, 24);

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct RecordHeader {
    /// Must always be [`RECORD_MAGIC`].
    magic: u32,

    /// Must always be [`RECORD_HEADER_VERSION`] (for now).
    header_version: u32,

    /// Increases by one with every replicated write.
    pub sequence: u64,

    /// Number of payload bytes following the header.
    pub payload_len: u32,

    /// CRC-32 (iSCSI polynomial) over the rest of the header and then the
    /// payload.
    checksum: u32,
}

static CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

impl RecordHeader {
    pub fn new(sequence: u64, payload: &[u8]) -> Self {
        let mut out = Self {
            magic: RECORD_MAGIC,
            header_version: RECORD_HEADER_VERSION,
            sequence,
            payload_len: payload.len() as u32,
            checksum: 0,
        };
        let mut c = out.digest();
        c.update(payload);
        out.checksum = c.finalize();
        out
    }

    /// Starts a checksum over everything in the header except the checksum
    /// itself, which sits at the end.
    fn digest(&self) -> crc::Digest<'static, u32> {
        let mut c = CRC.digest();
        let size = RECORD_HEADER_LEN - core::mem::size_of::<u32>();
        c.update(&self.as_bytes()[..size]);
        c
    }

    /// Checks the fields that can be checked without the payload.
    fn is_plausible(&self, part: &PartitionRef) -> bool {
        self.magic == RECORD_MAGIC
            && self.header_version == RECORD_HEADER_VERSION
            && (self.payload_len as u64)
                <= part.size.saturating_sub(RECORD_HEADER_LEN as u64)
    }
}

/// Smallest partition that can hold a record with `payload_len` bytes.
pub fn record_len(payload_len: usize) -> u64 {
    (RECORD_HEADER_LEN + payload_len) as u64
}

/// Reads and fully validates the record in `part`.
///
/// Returns `Ok(None)` if the partition does not hold a valid record, and an
/// error only if storage could not be read.
pub fn read_valid_header(
    store: &mut impl PartitionStore,
    part: &PartitionRef,
) -> Result<Option<RecordHeader>, StorageError> {
    let mut hdr = RecordHeader::new_zeroed();
    store.read_partition(part, 0, hdr.as_mut_bytes())?;
    if !hdr.is_plausible(part) {
        return Ok(None);
    }

    let mut c = hdr.digest();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut offset = 0usize;
    let len = hdr.payload_len as usize;
    while offset < len {
        let n = usize::min(CHUNK_SIZE, len - offset);
        store.read_partition(
            part,
            (RECORD_HEADER_LEN + offset) as u64,
            &mut buf[..n],
        )?;
        c.update(&buf[..n]);
        offset += n;
    }

    Ok((c.finalize() == hdr.checksum).then_some(hdr))
}

/// Returns `true` if `part` holds exactly `header` followed by `payload`.
pub fn matches(
    store: &mut impl PartitionStore,
    part: &PartitionRef,
    header: &RecordHeader,
    payload: &[u8],
) -> Result<bool, StorageError> {
    let mut hdr = RecordHeader::new_zeroed();
    store.read_partition(part, 0, hdr.as_mut_bytes())?;
    if hdr != *header {
        return Ok(false);
    }
    payload_matches(store, part, payload)
}

/// Returns `true` if the payload area of `part` starts with `payload`.
pub fn payload_matches(
    store: &mut impl PartitionStore,
    part: &PartitionRef,
    payload: &[u8],
) -> Result<bool, StorageError> {
    let mut buf = [0u8; CHUNK_SIZE];
    for (i, want) in payload.chunks(CHUNK_SIZE).enumerate() {
        let got = &mut buf[..want.len()];
        store.read_partition(
            part,
            (RECORD_HEADER_LEN + i * CHUNK_SIZE) as u64,
            got,
        )?;
        if got != want {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_covers_payload() {
        let a = RecordHeader::new(1, b"hello");
        let b = RecordHeader::new(1, b"hellp");
        assert_ne!(a.checksum, b.checksum);
        assert_eq!(a.payload_len, 5);
    }

    #[test]
    fn checksum_covers_sequence() {
        let a = RecordHeader::new(1, b"hello");
        let b = RecordHeader::new(2, b"hello");
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn plausibility() {
        let part = PartitionRef::new("BCT_a", 0, 64, 16).unwrap();
        assert!(RecordHeader::new(7, &[0; 40]).is_plausible(&part));
        assert!(!RecordHeader::new(7, &[0; 41]).is_plausible(&part));

        let mut bad = RecordHeader::new(7, &[]);
        bad.magic = !RECORD_MAGIC;
        assert!(!bad.is_plausible(&part));

        // Erased flash
        let blank = RecordHeader::read_from_bytes(&[0xff; RECORD_HEADER_LEN])
            .unwrap();
        assert!(!blank.is_plausible(&part));
    }
}
