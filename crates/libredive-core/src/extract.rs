//! Dive boundary extraction
//!
//! Device memory holds dives back to back: each starts with an all-zero
//! marker, carries its recency timestamp at a fixed header offset, and ends
//! with an all-ones marker. [`extract_dives`] scans a raw dump backward so
//! dives come out newest first, stopping early at the incremental-download
//! cutoff. Ring-buffer-addressed profile memory goes through
//! [`linearize_ring`] first; the scan itself is unchanged.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::device::DiveCallback;
use crate::error::{Error, Result};

/// Per-family constants describing how dives sit in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiveLayout {
    /// Length of the all-zero start marker.
    pub start_marker: usize,
    /// Length of the all-ones stop marker.
    pub stop_marker: usize,
    /// Header bytes to skip before searching for the stop marker, so the
    /// search never matches inside the fixed header itself.
    pub header_skip: usize,
    /// Offset of the little-endian 32-bit recency timestamp, relative to
    /// the start marker.
    pub fingerprint_offset: usize,
    /// Length of the fingerprint slice.
    pub fingerprint_size: usize,
}

impl DiveLayout {
    fn validate(&self) -> Result<()> {
        if self.start_marker == 0 || self.stop_marker == 0 {
            return Err(Error::InvalidArgs("markers must be non-empty"));
        }
        if self.fingerprint_offset + self.fingerprint_size > self.header_skip {
            return Err(Error::InvalidArgs("fingerprint outside the header region"));
        }
        if self.fingerprint_size != 4 {
            return Err(Error::InvalidArgs("fingerprint must be a 32-bit timestamp"));
        }
        Ok(())
    }
}

/// Decode the recency timestamp of a dive that starts at the beginning of
/// `dive`.
pub fn recency(layout: &DiveLayout, dive: &[u8]) -> u32 {
    LittleEndian::read_u32(&dive[layout.fingerprint_offset..layout.fingerprint_offset + 4])
}

/// Scan a raw dump for dives, newest to oldest.
///
/// Invokes `callback` once per dive with the full dive bytes (start marker
/// through stop marker inclusive) and the fingerprint slice. The scan ends
/// successfully when the buffer start is reached, when a dive at or below
/// the `cutoff` recency is found (that dive and everything older is
/// skipped), or when the callback returns `false`. A start marker without a
/// matching stop marker in its window is a [`Error::DataFormat`] failure
/// that aborts the whole extraction.
pub fn extract_dives(
    data: &[u8],
    layout: &DiveLayout,
    cutoff: Option<u32>,
    callback: &mut DiveCallback<'_>,
) -> Result<()> {
    layout.validate()?;

    // Walk backward; `previous` bounds the stop-marker search to the start
    // of the dive found before this one.
    let mut previous = data.len();
    let mut current = data.len().saturating_sub(layout.start_marker);
    while current > 0 {
        current -= 1;
        if !data[current..current + layout.start_marker]
            .iter()
            .all(|&byte| byte == 0x00)
        {
            continue;
        }

        // Search forward for the stop marker, past the fixed header.
        let mut offset = current + layout.header_skip;
        let mut found = false;
        while offset + layout.stop_marker <= previous {
            if data[offset..offset + layout.stop_marker]
                .iter()
                .all(|&byte| byte == 0xFF)
            {
                found = true;
                break;
            }
            offset += 1;
        }
        if !found {
            warn!(position = current, "dive without a stop marker");
            return Err(Error::DataFormat("dive without a stop marker"));
        }

        let dive = &data[current..offset + layout.stop_marker];
        let fingerprint =
            &dive[layout.fingerprint_offset..layout.fingerprint_offset + layout.fingerprint_size];

        // Anything at or below the cutoff has been downloaded before, and
        // every dive scanned after this one is even older.
        let timestamp = recency(layout, dive);
        if let Some(cutoff) = cutoff {
            if timestamp <= cutoff {
                debug!(timestamp, cutoff, "reached fingerprint cutoff");
                return Ok(());
            }
        }

        if !callback(dive, fingerprint) {
            return Ok(());
        }

        // Continue strictly before this dive, skipping far enough back that
        // the consumed header cannot match again.
        previous = current;
        current = current.saturating_sub(layout.start_marker);
    }

    Ok(())
}

/// Flatten a circular profile region into chronological order.
///
/// `begin..end` bounds the ring inside the memory image and `head` is the
/// next write position: the oldest byte lives at `head` and the newest just
/// before it. The returned buffer ends with the newest data, ready for the
/// backward scan of [`extract_dives`].
pub fn linearize_ring(memory: &[u8], begin: usize, end: usize, head: usize) -> Result<Vec<u8>> {
    if begin >= end || end > memory.len() {
        return Err(Error::InvalidArgs("ring bounds outside the memory image"));
    }
    if head < begin || head > end {
        return Err(Error::DataFormat("ring head pointer outside the ring"));
    }

    let mut linear = Vec::with_capacity(end - begin);
    linear.extend_from_slice(&memory[head..end]);
    linear.extend_from_slice(&memory[begin..head]);
    Ok(linear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LAYOUT: DiveLayout = DiveLayout {
        start_marker: 4,
        stop_marker: 2,
        header_skip: 10,
        fingerprint_offset: 6,
        fingerprint_size: 4,
    };

    // One dive: start marker, 2 spare header bytes, LE timestamp, profile
    // bytes, stop marker.
    fn dive(timestamp: u32, profile: &[u8]) -> Vec<u8> {
        let mut data = vec![0x00; 4];
        data.extend_from_slice(&[0x05, 0x00]);
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(profile);
        data.extend_from_slice(&[0xFF, 0xFF]);
        data
    }

    fn collect(data: &[u8], cutoff: Option<u32>) -> Vec<(Vec<u8>, u32)> {
        let mut dives = Vec::new();
        let mut cb = |d: &[u8], fp: &[u8]| {
            dives.push((d.to_vec(), u32::from_le_bytes(fp.try_into().unwrap())));
            true
        };
        extract_dives(data, &LAYOUT, cutoff, &mut cb).unwrap();
        dives
    }

    #[test]
    fn test_single_dive_with_zero_cutoff() {
        // Concrete layout: [4 zero bytes][6 bytes][LE timestamp][data][FF FF]
        let data = dive(0x11223344, &[0x10, 0x20, 0x30]);
        let dives = collect(&data, Some(0));

        assert_eq!(dives.len(), 1);
        assert_eq!(dives[0].0, data);
        assert_eq!(dives[0].1, 0x11223344);
    }

    #[test]
    fn test_newest_first_and_disjoint() {
        let mut data = dive(100, &[1, 2, 3, 4]);
        let second = dive(200, &[5, 6]);
        let third = dive(300, &[7, 8, 9]);
        data.extend_from_slice(&second);
        data.extend_from_slice(&third);

        let dives = collect(&data, None);
        assert_eq!(dives.len(), 3);
        // Strictly decreasing recency, newest first.
        assert_eq!(
            dives.iter().map(|(_, ts)| *ts).collect::<Vec<_>>(),
            vec![300, 200, 100]
        );
        // Ranges are disjoint and cover distinct regions.
        let total: usize = dives.iter().map(|(d, _)| d.len()).sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let mut data = dive(10, &[1]);
        data.extend_from_slice(&dive(20, &[2, 3]));

        let first = collect(&data, Some(5));
        let second = collect(&data, Some(5));
        assert_eq!(first, second);
    }

    #[test]
    fn test_cutoff_stops_at_older_dives() {
        let mut data = dive(100, &[1]);
        data.extend_from_slice(&dive(200, &[2]));
        data.extend_from_slice(&dive(300, &[3]));

        // Cutoff equal to the middle dive: only the newest is reported.
        let dives = collect(&data, Some(200));
        assert_eq!(dives.len(), 1);
        assert_eq!(dives[0].1, 300);
    }

    #[test]
    fn test_callback_stop_is_success() {
        let mut data = dive(100, &[1]);
        data.extend_from_slice(&dive(200, &[2]));
        data.extend_from_slice(&dive(300, &[3]));

        let mut count = 0;
        let mut cb = |_: &[u8], _: &[u8]| {
            count += 1;
            count < 2
        };
        extract_dives(&data, &LAYOUT, None, &mut cb).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_missing_stop_marker_is_dataformat() {
        let mut data = vec![0x00; 4];
        data.extend_from_slice(&[0x05, 0x00]);
        data.extend_from_slice(&42u32.to_le_bytes());
        data.extend_from_slice(&[0x10, 0x20, 0x30]); // no FF FF terminator

        let mut cb = |_: &[u8], _: &[u8]| true;
        let result = extract_dives(&data, &LAYOUT, None, &mut cb);
        assert!(matches!(result, Err(Error::DataFormat(_))));
    }

    #[test]
    fn test_empty_and_markerless_dumps_are_success() {
        let mut cb = |_: &[u8], _: &[u8]| panic!("no dive expected");
        extract_dives(&[], &LAYOUT, None, &mut cb).unwrap();
        extract_dives(&[0x12, 0x34, 0x56, 0x78, 0x9A], &LAYOUT, None, &mut cb).unwrap();
    }

    #[test]
    fn test_linearize_ring_rotates() {
        // Memory [A B C D E F] with ring 1..5 and head 3: oldest at 3.
        let memory = [0xA0, 0xB0, 0xC0, 0xD0, 0xE0, 0xF0];
        let linear = linearize_ring(&memory, 1, 5, 3).unwrap();
        assert_eq!(linear, vec![0xD0, 0xE0, 0xB0, 0xC0]);
    }

    #[test]
    fn test_linearize_ring_rejects_bad_head() {
        let memory = [0u8; 8];
        assert!(matches!(
            linearize_ring(&memory, 2, 6, 7),
            Err(Error::DataFormat(_))
        ));
        assert!(matches!(
            linearize_ring(&memory, 2, 6, 1),
            Err(Error::DataFormat(_))
        ));
    }

    #[test]
    fn test_linearize_ring_rejects_bad_bounds() {
        let memory = [0u8; 8];
        assert!(matches!(
            linearize_ring(&memory, 4, 12, 5),
            Err(Error::InvalidArgs(_))
        ));
    }
}
