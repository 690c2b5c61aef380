//! Reconnect coordination for transfers interrupted mid-flight.
//!
//! Resolves the "resume across reconnects" question left open upstream:
//! rather than forcing a failed transfer to restart from zero, a
//! reconnecting receiver reports what it already has via a
//! `received-ranges` control message, and the sender seeds its bookkeeping
//! from that before falling back into its normal hot loop. The wire format
//! needs nothing beyond the `received-ranges`/`file-meta` messages
//! [`crate::codec`] already defines.

use crate::codec::FileMeta;
use crate::ranges::ReceivedRanges;

/// Build the set of chunk indices a sender should skip on reconnect, given
/// the ranges a receiver reported already having.
#[must_use]
pub fn resumed_ranges(meta: &FileMeta, reported: &[(u32, u32)]) -> ReceivedRanges {
    let mut ranges = ReceivedRanges::new(meta.total_chunks);
    ranges.load_from_ranges(reported);
    ranges
}

/// The ordered list of chunk indices still needed after a resume handshake.
#[must_use]
pub fn remaining_chunks(meta: &FileMeta, reported: &[(u32, u32)]) -> Vec<u32> {
    resumed_ranges(meta, reported).missing_chunks()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_already_received_ranges() {
        let meta = FileMeta {
            name: "f.bin".into(),
            size: 10,
            mime_type: "application/octet-stream".into(),
            total_chunks: 10,
            checksum: None,
        };
        let remaining = remaining_chunks(&meta, &[(0, 4)]);
        assert_eq!(remaining, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn empty_report_means_everything_remains() {
        let meta = FileMeta {
            name: "f.bin".into(),
            size: 3,
            mime_type: "application/octet-stream".into(),
            total_chunks: 3,
            checksum: None,
        };
        assert_eq!(remaining_chunks(&meta, &[]), vec![0, 1, 2]);
    }
}
