// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Property-Based Tests (proptest) for awp-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for awp-types using proptest.
//!
//! Covers: global/local frame conversions, recording lattice indices,
//! file offsets.

use awp_types::index::{AxisFrame, FileOffset, GlobalIndex, LocalIndex, RecordIndex};
use proptest::prelude::*;

// ── Axis frames ──────────────────────────────────────────────────────

proptest! {
    /// Every interior cell converts global -> local -> global unchanged.
    #[test]
    fn forward_frame_roundtrip(
        coord in 0usize..8,
        extent in 8usize..64,
        loop_order in 1usize..3,
        offset in 0usize..64,
    ) {
        let first = 2 + 4 * loop_order;
        let padded = extent + 4 + 8 * loop_order;
        let origin = coord * extent;
        let frame = AxisFrame::forward(origin, first, extent, padded);
        let g = GlobalIndex(origin + offset % extent);
        let l = frame.to_local(g).expect("interior cell maps into padded array");
        prop_assert!(l.0 >= first && l.0 < first + extent);
        prop_assert_eq!(frame.to_global(l), Some(g));
        prop_assert!(frame.owns(g));
    }

    /// Depth frame is monotone decreasing and stays inside the padding.
    #[test]
    fn reversed_frame_monotone(nzt in 2usize..64, align in 2usize..40, depth in 0usize..64) {
        let frame = AxisFrame::reversed(nzt + align - 1, nzt, nzt + 2 * align);
        let d = depth % nzt;
        let k = frame.to_local(GlobalIndex(d)).expect("interior depth");
        prop_assert_eq!(k.0, nzt + align - 1 - d);
        prop_assert!(k.0 >= align);
        if d + 1 < nzt {
            let below = frame.to_local(GlobalIndex(d + 1)).expect("interior depth");
            prop_assert_eq!(below.0 + 1, k.0);
        }
        prop_assert_eq!(frame.to_global(LocalIndex(k.0)), Some(GlobalIndex(d)));
    }
}

// ── Recording lattice and file offsets ───────────────────────────────

proptest! {
    #[test]
    fn record_index_roundtrip(begin in 0usize..100, stride in 1usize..9, n in 0usize..50) {
        let g = RecordIndex(n).to_global(begin, stride);
        prop_assert_eq!(RecordIndex::from_global(g, begin, stride), Some(RecordIndex(n)));
        if stride > 1 {
            prop_assert_eq!(RecordIndex::from_global(GlobalIndex(g.0 + 1), begin, stride), None);
        }
    }

    /// Distinct samples never share a byte offset, and offsets stay
    /// inside the file.
    #[test]
    fn file_offsets_unique_and_bounded(
        nx in 1usize..6, ny in 1usize..6, nz in 1usize..4, slots in 1usize..3,
    ) {
        let mut seen = std::collections::HashSet::new();
        let total = (nx * ny * nz * slots * 4) as u64;
        for s in 0..slots {
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let off = FileOffset::of_sample(
                            [RecordIndex(x), RecordIndex(y), RecordIndex(z)], s, [nx, ny, nz]);
                        prop_assert!(off.bytes() < total);
                        prop_assert!(seen.insert(off.bytes()));
                    }
                }
            }
        }
    }
}
