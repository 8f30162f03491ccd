// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Recording Regions
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Intersection of a global strided recording window with one rank.
//!
//! A window is given per axis as 1-based inclusive `[begin, end]` and a
//! stride. Each rank gets local loop bounds (zero-based, relative to its
//! first interior cell), a count per axis and its place in the shared
//! output file, described as a nested hyperslab:
//!
//! ```text
//! run of cx samples
//!   × cy rows     (stride NX)
//!   × cz slabs    (stride NX·NY)
//!   × WRITE_STEP  (stride NX·NY·NZ)
//! ```
//!
//! where NX, NY, NZ are the global recording counts.

use crate::decomp::Subdomain;
use awp_types::config::{AxisRecording, RecordingConfig};
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::{FileOffset, RecordIndex};

/// Recording window along one axis after normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSpec {
    /// 1-based first recorded cell.
    pub begin: usize,
    /// 1-based last recorded cell, on the stride lattice.
    pub end: usize,
    pub stride: usize,
}

impl AxisSpec {
    /// Build a spec the way a run configuration states it: `end = -1`
    /// means the full axis, and `end` is pulled back onto the stride
    /// lattice (`end -= (end - begin) % stride`).
    pub fn normalize(rec: &AxisRecording, n: usize) -> AwpResult<Self> {
        if rec.skip == 0 {
            return Err(AwpError::Recording("Recording stride must be >= 1".to_string()));
        }
        let end = if rec.end == -1 { n as i64 } else { rec.end };
        if rec.begin < 1 || rec.begin > end || end > n as i64 {
            return Err(AwpError::Recording(format!(
                "Recording bounds [{}, {}] outside 1..={n}",
                rec.begin, rec.end
            )));
        }
        let begin = rec.begin as usize;
        let end = end as usize;
        let end = end - (end - begin) % rec.skip;
        AxisSpec::new(begin, end, rec.skip)
    }

    /// Strict constructor: the end bound must already sit on the lattice.
    pub fn new(begin: usize, end: usize, stride: usize) -> AwpResult<Self> {
        if stride == 0 || begin == 0 || end < begin {
            return Err(AwpError::Recording(format!(
                "Invalid recording axis begin={begin} end={end} stride={stride}"
            )));
        }
        if (end - begin) % stride != 0 {
            return Err(AwpError::Recording(format!(
                "Recording end {end} is not on the stride lattice from {begin} (stride {stride})"
            )));
        }
        Ok(AxisSpec { begin, end, stride })
    }

    /// Global number of recorded cells along this axis.
    pub fn count(&self) -> usize {
        (self.end - self.begin) / self.stride + 1
    }
}

/// One rank's share of a recording axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisSlice {
    /// First recorded cell, zero-based from the rank's first interior cell.
    pub local_begin: usize,
    /// Last recorded cell (inclusive), same base.
    pub local_end: usize,
    pub count: usize,
    /// Recorded cells owned by lower-coordinate ranks on this axis.
    pub record_origin: usize,
}

impl AxisSlice {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Local loop positions (zero-based from the first interior cell).
    pub fn positions(&self, stride: usize) -> impl Iterator<Item = usize> {
        let begin = self.local_begin;
        (0..self.count).map(move |n| begin + n * stride)
    }
}

/// Intersect `spec` with a rank whose interior covers global cells
/// `[origin, origin + extent)`.
pub fn map_axis(spec: &AxisSpec, origin: usize, extent: usize) -> AxisSlice {
    let b0 = spec.begin - 1;
    let e0 = spec.end - 1;
    let last_local = origin + extent - 1;
    if b0 > last_local || e0 < origin {
        return AxisSlice::default();
    }
    let (first, record_origin) = if origin > b0 {
        let skipped = (origin - b0).div_ceil(spec.stride);
        (b0 + skipped * spec.stride, skipped)
    } else {
        (b0, 0)
    };
    let clip = e0.min(last_local);
    if first > clip {
        return AxisSlice::default();
    }
    let last = clip - (clip - b0) % spec.stride;
    AxisSlice {
        local_begin: first - origin,
        local_end: last - origin,
        count: (last - first) / spec.stride + 1,
        record_origin,
    }
}

/// Recording window of one rank on all three axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRegion {
    pub specs: [AxisSpec; 3],
    pub axes: [AxisSlice; 3],
}

impl RecordingRegion {
    /// Map a window onto a subdomain. Z is never decomposed. If any axis
    /// comes out empty the whole region is empty.
    pub fn for_subdomain(specs: [AxisSpec; 3], sub: &Subdomain) -> AwpResult<Self> {
        if specs[2].end > sub.nzt {
            return Err(AwpError::Recording(format!(
                "Depth window ends at {} beyond nz={}",
                specs[2].end, sub.nzt
            )));
        }
        let mut axes = [
            map_axis(&specs[0], sub.origin_x(), sub.nxt),
            map_axis(&specs[1], sub.origin_y(), sub.nyt),
            map_axis(&specs[2], 0, sub.nzt),
        ];
        if axes.iter().any(AxisSlice::is_empty) {
            axes = [AxisSlice::default(); 3];
        }
        Ok(RecordingRegion { specs, axes })
    }

    pub fn from_config(cfg: &RecordingConfig, dims: (usize, usize, usize), sub: &Subdomain) -> AwpResult<Self> {
        let specs = [
            AxisSpec::normalize(&cfg.x, dims.0)?,
            AxisSpec::normalize(&cfg.y, dims.1)?,
            AxisSpec::normalize(&cfg.z, dims.2)?,
        ];
        Self::for_subdomain(specs, sub)
    }

    pub fn counts(&self) -> [usize; 3] {
        [self.axes[0].count, self.axes[1].count, self.axes[2].count]
    }

    /// Samples per snapshot contributed by this rank.
    pub fn samples(&self) -> usize {
        self.counts().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.samples() == 0
    }

    /// Global recording counts (NX, NY, NZ) of the shared file.
    pub fn global_counts(&self) -> [usize; 3] {
        [self.specs[0].count(), self.specs[1].count(), self.specs[2].count()]
    }

    pub fn strides(&self) -> [usize; 3] {
        [self.specs[0].stride, self.specs[1].stride, self.specs[2].stride]
    }

    pub fn layout(&self, write_step: usize) -> HyperslabLayout {
        HyperslabLayout {
            global: self.global_counts(),
            counts: self.counts(),
            record_origin: [self.axes[0].record_origin, self.axes[1].record_origin, 0],
            write_step,
        }
    }
}

/// Byte layout of one rank's contribution to a shared output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperslabLayout {
    pub global: [usize; 3],
    pub counts: [usize; 3],
    pub record_origin: [usize; 3],
    pub write_step: usize,
}

impl HyperslabLayout {
    /// Displacement of the rank's first sample.
    pub fn displacement(&self) -> FileOffset {
        let [nx, _, _] = self.global;
        FileOffset::from_elements(self.record_origin[1] * nx + self.record_origin[0])
    }

    pub fn file_bytes(&self) -> u64 {
        FileOffset::from_elements(self.global.iter().product::<usize>() * self.write_step).bytes()
    }

    /// File offset of the X run at local row `y`, slab `z`, snapshot `slot`.
    pub fn run_offset(&self, slot: usize, y: usize, z: usize) -> FileOffset {
        let [ox, oy, oz] = self.record_origin;
        FileOffset::of_sample(
            [RecordIndex(ox), RecordIndex(oy + y), RecordIndex(oz + z)],
            slot,
            self.global,
        )
    }

    /// Every contiguous run in file order: `(file offset, start in the
    /// rank's buffer, length)`. Empty for a rank without samples.
    pub fn runs(&self) -> Vec<(FileOffset, usize, usize)> {
        let [cx, cy, cz] = self.counts;
        if cx * cy * cz == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.write_step * cy * cz);
        let mut cursor = 0usize;
        for slot in 0..self.write_step {
            for z in 0..cz {
                for y in 0..cy {
                    out.push((self.run_offset(slot, y, z), cursor, cx));
                    cursor += cx;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp::{subdomain, ProcessGrid};

    #[test]
    fn test_normalize_full_axis_and_pull_back_end() {
        let spec = AxisSpec::normalize(&AxisRecording { begin: 1, end: -1, skip: 2 }, 64)
            .expect("normalize");
        assert_eq!(spec, AxisSpec { begin: 1, end: 63, stride: 2 });
        assert_eq!(spec.count(), 32);
    }

    #[test]
    fn test_strict_constructor_rejects_misaligned_end() {
        let err = AxisSpec::new(1, 64, 2).expect_err("63 % 2 != 0");
        assert!(matches!(err, AwpError::Recording(_)));
    }

    #[test]
    fn test_map_axis_matches_classic_formula() {
        // nxt = 32, stride 2, begin 1: rank 1 starts at (32 + 0) % 2 = 0
        let spec = AxisSpec::new(1, 63, 2).expect("spec");
        let a = map_axis(&spec, 0, 32);
        let b = map_axis(&spec, 32, 32);
        assert_eq!((a.local_begin, a.local_end, a.count, a.record_origin), (0, 30, 16, 0));
        assert_eq!((b.local_begin, b.local_end, b.count, b.record_origin), (0, 30, 16, 16));
    }

    #[test]
    fn test_map_axis_stride_not_dividing_extent() {
        // cells 2, 5, 8, 11, 14 (zero-based); ranks of 5 cells
        let spec = AxisSpec::new(3, 15, 3).expect("spec");
        let slices: Vec<AxisSlice> = (0..3).map(|c| map_axis(&spec, c * 5, 5)).collect();
        assert_eq!(slices[0].count, 1);
        assert_eq!(slices[0].local_begin, 2);
        assert_eq!(slices[1].count, 2);
        assert_eq!(slices[1].local_begin, 0);
        assert_eq!(slices[1].record_origin, 1);
        assert_eq!(slices[2].record_origin, 3);
        let total: usize = slices.iter().map(|s| s.count).sum();
        assert_eq!(total, spec.count());
    }

    #[test]
    fn test_rank_outside_window_gets_nothing() {
        let spec = AxisSpec::new(10, 20, 1).expect("spec");
        assert!(map_axis(&spec, 32, 32).is_empty());
        assert!(map_axis(&spec, 20, 4).is_empty());
        assert_eq!(map_axis(&spec, 16, 4).count, 4);
    }

    #[test]
    fn test_empty_axis_zeroes_all_axes() {
        let grid = ProcessGrid::new(2, 2).expect("grid");
        let sub = subdomain(2, (64, 64, 32), grid).expect("subdomain"); // cx 1, cy 0
        let specs = [
            AxisSpec::new(40, 50, 1).expect("x"),
            AxisSpec::new(40, 50, 1).expect("y"), // cy 0 covers 1..=32 only
            AxisSpec::new(1, 1, 1).expect("z"),
        ];
        let region = RecordingRegion::for_subdomain(specs, &sub).expect("region");
        assert_eq!(region.counts(), [0, 0, 0]);
        assert!(region.is_empty());
        assert!(region.layout(2).runs().is_empty());
    }

    #[test]
    fn test_layout_runs_and_displacement() {
        let grid = ProcessGrid::new(2, 2).expect("grid");
        let sub = subdomain(3, (64, 64, 32), grid).expect("subdomain"); // cx 1, cy 1
        let specs = [
            AxisSpec::new(1, 63, 2).expect("x"),
            AxisSpec::new(1, 64, 1).expect("y"),
            AxisSpec::new(1, 2, 1).expect("z"),
        ];
        let region = RecordingRegion::for_subdomain(specs, &sub).expect("region");
        assert_eq!(region.counts(), [16, 32, 2]);
        let layout = region.layout(2);
        assert_eq!(layout.global, [32, 64, 2]);
        assert_eq!(layout.displacement().bytes(), ((32 * 32 + 16) * 4) as u64);
        let runs = layout.runs();
        assert_eq!(runs.len(), 2 * 2 * 32);
        assert_eq!(runs[0].0, layout.displacement());
        assert_eq!(runs[1].0.bytes() - runs[0].0.bytes(), 32 * 4);
        assert_eq!(runs[32].0.bytes() - runs[0].0.bytes(), 32 * 64 * 4);
        assert_eq!(runs.last().map(|r| r.1 + r.2), Some(region.samples() * 2));
        assert_eq!(layout.file_bytes(), (32 * 64 * 2 * 2 * 4) as u64);
    }

    #[test]
    fn test_depth_window_beyond_grid_rejected() {
        let grid = ProcessGrid::new(1, 1).expect("grid");
        let sub = subdomain(0, (8, 8, 4), grid).expect("subdomain");
        let specs = [
            AxisSpec::new(1, 8, 1).expect("x"),
            AxisSpec::new(1, 8, 1).expect("y"),
            AxisSpec::new(1, 5, 1).expect("z"),
        ];
        assert!(RecordingRegion::for_subdomain(specs, &sub).is_err());
    }
}
