// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Padded Grids
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Padded 3D/1D buffers and the index arithmetic shared by every field.
//!
//! Layout is `[x][y][z]` with Z fastest. X and Y carry `2 + 4·loop`
//! ghost cells on each side; Z carries `align` cells above and below.
//! Every field of a rank uses the same [`PaddedShape`], so a
//! [`Region3`] computed once addresses the same cells in all of them.

use awp_types::constants::{GHOST_PER_LOOP, STENCIL_HALF_WIDTH};
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::AxisFrame;
use ndarray::{s, Array1, Array3, ArrayView3, ArrayViewMut3};
use std::ops::Range;

/// Ghost-cell scheme: stencil loop order and Z alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub loop_order: usize,
    pub align: usize,
}

impl Padding {
    pub fn new(loop_order: usize, align: usize) -> AwpResult<Self> {
        if loop_order == 0 {
            return Err(AwpError::Layout("loop_order must be >= 1".to_string()));
        }
        if align < STENCIL_HALF_WIDTH {
            return Err(AwpError::Layout(format!(
                "align={align} below stencil half-width {STENCIL_HALF_WIDTH}"
            )));
        }
        Ok(Padding { loop_order, align })
    }

    /// Width of an exchanged ghost slab along X or Y.
    pub fn ghost_width(&self) -> usize {
        GHOST_PER_LOOP * self.loop_order
    }

    /// Local index of the first interior cell along X or Y.
    pub fn first_interior(&self) -> usize {
        STENCIL_HALF_WIDTH + self.ghost_width()
    }

    /// Total cells added along X or Y.
    pub fn lateral_pad(&self) -> usize {
        2 * self.first_interior()
    }
}

/// Interior extents of a rank plus the padding applied around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedShape {
    pub nxt: usize,
    pub nyt: usize,
    pub nzt: usize,
    pub padding: Padding,
}

impl PaddedShape {
    pub fn new(nxt: usize, nyt: usize, nzt: usize, padding: Padding) -> AwpResult<Self> {
        if nxt == 0 || nyt == 0 || nzt == 0 {
            return Err(AwpError::Layout(format!(
                "Interior extents must be >= 1, got ({nxt}, {nyt}, {nzt})"
            )));
        }
        Ok(PaddedShape {
            nxt,
            nyt,
            nzt,
            padding,
        })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        let lateral = self.padding.lateral_pad();
        (
            self.nxt + lateral,
            self.nyt + lateral,
            self.nzt + 2 * self.padding.align,
        )
    }

    pub fn len(&self) -> usize {
        let (px, py, pz) = self.dims();
        px * py * pz
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset of `(i, j, k)`.
    #[inline]
    pub fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        let (_, py, pz) = self.dims();
        (i * py + j) * pz + k
    }

    pub fn interior_x(&self) -> Range<usize> {
        let g0 = self.padding.first_interior();
        g0..g0 + self.nxt
    }

    pub fn interior_y(&self) -> Range<usize> {
        let g0 = self.padding.first_interior();
        g0..g0 + self.nyt
    }

    pub fn interior_z(&self) -> Range<usize> {
        self.padding.align..self.padding.align + self.nzt
    }

    /// Local Z index of the free surface (global depth 0).
    pub fn surface_k(&self) -> usize {
        self.nzt + self.padding.align - 1
    }

    pub fn interior(&self) -> Region3 {
        Region3::new(self.interior_x(), self.interior_y(), self.interior_z())
    }

    /// The whole padded array.
    pub fn full(&self) -> Region3 {
        let (px, py, pz) = self.dims();
        Region3::new(0..px, 0..py, 0..pz)
    }

    pub fn x_frame(&self, origin: usize) -> AxisFrame {
        AxisFrame::forward(origin, self.padding.first_interior(), self.nxt, self.dims().0)
    }

    pub fn y_frame(&self, origin: usize) -> AxisFrame {
        AxisFrame::forward(origin, self.padding.first_interior(), self.nyt, self.dims().1)
    }

    pub fn z_frame(&self) -> AxisFrame {
        AxisFrame::reversed(self.surface_k(), self.nzt, self.dims().2)
    }
}

/// Axis-aligned box of local indices, half-open on every axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region3 {
    pub x: Range<usize>,
    pub y: Range<usize>,
    pub z: Range<usize>,
}

impl Region3 {
    pub fn new(x: Range<usize>, y: Range<usize>, z: Range<usize>) -> Self {
        Region3 { x, y, z }
    }

    pub fn len(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, i: usize, j: usize, k: usize) -> bool {
        self.x.contains(&i) && self.y.contains(&j) && self.z.contains(&k)
    }

    pub fn fits(&self, shape: &PaddedShape) -> bool {
        let (px, py, pz) = shape.dims();
        self.x.end <= px && self.y.end <= py && self.z.end <= pz
    }

    /// Contiguous `(offset, len)` runs covering the region in flat memory
    /// order. Adjacent runs are merged, so a slab spanning full Y and Z
    /// comes back as a single run.
    pub fn runs(&self, shape: &PaddedShape) -> Vec<(usize, usize)> {
        let mut runs: Vec<(usize, usize)> = Vec::new();
        if self.is_empty() {
            return runs;
        }
        for i in self.x.clone() {
            for j in self.y.clone() {
                let start = shape.offset(i, j, self.z.start);
                let len = self.z.len();
                match runs.last_mut() {
                    Some((off, n)) if *off + *n == start => *n += len,
                    _ => runs.push((start, len)),
                }
            }
        }
        runs
    }
}

/// Owned padded 3D array for one physical quantity.
#[derive(Debug, Clone)]
pub struct Grid3D {
    pub label: &'static str,
    pub data: Array3<f32>,
}

impl Grid3D {
    pub fn zeros(label: &'static str, shape: &PaddedShape) -> Self {
        Grid3D {
            label,
            data: Array3::zeros(shape.dims()),
        }
    }

    pub fn bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Flat view in memory order.
    pub fn as_slice(&self) -> AwpResult<&[f32]> {
        self.data
            .as_slice()
            .ok_or_else(|| AwpError::Layout(format!("{} is not contiguous", self.label)))
    }

    pub fn as_mut_slice(&mut self) -> AwpResult<&mut [f32]> {
        let label = self.label;
        self.data
            .as_slice_mut()
            .ok_or_else(|| AwpError::Layout(format!("{label} is not contiguous")))
    }

    pub fn region(&self, r: &Region3) -> ArrayView3<'_, f32> {
        self.data.slice(s![r.x.clone(), r.y.clone(), r.z.clone()])
    }

    pub fn region_mut(&mut self, r: &Region3) -> ArrayViewMut3<'_, f32> {
        self.data.slice_mut(s![r.x.clone(), r.y.clone(), r.z.clone()])
    }
}

/// Owned 1D profile along one padded axis.
#[derive(Debug, Clone)]
pub struct Grid1D {
    pub label: &'static str,
    pub data: Array1<f32>,
}

impl Grid1D {
    pub fn filled(label: &'static str, len: usize, value: f32) -> Self {
        Grid1D {
            label,
            data: Array1::from_elem(len, value),
        }
    }

    pub fn bytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f32>()) as u64
    }

    pub fn as_slice(&self) -> AwpResult<&[f32]> {
        self.data
            .as_slice()
            .ok_or_else(|| AwpError::Layout(format!("{} is not contiguous", self.label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> PaddedShape {
        PaddedShape::new(8, 6, 5, Padding::new(1, 3).expect("padding")).expect("shape")
    }

    #[test]
    fn test_padded_dims_follow_loop_and_align() {
        let s = shape();
        assert_eq!(s.dims(), (8 + 12, 6 + 12, 5 + 6));
        assert_eq!(s.interior_x(), 6..14);
        assert_eq!(s.interior_z(), 3..8);
        assert_eq!(s.surface_k(), 7);
        assert_eq!(s.padding.ghost_width(), 4);
    }

    #[test]
    fn test_offset_is_z_fastest() {
        let s = shape();
        let (_, py, pz) = s.dims();
        assert_eq!(s.offset(0, 0, 1), 1);
        assert_eq!(s.offset(0, 1, 0), pz);
        assert_eq!(s.offset(1, 0, 0), py * pz);
    }

    #[test]
    fn test_runs_merge_full_planes() {
        let s = shape();
        let (_, py, pz) = s.dims();
        let slab = Region3::new(6..10, 0..py, 0..pz);
        assert_eq!(slab.runs(&s), vec![(s.offset(6, 0, 0), 4 * py * pz)]);

        let strip = Region3::new(2..4, 6..10, 0..pz);
        let runs = strip.runs(&s);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|&(_, n)| n == 4 * pz));
        assert_eq!(runs.iter().map(|r| r.1).sum::<usize>(), strip.len());
    }

    #[test]
    fn test_region_view_matches_runs() {
        let s = shape();
        let mut g = Grid3D::zeros("probe", &s);
        for (n, v) in g.data.iter_mut().enumerate() {
            *v = n as f32;
        }
        let r = Region3::new(7..9, 3..5, 2..4);
        let flat = g.as_slice().expect("contiguous");
        let from_runs: Vec<f32> = r
            .runs(&s)
            .iter()
            .flat_map(|&(o, n)| flat[o..o + n].iter().copied())
            .collect();
        let from_view: Vec<f32> = g.region(&r).iter().copied().collect();
        assert_eq!(from_runs, from_view);
    }

    #[test]
    fn test_rejects_bad_padding() {
        assert!(Padding::new(0, 32).is_err());
        assert!(Padding::new(1, 1).is_err());
        assert!(PaddedShape::new(0, 4, 4, Padding::new(1, 2).expect("padding")).is_err());
    }
}
