// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Coordinate Systems
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tagged indices for the four coordinate systems a rank juggles.
//!
//! * [`GlobalIndex`]: zero-based cell index in the full physical grid.
//! * [`LocalIndex`]: index into a rank's padded array (ghosts included).
//! * [`RecordIndex`]: position on the strided recording lattice.
//! * [`FileOffset`]: byte offset inside a shared output file.
//!
//! Conversions only happen through the functions in this module, so the
//! offsets between systems live in one place.

use crate::constants::ELEMENT_BYTES;
use serde::{Deserialize, Serialize};

/// Spatial axis. X and Y are decomposed across ranks, Z never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileOffset(pub u64);

/// Direction in which global indices run through the local array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// local = first + (global - origin)
    Forward,
    /// local = first - global (depth axis: surface sits at the top of the array)
    Reversed,
}

/// Mapping between global and local indices along one axis of one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisFrame {
    /// Global index of the first interior cell.
    pub origin: usize,
    /// Local index holding `origin`.
    pub first: usize,
    /// Number of interior cells.
    pub extent: usize,
    /// Padded array length along this axis.
    pub padded: usize,
    pub orientation: Orientation,
}

impl AxisFrame {
    pub fn forward(origin: usize, first: usize, extent: usize, padded: usize) -> Self {
        AxisFrame {
            origin,
            first,
            extent,
            padded,
            orientation: Orientation::Forward,
        }
    }

    /// Depth frame: global depth 0 (free surface) maps to `top`, deeper
    /// cells to smaller local indices.
    pub fn reversed(top: usize, extent: usize, padded: usize) -> Self {
        AxisFrame {
            origin: 0,
            first: top,
            extent,
            padded,
            orientation: Orientation::Reversed,
        }
    }

    /// Local index of a global cell, for any cell that lands inside the
    /// padded array (ghost cells included).
    pub fn to_local(&self, g: GlobalIndex) -> Option<LocalIndex> {
        let local = match self.orientation {
            Orientation::Forward => {
                (self.first + g.0).checked_sub(self.origin)?
            }
            Orientation::Reversed => self.first.checked_sub(g.0)?,
        };
        (local < self.padded).then_some(LocalIndex(local))
    }

    /// Global index of a local cell; `None` when the cell lies outside the
    /// physical domain (ghost cells past an open boundary).
    pub fn to_global(&self, l: LocalIndex) -> Option<GlobalIndex> {
        if l.0 >= self.padded {
            return None;
        }
        let g = match self.orientation {
            Orientation::Forward => (self.origin + l.0).checked_sub(self.first)?,
            Orientation::Reversed => self.first.checked_sub(l.0)?,
        };
        Some(GlobalIndex(g))
    }

    /// Whether a global cell belongs to this rank's interior.
    pub fn owns(&self, g: GlobalIndex) -> bool {
        match self.orientation {
            Orientation::Forward => g.0 >= self.origin && g.0 < self.origin + self.extent,
            Orientation::Reversed => g.0 < self.extent,
        }
    }
}

impl RecordIndex {
    /// Recording-lattice position of a global cell, given the zero-based
    /// first recorded cell and the stride. `None` when the cell is not on
    /// the lattice.
    pub fn from_global(g: GlobalIndex, begin: usize, stride: usize) -> Option<RecordIndex> {
        if stride == 0 || g.0 < begin {
            return None;
        }
        let d = g.0 - begin;
        (d % stride == 0).then_some(RecordIndex(d / stride))
    }

    pub fn to_global(self, begin: usize, stride: usize) -> GlobalIndex {
        GlobalIndex(begin + self.0 * stride)
    }
}

impl FileOffset {
    /// Byte offset of a recorded sample in a shared file laid out as
    /// `[slot][z][y][x]` with X fastest.
    pub fn of_sample(record: [RecordIndex; 3], slot: usize, dims: [usize; 3]) -> FileOffset {
        let [nx, ny, nz] = dims;
        let [rx, ry, rz] = record;
        let element = ((slot * nz + rz.0) * ny + ry.0) * nx + rx.0;
        FileOffset((element * ELEMENT_BYTES) as u64)
    }

    pub fn from_elements(elements: usize) -> FileOffset {
        FileOffset((elements * ELEMENT_BYTES) as u64)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }
}
