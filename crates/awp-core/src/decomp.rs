// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Domain Decomposition
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! 2D Cartesian decomposition of the (X, Y) plane; Z stays whole.
//!
//! Ranks are numbered row-major over (px × py): `rank = cx * py + cy`.
//! The topology is not periodic: a shift that leaves the process grid
//! yields `None`, never a wrapped rank.

use crate::grid::{Padding, PaddedShape};
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::AxisFrame;

/// Shape of the process grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGrid {
    pub px: usize,
    pub py: usize,
}

impl ProcessGrid {
    pub fn new(px: usize, py: usize) -> AwpResult<Self> {
        if px == 0 || py == 0 {
            return Err(AwpError::Decomposition(
                "Process grid dimensions px, py must be >= 1".to_string(),
            ));
        }
        Ok(ProcessGrid { px, py })
    }

    pub fn size(&self) -> usize {
        self.px * self.py
    }

    pub fn rank_of(&self, cx: usize, cy: usize) -> usize {
        cx * self.py + cy
    }

    pub fn coords_of(&self, rank: usize) -> (usize, usize) {
        (rank / self.py, rank % self.py)
    }

    /// Rank at offset `(dx, dy)` from `(cx, cy)`, or `None` off the grid.
    pub fn shift(&self, cx: usize, cy: usize, dx: isize, dy: isize) -> Option<usize> {
        let nx = cx.checked_add_signed(dx)?;
        let ny = cy.checked_add_signed(dy)?;
        if nx >= self.px || ny >= self.py {
            return None;
        }
        Some(self.rank_of(nx, ny))
    }
}

/// The four planar neighbours of a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Neighbors {
    /// x - 1
    pub left: Option<usize>,
    /// x + 1
    pub right: Option<usize>,
    /// y - 1
    pub front: Option<usize>,
    /// y + 1
    pub back: Option<usize>,
}

impl Neighbors {
    pub fn count(&self) -> usize {
        [self.left, self.right, self.front, self.back]
            .iter()
            .filter(|n| n.is_some())
            .count()
    }
}

/// Local subdomain of one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdomain {
    pub rank: usize,
    pub grid: ProcessGrid,
    pub cx: usize,
    pub cy: usize,
    pub nxt: usize,
    pub nyt: usize,
    pub nzt: usize,
    pub neighbors: Neighbors,
}

impl Subdomain {
    /// Global index of the first interior cell along X.
    pub fn origin_x(&self) -> usize {
        self.cx * self.nxt
    }

    pub fn origin_y(&self) -> usize {
        self.cy * self.nyt
    }

    pub fn shape(&self, padding: Padding) -> AwpResult<PaddedShape> {
        PaddedShape::new(self.nxt, self.nyt, self.nzt, padding)
    }

    pub fn frames(&self, shape: &PaddedShape) -> [AxisFrame; 3] {
        [
            shape.x_frame(self.origin_x()),
            shape.y_frame(self.origin_y()),
            shape.z_frame(),
        ]
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }
}

/// Subdomain of `rank` for a global grid (nx, ny, nz) split over `grid`.
///
/// Divisibility is checked here: an uneven split is an error rather than
/// a silently truncated extent.
pub fn subdomain(
    rank: usize,
    dims: (usize, usize, usize),
    grid: ProcessGrid,
) -> AwpResult<Subdomain> {
    let (nx, ny, nz) = dims;
    if rank >= grid.size() {
        return Err(AwpError::Decomposition(format!(
            "Rank {rank} outside process grid of size {}",
            grid.size()
        )));
    }
    if nx % grid.px != 0 || ny % grid.py != 0 {
        return Err(AwpError::Decomposition(format!(
            "Grid ({nx}, {ny}) is not divisible by process grid ({}, {})",
            grid.px, grid.py
        )));
    }
    if nx < grid.px || ny < grid.py || nz == 0 {
        return Err(AwpError::Decomposition(format!(
            "Cannot split ({nx}×{ny}×{nz}) across ({}×{}) processes",
            grid.px, grid.py
        )));
    }
    let (cx, cy) = grid.coords_of(rank);
    Ok(Subdomain {
        rank,
        grid,
        cx,
        cy,
        nxt: nx / grid.px,
        nyt: ny / grid.py,
        nzt: nz,
        neighbors: Neighbors {
            left: grid.shift(cx, cy, -1, 0),
            right: grid.shift(cx, cy, 1, 0),
            front: grid.shift(cx, cy, 0, -1),
            back: grid.shift(cx, cy, 0, 1),
        },
    })
}

/// All subdomains in rank order.
pub fn decompose(dims: (usize, usize, usize), grid: ProcessGrid) -> AwpResult<Vec<Subdomain>> {
    (0..grid.size()).map(|r| subdomain(r, dims, grid)).collect()
}
