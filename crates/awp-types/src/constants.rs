// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Half-width of the fourth-order staggered stencil (cells read on each side).
pub const STENCIL_HALF_WIDTH: usize = 2;

/// Ghost cells added per unit of stencil loop order.
pub const GHOST_PER_LOOP: usize = 4;

/// Default stencil loop order.
pub const DEFAULT_LOOP: usize = 1;

/// Default Z padding (cells above and below the interior).
pub const DEFAULT_ALIGN: usize = 32;

/// Size in bytes of one stored sample (f32).
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

/// Fourth-order staggered-grid coefficient for the nearest pair.
pub const C1: f32 = 9.0 / 8.0;

/// Fourth-order staggered-grid coefficient for the outer pair.
pub const C2: f32 = -1.0 / 24.0;

/// Number of moment-rate components carried per source point.
pub const SOURCE_COMPONENTS: usize = 6;

/// Number of distinct relaxation times in the attenuation pattern (2×2×2).
pub const RELAXATION_TIMES: usize = 8;

/// Floating-point work per cell per timestep, used for the GFLOPS estimate.
pub const FLOPS_PER_CELL: f64 = 307.0;
