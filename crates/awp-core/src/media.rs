// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Media
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Material fields, attenuation coefficients and Cerjan sponges.
//!
//! Everything is evaluated over the full padded array from global
//! coordinates clamped to the physical domain, so ghost cells on open
//! boundaries repeat the edge material.

use crate::comm::{Communicator, ReduceOp};
use crate::decomp::Subdomain;
use crate::grid::PaddedShape;
use crate::kernels::MaterialFields;
use awp_types::config::{
    AbsorbingScheme, AttenuationConfig, BoundaryConfig, MaterialConfig, MediumConfig,
};
use awp_types::constants::RELAXATION_TIMES;
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::{AxisFrame, LocalIndex};
use ndarray::Zip;
use std::f64::consts::PI;

// ── Models ───────────────────────────────────────────────────────────

/// Material as a function of global cell `(x, y, depth)`.
pub trait MediumModel: Send + Sync {
    fn material_at(&self, x: usize, y: usize, depth: usize) -> MaterialConfig;
}

#[derive(Debug, Clone, Copy)]
pub struct Homogeneous(pub MaterialConfig);

impl MediumModel for Homogeneous {
    fn material_at(&self, _x: usize, _y: usize, _depth: usize) -> MaterialConfig {
        self.0
    }
}

/// Horizontal layers, each extending down to the next layer's top.
#[derive(Debug, Clone)]
pub struct Layered {
    layers: Vec<(usize, MaterialConfig)>,
}

impl Layered {
    pub fn new(mut layers: Vec<(usize, MaterialConfig)>) -> AwpResult<Self> {
        layers.sort_by_key(|(top, _)| *top);
        match layers.first() {
            Some((0, _)) => {}
            _ => {
                return Err(AwpError::Config(
                    "Layered medium needs a layer starting at depth 0".to_string(),
                ))
            }
        }
        if layers.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(AwpError::Config("Two layers share the same top".to_string()));
        }
        Ok(Layered { layers })
    }
}

impl MediumModel for Layered {
    fn material_at(&self, _x: usize, _y: usize, depth: usize) -> MaterialConfig {
        let idx = self.layers.partition_point(|(top, _)| *top <= depth);
        self.layers[idx.saturating_sub(1)].1
    }
}

fn check_material(m: &MaterialConfig) -> AwpResult<()> {
    let ok = m.vp > 0.0
        && m.vs >= 0.0
        && m.density > 0.0
        && m.vp * m.vp >= 2.0 * m.vs * m.vs
        && m.qp > 0.0
        && m.qs > 0.0;
    if ok {
        Ok(())
    } else {
        Err(AwpError::Config(format!(
            "Unphysical material vp={} vs={} density={} qp={} qs={}",
            m.vp, m.vs, m.density, m.qp, m.qs
        )))
    }
}

pub fn medium_from_config(cfg: &MediumConfig) -> AwpResult<Box<dyn MediumModel>> {
    match cfg {
        MediumConfig::Homogeneous { material } => {
            check_material(material)?;
            Ok(Box::new(Homogeneous(*material)))
        }
        MediumConfig::Layered { layers } => {
            for l in layers {
                check_material(&l.material)?;
            }
            let layers = layers.iter().map(|l| (l.top, l.material)).collect();
            Ok(Box::new(Layered::new(layers)?))
        }
    }
}

// ── Statistics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaStats {
    pub vp_min: f64,
    pub vp_max: f64,
    pub vs_min: f64,
    pub vs_max: f64,
    pub rho_min: f64,
    pub rho_max: f64,
}

impl MediaStats {
    fn empty() -> Self {
        MediaStats {
            vp_min: f64::INFINITY,
            vp_max: f64::NEG_INFINITY,
            vs_min: f64::INFINITY,
            vs_max: f64::NEG_INFINITY,
            rho_min: f64::INFINITY,
            rho_max: f64::NEG_INFINITY,
        }
    }

    fn include(&mut self, m: &MaterialConfig) {
        self.vp_min = self.vp_min.min(m.vp);
        self.vp_max = self.vp_max.max(m.vp);
        self.vs_min = self.vs_min.min(m.vs);
        self.vs_max = self.vs_max.max(m.vs);
        self.rho_min = self.rho_min.min(m.density);
        self.rho_max = self.rho_max.max(m.density);
    }

    /// Global extrema across all ranks.
    pub fn reduce<C: Communicator>(&self, comm: &C) -> AwpResult<Self> {
        let lo = comm.all_reduce(&[self.vp_min, self.vs_min, self.rho_min], ReduceOp::Min)?;
        let hi = comm.all_reduce(&[self.vp_max, self.vs_max, self.rho_max], ReduceOp::Max)?;
        match (lo.as_slice(), hi.as_slice()) {
            ([vp_min, vs_min, rho_min], [vp_max, vs_max, rho_max]) => Ok(MediaStats {
                vp_min: *vp_min,
                vp_max: *vp_max,
                vs_min: *vs_min,
                vs_max: *vs_max,
                rho_min: *rho_min,
                rho_max: *rho_max,
            }),
            _ => Err(AwpError::comm(comm.rank(), "media statistics reduction lost values")),
        }
    }

    /// Courant number Vp_max · dt / dh.
    pub fn stability(&self, dt: f64, dh: f64) -> f64 {
        self.vp_max * dt / dh
    }
}

// ── Attenuation ──────────────────────────────────────────────────────

/// Eight relaxation times log-spaced over `[1/(2π fh), 1/(2π fl)]`.
pub fn relaxation_times(fl: f64, fh: f64) -> [f64; RELAXATION_TIMES] {
    let lo = (1.0 / (2.0 * PI * fh)).ln();
    let hi = (1.0 / (2.0 * PI * fl)).ln();
    let steps = (RELAXATION_TIMES - 1) as f64;
    std::array::from_fn(|n| (lo + (hi - lo) * n as f64 / steps).exp())
}

/// Pattern slot of a cell: 2×2×2 by global parity.
pub fn relaxation_slot(x: usize, y: usize, depth: usize) -> usize {
    (x % 2) * 4 + (y % 2) * 2 + depth % 2
}

/// `(tau1, tau2)` for relaxation time `tau` at timestep `dt`.
pub fn relaxation_coefficients(tau: f64, dt: f64) -> (f64, f64) {
    (1.0 / (tau / dt + 0.5), tau / dt - 0.5)
}

// ── Cerjan sponge ────────────────────────────────────────────────────

/// Damping factor at distance `d` cells from a damped edge.
pub fn cerjan_factor(d: usize, nd: usize, arbc: f64) -> f64 {
    if d >= nd {
        return 1.0;
    }
    let alpha = (-arbc.ln()).sqrt() / nd as f64;
    (-(alpha * (nd - d) as f64).powi(2)).exp()
}

fn clamped_global(frame: &AxisFrame, local: usize, n: usize) -> usize {
    frame
        .to_global(LocalIndex(local))
        .map_or(0, |g| g.0.min(n - 1))
}

/// Profile along one padded axis. `low`/`high` select which physical
/// edges are damped.
pub fn cerjan_profile(
    frame: &AxisFrame,
    n: usize,
    boundary: &BoundaryConfig,
    low: bool,
    high: bool,
) -> Vec<f32> {
    (0..frame.padded)
        .map(|l| {
            if boundary.scheme == AbsorbingScheme::None {
                return 1.0;
            }
            let g = clamped_global(frame, l, n);
            let mut f = 1.0;
            if low {
                f *= cerjan_factor(g, boundary.nd, boundary.arbc);
            }
            if high {
                f *= cerjan_factor(n - 1 - g, boundary.nd, boundary.arbc);
            }
            f as f32
        })
        .collect()
}

// ── Filling ──────────────────────────────────────────────────────────

/// Everything `fill_materials` needs besides the model.
pub struct MediaSetup<'a> {
    pub sub: &'a Subdomain,
    pub shape: &'a PaddedShape,
    pub dims: (usize, usize, usize),
    pub dt: f64,
    pub boundary: &'a BoundaryConfig,
    pub attenuation: &'a AttenuationConfig,
}

/// Fill every material array of `media` and return local statistics over
/// the interior.
pub fn fill_materials(
    media: &mut MaterialFields,
    model: &dyn MediumModel,
    setup: &MediaSetup<'_>,
) -> MediaStats {
    let (nx, ny, nz) = setup.dims;
    let [fx, fy, fz] = setup.sub.frames(setup.shape);
    let global = |i: usize, j: usize, k: usize| {
        (
            clamped_global(&fx, i, nx),
            clamped_global(&fy, j, ny),
            clamped_global(&fz, k, nz),
        )
    };

    Zip::indexed(&mut media.density.data)
        .and(&mut media.lambda.data)
        .and(&mut media.mu.data)
        .par_for_each(|(i, j, k), rho, lam, mu| {
            let (x, y, z) = global(i, j, k);
            let m = model.material_at(x, y, z);
            let mu_v = m.density * m.vs * m.vs;
            *rho = m.density as f32;
            *mu = mu_v as f32;
            *lam = (m.density * m.vp * m.vp - 2.0 * mu_v) as f32;
        });

    if let Some(a) = media.anelastic.as_mut() {
        let taus = relaxation_times(setup.attenuation.fl, setup.attenuation.fh);
        let dt = setup.dt;
        Zip::indexed(&mut a.qp.data)
            .and(&mut a.qs.data)
            .and(&mut a.tau1.data)
            .and(&mut a.tau2.data)
            .par_for_each(|(i, j, k), qp, qs, t1, t2| {
                let (x, y, z) = global(i, j, k);
                let m = model.material_at(x, y, z);
                *qp = (1.0 / m.qp) as f32;
                *qs = (1.0 / m.qs) as f32;
                let (c1, c2) = relaxation_coefficients(taus[relaxation_slot(x, y, z)], dt);
                *t1 = c1 as f32;
                *t2 = c2 as f32;
            });
    }

    media.dcrjx.data = cerjan_profile(&fx, nx, setup.boundary, true, true).into();
    media.dcrjy.data = cerjan_profile(&fy, ny, setup.boundary, true, true).into();
    // free surface at depth 0 stays undamped
    media.dcrjz.data = cerjan_profile(&fz, nz, setup.boundary, false, true).into();

    let mut stats = MediaStats::empty();
    let sub = setup.sub;
    for x in sub.origin_x()..sub.origin_x() + sub.nxt {
        for y in sub.origin_y()..sub.origin_y() + sub.nyt {
            for z in 0..sub.nzt {
                stats.include(&model.material_at(x, y, z));
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp::{subdomain, ProcessGrid};
    use crate::grid::Padding;

    fn rock(vp: f64, vs: f64, density: f64) -> MaterialConfig {
        MaterialConfig {
            vp,
            vs,
            density,
            qp: 100.0,
            qs: 50.0,
        }
    }

    fn boundary(nd: usize) -> BoundaryConfig {
        BoundaryConfig {
            scheme: AbsorbingScheme::Cerjan,
            nd,
            arbc: 0.92,
        }
    }

    #[test]
    fn test_layered_lookup() {
        let model = Layered::new(vec![(5, rock(6000.0, 3464.0, 2700.0)), (0, rock(4000.0, 2000.0, 2200.0))])
            .expect("layers");
        assert_eq!(model.material_at(0, 0, 4).vp, 4000.0);
        assert_eq!(model.material_at(0, 0, 5).vp, 6000.0);
        assert_eq!(model.material_at(0, 0, 500).vp, 6000.0);
        assert!(Layered::new(vec![(3, rock(4000.0, 2000.0, 2200.0))]).is_err());
    }

    #[test]
    fn test_rejects_unphysical_material() {
        let cfg = MediumConfig::Homogeneous {
            material: rock(3000.0, 2500.0, 2000.0),
        };
        assert!(matches!(medium_from_config(&cfg), Err(AwpError::Config(_))));
    }

    #[test]
    fn test_relaxation_times_span_band() {
        let taus = relaxation_times(0.01, 25.0);
        assert!((taus[0] - 1.0 / (2.0 * PI * 25.0)).abs() < 1e-12);
        assert!((taus[7] - 1.0 / (2.0 * PI * 0.01)).abs() < 1e-9);
        assert!(taus.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(relaxation_slot(3, 2, 1), 5);
        let (t1, t2) = relaxation_coefficients(0.1, 0.01);
        assert!((t1 - 1.0 / 10.5).abs() < 1e-12);
        assert!((t2 - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_cerjan_edge_and_interior() {
        assert!((cerjan_factor(0, 20, 0.92) - 0.92).abs() < 1e-12);
        assert_eq!(cerjan_factor(20, 20, 0.92), 1.0);
        assert!(cerjan_factor(5, 20, 0.92) < cerjan_factor(15, 20, 0.92));

        let shape = PaddedShape::new(16, 16, 8, Padding::new(1, 2).expect("padding")).expect("shape");
        let fz = shape.z_frame();
        let prof = cerjan_profile(&fz, 8, &boundary(3), false, true);
        assert_eq!(prof[shape.surface_k()], 1.0);
        assert!(prof[shape.padding.align] < 1.0);
    }

    #[test]
    fn test_fill_materials_ghosts_clamped() {
        let grid = ProcessGrid::new(2, 1).expect("grid");
        let sub = subdomain(1, (32, 16, 8), grid).expect("subdomain");
        let shape = sub.shape(Padding::new(1, 2).expect("padding")).expect("shape");
        let model = Layered::new(vec![(0, rock(4000.0, 2000.0, 2000.0)), (4, rock(6000.0, 3000.0, 2500.0))])
            .expect("layers");
        let attenuation = AttenuationConfig {
            enabled: true,
            fl: 0.01,
            fh: 25.0,
            fp: 0.5,
        };
        let mut media = MaterialFields::blank(&shape, true);
        let setup = MediaSetup {
            sub: &sub,
            shape: &shape,
            dims: (32, 16, 8),
            dt: 0.005,
            boundary: &boundary(2),
            attenuation: &attenuation,
        };
        let stats = fill_materials(&mut media, &model, &setup);
        assert_eq!((stats.vp_min, stats.vp_max), (4000.0, 6000.0));
        assert_eq!((stats.rho_min, stats.rho_max), (2000.0, 2500.0));

        let surface = shape.surface_k();
        let g0 = shape.padding.first_interior();
        assert_eq!(media.density.data[[g0, g0, surface]], 2000.0);
        assert_eq!(media.density.data[[g0, g0, surface - 4]], 2500.0);
        // above the free surface the top layer repeats
        assert_eq!(media.density.data[[g0, g0, surface + 1]], 2000.0);
        let mu = 2000.0f32 * 2000.0 * 2000.0;
        assert_eq!(media.mu.data[[0, 0, surface]], mu);
        let qs = &media.anelastic.as_ref().expect("anelastic").qs;
        assert!((qs.data[[g0, g0, surface]] - 0.02).abs() < 1e-7);
        // right edge of the domain is damped, the shared left side is not
        assert!(media.dcrjx.data[g0 + 15] < 1.0);
        assert_eq!(media.dcrjx.data[g0], 1.0);
    }
}
