// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Reference Kernels
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Host reference of the velocity, stress and source kernels.
//!
//! Fourth-order staggered differences, velocity–stress formulation:
//!
//!   dF(f) = C1·(f[p+1] − f[p]) + C2·(f[p+2] − f[p−1])
//!   dB(f) = C1·(f[p] − f[p−1]) + C2·(f[p+1] − f[p−2])
//!
//! Each kernel reads at most two cells either side of the cell it
//! updates, so a region must stay two cells inside the padded array.
//! The WGSL kernels in `awp-gpu` follow the same expressions.

use crate::grid::{Grid1D, Grid3D, PaddedShape, Region3};
use awp_types::constants::{C1, C2, STENCIL_HALF_WIDTH};
use awp_types::error::{AwpError, AwpResult};
use ndarray::{Array3, Axis as NdAxis, Zip};
use rayon::prelude::*;

use crate::device::FieldId;

const X: usize = 0;
const Y: usize = 1;
const Z: usize = 2;

// ── Field sets ───────────────────────────────────────────────────────

/// Wave state of one rank: velocity, stress, optional memory variables.
#[derive(Debug, Clone)]
pub struct WaveFields {
    pub u: Grid3D,
    pub v: Grid3D,
    pub w: Grid3D,
    pub xx: Grid3D,
    pub yy: Grid3D,
    pub zz: Grid3D,
    pub xy: Grid3D,
    pub xz: Grid3D,
    pub yz: Grid3D,
    /// r1..r6, paired with xx, yy, zz, xy, xz, yz.
    pub memory: Option<[Grid3D; 6]>,
}

impl WaveFields {
    pub fn zeros(shape: &PaddedShape, attenuation: bool) -> Self {
        let g = |id: FieldId| Grid3D::zeros(id.label(), shape);
        WaveFields {
            u: g(FieldId::U),
            v: g(FieldId::V),
            w: g(FieldId::W),
            xx: g(FieldId::Xx),
            yy: g(FieldId::Yy),
            zz: g(FieldId::Zz),
            xy: g(FieldId::Xy),
            xz: g(FieldId::Xz),
            yz: g(FieldId::Yz),
            memory: attenuation.then(|| FieldId::MEMORY.map(g)),
        }
    }

    pub fn grid(&self, id: FieldId) -> Option<&Grid3D> {
        Some(match id {
            FieldId::U => &self.u,
            FieldId::V => &self.v,
            FieldId::W => &self.w,
            FieldId::Xx => &self.xx,
            FieldId::Yy => &self.yy,
            FieldId::Zz => &self.zz,
            FieldId::Xy => &self.xy,
            FieldId::Xz => &self.xz,
            FieldId::Yz => &self.yz,
            FieldId::R1 | FieldId::R2 | FieldId::R3 | FieldId::R4 | FieldId::R5 | FieldId::R6 => {
                let slot = FieldId::MEMORY.iter().position(|m| *m == id)?;
                &self.memory.as_ref()?[slot]
            }
            _ => return None,
        })
    }

    pub fn grid_mut(&mut self, id: FieldId) -> Option<&mut Grid3D> {
        Some(match id {
            FieldId::U => &mut self.u,
            FieldId::V => &mut self.v,
            FieldId::W => &mut self.w,
            FieldId::Xx => &mut self.xx,
            FieldId::Yy => &mut self.yy,
            FieldId::Zz => &mut self.zz,
            FieldId::Xy => &mut self.xy,
            FieldId::Xz => &mut self.xz,
            FieldId::Yz => &mut self.yz,
            FieldId::R1 | FieldId::R2 | FieldId::R3 | FieldId::R4 | FieldId::R5 | FieldId::R6 => {
                let slot = FieldId::MEMORY.iter().position(|m| *m == id)?;
                &mut self.memory.as_mut()?[slot]
            }
            _ => return None,
        })
    }

    fn stress_mut(&mut self) -> [&mut Array3<f32>; 6] {
        [
            &mut self.xx.data,
            &mut self.yy.data,
            &mut self.zz.data,
            &mut self.xy.data,
            &mut self.xz.data,
            &mut self.yz.data,
        ]
    }
}

/// Quality factors and relaxation coefficients.
#[derive(Debug, Clone)]
pub struct AnelasticFields {
    /// 1/Qp
    pub qp: Grid3D,
    /// 1/Qs
    pub qs: Grid3D,
    pub tau1: Grid3D,
    pub tau2: Grid3D,
}

/// Material parameters and sponge profiles of one rank.
#[derive(Debug, Clone)]
pub struct MaterialFields {
    pub density: Grid3D,
    pub lambda: Grid3D,
    pub mu: Grid3D,
    pub anelastic: Option<AnelasticFields>,
    pub dcrjx: Grid1D,
    pub dcrjy: Grid1D,
    pub dcrjz: Grid1D,
}

impl MaterialFields {
    /// Unit density, zero moduli, no damping.
    pub fn blank(shape: &PaddedShape, attenuation: bool) -> Self {
        let g = |id: FieldId| Grid3D::zeros(id.label(), shape);
        let (px, py, pz) = shape.dims();
        let mut density = g(FieldId::Density);
        density.data.fill(1.0);
        MaterialFields {
            density,
            lambda: g(FieldId::Lambda),
            mu: g(FieldId::Mu),
            anelastic: attenuation.then(|| AnelasticFields {
                qp: g(FieldId::Qp),
                qs: g(FieldId::Qs),
                tau1: g(FieldId::Tau1),
                tau2: g(FieldId::Tau2),
            }),
            dcrjx: Grid1D::filled(FieldId::DcrjX.label(), px, 1.0),
            dcrjy: Grid1D::filled(FieldId::DcrjY.label(), py, 1.0),
            dcrjz: Grid1D::filled(FieldId::DcrjZ.label(), pz, 1.0),
        }
    }

    pub fn grid(&self, id: FieldId) -> Option<&Grid3D> {
        let a = self.anelastic.as_ref();
        match id {
            FieldId::Density => Some(&self.density),
            FieldId::Lambda => Some(&self.lambda),
            FieldId::Mu => Some(&self.mu),
            FieldId::Qp => a.map(|a| &a.qp),
            FieldId::Qs => a.map(|a| &a.qs),
            FieldId::Tau1 => a.map(|a| &a.tau1),
            FieldId::Tau2 => a.map(|a| &a.tau2),
            _ => None,
        }
    }

    pub fn grid_mut(&mut self, id: FieldId) -> Option<&mut Grid3D> {
        let a = self.anelastic.as_mut();
        match id {
            FieldId::Density => Some(&mut self.density),
            FieldId::Lambda => Some(&mut self.lambda),
            FieldId::Mu => Some(&mut self.mu),
            FieldId::Qp => a.map(|a| &mut a.qp),
            FieldId::Qs => a.map(|a| &mut a.qs),
            FieldId::Tau1 => a.map(|a| &mut a.tau1),
            FieldId::Tau2 => a.map(|a| &mut a.tau2),
            _ => None,
        }
    }

    pub fn profile(&self, id: FieldId) -> Option<&Grid1D> {
        match id {
            FieldId::DcrjX => Some(&self.dcrjx),
            FieldId::DcrjY => Some(&self.dcrjy),
            FieldId::DcrjZ => Some(&self.dcrjz),
            _ => None,
        }
    }

    pub fn profile_mut(&mut self, id: FieldId) -> Option<&mut Grid1D> {
        match id {
            FieldId::DcrjX => Some(&mut self.dcrjx),
            FieldId::DcrjY => Some(&mut self.dcrjy),
            FieldId::DcrjZ => Some(&mut self.dcrjz),
            _ => None,
        }
    }

    /// Three material grids exchanged across ranks after setup.
    pub fn swappable_mut(&mut self) -> Vec<&mut Grid3D> {
        let mut out = vec![&mut self.density, &mut self.lambda, &mut self.mu];
        if let Some(a) = self.anelastic.as_mut() {
            out.push(&mut a.qp);
            out.push(&mut a.qs);
        }
        out
    }

    #[inline]
    fn damping(&self, i: usize, j: usize, k: usize) -> f32 {
        self.dcrjx.data[i] * self.dcrjy.data[j] * self.dcrjz.data[k]
    }
}

// ── Stencils ─────────────────────────────────────────────────────────

#[inline(always)]
fn at(f: &Array3<f32>, p: [usize; 3], axis: usize, d: isize) -> f32 {
    let mut q = p;
    q[axis] = q[axis].wrapping_add_signed(d);
    f[q]
}

#[inline(always)]
fn dfwd(f: &Array3<f32>, p: [usize; 3], axis: usize) -> f32 {
    C1 * (at(f, p, axis, 1) - f[p]) + C2 * (at(f, p, axis, 2) - at(f, p, axis, -1))
}

#[inline(always)]
fn dbwd(f: &Array3<f32>, p: [usize; 3], axis: usize) -> f32 {
    C1 * (f[p] - at(f, p, axis, -1)) + C2 * (at(f, p, axis, 1) - at(f, p, axis, -2))
}

/// Check that a stencil centred anywhere in `region` stays in the array.
pub fn check_region(region: &Region3, shape: &PaddedShape) -> AwpResult<()> {
    let (px, py, pz) = shape.dims();
    let r = STENCIL_HALF_WIDTH;
    let ok = |range: &std::ops::Range<usize>, n: usize| {
        range.is_empty() || (range.start >= r && range.end + r <= n)
    };
    if ok(&region.x, px) && ok(&region.y, py) && ok(&region.z, pz) {
        Ok(())
    } else {
        Err(AwpError::Device(format!(
            "kernel region {region:?} reaches outside padded array ({px}, {py}, {pz})"
        )))
    }
}

// ── Velocity ─────────────────────────────────────────────────────────

pub fn update_velocity(fields: &mut WaveFields, media: &MaterialFields, region: &Region3, dth: f32) {
    if region.is_empty() {
        return;
    }
    let WaveFields {
        u,
        v,
        w,
        xx,
        yy,
        zz,
        xy,
        xz,
        yz,
        ..
    } = fields;
    let (xx, yy, zz) = (&xx.data, &yy.data, &zz.data);
    let (xy, xz, yz) = (&xy.data, &xz.data, &yz.data);
    let rho = &media.density.data;

    Zip::indexed(u.data.axis_iter_mut(NdAxis(0)))
        .and(v.data.axis_iter_mut(NdAxis(0)))
        .and(w.data.axis_iter_mut(NdAxis(0)))
        .par_for_each(|i, mut up, mut vp, mut wp| {
            if !region.x.contains(&i) {
                return;
            }
            for j in region.y.clone() {
                for k in region.z.clone() {
                    let p = [i, j, k];
                    let d = dth / rho[p];
                    let damp = media.damping(i, j, k);
                    let du = dbwd(xx, p, X) + dbwd(xy, p, Y) + dbwd(xz, p, Z);
                    let dv = dfwd(xy, p, X) + dfwd(yy, p, Y) + dbwd(yz, p, Z);
                    let dw = dfwd(xz, p, X) + dbwd(yz, p, Y) + dfwd(zz, p, Z);
                    up[[j, k]] = (up[[j, k]] + d * du) * damp;
                    vp[[j, k]] = (vp[[j, k]] + d * dv) * damp;
                    wp[[j, k]] = (wp[[j, k]] + d * dw) * damp;
                }
            }
        });
}

// ── Stress ───────────────────────────────────────────────────────────

struct StressPlane {
    stress: Vec<[f32; 6]>,
    memory: Option<Vec<[f32; 6]>>,
}

fn stress_plane(
    fields: &WaveFields,
    media: &MaterialFields,
    region: &Region3,
    i: usize,
    dth: f32,
) -> StressPlane {
    let (u, v, w) = (&fields.u.data, &fields.v.data, &fields.w.data);
    let old = [
        &fields.xx.data,
        &fields.yy.data,
        &fields.zz.data,
        &fields.xy.data,
        &fields.xz.data,
        &fields.yz.data,
    ];
    let n = region.y.len() * region.z.len();
    let mut stress = Vec::with_capacity(n);
    let mut memory = fields.memory.as_ref().map(|_| Vec::with_capacity(n));

    for j in region.y.clone() {
        for k in region.z.clone() {
            let p = [i, j, k];
            let lam = media.lambda.data[p];
            let mu = media.mu.data[p];
            let l2m = lam + 2.0 * mu;

            let exx = dfwd(u, p, X);
            let eyy = dbwd(v, p, Y);
            let ezz = dbwd(w, p, Z);
            let exy = dfwd(u, p, Y) + dbwd(v, p, X);
            let exz = dfwd(u, p, Z) + dbwd(w, p, X);
            let eyz = dfwd(v, p, Z) + dfwd(w, p, Y);

            let inc = [
                dth * (l2m * exx + lam * (eyy + ezz)),
                dth * (l2m * eyy + lam * (exx + ezz)),
                dth * (l2m * ezz + lam * (exx + eyy)),
                dth * mu * exy,
                dth * mu * exz,
                dth * mu * eyz,
            ];
            let damp = media.damping(i, j, k);

            let mut s = [0.0f32; 6];
            match (fields.memory.as_ref(), media.anelastic.as_ref(), memory.as_mut()) {
                (Some(r), Some(a), Some(out)) => {
                    let (qp, qs) = (a.qp.data[p], a.qs.data[p]);
                    let (t1, t2) = (a.tau1.data[p], a.tau2.data[p]);
                    let mut r_new = [0.0f32; 6];
                    for c in 0..6 {
                        let q = if c < 3 { qp } else { qs };
                        r_new[c] = t1 * (t2 * r[c].data[p] - q * inc[c]);
                        s[c] = (old[c][p] + inc[c] + r_new[c]) * damp;
                    }
                    out.push(r_new);
                }
                _ => {
                    for c in 0..6 {
                        s[c] = (old[c][p] + inc[c]) * damp;
                    }
                }
            }
            stress.push(s);
        }
    }
    StressPlane { stress, memory }
}

pub fn update_stress(fields: &mut WaveFields, media: &MaterialFields, region: &Region3, dth: f32) {
    if region.is_empty() {
        return;
    }
    let planes: Vec<StressPlane> = {
        let view: &WaveFields = fields;
        region
            .x
            .clone()
            .into_par_iter()
            .map(|i| stress_plane(view, media, region, i, dth))
            .collect()
    };

    for (i, plane) in region.x.clone().zip(planes) {
        {
            let mut out = fields.stress_mut();
            let mut cells = plane.stress.iter();
            for j in region.y.clone() {
                for k in region.z.clone() {
                    if let Some(s) = cells.next() {
                        for c in 0..6 {
                            out[c][[i, j, k]] = s[c];
                        }
                    }
                }
            }
        }
        if let (Some(r), Some(values)) = (fields.memory.as_mut(), plane.memory) {
            let mut cells = values.iter();
            for j in region.y.clone() {
                for k in region.z.clone() {
                    if let Some(v) = cells.next() {
                        for c in 0..6 {
                            r[c].data[[i, j, k]] = v[c];
                        }
                    }
                }
            }
        }
    }
}

// ── Sources ──────────────────────────────────────────────────────────

/// Subtract `scale · moment` at local cell `p`. Components in
/// xx, yy, zz, xz, yz, xy order.
pub fn add_point_source(fields: &mut WaveFields, p: [usize; 3], moment: [f32; 6], scale: f32) {
    fields.xx.data[p] -= scale * moment[0];
    fields.yy.data[p] -= scale * moment[1];
    fields.zz.data[p] -= scale * moment[2];
    fields.xz.data[p] -= scale * moment[3];
    fields.yz.data[p] -= scale * moment[4];
    fields.xy.data[p] -= scale * moment[5];
}
