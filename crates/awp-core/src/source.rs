// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Point Sources
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Moment-rate point sources and their per-rank injection windows.
//!
//! A [`SourceModel`] produces the global series once. Each rank keeps
//! the points that fall inside its stress-update extent and feeds the
//! device `read_step_gpu` samples at a time.

use crate::grid::Region3;
use crate::kernels::{add_point_source, WaveFields};
use awp_types::config::{PointSourceConfig, SourceConfig, Wavelet};
use awp_types::constants::SOURCE_COMPONENTS;
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::{AxisFrame, GlobalIndex};
use std::f64::consts::PI;

/// Time series of one point: a global cell and NST moment-rate samples,
/// components in xx, yy, zz, xz, yz, xy order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePoint {
    pub index: [GlobalIndex; 3],
    pub samples: Vec<[f32; SOURCE_COMPONENTS]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSeries {
    pub nst: usize,
    pub points: Vec<SourcePoint>,
}

impl SourceSeries {
    /// Check every point sits inside `dims` and carries exactly `nst` samples.
    pub fn validate(&self, dims: (usize, usize, usize)) -> AwpResult<()> {
        if self.nst == 0 {
            return Err(AwpError::Source("Source series has no samples".to_string()));
        }
        if self.points.is_empty() {
            return Err(AwpError::Source("No source points defined".to_string()));
        }
        let (nx, ny, nz) = dims;
        for (n, p) in self.points.iter().enumerate() {
            let [x, y, z] = p.index.map(|g| g.0);
            if x >= nx || y >= ny || z >= nz {
                return Err(AwpError::Source(format!(
                    "Source {n} at ({x}, {y}, {z}) lies outside grid ({nx}, {ny}, {nz})"
                )));
            }
            if p.samples.len() != self.nst {
                return Err(AwpError::Source(format!(
                    "Source {n} has {} samples, expected NST={}",
                    p.samples.len(),
                    self.nst
                )));
            }
        }
        Ok(())
    }
}

/// Supplier of source time functions.
pub trait SourceModel {
    fn load(&self, nst: usize, dt: f64) -> AwpResult<SourceSeries>;
}

/// Ricker wavelet value at time `t`.
pub fn ricker(f0: f64, t0: f64, t: f64) -> f64 {
    let a = (PI * f0 * (t - t0)).powi(2);
    (1.0 - 2.0 * a) * (-a).exp()
}

/// Point sources described directly in the run configuration.
#[derive(Debug, Clone)]
pub struct PointSources {
    points: Vec<PointSourceConfig>,
}

impl PointSources {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        PointSources {
            points: cfg.points.clone(),
        }
    }
}

impl SourceModel for PointSources {
    fn load(&self, nst: usize, dt: f64) -> AwpResult<SourceSeries> {
        let mut points = Vec::with_capacity(self.points.len());
        for (n, p) in self.points.iter().enumerate() {
            let moment = p.moment.components();
            let stf: Vec<f64> = match &p.wavelet {
                Wavelet::Ricker { f0, t0 } => {
                    if !(f0.is_finite() && *f0 > 0.0) {
                        return Err(AwpError::Source(format!(
                            "Source {n}: Ricker peak frequency must be > 0, got {f0}"
                        )));
                    }
                    (0..nst).map(|s| ricker(*f0, *t0, s as f64 * dt)).collect()
                }
                Wavelet::Samples { values } => {
                    if values.len() < nst {
                        return Err(AwpError::Source(format!(
                            "Source {n}: {} samples given, NST={nst}",
                            values.len()
                        )));
                    }
                    values[..nst].to_vec()
                }
            };
            let samples = stf
                .iter()
                .map(|a| moment.map(|m| (m * a) as f32))
                .collect();
            points.push(SourcePoint {
                index: p.index.map(GlobalIndex),
                samples,
            });
        }
        Ok(SourceSeries { nst, points })
    }
}

// ── Device window ────────────────────────────────────────────────────

/// Slice of samples resident on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWindow {
    /// First sample held.
    pub start: usize,
    /// Samples held per point and component.
    pub len: usize,
    /// DT / DH³
    pub scale: f32,
    /// Local padded cell of each point.
    pub points: Vec<[usize; 3]>,
    /// `values[(c * npsrc + n) * len + (sample - start)]`
    pub values: Vec<f32>,
}

impl SourceWindow {
    pub fn npsrc(&self) -> usize {
        self.points.len()
    }

    pub fn contains(&self, sample: usize) -> bool {
        sample >= self.start && sample < self.start + self.len
    }

    /// All six components of point `n` at `sample`.
    pub fn moment(&self, n: usize, sample: usize) -> Option<[f32; SOURCE_COMPONENTS]> {
        if !self.contains(sample) || n >= self.npsrc() {
            return None;
        }
        let s = sample - self.start;
        let np = self.npsrc();
        Some(std::array::from_fn(|c| self.values[(c * np + n) * self.len + s]))
    }
}

#[derive(Debug, Clone)]
struct LocalSource {
    cell: [usize; 3],
    samples: Vec<[f32; SOURCE_COMPONENTS]>,
}

/// Source points owned by one rank plus the window bookkeeping.
#[derive(Debug, Clone)]
pub struct SourceInjector {
    sources: Vec<LocalSource>,
    nst: usize,
    window_len: usize,
    scale: f32,
    resident: Option<usize>,
}

impl SourceInjector {
    /// Keep the points of `series` whose local cell lies in `extent`.
    pub fn for_rank(
        series: &SourceSeries,
        frames: &[AxisFrame; 3],
        extent: &Region3,
        read_step_gpu: usize,
        scale: f32,
    ) -> Self {
        let sources = series
            .points
            .iter()
            .filter_map(|p| {
                let cell = [
                    frames[0].to_local(p.index[0])?.0,
                    frames[1].to_local(p.index[1])?.0,
                    frames[2].to_local(p.index[2])?.0,
                ];
                extent
                    .contains(cell[0], cell[1], cell[2])
                    .then(|| LocalSource {
                        cell,
                        samples: p.samples.clone(),
                    })
            })
            .collect();
        SourceInjector {
            sources,
            nst: series.nst,
            window_len: read_step_gpu.max(1),
            scale,
            resident: None,
        }
    }

    pub fn npsrc(&self) -> usize {
        self.sources.len()
    }

    pub fn is_active(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn nst(&self) -> usize {
        self.nst
    }

    /// Whether step `step` injects a sample.
    pub fn injects_at(&self, step: usize) -> bool {
        self.is_active() && step < self.nst
    }

    /// Window of samples containing `sample`, aligned to the window length.
    pub fn window_for(&self, sample: usize) -> SourceWindow {
        let start = (sample / self.window_len) * self.window_len;
        let len = self.window_len.min(self.nst.saturating_sub(start));
        let np = self.npsrc();
        let mut values = vec![0.0f32; SOURCE_COMPONENTS * np * len];
        for (n, src) in self.sources.iter().enumerate() {
            for s in 0..len {
                let sample = src.samples[start + s];
                for c in 0..SOURCE_COMPONENTS {
                    values[(c * np + n) * len + s] = sample[c];
                }
            }
        }
        SourceWindow {
            start,
            len,
            scale: self.scale,
            points: self.sources.iter().map(|s| s.cell).collect(),
            values,
        }
    }

    /// Window to upload before injecting `sample`, or `None` when the
    /// resident window already holds it.
    pub fn refresh(&mut self, sample: usize) -> Option<SourceWindow> {
        let start = (sample / self.window_len) * self.window_len;
        if self.resident == Some(start) {
            return None;
        }
        self.resident = Some(start);
        Some(self.window_for(sample))
    }

    /// Host-side injection, used for sample 0 before the initial upload.
    pub fn inject_host(&self, fields: &mut WaveFields, sample: usize) {
        if sample >= self.nst {
            return;
        }
        for src in &self.sources {
            add_point_source(fields, src.cell, src.samples[sample], self.scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PaddedShape, Padding};
    use awp_types::config::MomentTensor;

    fn explosion(index: [usize; 3], values: Vec<f64>) -> PointSourceConfig {
        PointSourceConfig {
            index,
            moment: MomentTensor {
                xx: 1.0,
                yy: 2.0,
                zz: 3.0,
                xy: 6.0,
                xz: 4.0,
                yz: 5.0,
            },
            wavelet: Wavelet::Samples { values },
        }
    }

    fn shape() -> PaddedShape {
        PaddedShape::new(16, 16, 8, Padding::new(1, 2).expect("padding")).expect("shape")
    }

    #[test]
    fn test_ricker_peak_and_decay() {
        assert!((ricker(2.0, 0.5, 0.5) - 1.0).abs() < 1e-12);
        assert!(ricker(2.0, 0.5, 5.0).abs() < 1e-12);
        assert!(ricker(2.0, 0.5, 0.5 + 0.2) < 0.0);
    }

    #[test]
    fn test_samples_scaled_by_moment() {
        let cfg = SourceConfig {
            nst: None,
            read_step_gpu: 4,
            points: vec![explosion([1, 2, 3], vec![0.0, 1.0, 2.0])],
        };
        let series = PointSources::from_config(&cfg).load(3, 0.01).expect("load");
        assert_eq!(series.points[0].samples[2], [2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        series.validate((4, 4, 4)).expect("valid");
        series.validate((2, 3, 4)).expect("last cell on each axis");
    }

    #[test]
    fn test_point_outside_grid_is_source_error() {
        let cfg = SourceConfig {
            nst: None,
            read_step_gpu: 4,
            points: vec![explosion([1, 2, 3], vec![0.0, 1.0, 2.0])],
        };
        let series = PointSources::from_config(&cfg).load(3, 0.01).expect("load");
        for dims in [(1, 4, 4), (4, 2, 4), (4, 4, 3)] {
            let err = series.validate(dims).expect_err("outside grid");
            assert!(matches!(err, AwpError::Source(_)), "{dims:?}");
        }
    }

    #[test]
    fn test_short_sample_list_is_source_error() {
        let cfg = SourceConfig {
            nst: None,
            read_step_gpu: 4,
            points: vec![explosion([0, 0, 0], vec![1.0])],
        };
        let err = PointSources::from_config(&cfg).load(5, 0.01).expect_err("too short");
        assert!(matches!(err, AwpError::Source(_)));
    }

    #[test]
    fn test_injector_keeps_points_in_extent() {
        let s = shape();
        let frames = [s.x_frame(16), s.y_frame(0), s.z_frame()];
        let series = SourceSeries {
            nst: 2,
            points: vec![
                SourcePoint { index: [GlobalIndex(20), GlobalIndex(3), GlobalIndex(0)], samples: vec![[1.0; 6]; 2] },
                SourcePoint { index: [GlobalIndex(2), GlobalIndex(3), GlobalIndex(0)], samples: vec![[1.0; 6]; 2] },
            ],
        };
        let inj = SourceInjector::for_rank(&series, &frames, &s.interior(), 10, 1.0);
        assert_eq!(inj.npsrc(), 1);
        let w = inj.window_for(0);
        assert_eq!(w.points[0], [6 + 4, 6 + 3, s.surface_k()]);
        assert!(inj.injects_at(1));
        assert!(!inj.injects_at(2));
    }

    #[test]
    fn test_window_layout_and_refresh() {
        let s = shape();
        let frames = [s.x_frame(0), s.y_frame(0), s.z_frame()];
        let samples = |base: f32| (0..5).map(|t| [base + t as f32; 6]).collect::<Vec<_>>();
        let series = SourceSeries {
            nst: 5,
            points: vec![
                SourcePoint { index: [GlobalIndex(1), GlobalIndex(1), GlobalIndex(1)], samples: samples(0.0) },
                SourcePoint { index: [GlobalIndex(2), GlobalIndex(2), GlobalIndex(2)], samples: samples(100.0) },
            ],
        };
        let mut inj = SourceInjector::for_rank(&series, &frames, &s.interior(), 2, 0.5);
        let w = inj.refresh(0).expect("first upload");
        assert_eq!((w.start, w.len), (0, 2));
        assert_eq!(w.moment(1, 1), Some([101.0; 6]));
        assert!(inj.refresh(1).is_none());
        let w = inj.refresh(4).expect("last window");
        assert_eq!((w.start, w.len), (4, 1));
        assert_eq!(w.moment(0, 4), Some([4.0; 6]));
        assert_eq!(w.moment(0, 3), None);
    }

    #[test]
    fn test_host_injection_subtracts_scaled_sample() {
        let s = shape();
        let frames = [s.x_frame(0), s.y_frame(0), s.z_frame()];
        let series = SourceSeries {
            nst: 1,
            points: vec![SourcePoint {
                index: [GlobalIndex(3), GlobalIndex(4), GlobalIndex(1)],
                samples: vec![[2.0, 0.0, 0.0, 0.0, 0.0, 0.0]],
            }],
        };
        let inj = SourceInjector::for_rank(&series, &frames, &s.interior(), 8, 0.25);
        let mut fields = WaveFields::zeros(&s, false);
        inj.inject_host(&mut fields, 0);
        assert_eq!(fields.xx.data[[9, 10, s.surface_k() - 1]], -0.5);
        inj.inject_host(&mut fields, 1);
        assert_eq!(fields.xx.data[[9, 10, s.surface_k() - 1]], -0.5);
    }
}
