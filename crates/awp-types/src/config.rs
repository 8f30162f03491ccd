// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::{DEFAULT_ALIGN, DEFAULT_LOOP, GHOST_PER_LOOP, STENCIL_HALF_WIDTH};
use crate::error::{AwpError, AwpResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level run configuration.
/// One JSON document describes grid, time stepping, process grid,
/// recording window, sources and medium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_run_name")]
    pub run_name: String,
    pub grid: GridConfig,
    pub time: TimeConfig,
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    #[serde(default)]
    pub padding: PaddingConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    #[serde(default)]
    pub attenuation: AttenuationConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    pub source: SourceConfig,
    pub medium: MediumConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Grid spacing (m).
    pub dh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Simulated duration (s).
    pub tmax: f64,
    /// Timestep (s).
    pub dt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    #[serde(default = "default_one")]
    pub px: usize,
    #[serde(default = "default_one")]
    pub py: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        DecompositionConfig { px: 1, py: 1 }
    }
}

/// Padding scheme shared by every local field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddingConfig {
    /// Stencil loop order; ghost slabs are `4 * loop_order` wide.
    #[serde(default = "default_loop")]
    pub loop_order: usize,
    /// Cells of padding above and below the Z interior.
    #[serde(default = "default_align")]
    pub align: usize,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        PaddingConfig {
            loop_order: default_loop(),
            align: default_align(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsorbingScheme {
    /// Exponential Cerjan sponge on the lateral faces and the bottom.
    Cerjan,
    /// No damping at all (reflecting edges).
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    #[serde(default = "default_scheme")]
    pub scheme: AbsorbingScheme,
    /// Sponge width in cells (ND).
    #[serde(default = "default_nd")]
    pub nd: usize,
    /// Damping coefficient at the outermost sponge cell (ARBC).
    #[serde(default = "default_arbc")]
    pub arbc: f64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        BoundaryConfig {
            scheme: default_scheme(),
            nd: default_nd(),
            arbc: default_arbc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttenuationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Low corner of the constant-Q band (Hz).
    #[serde(default = "default_fl")]
    pub fl: f64,
    /// High corner of the constant-Q band (Hz).
    #[serde(default = "default_fh")]
    pub fh: f64,
    /// Reference frequency of the Q values (Hz).
    #[serde(default = "default_fp")]
    pub fp: f64,
}

impl Default for AttenuationConfig {
    fn default() -> Self {
        AttenuationConfig {
            enabled: false,
            fl: default_fl(),
            fh: default_fh(),
            fp: default_fp(),
        }
    }
}

/// Recording window along one axis; 1-based inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRecording {
    #[serde(default = "default_begin")]
    pub begin: i64,
    /// `-1` records to the end of the axis.
    #[serde(default = "default_end")]
    pub end: i64,
    #[serde(default = "default_one")]
    pub skip: usize,
}

impl Default for AxisRecording {
    fn default() -> Self {
        AxisRecording {
            begin: default_begin(),
            end: default_end(),
            skip: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub x: AxisRecording,
    #[serde(default)]
    pub y: AxisRecording,
    /// Depth window; defaults to the free surface only.
    #[serde(default = "default_surface")]
    pub z: AxisRecording,
    /// Snapshot every `ntiskp` steps.
    #[serde(default = "default_one")]
    pub ntiskp: usize,
    /// Snapshots buffered before a file write.
    #[serde(default = "default_one")]
    pub write_step: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            x: AxisRecording::default(),
            y: AxisRecording::default(),
            z: default_surface(),
            ntiskp: 1,
            write_step: 1,
            output_dir: default_output_dir(),
        }
    }
}

/// Six independent moment-tensor components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentTensor {
    pub xx: f64,
    pub yy: f64,
    pub zz: f64,
    pub xy: f64,
    pub xz: f64,
    pub yz: f64,
}

impl MomentTensor {
    /// Component order used on the wire: xx, yy, zz, xz, yz, xy.
    pub fn components(&self) -> [f64; 6] {
        [self.xx, self.yy, self.zz, self.xz, self.yz, self.xy]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Wavelet {
    /// Ricker wavelet with peak frequency `f0` (Hz) centred at `t0` (s).
    Ricker { f0: f64, t0: f64 },
    /// Explicit moment-rate samples, one per timestep.
    Samples { values: Vec<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSourceConfig {
    /// Zero-based global cell index (x, y, depth).
    pub index: [usize; 3],
    pub moment: MomentTensor,
    pub wavelet: Wavelet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Number of source time samples (NST). Defaults to the step count.
    #[serde(default)]
    pub nst: Option<usize>,
    /// Samples kept on the device at a time (READ_STEP_GPU).
    #[serde(default = "default_read_step_gpu")]
    pub read_step_gpu: usize,
    pub points: Vec<PointSourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    /// P-wave velocity (m/s).
    pub vp: f64,
    /// S-wave velocity (m/s).
    pub vs: f64,
    /// Density (kg/m^3).
    pub density: f64,
    #[serde(default = "default_qp")]
    pub qp: f64,
    #[serde(default = "default_qs")]
    pub qs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Depth of the layer top in cells.
    pub top: usize,
    #[serde(flatten)]
    pub material: MaterialConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediumConfig {
    Homogeneous {
        #[serde(flatten)]
        material: MaterialConfig,
    },
    Layered { layers: Vec<LayerConfig> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
    /// Rank 0 logs progress every this many steps.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            path: default_checkpoint_path(),
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_run_name() -> String {
    "awp-run".to_string()
}
fn default_one() -> usize {
    1
}
fn default_loop() -> usize {
    DEFAULT_LOOP
}
fn default_align() -> usize {
    DEFAULT_ALIGN
}
fn default_scheme() -> AbsorbingScheme {
    AbsorbingScheme::Cerjan
}
fn default_nd() -> usize {
    20
}
fn default_arbc() -> f64 {
    0.92
}
fn default_fl() -> f64 {
    0.01
}
fn default_fh() -> f64 {
    25.0
}
fn default_fp() -> f64 {
    0.5
}
fn default_begin() -> i64 {
    1
}
fn default_end() -> i64 {
    -1
}
fn default_surface() -> AxisRecording {
    AxisRecording {
        begin: 1,
        end: 1,
        skip: 1,
    }
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output_sfc")
}
fn default_read_step_gpu() -> usize {
    1000
}
fn default_qp() -> f64 {
    100.0
}
fn default_qs() -> f64 {
    50.0
}
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("output_ckp/ckp")
}
fn default_progress_interval() -> usize {
    100
}

impl RunConfig {
    /// Load from a JSON file. Does not validate; call [`RunConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> AwpResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Number of timesteps: `floor(tmax / dt) + 1`.
    pub fn nt(&self) -> usize {
        (self.time.tmax / self.time.dt).floor() as usize + 1
    }

    /// Number of source samples, defaulting to the step count.
    pub fn nst(&self) -> usize {
        self.source.nst.unwrap_or_else(|| self.nt())
    }

    pub fn nranks(&self) -> usize {
        self.decomposition.px * self.decomposition.py
    }

    /// Ghost slab width along X and Y.
    pub fn ghost_width(&self) -> usize {
        GHOST_PER_LOOP * self.padding.loop_order
    }

    /// Reject configurations that would produce wrong local extents or
    /// out-of-range indexing once the run starts.
    pub fn validate(&self) -> AwpResult<()> {
        let g = &self.grid;
        if g.nx == 0 || g.ny == 0 || g.nz == 0 {
            return Err(AwpError::Config(format!(
                "Grid dimensions must be >= 1, got ({}, {}, {})",
                g.nx, g.ny, g.nz
            )));
        }
        if !g.dh.is_finite() || g.dh <= 0.0 {
            return Err(AwpError::Config(format!(
                "Grid spacing must be finite > 0, got {}",
                g.dh
            )));
        }
        let t = &self.time;
        if !t.dt.is_finite() || t.dt <= 0.0 || !t.tmax.is_finite() || t.tmax < 0.0 {
            return Err(AwpError::Config(format!(
                "Invalid time stepping: tmax={} dt={}",
                t.tmax, t.dt
            )));
        }

        let d = &self.decomposition;
        if d.px == 0 || d.py == 0 {
            return Err(AwpError::Decomposition(
                "Process grid dimensions px, py must be >= 1".to_string(),
            ));
        }
        if g.nx % d.px != 0 || g.ny % d.py != 0 {
            return Err(AwpError::Decomposition(format!(
                "Grid ({}, {}) is not divisible by process grid ({}, {})",
                g.nx, g.ny, d.px, d.py
            )));
        }

        let p = &self.padding;
        if p.loop_order == 0 {
            return Err(AwpError::Config("loop_order must be >= 1".to_string()));
        }
        if p.align < STENCIL_HALF_WIDTH {
            return Err(AwpError::Config(format!(
                "Z alignment {} is smaller than the stencil half-width {}",
                p.align, STENCIL_HALF_WIDTH
            )));
        }
        let (nxt, nyt) = (g.nx / d.px, g.ny / d.py);
        let w = self.ghost_width();
        if (d.px > 1 && nxt < 2 * w) || (d.py > 1 && nyt < 2 * w) {
            return Err(AwpError::Decomposition(format!(
                "Sub-domain ({nxt}, {nyt}) narrower than two ghost slabs of width {w}"
            )));
        }

        let b = &self.boundary;
        if b.scheme == AbsorbingScheme::Cerjan {
            if b.nd == 0 || !(b.arbc > 0.0 && b.arbc < 1.0) {
                return Err(AwpError::Config(format!(
                    "Cerjan sponge needs nd >= 1 and arbc in (0, 1), got nd={} arbc={}",
                    b.nd, b.arbc
                )));
            }
        }
        if b.nd >= nxt || b.nd >= nyt || b.nd >= g.nz {
            return Err(AwpError::Config(format!(
                "Sponge width {} does not fit inside sub-domain ({nxt}, {nyt}, {})",
                b.nd, g.nz
            )));
        }

        let a = &self.attenuation;
        if a.enabled && !(a.fl > 0.0 && a.fh > a.fl && a.fp > 0.0) {
            return Err(AwpError::Config(format!(
                "Attenuation band needs 0 < fl < fh and fp > 0, got fl={} fh={} fp={}",
                a.fl, a.fh, a.fp
            )));
        }

        let r = &self.recording;
        for (name, axis, n) in [("x", &r.x, g.nx), ("y", &r.y, g.ny), ("z", &r.z, g.nz)] {
            let end = if axis.end == -1 { n as i64 } else { axis.end };
            if axis.skip == 0 || axis.begin < 1 || axis.begin > end || end > n as i64 {
                return Err(AwpError::Recording(format!(
                    "Recording axis {name}: begin={} end={} skip={} outside 1..={n}",
                    axis.begin, axis.end, axis.skip
                )));
            }
        }
        if r.ntiskp == 0 || r.write_step == 0 {
            return Err(AwpError::Recording(format!(
                "ntiskp and write_step must be >= 1, got {} and {}",
                r.ntiskp, r.write_step
            )));
        }

        let s = &self.source;
        if s.read_step_gpu == 0 {
            return Err(AwpError::Source("read_step_gpu must be >= 1".to_string()));
        }
        if self.nst() == 0 {
            return Err(AwpError::Source("Source needs at least one sample".to_string()));
        }

        if self.checkpoint.progress_interval == 0 {
            return Err(AwpError::Config(
                "progress_interval must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn sample_json() -> &'static str {
        r#"{
            "grid": { "nx": 64, "ny": 64, "nz": 32, "dh": 100.0 },
            "time": { "tmax": 0.0475, "dt": 0.005 },
            "decomposition": { "px": 2, "py": 2 },
            "padding": { "align": 4 },
            "boundary": { "nd": 4 },
            "recording": {
                "x": { "begin": 1, "end": -1, "skip": 2 },
                "y": { "begin": 3, "end": 61, "skip": 2 },
                "ntiskp": 5,
                "write_step": 2
            },
            "source": {
                "points": [{
                    "index": [30, 33, 5],
                    "moment": { "xx": 1e15, "yy": 1e15, "zz": 1e15, "xy": 0, "xz": 0, "yz": 0 },
                    "wavelet": { "kind": "ricker", "f0": 2.0, "t0": 0.5 }
                }]
            },
            "medium": { "kind": "homogeneous", "vp": 6000, "vs": 3464, "density": 2700 }
        }"#
    }

    #[test]
    fn test_parse_sample_config_with_defaults() {
        let cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        assert_eq!(cfg.run_name, "awp-run");
        assert_eq!(cfg.padding.loop_order, 1);
        assert_eq!(cfg.padding.align, 4);
        assert_eq!(cfg.recording.z, AxisRecording { begin: 1, end: 1, skip: 1 });
        assert_eq!(cfg.source.read_step_gpu, 1000);
        assert_eq!(cfg.nt(), 10);
        assert_eq!(cfg.nst(), 10);
        assert_eq!(cfg.ghost_width(), 4);
        cfg.validate().expect("sample config is valid");
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(sample_json().as_bytes()).expect("write");
        let cfg = RunConfig::from_file(file.path()).expect("load");
        let json = serde_json::to_string_pretty(&cfg).expect("serialize");
        let cfg2: RunConfig = serde_json::from_str(&json).expect("reparse");
        assert_eq!(cfg2.grid.nx, 64);
        assert_eq!(cfg2.recording.y, cfg.recording.y);
        assert_eq!(cfg2.source.points.len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RunConfig::from_file("/definitely/not/here.json").expect_err("must fail");
        assert!(matches!(err, AwpError::Io(_)));
    }

    #[test]
    fn test_rejects_indivisible_grid() {
        let mut cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        cfg.grid.nx = 66;
        cfg.decomposition.px = 4;
        let err = cfg.validate().expect_err("66 % 4 != 0");
        assert!(matches!(err, AwpError::Decomposition(_)));
    }

    #[test]
    fn test_rejects_too_thin_subdomain() {
        let mut cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        cfg.grid.nx = 28;
        cfg.decomposition.px = 4;
        cfg.boundary.nd = 2;
        let err = cfg.validate().expect_err("7 cells < 2 slabs of 4");
        assert!(matches!(err, AwpError::Decomposition(_)));
    }

    #[test]
    fn test_rejects_bad_recording_window() {
        let mut cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        cfg.recording.x = AxisRecording { begin: 10, end: 5, skip: 1 };
        assert!(matches!(cfg.validate(), Err(AwpError::Recording(_))));
        cfg.recording.x = AxisRecording { begin: 1, end: -1, skip: 0 };
        assert!(matches!(cfg.validate(), Err(AwpError::Recording(_))));
    }

    #[test]
    fn test_rejects_bad_time_and_sponge() {
        let mut cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        cfg.time.dt = 0.0;
        assert!(matches!(cfg.validate(), Err(AwpError::Config(_))));
        let mut cfg: RunConfig = serde_json::from_str(sample_json()).expect("parse");
        cfg.boundary.arbc = 1.5;
        assert!(matches!(cfg.validate(), Err(AwpError::Config(_))));
    }

    #[test]
    fn test_layered_medium_parses() {
        let json = r#"{ "kind": "layered", "layers": [
            { "top": 0, "vp": 4000, "vs": 2000, "density": 2200 },
            { "top": 10, "vp": 6000, "vs": 3464, "density": 2700, "qs": 80 }
        ] }"#;
        let medium: MediumConfig = serde_json::from_str(json).expect("parse");
        match medium {
            MediumConfig::Layered { layers } => {
                assert_eq!(layers.len(), 2);
                assert_eq!(layers[1].top, 10);
                assert!((layers[1].material.qs - 80.0).abs() < 1e-12);
                assert!((layers[0].material.qp - 100.0).abs() < 1e-12);
            }
            other => panic!("Unexpected medium: {other:?}"),
        }
    }
}
