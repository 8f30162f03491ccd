// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Checkpoint Log
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Rank 0's plain-text run log: header, one velocity line per snapshot
//! at a fixed probe cell, `END` on normal completion.

use crate::grid::PaddedShape;
use crate::media::MediaStats;
use awp_types::config::AbsorbingScheme;
use awp_types::error::AwpResult;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Values written once at startup.
#[derive(Debug, Clone)]
pub struct CheckpointHeader {
    pub nodes: (usize, usize, usize),
    pub nt: usize,
    pub dh: f64,
    pub dt: f64,
    pub arbc: f64,
    pub stats: MediaStats,
    pub ntiskp: usize,
    pub scheme: AbsorbingScheme,
    pub attenuation: bool,
    pub fl: f64,
    pub fp: f64,
    pub fh: f64,
}

/// `%e` style: six decimals, signed two-digit exponent.
pub fn sci(v: f64) -> String {
    let s = format!("{v:.6e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s,
    }
}

impl CheckpointHeader {
    pub fn render(&self) -> String {
        let s = &self.stats;
        let (nx, ny, nz) = self.nodes;
        let scheme = match self.scheme {
            AbsorbingScheme::Cerjan => 0,
            AbsorbingScheme::None => -1,
        };
        let lines = [
            format!("STABILITY CRITERIA .5 > CMAX*DT/DX:\t{}", sci(s.stability(self.dt, self.dh))),
            format!("# OF X,Y,Z NODES PER PROC:\t{nx}, {ny}, {nz}"),
            format!("# OF TIME STEPS:\t{}", self.nt),
            format!("DISCRETIZATION IN SPACE:\t{}", sci(self.dh)),
            format!("DISCRETIZATION IN TIME:\t{}", sci(self.dt)),
            format!("ABSORBING BOUNDARY COEFFICIENT:\t{}", sci(self.arbc)),
            format!("HIGHEST P-VELOCITY ENCOUNTERED:\t{}", sci(s.vp_max)),
            format!("LOWEST P-VELOCITY ENCOUNTERED:\t{}", sci(s.vp_min)),
            format!("HIGHEST S-VELOCITY ENCOUNTERED:\t{}", sci(s.vs_max)),
            format!("LOWEST S-VELOCITY ENCOUNTERED:\t{}", sci(s.vs_min)),
            format!("HIGHEST DENSITY ENCOUNTERED:\t{}", sci(s.rho_max)),
            format!("LOWEST DENSITY ENCOUNTERED:\t{}", sci(s.rho_min)),
            format!("SKIP OF SEISMOGRAMS IN TIME (LOOP COUNTER):\t{}", self.ntiskp),
            format!("ABC CONDITION, CERJAN=0 OR NONE=-1:\t{scheme}"),
            format!("FD SCHEME, VISCO=1 OR ELASTIC=0:\t{}", u8::from(self.attenuation)),
            format!("Q, FL,FP,FH:\t{}, {}, {}", sci(self.fl), sci(self.fp), sci(self.fh)),
        ];
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

pub struct CheckpointWriter {
    path: PathBuf,
    file: BufWriter<File>,
    probe: [usize; 3],
}

impl CheckpointWriter {
    /// Open `path` for appending and write the header.
    pub fn create(path: impl AsRef<Path>, header: &CheckpointHeader, probe: [usize; 3]) -> AwpResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut file = BufWriter::new(file);
        file.write_all(header.render().as_bytes())?;
        file.flush()?;
        Ok(CheckpointWriter { path, file, probe })
    }

    /// Local cell `(nd + first x, nd + first y, nd below the surface)`.
    pub fn probe_cell(shape: &PaddedShape, nd: usize) -> [usize; 3] {
        let g0 = shape.padding.first_interior();
        let depth = nd.min(shape.nzt - 1);
        [
            (g0 + nd).min(g0 + shape.nxt - 1),
            (g0 + nd).min(g0 + shape.nyt - 1),
            shape.surface_k() - depth,
        ]
    }

    pub fn probe(&self) -> [usize; 3] {
        self.probe
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, step: usize, u: f32, v: f32, w: f32) -> AwpResult<()> {
        writeln!(
            self.file,
            "{step} :\t{}\t{}\t{}",
            sci(u as f64),
            sci(v as f64),
            sci(w as f64)
        )?;
        self.file.flush()?;
        Ok(())
    }

    /// Trailing sentinel of a completed run.
    pub fn finish(mut self) -> AwpResult<()> {
        self.file.write_all(b"END\n")?;
        self.file.flush()?;
        Ok(())
    }
}
