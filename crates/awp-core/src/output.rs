// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Surface Output
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Snapshot ring buffer and the shared-file writer it drains into.

use crate::grid::{Grid3D, PaddedShape};
use crate::recording::{HyperslabLayout, RecordingRegion};
use awp_types::error::AwpResult;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::debug;

/// File prefix per velocity component.
pub const COMPONENT_PREFIX: [&str; 3] = ["SX", "SY", "SZ"];

/// `write_step` snapshots of the recorded sub-box, per component.
#[derive(Debug, Clone)]
pub struct SnapshotRing {
    region: RecordingRegion,
    layout: HyperslabLayout,
    buffers: [Vec<f32>; 3],
    pending: usize,
}

impl SnapshotRing {
    pub fn new(region: RecordingRegion, write_step: usize) -> Self {
        let layout = region.layout(write_step);
        let len = region.samples() * write_step;
        SnapshotRing {
            region,
            layout,
            buffers: [vec![0.0; len], vec![0.0; len], vec![0.0; len]],
            pending: 0,
        }
    }

    pub fn write_step(&self) -> usize {
        self.layout.write_step
    }

    pub fn layout(&self) -> &HyperslabLayout {
        &self.layout
    }

    pub fn buffers(&self) -> &[Vec<f32>; 3] {
        &self.buffers
    }

    /// Snapshots recorded since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Ring position of the snapshot taken at `step`.
    pub fn slot_for(&self, step: usize, ntiskp: usize) -> usize {
        let ws = self.write_step();
        (step / ntiskp + ws - 1) % ws
    }

    /// Whether filling `slot` completes the ring.
    pub fn is_full_after(&self, slot: usize) -> bool {
        slot + 1 == self.write_step()
    }

    /// Extract the recorded cells of u, v, w into `slot`, Z outermost and
    /// X fastest.
    pub fn record(&mut self, slot: usize, fields: [&Grid3D; 3], shape: &PaddedShape) {
        let strides = self.region.strides();
        let [ax, ay, az] = self.region.axes;
        let g0 = shape.padding.first_interior();
        let surface = shape.surface_k();
        let mut cursor = slot * self.region.samples();
        for dz in az.positions(strides[2]) {
            let k = surface - dz;
            for dy in ay.positions(strides[1]) {
                let j = g0 + dy;
                for dx in ax.positions(strides[0]) {
                    let i = g0 + dx;
                    for (buf, field) in self.buffers.iter_mut().zip(fields) {
                        buf[cursor] = field.data[[i, j, k]];
                    }
                    cursor += 1;
                }
            }
        }
        self.pending += 1;
    }

    /// Hand the ring to `writer` and start over.
    pub fn flush(&mut self, step: usize, writer: &mut dyn OutputWriter) -> AwpResult<()> {
        writer.write(step, &self.layout, &self.buffers)?;
        self.pending = 0;
        Ok(())
    }
}

/// Destination of a full snapshot ring.
pub trait OutputWriter: Send {
    fn write(&mut self, step: usize, layout: &HyperslabLayout, buffers: &[Vec<f32>; 3]) -> AwpResult<()>;
}

/// Discards everything; counts flushes.
#[derive(Debug, Default)]
pub struct NullWriter {
    pub flushes: usize,
}

impl OutputWriter for NullWriter {
    fn write(&mut self, _step: usize, _layout: &HyperslabLayout, _buffers: &[Vec<f32>; 3]) -> AwpResult<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// One file per component per flush, shared by all ranks. Each rank
/// writes its hyperslab runs at their absolute offsets.
#[derive(Debug, Clone)]
pub struct SharedFileWriter {
    dir: PathBuf,
    rank: usize,
}

impl SharedFileWriter {
    pub fn new(dir: impl Into<PathBuf>, rank: usize) -> Self {
        SharedFileWriter {
            dir: dir.into(),
            rank,
        }
    }

    pub fn path(&self, component: usize, step: usize) -> PathBuf {
        self.dir
            .join(format!("{}{step:07}", COMPONENT_PREFIX[component]))
    }
}

impl OutputWriter for SharedFileWriter {
    fn write(&mut self, step: usize, layout: &HyperslabLayout, buffers: &[Vec<f32>; 3]) -> AwpResult<()> {
        let runs = layout.runs();
        if runs.is_empty() && self.rank != 0 {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        for (c, buf) in buffers.iter().enumerate() {
            let path = self.path(c, step);
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            if self.rank == 0 {
                file.set_len(layout.file_bytes())?;
            }
            for (offset, start, len) in &runs {
                file.seek(SeekFrom::Start(offset.bytes()))?;
                file.write_all(bytemuck::cast_slice(&buf[*start..*start + *len]))?;
            }
            file.flush()?;
        }
        debug!(rank = self.rank, step, runs = runs.len(), dir = %self.dir.display(), "snapshot ring written");
        Ok(())
    }
}
