// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — CPU Reference Device
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Host-memory implementation of [`Accelerator`].
//!
//! Every operation runs eagerly when enqueued; streams are labels only.
//! Invalid launches do not fail the call, they set a sticky error that
//! the engine picks up through `take_last_error`, the same way an
//! asynchronous device reports faults.

use crate::device::{
    staged_len, Accelerator, FieldId, FieldLayout, HostBuffer, KernelConstants, KernelLaunch,
    PinnedBuffer, StreamId,
};
use crate::grid::Region3;
use crate::kernels::{
    add_point_source, check_region, update_stress, update_velocity, MaterialFields, WaveFields,
};
use crate::profiling::{KernelKind, ProfilingContext};
use crate::source::SourceWindow;
use awp_types::error::{AwpError, AwpResult};
use tracing::trace;

/// Journal entry, one per trait call that touches device state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    Allocate { fields: usize },
    Upload(FieldId),
    Download(FieldId),
    ToPinned { stream: StreamId, fields: Vec<FieldId>, region: Region3 },
    WaitPinned(StreamId),
    FromPinned { stream: StreamId, fields: Vec<FieldId>, region: Region3 },
    UploadSources { start: usize, len: usize },
    Launch { stream: StreamId, launch: KernelLaunch },
    Synchronize(StreamId),
    SynchronizeAll,
}

struct CpuState {
    layout: FieldLayout,
    constants: KernelConstants,
    wave: WaveFields,
    media: MaterialFields,
}

#[derive(Default)]
pub struct CpuDevice {
    state: Option<CpuState>,
    window: Option<SourceWindow>,
    journal: Vec<DeviceOp>,
    fault: Option<String>,
    last_error: Option<String>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> &[DeviceOp] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Make the next kernel launch fail with `message` instead of running.
    pub fn poison(&mut self, message: impl Into<String>) {
        self.fault = Some(message.into());
    }

    /// Direct read access for tests and diagnostics.
    pub fn wave(&self) -> Option<&WaveFields> {
        self.state.as_ref().map(|s| &s.wave)
    }

    fn state(&self) -> AwpResult<&CpuState> {
        self.state
            .as_ref()
            .ok_or_else(|| AwpError::Device("CPU device used before allocate".to_string()))
    }

    fn state_mut(&mut self) -> AwpResult<&mut CpuState> {
        self.state
            .as_mut()
            .ok_or_else(|| AwpError::Device("CPU device used before allocate".to_string()))
    }

    fn record_error(&mut self, message: String) {
        // first error wins until read
        if self.last_error.is_none() {
            self.last_error = Some(message);
        }
    }

    fn execute(&mut self, launch: &KernelLaunch) -> Result<(), String> {
        let state = self.state.as_mut().ok_or("launch before allocate")?;
        let dth = state.constants.dth;
        match launch {
            KernelLaunch::Velocity(region) => {
                check_region(region, &state.layout.shape).map_err(|e| e.to_string())?;
                update_velocity(&mut state.wave, &state.media, region, dth);
            }
            KernelLaunch::Stress(region) => {
                check_region(region, &state.layout.shape).map_err(|e| e.to_string())?;
                update_stress(&mut state.wave, &state.media, region, dth);
            }
            KernelLaunch::AddSource { sample } => {
                let window = self.window.as_ref().ok_or("source launch without window")?;
                for (n, cell) in window.points.iter().enumerate() {
                    let moment = window.moment(n, *sample).ok_or_else(|| {
                        format!(
                            "sample {sample} outside resident window [{}, {})",
                            window.start,
                            window.start + window.len
                        )
                    })?;
                    add_point_source(&mut state.wave, *cell, moment, window.scale);
                }
            }
        }
        Ok(())
    }
}

fn slice_of<'a>(state: &'a CpuState, field: FieldId) -> AwpResult<&'a [f32]> {
    if let Some(g) = state.wave.grid(field).or_else(|| state.media.grid(field)) {
        return g.as_slice();
    }
    if let Some(p) = state.media.profile(field) {
        return p.as_slice();
    }
    Err(AwpError::Device(format!("{} is not allocated", field.label())))
}

fn slice_of_mut(state: &mut CpuState, field: FieldId) -> AwpResult<&mut [f32]> {
    if FieldId::SPONGE.contains(&field) {
        let p = state
            .media
            .profile_mut(field)
            .ok_or_else(|| AwpError::Device(format!("{} is not allocated", field.label())))?;
        let label = p.label;
        return p
            .data
            .as_slice_mut()
            .ok_or_else(|| AwpError::Layout(format!("{label} is not contiguous")));
    }
    let grid = match state.wave.grid_mut(field) {
        Some(g) => g,
        None => state
            .media
            .grid_mut(field)
            .ok_or_else(|| AwpError::Device(format!("{} is not allocated", field.label())))?,
    };
    grid.as_mut_slice()
}

impl Accelerator for CpuDevice {
    type Pinned = HostBuffer;

    fn name(&self) -> String {
        format!("cpu ({} threads)", rayon::current_num_threads())
    }

    fn allocate(
        &mut self,
        layout: &FieldLayout,
        constants: KernelConstants,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()> {
        let fields = layout.fields();
        for f in &fields {
            profiling.record_array(f.label(), layout.bytes(*f));
        }
        for kind in [KernelKind::Velocity, KernelKind::Stress, KernelKind::AddSource] {
            profiling.record_dependencies(kind, layout.dependencies(kind).iter().map(|f| f.label()));
        }
        self.state = Some(CpuState {
            layout: *layout,
            constants,
            wave: WaveFields::zeros(&layout.shape, layout.attenuation),
            media: MaterialFields::blank(&layout.shape, layout.attenuation),
        });
        self.journal.push(DeviceOp::Allocate {
            fields: fields.len(),
        });
        Ok(())
    }

    fn alloc_pinned(
        &mut self,
        label: &str,
        len: usize,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<HostBuffer> {
        profiling.record_array(label, (len * std::mem::size_of::<f32>()) as u64);
        Ok(HostBuffer(vec![0.0; len]))
    }

    fn upload(&mut self, field: FieldId, data: &[f32]) -> AwpResult<()> {
        let state = self.state_mut()?;
        state.layout.check(field, data.len())?;
        slice_of_mut(state, field)?.copy_from_slice(data);
        self.journal.push(DeviceOp::Upload(field));
        Ok(())
    }

    fn download(&mut self, field: FieldId, out: &mut [f32]) -> AwpResult<()> {
        let state = self.state()?;
        state.layout.check(field, out.len())?;
        out.copy_from_slice(slice_of(state, field)?);
        self.journal.push(DeviceOp::Download(field));
        Ok(())
    }

    fn enqueue_to_pinned(
        &mut self,
        stream: StreamId,
        fields: &[FieldId],
        region: &Region3,
        dst: &mut HostBuffer,
    ) -> AwpResult<()> {
        let state = self.state()?;
        if dst.len() != staged_len(fields, region) || !region.fits(&state.layout.shape) {
            return Err(AwpError::Device(format!(
                "pinned copy of {region:?} × {} fields into buffer of {}",
                fields.len(),
                dst.len()
            )));
        }
        let n = region.len();
        for (f, chunk) in fields.iter().zip(dst.host_mut().chunks_mut(n.max(1))) {
            let grid = state
                .wave
                .grid(*f)
                .or_else(|| state.media.grid(*f))
                .ok_or_else(|| AwpError::Device(format!("{} is not a 3D field", f.label())))?;
            for (d, s) in chunk.iter_mut().zip(grid.region(region).iter()) {
                *d = *s;
            }
        }
        self.journal.push(DeviceOp::ToPinned {
            stream,
            fields: fields.to_vec(),
            region: region.clone(),
        });
        Ok(())
    }

    fn wait_pinned(&mut self, stream: StreamId, _dst: &mut HostBuffer) -> AwpResult<()> {
        self.journal.push(DeviceOp::WaitPinned(stream));
        Ok(())
    }

    fn enqueue_from_pinned(
        &mut self,
        stream: StreamId,
        src: &HostBuffer,
        fields: &[FieldId],
        region: &Region3,
    ) -> AwpResult<()> {
        let state = self.state_mut()?;
        if src.len() != staged_len(fields, region) || !region.fits(&state.layout.shape) {
            return Err(AwpError::Device(format!(
                "pinned copy of buffer of {} into {region:?} × {} fields",
                src.len(),
                fields.len()
            )));
        }
        let n = region.len();
        for (f, chunk) in fields.iter().zip(src.host().chunks(n.max(1))) {
            let grid = match state.wave.grid_mut(*f) {
                Some(g) => g,
                None => state
                    .media
                    .grid_mut(*f)
                    .ok_or_else(|| AwpError::Device(format!("{} is not a 3D field", f.label())))?,
            };
            for (d, s) in grid.region_mut(region).iter_mut().zip(chunk) {
                *d = *s;
            }
        }
        self.journal.push(DeviceOp::FromPinned {
            stream,
            fields: fields.to_vec(),
            region: region.clone(),
        });
        Ok(())
    }

    fn upload_sources(&mut self, window: &SourceWindow) -> AwpResult<()> {
        self.journal.push(DeviceOp::UploadSources {
            start: window.start,
            len: window.len,
        });
        self.window = Some(window.clone());
        Ok(())
    }

    fn launch(
        &mut self,
        stream: StreamId,
        launch: KernelLaunch,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()> {
        profiling.record_launch(launch.kind());
        trace!(?stream, ?launch, "cpu launch");
        if let Some(fault) = self.fault.take() {
            self.record_error(fault);
        } else if let Err(message) = self.execute(&launch) {
            self.record_error(message);
        }
        self.journal.push(DeviceOp::Launch { stream, launch });
        Ok(())
    }

    fn synchronize(&mut self, stream: StreamId) -> AwpResult<()> {
        self.journal.push(DeviceOp::Synchronize(stream));
        Ok(())
    }

    fn synchronize_all(&mut self) -> AwpResult<()> {
        self.journal.push(DeviceOp::SynchronizeAll);
        Ok(())
    }

    fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}
