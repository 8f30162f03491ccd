// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — GPU Backend
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! wgpu implementation of [`Accelerator`].
//!
//! All fields share one storage buffer ("arena"); a small offset table
//! tells the shader where each field starts. wgpu exposes a single
//! queue, so streams are ordering labels and every submission runs in
//! order. Slab copies go through a `MAP_READ` buffer owned by each
//! pinned buffer; uploads use `Queue::write_buffer`.
//!
//! Validation errors raised asynchronously by the driver are captured
//! and surface through `take_last_error`.

use awp_core::device::{
    staged_len, Accelerator, FieldId, FieldLayout, KernelConstants, KernelLaunch, PinnedBuffer,
    StreamId,
};
use awp_core::grid::Region3;
use awp_core::kernels::check_region;
use awp_core::profiling::{KernelKind, ProfilingContext};
use awp_core::source::SourceWindow;
use awp_types::error::{AwpError, AwpResult};
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, trace};

/// Slots in the field offset table, one per [`FieldId`].
pub const FIELD_SLOTS: usize = 25;

const WORKGROUP: u32 = 64;
const MAX_GROUPS_X: u32 = 65_535;
const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Uniform parameters of one kernel launch.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GpuParams {
    dims: [u32; 4],
    lo: [u32; 4],
    hi: [u32; 4],
    dth: f32,
    attenuation: u32,
    npsrc: u32,
    sample: u32,
    window: u32,
    scale: f32,
    _pad: [u32; 2],
}

/// Element offset of every allocated field inside the arena, plus the
/// arena length. Unallocated fields keep offset 0 and are never read.
pub fn arena_offsets(layout: &FieldLayout) -> AwpResult<([u32; FIELD_SLOTS], usize)> {
    let mut offs = [0u32; FIELD_SLOTS];
    let mut next = 0usize;
    for f in layout.fields() {
        offs[f as usize] = u32::try_from(next).map_err(|_| {
            AwpError::Device(format!("arena offset of {} exceeds u32 addressing", f.label()))
        })?;
        next += layout.len(f);
    }
    u32::try_from(next)
        .map_err(|_| AwpError::Device(format!("arena of {next} values exceeds u32 addressing")))?;
    Ok((offs, next))
}

/// Workgroup grid covering `cells` invocations of [`WORKGROUP`] threads.
pub fn dispatch_size(cells: usize) -> (u32, u32) {
    let groups = cells.div_ceil(WORKGROUP as usize).max(1) as u32;
    if groups <= MAX_GROUPS_X {
        (groups, 1)
    } else {
        (MAX_GROUPS_X, groups.div_ceil(MAX_GROUPS_X))
    }
}

fn adapter_options() -> wgpu::RequestAdapterOptions<'static, 'static> {
    wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }
}

/// Check if a GPU adapter is available without creating a device.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::default();
    pollster::block_on(instance.request_adapter(&adapter_options())).is_some()
}

/// Get GPU adapter info string.
pub fn gpu_info() -> Option<String> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&adapter_options()))?;
    let info = adapter.get_info();
    Some(format!(
        "{} ({:?}, {:?})",
        info.name, info.backend, info.device_type
    ))
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage(read_only: bool) -> wgpu::BufferBindingType {
    wgpu::BufferBindingType::Storage { read_only }
}

/// Host staging memory paired with a device readback buffer.
pub struct WgpuPinned {
    host: Vec<f32>,
    readback: wgpu::Buffer,
    pending: bool,
}

impl PinnedBuffer for WgpuPinned {
    fn host(&self) -> &[f32] {
        &self.host
    }
    fn host_mut(&mut self) -> &mut [f32] {
        &mut self.host
    }
}

#[derive(Debug, Clone, Copy)]
struct ResidentWindow {
    start: usize,
    len: usize,
    npsrc: usize,
    scale: f32,
}

struct Resident {
    layout: FieldLayout,
    constants: KernelConstants,
    offsets: [u32; FIELD_SLOTS],
    arena: wgpu::Buffer,
    offset_table: wgpu::Buffer,
    src_cells: wgpu::Buffer,
    src_values: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    window: Option<ResidentWindow>,
}

impl Resident {
    fn byte_offset(&self, field: FieldId, element: usize) -> u64 {
        (self.offsets[field as usize] as u64 + element as u64) * F32_BYTES
    }

    fn check_volume(&self, field: FieldId) -> AwpResult<()> {
        if !self.layout.contains(field) || FieldId::SPONGE.contains(&field) {
            return Err(AwpError::Device(format!("{} is not a 3D field", field.label())));
        }
        Ok(())
    }
}

/// GPU device driving the elastic kernels through wgpu compute shaders.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_layout: wgpu::BindGroupLayout,
    velocity: wgpu::ComputePipeline,
    stress: wgpu::ComputePipeline,
    add_source: wgpu::ComputePipeline,
    params: wgpu::Buffer,
    resident: Option<Resident>,
    errors: Arc<Mutex<Option<String>>>,
}

impl WgpuDevice {
    /// Open the default high-performance adapter and build the pipelines.
    ///
    /// Returns `Err` if no suitable GPU adapter is found.
    pub fn new() -> AwpResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&adapter_options()))
            .ok_or_else(|| AwpError::Device("No suitable GPU adapter found".to_string()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("awp-gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| AwpError::Device(format!("GPU device request failed: {e}")))?;

        let errors: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |e: wgpu::Error| {
            let mut slot = sink.lock();
            if slot.is_none() {
                *slot = Some(e.to_string());
            }
        }));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("elastic"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("elastic.wgsl"))),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("elastic_layout"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Uniform),
                buffer_entry(1, storage(false)),
                buffer_entry(2, storage(true)),
                buffer_entry(3, storage(true)),
                buffer_entry(4, storage(true)),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("elastic_pipeline_layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let velocity = pipeline("velocity");
        let stress = pipeline("stress");
        let add_source = pipeline("add_source");

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: std::mem::size_of::<GpuParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        debug!(adapter = %adapter_name, "wgpu device ready");
        Ok(Self {
            device,
            queue,
            adapter_name,
            bind_layout,
            velocity,
            stress,
            add_source,
            params,
            resident: None,
            errors,
        })
    }

    fn resident(&self) -> AwpResult<&Resident> {
        self.resident
            .as_ref()
            .ok_or_else(|| AwpError::Device("GPU device used before allocate".to_string()))
    }

    fn record_error(&self, message: String) {
        let mut slot = self.errors.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn storage_buffer(&self, label: &str, bytes: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes.max(16),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn readback_buffer(&self, label: &str, len: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (len.max(1) as u64) * F32_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn bind_group(
        &self,
        arena: &wgpu::Buffer,
        offset_table: &wgpu::Buffer,
        src_cells: &wgpu::Buffer,
        src_values: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
            wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            }
        }
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("elastic_bind_group"),
            layout: &self.bind_layout,
            entries: &[
                entry(0, &self.params),
                entry(1, arena),
                entry(2, offset_table),
                entry(3, src_cells),
                entry(4, src_values),
            ],
        })
    }

    /// Map `buffer`, copy its first `out.len()` values into `out`, unmap.
    fn read_mapped(&self, buffer: &wgpu::Buffer, out: &mut [f32]) -> AwpResult<()> {
        let bytes = out.len() as u64 * F32_BYTES;
        let slice = buffer.slice(..bytes);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| AwpError::Device(format!("GPU readback channel error: {e}")))?
            .map_err(|e| AwpError::Device(format!("GPU buffer map failed: {e}")))?;
        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }
        buffer.unmap();
        Ok(())
    }

    fn params_for(&self, r: &Resident) -> GpuParams {
        let (px, py, pz) = r.layout.shape.dims();
        GpuParams {
            dims: [px as u32, py as u32, pz as u32, 0],
            lo: [0; 4],
            hi: [0; 4],
            dth: r.constants.dth,
            attenuation: u32::from(r.constants.attenuation),
            npsrc: 0,
            sample: 0,
            window: 0,
            scale: 0.0,
            _pad: [0; 2],
        }
    }

    fn submit(&self, pipeline: &wgpu::ComputePipeline, params: &GpuParams, groups: (u32, u32)) -> AwpResult<()> {
        let r = self.resident()?;
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(params));
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("elastic_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("elastic_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &r.bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn launch_region(&self, pipeline: &wgpu::ComputePipeline, region: &Region3) -> AwpResult<()> {
        let r = self.resident()?;
        if let Err(e) = check_region(region, &r.layout.shape) {
            self.record_error(e.to_string());
            return Ok(());
        }
        if region.is_empty() {
            return Ok(());
        }
        let mut params = self.params_for(r);
        params.lo = [region.x.start as u32, region.y.start as u32, region.z.start as u32, 0];
        params.hi = [region.x.end as u32, region.y.end as u32, region.z.end as u32, 0];
        self.submit(pipeline, &params, dispatch_size(region.len()))
    }

    fn launch_source(&self, sample: usize) -> AwpResult<()> {
        let r = self.resident()?;
        let Some(w) = r.window else {
            self.record_error("source launch without window".to_string());
            return Ok(());
        };
        if sample < w.start || sample >= w.start + w.len {
            self.record_error(format!(
                "sample {sample} outside resident window [{}, {})",
                w.start,
                w.start + w.len
            ));
            return Ok(());
        }
        if w.npsrc == 0 {
            return Ok(());
        }
        let mut params = self.params_for(r);
        params.npsrc = w.npsrc as u32;
        params.sample = (sample - w.start) as u32;
        params.window = w.len as u32;
        params.scale = w.scale;
        self.submit(&self.add_source, &params, (1, 1))
    }
}

impl Accelerator for WgpuDevice {
    type Pinned = WgpuPinned;

    fn name(&self) -> String {
        format!("wgpu ({})", self.adapter_name)
    }

    fn allocate(
        &mut self,
        layout: &FieldLayout,
        constants: KernelConstants,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()> {
        let (offsets, total) = arena_offsets(layout)?;
        let bytes = total as u64 * F32_BYTES;
        let limit = self.device.limits().max_storage_buffer_binding_size as u64;
        if bytes > limit {
            return Err(AwpError::Device(format!(
                "field arena of {bytes} bytes exceeds the adapter binding limit of {limit}"
            )));
        }
        for f in layout.fields() {
            profiling.record_array(f.label(), layout.bytes(f));
        }
        for kind in [KernelKind::Velocity, KernelKind::Stress, KernelKind::AddSource] {
            profiling.record_dependencies(kind, layout.dependencies(kind).iter().map(|f| f.label()));
        }

        let arena = self.storage_buffer("arena", bytes);
        let offset_table = self.storage_buffer("offsets", (FIELD_SLOTS as u64) * 4);
        self.queue
            .write_buffer(&offset_table, 0, bytemuck::cast_slice(&offsets));
        let src_cells = self.storage_buffer("src_cells", 0);
        let src_values = self.storage_buffer("src_values", 0);
        let bind_group = self.bind_group(&arena, &offset_table, &src_cells, &src_values);

        debug!(fields = layout.fields().len(), bytes, "gpu arena allocated");
        self.resident = Some(Resident {
            layout: *layout,
            constants,
            offsets,
            arena,
            offset_table,
            src_cells,
            src_values,
            bind_group,
            window: None,
        });
        Ok(())
    }

    fn alloc_pinned(
        &mut self,
        label: &str,
        len: usize,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<WgpuPinned> {
        profiling.record_array(label, len as u64 * F32_BYTES);
        Ok(WgpuPinned {
            host: vec![0.0; len],
            readback: self.readback_buffer(label, len),
            pending: false,
        })
    }

    fn upload(&mut self, field: FieldId, data: &[f32]) -> AwpResult<()> {
        let r = self.resident()?;
        r.layout.check(field, data.len())?;
        self.queue
            .write_buffer(&r.arena, r.byte_offset(field, 0), bytemuck::cast_slice(data));
        Ok(())
    }

    fn download(&mut self, field: FieldId, out: &mut [f32]) -> AwpResult<()> {
        let r = self.resident()?;
        r.layout.check(field, out.len())?;
        let staging = self.readback_buffer(field.label(), out.len());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("download_encoder"),
            });
        encoder.copy_buffer_to_buffer(
            &r.arena,
            r.byte_offset(field, 0),
            &staging,
            0,
            out.len() as u64 * F32_BYTES,
        );
        self.queue.submit(Some(encoder.finish()));
        self.read_mapped(&staging, out)
    }

    fn enqueue_to_pinned(
        &mut self,
        stream: StreamId,
        fields: &[FieldId],
        region: &Region3,
        dst: &mut WgpuPinned,
    ) -> AwpResult<()> {
        let r = self.resident()?;
        if dst.len() != staged_len(fields, region) || !region.fits(&r.layout.shape) {
            return Err(AwpError::Device(format!(
                "pinned copy of {region:?} × {} fields into buffer of {}",
                fields.len(),
                dst.len()
            )));
        }
        let runs = region.runs(&r.layout.shape);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("to_pinned"),
            });
        let mut cursor = 0u64;
        for f in fields {
            r.check_volume(*f)?;
            for (off, len) in &runs {
                let bytes = *len as u64 * F32_BYTES;
                encoder.copy_buffer_to_buffer(&r.arena, r.byte_offset(*f, *off), &dst.readback, cursor, bytes);
                cursor += bytes;
            }
        }
        self.queue.submit(Some(encoder.finish()));
        dst.pending = true;
        trace!(?stream, fields = fields.len(), "slab queued to pinned");
        Ok(())
    }

    fn wait_pinned(&mut self, _stream: StreamId, dst: &mut WgpuPinned) -> AwpResult<()> {
        if !dst.pending {
            return Ok(());
        }
        self.read_mapped(&dst.readback, &mut dst.host)?;
        dst.pending = false;
        Ok(())
    }

    fn enqueue_from_pinned(
        &mut self,
        stream: StreamId,
        src: &WgpuPinned,
        fields: &[FieldId],
        region: &Region3,
    ) -> AwpResult<()> {
        let r = self.resident()?;
        if src.len() != staged_len(fields, region) || !region.fits(&r.layout.shape) {
            return Err(AwpError::Device(format!(
                "pinned copy of buffer of {} into {region:?} × {} fields",
                src.len(),
                fields.len()
            )));
        }
        let runs = region.runs(&r.layout.shape);
        let mut cursor = 0usize;
        for f in fields {
            r.check_volume(*f)?;
            for (off, len) in &runs {
                let chunk = &src.host[cursor..cursor + len];
                self.queue
                    .write_buffer(&r.arena, r.byte_offset(*f, *off), bytemuck::cast_slice(chunk));
                cursor += len;
            }
        }
        trace!(?stream, fields = fields.len(), "slab queued from pinned");
        Ok(())
    }

    fn upload_sources(&mut self, window: &SourceWindow) -> AwpResult<()> {
        let mut r = self
            .resident
            .take()
            .ok_or_else(|| AwpError::Device("GPU device used before allocate".to_string()))?;
        let shape = r.layout.shape;
        let cells: Vec<u32> = window
            .points
            .iter()
            .map(|[i, j, k]| shape.offset(*i, *j, *k) as u32)
            .collect();
        let cell_bytes = cells.len() as u64 * 4;
        let value_bytes = window.values.len() as u64 * F32_BYTES;

        let mut rebind = false;
        if cell_bytes > r.src_cells.size() {
            r.src_cells = self.storage_buffer("src_cells", cell_bytes);
            rebind = true;
        }
        if value_bytes > r.src_values.size() {
            r.src_values = self.storage_buffer("src_values", value_bytes);
            rebind = true;
        }
        if rebind {
            r.bind_group = self.bind_group(&r.arena, &r.offset_table, &r.src_cells, &r.src_values);
        }
        if !cells.is_empty() {
            self.queue
                .write_buffer(&r.src_cells, 0, bytemuck::cast_slice(&cells));
            self.queue
                .write_buffer(&r.src_values, 0, bytemuck::cast_slice(&window.values));
        }
        r.window = Some(ResidentWindow {
            start: window.start,
            len: window.len,
            npsrc: window.npsrc(),
            scale: window.scale,
        });
        self.resident = Some(r);
        Ok(())
    }

    fn launch(
        &mut self,
        stream: StreamId,
        launch: KernelLaunch,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()> {
        profiling.record_launch(launch.kind());
        trace!(?stream, ?launch, "wgpu launch");
        match &launch {
            KernelLaunch::Velocity(region) => self.launch_region(&self.velocity, region),
            KernelLaunch::Stress(region) => self.launch_region(&self.stress, region),
            KernelLaunch::AddSource { sample } => self.launch_source(*sample),
        }
    }

    fn synchronize(&mut self, _stream: StreamId) -> AwpResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn synchronize_all(&mut self) -> AwpResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn take_last_error(&mut self) -> Option<String> {
        self.errors.lock().take()
    }
}
