// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Accelerator Interface
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Contract between the timestep engine and an accelerator backend.
//!
//! Work is issued onto a small fixed set of streams. A backend may run
//! it eagerly or queue it; the engine never relies on anything finished
//! until the matching `wait_pinned` / `synchronize` call returns.

use crate::grid::{PaddedShape, Region3};
use crate::profiling::{KernelKind, ProfilingContext};
use crate::source::SourceWindow;
use awp_types::error::{AwpError, AwpResult};

/// Every device-resident array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    U,
    V,
    W,
    Xx,
    Yy,
    Zz,
    Xy,
    Xz,
    Yz,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    Density,
    Lambda,
    Mu,
    Qp,
    Qs,
    Tau1,
    Tau2,
    DcrjX,
    DcrjY,
    DcrjZ,
}

impl FieldId {
    pub const VELOCITY: [FieldId; 3] = [FieldId::U, FieldId::V, FieldId::W];
    pub const STRESS: [FieldId; 6] = [
        FieldId::Xx,
        FieldId::Yy,
        FieldId::Zz,
        FieldId::Xy,
        FieldId::Xz,
        FieldId::Yz,
    ];
    pub const MEMORY: [FieldId; 6] = [
        FieldId::R1,
        FieldId::R2,
        FieldId::R3,
        FieldId::R4,
        FieldId::R5,
        FieldId::R6,
    ];
    pub const ELASTIC: [FieldId; 3] = [FieldId::Density, FieldId::Lambda, FieldId::Mu];
    pub const ANELASTIC: [FieldId; 4] = [FieldId::Qp, FieldId::Qs, FieldId::Tau1, FieldId::Tau2];
    pub const SPONGE: [FieldId; 3] = [FieldId::DcrjX, FieldId::DcrjY, FieldId::DcrjZ];

    pub fn label(self) -> &'static str {
        match self {
            FieldId::U => "u1",
            FieldId::V => "v1",
            FieldId::W => "w1",
            FieldId::Xx => "xx",
            FieldId::Yy => "yy",
            FieldId::Zz => "zz",
            FieldId::Xy => "xy",
            FieldId::Xz => "xz",
            FieldId::Yz => "yz",
            FieldId::R1 => "r1",
            FieldId::R2 => "r2",
            FieldId::R3 => "r3",
            FieldId::R4 => "r4",
            FieldId::R5 => "r5",
            FieldId::R6 => "r6",
            FieldId::Density => "d1",
            FieldId::Lambda => "lam",
            FieldId::Mu => "mu",
            FieldId::Qp => "qp",
            FieldId::Qs => "qs",
            FieldId::Tau1 => "tau1",
            FieldId::Tau2 => "tau2",
            FieldId::DcrjX => "dcrjx",
            FieldId::DcrjY => "dcrjy",
            FieldId::DcrjZ => "dcrjz",
        }
    }
}

/// Which arrays a rank allocates and how long each one is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub shape: PaddedShape,
    pub attenuation: bool,
}

impl FieldLayout {
    pub fn new(shape: PaddedShape, attenuation: bool) -> Self {
        FieldLayout { shape, attenuation }
    }

    /// Allocated fields in a fixed order.
    pub fn fields(&self) -> Vec<FieldId> {
        let mut out: Vec<FieldId> = FieldId::VELOCITY
            .iter()
            .chain(FieldId::STRESS.iter())
            .copied()
            .collect();
        if self.attenuation {
            out.extend(FieldId::MEMORY);
        }
        out.extend(FieldId::ELASTIC);
        if self.attenuation {
            out.extend(FieldId::ANELASTIC);
        }
        out.extend(FieldId::SPONGE);
        out
    }

    pub fn contains(&self, field: FieldId) -> bool {
        self.attenuation
            || !(FieldId::MEMORY.contains(&field) || FieldId::ANELASTIC.contains(&field))
    }

    /// Element count of `field`.
    pub fn len(&self, field: FieldId) -> usize {
        let (px, py, pz) = self.shape.dims();
        match field {
            FieldId::DcrjX => px,
            FieldId::DcrjY => py,
            FieldId::DcrjZ => pz,
            _ => px * py * pz,
        }
    }

    pub fn bytes(&self, field: FieldId) -> u64 {
        (self.len(field) * std::mem::size_of::<f32>()) as u64
    }

    pub fn check(&self, field: FieldId, len: usize) -> AwpResult<()> {
        if !self.contains(field) {
            return Err(AwpError::Device(format!(
                "{} is not allocated in this layout",
                field.label()
            )));
        }
        if len != self.len(field) {
            return Err(AwpError::Device(format!(
                "{}: expected {} values, got {len}",
                field.label(),
                self.len(field)
            )));
        }
        Ok(())
    }

    /// Arrays each kernel reads or writes, for the profiling registry.
    pub fn dependencies(&self, kernel: KernelKind) -> Vec<FieldId> {
        match kernel {
            KernelKind::Velocity => {
                let mut d = FieldId::VELOCITY.to_vec();
                d.extend(FieldId::STRESS);
                d.push(FieldId::Density);
                d.extend(FieldId::SPONGE);
                d
            }
            KernelKind::Stress => {
                let mut d = self.fields();
                d.retain(|f| *f != FieldId::Density);
                d
            }
            KernelKind::AddSource => FieldId::STRESS.to_vec(),
        }
    }
}

/// Scalars every kernel needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelConstants {
    /// dt / dh
    pub dth: f32,
    pub attenuation: bool,
}

/// Execution streams. One for compute plus one per exchange side so the
/// four slab copies can overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    Compute,
    Left,
    Right,
    Front,
    Back,
}

impl StreamId {
    pub const ALL: [StreamId; 5] = [
        StreamId::Compute,
        StreamId::Left,
        StreamId::Right,
        StreamId::Front,
        StreamId::Back,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelLaunch {
    /// Velocity update over a region.
    Velocity(Region3),
    /// Stress (and memory-variable) update over a region.
    Stress(Region3),
    /// Subtract source sample `sample` at every uploaded point.
    AddSource { sample: usize },
}

impl KernelLaunch {
    pub fn kind(&self) -> KernelKind {
        match self {
            KernelLaunch::Velocity(_) => KernelKind::Velocity,
            KernelLaunch::Stress(_) => KernelKind::Stress,
            KernelLaunch::AddSource { .. } => KernelKind::AddSource,
        }
    }
}

/// Host staging buffer reachable by the device copy engine.
pub trait PinnedBuffer: Send {
    fn host(&self) -> &[f32];
    fn host_mut(&mut self) -> &mut [f32];
    fn len(&self) -> usize {
        self.host().len()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain host memory, for backends whose "device" is the host.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer(pub Vec<f32>);

impl PinnedBuffer for HostBuffer {
    fn host(&self) -> &[f32] {
        &self.0
    }
    fn host_mut(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

pub trait Accelerator: Send {
    type Pinned: PinnedBuffer;

    fn name(&self) -> String;

    /// Allocate every field of `layout`, zero-filled. Called once per run.
    fn allocate(
        &mut self,
        layout: &FieldLayout,
        constants: KernelConstants,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()>;

    fn alloc_pinned(
        &mut self,
        label: &str,
        len: usize,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<Self::Pinned>;

    /// Blocking whole-field copy host → device.
    fn upload(&mut self, field: FieldId, data: &[f32]) -> AwpResult<()>;

    /// Blocking whole-field copy device → host.
    fn download(&mut self, field: FieldId, out: &mut [f32]) -> AwpResult<()>;

    /// Queue a copy of `region` of each field, back to back, into `dst`.
    fn enqueue_to_pinned(
        &mut self,
        stream: StreamId,
        fields: &[FieldId],
        region: &Region3,
        dst: &mut Self::Pinned,
    ) -> AwpResult<()>;

    /// Block until the copy queued into `dst` on `stream` has landed.
    fn wait_pinned(&mut self, stream: StreamId, dst: &mut Self::Pinned) -> AwpResult<()>;

    /// Queue a copy of `src` into `region` of each field.
    fn enqueue_from_pinned(
        &mut self,
        stream: StreamId,
        src: &Self::Pinned,
        fields: &[FieldId],
        region: &Region3,
    ) -> AwpResult<()>;

    /// Replace the device-resident source window.
    fn upload_sources(&mut self, window: &SourceWindow) -> AwpResult<()>;

    fn launch(
        &mut self,
        stream: StreamId,
        launch: KernelLaunch,
        profiling: &mut ProfilingContext,
    ) -> AwpResult<()>;

    fn synchronize(&mut self, stream: StreamId) -> AwpResult<()>;

    fn synchronize_all(&mut self) -> AwpResult<()>;

    /// Sticky asynchronous error since the last call, cleared on read.
    fn take_last_error(&mut self) -> Option<String>;
}

/// Element count of `fields.len()` copies of `region`.
pub fn staged_len(fields: &[FieldId], region: &Region3) -> usize {
    fields.len() * region.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Padding;

    fn layout(attenuation: bool) -> FieldLayout {
        let shape = PaddedShape::new(8, 8, 4, Padding::new(1, 2).expect("padding")).expect("shape");
        FieldLayout::new(shape, attenuation)
    }

    #[test]
    fn test_elastic_layout_skips_anelastic_fields() {
        let l = layout(false);
        let fields = l.fields();
        assert_eq!(fields.len(), 3 + 6 + 3 + 3);
        assert!(!l.contains(FieldId::R1));
        assert!(!l.contains(FieldId::Tau2));
        assert!(l.check(FieldId::Qp, l.len(FieldId::U)).is_err());
    }

    #[test]
    fn test_anelastic_layout_has_all_fields() {
        let l = layout(true);
        assert_eq!(l.fields().len(), 25);
        assert_eq!(l.len(FieldId::DcrjX), 20);
        assert_eq!(l.len(FieldId::DcrjZ), 8);
        assert_eq!(l.len(FieldId::U), 20 * 20 * 8);
        assert!(l.check(FieldId::U, 20 * 20 * 8).is_ok());
        assert!(l.check(FieldId::U, 7).is_err());
    }

    #[test]
    fn test_kernel_dependencies() {
        let l = layout(true);
        let vel = l.dependencies(KernelKind::Velocity);
        assert!(vel.contains(&FieldId::Xz) && vel.contains(&FieldId::Density));
        assert!(!vel.contains(&FieldId::Lambda));
        let stress = l.dependencies(KernelKind::Stress);
        assert!(stress.contains(&FieldId::R6) && !stress.contains(&FieldId::Density));
    }
}
