// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Timestep Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-rank driver of the forward-only timestep loop.
//!
//! One step walks the phases in a fixed order:
//!
//! ```text
//! VelocityBoundary → Exchange(Y) → VelocityInterior → Exchange(X)
//!     → Stress → SourceInject → Snapshot → Advance
//! ```
//!
//! The stress phase only starts after both exchanges have landed, so it
//! never reads a velocity ghost older than the current step.

use crate::checkpoint::{CheckpointHeader, CheckpointWriter};
use crate::comm::Communicator;
use crate::decomp::{subdomain, ProcessGrid, Subdomain};
use crate::device::{Accelerator, FieldId, FieldLayout, KernelConstants, KernelLaunch, StreamId};
use crate::grid::{Grid3D, Padding, PaddedShape};
use crate::halo::{exchange_host, HaloChannel, HaloExchanger, HaloGeometry, Side};
use crate::kernels::{MaterialFields, WaveFields};
use crate::media::{fill_materials, medium_from_config, MediaSetup, MediaStats};
use crate::output::{OutputWriter, SnapshotRing};
use crate::profiling::{ProfilingContext, ProfilingReport};
use crate::recording::RecordingRegion;
use crate::source::{SourceInjector, SourceSeries};
use awp_types::config::RunConfig;
use awp_types::constants::FLOPS_PER_CELL;
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::Axis;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Courant number above which the fourth-order scheme is unstable.
const STABILITY_LIMIT: f64 = 0.49;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    VelocityBoundary,
    Exchange(Axis),
    VelocityInterior,
    Stress,
    SourceInject,
    Snapshot,
    Advance,
}

/// What one call to [`TimestepEngine::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: usize,
    pub phases: Vec<Phase>,
    pub device_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rank: usize,
    pub steps: usize,
    pub snapshot_steps: Vec<usize>,
    pub flushes: usize,
    /// Snapshots left in the ring when the loop ended.
    pub unflushed: usize,
    pub device_errors: usize,
    pub source_points: usize,
    pub elapsed_secs: f64,
    pub secs_per_step: f64,
    pub gflops: f64,
    pub stability: f64,
    pub profiling: ProfilingReport,
}

/// Scalars the loop needs after setup.
#[derive(Debug, Clone, Copy)]
struct LoopParams {
    nt: usize,
    ntiskp: usize,
    progress_interval: usize,
}

pub struct TimestepEngine<A: Accelerator, C: Communicator> {
    sub: Subdomain,
    shape: PaddedShape,
    params: LoopParams,
    dev: A,
    comm: C,
    halo: HaloExchanger<A::Pinned>,
    injector: SourceInjector,
    ring: SnapshotRing,
    writer: Box<dyn OutputWriter>,
    checkpoint: Option<CheckpointWriter>,
    profiling: ProfilingContext,
    snapshot: [Grid3D; 3],
    stats: MediaStats,
    stability: f64,
    cur_step: usize,
    snapshot_steps: Vec<usize>,
    flushes: usize,
    device_errors: usize,
}

impl<A: Accelerator, C: Communicator> TimestepEngine<A, C> {
    /// Build every per-rank structure, fill and upload the fields, and
    /// write the checkpoint header on rank 0.
    pub fn setup(
        cfg: &RunConfig,
        comm: C,
        mut dev: A,
        series: &SourceSeries,
        writer: Box<dyn OutputWriter>,
    ) -> AwpResult<Self> {
        cfg.validate()?;
        let rank = comm.rank();
        let grid = ProcessGrid::new(cfg.decomposition.px, cfg.decomposition.py)?;
        if comm.size() != grid.size() {
            return Err(AwpError::comm(
                rank,
                format!("communicator has {} ranks, process grid needs {}", comm.size(), grid.size()),
            ));
        }
        let dims = (cfg.grid.nx, cfg.grid.ny, cfg.grid.nz);
        let sub = subdomain(rank, dims, grid)?;
        let padding = Padding::new(cfg.padding.loop_order, cfg.padding.align)?;
        let shape = sub.shape(padding)?;
        let region = RecordingRegion::from_config(&cfg.recording, dims, &sub)?;
        let geometry = HaloGeometry::new(shape, sub.neighbors);
        debug!(
            rank,
            cx = sub.cx,
            cy = sub.cy,
            nxt = sub.nxt,
            nyt = sub.nyt,
            neighbors = ?sub.neighbors,
            recording = ?region.counts(),
            "subdomain ready"
        );

        // media
        let attenuation = cfg.attenuation.enabled;
        let model = medium_from_config(&cfg.medium)?;
        let mut media = MaterialFields::blank(&shape, attenuation);
        let local_stats = fill_materials(
            &mut media,
            model.as_ref(),
            &MediaSetup {
                sub: &sub,
                shape: &shape,
                dims,
                dt: cfg.time.dt,
                boundary: &cfg.boundary,
                attenuation: &cfg.attenuation,
            },
        );
        exchange_host(&geometry, &mut media.swappable_mut(), &comm, HaloChannel::Media)?;
        let stats = local_stats.reduce(&comm)?;
        let stability = stats.stability(cfg.time.dt, cfg.grid.dh);
        if stability > STABILITY_LIMIT && rank == 0 {
            warn!(stability, "Courant number exceeds {STABILITY_LIMIT}; the run will likely diverge");
        }

        // sources
        let dh = cfg.grid.dh;
        let scale = (cfg.time.dt / (dh * dh * dh)) as f32;
        let mut injector = SourceInjector::for_rank(
            series,
            &sub.frames(&shape),
            &geometry.stress_region(),
            cfg.source.read_step_gpu,
            scale,
        );
        let mut wave = WaveFields::zeros(&shape, attenuation);
        injector.inject_host(&mut wave, 0);
        if injector.is_active() {
            debug!(rank, points = injector.npsrc(), "source points on rank");
        }

        // device
        let mut profiling = ProfilingContext::new();
        let layout = FieldLayout::new(shape, attenuation);
        let dth = (cfg.time.dt / dh) as f32;
        dev.allocate(&layout, KernelConstants { dth, attenuation }, &mut profiling)?;
        upload_all(&mut dev, &layout, &wave, &media)?;
        if injector.is_active() {
            if let Some(window) = injector.refresh(0) {
                dev.upload_sources(&window)?;
            }
        }
        let halo = HaloExchanger::new(geometry, &mut dev, &mut profiling)?;

        let ring = SnapshotRing::new(region, cfg.recording.write_step);
        let checkpoint = if sub.is_root() {
            let header = CheckpointHeader {
                nodes: (sub.nxt, sub.nyt, sub.nzt),
                nt: cfg.nt(),
                dh,
                dt: cfg.time.dt,
                arbc: cfg.boundary.arbc,
                stats,
                ntiskp: cfg.recording.ntiskp,
                scheme: cfg.boundary.scheme,
                attenuation,
                fl: cfg.attenuation.fl,
                fp: cfg.attenuation.fp,
                fh: cfg.attenuation.fh,
            };
            let probe = CheckpointWriter::probe_cell(&shape, cfg.boundary.nd);
            Some(CheckpointWriter::create(&cfg.checkpoint.path, &header, probe)?)
        } else {
            None
        };

        comm.barrier()?;
        if rank == 0 {
            info!(
                device = %dev.name(),
                ranks = grid.size(),
                nt = cfg.nt(),
                stability,
                "setup complete"
            );
        }

        Ok(TimestepEngine {
            sub,
            shape,
            params: LoopParams {
                nt: cfg.nt(),
                ntiskp: cfg.recording.ntiskp,
                progress_interval: cfg.checkpoint.progress_interval,
            },
            dev,
            comm,
            halo,
            injector,
            ring,
            writer,
            checkpoint,
            profiling,
            snapshot: FieldId::VELOCITY.map(|f| Grid3D::zeros(f.label(), &shape)),
            stats,
            stability,
            cur_step: 1,
            snapshot_steps: Vec::new(),
            flushes: 0,
            device_errors: 0,
        })
    }

    pub fn rank(&self) -> usize {
        self.sub.rank
    }

    pub fn subdomain(&self) -> &Subdomain {
        &self.sub
    }

    pub fn geometry(&self) -> &HaloGeometry {
        self.halo.geometry()
    }

    pub fn device(&self) -> &A {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut A {
        &mut self.dev
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn stats(&self) -> &MediaStats {
        &self.stats
    }

    pub fn current_step(&self) -> usize {
        self.cur_step
    }

    pub fn is_finished(&self) -> bool {
        self.cur_step > self.params.nt
    }

    /// Run one full timestep. Errors here are fatal for the rank; device
    /// faults are only reported in the returned [`StepReport`].
    pub fn step(&mut self) -> AwpResult<StepReport> {
        let step = self.cur_step;
        let mut phases = Vec::with_capacity(8);

        phases.push(Phase::VelocityBoundary);
        for side in Side::of_axis(Axis::Y) {
            if let Some(region) = self.halo.geometry().velocity_boundary(side) {
                self.dev
                    .launch(side.stream(), KernelLaunch::Velocity(region), &mut self.profiling)?;
            }
        }

        phases.push(Phase::Exchange(Axis::Y));
        self.halo.exchange(Axis::Y, &mut self.dev, &self.comm)?;

        phases.push(Phase::VelocityInterior);
        let interior = self.halo.geometry().velocity_interior();
        self.dev
            .launch(StreamId::Compute, KernelLaunch::Velocity(interior), &mut self.profiling)?;
        self.dev.synchronize(StreamId::Compute)?;

        phases.push(Phase::Exchange(Axis::X));
        self.halo.exchange(Axis::X, &mut self.dev, &self.comm)?;

        phases.push(Phase::Stress);
        let stress = self.halo.geometry().stress_region();
        self.dev
            .launch(StreamId::Compute, KernelLaunch::Stress(stress), &mut self.profiling)?;

        if self.injector.injects_at(step) {
            phases.push(Phase::SourceInject);
            if let Some(window) = self.injector.refresh(step) {
                self.dev.synchronize(StreamId::Compute)?;
                self.dev.upload_sources(&window)?;
            }
            self.dev.launch(
                StreamId::Compute,
                KernelLaunch::AddSource { sample: step },
                &mut self.profiling,
            )?;
        }
        self.dev.synchronize_all()?;

        if step % self.params.ntiskp == 0 {
            phases.push(Phase::Snapshot);
            self.snapshot(step)?;
        }

        let device_error = self.dev.take_last_error();
        if let Some(message) = &device_error {
            // known gap: the loop carries on after a device fault
            self.device_errors += 1;
            error!(rank = self.sub.rank, step, "device error: {message}");
        }

        phases.push(Phase::Advance);
        self.cur_step += 1;
        Ok(StepReport {
            step,
            phases,
            device_error,
        })
    }

    fn snapshot(&mut self, step: usize) -> AwpResult<()> {
        for (field, host) in FieldId::VELOCITY.iter().zip(self.snapshot.iter_mut()) {
            self.dev.download(*field, host.as_mut_slice()?)?;
        }
        let slot = self.ring.slot_for(step, self.params.ntiskp);
        let [u, v, w] = &self.snapshot;
        self.ring.record(slot, [u, v, w], &self.shape);
        self.snapshot_steps.push(step);

        if let Some(ckp) = self.checkpoint.as_mut() {
            let p = ckp.probe();
            ckp.record(step, u.data[p], v.data[p], w.data[p])?;
        }
        if self.ring.is_full_after(slot) {
            self.ring.flush(step, self.writer.as_mut())?;
            self.flushes += 1;
        }
        Ok(())
    }

    /// Run every remaining step, write the trailing sentinel and report.
    pub fn run(mut self) -> AwpResult<RunSummary> {
        let start = Instant::now();
        let first = self.cur_step;
        while !self.is_finished() {
            let report = self.step()?;
            if self.sub.is_root() && report.step % self.params.progress_interval == 0 {
                let done = report.step + 1 - first;
                info!(
                    step = report.step,
                    nt = self.params.nt,
                    secs_per_step = start.elapsed().as_secs_f64() / done as f64,
                    "progress"
                );
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        let steps = self.cur_step - first;
        self.finish(elapsed, steps)
    }

    fn finish(mut self, elapsed: f64, steps: usize) -> AwpResult<RunSummary> {
        let unflushed = self.ring.pending();
        if unflushed > 0 {
            warn!(
                rank = self.sub.rank,
                unflushed,
                write_step = self.ring.write_step(),
                "run ended with a partially filled snapshot ring; those snapshots are not written"
            );
        }
        if let Some(ckp) = self.checkpoint.take() {
            ckp.finish()?;
        }
        self.comm.barrier()?;

        let cells = self.halo.geometry().stress_region().len() as f64;
        let secs_per_step = if steps > 0 { elapsed / steps as f64 } else { 0.0 };
        let gflops = if elapsed > 0.0 {
            FLOPS_PER_CELL * cells * steps as f64 / elapsed / 1.0e9
        } else {
            0.0
        };
        let summary = RunSummary {
            rank: self.sub.rank,
            steps,
            snapshot_steps: self.snapshot_steps,
            flushes: self.flushes,
            unflushed,
            device_errors: self.device_errors,
            source_points: self.injector.npsrc(),
            elapsed_secs: elapsed,
            secs_per_step,
            gflops,
            stability: self.stability,
            profiling: self.profiling.report(),
        };
        if summary.rank == 0 {
            info!(
                steps,
                secs_per_step,
                gflops,
                total_mib = summary.profiling.total_mib,
                bottleneck_mib = summary.profiling.bottleneck_mib,
                "run complete"
            );
        }
        Ok(summary)
    }
}

fn upload_all<A: Accelerator>(
    dev: &mut A,
    layout: &FieldLayout,
    wave: &WaveFields,
    media: &MaterialFields,
) -> AwpResult<()> {
    for field in layout.fields() {
        if let Some(g) = wave.grid(field).or_else(|| media.grid(field)) {
            dev.upload(field, g.as_slice()?)?;
        } else if let Some(p) = media.profile(field) {
            dev.upload(field, p.as_slice()?)?;
        } else {
            return Err(AwpError::Device(format!("no host data for {}", field.label())));
        }
    }
    Ok(())
}
