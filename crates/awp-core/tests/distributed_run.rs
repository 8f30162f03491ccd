// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Distributed Run Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use awp_core::comm::{Communicator, LocalCluster, OpKind};
use awp_core::cpu::CpuDevice;
use awp_core::decomp::{subdomain, ProcessGrid};
use awp_core::device::{Accelerator, FieldId, FieldLayout, KernelConstants};
use awp_core::driver::{prepare, run_local};
use awp_core::engine::{Phase, TimestepEngine};
use awp_core::grid::{Grid3D, Padding};
use awp_core::halo::{HaloExchanger, HaloGeometry, Side};
use awp_core::output::NullWriter;
use awp_core::profiling::ProfilingContext;
use awp_types::config::RunConfig;
use awp_types::index::Axis;
use std::path::Path;

fn config(px: usize, py: usize, attenuation: bool, dir: &Path) -> RunConfig {
    let json = format!(
        r#"{{
            "run_name": "e2e",
            "grid": {{ "nx": 64, "ny": 64, "nz": 32, "dh": 100.0 }},
            "time": {{ "tmax": 0.0475, "dt": 0.005 }},
            "decomposition": {{ "px": {px}, "py": {py} }},
            "padding": {{ "align": 4 }},
            "boundary": {{ "nd": 4 }},
            "attenuation": {{ "enabled": {attenuation} }},
            "recording": {{
                "x": {{ "begin": 1, "end": -1, "skip": 2 }},
                "y": {{ "begin": 3, "end": 61, "skip": 2 }},
                "z": {{ "begin": 1, "end": 3, "skip": 1 }},
                "ntiskp": 5,
                "write_step": 2,
                "output_dir": "{out}"
            }},
            "source": {{
                "read_step_gpu": 4,
                "points": [{{
                    "index": [31, 40, 5],
                    "moment": {{ "xx": 1e15, "yy": 1e15, "zz": 1e15, "xy": 2e14, "xz": 0, "yz": 0 }},
                    "wavelet": {{ "kind": "ricker", "f0": 10.0, "t0": 0.02 }}
                }}]
            }},
            "medium": {{ "kind": "layered", "layers": [
                {{ "top": 0, "vp": 4000, "vs": 2000, "density": 2200 }},
                {{ "top": 8, "vp": 6000, "vs": 3464, "density": 2700 }}
            ] }},
            "checkpoint": {{ "path": "{ckp}" }}
        }}"#,
        out = dir.join("out").display(),
        ckp = dir.join("ckp").display(),
    );
    serde_json::from_str(&json).expect("test config")
}

fn read_f32(path: &Path) -> Vec<f32> {
    std::fs::read(path)
        .expect("output file")
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn compare_with_single_rank(attenuation: bool) {
    let split = tempfile::tempdir().expect("tempdir");
    let single = tempfile::tempdir().expect("tempdir");

    let cfg4 = config(2, 2, attenuation, split.path());
    let cfg1 = config(1, 1, attenuation, single.path());
    assert_eq!(cfg4.nt(), 10);

    let summaries = run_local(&cfg4, |_| Ok(CpuDevice::new())).expect("2x2 run");
    assert_eq!(summaries.len(), 4);
    for s in &summaries {
        assert_eq!(s.snapshot_steps, vec![5, 10]);
        assert_eq!(s.flushes, 1);
        assert_eq!(s.unflushed, 0);
        assert_eq!(s.device_errors, 0);
        assert_eq!(s.steps, 10);
    }
    // x = 31 lies in cx 0 and in the widened stress extent of cx 1; y = 40 only in cy 1
    let with_source: Vec<usize> = summaries
        .iter()
        .filter(|s| s.source_points > 0)
        .map(|s| s.rank)
        .collect();
    assert_eq!(with_source, vec![1, 3]);

    run_local(&cfg1, |_| Ok(CpuDevice::new())).expect("1x1 run");

    for prefix in ["SX", "SY", "SZ"] {
        let name = format!("{prefix}0000010");
        let a = read_f32(&split.path().join("out").join(&name));
        let b = read_f32(&single.path().join("out").join(&name));
        assert_eq!(a.len(), 32 * 30 * 3 * 2);
        assert_eq!(a.len(), b.len());
        let mismatch = a
            .iter()
            .zip(&b)
            .position(|(x, y)| x.to_bits() != y.to_bits());
        assert_eq!(mismatch, None, "{name} differs between 2x2 and 1x1");
        assert!(a.iter().any(|v| *v != 0.0), "{name} is all zeros");
    }

    let log4 = std::fs::read_to_string(split.path().join("ckp")).expect("ckp");
    let log1 = std::fs::read_to_string(single.path().join("ckp")).expect("ckp");
    let tail = |s: &str| s.lines().skip(16).map(str::to_string).collect::<Vec<_>>();
    assert_eq!(tail(&log4), tail(&log1));
    assert_eq!(tail(&log4).len(), 3);
    assert_eq!(tail(&log4).last().map(String::as_str), Some("END"));
    assert!(tail(&log4)[0].starts_with("5 :\t"));
}

#[test]
fn test_split_run_matches_single_rank_elastic() {
    compare_with_single_rank(false);
}

#[test]
fn test_split_run_matches_single_rank_anelastic() {
    compare_with_single_rank(true);
}

#[test]
fn test_open_side_posts_nothing_and_keeps_ghosts() {
    let grid = ProcessGrid::new(2, 1).expect("grid");
    let padding = Padding::new(1, 2).expect("padding");
    let cluster = LocalCluster::new(2).expect("cluster");
    let results = cluster
        .run(|comm| {
            let rank = comm.rank();
            let sub = subdomain(rank, (32, 16, 8), grid)?;
            let shape = sub.shape(padding)?;
            let geometry = HaloGeometry::new(shape, sub.neighbors);
            let layout = FieldLayout::new(shape, false);
            let mut prof = ProfilingContext::new();
            let mut dev = CpuDevice::new();
            dev.allocate(&layout, KernelConstants { dth: 0.0, attenuation: false }, &mut prof)?;

            let mut u = Grid3D::zeros("u1", &shape);
            u.data.fill(-7.0);
            u.region_mut(&shape.interior()).fill(rank as f32 + 1.0);
            for f in FieldId::VELOCITY {
                dev.upload(f, u.as_slice()?)?;
            }

            let mut halo = HaloExchanger::new(geometry.clone(), &mut dev, &mut prof)?;
            halo.exchange(Axis::X, &mut dev, &comm)?;
            let mut first = Grid3D::zeros("u1", &shape);
            dev.download(FieldId::U, first.as_mut_slice()?)?;
            halo.exchange(Axis::X, &mut dev, &comm)?;
            let mut second = Grid3D::zeros("u1", &shape);
            dev.download(FieldId::U, second.as_mut_slice()?)?;
            Ok((rank, geometry, first, second, comm.posted_ops()))
        })
        .expect("run");

    for (rank, geometry, first, second, ops) in &results {
        let peer = 1 - rank;
        assert!(ops.iter().all(|op| op.peer == peer), "rank {rank} talked to a missing side");
        assert_eq!(ops.iter().filter(|op| op.kind == OpKind::Send).count(), 2);
        assert_eq!(ops.iter().filter(|op| op.kind == OpKind::Recv).count(), 2);

        let (open, shared) = if *rank == 0 {
            (Side::Left, Side::Right)
        } else {
            (Side::Right, Side::Left)
        };
        let open_ghost = geometry.recv_region(open);
        assert!(first.region(&open_ghost).iter().all(|v| *v == -7.0));
        let shared_ghost = geometry.recv_region(shared);
        let g0 = geometry.shape.padding.first_interior();
        assert_eq!(first.data[[shared_ghost.x.start, g0, 3]], (peer + 1) as f32);
        // idempotent under a static field
        assert_eq!(first.data, second.data);
    }
}

#[test]
fn test_device_fault_is_counted_and_loop_continues() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(1, 1, false, dir.path());
    let series = prepare(&cfg).expect("prepare");
    let cluster = LocalCluster::new(1).expect("cluster");
    let comm = cluster.endpoints().pop().expect("endpoint");
    let mut engine = TimestepEngine::setup(&cfg, comm, CpuDevice::new(), &series, Box::new(NullWriter::default()))
        .expect("setup");

    let first = engine.step().expect("step 1");
    assert_eq!(
        first.phases,
        vec![
            Phase::VelocityBoundary,
            Phase::Exchange(Axis::Y),
            Phase::VelocityInterior,
            Phase::Exchange(Axis::X),
            Phase::Stress,
            Phase::SourceInject,
            Phase::Advance,
        ]
    );
    engine.device_mut().poison("simulated device fault");
    let summary = engine.run().expect("run continues");
    assert_eq!(summary.device_errors, 1);
    assert_eq!(summary.steps, 9);
    assert_eq!(summary.snapshot_steps, vec![5, 10]);
}

#[test]
fn test_prepare_rejects_source_outside_grid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(1, 1, false, dir.path());
    cfg.source.points[0].index = [64, 0, 0];
    let err = prepare(&cfg).expect_err("outside grid");
    assert!(matches!(err, awp_types::error::AwpError::Source(_)));
}

#[test]
fn test_setup_rejects_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let valid = config(1, 1, false, dir.path());
    let series = prepare(&valid).expect("prepare");
    let mut cfg = valid.clone();
    cfg.recording.ntiskp = 0;
    let cluster = LocalCluster::new(1).expect("cluster");
    let comm = cluster.endpoints().pop().expect("endpoint");
    let err = TimestepEngine::setup(&cfg, comm, CpuDevice::new(), &series, Box::new(NullWriter::default()))
        .err()
        .expect("ntiskp = 0 rejected");
    assert!(matches!(err, awp_types::error::AwpError::Recording(_)), "{err:?}");
}
