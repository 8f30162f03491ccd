// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Timestep Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use awp_core::comm::LocalCluster;
use awp_core::cpu::CpuDevice;
use awp_core::driver::prepare;
use awp_core::engine::TimestepEngine;
use awp_core::output::NullWriter;
use awp_types::config::RunConfig;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn make_config(n: usize, attenuation: bool, dir: &std::path::Path) -> RunConfig {
    let json = format!(
        r#"{{
            "grid": {{ "nx": {n}, "ny": {n}, "nz": {n}, "dh": 100.0 }},
            "time": {{ "tmax": 1.0, "dt": 0.005 }},
            "padding": {{ "align": 4 }},
            "boundary": {{ "nd": 4 }},
            "attenuation": {{ "enabled": {attenuation} }},
            "recording": {{ "ntiskp": 1000000, "write_step": 1 }},
            "source": {{
                "points": [{{
                    "index": [{h}, {h}, 4],
                    "moment": {{ "xx": 1e15, "yy": 1e15, "zz": 1e15, "xy": 0, "xz": 0, "yz": 0 }},
                    "wavelet": {{ "kind": "ricker", "f0": 2.0, "t0": 0.5 }}
                }}]
            }},
            "medium": {{ "kind": "homogeneous", "vp": 6000, "vs": 3464, "density": 2700 }},
            "checkpoint": {{ "path": "{ckp}" }}
        }}"#,
        h = n / 2,
        ckp = dir.join("ckp").display(),
    );
    serde_json::from_str(&json).expect("bench config")
}

fn bench_timestep(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestep_cpu");
    group.sample_size(10);
    let dir = tempfile::tempdir().expect("tempdir");

    for &n in &[32usize, 48usize] {
        for attenuation in [false, true] {
            let cfg = make_config(n, attenuation, dir.path());
            let series = prepare(&cfg).expect("prepare");
            let label = if attenuation { "anelastic" } else { "elastic" };
            group.bench_with_input(BenchmarkId::new(label, format!("{n}^3")), &cfg, |b, cfg| {
                let cluster = LocalCluster::new(1).expect("cluster");
                let mut comms = cluster.endpoints();
                let comm = comms.pop().expect("one endpoint");
                let mut engine = TimestepEngine::setup(
                    cfg,
                    comm,
                    CpuDevice::new(),
                    &series,
                    Box::new(NullWriter::default()),
                )
                .expect("setup");
                b.iter(|| black_box(engine.step().expect("step")));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_timestep);
criterion_main!(benches);
