// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Halo Packing Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use awp_core::decomp::Neighbors;
use awp_core::grid::{Grid3D, PaddedShape, Padding};
use awp_core::halo::{pack_slab, unpack_slab, HaloGeometry, Side};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn geometry(n: usize) -> HaloGeometry {
    let shape = PaddedShape::new(n, n, n, Padding::new(1, 8).expect("padding")).expect("shape");
    HaloGeometry::new(
        shape,
        Neighbors {
            left: Some(0),
            right: Some(1),
            front: Some(2),
            back: Some(3),
        },
    )
}

fn bench_pack_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("halo_pack_unpack");

    for &n in &[32usize, 64usize] {
        let g = geometry(n);
        let mut fields: Vec<Grid3D> = ["u1", "v1", "w1"]
            .iter()
            .map(|&l| Grid3D::zeros(l, &g.shape))
            .collect();
        for (f, grid) in fields.iter_mut().enumerate() {
            for (n, v) in grid.data.iter_mut().enumerate() {
                *v = (n + f) as f32;
            }
        }

        for side in [Side::Left, Side::Front] {
            let send = g.send_region(side);
            let recv = g.recv_region(side);
            group.bench_with_input(
                BenchmarkId::new(side.label(), format!("{n}^3")),
                &(send, recv),
                |b, (send, recv)| {
                    b.iter(|| {
                        let packed = pack_slab(fields.iter(), send);
                        unpack_slab(fields.iter_mut(), recv, black_box(&packed))
                            .expect("unpack");
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_pack_unpack);
criterion_main!(benches);
