use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use posetrack_pnp as ppnp;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

type PnpDataset = (Vec<[f64; 3]>, Vec<[f64; 2]>, [[f64; 3]; 3]);

/// Points spread over a 10 cm object half a meter in front of a 512x512 crop camera.
fn generate_object_dataset(num_points: usize, noise_px: f64, seed: u64) -> PnpDataset {
    let k = [[600.0, 0.0, 256.0], [0.0, 600.0, 256.0], [0.0, 0.0, 1.0]];

    let mut rng = StdRng::seed_from_u64(seed);
    let world = (0..num_points)
        .map(|_| {
            [
                rng.random_range(-0.05..0.05),
                rng.random_range(-0.05..0.05),
                rng.random_range(-0.05..0.05),
            ]
        })
        .collect::<Vec<_>>();

    let r = [
        [0.96, -0.10, 0.26],
        [0.12, 0.99, -0.04],
        [-0.25, 0.07, 0.97],
    ];
    let t = [0.01, -0.02, 0.5];

    let image = world
        .iter()
        .map(|p| {
            let xc = r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0];
            let yc = r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1];
            let zc = r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2];
            [
                k[0][0] * xc / zc + k[0][2] + rng.random_range(-noise_px..noise_px),
                k[1][1] * yc / zc + k[1][2] + rng.random_range(-noise_px..noise_px),
            ]
        })
        .collect();

    (world, image, k)
}

fn inject_outliers(image: &mut [[f64; 2]], fraction: f64, seed: u64) {
    let num_out = (fraction.clamp(0.0, 1.0) * image.len() as f64) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut idxs: Vec<usize> = (0..image.len()).collect();
    idxs.shuffle(&mut rng);
    for &i in idxs.iter().take(num_out) {
        let angle = rng.random_range(0.0..(2.0 * std::f64::consts::PI));
        let radius = rng.random_range(50.0..200.0);
        image[i][0] += radius * angle.cos();
        image[i][1] += radius * angle.sin();
    }
}

fn bench_epnp(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_epnp");
    for &n in &[8usize, 32, 128, 512] {
        let (world, image, k) = generate_object_dataset(n, 0.5, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = ppnp::solve_pnp(&world, &image, &k, &ppnp::PnPMethod::EPnPDefault)
                    .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_ransac");
    for &n in &[32usize, 128, 512] {
        let (world, mut image, k) = generate_object_dataset(n, 0.5, 10_000);
        inject_outliers(&mut image, 0.3, 12_345);

        // matches the tracker defaults: 7 px threshold
        let params = ppnp::RansacParams {
            max_iterations: 1000,
            reproj_threshold_px: 7.0,
            confidence: 0.99,
            random_seed: Some(10_000),
            refine: true,
        };

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = ppnp::solve_pnp_ransac(
                    &world,
                    &image,
                    &k,
                    ppnp::PnPMethod::EPnPDefault,
                    &params,
                )
                .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_epnp, bench_ransac);
criterion_main!(benches);
