use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use titaninfer::kernels::{elementwise, matmul};
use titaninfer::Tensor;

fn bench_matmul(c: &mut Criterion) {
    let sizes = [32, 64, 128, 256];
    let mut group = c.benchmark_group("matmul");

    for size in sizes {
        let data: Vec<f32> = (0..size * size).map(|x| x as f32 * 0.001).collect();
        let a = Tensor::from_data(vec![size, size], &data).unwrap();
        let b = Tensor::from_data(vec![size, size], &data).unwrap();
        let mut out = Tensor::from_shape(vec![size, size]).unwrap();

        group.bench_function(BenchmarkId::new("reference", size), |bencher| {
            bencher.iter(|| matmul::matmul_reference(black_box(&a), black_box(&b), &mut out).unwrap())
        });

        group.bench_function(BenchmarkId::new("blocked", size), |bencher| {
            bencher.iter(|| matmul::matmul_blocked(black_box(&a), black_box(&b), &mut out).unwrap())
        });
    }

    group.finish();
}

fn bench_matvec(c: &mut Criterion) {
    let sizes = [64, 512, 4096];
    let mut group = c.benchmark_group("matvec");

    for size in sizes {
        let a = Tensor::from_data(vec![size, size], &vec![0.01; size * size]).unwrap();
        let x = Tensor::from_data(vec![size], &vec![1.0; size]).unwrap();
        let mut out = Tensor::from_shape(vec![size]).unwrap();

        group.bench_function(BenchmarkId::new("matvec", size), |bencher| {
            bencher.iter(|| matmul::matvec(black_box(&a), black_box(&x), &mut out).unwrap())
        });
    }

    group.finish();
}

fn bench_elementwise(c: &mut Criterion) {
    let sizes = [1024, 10_240, 102_400];
    let mut group = c.benchmark_group("elementwise");

    for size in sizes {
        let data: Vec<f32> = (0..size).map(|x| x as f32).collect();
        let a = Tensor::from_data(vec![size], &data).unwrap();
        let b = Tensor::from_data(vec![size], &data).unwrap();
        let mut out = Tensor::from_shape(vec![size]).unwrap();

        group.bench_function(BenchmarkId::new("add", size), |bencher| {
            bencher.iter(|| elementwise::add(black_box(&a), black_box(&b), &mut out).unwrap())
        });
        group.bench_function(BenchmarkId::new("relu", size), |bencher| {
            bencher.iter(|| elementwise::relu(black_box(&a), &mut out).unwrap())
        });
        group.bench_function(BenchmarkId::new("softmax", size), |bencher| {
            bencher.iter(|| elementwise::softmax(black_box(&a), &mut out).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_matmul, bench_matvec, bench_elementwise);
criterion_main!(benches);
