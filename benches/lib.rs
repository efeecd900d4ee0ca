use criterion::{criterion_group, criterion_main};

mod convolution;

criterion_group!(
    benches_system_matrix,
    system_matrix::bench_system_matrix,
    system_matrix::bench_gm_fit
);
criterion_group!(benches_convolution, convolution::bench_convolution);
criterion_main!(benches_system_matrix, benches_convolution);
