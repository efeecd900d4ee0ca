use compartment_fit::ndarray::Array3;
use compartment_fit_test_util::branched_tree;
use criterion::Criterion;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::hint::black_box;

pub fn bench_convolution(c: &mut Criterion) {
    const N_T: usize = 1000;
    const DT: f64 = 0.025;

    let mut rng = StdRng::seed_from_u64(2);
    let mut tree = branched_tree();
    let n = tree.len();
    for n_channels in [1, 4] {
        let inputs = Array3::from_shape_simple_fn((n, n_channels, N_T), || {
            rng.sample::<f64, _>(StandardNormal) * 1e-2
        });
        c.bench_function(
            &format!("convolution, {n} sites, {n_channels} channels, {N_T} samples"),
            |b| {
                b.iter(|| tree.calc_convolution(DT, black_box(inputs.view())).unwrap());
            },
        );
    }
}
