//! Decomposition of signals drawn from the model's own prior

use approx::assert_relative_eq;
use gpitch_core::kernels::{Kernel, Matern12Cosine, Matern32};
use gpitch_core::model::DEFAULT_JITTER;
use gpitch_core::params::logistic;
use gpitch_core::{ModGp, ModelOptions};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};

const FS: f64 = 16000.0;
const F0: f64 = 440.0;

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    cov / (va.sqrt() * vb.sqrt())
}

struct Synthetic {
    x: Vec<f64>,
    y: Vec<f64>,
    f: Vec<f64>,
    g: Vec<f64>,
    clean: Vec<f64>,
}

fn component_kernel() -> Matern12Cosine {
    Matern12Cosine::new(1.0, 0.05, 1.0 / F0).unwrap()
}

fn activation_kernel() -> Matern32 {
    Matern32::new(10.0, 0.01).unwrap()
}

/// One draw of N(0, K(x, x)) through the jittered Cholesky factor
fn draw(kernel: &dyn Kernel, x: &[f64], rng: &mut StdRng) -> Vec<f64> {
    let n = x.len();
    let k = kernel.k_symm(x) + DMatrix::identity(n, n) * DEFAULT_JITTER;
    let l = Cholesky::new(k).unwrap().l();
    let eps = DVector::from_iterator(n, (0..n).map(|_| -> f64 { StandardNormal.sample(&mut *rng) }));
    (l * eps).iter().copied().collect()
}

/// f ~ GP(0, k_com), g ~ GP(0, k_act), y = logistic(g) * f + noise
fn synthetic(n: usize, noise_std: f64) -> Synthetic {
    let mut rng = StdRng::seed_from_u64(1234);
    let x: Vec<f64> = (0..n).map(|i| i as f64 / FS).collect();
    let f = draw(&component_kernel(), &x, &mut rng);
    let g = draw(&activation_kernel(), &x, &mut rng);
    let noise = Normal::new(0.0, noise_std).unwrap();
    let clean: Vec<f64> = f.iter().zip(&g).map(|(f, g)| logistic(*g) * f).collect();
    let y = clean.iter().map(|c| c + noise.sample(&mut rng)).collect();
    Synthetic { x, y, f, g, clean }
}

fn fixed_kernels() -> (Box<dyn Kernel>, Box<dyn Kernel>) {
    let mut kf = component_kernel();
    let mut kg = activation_kernel();
    kf.fix_all();
    kg.fix_all();
    (Box::new(kf), Box::new(kg))
}

fn model(data: &Synthetic, z_step: usize, minibatch_size: Option<usize>) -> ModGp {
    let (kf, kg) = fixed_kernels();
    let z_com: Vec<f64> = data.x.iter().step_by(z_step).copied().collect();
    let z_act: Vec<f64> = data.x.iter().step_by(4 * z_step).copied().collect();
    let options = ModelOptions {
        noise_variance: 1e-2,
        minibatch_size,
        ..ModelOptions::default()
    };
    let mut m = ModGp::new(data.x.clone(), data.y.clone(), z_com, kf, kg, &options).unwrap();
    // activation on its own, coarser grid
    m.gp_mut().sources_mut()[0].activation.reset(z_act);
    m.gp_mut().likelihood_mut().noise_variance.fix();
    m
}

#[test]
fn test_recovers_component_and_activation() {
    // 0.1 s at 16 kHz
    let data = synthetic(1600, 0.05);
    let mut m = model(&data, 10, None);
    assert_eq!(m.gp().num_trainable_hyperparameters(), 0);

    let before = m.elbo().unwrap();
    let trace = m.optimize(300, 0.03).unwrap();
    assert!(trace.final_elbo > before);
    assert_eq!(trace.iterations.len(), 30);

    let f = m.predict_com(&data.x).unwrap();
    let g = m.predict_act(&data.x).unwrap();
    assert!(f.var.iter().chain(&g.var).all(|v| *v >= 0.0 && v.is_finite()));

    // f is only observed where its activation is on
    let active: Vec<usize> = (0..data.x.len()).filter(|&i| logistic(data.g[i]) > 0.5).collect();
    assert!(active.len() > 100, "only {} active samples", active.len());
    let pick = |v: &[f64]| -> Vec<f64> { active.iter().map(|&i| v[i]).collect() };
    let r_f = pearson(&pick(&f.mean), &pick(&data.f));
    assert!(r_f > 0.8, "component correlation {}", r_f);

    let act_pred: Vec<f64> = g.mean.iter().map(|v| logistic(*v)).collect();
    let act_true: Vec<f64> = data.g.iter().map(|v| logistic(*v)).collect();
    let r_g = pearson(&act_pred, &act_true);
    assert!(r_g > 0.7, "activation correlation {}", r_g);

    let signal = m.gp().predict_signal(&data.x).unwrap();
    let r_y = pearson(&signal, &data.clean);
    assert!(r_y > 0.9, "signal correlation {}", r_y);
}

#[test]
fn test_stochastic_elbo_improves_over_successive_runs() {
    let data = synthetic(320, 0.05);
    let mut m = model(&data, 4, Some(64));
    let start = m.elbo().unwrap();

    let first = m.optimize_svi(60, 0.02).unwrap();
    let second = m.optimize_svi(60, 0.02).unwrap();

    assert!(first.final_elbo > start);
    // noisy minibatch estimates, compare their averages
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    assert!(mean(&second.elbo) > mean(&first.elbo));
    assert!(second.final_elbo > start);
}

#[test]
fn test_initial_posterior_in_both_parameterisations() {
    let data = synthetic(64, 0.05);
    let (kf, kg) = fixed_kernels();
    let z: Vec<f64> = data.x.iter().step_by(8).copied().collect();
    let white = ModGp::new(data.x.clone(), data.y.clone(), z.clone(), kf.clone(), kg.clone(), &ModelOptions::default())
        .unwrap();
    let plain = ModGp::new(
        data.x.clone(),
        data.y.clone(),
        z,
        kf,
        kg,
        &ModelOptions {
            whiten: false,
            ..ModelOptions::default()
        },
    )
    .unwrap();

    // both start from a zero mean; only the whitened q(u) equals the prior
    let pw = white.predict_com(&data.x).unwrap();
    let pp = plain.predict_com(&data.x).unwrap();
    for (a, b) in pw.mean.iter().zip(&pp.mean) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
    assert_relative_eq!(white.build_prior_kl().unwrap(), 0.0, epsilon = 1e-10);
    assert!(plain.build_prior_kl().unwrap() > 0.0);
}
