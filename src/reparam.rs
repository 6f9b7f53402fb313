//! Reparameterized and exact sampling of distributions.
//!
//! A reparameterizable distribution is sampled as a deterministic function of its parameters
//! and of noise drawn from a parameter-free base distribution. Gradients then flow into the
//! parameters through the function.
use crate::logic::Logic;
use crate::model::{Distribution, Distribution as D};
use crate::utils::tensor::{from_vec, to_vec};
use crate::Prng;
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{
    Bernoulli, Beta, Binomial, Distribution as _, Exp1, Gamma, Gumbel, Normal, Open01,
    Poisson, StandardNormal, Weibull,
};
use tch::Tensor;

/// Parameter-free noise consumed by a reparameterized sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseNoise {
    /// Normal with mean 0 and variance 1.
    StandardNormal,
    /// Uniform on the open interval `(0, 1)`.
    StandardUniform,
    /// Gumbel with location 0 and scale 1.
    StandardGumbel,
    /// Standard Gumbel noise over a trailing axis of the given number of outcomes.
    Categorical(i64),
    /// Exponential with rate 1.
    StandardExponential,
    /// Deterministic.
    None,
}

/// The base noise of a distribution's reparameterization, if it has one.
pub fn reparameterization(dist: &Distribution) -> Option<BaseNoise> {
    match dist {
        D::KronDelta(_) | D::DiracDelta(_) => Some(BaseNoise::None),
        D::Bernoulli(_) => Some(BaseNoise::Categorical(2)),
        D::Discrete(probs) => Some(BaseNoise::Categorical(probs.len() as i64)),
        D::Normal { .. } => Some(BaseNoise::StandardNormal),
        D::Uniform { .. } => Some(BaseNoise::StandardUniform),
        D::Exponential { .. } | D::Weibull { .. } => Some(BaseNoise::StandardExponential),
        D::Gumbel { .. } => Some(BaseNoise::StandardGumbel),
        D::Poisson { .. } | D::Gamma { .. } | D::Beta { .. } | D::Binomial { .. } => None,
    }
}

fn standard_gumbel(rng: &mut Prng) -> f64 {
    let u: f64 = rng.sample(Open01);
    -(-u.ln()).ln()
}

/// Draw base noise for a sample of the given shape.
///
/// Categorical noise has an extra trailing axis over the outcomes.
pub fn draw_noise(base: BaseNoise, shape: &[i64], rng: &mut Prng) -> Option<Tensor> {
    let size = shape.iter().product::<i64>() as usize;
    let mut shape = shape.to_vec();
    let data: Vec<f64> = match base {
        BaseNoise::None => return None,
        BaseNoise::StandardNormal => (0..size).map(|_| rng.sample(StandardNormal)).collect(),
        BaseNoise::StandardUniform => (0..size).map(|_| rng.sample(Open01)).collect(),
        BaseNoise::StandardExponential => (0..size).map(|_| rng.sample(Exp1)).collect(),
        BaseNoise::StandardGumbel => (0..size).map(|_| standard_gumbel(rng)).collect(),
        BaseNoise::Categorical(outcomes) => {
            shape.push(outcomes);
            (0..size * outcomes as usize)
                .map(|_| standard_gumbel(rng))
                .collect()
        }
    };
    Some(from_vec(&data, &shape))
}

/// Transform base noise into a sample given the distribution parameters.
///
/// `params` are the evaluated parameters in [`Distribution::params`] order, broadcastable to
/// the sample shape. `noise` is `None` only for deterministic distributions.
/// Must only be called for distributions with a [`reparameterization`].
pub fn transform<L: Logic + ?Sized>(
    logic: &L,
    dist: &Distribution,
    params: &[Tensor],
    shape: &[i64],
    noise: Option<&Tensor>,
) -> Tensor {
    let noise = match (dist, noise) {
        (D::KronDelta(_) | D::DiracDelta(_), _) | (_, None) => return params[0].shallow_clone(),
        (_, Some(noise)) => noise,
    };
    match dist {
        D::Bernoulli(_) => logic.bernoulli(&params[0].expand(shape, false), noise),
        D::Discrete(_) => {
            let probs: Vec<Tensor> = params.iter().map(|p| p.expand(shape, false)).collect();
            logic.discrete(&Tensor::stack(&probs, -1), noise)
        }
        D::Normal { .. } => &params[0] + params[1].sqrt() * noise,
        D::Uniform { .. } => &params[0] + (&params[1] - &params[0]) * noise,
        D::Exponential { .. } => &params[0] * noise,
        D::Weibull { .. } => &params[1] * (noise.log() / &params[0]).exp(),
        D::Gumbel { .. } => &params[0] + &params[1] * noise,
        // Rejected before any evaluation
        _ => params[0].shallow_clone(),
    }
}

/// Draw one exact sample. `None` if the parameters are invalid.
fn sample_one(dist: &Distribution, args: &[f64], rng: &mut Prng) -> Option<f64> {
    match dist {
        D::KronDelta(_) | D::DiracDelta(_) => Some(args[0]),
        D::Bernoulli(_) => Bernoulli::new(args[0])
            .ok()
            .map(|d| f64::from(u8::from(d.sample(rng)))),
        D::Normal { .. } => {
            let (mean, var) = (args[0], args[1]);
            if var >= 0.0 {
                Normal::new(mean, var.sqrt()).ok().map(|d| d.sample(rng))
            } else {
                None
            }
        }
        D::Uniform { .. } => {
            let (low, high) = (args[0], args[1]);
            if low <= high && (high - low).is_finite() {
                let u: f64 = rng.gen();
                Some(low + (high - low) * u)
            } else {
                None
            }
        }
        D::Exponential { .. } => {
            let scale = args[0];
            if scale > 0.0 {
                let e: f64 = rng.sample(Exp1);
                Some(scale * e)
            } else {
                None
            }
        }
        D::Weibull { .. } => Weibull::new(args[1], args[0]).ok().map(|d| d.sample(rng)),
        D::Gumbel { .. } => Gumbel::new(args[0], args[1]).ok().map(|d| d.sample(rng)),
        D::Discrete(_) => {
            let total: f64 = args.iter().sum();
            if args.iter().all(|p| *p >= 0.0) && (total - 1.0).abs() <= 1e-6 {
                WeightedIndex::new(args).ok().map(|d| d.sample(rng) as f64)
            } else {
                None
            }
        }
        D::Poisson { .. } => Poisson::new(args[0]).ok().map(|d| d.sample(rng)),
        D::Gamma { .. } => Gamma::new(args[0], args[1]).ok().map(|d| d.sample(rng)),
        D::Beta { .. } => Beta::new(args[0], args[1]).ok().map(|d| d.sample(rng)),
        D::Binomial { .. } => {
            let trials = args[0];
            if trials >= 0.0 && trials.fract() == 0.0 {
                Binomial::new(trials as u64, args[1])
                    .ok()
                    .map(|d| d.sample(rng) as f64)
            } else {
                None
            }
        }
    }
}

/// Exact element-wise sample of the given shape.
///
/// Returns the sample and a boolean mask of the elements with invalid parameters,
/// whose sampled value is `NaN`.
pub fn sample_exact(
    dist: &Distribution,
    params: &[Tensor],
    shape: &[i64],
    rng: &mut Prng,
) -> (Tensor, Tensor) {
    let columns: Vec<Vec<f64>> = params
        .iter()
        .map(|p| to_vec(&p.expand(shape, false)))
        .collect();
    let size = shape.iter().product::<i64>() as usize;
    let mut values = Vec::with_capacity(size);
    let mut invalid = Vec::with_capacity(size);
    let mut args = Vec::with_capacity(columns.len());
    for i in 0..size {
        args.clear();
        args.extend(columns.iter().map(|c| c[i]));
        match sample_one(dist, &args, rng) {
            Some(value) => {
                values.push(value);
                invalid.push(0.0);
            }
            None => {
                values.push(f64::NAN);
                invalid.push(1.0);
            }
        }
    }
    (from_vec(&values, shape), from_vec(&invalid, shape).gt(0.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{ExactLogic, ProductLogic};
    use crate::model::Expr;
    use crate::utils::stats::OnlineMeanVariance;
    use crate::utils::tensor::any;
    use rand::SeedableRng;
    use rstest::rstest;
    use tch::Kind;

    const DRAWS: i64 = 20_000;
    const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

    fn normal() -> Distribution {
        Distribution::Normal {
            mean: Box::new(Expr::real(2.0)),
            var: Box::new(Expr::real(4.0)),
        }
    }

    fn moments(sample: &Tensor) -> OnlineMeanVariance<f64> {
        to_vec(sample).into_iter().collect()
    }

    #[test]
    fn normal_reparameterization_matches_exact_moments() {
        let dist = normal();
        let params = [Tensor::from(2.0f64), Tensor::from(4.0f64)];
        let shape = [DRAWS];
        let mut rng = Prng::seed_from_u64(1);
        let noise = draw_noise(BaseNoise::StandardNormal, &shape, &mut rng).unwrap();
        let relaxed = transform(&ProductLogic::default(), &dist, &params, &shape, Some(&noise));
        let (exact, invalid) = sample_exact(&dist, &params, &shape, &mut rng);
        assert!(!any(&invalid));

        let relaxed = moments(&relaxed);
        let exact = moments(&exact);
        for stats in [relaxed, exact] {
            assert!((stats.mean() - 2.0).abs() < 0.1, "mean {}", stats.mean());
            assert!((stats.variance() - 4.0).abs() < 0.25, "var {}", stats.variance());
        }
        assert!((relaxed.mean() - exact.mean()).abs() < 0.15);
    }

    #[test]
    fn weibull_reparameterization_mean() {
        // Shape 1 is an exponential distribution with the given scale
        let dist = Distribution::Weibull {
            shape: Box::new(Expr::real(1.0)),
            scale: Box::new(Expr::real(3.0)),
        };
        let params = [Tensor::from(1.0f64), Tensor::from(3.0f64)];
        let mut rng = Prng::seed_from_u64(2);
        let base = reparameterization(&dist).unwrap();
        let noise = draw_noise(base, &[DRAWS], &mut rng).unwrap();
        let sample = transform(&ExactLogic, &dist, &params, &[DRAWS], Some(&noise));
        let stats = moments(&sample);
        assert!((stats.mean() - 3.0).abs() < 0.15);
    }

    #[test]
    fn bernoulli_frequency() {
        let dist = Distribution::Bernoulli(Box::new(Expr::real(0.3)));
        let params = [Tensor::from(0.3f64)];
        let mut rng = Prng::seed_from_u64(3);
        let noise = draw_noise(BaseNoise::Categorical(2), &[DRAWS], &mut rng).unwrap();
        assert_eq!(noise.size(), [DRAWS, 2]);
        // Gumbel-max with the exact argmax is an exact sample
        let sample = transform(&ExactLogic, &dist, &params, &[DRAWS], Some(&noise));
        let frequency = moments(&sample).mean();
        assert!((frequency - 0.3).abs() < 0.02, "frequency {}", frequency);
    }

    #[test]
    fn gradient_flows_into_parameters() {
        let dist = normal();
        let mean = Tensor::from(2.0f64).set_requires_grad(true);
        let var = Tensor::from(4.0f64).set_requires_grad(true);
        let noise = Tensor::of_slice(&[0.5, -1.0]);
        let sample = transform(
            &ProductLogic::default(),
            &dist,
            &[mean.shallow_clone(), var.shallow_clone()],
            &[2],
            Some(&noise),
        );
        sample.sum(Kind::Double).backward();
        assert_eq!(f64::from(mean.grad()), 2.0);
        // d/dvar sqrt(var) * xi = xi / (2 sqrt(var))
        assert!((f64::from(var.grad()) - (-0.5 / 4.0)).abs() < 1e-12);
    }

    #[test]
    fn exact_sampling_flags_invalid_parameters() {
        let dist = normal();
        let params = [Tensor::from(0.0f64), Tensor::of_slice(&[1.0, -1.0, 0.0])];
        let mut rng = Prng::seed_from_u64(4);
        let (sample, invalid) = sample_exact(&dist, &params, &[3], &mut rng);
        assert_eq!(Vec::<f64>::from(&invalid.to_kind(Kind::Double)), [0.0, 1.0, 0.0]);
        assert!(f64::from(sample.get(1)).is_nan());
        assert_eq!(f64::from(sample.get(2)), 0.0);
    }

    #[test]
    fn exact_discrete_requires_normalized_probabilities() {
        let dist = Distribution::Discrete(vec![Expr::real(0.5), Expr::real(0.6)]);
        let params = [Tensor::from(0.5f64), Tensor::from(0.6f64)];
        let mut rng = Prng::seed_from_u64(5);
        let (_, invalid) = sample_exact(&dist, &params, &[4], &mut rng);
        assert!(any(&invalid));
    }

    #[test]
    fn non_reparameterizable_families() {
        let rate = || Box::new(Expr::real(1.0));
        assert_eq!(reparameterization(&Distribution::Poisson { rate: rate() }), None);
        assert_eq!(
            reparameterization(&Distribution::Gamma {
                shape: rate(),
                scale: rate()
            }),
            None
        );
        assert_eq!(
            reparameterization(&Distribution::Discrete(vec![Expr::real(1.0); 3])),
            Some(BaseNoise::Categorical(3))
        );
        assert_eq!(
            reparameterization(&Distribution::Discrete(vec![Expr::real(1.0)])),
            Some(BaseNoise::Categorical(1))
        );
    }

    #[rstest]
    #[case::batch(&[4])]
    #[case::grounded(&[4, 3])]
    fn single_outcome_discrete_is_always_first(#[case] shape: &[i64]) {
        let dist = Distribution::Discrete(vec![Expr::real(1.0)]);
        let params = [Tensor::from(1.0f64)];
        let mut rng = Prng::seed_from_u64(6);
        let base = reparameterization(&dist).unwrap();
        let noise = draw_noise(base, shape, &mut rng).unwrap();
        let mut noise_shape = shape.to_vec();
        noise_shape.push(1);
        assert_eq!(noise.size(), noise_shape);
        let sample = transform(&ProductLogic::default(), &dist, &params, shape, Some(&noise));
        assert_eq!(sample.size(), shape);
        assert!(sample.allclose(&sample.zeros_like(), 1e-12, 1e-12, false));
    }

    #[test]
    fn relaxed_discrete_frequencies_at_high_weight() {
        let probs = [0.2, 0.5, 0.3];
        let dist = Distribution::Discrete(probs.iter().map(|p| Expr::real(*p)).collect());
        let params: Vec<Tensor> = probs.iter().map(|p| Tensor::from(*p)).collect();
        let mut rng = Prng::seed_from_u64(7);
        let base = reparameterization(&dist).unwrap();
        let noise = draw_noise(base, &[DRAWS], &mut rng).unwrap();
        assert_eq!(noise.size(), [DRAWS, 3]);
        let sample = transform(&ProductLogic::new(1000.0), &dist, &params, &[DRAWS], Some(&noise));
        let outcomes = sample.round();
        for (i, p) in probs.iter().enumerate() {
            let frequency = moments(&outcomes.eq(i as i64).to_kind(Kind::Double)).mean();
            assert!((frequency - p).abs() < 0.02, "outcome {}: {}", i, frequency);
        }
    }

    #[rstest]
    #[case::uniform(
        Distribution::Uniform { low: Box::new(Expr::real(1.0)), high: Box::new(Expr::real(3.0)) },
        [1.0, 3.0],
        2.0
    )]
    #[case::exponential(
        Distribution::Exponential { scale: Box::new(Expr::real(2.0)) },
        [2.0, 0.0],
        2.0
    )]
    #[case::gumbel(
        Distribution::Gumbel { loc: Box::new(Expr::real(1.0)), scale: Box::new(Expr::real(2.0)) },
        [1.0, 2.0],
        1.0 + 2.0 * EULER_GAMMA
    )]
    fn reparameterized_mean(
        #[case] dist: Distribution,
        #[case] args: [f64; 2],
        #[case] expected: f64,
    ) {
        let params: Vec<Tensor> = args[..dist.params().len()]
            .iter()
            .map(|a| Tensor::from(*a))
            .collect();
        let mut rng = Prng::seed_from_u64(8);
        let base = reparameterization(&dist).unwrap();
        let noise = draw_noise(base, &[DRAWS], &mut rng).unwrap();
        assert_eq!(noise.size(), [DRAWS]);
        let sample = transform(&ExactLogic, &dist, &params, &[DRAWS], Some(&noise));
        let mean = moments(&sample).mean();
        assert!((mean - expected).abs() < 0.06, "mean {} != {}", mean, expected);
    }
}
