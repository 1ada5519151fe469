//! Gaussian likelihood head: hidden state -> (mu, sigma).
//!
//! mu is an unbounded linear projection; sigma goes through a
//! softplus plus a small epsilon so it is strictly positive for any
//! input. The head also provides the log-density used by the training
//! objective and the reparameterised sampler used at inference.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{activation::relu, Distribution, Tensor};

const SIGMA_EPSILON: f64 = 1e-6;

/// ln(2 * pi), the constant term of the Gaussian log-density.
const LN_TWO_PI: f64 = 1.837_877_066_409_345_5;

/// Numerically stable softplus: max(x, 0) + ln(1 + e^{-|x|}).
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x.clone()) + x.abs().neg().exp().add_scalar(1.0).log()
}

#[derive(Module, Debug)]
pub struct GaussianHead<B: Backend> {
    mu: Linear<B>,
    sigma: Linear<B>,
}

impl<B: Backend> GaussianHead<B> {
    pub fn new(d_hidden: usize) -> Self {
        Self {
            mu: LinearConfig::new(d_hidden, 1).init(),
            sigma: LinearConfig::new(d_hidden, 1).init(),
        }
    }

    /// Distribution parameters for a batch of hidden states.
    ///
    /// Invariant: every returned sigma is strictly positive.
    pub fn forward(&self, hidden: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let [batch, _] = hidden.dims();
        let mu = self.mu.forward(hidden.clone()).reshape([batch]);
        let sigma = softplus(self.sigma.forward(hidden).reshape([batch])).add_scalar(SIGMA_EPSILON);
        (mu, sigma)
    }

    /// log N(z | mu, sigma^2)
    /// = -0.5 * (ln(2 pi) + 2 ln(sigma) + ((z - mu) / sigma)^2)
    pub fn log_prob<const D: usize>(
        z: Tensor<B, D>,
        mu: Tensor<B, D>,
        sigma: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let standardized = (z - mu) / sigma.clone();
        (standardized.powf(2.0) + sigma.log().mul_scalar(2.0))
            .add_scalar(LN_TWO_PI)
            .mul_scalar(-0.5)
    }

    /// Reparameterised draw: mu + sigma * eps with eps ~ N(0, 1).
    pub fn sample(mu: Tensor<B, 1>, sigma: Tensor<B, 1>) -> Tensor<B, 1> {
        let eps: Tensor<B, 1> = Tensor::random_device(
            mu.shape(),
            Distribution::Normal(0.0, 1.0),
            &mu.device(),
        );
        mu + sigma * eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Data, Shape};

    type B = NdArray<f32>;

    #[test]
    fn sigma_is_strictly_positive_and_finite() {
        <B as Backend>::seed(4);
        let device = Default::default();
        let head = GaussianHead::<B>::new(8);
        let hidden = Tensor::random_device([64, 8], Distribution::Normal(0.0, 10.0), &device);
        let (_, sigma) = head.forward(hidden);
        for s in sigma.into_data().value {
            assert!(s > 0.0 && s.is_finite());
        }
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        let x = Tensor::<B, 1>::from_data(Data::new(
            vec![-100.0_f32, -1.0, 0.0, 1.0, 100.0],
            Shape::new([5]),
        ));
        let out = softplus(x).into_data().value;
        assert!(out[0] >= 0.0 && out[0] < 1e-6);
        assert_relative_eq!(out[2], (2.0_f32).ln(), epsilon = 1e-6);
        assert_relative_eq!(out[4], 100.0, epsilon = 1e-4);
        for v in out {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn log_prob_matches_reference_density() {
        let z = Tensor::<B, 1>::from_data(Data::new(vec![0.5_f32, -1.2, 3.0], Shape::new([3])));
        let mu = Tensor::<B, 1>::from_data(Data::new(vec![0.0_f32, -1.0, 2.5], Shape::new([3])));
        let sigma = Tensor::<B, 1>::from_data(Data::new(vec![1.0_f32, 0.5, 2.0], Shape::new([3])));

        let got = GaussianHead::<B>::log_prob(z.clone(), mu.clone(), sigma.clone())
            .into_data()
            .value;

        let z = z.into_data().value;
        let mu = mu.into_data().value;
        let sigma = sigma.into_data().value;
        for i in 0..3 {
            let expected = -0.5
                * ((2.0 * std::f32::consts::PI).ln()
                    + 2.0 * sigma[i].ln()
                    + ((z[i] - mu[i]) / sigma[i]).powi(2));
            assert_relative_eq!(got[i], expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn sampling_is_seeded_and_centered_on_mu_when_sigma_vanishes() {
        <B as Backend>::seed(5);
        let mu = Tensor::<B, 1>::from_data(Data::new(vec![3.0_f32; 4], Shape::new([4])));
        let sigma = Tensor::<B, 1>::from_data(Data::new(vec![0.0_f32; 4], Shape::new([4])));
        let sample = GaussianHead::<B>::sample(mu, sigma).into_data().value;
        for v in sample {
            assert_relative_eq!(v, 3.0);
        }
    }
}
