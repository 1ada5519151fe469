//! Training objectives.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::model::GaussianHead;

/// Mean Gaussian negative log-likelihood over all positions and batch
/// elements, computed against scaled values. No masking; the step-0
/// prediction (zero previous-value input) contributes like any other
/// position.
pub fn gaussian_nll<B: Backend>(
    z: Tensor<B, 2>,
    mu: Tensor<B, 2>,
    sigma: Tensor<B, 2>,
) -> Tensor<B, 1> {
    GaussianHead::log_prob(z, mu, sigma).mean().neg()
}

/// Mean squared error, the point-forecast objective of the baselines.
pub fn mse<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    (predictions - targets).powf(2.0).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Data, Shape};

    type B = NdArray<f32>;

    #[test]
    fn nll_matches_reference_computation() {
        let z = Tensor::<B, 2>::from_data(Data::new(vec![0.5_f32, 1.0], Shape::new([1, 2])));
        let mu = Tensor::<B, 2>::from_data(Data::new(vec![0.0_f32, 1.5], Shape::new([1, 2])));
        let sigma = Tensor::<B, 2>::from_data(Data::new(vec![1.0_f32, 0.5], Shape::new([1, 2])));

        let got = gaussian_nll(z, mu, sigma).into_scalar();

        let reference = |z: f32, mu: f32, sigma: f32| {
            0.5 * ((2.0 * std::f32::consts::PI).ln()
                + 2.0 * sigma.ln()
                + ((z - mu) / sigma).powi(2))
        };
        let expected = (reference(0.5, 0.0, 1.0) + reference(1.0, 1.5, 0.5)) / 2.0;
        assert_relative_eq!(got, expected, epsilon = 1e-6);
    }

    #[test]
    fn mse_of_exact_predictions_is_zero() {
        let t = Tensor::<B, 2>::from_data(Data::new(vec![1.0_f32, 2.0], Shape::new([1, 2])));
        assert_relative_eq!(mse(t.clone(), t).into_scalar(), 0.0);
    }
}
