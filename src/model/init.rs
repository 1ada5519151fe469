//! Weight initialisation helpers.
//!
//! All randomness goes through the backend RNG so `B::seed` makes
//! model construction reproducible.

use burn::tensor::backend::Backend;
use burn::tensor::{Data, Distribution, ElementConversion, Shape, Tensor};

/// Xavier-uniform matrix of shape (fan_in, fan_out).
pub fn xavier_uniform<B: Backend>(
    fan_in: usize,
    fan_out: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Tensor::random_device(
        [fan_in, fan_out],
        Distribution::Uniform((-bound).elem(), bound.elem()),
        device,
    )
}

/// Gaussian matrix with the given standard deviation.
pub fn normal<B: Backend>(shape: [usize; 2], std: f64, device: &B::Device) -> Tensor<B, 2> {
    Tensor::random_device(shape, Distribution::Normal(0.0, std), device)
}

/// Matrix with orthonormal rows, from Gram-Schmidt over a Gaussian
/// draw. Requires rows <= cols.
pub fn orthogonal<B: Backend>(rows: usize, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    assert!(rows <= cols, "orthogonal init needs rows <= cols");

    let draw: Tensor<B, 2> =
        Tensor::random_device([rows, cols], Distribution::Normal(0.0, 1.0), device);
    let mut matrix: Vec<Vec<f32>> = draw
        .into_data()
        .convert::<f32>()
        .value
        .chunks(cols)
        .map(|row| row.to_vec())
        .collect();

    for i in 0..rows {
        for j in 0..i {
            let prior = matrix[j].clone();
            let dot: f32 = matrix[i].iter().zip(&prior).map(|(a, b)| a * b).sum();
            for (x, p) in matrix[i].iter_mut().zip(&prior) {
                *x -= dot * p;
            }
        }
        let norm = matrix[i]
            .iter()
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt()
            .max(1e-8);
        for x in matrix[i].iter_mut() {
            *x /= norm;
        }
    }

    let flat: Vec<f32> = matrix.into_iter().flatten().collect();
    Tensor::from_data(Data::new(flat, Shape::new([rows, cols])).convert()).to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn xavier_values_stay_in_bound() {
        <B as Backend>::seed(0);
        let device = Default::default();
        let tensor = xavier_uniform::<B>(8, 24, &device);
        let bound = (6.0 / 32.0_f64).sqrt() as f32;
        for v in tensor.into_data().value {
            assert!(v.abs() <= bound);
        }
    }

    #[test]
    fn orthogonal_rows_are_orthonormal() {
        <B as Backend>::seed(0);
        let device = Default::default();
        let rows = 4;
        let cols = 16;
        let data = orthogonal::<B>(rows, cols, &device).into_data().value;
        let row = |i: usize| &data[i * cols..(i + 1) * cols];

        for i in 0..rows {
            let norm: f32 = row(i).iter().map(|x| x * x).sum();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
            for j in 0..i {
                let dot: f32 = row(i).iter().zip(row(j)).map(|(a, b)| a * b).sum();
                assert_relative_eq!(dot, 0.0, epsilon = 1e-4);
            }
        }
    }
}
