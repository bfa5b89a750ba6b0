//! Single linear layer shared by the classifier and the regressor
//!
//! Architecture: Input(dim) → Linear(output_dim)
//! - classification: one logit per label, softmax for probabilities
//! - regression: one normalized score

use burn::module::{Module, Param};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

/// Linear model `y = x · W + b` with explicitly provided parameters
#[derive(Module, Debug)]
pub struct LinearModel<B: Backend> {
    /// Weights [input_dim, output_dim]
    weight: Param<Tensor<B, 2>>,
    /// Bias [output_dim]
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> LinearModel<B> {
    /// Build the layer from row-major weights and a bias vector
    pub fn from_params(
        device: &B::Device,
        input_dim: usize,
        output_dim: usize,
        weights: &[f32],
        bias: &[f32],
    ) -> Self {
        let weight = Tensor::<B, 2>::from_data(
            TensorData::new(weights.to_vec(), [input_dim, output_dim]),
            device,
        );
        let bias = Tensor::<B, 1>::from_data(TensorData::new(bias.to_vec(), [output_dim]), device);

        LinearModel {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Encoded features [batch, input_dim]
    ///
    /// # Returns
    /// Raw outputs [batch, output_dim]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>()
    }

    /// Class probabilities [batch, output_dim]
    pub fn probabilities(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Copy the parameters out as (weights, bias)
    pub fn params(&self) -> std::result::Result<(Vec<f32>, Vec<f32>), String> {
        let weights = tensor_values(self.weight.val())?;
        let bias = tensor_values(self.bias.val())?;
        Ok((weights, bias))
    }
}

/// Flatten a float tensor into a vector
pub fn tensor_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> std::result::Result<Vec<f32>, String> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| format!("failed to read tensor data: {:?}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_matches_manual() {
        let device = Default::default();
        // 2 inputs, 3 outputs
        let weights = [1.0, 0.0, -1.0, 0.5, 2.0, 0.0];
        let bias = [0.1, 0.2, 0.3];
        let model = LinearModel::<TestBackend>::from_params(&device, 2, 3, &weights, &bias);

        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0], [1, 2]),
            &device,
        );
        let y = tensor_values(model.forward(x)).unwrap();

        let expected = [1.0 + 1.0 + 0.1, 0.0 + 4.0 + 0.2, -1.0 + 0.0 + 0.3];
        for (got, want) in y.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "got {}, want {}", got, want);
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = LinearModel::<TestBackend>::from_params(
            &device,
            2,
            3,
            &[0.3, -0.2, 0.7, 1.1, 0.0, -0.4],
            &[0.0, 0.0, 0.0],
        );
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]),
            &device,
        );
        let probs = tensor_values(model.probabilities(x)).unwrap();

        for row in probs.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_params_roundtrip() {
        let device = Default::default();
        let weights = [0.25, -0.5];
        let bias = [1.5];
        let model = LinearModel::<TestBackend>::from_params(&device, 2, 1, &weights, &bias);
        let (w, b) = model.params().unwrap();
        assert_eq!(w, weights);
        assert_eq!(b, bias);
    }
}
