//! Frequency encoding of field inputs.

pub use burn::config::Config;

use burn::tensor::{backend::Backend, Tensor};

/// Options of [`PositionalEncoder`].
#[derive(Config, Debug)]
pub struct PositionalEncoderConfig {
    /// Count of frequency bands `2^0 .. 2^(L - 1)`.
    pub frequency_count: usize,

    /// Whether the raw input leads the encoded features.
    #[config(default = true)]
    pub include_input: bool,
}

/// A fixed frequency transform applied to coordinates before they reach the
/// field, letting it represent high-frequency detail.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionalEncoder {
    frequency_count: usize,
    include_input: bool,
}

impl PositionalEncoderConfig {
    #[inline]
    pub fn init(&self) -> PositionalEncoder {
        PositionalEncoder {
            frequency_count: self.frequency_count,
            include_input: self.include_input,
        }
    }
}

impl PositionalEncoder {
    /// Count of output channels for `input_size` input channels.
    #[inline]
    pub fn output_size(
        &self,
        input_size: usize,
    ) -> usize {
        input_size
            * (2 * self.frequency_count + usize::from(self.include_input))
    }

    /// Encodes `[N, F]` inputs to `[N, output_size(F)]`: the raw input when
    /// configured, then a sine and a cosine of the input per frequency band.
    pub fn encode<B: Backend>(
        &self,
        inputs: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let mut features = Vec::with_capacity(2 * self.frequency_count + 1);

        if self.include_input {
            features.push(inputs.to_owned());
        }
        for level in 0..self.frequency_count {
            let scaled = inputs.to_owned() * 2.0f32.powi(level as i32);
            features.push(scaled.to_owned().sin());
            features.push(scaled.cos());
        }

        Tensor::cat(features, 1)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn output_size() {
        use super::*;

        let encoder = PositionalEncoderConfig::new(10).init();
        assert_eq!(encoder.output_size(3), 63);

        let encoder = PositionalEncoderConfig::new(4)
            .with_include_input(false)
            .init();
        assert_eq!(encoder.output_size(3), 24);
    }

    #[test]
    fn encode_zero_input() {
        use super::*;
        use burn::tensor::TensorData;

        let device = Default::default();
        let inputs = Tensor::<burn::backend::NdArray, 2>::zeros([1, 1], &device);

        let output = PositionalEncoderConfig::new(2).init().encode(inputs);
        output
            .into_data()
            .assert_approx_eq(&TensorData::from([[0.0, 0.0, 1.0, 0.0, 1.0]]), 6);
    }

    #[test]
    fn encode_doubles_frequency() {
        use super::*;
        use burn::tensor::TensorData;

        let device = Default::default();
        let inputs = Tensor::<burn::backend::NdArray, 2>::from_floats(
            [[0.5]],
            &device,
        );

        let output = PositionalEncoderConfig::new(2).init().encode(inputs);
        output.into_data().assert_approx_eq(
            &TensorData::from([[
                0.5,
                0.5f32.sin(),
                0.5f32.cos(),
                1.0f32.sin(),
                1.0f32.cos(),
            ]]),
            6,
        );
    }
}
