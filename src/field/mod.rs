//! The seam between the render pipeline and the learned radiance field.

pub mod encoder;

pub use encoder::*;

use crate::{error::Error, preset::render::POINT_CHUNK_SIZE};
use burn::tensor::{backend::Backend, Tensor};
use std::fmt;

/// An opaque queryable radiance field.
///
/// The raw output per sample is 3 color logits and 1 density pre-activation;
/// some fine networks emit a 5th channel, which is carried through untouched.
pub trait RadianceField<B: Backend>: fmt::Debug {
    /// Count of raw output channels, 4 unless a 5-channel variant.
    #[inline]
    fn channel_count(&self) -> usize {
        4
    }

    /// Evaluates the field on encoded features.
    ///
    /// `features` is `[N, F]`, the output is `[N, C]`.
    fn forward(
        &self,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2>;
}

/// Options of [`FieldQuery`].
#[derive(Config, Debug)]
pub struct FieldQueryConfig {
    /// Encoder of sample positions.
    pub position_encoder: PositionalEncoderConfig,

    /// Encoder of unit view directions. Its presence makes the whole pipeline
    /// view-direction-conditioned.
    pub direction_encoder: Option<PositionalEncoderConfig>,

    /// Maximum count of samples per field invocation.
    #[config(default = "POINT_CHUNK_SIZE")]
    pub point_chunk_size: usize,
}

/// Prepares sample batches for the field and bounds the size of each
/// invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldQuery {
    position_encoder: PositionalEncoder,
    direction_encoder: Option<PositionalEncoder>,
    point_chunk_size: usize,
}

impl FieldQueryConfig {
    pub fn init(&self) -> Result<FieldQuery, Error> {
        if self.point_chunk_size == 0 {
            return Err(Error::Validation(
                "The point chunk size".into(),
                "greater than 0".into(),
            ));
        }

        Ok(FieldQuery {
            position_encoder: self.position_encoder.init(),
            direction_encoder: self
                .direction_encoder
                .as_ref()
                .map(PositionalEncoderConfig::init),
            point_chunk_size: self.point_chunk_size,
        })
    }
}

impl FieldQuery {
    #[inline]
    pub fn is_direction_conditioned(&self) -> bool {
        self.direction_encoder.is_some()
    }

    /// Queries `field` at `points` (`[R, S, 3]`) with one unit view direction
    /// per ray (`[R, 3]`) broadcast across its samples.
    ///
    /// The field is invoked on at most `point_chunk_size` samples at a time,
    /// and chunk outputs are concatenated in order.
    ///
    /// The output is `[R, S, C]`.
    pub fn query<B: Backend>(
        &self,
        field: &dyn RadianceField<B>,
        points: Tensor<B, 3>,
        view_directions: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 3>, Error> {
        let channel_count = field.channel_count();
        if channel_count != 4 && channel_count != 5 {
            return Err(Error::Validation(
                "The field channel count".into(),
                "4 or 5".into(),
            ));
        }
        if self.direction_encoder.is_some() != view_directions.is_some() {
            return Err(Error::Validation(
                "The view directions".into(),
                "provided if and only if a direction encoder is configured"
                    .into(),
            ));
        }

        let [ray_count, sample_count, _] = points.dims();
        let point_count = ray_count * sample_count;

        let mut features = self.position_encoder.encode(points.reshape([-1, 3]));
        if let (Some(encoder), Some(directions)) =
            (&self.direction_encoder, view_directions)
        {
            let directions = directions
                .unsqueeze_dim::<3>(1)
                .expand([ray_count, sample_count, 3])
                .reshape([-1, 3]);
            features =
                Tensor::cat(vec![features, encoder.encode(directions)], 1);
        }

        let outputs = (0..point_count)
            .step_by(self.point_chunk_size)
            .map(|start| {
                let end = (start + self.point_chunk_size).min(point_count);
                field.forward(features.to_owned().slice([start..end]))
            })
            .collect();

        Ok(Tensor::cat(outputs, 0).reshape([
            ray_count,
            sample_count,
            channel_count,
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    type Backend = burn::backend::NdArray;

    /// Echoes the raw positions as color logits and their coordinate sum as
    /// the density pre-activation.
    #[derive(Debug)]
    struct EchoField;

    impl RadianceField<Backend> for EchoField {
        fn forward(
            &self,
            features: Tensor<Backend, 2>,
        ) -> Tensor<Backend, 2> {
            let [row_count, _] = features.dims();
            let positions = features.slice([0..row_count, 0..3]);
            let densities = positions.to_owned().sum_dim(1);

            Tensor::cat(vec![positions, densities], 1)
        }
    }

    #[test]
    fn query_output_shape() {
        let device = Default::default();
        let query = FieldQueryConfig::new(PositionalEncoderConfig::new(4))
            .init()
            .unwrap();

        let points = Tensor::<Backend, 3>::random(
            [5, 7, 3],
            Distribution::Default,
            &device,
        );
        let output = query.query(&EchoField, points, None).unwrap();
        assert_eq!(output.dims(), [5, 7, 4]);
    }

    #[test]
    fn query_chunking_is_invisible() {
        let device = Default::default();
        let points = Tensor::<Backend, 3>::random(
            [4, 9, 3],
            Distribution::Default,
            &device,
        );

        let whole = FieldQueryConfig::new(PositionalEncoderConfig::new(4))
            .init()
            .unwrap()
            .query(&EchoField, points.to_owned(), None)
            .unwrap();
        let chunked = FieldQueryConfig::new(PositionalEncoderConfig::new(4))
            .with_point_chunk_size(5)
            .init()
            .unwrap()
            .query(&EchoField, points, None)
            .unwrap();

        chunked.into_data().assert_approx_eq(&whole.into_data(), 6);
    }

    #[test]
    fn query_rejects_mismatched_conditioning() {
        let device = Default::default();
        let query = FieldQueryConfig::new(PositionalEncoderConfig::new(4))
            .init()
            .unwrap();

        let points = Tensor::<Backend, 3>::zeros([2, 3, 3], &device);
        let directions = Tensor::<Backend, 2>::zeros([2, 3], &device);
        let output = query.query(&EchoField, points, Some(directions));
        assert!(output.is_err(), "Error: {:?}", output.map(|_| ()));
    }

    #[test]
    fn config_rejects_zero_chunk() {
        let config = FieldQueryConfig::new(PositionalEncoderConfig::new(4))
            .with_point_chunk_size(0);
        assert!(config.init().is_err());
    }
}
