//! Emission-absorption integration of raw field predictions into per-ray
//! outputs.

use crate::function::{random::RandomSource, TensorExtension};
use crate::preset::render::{
    DISTANCE_INFINITE, EPSILON_DISPARITY, EPSILON_TRANSMITTANCE,
};
use burn::tensor::{activation, backend::Backend, Tensor};

/// Per-ray products of one integration pass.
#[derive(Clone, Debug)]
pub struct Integration<B: Backend> {
    /// `[R, 3]`
    pub radiance: Tensor<B, 2>,
    /// `[R]`
    pub disparity: Tensor<B, 1>,
    /// `[R]`
    pub accumulation: Tensor<B, 1>,
    /// `[R, S]`
    pub weights: Tensor<B, 2>,
    /// `[R]`
    pub depth: Tensor<B, 1>,
}

/// Integrates raw per-sample predictions (`[R, S, C]`: 3 color logits, then a
/// density pre-activation; further channels are ignored) over ascending
/// sample depths (`[R, S]`) into per-ray outputs.
///
/// `density_noise_std > 0` perturbs the density pre-activation with Gaussian
/// noise before activation, regularizing against spurious high-density
/// solutions during training.
///
/// Inter-sample distances are scaled by the direction magnitude, so
/// `directions` (`[R, 3]`) need not be unit length.
pub fn integrate<B: Backend>(
    raw: Tensor<B, 3>,
    depths: Tensor<B, 2>,
    directions: Tensor<B, 2>,
    density_noise_std: f64,
    white_background: bool,
    random: &RandomSource,
) -> Integration<B> {
    let device = depths.device();
    let [ray_count, sample_count] = depths.dims();

    // [R, S] inter-sample distances, terminated by an effectively infinite
    // interval behind the last sample
    let distances = if sample_count > 1 {
        Tensor::cat(
            vec![
                depths.to_owned().slice([0..ray_count, 1..sample_count])
                    - depths
                        .to_owned()
                        .slice([0..ray_count, 0..sample_count - 1]),
                Tensor::full([ray_count, 1], DISTANCE_INFINITE, &device),
            ],
            1,
        )
    } else {
        Tensor::full([ray_count, 1], DISTANCE_INFINITE, &device)
    };
    let distances =
        distances * directions.powf_scalar(2.0).sum_dim(1).sqrt();

    // [R, S, 3]
    let colors = activation::sigmoid(raw.to_owned().slice([
        0..ray_count,
        0..sample_count,
        0..3,
    ]));
    // [R, S]
    let mut densities = raw
        .slice([0..ray_count, 0..sample_count, 3..4])
        .squeeze::<2>(2);
    if density_noise_std > 0.0 {
        densities = densities
            + random.normal::<B, 2>(
                [ray_count, sample_count],
                density_noise_std,
                &device,
            );
    }

    // [R, S]
    let alphas =
        -(-activation::relu(densities) * distances).exp() + 1.0;
    // transmittance up to, excluding, each sample; the epsilon keeps the
    // product from collapsing to exact zero behind a fully opaque sample
    let transmittances = (-alphas.to_owned() + 1.0)
        .add_scalar(EPSILON_TRANSMITTANCE)
        .prod_cumulative_exclusive(1);
    let weights = alphas * transmittances;

    // [R, 3]
    let radiance = (weights.to_owned().unsqueeze_dim::<3>(2) * colors)
        .sum_dim(1)
        .squeeze::<2>(1);
    // [R]
    let depth = (weights.to_owned() * depths).sum_dim(1).squeeze::<1>(1);
    let accumulation = weights.to_owned().sum_dim(1).squeeze::<1>(1);

    // both guards keep fully transparent rays finite
    let mean_depth = depth.to_owned()
        / accumulation.to_owned().clamp_min(EPSILON_DISPARITY);
    let disparity = mean_depth.clamp_min(EPSILON_DISPARITY).recip();

    let radiance = if white_background {
        radiance + (-accumulation.to_owned().unsqueeze_dim::<2>(1) + 1.0)
    } else {
        radiance
    };

    Integration {
        radiance,
        disparity,
        accumulation,
        weights,
        depth,
    }
}
