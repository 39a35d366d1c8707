//! Depth scheduling along rays: a stratified first pass, then importance
//! resampling of the mass the first pass found.

use crate::function::{
    linspace, random::RandomSource, search_sorted_right, TensorExtension,
};
use crate::preset::render::EPSILON_CDF;
use burn::tensor::{backend::Backend, Tensor};

/// Draws `sample_count` depths per ray between `nears` and `fars` (`[R, 1]`
/// each), linearly in depth, or linearly in inverse depth to concentrate
/// samples near the camera for unbounded scenes.
///
/// With `stratified`, each depth is jittered uniformly within its bin:
/// bin bounds are the midpoints between neighboring depths.
///
/// The output is `[R, S]`, ascending within each ray.
pub fn sample_coarse<B: Backend>(
    nears: Tensor<B, 2>,
    fars: Tensor<B, 2>,
    sample_count: usize,
    in_disparity: bool,
    stratified: bool,
    random: &RandomSource,
) -> Tensor<B, 2> {
    let device = nears.device();
    let [ray_count, _] = nears.dims();

    // [R, S]
    let t = linspace::<B>(0.0, 1.0, sample_count, &device)
        .unsqueeze_dim::<2>(0)
        .expand([ray_count, sample_count]);
    let nears = nears.expand([ray_count, sample_count]);
    let fars = fars.expand([ray_count, sample_count]);

    let mut depths = if in_disparity {
        (nears.recip() * (-t.to_owned() + 1.0) + fars.recip() * t).recip()
    } else {
        nears * (-t.to_owned() + 1.0) + fars * t
    };

    if stratified && sample_count > 1 {
        let mids = (depths.to_owned().slice([0..ray_count, 1..sample_count])
            + depths.to_owned().slice([0..ray_count, 0..sample_count - 1]))
            * 0.5;
        let upper = Tensor::cat(
            vec![
                mids.to_owned(),
                depths
                    .to_owned()
                    .slice([0..ray_count, sample_count - 1..sample_count]),
            ],
            1,
        );
        let lower =
            Tensor::cat(vec![depths.slice([0..ray_count, 0..1]), mids], 1);

        let jitter = random.uniform::<B, 2>([ray_count, sample_count], &device);
        depths = lower.to_owned() + (upper - lower) * jitter;
    }

    depths
}

/// Draws `sample_count` depths per ray by inverse-CDF sampling of the
/// piecewise-constant density that `weights` (`[R, M]`, non-negative) induce
/// over the intervals bounded by `bins` (`[R, M + 1]`, ascending).
///
/// Rows with (near-)zero mass degrade to a uniform density, and zero-width
/// CDF intervals resolve to the interval's lower edge, so no input produces
/// NaN or out-of-range depths.
///
/// With `deterministic`, the drawn CDF values are evenly spaced over `[0, 1]`
/// and the output is reproducible bit-for-bit.
///
/// The output is `[R, sample_count]`, detached: gradients flow through the
/// field values at the samples, never through their placement.
pub fn sample_importance<B: Backend>(
    bins: Tensor<B, 2>,
    weights: Tensor<B, 2>,
    sample_count: usize,
    deterministic: bool,
    random: &RandomSource,
) -> Tensor<B, 2> {
    let device = bins.device();
    let [ray_count, bin_count] = bins.dims();

    let weights = weights + EPSILON_CDF;
    let pdf = weights.to_owned() / weights.sum_dim(1);
    // [R, M + 1], leading 0
    let cdf = Tensor::cat(
        vec![Tensor::zeros([ray_count, 1], &device), pdf.sum_cumulative(1)],
        1,
    );

    // [R, N]
    let u = if deterministic {
        linspace::<B>(0.0, 1.0, sample_count, &device)
            .unsqueeze_dim::<2>(0)
            .expand([ray_count, sample_count])
    } else {
        random.uniform::<B, 2>([ray_count, sample_count], &device)
    };

    // bracketing CDF interval per drawn value, clamped to the valid range
    let last = (bin_count - 1) as i64;
    let indices = search_sorted_right(cdf.to_owned(), u.to_owned());
    let below = indices.to_owned().sub_scalar(1).clamp(0, last);
    let above = indices.clamp(0, last);

    let cdf_below = cdf.to_owned().gather(1, below.to_owned());
    let cdf_above = cdf.gather(1, above.to_owned());
    let bins_below = bins.to_owned().gather(1, below);
    let bins_above = bins.gather(1, above);

    // a zero-width interval resolves to its lower edge
    let widths = cdf_above - cdf_below.to_owned();
    let widths =
        widths.to_owned().mask_fill(widths.lower_elem(EPSILON_CDF), 1.0);

    let fractions = (u - cdf_below) / widths;
    let samples =
        bins_below.to_owned() + fractions * (bins_above - bins_below);

    samples.detach()
}

/// Merges two per-ray depth sets (`[R, S_a]` and `[R, S_b]`) and re-sorts
/// ascending, ahead of the second field query.
pub fn merge_depths<B: Backend>(
    a: Tensor<B, 2>,
    b: Tensor<B, 2>,
) -> Tensor<B, 2> {
    Tensor::cat(vec![a, b], 1).sort(1)
}
