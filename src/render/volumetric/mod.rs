pub mod integrate;
pub mod sample;

pub use crate::{
    field::{
        FieldQuery, FieldQueryConfig, PositionalEncoderConfig, RadianceField,
    },
    function::random::RandomSource,
    render::ray::{Camera, RayBatch},
};
pub use burn::config::Config;
pub use integrate::*;
pub use sample::*;

use crate::{
    error::Error,
    preset::render::{RAY_CHUNK_SIZE, SAMPLE_COUNT_COARSE},
};
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use std::fmt;

/// Options of [`VolumeRenderer`].
#[derive(Config, Debug)]
pub struct VolumeRendererConfig {
    /// Field query adapter options. A direction encoder here makes the
    /// pipeline view-direction-conditioned.
    pub query: FieldQueryConfig,

    /// Count of samples per ray in the first pass.
    #[config(default = "SAMPLE_COUNT_COARSE")]
    pub coarse_sample_count: usize,

    /// Count of importance samples per ray in the second pass.
    /// 0 disables the second pass.
    #[config(default = 0)]
    pub fine_sample_count: usize,

    /// Maximum count of rays per processed chunk. It bounds peak memory and
    /// never affects the rendered values.
    #[config(default = "RAY_CHUNK_SIZE")]
    pub ray_chunk_size: usize,

    /// Interpolate first-pass depths in inverse depth instead of depth.
    #[config(default = false)]
    pub sample_in_disparity: bool,

    /// Jitter first-pass depths within their bins, and draw second-pass
    /// depths from live uniforms instead of evenly spaced ones.
    #[config(default = true)]
    pub stratified: bool,

    /// Standard deviation of the density regularization noise.
    #[config(default = 0.0)]
    pub density_noise_std: f64,

    /// Composite unaccounted opacity as white.
    #[config(default = false)]
    pub white_background: bool,

    /// Retain the raw per-sample predictions of the last pass.
    #[config(default = false)]
    pub retain_raw: bool,

    /// Escalate non-finite outputs from a warning to an error.
    #[config(default = false)]
    pub debug_numerics: bool,
}

/// A two-pass volumetric renderer over a coarse field and an optional fine
/// field.
pub struct VolumeRenderer<B: Backend> {
    coarse_field: Box<dyn RadianceField<B>>,
    fine_field: Option<Box<dyn RadianceField<B>>>,
    query: FieldQuery,
    coarse_sample_count: usize,
    fine_sample_count: usize,
    ray_chunk_size: usize,
    sample_in_disparity: bool,
    stratified: bool,
    density_noise_std: f64,
    white_background: bool,
    retain_raw: bool,
    debug_numerics: bool,
}

/// Per-ray outputs of one render call.
#[derive(Clone)]
pub struct RenderOutput<B: Backend> {
    /// `[R, 3]`
    pub radiance: Tensor<B, 2>,
    /// `[R]` inverse mean depth
    pub disparity: Tensor<B, 1>,
    /// `[R]` accumulated opacity
    pub accumulation: Tensor<B, 1>,
    /// `[R]` expected termination depth
    pub depth: Tensor<B, 1>,
    /// `[R, S, C]` raw last-pass predictions, when retained
    pub raw: Option<Tensor<B, 3>>,
    /// First-pass maps, when the second pass produced the maps above
    pub coarse: Option<CoarseOutput<B>>,
    /// `[R]` standard deviation of second-pass depths, when present
    pub depth_std: Option<Tensor<B, 1>>,
}

/// First-pass maps retained for auxiliary losses.
#[derive(Clone)]
pub struct CoarseOutput<B: Backend> {
    /// `[R, 3]`
    pub radiance: Tensor<B, 2>,
    /// `[R]`
    pub disparity: Tensor<B, 1>,
    /// `[R]`
    pub accumulation: Tensor<B, 1>,
    /// `[R]`
    pub depth: Tensor<B, 1>,
}

/// Frame-shaped outputs of a full-camera render.
#[derive(Clone)]
pub struct RenderImage<B: Backend> {
    /// `[I_y, I_x, 3]`
    pub radiance: Tensor<B, 3>,
    /// `[I_y, I_x]`
    pub disparity: Tensor<B, 2>,
    /// `[I_y, I_x]`
    pub accumulation: Tensor<B, 2>,
    /// `[I_y, I_x]`
    pub depth: Tensor<B, 2>,
    /// `[I_y, I_x, S, C]`, when retained
    pub raw: Option<Tensor<B, 4>>,
    /// `[I_y, I_x]`, when the second pass ran
    pub depth_std: Option<Tensor<B, 2>>,
}

impl VolumeRendererConfig {
    /// Initializes the renderer, validating chunk sizes and sample counts
    /// before any rendering work.
    ///
    /// The second pass queries `fine_field` and falls back to `coarse_field`
    /// when it is absent.
    pub fn init<B: Backend>(
        &self,
        coarse_field: Box<dyn RadianceField<B>>,
        fine_field: Option<Box<dyn RadianceField<B>>>,
    ) -> Result<VolumeRenderer<B>, Error> {
        if self.coarse_sample_count == 0 {
            return Err(Error::Validation(
                "The coarse sample count".into(),
                "greater than 0".into(),
            ));
        }
        if self.fine_sample_count > 0 && self.coarse_sample_count < 3 {
            return Err(Error::Validation(
                "The coarse sample count".into(),
                "at least 3 when fine sampling is on".into(),
            ));
        }
        if self.ray_chunk_size == 0 {
            return Err(Error::Validation(
                "The ray chunk size".into(),
                "greater than 0".into(),
            ));
        }

        Ok(VolumeRenderer {
            coarse_field,
            fine_field,
            query: self.query.init()?,
            coarse_sample_count: self.coarse_sample_count,
            fine_sample_count: self.fine_sample_count,
            ray_chunk_size: self.ray_chunk_size,
            sample_in_disparity: self.sample_in_disparity,
            stratified: self.stratified,
            density_noise_std: self.density_noise_std,
            white_background: self.white_background,
            retain_raw: self.retain_raw,
            debug_numerics: self.debug_numerics,
        })
    }
}

impl<B: Backend> VolumeRenderer<B> {
    /// Renders a flat ray batch.
    ///
    /// View directions are attached (normalized ray directions) or stripped
    /// to match the field conditioning. When `ndc_camera` is provided, rays
    /// are then reprojected into its normalized device coordinate space.
    ///
    /// Rays are processed in chunks of at most the configured size, strictly
    /// in order; outputs are concatenated back so chunking is invisible in
    /// the result.
    pub fn render(
        &self,
        rays: RayBatch<B>,
        ndc_camera: Option<&Camera>,
        random: &RandomSource,
    ) -> Result<RenderOutput<B>, Error> {
        let mut rays = if self.query.is_direction_conditioned() {
            rays.with_view_directions()
        } else {
            RayBatch {
                view_directions: None,
                ..rays
            }
        };
        if let Some(camera) = ndc_camera {
            rays = rays.reproject_ndc(camera);
        }

        log::debug!(
            target: "nerf_renderer::render",
            "VolumeRenderer::render > {:?}",
            rays,
        );

        let records = rays.into_records();
        let [ray_count, _] = records.dims();

        let mut outputs =
            Vec::with_capacity(ray_count.div_ceil(self.ray_chunk_size));
        for start in (0..ray_count).step_by(self.ray_chunk_size) {
            let end = (start + self.ray_chunk_size).min(ray_count);
            outputs.push(self.render_chunk(
                records.to_owned().slice([start..end]),
                random,
            )?);
        }

        let output = RenderOutput::concatenate(outputs);
        self.check_finite(&output)?;

        Ok(output)
    }

    /// Renders a full frame from a camera pose.
    ///
    /// With `static_camera`, view directions still come from `camera` while
    /// ray geometry comes from the substitute transform, isolating the effect
    /// of view conditioning. With `ndc`, rays are reprojected per
    /// [`RayBatch::reproject_ndc`].
    pub fn render_camera(
        &self,
        camera: &Camera,
        static_camera: Option<&Camera>,
        near: f32,
        far: f32,
        ndc: bool,
        random: &RandomSource,
        device: &B::Device,
    ) -> Result<RenderImage<B>, Error> {
        let mut rays = RayBatch::from_camera(camera, near, far, device);
        if self.query.is_direction_conditioned() {
            rays = rays.with_view_directions();
        }
        if let Some(static_camera) = static_camera {
            let view_directions = rays.view_directions;
            rays =
                RayBatch::from_camera(static_camera, near, far, device);
            rays.view_directions = view_directions;
        }

        let output = self.render(rays, ndc.then_some(camera), random)?;
        Ok(output.into_image(camera.image_height, camera.image_width))
    }

    /// Runs the coarse pass, and the fine pass when configured, over one
    /// chunk of ray records.
    fn render_chunk(
        &self,
        records: Tensor<B, 2>,
        random: &RandomSource,
    ) -> Result<RenderOutput<B>, Error> {
        let rays = RayBatch::from_records(records)?;
        let ray_count = rays.ray_count();
        let sample_count = self.coarse_sample_count;

        let depths = sample_coarse(
            rays.nears.to_owned(),
            rays.fars.to_owned(),
            sample_count,
            self.sample_in_disparity,
            self.stratified,
            random,
        );

        let raw = self.query.query(
            self.field(false),
            rays.points_at(&depths),
            rays.view_directions.to_owned(),
        )?;
        let retained_raw = self.retain_raw.then(|| raw.to_owned());
        let coarse = integrate(
            raw,
            depths.to_owned(),
            rays.directions.to_owned(),
            self.density_noise_std,
            self.white_background,
            random,
        );

        if self.fine_sample_count == 0 {
            return Ok(RenderOutput {
                radiance: coarse.radiance,
                disparity: coarse.disparity,
                accumulation: coarse.accumulation,
                depth: coarse.depth,
                raw: retained_raw,
                coarse: None,
                depth_std: None,
            });
        }

        // redistribute further samples toward the mass the first pass found,
        // from the interior weights to avoid edge artifacts
        let bins = (depths.to_owned().slice([0..ray_count, 1..sample_count])
            + depths
                .to_owned()
                .slice([0..ray_count, 0..sample_count - 1]))
            * 0.5;
        let fine_depths = sample_importance(
            bins,
            coarse
                .weights
                .to_owned()
                .slice([0..ray_count, 1..sample_count - 1]),
            self.fine_sample_count,
            !self.stratified,
            random,
        );
        let depth_std =
            fine_depths.to_owned().var_bias(1).sqrt().squeeze::<1>(1);
        let depths = merge_depths(depths, fine_depths);

        let raw = self.query.query(
            self.field(true),
            rays.points_at(&depths),
            rays.view_directions.to_owned(),
        )?;
        let retained_raw = self.retain_raw.then(|| raw.to_owned());
        let fine = integrate(
            raw,
            depths,
            rays.directions,
            self.density_noise_std,
            self.white_background,
            random,
        );

        Ok(RenderOutput {
            radiance: fine.radiance,
            disparity: fine.disparity,
            accumulation: fine.accumulation,
            depth: fine.depth,
            raw: retained_raw,
            coarse: Some(CoarseOutput {
                radiance: coarse.radiance,
                disparity: coarse.disparity,
                accumulation: coarse.accumulation,
                depth: coarse.depth,
            }),
            depth_std: Some(depth_std),
        })
    }

    /// The field queried by a pass. The fine pass falls back to the coarse
    /// field when no separate fine field is attached.
    #[inline]
    fn field(
        &self,
        fine: bool,
    ) -> &dyn RadianceField<B> {
        if fine {
            self.fine_field
                .as_deref()
                .unwrap_or(self.coarse_field.as_ref())
        } else {
            self.coarse_field.as_ref()
        }
    }

    /// Scans the output maps for NaN/Inf contamination: a warning in
    /// production, an error in debug-numerics mode.
    fn check_finite(
        &self,
        output: &RenderOutput<B>,
    ) -> Result<(), Error> {
        let mut checks = vec![
            ("radiance", check_sum(&output.radiance)),
            ("disparity", check_sum(&output.disparity)),
            ("accumulation", check_sum(&output.accumulation)),
            ("depth", check_sum(&output.depth)),
        ];
        if let Some(raw) = &output.raw {
            checks.push(("raw", check_sum(raw)));
        }
        if let Some(coarse) = &output.coarse {
            checks.push(("coarse radiance", check_sum(&coarse.radiance)));
            checks.push(("coarse disparity", check_sum(&coarse.disparity)));
            checks
                .push(("coarse accumulation", check_sum(&coarse.accumulation)));
            checks.push(("coarse depth", check_sum(&coarse.depth)));
        }
        if let Some(depth_std) = &output.depth_std {
            checks.push(("depth std", check_sum(depth_std)));
        }

        for (name, sum) in checks {
            if sum.is_finite() {
                continue;
            }
            log::warn!(
                target: "nerf_renderer::render",
                "The {name} map contains NaN or Inf values",
            );
            if self.debug_numerics {
                return Err(Error::NonFinite(format!("The {name} map")));
            }
        }

        Ok(())
    }
}

impl<B: Backend> RenderOutput<B> {
    /// Reshapes the per-ray maps to the frame layout of a `[I_y, I_x]`
    /// camera. First-pass maps stay per-ray; use [`VolumeRenderer::render`]
    /// when they are needed.
    pub fn into_image(
        self,
        image_height: u32,
        image_width: u32,
    ) -> RenderImage<B> {
        let height = image_height as usize;
        let width = image_width as usize;

        RenderImage {
            radiance: self.radiance.reshape([height, width, 3]),
            disparity: self.disparity.reshape([height, width]),
            accumulation: self.accumulation.reshape([height, width]),
            depth: self.depth.reshape([height, width]),
            raw: self.raw.map(|raw| {
                let [_, sample_count, channel_count] = raw.dims();
                raw.reshape([height, width, sample_count, channel_count])
            }),
            depth_std: self
                .depth_std
                .map(|depth_std| depth_std.reshape([height, width])),
        }
    }

    /// Concatenates chunk outputs in their original ray order.
    fn concatenate(outputs: Vec<Self>) -> Self {
        let count = outputs.len();
        let mut radiances = Vec::with_capacity(count);
        let mut disparities = Vec::with_capacity(count);
        let mut accumulations = Vec::with_capacity(count);
        let mut depths = Vec::with_capacity(count);
        let mut raws = Vec::with_capacity(count);
        let mut coarse_radiances = Vec::with_capacity(count);
        let mut coarse_disparities = Vec::with_capacity(count);
        let mut coarse_accumulations = Vec::with_capacity(count);
        let mut coarse_depths = Vec::with_capacity(count);
        let mut depth_stds = Vec::with_capacity(count);

        for output in outputs {
            radiances.push(output.radiance);
            disparities.push(output.disparity);
            accumulations.push(output.accumulation);
            depths.push(output.depth);
            if let Some(raw) = output.raw {
                raws.push(raw);
            }
            if let Some(coarse) = output.coarse {
                coarse_radiances.push(coarse.radiance);
                coarse_disparities.push(coarse.disparity);
                coarse_accumulations.push(coarse.accumulation);
                coarse_depths.push(coarse.depth);
            }
            if let Some(depth_std) = output.depth_std {
                depth_stds.push(depth_std);
            }
        }

        Self {
            radiance: Tensor::cat(radiances, 0),
            disparity: Tensor::cat(disparities, 0),
            accumulation: Tensor::cat(accumulations, 0),
            depth: Tensor::cat(depths, 0),
            raw: (!raws.is_empty()).then(|| Tensor::cat(raws, 0)),
            coarse: (!coarse_radiances.is_empty()).then(|| CoarseOutput {
                radiance: Tensor::cat(coarse_radiances, 0),
                disparity: Tensor::cat(coarse_disparities, 0),
                accumulation: Tensor::cat(coarse_accumulations, 0),
                depth: Tensor::cat(coarse_depths, 0),
            }),
            depth_std: (!depth_stds.is_empty())
                .then(|| Tensor::cat(depth_stds, 0)),
        }
    }
}

fn check_sum<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> f32 {
    tensor.to_owned().sum().into_scalar().elem()
}

impl<B: Backend> fmt::Debug for VolumeRenderer<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("VolumeRenderer<{}>", B::name()))
            .field("coarse_field", &self.coarse_field)
            .field("fine_field", &self.fine_field)
            .field("coarse_sample_count", &self.coarse_sample_count)
            .field("fine_sample_count", &self.fine_sample_count)
            .field("ray_chunk_size", &self.ray_chunk_size)
            .finish()
    }
}

impl<B: Backend> fmt::Debug for RenderOutput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("RenderOutput<{}>", B::name()))
            .field("radiance.dims()", &self.radiance.dims())
            .field("raw", &self.raw.as_ref().map(Tensor::dims))
            .field("coarse", &self.coarse.is_some())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for RenderImage<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("RenderImage<{}>", B::name()))
            .field("radiance.dims()", &self.radiance.dims())
            .finish()
    }
}
