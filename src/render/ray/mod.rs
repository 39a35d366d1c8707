//! Camera rays, one per pixel, and their packed batch form.

use crate::{error::Error, preset::render::NDC_NEAR_PLANE};
use burn::tensor::{backend::Backend, Int, Tensor};
use humansize::{format_size, BINARY};
use std::{fmt, mem};

/// A pinhole camera with its pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// Focal length along the image x axis, in pixels.
    pub focal_length_x: f64,
    /// Focal length along the image y axis, in pixels.
    pub focal_length_y: f64,
    /// Optical center along the image x axis, in pixels.
    pub principal_point_x: f64,
    /// Optical center along the image y axis, in pixels.
    pub principal_point_y: f64,
    /// Affine transformation from camera space to world space.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R | t]
    /// ```
    pub camera_transform: [[f64; 4]; 3],
}

impl Camera {
    /// A camera with a single focal length and a centered optical center.
    pub fn from_focal(
        image_height: u32,
        image_width: u32,
        focal_length: f64,
        camera_transform: [[f64; 4]; 3],
    ) -> Self {
        Self {
            image_height,
            image_width,
            focal_length_x: focal_length,
            focal_length_y: focal_length,
            principal_point_x: image_width as f64 / 2.0,
            principal_point_y: image_height as f64 / 2.0,
            camera_transform,
        }
    }

    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_height as usize * self.image_width as usize
    }
}

/// Ray casting.
impl Camera {
    /// One ray per pixel: origins and directions, `[I_y, I_x, 3]` each.
    ///
    /// Directions are the rotated camera-space pixel bearings
    /// `((x - c_x) / f_x, -(y - c_y) / f_y, -1)` and are not unit length.
    pub fn shoot_rays<B: Backend>(
        &self,
        device: &B::Device,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let height = self.image_height as usize;
        let width = self.image_width as usize;

        // [I_y, I_x] pixel coordinates
        let x = Tensor::<B, 1, Int>::arange(0..width as i64, device)
            .float()
            .unsqueeze_dim::<2>(0)
            .expand([height, width]);
        let y = Tensor::<B, 1, Int>::arange(0..height as i64, device)
            .float()
            .unsqueeze_dim::<2>(1)
            .expand([height, width]);

        // [I_y, I_x, 3] bearings in camera space (x right, y up, z backward)
        let bearings = Tensor::stack::<3>(
            vec![
                (x - self.principal_point_x as f32)
                    / self.focal_length_x as f32,
                -(y - self.principal_point_y as f32)
                    / self.focal_length_y as f32,
                -Tensor::ones([height, width], device),
            ],
            2,
        );

        let directions = bearings
            .reshape([-1, 3])
            .matmul(self.rotation::<B>(device).transpose())
            .reshape([height, width, 3]);
        let origins = self
            .translation::<B>(device)
            .expand([height * width, 3])
            .reshape([height, width, 3]);

        (origins, directions)
    }

    /// The rotation part of the camera transform, `[3, 3]`.
    fn rotation<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let m = &self.camera_transform;
        Tensor::from_floats(
            [
                [m[0][0] as f32, m[0][1] as f32, m[0][2] as f32],
                [m[1][0] as f32, m[1][1] as f32, m[1][2] as f32],
                [m[2][0] as f32, m[2][1] as f32, m[2][2] as f32],
            ],
            device,
        )
    }

    /// The translation part of the camera transform, `[1, 3]`.
    fn translation<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let m = &self.camera_transform;
        Tensor::from_floats(
            [[m[0][3] as f32, m[1][3] as f32, m[2][3] as f32]],
            device,
        )
    }
}

/// Reprojects rays of a forward-facing camera into normalized device
/// coordinates, where depth sampling over `[0, 1]` spans the visible volume.
///
/// Origins are first shifted onto the plane `z = -near`, then origins and
/// directions go through the projective remap. `origins` and `directions` are
/// `[R, 3]`.
pub fn ndc_rays<B: Backend>(
    image_height: u32,
    image_width: u32,
    focal_length: f64,
    near: f32,
    origins: Tensor<B, 2>,
    directions: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [ray_count, _] = origins.dims();

    let oz = origins.to_owned().slice([0..ray_count, 2..3]);
    let dz = directions.to_owned().slice([0..ray_count, 2..3]);
    let t = -(oz + near) / dz;
    let origins = origins + t * directions.to_owned();

    let ox = origins.to_owned().slice([0..ray_count, 0..1]);
    let oy = origins.to_owned().slice([0..ray_count, 1..2]);
    let oz = origins.slice([0..ray_count, 2..3]);
    let dx = directions.to_owned().slice([0..ray_count, 0..1]);
    let dy = directions.to_owned().slice([0..ray_count, 1..2]);
    let dz = directions.slice([0..ray_count, 2..3]);

    let scale_x = -2.0 * focal_length as f32 / image_width as f32;
    let scale_y = -2.0 * focal_length as f32 / image_height as f32;

    let o0 = ox.to_owned().div(oz.to_owned()) * scale_x;
    let o1 = oy.to_owned().div(oz.to_owned()) * scale_y;
    let o2 = oz.to_owned().recip() * (2.0 * near) + 1.0;

    let d0 = (dx.div(dz.to_owned()) - ox.div(oz.to_owned())) * scale_x;
    let d1 = (dy.div(dz.to_owned()) - oy.div(oz.to_owned())) * scale_y;
    let d2 = oz.recip() * (-2.0 * near);

    (
        Tensor::cat(vec![o0, o1, o2], 1),
        Tensor::cat(vec![d0, d1, d2], 1),
    )
}

/// A flat batch of rays, immutable for the duration of one render call.
#[derive(Clone)]
pub struct RayBatch<B: Backend> {
    /// `[R, 3]`
    pub origins: Tensor<B, 2>,
    /// `[R, 3]` (not unit length in general)
    pub directions: Tensor<B, 2>,
    /// `[R, 1]`
    pub nears: Tensor<B, 2>,
    /// `[R, 1]`
    pub fars: Tensor<B, 2>,
    /// `[R, 3]` unit view directions, when the field is view-conditioned.
    pub view_directions: Option<Tensor<B, 2>>,
}

impl<B: Backend> RayBatch<B> {
    /// One ray per pixel of `camera`, with shared depth bounds.
    pub fn from_camera(
        camera: &Camera,
        near: f32,
        far: f32,
        device: &B::Device,
    ) -> Self {
        let (origins, directions) = camera.shoot_rays::<B>(device);
        let ray_count = camera.pixel_count();

        Self {
            origins: origins.reshape([-1, 3]),
            directions: directions.reshape([-1, 3]),
            nears: Tensor::full([ray_count, 1], near, device),
            fars: Tensor::full([ray_count, 1], far, device),
            view_directions: None,
        }
    }

    #[inline]
    pub fn ray_count(&self) -> usize {
        self.origins.dims()[0]
    }

    /// Size of the batch in bytes.
    pub fn size(&self) -> usize {
        let column_count =
            8 + if self.view_directions.is_some() { 3 } else { 0 };
        self.ray_count() * column_count * mem::size_of::<f32>()
    }

    /// Attaches normalized ray directions as view directions, unless some are
    /// already attached.
    pub fn with_view_directions(mut self) -> Self {
        if self.view_directions.is_none() {
            let norms =
                self.directions.to_owned().powf_scalar(2.0).sum_dim(1).sqrt();
            self.view_directions = Some(self.directions.to_owned() / norms);
        }
        self
    }

    /// Reprojects the batch into the normalized device coordinate space of
    /// `camera`. See [`ndc_rays`].
    pub fn reproject_ndc(
        mut self,
        camera: &Camera,
    ) -> Self {
        let (origins, directions) = ndc_rays(
            camera.image_height,
            camera.image_width,
            camera.focal_length_x,
            NDC_NEAR_PLANE,
            self.origins,
            self.directions,
        );
        self.origins = origins;
        self.directions = directions;
        self
    }

    /// Sample positions `origin + direction * depth` for per-ray `depths`
    /// (`[R, S]`), as `[R, S, 3]`.
    pub fn points_at(
        &self,
        depths: &Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        let [ray_count, sample_count] = depths.dims();
        let origins = self
            .origins
            .to_owned()
            .unsqueeze_dim::<3>(1)
            .expand([ray_count, sample_count, 3]);
        let directions = self
            .directions
            .to_owned()
            .unsqueeze_dim::<3>(1)
            .expand([ray_count, sample_count, 3]);
        let depths = depths
            .to_owned()
            .unsqueeze_dim::<3>(2)
            .expand([ray_count, sample_count, 3]);

        origins + directions * depths
    }

    /// Packs the per-ray metadata into fixed-width records, `[R, 8]` without
    /// view directions or `[R, 11]` with them.
    pub fn into_records(self) -> Tensor<B, 2> {
        let mut parts =
            vec![self.origins, self.directions, self.nears, self.fars];
        if let Some(view_directions) = self.view_directions {
            parts.push(view_directions);
        }

        Tensor::cat(parts, 1)
    }

    /// Unpacks records produced by [`RayBatch::into_records`], failing fast
    /// on any other trailing width.
    pub fn from_records(records: Tensor<B, 2>) -> Result<Self, Error> {
        let [ray_count, record_size] = records.dims();
        if record_size != 8 && record_size != 11 {
            return Err(Error::MismatchedShape(
                format!("The ray record width {record_size}"),
                "8 or 11".into(),
            ));
        }

        Ok(Self {
            origins: records.to_owned().slice([0..ray_count, 0..3]),
            directions: records.to_owned().slice([0..ray_count, 3..6]),
            nears: records.to_owned().slice([0..ray_count, 6..7]),
            fars: records.to_owned().slice([0..ray_count, 7..8]),
            view_directions: (record_size == 11)
                .then(|| records.slice([0..ray_count, 8..11])),
        })
    }
}

impl<B: Backend> fmt::Debug for RayBatch<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("RayBatch<{}>", B::name()))
            .field("ray_count", &self.ray_count())
            .field("view_directions", &self.view_directions.is_some())
            .field("size", &format_size(self.size(), BINARY))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    type Backend = burn::backend::NdArray;

    const IDENTITY: [[f64; 4]; 3] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    #[test]
    fn shoot_rays_through_center() {
        let device = Default::default();
        let camera = Camera {
            image_height: 3,
            image_width: 3,
            focal_length_x: 1.0,
            focal_length_y: 1.0,
            principal_point_x: 1.0,
            principal_point_y: 1.0,
            camera_transform: IDENTITY,
        };

        let (origins, directions) = camera.shoot_rays::<Backend>(&device);
        assert_eq!(origins.dims(), [3, 3, 3]);
        assert_eq!(directions.dims(), [3, 3, 3]);

        origins
            .slice([1..2, 1..2])
            .into_data()
            .assert_approx_eq(&TensorData::from([[[0.0, 0.0, 0.0]]]), 6);
        // the center pixel looks straight down the optical axis
        directions
            .to_owned()
            .slice([1..2, 1..2])
            .into_data()
            .assert_approx_eq(&TensorData::from([[[0.0, 0.0, -1.0]]]), 6);
        // one pixel right of center bears one focal unit along +x,
        // one pixel below center bears one focal unit along +y (image y is down)
        directions
            .slice([2..3, 2..3])
            .into_data()
            .assert_approx_eq(&TensorData::from([[[1.0, -1.0, -1.0]]]), 6);
    }

    #[test]
    fn shoot_rays_rotated() {
        let device = Default::default();
        // camera looking along world -x, positioned at (2, 0, 1)
        let camera = Camera {
            image_height: 1,
            image_width: 1,
            focal_length_x: 1.0,
            focal_length_y: 1.0,
            principal_point_x: 0.0,
            principal_point_y: 0.0,
            camera_transform: [
                [0.0, 0.0, 1.0, 2.0],
                [0.0, 1.0, 0.0, 0.0],
                [-1.0, 0.0, 0.0, 1.0],
            ],
        };

        let (origins, directions) = camera.shoot_rays::<Backend>(&device);
        origins
            .into_data()
            .assert_approx_eq(&TensorData::from([[[2.0, 0.0, 1.0]]]), 6);
        directions
            .into_data()
            .assert_approx_eq(&TensorData::from([[[-1.0, 0.0, 0.0]]]), 6);
    }

    #[test]
    fn ndc_rays_forward_facing() {
        let device = Default::default();
        let origins =
            Tensor::<Backend, 2>::from_floats([[0.0, 0.0, 0.0]], &device);
        let directions =
            Tensor::<Backend, 2>::from_floats([[0.0, 0.0, -1.0]], &device);

        let (origins, directions) =
            ndc_rays(4, 4, 2.0, 1.0, origins, directions);

        // the origin lands on the near plane, the direction spans to z = 1
        origins
            .into_data()
            .assert_approx_eq(&TensorData::from([[0.0, 0.0, -1.0]]), 6);
        directions
            .into_data()
            .assert_approx_eq(&TensorData::from([[0.0, 0.0, 2.0]]), 6);
    }

    #[test]
    fn records_round_trip() {
        let device = Default::default();
        let batch = RayBatch::<Backend> {
            origins: Tensor::from_floats(
                [[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]],
                &device,
            ),
            directions: Tensor::from_floats(
                [[0.0, 0.0, -1.0], [0.0, -1.0, 0.0]],
                &device,
            ),
            nears: Tensor::from_floats([[2.0], [2.0]], &device),
            fars: Tensor::from_floats([[6.0], [6.0]], &device),
            view_directions: None,
        }
        .with_view_directions();

        let records = batch.into_records();
        assert_eq!(records.dims(), [2, 11]);

        let batch = RayBatch::from_records(records).unwrap();
        assert_eq!(batch.ray_count(), 2);
        batch
            .origins
            .into_data()
            .assert_approx_eq(&TensorData::from([[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]), 6);
        batch
            .view_directions
            .unwrap()
            .into_data()
            .assert_approx_eq(
                &TensorData::from([[0.0, 0.0, -1.0], [0.0, -1.0, 0.0]]),
                6,
            );
    }

    #[test]
    fn records_reject_malformed_width() {
        let device = Default::default();
        let records = Tensor::<Backend, 2>::zeros([4, 9], &device);

        let batch = RayBatch::from_records(records);
        assert!(batch.is_err(), "Error: {:?}", batch.map(|batch| batch.size()));
    }

    #[test]
    fn points_at_depths() {
        let device = Default::default();
        let batch = RayBatch::<Backend> {
            origins: Tensor::from_floats([[1.0, 0.0, 0.0]], &device),
            directions: Tensor::from_floats([[0.0, 0.0, -2.0]], &device),
            nears: Tensor::from_floats([[0.0]], &device),
            fars: Tensor::from_floats([[1.0]], &device),
            view_directions: None,
        };

        let depths = Tensor::from_floats([[0.5, 1.0]], &device);
        batch.points_at(&depths).into_data().assert_approx_eq(
            &TensorData::from([[[1.0, 0.0, -1.0], [1.0, 0.0, -2.0]]]),
            6,
        );
    }
}
