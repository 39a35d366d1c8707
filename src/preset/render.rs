/// Default count of stratified samples per ray in the first pass.
pub const SAMPLE_COUNT_COARSE: usize = 64;
/// Default count of importance samples per ray in the second pass.
pub const SAMPLE_COUNT_FINE: usize = 128;
/// Default maximum count of rays per processed chunk.
pub const RAY_CHUNK_SIZE: usize = 1 << 15;
/// Default maximum count of samples per field invocation.
pub const POINT_CHUNK_SIZE: usize = 1 << 16;
/// Default count of frequency bands for encoding sample positions.
pub const FREQUENCY_COUNT_POSITION: usize = 10;
/// Default count of frequency bands for encoding view directions.
pub const FREQUENCY_COUNT_DIRECTION: usize = 4;

/// Terminal inter-sample distance, effectively infinite.
pub const DISTANCE_INFINITE: f32 = 1e10;
/// Keeps the transmittance product from collapsing to exact zero
/// behind a fully opaque sample.
pub const EPSILON_TRANSMITTANCE: f32 = 1e-10;
/// Lower bound of the depth-over-accumulation ratio in the disparity.
pub const EPSILON_DISPARITY: f32 = 1e-10;
/// Lower bound of a resolvable interval of the importance-sampling CDF.
pub const EPSILON_CDF: f32 = 1e-5;
/// World-space distance of the normalized-device-coordinate projection plane.
pub const NDC_NEAR_PLANE: f32 = 1.0;
