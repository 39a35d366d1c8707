pub mod ray;
pub mod volumetric;

pub use ray::*;
pub use volumetric::*;
