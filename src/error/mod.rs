#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),

    #[error("Shape Error: {0} should be {1}")]
    MismatchedShape(String, String),

    #[error("Numerical Error: {0} contains NaN or Inf values")]
    NonFinite(String),
}
