/// Domain errors raised before anything is persisted or published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Input broke a domain rule; the message names the field.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The caller could not be identified.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}
