//! Error types for the color library

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("Matrix is singular")]
    SingularMatrix,
    #[error("Invalid colorspace: {0}")]
    InvalidColorspace(String),
    #[error("Profile error: {0}")]
    Profile(String),
    #[error("Transform error: {0}")]
    Transform(String),
    #[error("Spectrum error: {0}")]
    Spectrum(String),
}

pub type Result<T> = std::result::Result<T, ColorError>;
