//! Error types for scene preparation.

use thiserror::Error;

/// Main error type for scene preparation.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid build parameter or scene description
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed or missing source (mesh, scene file)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input that cannot be turned into geometry (e.g. a singular transform)
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateInput(msg.into())
    }
}

/// Result type alias for scene preparation.
pub type Result<T> = std::result::Result<T, Error>;
