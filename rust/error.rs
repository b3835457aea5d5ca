use thiserror::Error;

/// Errors raised by the convolution pipeline and its helpers.
#[derive(Error, Debug)]
pub enum ConvolutionError {
    /// The stain image's last axis is not 3.
    #[error("stain image must have 3 channels, got {found}")]
    ChannelCount { found: usize },

    /// The stain matrix is not 3×3.
    #[error("stain matrix must be 3x3, got {rows}x{cols}")]
    StainMatrixShape { rows: usize, cols: usize },

    /// Background intensity must be finite, positive and different from 1.
    #[error("invalid background intensity: {0}")]
    BackgroundIntensity(f64),

    #[error("unknown stain: {0}")]
    UnknownStain(String),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, ConvolutionError>;
