//! Reference stain vectors and stain matrix assembly.

use crate::color_conversion::lit;
use crate::error::ConvolutionError;
use crate::float_trait::StainFloat;
use ndarray::Array2;

/// Histological stains with tabulated optical-density color vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stain {
    Hematoxylin,
    Eosin,
    /// Diaminobenzidine
    Dab,
    /// Placeholder for an absent stain
    Null,
}

impl Stain {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hematoxylin => "hematoxylin",
            Self::Eosin => "eosin",
            Self::Dab => "dab",
            Self::Null => "null",
        }
    }

    /// Optical-density color vector (R, G, B).
    pub fn color(&self) -> [f64; 3] {
        match self {
            Self::Hematoxylin => [0.65, 0.70, 0.29],
            Self::Eosin => [0.07, 0.99, 0.11],
            Self::Dab => [0.27, 0.57, 0.78],
            Self::Null => [0.0, 0.0, 0.0],
        }
    }
}

impl std::str::FromStr for Stain {
    type Err = ConvolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hematoxylin" => Ok(Self::Hematoxylin),
            "eosin" => Ok(Self::Eosin),
            "dab" => Ok(Self::Dab),
            "null" => Ok(Self::Null),
            _ => Err(ConvolutionError::UnknownStain(s.to_string())),
        }
    }
}

/// Build a 3×3 stain matrix with one stain vector per column.
///
/// Vectors are used as tabulated. A `Null` stain leaves a zero column, which
/// callers must complement themselves before convolving.
pub fn stain_matrix<F: StainFloat>(stains: [Stain; 3]) -> Array2<F> {
    let mut w = Array2::<F>::zeros((3, 3));
    for (mut col, stain) in w.columns_mut().into_iter().zip(stains) {
        for (v, c) in col.iter_mut().zip(stain.color()) {
            *v = lit(c);
        }
    }
    w
}
