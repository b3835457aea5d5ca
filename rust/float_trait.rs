use ndarray::LinalgScalar;
use num_traits::Float;
use std::fmt::Debug;

/// Supertrait combining the bounds needed by the convolution pipeline.
///
/// Implemented for `f32` and `f64`, the two precisions exposed to NumPy.
pub trait StainFloat: Float + LinalgScalar + Debug + Send + Sync + 'static {
    /// Lossless widening from the single-precision sample type.
    fn cast_f32(v: f32) -> Self;
}

impl StainFloat for f32 {
    fn cast_f32(v: f32) -> Self {
        v
    }
}

impl StainFloat for f64 {
    fn cast_f32(v: f32) -> Self {
        f64::from(v)
    }
}
