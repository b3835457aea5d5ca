use crate::error::{ConvolutionError, Result};
use crate::float_trait::StainFloat;
use ndarray::parallel::prelude::*;
use ndarray::{Array, ArrayView, Dimension};
use num_traits::Float;

/// Intensity of unstained light used when no background is supplied.
pub const DEFAULT_BG_INT: f64 = 255.0;

/// Density assigned to a unit intensity; sets the output scale of both maps.
const OD_SCALE: f64 = 255.0;

/// Floor applied to intensities before taking the logarithm.
const EPSILON: f64 = 1e-10;

pub(crate) fn lit<F: StainFloat>(v: f64) -> F {
    F::from(v).expect("constant must be representable in f32 and f64")
}

/// Resolve and validate the background intensity.
pub(crate) fn background<F: StainFloat>(bg_int: Option<F>) -> Result<F> {
    let bg = bg_int.unwrap_or_else(|| lit(DEFAULT_BG_INT));
    if !bg.is_finite() || bg <= F::zero() || bg == F::one() {
        return Err(ConvolutionError::BackgroundIntensity(
            bg.to_f64().unwrap_or(f64::NAN),
        ));
    }
    Ok(bg)
}

/// Map intensities to optical density.
///
/// ```text
/// OD = −ln(max(I, ε) / I₀) × 255 / ln(I₀)
/// ```
///
/// An intensity equal to the background maps to zero density. Zero intensity
/// is floored at ε and maps to a large but finite density.
///
/// # Arguments
///
/// * `im`     – Intensity array of any dimensionality.
/// * `bg_int` – Background intensity I₀. Defaults to 255.
pub fn optical_density_fwd<F, D>(im: ArrayView<F, D>, bg_int: Option<F>) -> Result<Array<F, D>>
where
    F: StainFloat,
    D: Dimension,
{
    let bg = background(bg_int)?;
    let mut im_od = im.to_owned();
    optical_density_fwd_inplace(&mut im_od, bg);
    Ok(im_od)
}

/// Map optical density back to intensities.
///
/// ```text
/// I = I₀ ^ (1 − OD / 255)
/// ```
///
/// Zero density maps to the background intensity.
pub fn optical_density_inv<F, D>(im_od: ArrayView<F, D>, bg_int: Option<F>) -> Result<Array<F, D>>
where
    F: StainFloat,
    D: Dimension,
{
    let bg = background(bg_int)?;
    let mut im = im_od.to_owned();
    optical_density_inv_inplace(&mut im, bg);
    Ok(im)
}

pub(crate) fn optical_density_fwd_inplace<F, D>(im: &mut Array<F, D>, bg: F)
where
    F: StainFloat,
    D: Dimension,
{
    let scale = lit::<F>(OD_SCALE) / Float::ln(bg);
    let epsilon = lit::<F>(EPSILON);

    im.par_iter_mut().for_each(|x| {
        *x = -Float::ln(Float::max(*x, epsilon) / bg) * scale;
    });
}

pub(crate) fn optical_density_inv_inplace<F, D>(im: &mut Array<F, D>, bg: F)
where
    F: StainFloat,
    D: Dimension,
{
    let full = lit::<F>(OD_SCALE);

    im.par_iter_mut().for_each(|x| {
        *x = Float::powf(bg, F::one() - *x / full);
    });
}
