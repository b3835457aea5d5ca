use crate::color_conversion::{
    background, lit, optical_density_fwd_inplace, optical_density_inv_inplace,
};
use crate::error::{ConvolutionError, Result};
use crate::float_trait::StainFloat;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_traits::AsPrimitive;
use rayon::prelude::*;
use tracing::{debug, instrument, trace, warn};

/// Largest displayable intensity.
const MAX_INTENSITY: f64 = 255.0;

/// Reconstruct an RGB image from per-stain channel images and a stain matrix.
///
/// Stain intensities are moved to optical density, mixed through the stain
/// matrix and mapped back to intensities:
///
/// ```text
/// OD_rgb = OD_stains @ Wᵀ
/// RGB    = I₀ ^ (1 − OD_rgb / 255)
/// ```
///
/// Samples are first cast to `f32`, whatever their type, and then widened to
/// the stain matrix precision.
///
/// Values above 255 are clipped to 255. There is no lower clip: the final
/// cast truncates toward zero and wraps modulo 256 (see [`clip_to_u8`]).
///
/// # Arguments
///
/// * `im_stains`     – (H, W, 3) image, channel *i* holds the intensity image
///                      of stain *i*. Any primitive numeric sample type.
/// * `stain_matrix`  – 3×3 matrix whose **columns** are stain vectors. At least
///                      two columns should be non-zero; a missing third column
///                      must be completed by the caller.
/// * `bg_int`        – Background intensity I₀. Defaults to 255.
///
/// # Returns
///
/// A `(H, W, 3)` 8-bit RGB image.
///
/// # Examples
///
/// ```
/// use ndarray::{Array2, Array3};
/// use stain_convolution::color_convolution;
///
/// let unstained = Array3::from_elem((2, 2, 3), 255_u8);
/// let w = Array2::<f64>::eye(3);
/// let rgb = color_convolution(unstained.view(), w.view(), None).unwrap();
/// assert!(rgb.iter().all(|&v| v == 255));
/// ```
#[instrument(level = "debug", skip_all)]
pub fn color_convolution<T, F>(
    im_stains: ArrayView3<T>,
    stain_matrix: ArrayView2<F>,
    bg_int: Option<F>,
) -> Result<Array3<u8>>
where
    T: AsPrimitive<f32>,
    F: StainFloat,
{
    let shape = im_stains.shape();
    let (h, w, c) = (shape[0], shape[1], shape[2]);

    if c != 3 {
        return Err(ConvolutionError::ChannelCount { found: c });
    }
    if stain_matrix.shape() != [3, 3] {
        return Err(ConvolutionError::StainMatrixShape {
            rows: stain_matrix.nrows(),
            cols: stain_matrix.ncols(),
        });
    }
    let bg = background(bg_int)?;

    let nonzero = nonzero_columns(stain_matrix);
    if nonzero < 2 {
        warn!(nonzero, "stain matrix has fewer than two non-zero columns");
    }
    debug!(height = h, width = w, "convolving stain image");

    // Flatten to (N, 3) in row-major pixel order
    let n_pixels = h * w;
    let mut od: Array2<F> = im_stains
        .to_shape((n_pixels, 3))?
        .mapv(|x: T| F::cast_f32(x.as_()));

    optical_density_fwd_inplace(&mut od, bg);

    // OD_rgb = OD_stains @ Wᵀ
    let mut im_rgb = od.dot(&stain_matrix.t());
    drop(od);
    trace!(n_pixels, "mixed optical density");

    optical_density_inv_inplace(&mut im_rgb, bg);

    let max = lit::<F>(MAX_INTENSITY);
    let mut rgb_data: Vec<u8> = vec![0; n_pixels * 3];
    rgb_data
        .par_chunks_mut(3)
        .enumerate()
        .for_each(|(i, pixel)| {
            for ch in 0..3 {
                pixel[ch] = clip_to_u8(im_rgb[[i, ch]], max);
            }
        });

    Ok(Array3::from_shape_vec((h, w, 3), rgb_data)?)
}

/// Clip a sample above `max` and cast it to `u8`.
///
/// Only the upper bound is clipped. The cast truncates toward zero and keeps
/// the low 8 bits, so negative samples wrap (−1.5 becomes 255). NaN and
/// samples outside the `i64` range become 0.
pub fn clip_to_u8<F: StainFloat>(v: F, max: F) -> u8 {
    let v = if v > max { max } else { v };
    v.to_i64().map_or(0, |i| i as u8)
}

fn nonzero_columns<F: StainFloat>(stain_matrix: ArrayView2<F>) -> usize {
    stain_matrix
        .axis_iter(Axis(1))
        .filter(|col| col.iter().any(|&v| v != F::zero()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, Array2, Array3};

    fn identity() -> Array2<f64> {
        Array2::eye(3)
    }

    #[test]
    fn test_zero_density_is_white() {
        let im = Array3::from_elem((2, 2, 3), 255.0_f64);
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        assert_eq!(out, Array3::from_elem((2, 2, 3), 255_u8));
    }

    #[test]
    fn test_full_absorption_is_black() {
        let im = Array3::<f32>::zeros((2, 2, 3));
        let w = Array2::<f32>::eye(3);
        let out = color_convolution(im.view(), w.view(), None).unwrap();
        assert_eq!(out.shape(), &[2, 2, 3]);
        for px in out.lanes(Axis(2)) {
            assert_eq!(px.to_vec(), vec![0_u8, 0, 0]);
        }
    }

    #[test]
    fn test_identity_matrix_passes_intensities_through() {
        let im = array![[[10.5_f64, 100.5, 200.5], [30.25, 60.75, 254.5]]];
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        assert_eq!(out, array![[[10_u8, 100, 200], [30, 60, 254]]]);
    }

    #[test]
    fn test_values_above_range_are_clipped() {
        // Intensities brighter than the background give negative density,
        // which maps back above 255.
        let im = array![[[1000.0_f64, 256.5, 5000.0]]];
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        assert_eq!(out, array![[[255_u8, 255, 255]]]);
    }

    #[test]
    fn test_integer_samples_are_accepted() {
        let im = Array3::<u8>::from_elem((3, 4, 3), 255);
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        assert!(out.iter().all(|&v| v == 255));

        let im = Array3::<u16>::from_elem((1, 1, 3), 255);
        let out = color_convolution(im.view(), Array2::<f32>::eye(3).view(), None).unwrap();
        assert_eq!(out, array![[[255_u8, 255, 255]]]);
    }

    #[test]
    fn test_single_stain_mixes_into_every_channel() {
        let w = array![[0.65, 0.0, 0.0], [0.70, 0.0, 0.0], [0.29, 0.0, 0.0]];
        let im = array![[[60.0_f64, 255.0, 255.0]]];
        let out = color_convolution(im.view(), w.view(), None).unwrap();

        let scale = 255.0 / 255.0_f64.ln();
        let od = -(60.0_f64 / 255.0).ln() * scale;
        for ch in 0..3 {
            let expected = 255.0_f64.powf(1.0 - od * w[[ch, 0]] / 255.0) as u8;
            assert_eq!(out[[0, 0, ch]], expected);
        }
        // More hematoxylin absorption in green than in blue
        assert!(out[[0, 0, 1]] < out[[0, 0, 2]]);
    }

    #[test]
    fn test_degenerate_matrix_is_not_rejected() {
        let im = Array::linspace(0.0_f64, 255.0, 2 * 5 * 3)
            .into_shape_with_order((2, 5, 3))
            .unwrap();
        let w = Array2::<f64>::zeros((3, 3));
        let out = color_convolution(im.view(), w.view(), None).unwrap();
        // Zero mixing leaves zero density everywhere
        assert!(out.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_output_shape_matches_input() {
        for (h, w) in [(1, 1), (4, 7), (16, 3)] {
            let im = Array3::from_elem((h, w, 3), 128.0_f32);
            let out = color_convolution(im.view(), Array2::<f32>::eye(3).view(), None).unwrap();
            assert_eq!(out.dim(), (h, w, 3));
        }
    }

    #[test]
    fn test_integer_passthrough_single_precision() {
        let im = array![[[31_u8, 50, 255]]];
        let w = Array2::<f32>::eye(3);
        let out = color_convolution(im.view(), w.view(), None).unwrap();
        assert_eq!(out, array![[[30_u8, 49, 255]]]);
    }

    #[test]
    fn test_samples_are_rounded_to_single_precision() {
        let im = array![[[100.3_f64, 17.000001, 254.99999999]]];
        let rounded = im.mapv(|v| v as f32);
        let a = color_convolution(im.view(), identity().view(), None).unwrap();
        let b = color_convolution(rounded.view(), identity().view(), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pixel_order_is_preserved() {
        let (h, w) = (48, 64);
        let im = Array3::from_shape_fn((h, w, 3), |(y, x, ch)| {
            ((y * w + x) * 3 + ch) as f64 % 250.0 + 0.5
        });
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        for ((idx, v), s) in out.indexed_iter().zip(im.iter()) {
            assert_eq!(*v as f64, s.floor(), "sample {idx:?}");
        }
    }

    #[test]
    fn test_empty_image() {
        let im = Array3::<f64>::zeros((0, 4, 3));
        let out = color_convolution(im.view(), identity().view(), None).unwrap();
        assert_eq!(out.dim(), (0, 4, 3));
    }

    #[test]
    fn test_non_standard_layout_input() {
        let im = Array::linspace(1.0_f64, 250.0, 4 * 3 * 3)
            .into_shape_with_order((4, 3, 3))
            .unwrap();
        let swapped = im.view().permuted_axes([1, 0, 2]);
        let contiguous = swapped.as_standard_layout().to_owned();
        let w = array![[0.65, 0.07, 0.27], [0.70, 0.99, 0.57], [0.29, 0.11, 0.78]];

        let a = color_convolution(swapped, w.view(), None).unwrap();
        let b = color_convolution(contiguous.view(), w.view(), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_channel_count() {
        let im = Array3::<f64>::zeros((2, 2, 4));
        let err = color_convolution(im.view(), identity().view(), None).unwrap_err();
        assert!(matches!(err, ConvolutionError::ChannelCount { found: 4 }));
    }

    #[test]
    fn test_wrong_matrix_shape() {
        let im = Array3::<f64>::zeros((2, 2, 3));
        let w = Array2::<f64>::zeros((3, 2));
        let err = color_convolution(im.view(), w.view(), None).unwrap_err();
        assert!(matches!(
            err,
            ConvolutionError::StainMatrixShape { rows: 3, cols: 2 }
        ));
    }

    #[test]
    fn test_invalid_background() {
        let im = Array3::<f64>::zeros((1, 1, 3));
        let err = color_convolution(im.view(), identity().view(), Some(0.0)).unwrap_err();
        assert!(matches!(err, ConvolutionError::BackgroundIntensity(_)));
    }

    #[test]
    fn test_clip_to_u8() {
        let max = 255.0_f64;
        assert_eq!(clip_to_u8(255.9, max), 255);
        assert_eq!(clip_to_u8(300.0, max), 255);
        assert_eq!(clip_to_u8(f64::INFINITY, max), 255);
        assert_eq!(clip_to_u8(12.7, max), 12);
        assert_eq!(clip_to_u8(0.999, max), 0);
        assert_eq!(clip_to_u8(-1.5, max), 255);
        assert_eq!(clip_to_u8(-256.0, max), 0);
        assert_eq!(clip_to_u8(f64::NAN, max), 0);
    }

    #[test]
    fn test_nonzero_columns() {
        let w = array![[0.65, 0.0, 0.0], [0.70, 0.0, 0.0], [0.29, 0.0, 0.0]];
        assert_eq!(nonzero_columns(w.view()), 1);
        assert_eq!(nonzero_columns(identity().view()), 3);
    }
}
