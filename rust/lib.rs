//! Color convolution for stained histology images.
//!
//! Recombines per-stain channel images into a displayable RGB image through a
//! 3×3 stain matrix, working in optical density where stains mix linearly.

pub mod color_conversion;
pub mod color_convolution;
pub mod error;
pub mod float_trait;
pub mod logger;
pub mod stain_color_map;

pub use color_conversion::{optical_density_fwd, optical_density_inv, DEFAULT_BG_INT};
pub use color_convolution::{clip_to_u8, color_convolution};
pub use error::{ConvolutionError, Result};
pub use float_trait::StainFloat;
pub use stain_color_map::{stain_matrix, Stain};

#[cfg(feature = "python")]
mod python {
    use crate::{color_conversion, color_convolution, logger, StainFloat};
    use ndarray::{Array3, ArrayView2, ArrayViewD, Ix3};
    use num_traits::AsPrimitive;
    use numpy::{IntoPyArray, PyArray3, PyArrayDyn, PyReadonlyArray2, PyReadonlyArrayDyn};
    use pyo3::prelude::*;
    use pyo3::PyResult;
    use pyo3::Python;
    use pyo3::{pyfunction, Bound};

    fn value_error(e: crate::ConvolutionError) -> PyErr {
        pyo3::exceptions::PyValueError::new_err(e.to_string())
    }

    /// Check the image is 3-D, then run the convolution.
    fn convolve<T, F>(
        im_stains: ArrayViewD<T>,
        stain_matrix: ArrayView2<F>,
        bg_int: Option<F>,
    ) -> PyResult<Array3<u8>>
    where
        T: AsPrimitive<f32>,
        F: StainFloat,
    {
        let arr3 = im_stains
            .into_dimensionality::<Ix3>()
            .map_err(|_| pyo3::exceptions::PyValueError::new_err("im_stains must be 3D"))?;
        color_convolution::color_convolution(arr3, stain_matrix, bg_int).map_err(value_error)
    }

    // -----------------------------------------------------------------------
    // Macro to stamp out typed PyO3 function variants for each float precision.
    //
    // Each invocation generates:
    //   - py_color_convolution_{suffix}
    //   - py_color_convolution_u8_{suffix}   (uint8 stain images)
    //   - py_optical_density_fwd_{suffix}
    //   - py_optical_density_inv_{suffix}
    // -----------------------------------------------------------------------
    macro_rules! define_typed_pyfunctions {
        ($suffix:ident, $f:ty) => {
            ::paste::paste! {

            #[pyfunction]
            #[pyo3(signature = (im_stains, stain_matrix, bg_int=None))]
            fn [<py_color_convolution_ $suffix>]<'py>(
                py: Python<'py>,
                im_stains: PyReadonlyArrayDyn<'py, $f>,
                stain_matrix: PyReadonlyArray2<'py, $f>,
                bg_int: Option<f64>,
            ) -> PyResult<Bound<'py, PyArray3<u8>>> {
                let result = convolve(
                    im_stains.as_array(),
                    stain_matrix.as_array(),
                    bg_int.map(|v| v as $f),
                )?;
                Ok(result.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_stains, stain_matrix, bg_int=None))]
            fn [<py_color_convolution_u8_ $suffix>]<'py>(
                py: Python<'py>,
                im_stains: PyReadonlyArrayDyn<'py, u8>,
                stain_matrix: PyReadonlyArray2<'py, $f>,
                bg_int: Option<f64>,
            ) -> PyResult<Bound<'py, PyArray3<u8>>> {
                let result = convolve(
                    im_stains.as_array(),
                    stain_matrix.as_array(),
                    bg_int.map(|v| v as $f),
                )?;
                Ok(result.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_rgb, bg_int=None))]
            fn [<py_optical_density_fwd_ $suffix>]<'py>(
                py: Python<'py>,
                im_rgb: PyReadonlyArrayDyn<'py, $f>,
                bg_int: Option<f64>,
            ) -> PyResult<Bound<'py, PyArrayDyn<$f>>> {
                let result = color_conversion::optical_density_fwd(
                    im_rgb.as_array(),
                    bg_int.map(|v| v as $f),
                )
                .map_err(value_error)?;
                Ok(result.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_od, bg_int=None))]
            fn [<py_optical_density_inv_ $suffix>]<'py>(
                py: Python<'py>,
                im_od: PyReadonlyArrayDyn<'py, $f>,
                bg_int: Option<f64>,
            ) -> PyResult<Bound<'py, PyArrayDyn<$f>>> {
                let result = color_conversion::optical_density_inv(
                    im_od.as_array(),
                    bg_int.map(|v| v as $f),
                )
                .map_err(value_error)?;
                Ok(result.into_pyarray(py))
            }

            } // paste!
        };
    }

    // Stamp out the concrete f32 and f64 variants.
    define_typed_pyfunctions!(f32, f32);
    define_typed_pyfunctions!(f64, f64);

    #[pymodule]
    fn _rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
        logger::init();
        // f64
        m.add_function(wrap_pyfunction!(py_color_convolution_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_color_convolution_u8_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_optical_density_fwd_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_optical_density_inv_f64, m)?)?;
        // f32
        m.add_function(wrap_pyfunction!(py_color_convolution_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_color_convolution_u8_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_optical_density_fwd_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_optical_density_inv_f32, m)?)?;
        Ok(())
    }
}
