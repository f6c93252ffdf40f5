//! Reduction to the pole of a gridded total-field magnetic anomaly.
//!
//! The anomaly grid is transformed to the wavenumber domain, multiplied by
//! the inverse dipole-direction filter `1 / theta(k)^2` with
//! `theta = sin(I) + i cos(I) (sin(D) k_e + cos(D) k_n) / |k|`, and
//! transformed back. Magnetization is assumed parallel to the ambient field.

use crate::types::{MagError, MagGrid, MagResult, RegularGrid};
use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

/// Zero-wavenumber and exactly-singular filter values pass the component
/// through unchanged.
const THETA2_ZERO: f64 = 1e-12;
/// Lower clamp on |theta^2|; bounds amplification near grazing inclination.
const THETA2_MIN: f64 = 1e-4;

/// Check the geophysical ranges of the ambient-field direction.
pub fn validate_field_direction(inclination: f64, declination: f64) -> MagResult<()> {
    if !inclination.is_finite() || !(-90.0..=90.0).contains(&inclination) {
        return Err(MagError::Parameter(format!(
            "inclination must be in [-90, 90] degrees, got {}",
            inclination
        )));
    }
    if !declination.is_finite() || !(-180.0..=180.0).contains(&declination) {
        return Err(MagError::Parameter(format!(
            "declination must be in [-180, 180] degrees, got {}",
            declination
        )));
    }
    Ok(())
}

/// Reduce a gridded anomaly to the pole.
///
/// Non-finite cells are filled with the median of the finite values before
/// the transform and restored to NaN afterwards, so masked regions survive
/// but do not pollute the spectrum. The output grid keeps the input shape,
/// transform and CRS.
pub fn reduce_to_pole(
    grid: &RegularGrid,
    inclination: f64,
    declination: f64,
) -> MagResult<RegularGrid> {
    validate_field_direction(inclination, declination)?;

    let (rows, cols) = grid.shape();
    log::info!(
        "Reducing {}x{} grid to the pole (I = {:.2} deg, D = {:.2} deg)",
        rows,
        cols,
        inclination,
        declination
    );

    let (filled, nan_mask) = fill_non_finite(&grid.data)?;

    let dx = grid.transform.pixel_width.abs();
    let dy = grid.transform.pixel_height.abs();

    let mut spectrum: Vec<Complex64> = filled.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    fft2d(&mut spectrum, rows, cols, FftDirection::Forward);

    // Wavenumbers per axis. Row index increases southward, so the physical
    // northing wavenumber is the negated row frequency.
    let k_east = fftfreq(cols, dx);
    let k_north: Vec<f64> = fftfreq(rows, dy).into_iter().map(|f| -f).collect();

    let inc = inclination.to_radians();
    let dec = declination.to_radians();
    let (sin_inc, cos_inc) = (inc.sin(), inc.cos());
    let (sin_dec, cos_dec) = (dec.sin(), dec.cos());

    let mut clamped = 0usize;
    for i in 0..rows {
        for j in 0..cols {
            let ke = k_east[j];
            let kn = k_north[i];
            let k_norm = (ke * ke + kn * kn).sqrt();
            if k_norm == 0.0 {
                // DC component carries the regional level; leave it alone.
                continue;
            }
            let theta = Complex64::new(sin_inc, cos_inc * (sin_dec * ke + cos_dec * kn) / k_norm);
            let mut denom = theta * theta;
            let magnitude = denom.norm();
            if magnitude < THETA2_ZERO {
                // Exactly singular direction at grazing inclination
                clamped += 1;
                continue;
            }
            if magnitude < THETA2_MIN {
                denom *= THETA2_MIN / magnitude;
                clamped += 1;
            }
            spectrum[i * cols + j] /= denom;
        }
    }
    if clamped > 0 {
        log::warn!(
            "Clamped {} near-singular filter coefficients (grazing inclination)",
            clamped
        );
    }

    fft2d(&mut spectrum, rows, cols, FftDirection::Inverse);

    let mut output = MagGrid::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            output[[i, j]] = if nan_mask[[i, j]] {
                f64::NAN
            } else {
                spectrum[i * cols + j].re
            };
        }
    }

    grid.with_data(output)
}

/// Fill non-finite cells with the median of the finite values.
///
/// Returns the filled grid and a mask of the cells that were filled.
fn fill_non_finite(data: &MagGrid) -> MagResult<(MagGrid, ndarray::Array2<bool>)> {
    let (rows, cols) = data.dim();
    let mut finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(MagError::DegenerateInput(
            "grid has no finite values to transform".to_string(),
        ));
    }
    let fill = if finite.len() == data.len() {
        0.0
    } else {
        finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = finite.len();
        if n % 2 == 1 {
            finite[n / 2]
        } else {
            (finite[n / 2 - 1] + finite[n / 2]) / 2.0
        }
    };

    let mut mask = ndarray::Array2::from_elem((rows, cols), false);
    let mut filled = data.clone();
    for (value, masked) in filled.iter_mut().zip(mask.iter_mut()) {
        if !value.is_finite() {
            *value = fill;
            *masked = true;
        }
    }
    Ok((filled, mask))
}

/// In-place 2-D FFT over a row-major buffer, one axis at a time.
fn fft2d(data: &mut [Complex64], rows: usize, cols: usize, direction: FftDirection) {
    let mut planner = FftPlanner::new();

    // Transform along rows (contiguous)
    let fft_row: Arc<dyn Fft<f64>> = planner.plan_fft(cols, direction);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft_row.get_inplace_scratch_len()];
    for i in 0..rows {
        let start = i * cols;
        fft_row.process_with_scratch(&mut data[start..start + cols], &mut scratch);
    }

    // Transform along columns (gather/scatter through a buffer)
    let fft_col: Arc<dyn Fft<f64>> = planner.plan_fft(rows, direction);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft_col.get_inplace_scratch_len()];
    let mut column = vec![Complex64::new(0.0, 0.0); rows];
    for j in 0..cols {
        for i in 0..rows {
            column[i] = data[i * cols + j];
        }
        fft_col.process_with_scratch(&mut column, &mut scratch);
        for i in 0..rows {
            data[i * cols + j] = column[i];
        }
    }

    if direction == FftDirection::Inverse {
        let n_total = (rows * cols) as f64;
        for value in data.iter_mut() {
            *value /= n_total;
        }
    }
}

/// Sample frequencies for a length-n axis with the given spacing.
/// Matches numpy.fft.fftfreq(n, d).
fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let mut freq = vec![0.0; n];
    let step = 1.0 / (n as f64 * d);
    let half = (n + 1) / 2;
    for (i, f) in freq.iter_mut().enumerate() {
        *f = if i < half {
            i as f64 * step
        } else {
            (i as i64 - n as i64) as f64 * step
        };
    }
    freq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn test_grid(data: Array2<f64>) -> RegularGrid {
        let transform = GeoTransform::north_up(0.0, data.dim().0 as f64, 1.0, 1.0);
        RegularGrid::new(data, transform, 31370).unwrap()
    }

    fn gaussian_grid(rows: usize, cols: usize) -> RegularGrid {
        let data = Array2::from_shape_fn((rows, cols), |(i, j)| {
            let di = i as f64 - rows as f64 / 2.0;
            let dj = j as f64 - cols as f64 / 2.0;
            100.0 * (-(di * di + dj * dj) / 18.0).exp()
        });
        test_grid(data)
    }

    #[test]
    fn test_fftfreq_matches_numpy() {
        let freq = fftfreq(4, 1.0);
        assert_eq!(freq, vec![0.0, 0.25, -0.5, -0.25]);
        let freq = fftfreq(5, 1.0);
        assert_eq!(freq, vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }

    #[test]
    fn test_fft2d_roundtrip() {
        let rows = 6;
        let cols = 5;
        let original: Vec<f64> = (0..rows * cols).map(|i| i as f64).collect();
        let mut data: Vec<Complex64> =
            original.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft2d(&mut data, rows, cols, FftDirection::Forward);
        fft2d(&mut data, rows, cols, FftDirection::Inverse);
        for (value, original) in data.iter().zip(&original) {
            assert_relative_eq!(value.re, *original, epsilon = 1e-10);
            assert_relative_eq!(value.im, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_vertical_field_is_identity() {
        let grid = gaussian_grid(32, 32);
        let reduced = reduce_to_pole(&grid, 90.0, 0.0).unwrap();
        for (a, b) in grid.data.iter().zip(reduced.data.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
        assert_eq!(reduced.transform, grid.transform);
        assert_eq!(reduced.epsg, grid.epsg);
    }

    #[test]
    fn test_parameter_validation() {
        let grid = gaussian_grid(8, 8);
        assert!(matches!(
            reduce_to_pole(&grid, 95.0, 0.0),
            Err(MagError::Parameter(_))
        ));
        assert!(matches!(
            reduce_to_pole(&grid, 60.0, 200.0),
            Err(MagError::Parameter(_))
        ));
        assert!(matches!(
            reduce_to_pole(&grid, f64::NAN, 0.0),
            Err(MagError::Parameter(_))
        ));
    }

    #[test]
    fn test_output_is_real_and_finite() {
        let grid = gaussian_grid(16, 24);
        let reduced = reduce_to_pole(&grid, 60.0, 15.0).unwrap();
        assert!(reduced.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_nan_cells_filled_and_restored() {
        let mut grid = gaussian_grid(16, 16);
        grid.data[[0, 0]] = f64::NAN;
        grid.data[[7, 9]] = f64::NAN;
        let reduced = reduce_to_pole(&grid, 60.0, 0.0).unwrap();
        assert!(reduced.data[[0, 0]].is_nan());
        assert!(reduced.data[[7, 9]].is_nan());
        assert!(reduced.data[[3, 3]].is_finite());
    }

    #[test]
    fn test_grazing_inclination_is_stable() {
        let grid = gaussian_grid(16, 16);
        let reduced = reduce_to_pole(&grid, 0.0, 0.0).unwrap();
        // Amplification is clamped, so values stay bounded
        let max_in = grid.data.iter().cloned().fold(0.0f64, f64::max);
        let max_out = reduced
            .data
            .iter()
            .map(|v| v.abs())
            .fold(0.0f64, f64::max);
        assert!(max_out.is_finite());
        assert!(max_out < max_in * 2.0 / THETA2_MIN);
    }

    #[test]
    fn test_rtp_inverts_forward_dipole_filter() {
        // Apply the forward filter theta^2 to a pole-reduced anomaly, then
        // check reduce_to_pole recovers it.
        let grid = gaussian_grid(32, 32);
        let (rows, cols) = grid.shape();
        let inc = 55.0f64.to_radians();
        let dec = 12.0f64.to_radians();

        let mut spectrum: Vec<Complex64> =
            grid.data.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft2d(&mut spectrum, rows, cols, FftDirection::Forward);
        let k_east = fftfreq(cols, 1.0);
        let k_north: Vec<f64> = fftfreq(rows, 1.0).into_iter().map(|f| -f).collect();
        for i in 0..rows {
            for j in 0..cols {
                let k_norm = (k_east[j] * k_east[j] + k_north[i] * k_north[i]).sqrt();
                if k_norm == 0.0 {
                    continue;
                }
                let theta = Complex64::new(
                    inc.sin(),
                    inc.cos() * (dec.sin() * k_east[j] + dec.cos() * k_north[i]) / k_norm,
                );
                spectrum[i * cols + j] *= theta * theta;
            }
        }
        fft2d(&mut spectrum, rows, cols, FftDirection::Inverse);
        let inclined = Array2::from_shape_fn((rows, cols), |(i, j)| spectrum[i * cols + j].re);

        let reduced = reduce_to_pole(&grid.with_data(inclined).unwrap(), 55.0, 12.0).unwrap();
        let peak = grid.data.iter().cloned().fold(0.0f64, f64::max);
        for (expected, actual) in grid.data.iter().zip(reduced.data.iter()) {
            assert!((expected - actual).abs() < 1e-6 * peak);
        }
    }
}
