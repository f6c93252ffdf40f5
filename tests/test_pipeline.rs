use aeromag::io::{LoaderConfig, RasterWriter};
use aeromag::types::{MagError, ReduceStatistic, Stage, SurveyParams};
use std::io::Write;
use std::path::Path;

/// Dipole burial depth below the observation plane, meters
const DEPTH: f64 = 180.0;
/// Scaled moment giving a 100 nT peak pole-reduced anomaly
const MOMENT: f64 = 50.0 * DEPTH * DEPTH * DEPTH;

/// Total-field anomaly of a point dipole magnetized along the ambient field.
///
/// Coordinates are (east, north, down); the observation sits `DEPTH` meters
/// above the source.
fn dipole_anomaly(de: f64, dn: f64, inclination_deg: f64, declination_deg: f64) -> f64 {
    let inc = inclination_deg.to_radians();
    let dec = declination_deg.to_radians();
    let field = [inc.cos() * dec.sin(), inc.cos() * dec.cos(), inc.sin()];
    let r = [de, dn, -DEPTH];
    let r_norm = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    let r_hat = [r[0] / r_norm, r[1] / r_norm, r[2] / r_norm];
    let f_dot_r = field[0] * r_hat[0] + field[1] * r_hat[1] + field[2] * r_hat[2];
    // Magnetization parallel to the field, so both direction cosines match
    MOMENT * (3.0 * f_dot_r * f_dot_r - 1.0) / (r_norm * r_norm * r_norm)
}

/// The same anomaly as measured at the magnetic pole (vertical field)
fn pole_anomaly(de: f64, dn: f64) -> f64 {
    dipole_anomaly(de, dn, 90.0, 0.0)
}

/// Deterministic uniform scatter in [0, 1)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn write_survey_csv(path: &Path, n_points: usize, inclination: f64, declination: f64) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "easting,northing,anomaly_nt").unwrap();
    let mut rng = Lcg(20230504);
    for _ in 0..n_points {
        let easting = rng.next() * 1000.0;
        let northing = rng.next() * 1000.0;
        let value = dipole_anomaly(easting - 500.0, northing - 500.0, inclination, declination);
        writeln!(file, "{:.3},{:.3},{:.6}", easting, northing, value).unwrap();
    }
}

fn survey_params() -> SurveyParams {
    SurveyParams {
        cell_size: 50.0,
        smoothing: 0.1,
        inclination: 60.0,
        declination: 0.0,
        output_resolution: 25.0,
        padding: 0.0,
        mask_distance: None,
        base_level: 0.0,
        statistic: ReduceStatistic::Median,
        epsg: 31370,
    }
}

#[test]
fn test_end_to_end_dipole_recovery() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("survey.csv");
    let output = dir.path().join("rtp.tif");

    // 1,000 synthetic points over 1 km x 1 km with a known dipole anomaly
    write_survey_csv(&input, 1000, 60.0, 0.0);

    let summary = aeromag::run(&input, &output, &LoaderConfig::default(), &survey_params()).unwrap();
    assert_eq!(summary.input_points, 1000);
    assert!(summary.reduced_points <= 1000);
    assert!(summary.grid_rows > 10 && summary.grid_cols > 10);

    let raster = RasterWriter::read_geotiff(&output).unwrap();
    assert_eq!(raster.shape(), (summary.grid_rows, summary.grid_cols));

    // Interior cells match the analytically pole-reduced anomaly within
    // 5% of its 100 nT peak amplitude.
    let tolerance = 5.0;
    let mut compared = 0;
    for i in 0..summary.grid_rows {
        for j in 0..summary.grid_cols {
            let (x, y) = raster.transform.pixel_center(i, j);
            let de = x - 500.0;
            let dn = y - 500.0;
            if de * de + dn * dn > 250.0 * 250.0 {
                continue;
            }
            let expected = pole_anomaly(de, dn);
            let actual = raster.data[[i, j]];
            assert!(
                (actual - expected).abs() < tolerance,
                "cell ({}, {}) at ({:.0}, {:.0}): expected {:.2}, got {:.2}",
                i,
                j,
                x,
                y,
                expected,
                actual
            );
            compared += 1;
        }
    }
    assert!(compared > 100, "too few interior cells compared: {}", compared);
}

#[test]
fn test_distance_mask_produces_nodata() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("survey.csv");
    let output = dir.path().join("rtp.tif");
    write_survey_csv(&input, 500, 60.0, 0.0);

    let params = SurveyParams {
        padding: 100.0,
        mask_distance: Some(30.0),
        ..survey_params()
    };
    let summary = aeromag::run(&input, &output, &LoaderConfig::default(), &params).unwrap();
    // The padded fringe is more than 30 m from every point
    assert!(summary.masked_cells > 0);

    let raster = RasterWriter::read_geotiff(&output).unwrap();
    let nan_cells = raster.data.iter().filter(|v| v.is_nan()).count();
    assert_eq!(nan_cells, summary.masked_cells);
}

#[test]
fn test_load_failure_is_attributed_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("survey.csv");
    let output = dir.path().join("rtp.tif");

    // Value column name does not match the loader config
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "easting,northing,field_total").unwrap();
    writeln!(file, "1.0,2.0,3.0").unwrap();
    drop(file);

    let result = aeromag::run(&input, &output, &LoaderConfig::default(), &survey_params());
    match result {
        Err(MagError::Stage { stage, .. }) => assert_eq!(stage, Stage::Load),
        other => panic!("expected a load-stage failure, got {:?}", other.map(|_| ())),
    }
    assert!(!output.exists(), "no output may be written on failure");
}

#[test]
fn test_sparse_input_fails_at_spline_stage() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("survey.csv");
    let output = dir.path().join("rtp.tif");

    // Two points in a single block reduce to one point, below the spline minimum
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "easting,northing,anomaly_nt").unwrap();
    writeln!(file, "1.0,1.0,10.0").unwrap();
    writeln!(file, "2.0,2.0,12.0").unwrap();
    drop(file);

    let result = aeromag::run(&input, &output, &LoaderConfig::default(), &survey_params());
    match result {
        Err(MagError::Stage { stage, .. }) => assert_eq!(stage, Stage::SplineFit),
        other => panic!("expected a spline-stage failure, got {:?}", other.map(|_| ())),
    }
    assert!(!output.exists());
}

#[test]
fn test_out_of_range_parameters_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("survey.csv");
    let output = dir.path().join("rtp.tif");
    write_survey_csv(&input, 100, 60.0, 0.0);

    let params = SurveyParams {
        inclination: 100.0,
        ..survey_params()
    };
    let result = aeromag::run(&input, &output, &LoaderConfig::default(), &params);
    assert!(matches!(result, Err(MagError::Parameter(_))));
    assert!(!output.exists());
}
