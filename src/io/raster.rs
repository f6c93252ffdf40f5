use crate::types::{GeoTransform, MagError, MagGrid, MagResult, RegularGrid};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use std::path::Path;

/// No-data sentinel written into cells that never received a finite value
pub const NO_DATA: f64 = -32768.0;

/// GeoTIFF writer/reader for anomaly grids
pub struct RasterWriter;

impl RasterWriter {
    /// Write a grid as a single-band GeoTIFF with embedded CRS and transform.
    ///
    /// Non-finite cells are written as the no-data sentinel and the band
    /// no-data value is set accordingly.
    pub fn write_geotiff<P: AsRef<Path>>(grid: &RegularGrid, output_path: P) -> MagResult<()> {
        log::info!(
            "Writing {}x{} grid as GeoTIFF: {}",
            grid.shape().0,
            grid.shape().1,
            output_path.as_ref().display()
        );

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (rows, cols) = grid.shape();

        let mut dataset = driver.create_with_band_type::<f64, _>(
            output_path.as_ref(),
            cols as isize,
            rows as isize,
            1,
        )?;

        dataset.set_geo_transform(&grid.transform.as_gdal())?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(grid.epsg)?)?;

        let flat_data: Vec<f64> = grid
            .data
            .iter()
            .map(|&v| if v.is_finite() { v } else { NO_DATA })
            .collect();
        let nodata_count = flat_data.iter().filter(|&&v| v == NO_DATA).count();

        let mut rasterband = dataset.rasterband(1)?;
        let buffer = Buffer::new((cols, rows), flat_data);
        rasterband.write((0, 0), (cols, rows), &buffer)?;
        rasterband.set_no_data_value(Some(NO_DATA))?;

        if nodata_count > 0 {
            log::debug!("Wrote {} no-data cells", nodata_count);
        }
        log::info!("GeoTIFF written successfully");
        Ok(())
    }

    /// Read a single-band raster back into a grid; no-data cells become NaN.
    pub fn read_geotiff<P: AsRef<Path>>(path: P) -> MagResult<RegularGrid> {
        log::info!("Reading raster: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (cols, rows) = dataset.raster_size();

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;

        let mut data = MagGrid::from_shape_vec((rows, cols), band_data.data)
            .map_err(|e| MagError::Format(format!("failed to reshape raster data: {}", e)))?;
        if let Some(nodata) = nodata {
            for value in data.iter_mut() {
                if *value == nodata {
                    *value = f64::NAN;
                }
            }
        }

        let epsg = dataset
            .spatial_ref()?
            .auth_code()
            .map(|code| code as u32)
            .unwrap_or(0);

        let transform = GeoTransform {
            top_left_x: geo_transform[0],
            pixel_width: geo_transform[1],
            rotation_x: geo_transform[2],
            top_left_y: geo_transform[3],
            rotation_y: geo_transform[4],
            pixel_height: geo_transform[5],
        };

        RegularGrid::new(data, transform, epsg)
    }
}
