use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Gridded anomaly values (row-major, north-up)
pub type MagGrid = Array2<f64>;

/// A single geolocated magnetic measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    /// Easting (or longitude) in the collection CRS
    pub easting: f64,
    /// Northing (or latitude) in the collection CRS
    pub northing: f64,
    /// Sensor elevation in meters, if recorded
    pub elevation: Option<f64>,
    /// Total-field magnetic value in nanotesla
    pub value: f64,
    /// Flight-line identifier, if recorded
    pub line_id: Option<String>,
    /// Acquisition timestamp, if recorded
    pub time: Option<DateTime<Utc>>,
}

/// Unordered set of point records sharing one coordinate reference system
#[derive(Debug, Clone)]
pub struct PointCollection {
    pub points: Vec<PointRecord>,
    /// EPSG code of the shared CRS
    pub epsg: u32,
}

impl PointCollection {
    pub fn new(points: Vec<PointRecord>, epsg: u32) -> Self {
        Self { points, epsg }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Real-world coordinates of the center of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    pub fn as_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// A 2-D scalar raster with an affine mapping to real-world coordinates
#[derive(Debug, Clone)]
pub struct RegularGrid {
    pub data: MagGrid,
    pub transform: GeoTransform,
    /// EPSG code of the grid CRS
    pub epsg: u32,
}

impl RegularGrid {
    /// Create a grid, checking that the array shape is usable with the transform.
    pub fn new(data: MagGrid, transform: GeoTransform, epsg: u32) -> MagResult<Self> {
        let (rows, cols) = data.dim();
        if rows == 0 || cols == 0 {
            return Err(MagError::DegenerateInput(
                "grid must have at least one row and one column".to_string(),
            ));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(MagError::Parameter(
                "grid transform has zero pixel size".to_string(),
            ));
        }
        Ok(Self { data, transform, epsg })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Replace the values, keeping shape, transform and CRS.
    pub fn with_data(&self, data: MagGrid) -> MagResult<Self> {
        if data.dim() != self.data.dim() {
            return Err(MagError::DegenerateInput(format!(
                "replacement grid shape {:?} does not match {:?}",
                data.dim(),
                self.data.dim()
            )));
        }
        RegularGrid::new(data, self.transform.clone(), self.epsg)
    }
}

/// Robust statistic used when collapsing a block of points to one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceStatistic {
    Median,
    Mean,
}

/// Per-run survey configuration, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyParams {
    /// Block-reduction cell size in CRS units
    pub cell_size: f64,
    /// Spline damping; 0 means exact interpolation
    pub smoothing: f64,
    /// Ambient-field inclination in degrees, [-90, 90]
    pub inclination: f64,
    /// Ambient-field declination in degrees, [-180, 180]
    pub declination: f64,
    /// Output grid node spacing in CRS units
    pub output_resolution: f64,
    /// Outward padding applied to the data region before gridding
    pub padding: f64,
    /// Cells farther than this from every reduced point become no-data
    pub mask_distance: Option<f64>,
    /// Constant ambient-field level subtracted from every value before gridding
    pub base_level: f64,
    /// Statistic used by the block reducer
    pub statistic: ReduceStatistic,
    /// EPSG code of both the input points and the output raster
    pub epsg: u32,
}

impl Default for SurveyParams {
    fn default() -> Self {
        Self {
            cell_size: 5.0,
            smoothing: 1e-10,
            inclination: 90.0,
            declination: 0.0,
            output_resolution: 1.0,
            padding: 50.0,
            mask_distance: Some(20.0),
            base_level: 0.0,
            statistic: ReduceStatistic::Median,
            epsg: 31370,
        }
    }
}

impl SurveyParams {
    /// Check the scalar ranges from the run contract.
    pub fn validate(&self) -> MagResult<()> {
        if !(self.cell_size > 0.0) {
            return Err(MagError::Parameter(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.smoothing >= 0.0) {
            return Err(MagError::Parameter(format!(
                "smoothing must be non-negative, got {}",
                self.smoothing
            )));
        }
        if !(self.output_resolution > 0.0) {
            return Err(MagError::Parameter(format!(
                "output_resolution must be positive, got {}",
                self.output_resolution
            )));
        }
        if !(self.padding >= 0.0) {
            return Err(MagError::Parameter(format!(
                "padding must be non-negative, got {}",
                self.padding
            )));
        }
        if let Some(maxdist) = self.mask_distance {
            if !(maxdist > 0.0) {
                return Err(MagError::Parameter(format!(
                    "mask_distance must be positive, got {}",
                    maxdist
                )));
            }
        }
        crate::core::rtp::validate_field_direction(self.inclination, self.declination)?;
        Ok(())
    }
}

/// Pipeline stages, used to attribute a failure to its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    BlockReduce,
    SplineFit,
    GridEvaluate,
    ReduceToPole,
    WriteRaster,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Load => write!(f, "point loading"),
            Stage::BlockReduce => write!(f, "block reduction"),
            Stage::SplineFit => write!(f, "spline fitting"),
            Stage::GridEvaluate => write!(f, "grid evaluation"),
            Stage::ReduceToPole => write!(f, "reduction to pole"),
            Stage::WriteRaster => write!(f, "raster writing"),
        }
    }
}

/// Error types for magnetic post-processing
#[derive(Debug, thiserror::Error)]
pub enum MagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input format: {0}")]
    Format(String),

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("parameter out of range: {0}")]
    Parameter(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<MagError>,
    },
}

impl MagError {
    /// Wrap an error with the pipeline stage it came from.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            // Keep the innermost attribution.
            MagError::Stage { .. } => self,
            other => MagError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

/// Result type for magnetic post-processing operations
pub type MagResult<T> = Result<T, MagError>;
