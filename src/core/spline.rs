use crate::types::{GeoTransform, MagError, MagGrid, MagResult, PointCollection, RegularGrid};
use nalgebra::{DMatrix, DVector};

/// Rectangular data region in CRS units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Region {
    /// Tight bounding box of a point collection.
    pub fn from_points(collection: &PointCollection) -> MagResult<Self> {
        if collection.is_empty() {
            return Err(MagError::DegenerateInput(
                "cannot compute the region of an empty point collection".to_string(),
            ));
        }
        let mut region = Region {
            west: f64::INFINITY,
            east: f64::NEG_INFINITY,
            south: f64::INFINITY,
            north: f64::NEG_INFINITY,
        };
        for p in &collection.points {
            region.west = region.west.min(p.easting);
            region.east = region.east.max(p.easting);
            region.south = region.south.min(p.northing);
            region.north = region.north.max(p.northing);
        }
        Ok(region)
    }

    /// Grow the region outward by a fixed amount on every side.
    pub fn pad(&self, amount: f64) -> Self {
        Region {
            west: self.west - amount,
            east: self.east + amount,
            south: self.south - amount,
            north: self.north + amount,
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }
}

/// Biharmonic spline gridder for scattered 2-D data.
///
/// Models the surface as a sum of Green's functions of the biharmonic
/// equation, `g(r) = r^2 (ln r - 1)`, centered on the data points. The
/// damping parameter trades fit error against surface smoothness; zero
/// damping interpolates the data exactly.
#[derive(Debug, Clone)]
pub struct BiharmonicSpline {
    damping: f64,
}

/// A spline fitted to one point collection, ready for evaluation anywhere.
///
/// Evaluation outside the convex hull of the source points is allowed but
/// its accuracy is not guaranteed.
#[derive(Debug, Clone)]
pub struct FittedSpline {
    forces: Vec<(f64, f64)>,
    coefficients: Vec<f64>,
    mean: f64,
    epsg: u32,
}

impl BiharmonicSpline {
    pub fn new(damping: f64) -> MagResult<Self> {
        if !(damping >= 0.0) || !damping.is_finite() {
            return Err(MagError::Parameter(format!(
                "spline damping must be non-negative and finite, got {}",
                damping
            )));
        }
        Ok(Self { damping })
    }

    /// Fit the spline to a reduced point collection.
    pub fn fit(&self, collection: &PointCollection) -> MagResult<FittedSpline> {
        let n = collection.len();
        if n < 3 {
            return Err(MagError::DegenerateInput(format!(
                "spline fitting needs at least 3 points, got {}",
                n
            )));
        }

        log::info!(
            "Fitting biharmonic spline to {} points (damping {:e})",
            n,
            self.damping
        );

        let forces: Vec<(f64, f64)> = collection
            .points
            .iter()
            .map(|p| (p.easting, p.northing))
            .collect();

        // Fit residuals about the mean; the constant level is restored on
        // prediction.
        let mean = collection.points.iter().map(|p| p.value).sum::<f64>() / n as f64;
        let residuals = DVector::from_iterator(n, collection.points.iter().map(|p| p.value - mean));

        // Symmetric Green's system with damping on the diagonal:
        // (G + damping*I) c = d
        let mut green = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                green[(i, j)] = greens_function(distance(forces[i], forces[j]));
            }
            green[(i, i)] += self.damping;
        }

        let solution = green
            .lu()
            .solve(&residuals)
            .ok_or_else(|| {
                MagError::DegenerateInput(
                    "spline system is singular; input points are too sparse or collinear"
                        .to_string(),
                )
            })?;

        if solution.iter().any(|c| !c.is_finite()) {
            return Err(MagError::DegenerateInput(
                "spline solve produced non-finite coefficients".to_string(),
            ));
        }

        Ok(FittedSpline {
            forces,
            coefficients: solution.iter().copied().collect(),
            mean,
            epsg: collection.epsg,
        })
    }
}

impl FittedSpline {
    /// Evaluate the fitted surface at a single location.
    pub fn predict(&self, easting: f64, northing: f64) -> f64 {
        let mut value = self.mean;
        for (force, coefficient) in self.forces.iter().zip(&self.coefficients) {
            value += coefficient * greens_function(distance(*force, (easting, northing)));
        }
        value
    }

    /// Evaluate the surface on every node of a regular north-up grid.
    ///
    /// Nodes run from the region's west/north corner at the given spacing;
    /// the output shape is fully determined by the region and resolution.
    pub fn grid(&self, region: &Region, resolution: f64) -> MagResult<RegularGrid> {
        if !(resolution > 0.0) || !resolution.is_finite() {
            return Err(MagError::Parameter(format!(
                "grid resolution must be positive and finite, got {}",
                resolution
            )));
        }
        if region.width() < 0.0 || region.height() < 0.0 {
            return Err(MagError::Parameter(format!(
                "inverted grid region: {:?}",
                region
            )));
        }

        let cols = (region.width() / resolution).round() as usize + 1;
        let rows = (region.height() / resolution).round() as usize + 1;
        log::info!(
            "Evaluating spline on a {}x{} grid at {} m spacing",
            rows,
            cols,
            resolution
        );

        let mut data = MagGrid::zeros((rows, cols));
        for i in 0..rows {
            let northing = region.north - i as f64 * resolution;
            for j in 0..cols {
                let easting = region.west + j as f64 * resolution;
                data[[i, j]] = self.predict(easting, northing);
            }
        }

        // Node-registered values: pixel centers sit on the grid nodes.
        let transform = GeoTransform::north_up(
            region.west - resolution / 2.0,
            region.north + resolution / 2.0,
            resolution,
            resolution,
        );
        RegularGrid::new(data, transform, self.epsg)
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Green's function of the 2-D biharmonic equation, with the removable
/// singularity at r = 0 evaluated as its limit, 0.
fn greens_function(r: f64) -> f64 {
    if r <= f64::EPSILON {
        0.0
    } else {
        r * r * (r.ln() - 1.0)
    }
}
