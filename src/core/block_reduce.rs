use crate::types::{MagError, MagResult, PointCollection, PointRecord, ReduceStatistic};
use std::collections::HashMap;

/// Spatial decimation of a point collection onto square blocks.
///
/// Each occupied block collapses to one point at the centroid of its members,
/// valued with a robust statistic of the member values. Empty blocks emit
/// nothing, so output density follows survey coverage.
pub struct BlockReducer {
    /// Block edge length in CRS units
    cell_size: f64,
    statistic: ReduceStatistic,
}

impl BlockReducer {
    pub fn new(cell_size: f64, statistic: ReduceStatistic) -> MagResult<Self> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(MagError::Parameter(format!(
                "block cell size must be positive and finite, got {}",
                cell_size
            )));
        }
        Ok(Self {
            cell_size,
            statistic,
        })
    }

    /// Reduce a point collection to at most one point per occupied block.
    pub fn reduce(&self, collection: &PointCollection) -> MagResult<PointCollection> {
        if collection.is_empty() {
            return Err(MagError::DegenerateInput(
                "cannot block-reduce an empty point collection".to_string(),
            ));
        }

        log::info!(
            "Block-reducing {} points with {} m cells ({:?})",
            collection.len(),
            self.cell_size,
            self.statistic
        );

        // Anchor the block lattice at the data minimum so the partition is
        // independent of absolute coordinates.
        let min_e = collection
            .points
            .iter()
            .map(|p| p.easting)
            .fold(f64::INFINITY, f64::min);
        let min_n = collection
            .points
            .iter()
            .map(|p| p.northing)
            .fold(f64::INFINITY, f64::min);

        let mut blocks: HashMap<(i64, i64), Vec<&PointRecord>> = HashMap::new();
        for point in &collection.points {
            let col = ((point.easting - min_e) / self.cell_size).floor() as i64;
            let row = ((point.northing - min_n) / self.cell_size).floor() as i64;
            blocks.entry((row, col)).or_default().push(point);
        }

        let mut reduced = Vec::with_capacity(blocks.len());
        for members in blocks.values() {
            let count = members.len() as f64;
            let easting = members.iter().map(|p| p.easting).sum::<f64>() / count;
            let northing = members.iter().map(|p| p.northing).sum::<f64>() / count;
            let value = match self.statistic {
                ReduceStatistic::Mean => members.iter().map(|p| p.value).sum::<f64>() / count,
                ReduceStatistic::Median => {
                    let mut values: Vec<f64> = members.iter().map(|p| p.value).collect();
                    median_in_place(&mut values)
                }
            };
            reduced.push(PointRecord {
                easting,
                northing,
                elevation: None,
                value,
                line_id: None,
                time: None,
            });
        }

        log::info!(
            "Block reduction: {} points -> {} blocks",
            collection.len(),
            reduced.len()
        );
        Ok(PointCollection::new(reduced, collection.epsg))
    }
}

/// Median by partial sort; averages the two middle values for even counts.
fn median_in_place(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
