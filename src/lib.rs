//! aeromag: post-processing for airborne magnetic surveys
//!
//! Turns denoised magnetic survey point clouds into georeferenced rasters of
//! pole-reduced total-field anomaly. The pipeline is a fixed sequential chain:
//! load points, block-reduce, fit a biharmonic spline, evaluate it on a
//! regular grid, reduce the grid to the pole, and write a GeoTIFF.

pub mod types;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    GeoTransform, MagError, MagGrid, MagResult, PointCollection, PointRecord, ReduceStatistic,
    RegularGrid, Stage, SurveyParams,
};

pub use io::{LoaderConfig, PointLoader, RasterWriter};
pub use crate::core::{reduce_to_pole, BiharmonicSpline, BlockReducer, Region};
pub use pipeline::{run, RunSummary};
