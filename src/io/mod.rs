//! I/O modules for reading survey points and writing rasters

pub mod point_loader;
pub mod raster;

pub use point_loader::{LoaderConfig, PointLoader};
pub use raster::RasterWriter;
