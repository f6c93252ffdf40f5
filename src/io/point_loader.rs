use crate::types::{MagError, MagResult, PointCollection, PointRecord};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Column mapping and dialect for a delimited point file.
///
/// Column names are matched against trimmed header fields; files exported by
/// acquisition tools often carry leading spaces in their headers.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Easting / longitude column name
    pub x_column: String,
    /// Northing / latitude column name
    pub y_column: String,
    /// Magnetic value column name
    pub value_column: String,
    /// Sensor elevation column, if present
    pub elevation_column: Option<String>,
    /// Flight-line id column, if present
    pub line_column: Option<String>,
    /// RFC 3339 timestamp column, if present
    pub time_column: Option<String>,
    /// Field delimiter
    pub delimiter: u8,
    /// EPSG code of the point coordinates
    pub epsg: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            x_column: "easting".to_string(),
            y_column: "northing".to_string(),
            value_column: "anomaly_nt".to_string(),
            elevation_column: None,
            line_column: None,
            time_column: None,
            delimiter: b',',
            epsg: 31370,
        }
    }
}

/// Reader for delimited survey point files
pub struct PointLoader;

impl PointLoader {
    /// Load a point collection from a delimited text file.
    ///
    /// Fails with a format error when a required column is missing, a
    /// coordinate or value field is non-numeric or non-finite, or the file
    /// contains no data rows.
    pub fn load<P: AsRef<Path>>(path: P, config: &LoaderConfig) -> MagResult<PointCollection> {
        log::info!("Loading survey points from: {}", path.as_ref().display());
        log::debug!(
            "Columns: x='{}' y='{}' value='{}'",
            config.x_column,
            config.y_column,
            config.value_column
        );

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(config.delimiter)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let x_idx = Self::require_column(&headers, &config.x_column)?;
        let y_idx = Self::require_column(&headers, &config.y_column)?;
        let value_idx = Self::require_column(&headers, &config.value_column)?;
        let elevation_idx = Self::optional_column(&headers, config.elevation_column.as_deref())?;
        let line_idx = Self::optional_column(&headers, config.line_column.as_deref())?;
        let time_idx = Self::optional_column(&headers, config.time_column.as_deref())?;

        let mut points = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            // 1-based data row, after the header line
            let row_label = row + 2;

            let easting = Self::parse_field(&record, x_idx, &config.x_column, row_label)?;
            let northing = Self::parse_field(&record, y_idx, &config.y_column, row_label)?;
            let value = Self::parse_field(&record, value_idx, &config.value_column, row_label)?;

            if !easting.is_finite() || !northing.is_finite() {
                return Err(MagError::Format(format!(
                    "non-finite coordinate at line {}: ({}, {})",
                    row_label, easting, northing
                )));
            }
            if !value.is_finite() {
                return Err(MagError::Format(format!(
                    "non-finite magnetic value at line {}",
                    row_label
                )));
            }

            let elevation = match elevation_idx {
                Some(idx) => Some(Self::parse_field(
                    &record,
                    idx,
                    config.elevation_column.as_deref().unwrap_or(""),
                    row_label,
                )?),
                None => None,
            };
            let line_id = line_idx
                .and_then(|idx| record.get(idx))
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            let time = match time_idx.and_then(|idx| record.get(idx)).filter(|s| !s.is_empty()) {
                Some(raw) => Some(Self::parse_timestamp(raw, row_label)?),
                None => None,
            };

            points.push(PointRecord {
                easting,
                northing,
                elevation,
                value,
                line_id,
                time,
            });
        }

        if points.is_empty() {
            return Err(MagError::Format(
                "input file contains no data rows".to_string(),
            ));
        }

        log::info!("Loaded {} survey points", points.len());
        Ok(PointCollection::new(points, config.epsg))
    }

    fn require_column(headers: &[String], name: &str) -> MagResult<usize> {
        headers
            .iter()
            .position(|h| h == name.trim())
            .ok_or_else(|| {
                MagError::Format(format!(
                    "required column '{}' not found; available columns: {}",
                    name,
                    headers.join(", ")
                ))
            })
    }

    fn optional_column(headers: &[String], name: Option<&str>) -> MagResult<Option<usize>> {
        match name {
            Some(name) => Self::require_column(headers, name).map(Some),
            None => Ok(None),
        }
    }

    fn parse_field(
        record: &csv::StringRecord,
        idx: usize,
        column: &str,
        row_label: usize,
    ) -> MagResult<f64> {
        let raw = record.get(idx).ok_or_else(|| {
            MagError::Format(format!(
                "line {} is missing the '{}' field",
                row_label, column
            ))
        })?;
        raw.trim().parse::<f64>().map_err(|_| {
            MagError::Format(format!(
                "non-numeric value '{}' in column '{}' at line {}",
                raw, column, row_label
            ))
        })
    }

    fn parse_timestamp(raw: &str, row_label: usize) -> MagResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| {
                MagError::Format(format!(
                    "unparsable timestamp '{}' at line {}",
                    raw, row_label
                ))
            })
    }
}
