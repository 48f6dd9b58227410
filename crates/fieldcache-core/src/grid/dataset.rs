use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a grid's cell buffer is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridType {
    /// One unsigned byte per cell, naming a treatment zone.
    Categorical,
    /// One little-endian `i32` per cell, the measured value itself.
    Dense,
}

impl GridType {
    pub fn bytes_per_cell(&self) -> usize {
        match self {
            GridType::Categorical => 1,
            GridType::Dense => 4,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Grid has a zero dimension ({columns}x{rows})")]
    ZeroDimension { columns: u32, rows: u32 },

    #[error("Grid of {columns}x{rows} cells is too large")]
    TooLarge { columns: u32, rows: u32 },

    #[error("Grid buffer is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A treatment zone of a categorical grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentZone {
    pub code: u8,
    #[serde(default)]
    pub designator: Option<String>,
    /// Process data variable values; the first one represents the zone.
    #[serde(default)]
    pub values: Vec<i64>,
}

impl TreatmentZone {
    pub fn representative_value(&self) -> Option<i64> {
        self.values.first().copied()
    }
}

/// Smallest and largest non-zero value of a grid. `{0, 0}` when the grid
/// holds no value at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub const EMPTY: ValueRange = ValueRange { min: 0, max: 0 };

    fn fold(values: impl Iterator<Item = i64>) -> Self {
        values
            .filter(|&v| v != 0)
            .fold(None, |acc: Option<ValueRange>, v| {
                Some(match acc {
                    Some(r) => ValueRange {
                        min: r.min.min(v),
                        max: r.max.max(v),
                    },
                    None => ValueRange { min: v, max: v },
                })
            })
            .unwrap_or(Self::EMPTY)
    }
}

/// A task grid with its raw cell buffer, rows stored top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDataset {
    pub grid_type: GridType,
    pub columns: u32,
    pub rows: u32,
    pub cell_east_size: f64,
    pub cell_north_size: f64,
    pub origin_east: f64,
    pub origin_north: f64,
    pub cells: Vec<u8>,
}

impl GridDataset {
    /// Number of cells, after checking the buffer matches the dimensions.
    pub fn validate(&self) -> Result<usize, DecodeError> {
        let (columns, rows) = (self.columns, self.rows);
        if columns == 0 || rows == 0 {
            return Err(DecodeError::ZeroDimension { columns, rows });
        }

        let too_large = DecodeError::TooLarge { columns, rows };
        let cell_count = (columns as usize)
            .checked_mul(rows as usize)
            .ok_or_else(|| too_large.clone())?;
        let expected = cell_count
            .checked_mul(self.grid_type.bytes_per_cell())
            .ok_or(too_large)?;

        if self.cells.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: self.cells.len(),
            });
        }
        Ok(cell_count)
    }

    /// Cell values of a dense grid in row-major order.
    pub fn dense_values(&self) -> Result<Vec<i32>, DecodeError> {
        self.validate()?;
        Ok(self
            .cells
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Zone codes a categorical grid actually uses.
    pub fn referenced_zone_codes(&self) -> Result<BTreeSet<u8>, DecodeError> {
        self.validate()?;
        Ok(self.cells.iter().copied().collect())
    }

    pub fn value_range(&self, zones: &[TreatmentZone]) -> Result<ValueRange, DecodeError> {
        match self.grid_type {
            GridType::Categorical => {
                let codes = self.referenced_zone_codes()?;
                Ok(ValueRange::fold(
                    codes.into_iter().filter_map(|code| zone_value(zones, code)),
                ))
            }
            GridType::Dense => Ok(ValueRange::fold(
                self.dense_values()?.into_iter().map(i64::from),
            )),
        }
    }
}

/// Representative value of the first zone carrying `code`.
pub(crate) fn zone_value(zones: &[TreatmentZone], code: u8) -> Option<i64> {
    zones
        .iter()
        .find(|z| z.code == code)
        .and_then(TreatmentZone::representative_value)
}

#[cfg(test)]
pub(crate) fn dense(columns: u32, rows: u32, values: &[i32]) -> GridDataset {
    GridDataset {
        grid_type: GridType::Dense,
        columns,
        rows,
        cell_east_size: 1.0,
        cell_north_size: 1.0,
        origin_east: 0.0,
        origin_north: 0.0,
        cells: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}
