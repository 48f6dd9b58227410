//! Loading task grids from a JSON manifest.
//!
//! Unpacking the task file itself happens elsewhere. The manifest lists each
//! grid's attributes and treatment zones and names the binary file holding
//! its cells, relative to the manifest.
//!
//! ```json
//! {
//!   "grids": [{
//!     "name": "TSK1",
//!     "grid_type": "dense",
//!     "columns": 120, "rows": 80,
//!     "cell_east_size": 0.0001, "cell_north_size": 0.0001,
//!     "origin_east": 11.57, "origin_north": 48.13,
//!     "cells_file": "GRD00001.bin",
//!     "treatment_zones": []
//!   }]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::{GridDataset, GridType, TaskGrid, TreatmentZone};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    grids: Vec<GridEntry>,
}

#[derive(Debug, Deserialize)]
struct GridEntry {
    name: String,
    grid_type: GridType,
    columns: u32,
    rows: u32,
    cell_east_size: f64,
    cell_north_size: f64,
    origin_east: f64,
    origin_north: f64,
    cells_file: PathBuf,
    #[serde(default)]
    treatment_zones: Vec<TreatmentZone>,
}

/// Grids of one manifest. A grid whose cell file can't be read lands in
/// `unreadable` and the others still load.
#[derive(Debug, Default)]
pub struct LoadedManifest {
    pub grids: Vec<TaskGrid>,
    pub unreadable: Vec<(String, ManifestError)>,
}

/// Load a manifest and the cell files it names. Only an unreadable or
/// invalid manifest document is an error.
pub fn load_manifest(path: &Path) -> Result<LoadedManifest, ManifestError> {
    let read = |p: &Path| {
        std::fs::read(p).map_err(|source| ManifestError::Io {
            path: p.to_path_buf(),
            source,
        })
    };

    let manifest: Manifest =
        serde_json::from_slice(&read(path)?).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut loaded = LoadedManifest::default();
    for entry in manifest.grids {
        let cells = match read(&base.join(&entry.cells_file)) {
            Ok(cells) => cells,
            Err(e) => {
                warn!(grid = %entry.name, error = %e, "Skipping grid with unreadable cells");
                loaded.unreadable.push((entry.name, e));
                continue;
            }
        };
        loaded.grids.push(TaskGrid {
            name: entry.name,
            dataset: GridDataset {
                grid_type: entry.grid_type,
                columns: entry.columns,
                rows: entry.rows,
                cell_east_size: entry.cell_east_size,
                cell_north_size: entry.cell_north_size,
                origin_east: entry.origin_east,
                origin_north: entry.origin_north,
                cells,
            },
            zones: entry.treatment_zones,
        });
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::render_all;
    use tempfile::tempdir;

    #[test]
    fn test_load_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("zones.bin"), [1u8, 2, 1, 2]).unwrap();
        std::fs::write(
            dir.path().join("task.json"),
            r#"{"grids": [{
                "name": "TSK1", "grid_type": "categorical",
                "columns": 2, "rows": 2,
                "cell_east_size": 0.5, "cell_north_size": 0.5,
                "origin_east": 11.0, "origin_north": 48.0,
                "cells_file": "zones.bin",
                "treatment_zones": [{"code": 1, "values": [120]}, {"code": 2, "designator": "edge", "values": [80, 5]}]
            }]}"#,
        )
        .unwrap();

        let tasks = load_manifest(&dir.path().join("task.json")).unwrap().grids;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "TSK1");
        assert_eq!(tasks[0].dataset.cells, vec![1, 2, 1, 2]);
        assert_eq!(tasks[0].zones[1].representative_value(), Some(80));
    }

    #[test]
    fn test_unreadable_grid_does_not_block_the_others() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("good.bin"), 7i32.to_le_bytes()).unwrap();
        std::fs::write(
            dir.path().join("task.json"),
            r#"{"grids": [
                {"name": "BAD", "grid_type": "dense", "columns": 1, "rows": 1,
                 "cell_east_size": 1, "cell_north_size": 1, "origin_east": 0, "origin_north": 0,
                 "cells_file": "missing.bin"},
                {"name": "GOOD", "grid_type": "dense", "columns": 1, "rows": 1,
                 "cell_east_size": 1, "cell_north_size": 1, "origin_east": 0, "origin_north": 0,
                 "cells_file": "good.bin"}
            ]}"#,
        )
        .unwrap();

        let loaded = load_manifest(&dir.path().join("task.json")).unwrap();
        assert_eq!(loaded.unreadable.len(), 1);
        let (name, err) = &loaded.unreadable[0];
        assert_eq!(name, "BAD");
        assert!(matches!(err, ManifestError::Io { path, .. } if path.ends_with("missing.bin")));

        let outcome = render_all(&loaded.grids);
        assert_eq!(outcome.rendered.len(), 1);
        assert_eq!(outcome.rendered[0].0, "GOOD");
    }

    #[test]
    fn test_invalid_manifest_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("task.json"), "{\"grids\": 3}").unwrap();

        let err = load_manifest(&dir.path().join("task.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }
}
