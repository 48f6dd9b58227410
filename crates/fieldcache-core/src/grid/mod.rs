//! Task grid decoding and rasterization.
//!
//! A task grid is a binary raster written by farm machinery. Categorical
//! grids hold a treatment zone code per cell, dense grids hold the value
//! itself. `rasterize` turns either into a colored RGBA image plus the map
//! extent it covers; placing it on a map is up to the caller.

pub mod dataset;
pub mod manifest;
pub mod palette;
pub mod raster;

pub use dataset::{DecodeError, GridDataset, GridType, TreatmentZone, ValueRange};
pub use manifest::{load_manifest, LoadedManifest, ManifestError};
pub use palette::Palette;
pub use raster::{rasterize, render_all, GeoExtent, RasterImage, RenderOutcome, RenderedGrid, TaskGrid};
