use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::{DecodeError, GridDataset, GridType, Palette, TreatmentZone, ValueRange};

/// RGBA8 image, rows stored top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    fn transparent(width: u32, height: u32, pixel_count: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; pixel_count * 4],
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        4 * (y as usize * self.width as usize + x as usize)
    }

    /// RGBA of the pixel at column `x`, row `y` (row 0 is the top row).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// Encode as a Netpbm PAM document with an alpha channel.
    pub fn to_pam(&self) -> Vec<u8> {
        let header = format!(
            "P7\nWIDTH {}\nHEIGHT {}\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n",
            self.width, self.height
        );
        let mut out = Vec::with_capacity(header.len() + self.pixels.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }
}

/// Map-space bounds of a grid: `[min east, min north, max east, max north]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoExtent {
    pub min_east: f64,
    pub min_north: f64,
    pub max_east: f64,
    pub max_north: f64,
}

impl GeoExtent {
    pub fn of(grid: &GridDataset) -> Self {
        Self {
            min_east: grid.origin_east,
            min_north: grid.origin_north,
            max_east: grid.origin_east + grid.cell_east_size * f64::from(grid.columns),
            max_north: grid.origin_north + grid.cell_north_size * f64::from(grid.rows),
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.min_east, self.min_north, self.max_east, self.max_north]
    }
}

#[derive(Debug, Clone)]
pub struct RenderedGrid {
    pub image: RasterImage,
    pub extent: GeoExtent,
    pub range: ValueRange,
}

/// Turn a grid into a color image and its extent.
///
/// Zero and unknown values stay transparent. Source rows run top to bottom
/// while the output is bottom-up, so source row `y` lands on image row
/// `rows - y - 1`.
pub fn rasterize(grid: &GridDataset, zones: &[TreatmentZone]) -> Result<RenderedGrid, DecodeError> {
    let cell_count = grid.validate()?;
    let range = grid.value_range(zones)?;
    let palette = Palette::new(range);

    let values: Vec<Option<i64>> = match grid.grid_type {
        GridType::Categorical => {
            // A later zone with the same code replaces an earlier one here
            let table: HashMap<u8, Option<i64>> = zones
                .iter()
                .map(|z| (z.code, z.representative_value()))
                .collect();
            grid.cells
                .iter()
                .map(|code| table.get(code).copied().flatten())
                .collect()
        }
        GridType::Dense => grid
            .dense_values()?
            .into_iter()
            .map(|v| Some(i64::from(v)))
            .collect(),
    };

    let (columns, rows) = (grid.columns, grid.rows);
    let mut image = RasterImage::transparent(columns, rows, cell_count);
    for (index, value) in values.into_iter().enumerate() {
        let Some(value) = value.filter(|&v| v != 0) else {
            continue;
        };
        let x = (index % columns as usize) as u32;
        let y = (index / columns as usize) as u32;
        let [r, g, b] = palette.color(value);
        image.set_pixel(x, rows - y - 1, [r, g, b, 255]);
    }

    debug!(columns, rows, min = range.min, max = range.max, "Grid rasterized");
    Ok(RenderedGrid {
        image,
        extent: GeoExtent::of(grid),
        range,
    })
}

/// One grid of a task file, with the zones its codes refer to.
#[derive(Debug, Clone)]
pub struct TaskGrid {
    pub name: String,
    pub dataset: GridDataset,
    pub zones: Vec<TreatmentZone>,
}

#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub rendered: Vec<(String, RenderedGrid)>,
    pub failed: Vec<(String, DecodeError)>,
}

/// Rasterize every grid; a grid that fails to decode is skipped.
pub fn render_all(tasks: &[TaskGrid]) -> RenderOutcome {
    let mut outcome = RenderOutcome::default();
    for task in tasks {
        match rasterize(&task.dataset, &task.zones) {
            Ok(rendered) => outcome.rendered.push((task.name.clone(), rendered)),
            Err(e) => {
                warn!(grid = %task.name, error = %e, "Skipping undecodable grid");
                outcome.failed.push((task.name.clone(), e));
            }
        }
    }
    outcome
}
