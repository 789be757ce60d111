//! Tile-grid geometry for the executor.
//!
//! The grid is a set of non-overlapping core rectangles stepping by the
//! tile size; each tile's *read* rectangle extends the core by the
//! overlap margin on all sides, clipped to the image, so the inference
//! function sees context pixels that are cropped away from its output.

/// One tile of the grid, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub row: u32,
    pub col: u32,
    /// Core rectangle: the pixels this tile owns in the output.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Read rectangle: core extended by the overlap, clipped to the image.
    pub read_x: u32,
    pub read_y: u32,
    pub read_width: u32,
    pub read_height: u32,
}

impl Tile {
    /// Offset of the core rectangle inside the read rectangle.
    ///
    /// Cropping `(crop_x, crop_y, width, height)` out of the inference
    /// output discards the overlap margins.
    pub fn crop_offsets(&self) -> (u32, u32) {
        (self.x - self.read_x, self.y - self.read_y)
    }
}

/// Row-major tile decomposition of one image level.
#[derive(Debug, Clone)]
pub struct TileGrid {
    pub rows: u32,
    pub cols: u32,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    /// Decompose a `width x height` image into tiles.
    ///
    /// `tile_size` must be non-zero; a zero-area image yields an empty
    /// grid.
    pub fn compute(width: u32, height: u32, tile_size: u32, overlap: u32) -> TileGrid {
        assert!(tile_size > 0, "tile size must be non-zero");

        if width == 0 || height == 0 {
            return TileGrid {
                rows: 0,
                cols: 0,
                tiles: Vec::new(),
            };
        }

        let cols = width.div_ceil(tile_size);
        let rows = height.div_ceil(tile_size);
        let mut tiles = Vec::with_capacity((rows * cols) as usize);

        for row in 0..rows {
            for col in 0..cols {
                let x = col * tile_size;
                let y = row * tile_size;
                let w = tile_size.min(width - x);
                let h = tile_size.min(height - y);

                let read_x = x.saturating_sub(overlap);
                let read_y = y.saturating_sub(overlap);
                let read_right = (x + w + overlap).min(width);
                let read_bottom = (y + h + overlap).min(height);

                tiles.push(Tile {
                    row,
                    col,
                    x,
                    y,
                    width: w,
                    height: h,
                    read_x,
                    read_y,
                    read_width: read_right - read_x,
                    read_height: read_bottom - read_y,
                });
            }
        }

        TileGrid { rows, cols, tiles }
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
