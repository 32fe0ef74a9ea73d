use crate::{Result, WaveEngineError, WaveState};

use super::{Margins, PlotGeometry, RenderAdapter};

pub const BACKGROUND: u8 = 0;
pub const FILL: u8 = 64;
pub const AXIS: u8 = 160;
pub const STROKE: u8 = 255;

/// Raster back-end: draws axes, the wave line and the area under it into an
/// 8-bit intensity buffer.
#[derive(Debug, Clone)]
pub struct CanvasAdapter {
    width: usize,
    height: usize,
    margins: Margins,
    pixels: Vec<u8>,
    frames: u64,
}

impl CanvasAdapter {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Self::with_margins(width, height, Margins::default())
    }

    pub fn with_margins(width: usize, height: usize, margins: Margins) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(WaveEngineError::invalid_config(format!(
                "canvas must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            margins,
            pixels: vec![BACKGROUND; width * height],
            frames: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    /// Text rendition of the buffer, one line per row.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((self.width + 1) * self.height);
        for row in self.pixels.chunks(self.width) {
            for value in row {
                out.push(match *value {
                    STROKE => '*',
                    AXIS => '+',
                    FILL => '.',
                    _ => ' ',
                });
            }
            out.push('\n');
        }
        out
    }

    fn set(&mut self, x: i64, y: i64, value: u8) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let index = y as usize * self.width + x as usize;
        if self.pixels[index] < value {
            self.pixels[index] = value;
        }
    }

    fn line(&mut self, from: (i64, i64), to: (i64, i64), value: u8) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.set(x0, y0, value);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn fill_column(&mut self, x: i64, top: i64, baseline: i64) {
        for y in (top + 1)..baseline {
            self.set(x, y, FILL);
        }
    }

    /// Fills every column between the curve and the baseline, interpolating
    /// the curve between neighbouring samples.
    fn fill_area(&mut self, projected: &[(i64, i64)], baseline: i64) {
        if let [(x, y)] = projected {
            self.fill_column(*x, *y, baseline);
            return;
        }
        for pair in projected.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if x0 == x1 {
                self.fill_column(x0, y0.min(y1), baseline);
                continue;
            }
            let (from, to) = if x0 < x1 { (x0, x1) } else { (x1, x0) };
            for x in from..=to {
                let t = (x - x0) as f64 / (x1 - x0) as f64;
                let y = (y0 as f64 + t * (y1 - y0) as f64).round() as i64;
                self.fill_column(x, y, baseline);
            }
        }
    }

    fn draw_axes(&mut self, geometry: &PlotGeometry) {
        let left = self.margins.left.round() as i64;
        let right = (geometry.width - self.margins.right).round() as i64;
        let top = self.margins.top.round() as i64;
        let baseline = geometry.baseline().round() as i64;
        self.line((left, baseline), (right, baseline), AXIS);
        self.line((left, top), (left, baseline), AXIS);
    }
}

impl RenderAdapter for CanvasAdapter {
    fn name(&self) -> &str {
        "canvas"
    }

    fn draw(&mut self, state: &WaveState) -> Result<()> {
        self.pixels.fill(BACKGROUND);
        let geometry = PlotGeometry::new(self.width, self.height, self.margins);
        self.draw_axes(&geometry);

        let baseline = geometry.baseline().round() as i64;
        let projected: Vec<(i64, i64)> = geometry
            .project(&state.points, self.width)
            .into_iter()
            .map(|(x, y)| (x.round() as i64, y.round() as i64))
            .collect();

        self.fill_area(&projected, baseline);
        for pair in projected.windows(2) {
            self.line(pair[0], pair[1], STROKE);
        }
        if let [only] = projected.as_slice() {
            self.set(only.0, only.1, STROKE);
        }

        self.frames += 1;
        Ok(())
    }
}
