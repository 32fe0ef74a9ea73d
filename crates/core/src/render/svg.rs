use std::fmt::Write;

use crate::{Result, WaveEngineError, WaveState};

use super::{Margins, PlotGeometry, RenderAdapter};

/// Vector back-end: turns each snapshot into SVG path data.
#[derive(Debug, Clone)]
pub struct SvgAdapter {
    width: usize,
    height: usize,
    margins: Margins,
    line_path: String,
    area_path: String,
}

impl SvgAdapter {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Self::with_margins(width, height, Margins::default())
    }

    pub fn with_margins(width: usize, height: usize, margins: Margins) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(WaveEngineError::invalid_config(format!(
                "svg viewport must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            margins,
            line_path: String::new(),
            area_path: String::new(),
        })
    }

    /// `d` attribute of the wave polyline.
    pub fn line_path(&self) -> &str {
        &self.line_path
    }

    /// `d` attribute of the closed region between the wave and the x axis.
    pub fn area_path(&self) -> &str {
        &self.area_path
    }

    pub fn document(&self) -> String {
        format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
                r#"<path d="{area}" fill-opacity="0.5"/>"#,
                r#"<path d="{line}" fill="none" stroke-width="2"/>"#,
                "</svg>"
            ),
            w = self.width,
            h = self.height,
            area = self.area_path,
            line = self.line_path,
        )
    }
}

impl RenderAdapter for SvgAdapter {
    fn name(&self) -> &str {
        "svg"
    }

    fn draw(&mut self, state: &WaveState) -> Result<()> {
        let geometry = PlotGeometry::new(self.width, self.height, self.margins);
        let projected = geometry.project(&state.points, self.width);

        self.line_path.clear();
        self.area_path.clear();
        let Some(&(first_x, _)) = projected.first() else {
            return Ok(());
        };
        let baseline = geometry.baseline();

        write!(self.area_path, "M{first_x:.2},{baseline:.2}")
            .map_err(|err| WaveEngineError::msg(err.to_string()))?;
        for (i, (x, y)) in projected.iter().enumerate() {
            let command = if i == 0 { 'M' } else { 'L' };
            write!(self.line_path, "{command}{x:.2},{y:.2}")
                .and_then(|_| write!(self.area_path, "L{x:.2},{y:.2}"))
                .map_err(|err| WaveEngineError::msg(err.to_string()))?;
        }
        if let Some(&(last_x, _)) = projected.last() {
            write!(self.area_path, "L{last_x:.2},{baseline:.2}Z")
                .map_err(|err| WaveEngineError::msg(err.to_string()))?;
        }
        Ok(())
    }
}
