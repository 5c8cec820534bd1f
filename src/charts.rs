use crate::error::{ReportError, Result};
use crate::report::{ChartImage, ChartRenderer, ImageFormat};
use async_trait::async_trait;
use log::debug;

const WHITE: [u8; 3] = [255, 255, 255];
const AXIS: [u8; 3] = [64, 64, 64];
const GRID: [u8; 3] = [225, 225, 225];
const GRID_LINES: u32 = 4;

/// Deterministic bar chart rasterizer producing raw RGB pixels.
///
/// Text is left to the document renderer, which prints the chart label above
/// the image and a label/value legend, in bar order, beneath it.
#[derive(Debug, Clone)]
pub struct BarChartRenderer {
    pub width: u32,
    pub height: u32,
    pub bar_color: [u8; 3],
}

impl Default for BarChartRenderer {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
            bar_color: [0x00, 0x4a, 0xad],
        }
    }
}

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|area| area.checked_mul(WHITE.len()))
            .ok_or_else(|| {
                ReportError::chart(format!("canvas {}x{} is too large", width, height))
            })?;

        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).map_err(|e| {
            ReportError::chart(format!("canvas {}x{} cannot be allocated: {}", width, height, e))
        })?;
        pixels.resize(len, 0);
        for pixel in pixels.chunks_exact_mut(WHITE.len()) {
            pixel.copy_from_slice(&WHITE);
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Fills `[x0, x1) x [y0, y1)`, clipped to the canvas.
    fn fill(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3]) {
        let width = self.width as usize;
        for y in y0.min(self.height)..y1.min(self.height) {
            for x in x0.min(self.width)..x1.min(self.width) {
                let offset = (y as usize * width + x as usize) * 3;
                self.pixels[offset..offset + 3].copy_from_slice(&color);
            }
        }
    }
}

impl BarChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn rasterize(&self, values: &[f64]) -> Result<Vec<u8>> {
        if self.width < 40 || self.height < 40 {
            return Err(ReportError::chart(format!(
                "canvas {}x{} is too small",
                self.width, self.height
            )));
        }

        let mut canvas = Canvas::new(self.width, self.height)?;

        let margin = (self.width.min(self.height) / 10).max(10);
        let left = margin;
        let right = self.width - margin;
        let top = margin;
        let bottom = self.height - margin;
        let plot_height = bottom - top;

        for line in 1..=GRID_LINES {
            let y = bottom - (u64::from(plot_height) * u64::from(line) / u64::from(GRID_LINES)) as u32;
            canvas.fill(left, y, right, y + 1, GRID);
        }

        let max = values.iter().cloned().fold(0.0_f64, f64::max);
        if !values.is_empty() && max > 0.0 {
            let slot = (right - left) as f64 / values.len() as f64;
            let gap = (slot * 0.2).max(1.0);

            for (index, value) in values.iter().enumerate() {
                let bar_height = ((value.max(0.0) / max) * plot_height as f64).round() as u32;
                if bar_height == 0 {
                    continue;
                }
                let x0 = left + (index as f64 * slot + gap / 2.0).round() as u32;
                let x1 = left + ((index + 1) as f64 * slot - gap / 2.0).round() as u32;
                canvas.fill(x0, bottom - bar_height, x1.max(x0 + 1), bottom, self.bar_color);
            }
        }

        canvas.fill(left, top, left + 2, bottom, AXIS);
        canvas.fill(left, bottom, right, bottom + 2, AXIS);

        Ok(canvas.pixels)
    }
}

#[async_trait]
impl ChartRenderer for BarChartRenderer {
    async fn render(&self, labels: &[String], values: &[f64], title: &str) -> Result<ChartImage> {
        if labels.len() != values.len() {
            return Err(ReportError::chart(format!(
                "'{}' has {} labels but {} values",
                title,
                labels.len(),
                values.len()
            )));
        }

        let bytes = self.rasterize(values)?;
        debug!(
            "Rendered '{}' with {} bars into {}x{} pixels",
            title,
            values.len(),
            self.width,
            self.height
        );

        Ok(ChartImage {
            format: ImageFormat::RawRgb {
                width: self.width,
                height: self.height,
            },
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(bytes: &[u8], width: u32, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * width as usize + x as usize) * 3;
        [bytes[offset], bytes[offset + 1], bytes[offset + 2]]
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let renderer = BarChartRenderer::new(120, 80);
        let labels = vec!["X".to_string(), "Y".to_string()];
        let values = vec![12.0, 3.0];

        let first = renderer.render(&labels, &values, "Qty").await.unwrap();
        let second = renderer.render(&labels, &values, "Qty").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.format,
            ImageFormat::RawRgb {
                width: 120,
                height: 80
            }
        );
        assert_eq!(first.bytes.len(), 120 * 80 * 3);
    }

    #[tokio::test]
    async fn test_tallest_bar_reaches_plot_top() {
        let renderer = BarChartRenderer::new(100, 100);
        let image = renderer
            .render(&["only".to_string()], &[5.0], "Qty")
            .await
            .unwrap();

        // margin is 10px on each side, the single bar spans the middle
        assert_eq!(pixel(&image.bytes, 100, 50, 11), renderer.bar_color);
        assert_eq!(pixel(&image.bytes, 100, 50, 5), WHITE);
    }

    #[tokio::test]
    async fn test_mismatched_series_is_render_failure() {
        let renderer = BarChartRenderer::default();
        let err = renderer
            .render(&["a".to_string()], &[1.0, 2.0], "Qty")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "chart-render");
    }

    #[test]
    fn test_zero_values_draw_only_axes() {
        let renderer = BarChartRenderer::new(100, 100);
        let bytes = renderer.rasterize(&[0.0, 0.0]).unwrap();
        assert_eq!(pixel(&bytes, 100, 50, 51), WHITE);
        assert_eq!(pixel(&bytes, 100, 50, 50), GRID);
        assert_eq!(pixel(&bytes, 100, 10, 50), AXIS);
    }

    #[test]
    fn test_tiny_canvas_is_rejected() {
        assert!(BarChartRenderer::new(10, 10).rasterize(&[1.0]).is_err());
    }

    #[test]
    fn test_oversized_canvas_is_render_failure() {
        let err = BarChartRenderer::new(u32::MAX, u32::MAX)
            .rasterize(&[1.0])
            .unwrap_err();
        assert_eq!(err.stage(), "chart-render");
    }
}
