use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::{ChartRenderer, ChartSeries, ChartSpec, DatasetStyle};
use crate::error::RenderError;

const MARGIN_LEFT: u32 = 60;
const MARGIN_RIGHT: u32 = 20;
const MARGIN_TOP: u32 = 40;
const MARGIN_BOTTOM: u32 = 50;
const Y_TICKS: u32 = 5;
const POINT_RADIUS: i64 = 3;
const MAX_X_TICKS: usize = 60;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID: Rgba<u8> = Rgba([230, 230, 230, 255]);
const AXIS: Rgba<u8> = Rgba([102, 102, 102, 255]);

/// Line-chart rasterizer producing PNG bytes.
///
/// Geometry follows `ChartSpec` (grid, axes, one polyline per dataset,
/// point markers, legend swatches). Text is not drawn.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngChartRenderer;

impl ChartRenderer for PngChartRenderer {
    fn render(&self, spec: &ChartSpec, series: &ChartSeries) -> Result<Vec<u8>, RenderError> {
        if series.temperature.len() != series.len() || series.humidity.len() != series.len() {
            return Err(RenderError::Renderer("series lengths differ".to_string()));
        }
        let plot = PlotArea::new(spec.width, spec.height)?;
        let mut img = RgbaImage::from_pixel(spec.width, spec.height, WHITE);

        let (lo, hi, step) = y_bounds(spec.begin_at_zero, &[&series.temperature, &series.humidity]);
        let y_of = |v: f64| plot.bottom - ((v - lo) / (hi - lo) * plot.height() as f64).round() as i64;
        let x_of = |i: usize| plot.x_at(i, series.len());

        let mut tick = lo;
        while tick <= hi + step * 1e-6 {
            let y = y_of(tick);
            draw_line(&mut img, plot.left, y, plot.right, y, 1, GRID);
            draw_line(&mut img, plot.left - 5, y, plot.left, y, 1, AXIS);
            tick += step;
        }
        if series.len() <= MAX_X_TICKS {
            for i in 0..series.len() {
                let x = x_of(i);
                draw_line(&mut img, x, plot.bottom, x, plot.bottom + 5, 1, AXIS);
            }
        }
        draw_line(&mut img, plot.left, plot.top, plot.left, plot.bottom, 1, AXIS);
        draw_line(&mut img, plot.left, plot.bottom, plot.right, plot.bottom, 1, AXIS);

        for (values, style) in [(&series.temperature, &spec.temperature), (&series.humidity, &spec.humidity)] {
            let points: Vec<Option<(i64, i64)>> = values
                .iter()
                .enumerate()
                .map(|(i, v)| v.is_finite().then(|| (x_of(i), y_of(*v))))
                .collect();
            draw_polyline(&mut img, &points, style);
        }

        draw_legend(&mut img, spec);

        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| RenderError::Renderer(e.to_string()))?;
        Ok(bytes)
    }
}

struct PlotArea {
    left: i64,
    right: i64,
    top: i64,
    bottom: i64,
}

impl PlotArea {
    fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width <= MARGIN_LEFT + MARGIN_RIGHT + 1 || height <= MARGIN_TOP + MARGIN_BOTTOM + 1 {
            return Err(RenderError::Renderer(format!("canvas {}x{} too small", width, height)));
        }
        Ok(Self {
            left: MARGIN_LEFT as i64,
            right: (width - MARGIN_RIGHT - 1) as i64,
            top: MARGIN_TOP as i64,
            bottom: (height - MARGIN_BOTTOM - 1) as i64,
        })
    }

    fn height(&self) -> i64 {
        self.bottom - self.top
    }

    fn x_at(&self, i: usize, n: usize) -> i64 {
        if n <= 1 {
            return (self.left + self.right) / 2;
        }
        self.left + ((self.right - self.left) as f64 * i as f64 / (n - 1) as f64).round() as i64
    }
}

/// Axis bounds snapped to a 1/2/5 step.
fn y_bounds(begin_at_zero: bool, sets: &[&Vec<f64>]) -> (f64, f64, f64) {
    let finite = || sets.iter().flat_map(|s| s.iter().copied()).filter(|v| v.is_finite());
    let mut lo = finite().fold(f64::INFINITY, f64::min);
    let mut hi = finite().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 1.0;
    }
    if begin_at_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if hi - lo < f64::EPSILON {
        hi = lo + 1.0;
    }
    let step = nice_step((hi - lo) / Y_TICKS as f64);
    ((lo / step).floor() * step, (hi / step).ceil() * step, step)
}

fn nice_step(raw: f64) -> f64 {
    let magnitude = 10f64.powf(raw.log10().floor());
    let fraction = raw / magnitude;
    let nice = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn blend(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let px = img.get_pixel_mut(x as u32, y as u32);
    let a = color.0[3] as u32;
    for c in 0..3 {
        px.0[c] = ((color.0[c] as u32 * a + px.0[c] as u32 * (255 - a)) / 255) as u8;
    }
    px.0[3] = 255;
}

fn stamp(img: &mut RgbaImage, x: i64, y: i64, width: u32, color: Rgba<u8>) {
    let w = width.max(1) as i64;
    let off = (w - 1) / 2;
    for dy in 0..w {
        for dx in 0..w {
            blend(img, x - off + dx, y - off + dy, color);
        }
    }
}

/// Bresenham with a square pen.
fn draw_line(img: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64, width: u32, color: Rgba<u8>) {
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        stamp(img, x, y, width, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_disc(img: &mut RgbaImage, cx: i64, cy: i64, r: i64, color: Rgba<u8>) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                blend(img, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_polyline(img: &mut RgbaImage, points: &[Option<(i64, i64)>], style: &DatasetStyle) {
    let border = Rgba(style.border);
    for pair in points.windows(2) {
        if let [Some((x0, y0)), Some((x1, y1))] = pair {
            draw_line(img, *x0, *y0, *x1, *y1, style.border_width, border);
        }
    }
    for (x, y) in points.iter().flatten() {
        fill_disc(img, *x, *y, POINT_RADIUS, Rgba(style.background));
        fill_disc(img, *x, *y, 1, border);
    }
}

fn draw_legend(img: &mut RgbaImage, spec: &ChartSpec) {
    let (box_w, box_h, gap) = (40i64, 12i64, 30i64);
    let total = box_w * 2 + gap;
    let x0 = (spec.width as i64 - total) / 2;
    let y0 = 14i64;
    for (i, style) in [&spec.temperature, &spec.humidity].into_iter().enumerate() {
        let x = x0 + i as i64 * (box_w + gap);
        for dy in 0..box_h {
            for dx in 0..box_w {
                blend(img, x + dx, y0 + dy, Rgba(style.background));
            }
        }
        let border = Rgba(style.border);
        draw_line(img, x, y0, x + box_w - 1, y0, 1, border);
        draw_line(img, x, y0 + box_h - 1, x + box_w - 1, y0 + box_h - 1, 1, border);
        draw_line(img, x, y0, x, y0 + box_h - 1, 1, border);
        draw_line(img, x + box_w - 1, y0, x + box_w - 1, y0 + box_h - 1, 1, border);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_steps() {
        assert_eq!(nice_step(0.8), 1.0);
        assert_eq!(nice_step(1.5), 2.0);
        assert_eq!(nice_step(3.0), 5.0);
        assert_eq!(nice_step(7.0), 10.0);
        assert_eq!(nice_step(12.0), 20.0);
    }

    #[test]
    fn bounds_start_at_zero() {
        let temps = vec![21.5, 23.0];
        let hum = vec![55.0, 60.0];
        let (lo, hi, step) = y_bounds(true, &[&temps, &hum]);
        assert_eq!(lo, 0.0);
        assert!(hi >= 60.0);
        assert!(step > 0.0);
    }

    #[test]
    fn bounds_for_empty_series() {
        let empty: Vec<f64> = Vec::new();
        let (lo, hi, _) = y_bounds(true, &[&empty, &empty]);
        assert_eq!(lo, 0.0);
        assert!(hi > lo);
    }

    #[test]
    fn renders_png_of_requested_size() {
        let series = ChartSeries {
            labels: vec!["a".into(), "b".into(), "c".into()],
            temperature: vec![20.0, 21.0, 22.5],
            humidity: vec![40.0, 45.0, 43.0],
        };
        let bytes = PngChartRenderer.render(&ChartSpec::default(), &series).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!((img.width(), img.height()), (800, 600));
    }

    #[test]
    fn rejects_tiny_canvas() {
        let err = PngChartRenderer.render(&ChartSpec::with_size(10, 10), &ChartSeries::default());
        assert!(matches!(err, Err(RenderError::Renderer(_))));
    }

    #[test]
    fn rejects_misaligned_series() {
        let series = ChartSeries { labels: vec!["a".into()], temperature: vec![], humidity: vec![1.0] };
        assert!(PngChartRenderer.render(&ChartSpec::default(), &series).is_err());
    }
}
