//! Read side: stored readings -> chart series -> PNG bytes.

use std::sync::Arc;

use chrono::Local;
use serde_json::json;

use crate::error::RenderError;
use crate::logging::{info, obj, ProfileScope, Domain};
use crate::reading::{Series, TimeRange};
use crate::storage::ReadingStore;

mod png;

pub use png::PngChartRenderer;

pub const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Index-aligned projection of a series: `labels[i]`, `temperature[i]` and
/// `humidity[i]` describe the same reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub temperature: Vec<f64>,
    pub humidity: Vec<f64>,
}

impl ChartSeries {
    pub fn from_series(series: &Series) -> Self {
        let readings = series.readings();
        Self {
            labels: readings
                .iter()
                .map(|r| r.observed_at.with_timezone(&Local).format(LABEL_FORMAT).to_string())
                .collect(),
            temperature: readings.iter().map(|r| r.temperature).collect(),
            humidity: readings.iter().map(|r| r.humidity).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStyle {
    pub label: String,
    pub border: [u8; 4],
    pub background: [u8; 4],
    pub border_width: u32,
}

/// Fixed chart configuration: a two-series line chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub width: u32,
    pub height: u32,
    pub begin_at_zero: bool,
    pub temperature: DatasetStyle,
    pub humidity: DatasetStyle,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            begin_at_zero: true,
            temperature: DatasetStyle {
                label: "Temperature (°C)".to_string(),
                border: [255, 99, 132, 255],
                background: [255, 99, 132, 51],
                border_width: 1,
            },
            humidity: DatasetStyle {
                label: "Humidity (%)".to_string(),
                border: [54, 162, 235, 255],
                background: [54, 162, 235, 51],
                border_width: 1,
            },
        }
    }
}

impl ChartSpec {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }
}

/// Rasterizes a chart. Pure: same input, same bytes.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, spec: &ChartSpec, series: &ChartSeries) -> Result<Vec<u8>, RenderError>;
}

pub struct RenderPipeline {
    store: Arc<dyn ReadingStore>,
    renderer: Arc<dyn ChartRenderer>,
    spec: ChartSpec,
}

impl RenderPipeline {
    pub fn new(store: Arc<dyn ReadingStore>, renderer: Arc<dyn ChartRenderer>, spec: ChartSpec) -> Self {
        Self { store, renderer, spec }
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    /// Ordered readings in `range`, projected for charting.
    pub async fn series(&self, range: TimeRange) -> Result<ChartSeries, RenderError> {
        let readings = self.store.query_ordered(range).await?;
        Ok(ChartSeries::from_series(&Series::from_readings(readings)))
    }

    /// Render the chart image for `range`. Nothing is returned on failure.
    pub async fn render(&self, range: TimeRange) -> Result<Vec<u8>, RenderError> {
        let _scope = ProfileScope::new("render_chart");
        let series = self.series(range).await?;
        let points = series.len();
        let renderer = self.renderer.clone();
        let spec = self.spec.clone();
        let image = tokio::task::spawn_blocking(move || renderer.render(&spec, &series))
            .await
            .map_err(|e| RenderError::Renderer(e.to_string()))??;
        info(
            Domain::Render,
            "chart_rendered",
            obj(&[("points", json!(points)), ("bytes", json!(image.len()))]),
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use chrono::{Duration, Utc};

    #[test]
    fn projection_keeps_alignment() {
        let t0 = Utc::now();
        let series = Series::from_readings(vec![
            Reading { temperature: 22.0, humidity: 41.0, observed_at: t0 + Duration::minutes(1) },
            Reading { temperature: 21.0, humidity: 40.0, observed_at: t0 },
        ]);
        let chart = ChartSeries::from_series(&series);
        assert_eq!(chart.temperature, vec![21.0, 22.0]);
        assert_eq!(chart.humidity, vec![40.0, 41.0]);
        assert_eq!(chart.labels.len(), 2);
        assert_eq!(
            chart.labels[0],
            t0.with_timezone(&Local).format(LABEL_FORMAT).to_string()
        );
    }

    #[test]
    fn default_spec_matches_fixed_layout() {
        let spec = ChartSpec::default();
        assert_eq!((spec.width, spec.height), (800, 600));
        assert!(spec.begin_at_zero);
        assert_eq!(spec.temperature.border, [255, 99, 132, 255]);
        assert_eq!(spec.humidity.border, [54, 162, 235, 255]);
    }
}
