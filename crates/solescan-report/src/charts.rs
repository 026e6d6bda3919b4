//! Chart artifacts.
//!
//! The plotting backend is consumed strictly as "render a labeled bar
//! chart to an image file given arrays of labels and values". A chart
//! with no underlying rows is skipped, never rendered blank.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use plotters::prelude::*;
use tracing::info;

use crate::MetricsReport;

pub const MARKET_AVG_CHART: &str = "market_avg_ask_by_size.png";
pub const SECONDARY_AVG_CHART: &str = "secondary_avg_ask_by_size.png";
pub const COMPARISON_CHART: &str = "cross_source_comparison.png";

const PRIMARY_COLOR: RGBColor = RGBColor(0x4c, 0x78, 0xa8);
const SECONDARY_COLOR: RGBColor = RGBColor(0xf5, 0x85, 0x18);

const CHART_SIZE: (u32, u32) = (900, 540);

/// Render every chart that has data; returns the paths actually written.
pub fn render_charts(report: &MetricsReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    if report.market_avg_ask_by_size.is_empty() {
        info!("no primary price-by-size data; skipping chart");
    } else {
        let (labels, values) = split_map(&report.market_avg_ask_by_size);
        let path = out_dir.join(MARKET_AVG_CHART);
        bar_chart(
            &path,
            "Primary Average Lowest Ask by Size",
            "Avg lowest ask ($)",
            &labels,
            &values,
            PRIMARY_COLOR,
        )?;
        written.push(path);
    }

    if report.secondary_avg_ask_by_size.is_empty() {
        info!("no secondary price-by-size data; skipping chart");
    } else {
        let (labels, values) = split_map(&report.secondary_avg_ask_by_size);
        let path = out_dir.join(SECONDARY_AVG_CHART);
        bar_chart(
            &path,
            "Secondary Average Lowest Ask by Size",
            "Avg lowest ask ($)",
            &labels,
            &values,
            SECONDARY_COLOR,
        )?;
        written.push(path);
    }

    if report.cross_source_samples.is_empty() {
        info!("no joined cross-source samples; skipping chart");
    } else {
        let labels: Vec<String> = report
            .cross_source_samples
            .iter()
            .map(|s| format!("{} (sz {})", s.name, s.size))
            .collect();
        let primary: Vec<f64> = report
            .cross_source_samples
            .iter()
            .map(|s| s.primary_ask)
            .collect();
        let secondary: Vec<f64> = report
            .cross_source_samples
            .iter()
            .map(|s| s.secondary_ask)
            .collect();
        let path = out_dir.join(COMPARISON_CHART);
        grouped_bar_chart(
            &path,
            "Primary vs Secondary: Lowest Ask by Product & Size",
            &labels,
            &primary,
            &secondary,
        )?;
        written.push(path);
    }

    Ok(written)
}

fn split_map(map: &BTreeMap<String, f64>) -> (Vec<String>, Vec<f64>) {
    let labels = map.keys().cloned().collect();
    let values = map.values().copied().collect();
    (labels, values)
}

fn y_ceiling(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0f64, f64::max).max(1.0) * 1.1
}

/// Single-series labeled bar chart.
pub fn bar_chart(
    path: &Path,
    title: &str,
    y_desc: &str,
    labels: &[String],
    values: &[f64],
    color: RGBColor,
) -> Result<()> {
    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("filling chart background: {e}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(64)
        .y_label_area_size(64)
        .build_cartesian_2d(0f64..labels.len() as f64, 0f64..y_ceiling(values))
        .map_err(|e| anyhow!("building chart axes: {e}"))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len().min(20))
        .x_label_formatter(&|x: &f64| {
            labels
                .get(x.floor() as usize)
                .cloned()
                .unwrap_or_default()
        })
        .y_desc(y_desc)
        .draw()
        .map_err(|e| anyhow!("drawing chart mesh: {e}"))?;

    chart
        .draw_series(values.iter().enumerate().map(|(i, v)| {
            Rectangle::new(
                [(i as f64 + 0.15, 0.0), (i as f64 + 0.85, *v)],
                color.filled(),
            )
        }))
        .map_err(|e| anyhow!("drawing bars: {e}"))?;

    root.present()
        .map_err(|e| anyhow!("writing chart {}: {e}", path.display()))?;
    Ok(())
}

/// Two-series grouped bar chart for the cross-source comparison.
pub fn grouped_bar_chart(
    path: &Path,
    title: &str,
    labels: &[String],
    primary: &[f64],
    secondary: &[f64],
) -> Result<()> {
    let mut all = primary.to_vec();
    all.extend_from_slice(secondary);

    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("filling chart background: {e}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(96)
        .y_label_area_size(64)
        .build_cartesian_2d(0f64..labels.len() as f64, 0f64..y_ceiling(&all))
        .map_err(|e| anyhow!("building chart axes: {e}"))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len().min(20))
        .x_label_formatter(&|x: &f64| {
            labels
                .get(x.floor() as usize)
                .cloned()
                .unwrap_or_default()
        })
        .y_desc("Lowest ask ($)")
        .draw()
        .map_err(|e| anyhow!("drawing chart mesh: {e}"))?;

    chart
        .draw_series(primary.iter().enumerate().map(|(i, v)| {
            Rectangle::new(
                [(i as f64 + 0.10, 0.0), (i as f64 + 0.48, *v)],
                PRIMARY_COLOR.filled(),
            )
        }))
        .map_err(|e| anyhow!("drawing primary bars: {e}"))?
        .label("Primary")
        .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 12, y + 6)], PRIMARY_COLOR.filled()));

    chart
        .draw_series(secondary.iter().enumerate().map(|(i, v)| {
            Rectangle::new(
                [(i as f64 + 0.52, 0.0), (i as f64 + 0.90, *v)],
                SECONDARY_COLOR.filled(),
            )
        }))
        .map_err(|e| anyhow!("drawing secondary bars: {e}"))?
        .label("Secondary")
        .legend(|(x, y)| Rectangle::new([(x, y - 6), (x + 12, y + 6)], SECONDARY_COLOR.filled()));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()
        .map_err(|e| anyhow!("drawing chart legend: {e}"))?;

    root.present()
        .map_err(|e| anyhow!("writing chart {}: {e}", path.display()))?;
    Ok(())
}
