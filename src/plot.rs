// src/plot.rs

use crate::error::{EvalError, Result};
use crate::eval::Evaluation;
use plotters::prelude::*;
use plotters::style::full_palette::{ORANGE, GREEN};
use std::fs;
use std::path::{Path, PathBuf};
use log::{info, error};
use quantiles::ckms::CKMS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotMetric {
    Psnr,
    Ssim,
}

impl PlotMetric {
    fn label(self) -> &'static str {
        match self {
            PlotMetric::Psnr => "PSNR",
            PlotMetric::Ssim => "SSIM",
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            PlotMetric::Psnr => "psnr.png",
            PlotMetric::Ssim => "ssim.png",
        }
    }

    /// Minimum padding around the data on the y axis.
    fn min_pad(self) -> f64 {
        match self {
            PlotMetric::Psnr => 1.0,
            PlotMetric::Ssim => 0.01,
        }
    }
}

/// Summary statistics drawn as horizontal lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p1: f64,
    pub p25: f64,
    pub p75: f64,
}

pub fn frame_stats(scores: &[f64]) -> Option<FrameStats> {
    let mut sorted: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut quantiles_data = CKMS::<f64>::new(0.001);
    for score in &sorted {
        quantiles_data.insert(*score);
    }
    // CKMS reports a rank; look the value up in the sorted scores.
    let percentile = |q: f64| -> f64 {
        quantiles_data
            .query(q)
            .map(|(rank, _)| sorted[rank.saturating_sub(1).min(count - 1)])
            .unwrap_or(f64::NAN)
    };

    Some(FrameStats {
        count,
        mean,
        min: sorted[0],
        max: sorted[count - 1],
        p1: percentile(0.01),
        p25: percentile(0.25),
        p75: percentile(0.75),
    })
}

/// Writes PSNR and SSIM per-frame plots into `dir`; returns the written paths.
pub fn plot_evaluation(evaluation: &Evaluation, dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        info!("Creating plot directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }
    let mut written = Vec::new();
    for (metric, scores) in [
        (PlotMetric::Psnr, &evaluation.psnr_frames),
        (PlotMetric::Ssim, &evaluation.ssim_frames),
    ] {
        let path = dir.join(metric.file_name());
        generate_plot(scores, metric, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Generates a per-frame plot with mean and percentile lines.
pub fn generate_plot(scores: &[f64], metric: PlotMetric, output_path: &Path) -> Result<()> {
    let label = metric.label();
    info!("Generating {} plot: {}", label, output_path.display());

    let Some(stats) = frame_stats(scores) else {
        error!("No valid {} scores found to plot for {}", label, output_path.display());
        return Err(EvalError::Plot(format!("No valid {} scores to plot", label)));
    };
    let points: Vec<(u32, f64)> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .map(|(i, s)| (i as u32, *s))
        .collect();

    let pad = ((stats.max - stats.min) * 0.05).max(metric.min_pad());
    let (y_min, y_max) = (stats.min - pad, stats.max + pad);
    let x_min = points.first().map_or(0, |(i, _)| *i);
    let x_max = points.last().map_or(1, |(i, _)| *i).max(x_min + 1);

    let root = BitMapBackend::new(output_path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| EvalError::Plot(format!("Failed to fill plot background: {}", e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} per Frame ({} Frames)", label, stats.count), ("sans-serif", 24).into_font())
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|e| EvalError::Plot(format!("Failed to build chart: {}", e)))?;

    let y_label_format = |y: &f64| match metric {
        PlotMetric::Psnr => format!("{:.1}", y),
        PlotMetric::Ssim => format!("{:.3}", y),
    };
    chart
        .configure_mesh()
        .x_desc("Aligned Frame")
        .y_desc(match metric {
            PlotMetric::Psnr => "PSNR (dB)",
            PlotMetric::Ssim => "SSIM",
        })
        .y_label_formatter(&y_label_format)
        .axis_desc_style(("sans-serif", 16))
        .label_style(("sans-serif", 14))
        .y_labels(8)
        .draw()
        .map_err(|e| EvalError::Plot(format!("Failed to draw mesh: {:?}", e)))?;

    chart.draw_series(LineSeries::new(points.iter().copied(), BLUE.mix(0.8).stroke_width(1)))
        .map_err(|e| EvalError::Plot(format!("Failed to draw main series: {:?}", e)))?
        .label(format!("{} Scores", label))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.filled()));

    for (name, value, color) in [
        ("Mean", stats.mean, BLACK),
        ("1%", stats.p1, RED),
        ("25%", stats.p25, ORANGE),
        ("75%", stats.p75, GREEN),
    ] {
        chart.draw_series(LineSeries::new(vec![(x_min, value), (x_max, value)], stat_line_style(color)))
            .map_err(|e| EvalError::Plot(format!("Failed to draw {} line: {:?}", name, e)))?
            .label(format!("{}: {:.3}", name, value))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], stat_line_style(color)));
    }

    chart.configure_series_labels()
        .position(SeriesLabelPosition::LowerMiddle)
        .margin(10)
        .label_font(("sans-serif", 12))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| EvalError::Plot(format!("Failed to draw legend: {:?}", e)))?;

    root.present().map_err(|e| EvalError::Plot(format!("Failed to save plot: {:?}", e)))?;
    info!("Successfully generated {} plot: {}", label, output_path.display());
    Ok(())
}

fn stat_line_style(color: RGBColor) -> ShapeStyle {
    ShapeStyle {
        color: color.to_rgba(),
        filled: false,
        stroke_width: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_stats() {
        let scores: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let stats = frame_stats(&scores).unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.mean - 50.5).abs() < 1e-12);
        assert!((stats.p25 - 25.0).abs() <= 1.0);
        assert!((stats.p75 - 75.0).abs() <= 1.0);
        assert!(stats.p1 <= 2.0);
    }

    #[test]
    fn test_frame_stats_ignores_non_finite() {
        let stats = frame_stats(&[f64::NAN, 3.0, f64::INFINITY]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.p25, 3.0);
        assert!(frame_stats(&[]).is_none());
    }
}
