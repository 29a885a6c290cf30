//! Score distribution diagnostic: a density-normalized histogram with an
//! optional Gaussian kernel density curve.

use std::path::Path;

use plotters::prelude::*;
use tracing::warn;

/// Bins in the score histogram.
pub const HISTOGRAM_BINS: usize = 50;

/// Points the density curve is evaluated at.
const CURVE_POINTS: usize = 200;

/// Render the score distribution to a PNG. Non-finite scores are filtered
/// out first; with zero finite scores nothing is rendered and `Ok(false)`
/// is returned. The curve is overlaid only when the sample supports it —
/// otherwise the histogram stands alone.
///
/// The image is intentionally text-free so rendering never depends on host
/// fonts; the artifact name carries the semantics.
pub fn render_score_density(scores: &[f64], path: &Path) -> anyhow::Result<bool> {
    let finite: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if finite.is_empty() {
        warn!("no finite scores to plot; skipping density plot");
        return Ok(false);
    }

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &value in &finite {
        lo = lo.min(value);
        hi = hi.max(value);
    }
    if lo == hi {
        // degenerate range: pad by half a unit on each side
        lo -= 0.5;
        hi += 0.5;
    }

    let densities = histogram_densities(&finite, lo, hi);
    let bin_width = (hi - lo) / HISTOGRAM_BINS as f64;

    let curve = density_curve(&finite);

    let mut y_max = densities.iter().copied().fold(0.0f64, f64::max);
    if let Some(points) = &curve {
        y_max = points.iter().map(|(_, y)| *y).fold(y_max, f64::max);
    }
    let y_max = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };

    let root = BitMapBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(lo..hi, 0.0..y_max)?;

    chart.draw_series(densities.iter().enumerate().map(|(bin, &density)| {
        let x0 = lo + bin as f64 * bin_width;
        let x1 = x0 + bin_width;
        Rectangle::new([(x0, 0.0), (x1, density)], BLUE.mix(0.35).filled())
    }))?;

    if let Some(points) = curve {
        chart.draw_series(LineSeries::new(points, BLUE.stroke_width(2)))?;
    }

    root.present()?;
    Ok(true)
}

/// 50-bin histogram normalized so the bars integrate to 1.
fn histogram_densities(finite: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let bin_width = (hi - lo) / HISTOGRAM_BINS as f64;
    let mut counts = vec![0usize; HISTOGRAM_BINS];
    for &value in finite {
        let bin = ((value - lo) / bin_width) as usize;
        counts[bin.min(HISTOGRAM_BINS - 1)] += 1;
    }
    let n = finite.len() as f64;
    counts
        .into_iter()
        .map(|count| count as f64 / (n * bin_width))
        .collect()
}

/// Gaussian KDE over the sample, evaluated across its range. `None` when
/// the sample cannot support a curve; degradations are logged, never raised.
fn density_curve(sample: &[f64]) -> Option<Vec<(f64, f64)>> {
    if sample.len() < 2 {
        warn!("fewer than two scores; drawing histogram without a density curve");
        return None;
    }
    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    if sorted.len() < 2 {
        warn!("scores have no variance; drawing histogram without a density curve");
        return None;
    }

    let Some(bandwidth) = scott_bandwidth(sample) else {
        warn!("density curve estimation failed; keeping histogram only");
        return None;
    };

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let step = (max - min) / (CURVE_POINTS - 1) as f64;
    let n = sample.len() as f64;
    let norm = 1.0 / (n * bandwidth * (2.0 * std::f64::consts::PI).sqrt());

    let points: Vec<(f64, f64)> = (0..CURVE_POINTS)
        .map(|i| {
            let x = min + step * i as f64;
            let y = norm
                * sample
                    .iter()
                    .map(|&xi| (-0.5 * ((x - xi) / bandwidth).powi(2)).exp())
                    .sum::<f64>();
            (x, y)
        })
        .collect();

    if points.iter().any(|(_, y)| !y.is_finite()) {
        warn!("density curve produced non-finite values; keeping histogram only");
        return None;
    }
    Some(points)
}

/// Scott's rule: sample standard deviation scaled by n^(-1/5).
fn scott_bandwidth(sample: &[f64]) -> Option<f64> {
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let variance = sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let bandwidth = variance.sqrt() * n.powf(-0.2);
    (bandwidth.is_finite() && bandwidth > 0.0).then_some(bandwidth)
}
