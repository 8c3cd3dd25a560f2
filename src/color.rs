//! Deriche recursive Gaussian smoothing and the color auto-range picker
//! (C11), grounded on `bpDeriche.cxx`.

use crate::histogram::Histogram;

/// Applies a second-order recursive Gaussian (Deriche) filter to `input`,
/// writing the sum of the forward and backward passes into the result -
/// matching the original's `FilterGauss`.
pub fn gauss_filter(input: &[f64], sigma: f64) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }

    let alpha = 1.695 / sigma;
    let ea = (-alpha).exp();
    let ea2 = (-2.0 * alpha).exp();
    let k = (1.0 - ea).powi(2) / (1.0 + 2.0 * alpha * ea - ea2);

    let a1 = k;
    let a2 = k * ea * (alpha - 1.0);
    let a3 = k * ea * (alpha + 1.0);
    let a4 = -k * ea2;
    let b1 = 2.0 * ea;
    let b2 = -ea2;

    let mut forward = vec![0.0; n];
    for i in 0..n {
        let x0 = input[i];
        let x1 = if i >= 1 { input[i - 1] } else { x0 };
        let y1 = if i >= 1 { forward[i - 1] } else { 0.0 };
        let y2 = if i >= 2 { forward[i - 2] } else { 0.0 };
        forward[i] = a1 * x0 + a2 * x1 + b1 * y1 + b2 * y2;
    }

    let mut backward = vec![0.0; n];
    for i in (0..n).rev() {
        let x1 = if i + 1 < n { input[i + 1] } else { 0.0 };
        let x2 = if i + 2 < n { input[i + 2] } else { 0.0 };
        let y1 = if i + 1 < n { backward[i + 1] } else { 0.0 };
        let y2 = if i + 2 < n { backward[i + 2] } else { 0.0 };
        backward[i] = a3 * x1 + a4 * x2 + b1 * y1 + b2 * y2;
    }

    forward.iter().zip(backward.iter()).map(|(f, b)| f + b).collect()
}

/// The auto-chosen display range for a channel, derived from its histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRange {
    pub min: f32,
    pub max: f32,
}

/// Picks a display range from a channel histogram: smooth the curve, find
/// the first local maximum (the background/foreground split) as the low
/// end, and the 99.8th-percentile value extended by 20% as the high end.
pub fn auto_range(histogram: &Histogram) -> ColorRange {
    if histogram.bins.is_empty() || histogram.is_empty() {
        return ColorRange { min: histogram.min, max: histogram.max };
    }

    let counts: Vec<f64> = histogram.bins.iter().map(|&c| c as f64).collect();
    let sigma = 5.0 * counts.len() as f64 / 256.0;
    let smoothed = gauss_filter(&counts, sigma.max(0.5));

    let bin_width = (histogram.max - histogram.min) / histogram.bins.len() as f32;
    let value_of = |bin: usize| histogram.min + bin as f32 * bin_width;

    let min_bin = (1..smoothed.len() - 1)
        .find(|&i| smoothed[i - 1] < smoothed[i] && smoothed[i + 1] < smoothed[i])
        .unwrap_or(0);

    let total: u64 = histogram.bins.iter().sum();
    let mut cumulative = 0u64;
    let mut max_bin = histogram.bins.len() - 1;
    for (i, &count) in histogram.bins.iter().enumerate() {
        cumulative += count;
        if total > 0 && cumulative as f64 / total as f64 > 0.998 {
            max_bin = i;
            break;
        }
    }

    let range_min = value_of(min_bin);
    let mut range_max = value_of(max_bin);
    range_max += 0.2 * (range_max - range_min);
    range_max = range_max.min(histogram.max);

    ColorRange { min: range_min, max: range_max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauss_filter_preserves_length() {
        let input = vec![0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 0.0];
        let out = gauss_filter(&input, 2.0);
        assert_eq!(out.len(), input.len());
    }

    #[test]
    fn auto_range_stays_within_histogram_bounds() {
        let mut bins = vec![0u64; 256];
        for (i, bin) in bins.iter_mut().enumerate() {
            *bin = if i > 10 && i < 200 { 100 } else { 1 };
        }
        let histogram = Histogram { min: 0.0, max: 255.0, bins };
        let range = auto_range(&histogram);
        assert!(range.min >= 0.0);
        assert!(range.max <= 255.0);
        assert!(range.max >= range.min);
    }
}
