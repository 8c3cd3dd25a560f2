//! Histogram builders (C7): fixed-bin for `u8`/`u16`, adaptive-bin for
//! everything else. Grounded on `bpHistogram.cxx`.

use crate::geometry::Voxel;

/// A finished histogram: bin counts plus the value range they cover.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub bins: Vec<u64>,
}

impl Histogram {
    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|&count| count == 0)
    }

    /// Remaps this histogram onto a new bin count over the same range,
    /// redistributing each bin's count into the corresponding new bin
    /// (`bpResampleHistogram`'s `vJ = vI*newBins/oldBins` mapping).
    pub fn resampled(&self, new_bin_count: usize) -> Histogram {
        if new_bin_count == self.bins.len() {
            return self.clone();
        }

        let mut bins = vec![0u64; new_bin_count];
        let old_bins = self.bins.len().max(1);
        for (i, &count) in self.bins.iter().enumerate() {
            let j = (i * new_bin_count) / old_bins;
            bins[j.min(new_bin_count - 1)] += count;
        }

        Histogram { min: self.min, max: self.max, bins }
    }
}

/// Any type able to accumulate voxel values and produce a finished
/// [`Histogram`], implemented once per voxel type.
pub trait HistogramBuilder<T: Voxel>: Send {
    fn add(&mut self, value: T);
    fn merge(&mut self, other: &Self) where Self: Sized;
    fn finish(&self) -> Histogram;
}

/// Dense fixed-bin builder for `u8`: 256 bins, one per possible value.
#[derive(Debug, Clone)]
pub struct FixedBinHistogram8 {
    bins: Vec<u64>,
}

impl Default for FixedBinHistogram8 {
    fn default() -> Self {
        Self { bins: vec![0; 256] }
    }
}

impl HistogramBuilder<u8> for FixedBinHistogram8 {
    fn add(&mut self, value: u8) {
        self.bins[value as usize] += 1;
    }

    fn merge(&mut self, other: &Self) {
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }

    fn finish(&self) -> Histogram {
        trim(self.bins.clone(), 0.0, self.bins.len() as f32)
    }
}

/// Dense fixed-bin builder for `u16`: 65536 bins, one per possible value.
#[derive(Debug, Clone)]
pub struct FixedBinHistogram16 {
    bins: Vec<u64>,
}

impl Default for FixedBinHistogram16 {
    fn default() -> Self {
        Self { bins: vec![0; 65536] }
    }
}

impl HistogramBuilder<u16> for FixedBinHistogram16 {
    fn add(&mut self, value: u16) {
        self.bins[value as usize] += 1;
    }

    fn merge(&mut self, other: &Self) {
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }

    fn finish(&self) -> Histogram {
        trim(self.bins.clone(), 0.0, self.bins.len() as f32)
    }
}

/// Trims trailing all-zero bins off both ends, but never below 256 bins
/// wide, matching the original's `GetHistogram()` final trim.
fn trim(bins: Vec<u64>, min: f32, max: f32) -> Histogram {
    let mut lo = 0usize;
    let mut hi = bins.len();

    while hi - lo > 256 && bins[hi - 1] == 0 {
        hi -= 1;
    }
    while hi - lo > 256 && bins[lo] == 0 {
        lo += 1;
    }

    let bin_width = (max - min) / bins.len().max(1) as f32;
    Histogram {
        min: min + lo as f32 * bin_width,
        max: min + hi as f32 * bin_width,
        bins: bins[lo..hi].to_vec(),
    }
}

const ADAPTIVE_BIN_COUNT: usize = 1000;

/// Which bound moved when the adaptive histogram's range last doubled,
/// since that determines which half of the re-spread bin array the folded
/// counts belong in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FoldDirection {
    Above,
    Below,
}

/// Adaptive equal-width histogram for numeric types with a large or
/// unbounded range (`u32`, `f32` here). Starts with a small range around
/// zero and doubles it as out-of-range values arrive, folding bin pairs so
/// the bin count stays fixed.
#[derive(Debug, Clone)]
pub struct AdaptiveHistogram {
    bins: Vec<u64>,
    min: f32,
    max: f32,
    true_min: f32,
    true_max: f32,
    has_data: bool,
}

impl Default for AdaptiveHistogram {
    fn default() -> Self {
        Self {
            bins: vec![0; ADAPTIVE_BIN_COUNT],
            min: 0.0,
            max: 1.0,
            true_min: f32::INFINITY,
            true_max: f32::NEG_INFINITY,
            has_data: false,
        }
    }
}

impl AdaptiveHistogram {
    fn bin_width(&self) -> f32 {
        (self.max - self.min) / self.bins.len() as f32
    }

    fn bin_of(&self, value: f32) -> usize {
        let width = self.bin_width();
        (((value - self.min) / width) as isize).clamp(0, self.bins.len() as isize - 1) as usize
    }

    /// Doubles the covered range (in the direction needed) and folds
    /// adjacent bin pairs into the new, coarser bins.
    fn expand_to_cover(&mut self, value: f32) {
        while value < self.min {
            let width = self.max - self.min;
            self.min -= width;
            self.fold_pairs(FoldDirection::Below);
        }
        while value >= self.max {
            let width = self.max - self.min;
            self.max += width;
            self.fold_pairs(FoldDirection::Above);
        }
    }

    /// Halves the bin count's resolution to cover the now-doubled range:
    /// each adjacent pair of old bins folds into one new bin. The old range
    /// only ever covers half of the new, doubled one, so the folded counts
    /// land in the matching half of the new bin array - the lower half when
    /// the range grew by extending `max`, the upper half when it grew by
    /// extending `min`.
    fn fold_pairs(&mut self, direction: FoldDirection) {
        let n = self.bins.len();
        let mut folded = vec![0u64; n / 2];
        for i in 0..n {
            folded[i / 2] += self.bins[i];
        }

        let mut spread = vec![0u64; n];
        let offset = match direction {
            FoldDirection::Above => 0,
            FoldDirection::Below => n / 2,
        };
        for (i, count) in folded.into_iter().enumerate() {
            spread[offset + i] = count;
        }
        self.bins = spread;
    }
}

impl HistogramBuilder<u32> for AdaptiveHistogram {
    fn add(&mut self, value: u32) {
        add_adaptive(self, value as f32);
    }

    fn merge(&mut self, other: &Self) {
        merge_adaptive(self, other);
    }

    fn finish(&self) -> Histogram {
        finish_adaptive(self)
    }
}

impl HistogramBuilder<f32> for AdaptiveHistogram {
    fn add(&mut self, value: f32) {
        add_adaptive(self, value);
    }

    fn merge(&mut self, other: &Self) {
        merge_adaptive(self, other);
    }

    fn finish(&self) -> Histogram {
        finish_adaptive(self)
    }
}

fn add_adaptive(histogram: &mut AdaptiveHistogram, value: f32) {
    if !histogram.has_data {
        histogram.min = value - 1.0;
        histogram.max = value + 1.0;
        histogram.has_data = true;
    }

    histogram.expand_to_cover(value);
    histogram.true_min = histogram.true_min.min(value);
    histogram.true_max = histogram.true_max.max(value);

    let bin = histogram.bin_of(value);
    histogram.bins[bin] += 1;
}

fn merge_adaptive(histogram: &mut AdaptiveHistogram, other: &AdaptiveHistogram) {
    if !other.has_data {
        return;
    }

    histogram.expand_to_cover(other.true_min);
    histogram.expand_to_cover(other.true_max);
    histogram.true_min = histogram.true_min.min(other.true_min);
    histogram.true_max = histogram.true_max.max(other.true_max);
    histogram.has_data = true;

    let width = other.bin_width();
    for (i, &count) in other.bins.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let value = other.min + (i as f32 + 0.5) * width;
        let bin = histogram.bin_of(value);
        histogram.bins[bin] += count;
    }
}

fn finish_adaptive(histogram: &AdaptiveHistogram) -> Histogram {
    if !histogram.has_data {
        return Histogram { min: 0.0, max: 0.0, bins: vec![0; 256] };
    }
    trim(histogram.bins.clone(), histogram.min, histogram.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bin_counts_each_value_once() {
        let mut histogram = FixedBinHistogram8::default();
        for value in [0u8, 10, 10, 255] {
            HistogramBuilder::<u8>::add(&mut histogram, value);
        }
        let finished = HistogramBuilder::<u8>::finish(&histogram);
        assert_eq!(finished.bins.iter().sum::<u64>(), 4);
    }

    #[test]
    fn adaptive_histogram_expands_to_cover_outliers() {
        let mut histogram = AdaptiveHistogram::default();
        for value in [0.0f32, 1.0, 1000.0, -500.0] {
            HistogramBuilder::<f32>::add(&mut histogram, value);
        }
        let finished = HistogramBuilder::<f32>::finish(&histogram);
        assert_eq!(finished.bins.iter().sum::<u64>(), 4);
        assert!(finished.min <= -500.0);
        assert!(finished.max >= 1000.0);
    }

    #[test]
    fn downward_expansion_after_upward_keeps_values_in_their_own_bins() {
        let mut histogram = AdaptiveHistogram::default();
        // 0.0 seeds the initial [-1, 1) range; 1000.0 forces several upward
        // expansions; -500.0 then forces a downward expansion of a range that
        // already holds folded data. Each value must stay findable in its own
        // bin afterwards, not bleed into whatever bin the fold happens to land
        // in when the wrong half of the re-spread array is used.
        for value in [0.0f32, 1000.0, -500.0] {
            HistogramBuilder::<f32>::add(&mut histogram, value);
        }

        for value in [0.0f32, 1000.0, -500.0] {
            let bin = histogram.bin_of(value);
            assert_eq!(histogram.bins[bin], 1, "value {value} not found in its own bin");
        }
    }

    #[test]
    fn merge_is_commutative_in_total_count() {
        let mut a = AdaptiveHistogram::default();
        let mut b = AdaptiveHistogram::default();
        for value in [1.0f32, 2.0, 3.0] {
            HistogramBuilder::<f32>::add(&mut a, value);
        }
        for value in [10.0f32, -10.0] {
            HistogramBuilder::<f32>::add(&mut b, value);
        }

        let mut merged_a_then_b = a.clone();
        HistogramBuilder::<f32>::merge(&mut merged_a_then_b, &b);

        let mut merged_b_then_a = b.clone();
        HistogramBuilder::<f32>::merge(&mut merged_b_then_a, &a);

        let total_a: u64 = HistogramBuilder::<f32>::finish(&merged_a_then_b).bins.iter().sum();
        let total_b: u64 = HistogramBuilder::<f32>::finish(&merged_b_then_a).bins.iter().sum();
        assert_eq!(total_a, total_b);
        assert_eq!(total_a, 5);
    }

    #[test]
    fn resample_preserves_total_count() {
        let histogram = Histogram { min: 0.0, max: 256.0, bins: vec![1; 256] };
        let resampled = histogram.resampled(64);
        assert_eq!(resampled.bins.len(), 64);
        assert_eq!(resampled.bins.iter().sum::<u64>(), histogram.bins.iter().sum::<u64>());
    }
}
