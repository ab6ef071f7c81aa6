//! Volume-wide intensity statistics used to pick a threshold.
//!
//! Min and max come from a full scan. The mode is estimated from a uniform
//! random sample drawn without replacement, capped at `sample_cap` voxels, so
//! on very large volumes it is approximate. The sampler is a seeded ChaCha
//! generator: the same seed always yields the same statistics.

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{StatisticsOptions, HISTOGRAM_BINS};
use crate::error::{PipelineError, PipelineResult};
use crate::volume::Volume;

/// Summary of the intensities in a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityStatistics {
    /// Exact smallest intensity.
    pub min: f32,
    /// Exact largest intensity.
    pub max: f32,
    /// Most frequent intensity in the sample; ties go to the smallest value.
    pub mode: f32,
    /// Number of voxels the mode was estimated from.
    pub sample_size: usize,
    /// Seed the sampler ran with.
    pub seed: u64,
    /// Sampled intensities binned over `[min, max]`.
    pub histogram: Histogram,
}

impl IntensityStatistics {
    /// True when every voxel took part in the mode estimate.
    pub fn is_exact(&self, volume: &Volume) -> bool {
        self.sample_size == volume.voxel_count()
    }
}

/// Equal-width bins over `[lo, hi]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Lower edge of the first bin.
    pub lo: f32,
    /// Upper edge of the last bin, inclusive.
    pub hi: f32,
    /// Sample count per bin.
    pub counts: Vec<u64>,
}

impl Histogram {
    fn new(lo: f32, hi: f32, bins: usize) -> Self {
        Self {
            lo,
            hi,
            counts: vec![0; bins.max(1)],
        }
    }

    /// Bin holding `value`; values outside the range go to the end bins.
    pub fn bin_of(&self, value: f32) -> usize {
        let last = self.counts.len() - 1;
        let width = self.hi - self.lo;
        if width <= 0.0 {
            return 0;
        }
        let pos = ((value - self.lo) / width * self.counts.len() as f32).floor();
        if pos <= 0.0 {
            0
        } else {
            (pos as usize).min(last)
        }
    }

    /// Lower edge of bin `bin`.
    pub fn bin_start(&self, bin: usize) -> f32 {
        self.lo + (self.hi - self.lo) * bin as f32 / self.counts.len() as f32
    }

    fn add(&mut self, value: f32) {
        let bin = self.bin_of(value);
        self.counts[bin] += 1;
    }

    /// Number of samples counted.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Min, max and approximate mode of `volume`.
///
/// Samples `min(sample_cap, voxel count)` voxels without replacement. With no
/// `seed` one is drawn from entropy and reported in the result.
///
/// # Errors
///
/// `EmptyVolume` when the volume holds no voxels, `InvalidSampleCap` when
/// `sample_cap` is zero.
pub fn compute_statistics(
    volume: &Volume,
    sample_cap: usize,
    seed: Option<u64>,
) -> PipelineResult<IntensityStatistics> {
    let Some((min, max)) = volume.range() else {
        return Err(PipelineError::EmptyVolume);
    };
    if sample_cap == 0 {
        return Err(PipelineError::InvalidSampleCap);
    }

    let seed = seed.unwrap_or_else(rand::random);
    let total = volume.voxel_count();
    let amount = sample_cap.min(total);

    let mut counts: HashMap<u32, u64> = HashMap::new();
    let mut histogram = Histogram::new(min, max, HISTOGRAM_BINS);
    let mut tally = |value: f32| {
        *counts.entry(intensity_key(value)).or_insert(0) += 1;
        histogram.add(value);
    };
    if amount == total {
        // the whole volume is the sample
        volume.voxels().iter().for_each(|&v| tally(v));
    } else {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for flat in index::sample(&mut rng, total, amount).iter() {
            if let Some(v) = volume.voxel_at(flat) {
                tally(v);
            }
        }
    }

    let mode = most_common(&counts).unwrap_or(min);
    debug!(distinct = counts.len(), sample_size = amount, seed, "Sampled intensities");
    info!(min, max, mode, "Computed intensity statistics");

    Ok(IntensityStatistics {
        min,
        max,
        mode,
        sample_size: amount,
        seed,
        histogram,
    })
}

/// [`compute_statistics`] driven by [`StatisticsOptions`].
pub fn compute_statistics_with(
    volume: &Volume,
    options: &StatisticsOptions,
) -> PipelineResult<IntensityStatistics> {
    compute_statistics(volume, options.sample_cap, options.seed)
}

/// Hash key for an intensity; both zeros count as one value.
fn intensity_key(value: f32) -> u32 {
    if value == 0.0 {
        0.0f32.to_bits()
    } else {
        value.to_bits()
    }
}

/// Value with the highest count, the smallest one on ties.
fn most_common(counts: &HashMap<u32, u64>) -> Option<f32> {
    let mut best: Option<(f32, u64)> = None;
    for (&key, &count) in counts {
        let value = f32::from_bits(key);
        best = match best {
            Some((best_value, best_count))
                if best_count > count || (best_count == count && best_value < value) =>
            {
                Some((best_value, best_count))
            }
            _ => Some((value, count)),
        };
    }
    best.map(|(value, _)| value)
}
