//! Timestamp reassignment for sample bursts.
//!
//! Boards deliver each signal in bursts whose per-sample timestamps are coarse and
//! irregular. The resampler rewrites them so that storage and charts see an ordered,
//! evenly spaced series. It does not try to recover the true hardware sampling instants.
//!
//! # Algorithm
//!
//! Per signal, per batch, the burst is the signal's samples in arrival order.
//!
//! - **Small burst** (`len <= small_burst_threshold`): the step is
//!   `(last.time - first.time) / (len + 1)` rounded to the nearest power of ten, and
//!   timestamps are laid out backwards from `last.time`.
//! - **Large burst**: the burst is padded by duplication up to `large_burst_target`
//!   samples, then laid out backwards from a cross-batch anchor with a 1 ms step. The
//!   anchor starts at the burst's last timestamp and advances by `anchor_increment_ms`
//!   for every later batch containing a large burst, so high-rate signals stay ordered
//!   across batches.
//!
//! Finally every signal's samples are merged and sorted by time.

use crate::sample::{Sample, SignalId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resampler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampleConfig {
    /// Bursts up to this length use the rounded-step layout.
    pub small_burst_threshold: usize,
    /// Sample count that large bursts are padded to.
    pub large_burst_target: usize,
    /// Anchor advance between batches, in ms.
    pub anchor_increment_ms: i64,
    /// Spacing of large-burst samples, in ms.
    pub large_burst_step_ms: i64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            small_burst_threshold: 500,
            large_burst_target: 1000,
            anchor_increment_ms: 1000,
            large_burst_step_ms: 1,
        }
    }
}

/// Rounds a positive step to the nearest power of ten (`10^round(log10(step))`).
///
/// Non-positive or non-finite steps collapse to zero.
pub fn rounded_time_step(step: f64) -> f64 {
    if step.is_finite() && step > 0.0 {
        10f64.powf(step.log10().round())
    } else {
        0.0
    }
}

/// Pads `burst` to `target` elements by duplicating elements in place.
///
/// Element `i` is repeated `floor((i+1)·T/n) − floor(i·T/n)` times, which spreads the
/// duplicates evenly and keeps the input order. Bursts already at or above the target
/// are returned unchanged.
pub fn pad_to_target<T: Clone>(burst: &[T], target: usize) -> Vec<T> {
    let n = burst.len();
    if n == 0 || n >= target {
        return burst.to_vec();
    }

    let mut padded = Vec::with_capacity(target);
    for (i, item) in burst.iter().enumerate() {
        let repeats = (i + 1) * target / n - i * target / n;
        padded.extend(std::iter::repeat(item).take(repeats).cloned());
    }
    padded
}

/// Worker-owned resampler. Holds the cross-batch anchor.
#[derive(Debug, Default)]
pub struct Resampler {
    config: ResampleConfig,
    last_time: Option<i64>,
}

impl Resampler {
    /// Resampler with no anchor yet.
    pub fn new(config: ResampleConfig) -> Self {
        Self {
            config,
            last_time: None,
        }
    }

    /// Active tunables.
    pub fn config(&self) -> &ResampleConfig {
        &self.config
    }

    /// Anchor set by the most recent large burst, if any.
    pub fn last_time(&self) -> Option<i64> {
        self.last_time
    }

    /// Resamples one deduplicated batch of `(signal, time, value)` samples.
    ///
    /// The result is sorted by time; ties keep signal first-appearance order.
    pub fn resample_batch(&mut self, samples: Vec<(SignalId, i64, f64)>) -> Vec<Sample> {
        let total = samples.len();
        let mut order: Vec<SignalId> = Vec::new();
        let mut bursts: HashMap<SignalId, Vec<(i64, f64)>> = HashMap::new();
        for (signal_id, time, value) in samples {
            bursts
                .entry(signal_id.clone())
                .or_insert_with(|| {
                    order.push(signal_id);
                    Vec::new()
                })
                .push((time, value));
        }

        let mut batch_anchor: Option<i64> = None;
        let mut result = Vec::with_capacity(total);
        for signal_id in order {
            let Some(burst) = bursts.remove(&signal_id) else {
                continue;
            };
            let points = if burst.len() <= self.config.small_burst_threshold {
                layout_small(&burst)
            } else {
                let anchor = *batch_anchor.get_or_insert_with(|| self.advance_anchor(&burst));
                self.layout_large(&burst, anchor)
            };
            tracing::trace!(signal = %signal_id, input = burst.len(), output = points.len(), "Resampled burst");
            result.extend(
                points
                    .into_iter()
                    .map(|(time, value)| Sample::new(signal_id.clone(), time, value)),
            );
        }

        result.sort_by_key(|sample| sample.time);
        result
    }

    fn advance_anchor(&mut self, burst: &[(i64, f64)]) -> i64 {
        let anchor = match self.last_time {
            Some(previous) => previous.saturating_add(self.config.anchor_increment_ms),
            None => burst.last().map_or(0, |(time, _)| *time),
        };
        self.last_time = Some(anchor);
        anchor
    }

    fn layout_large(&self, burst: &[(i64, f64)], anchor: i64) -> Vec<(i64, f64)> {
        let padded = pad_to_target(burst, self.config.large_burst_target);
        let last = padded.len().saturating_sub(1) as i64;
        padded
            .into_iter()
            .enumerate()
            .map(|(i, (_, value))| {
                let back = (last - i as i64).saturating_mul(self.config.large_burst_step_ms);
                (anchor.saturating_sub(back), value)
            })
            .collect()
    }
}

fn layout_small(burst: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let (Some(first), Some(last)) = (burst.first(), burst.last()) else {
        return Vec::new();
    };
    let len = burst.len();
    // Span computed in f64: wire timestamps can sit anywhere in the i64 range.
    let step = rounded_time_step((last.0 as f64 - first.0 as f64) / (len + 1) as f64);
    let end = last.0 as f64;

    burst
        .iter()
        .enumerate()
        .map(|(i, (_, value))| {
            let back = (len - 1 - i) as f64;
            // `as` saturates at the i64 bounds.
            ((end - back * step).round() as i64, *value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(signal: &str, times: impl IntoIterator<Item = i64>) -> Vec<(SignalId, i64, f64)> {
        let id = SignalId::new(signal);
        times
            .into_iter()
            .enumerate()
            .map(|(i, t)| (id.clone(), t, i as f64))
            .collect()
    }

    #[test]
    fn rounds_to_power_of_ten() {
        assert_eq!(rounded_time_step(100.0), 100.0);
        assert_eq!(rounded_time_step(31.0), 10.0);
        assert_eq!(rounded_time_step(32.0), 100.0);
        assert_eq!(rounded_time_step(0.0), 0.0);
        assert_eq!(rounded_time_step(-5.0), 0.0);
    }

    #[test]
    fn small_burst_steps_back_from_last_time() {
        let times = [0, 10, 20, 400, 410, 420, 900, 950, 1000];
        let mut resampler = Resampler::default();
        let out = resampler.resample_batch(burst("a", times));

        let got: Vec<i64> = out.iter().map(|s| s.time).collect();
        assert_eq!(got, vec![200, 300, 400, 500, 600, 700, 800, 900, 1000]);
        assert_eq!(resampler.last_time(), None, "small bursts leave the anchor alone");
    }

    #[test]
    fn single_sample_keeps_its_time() {
        let out = Resampler::default().resample_batch(burst("a", [42]));
        assert_eq!(out[0].time, 42);
    }

    #[test]
    fn padding_preserves_order_and_hits_target() {
        let burst: Vec<usize> = (0..600).collect();
        let padded = pad_to_target(&burst, 1000);

        assert_eq!(padded.len(), 1000);
        assert!(padded.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(padded.first(), Some(&0));
        assert_eq!(padded.last(), Some(&599));
    }

    #[test]
    fn padding_leaves_long_bursts_alone() {
        let burst: Vec<u8> = vec![1; 1200];
        assert_eq!(pad_to_target(&burst, 1000).len(), 1200);
    }

    #[test]
    fn large_burst_anchor_advances_per_batch() {
        let mut resampler = Resampler::default();

        let first = resampler.resample_batch(burst("hf", 0..600));
        assert_eq!(first.len(), 1000);
        assert_eq!(first.last().map(|s| s.time), Some(599));
        assert_eq!(first.first().map(|s| s.time), Some(599 - 999));

        let second = resampler.resample_batch(burst("hf", 5000..5600));
        assert_eq!(resampler.last_time(), Some(1599));
        assert_eq!(second.first().map(|s| s.time), Some(600));
    }

    #[test]
    fn large_bursts_in_one_batch_share_anchor() {
        let mut samples = burst("a", 0..700);
        samples.extend(burst("b", 100..800));
        let out = Resampler::default().resample_batch(samples);

        assert_eq!(out.len(), 2000);
        assert!(out.windows(2).all(|w| w[0].time <= w[1].time));
        let max_a = out.iter().filter(|s| s.signal_id.as_str() == "a").map(|s| s.time).max();
        let max_b = out.iter().filter(|s| s.signal_id.as_str() == "b").map(|s| s.time).max();
        assert_eq!(max_a, Some(699));
        assert_eq!(max_a, max_b);
    }

    #[test]
    fn extreme_small_burst_times_do_not_overflow() {
        let out = Resampler::default().resample_batch(burst("a", [i64::MIN + 10, i64::MAX - 10]));

        assert_eq!(out.len(), 2);
        assert!(out[0].time <= out[1].time);
        assert_eq!(out[1].time, i64::MAX);
    }

    #[test]
    fn anchor_saturates_at_i64_max() {
        let mut resampler = Resampler::default();
        resampler.resample_batch(burst("hf", (0..600).map(|i| i64::MAX - 600 + i)));
        assert_eq!(resampler.last_time(), Some(i64::MAX - 1));

        let second = resampler.resample_batch(burst("hf", (0..600).map(|i| i64::MAX - 600 + i)));
        assert_eq!(resampler.last_time(), Some(i64::MAX));
        assert_eq!(second.last().map(|s| s.time), Some(i64::MAX));
        assert_eq!(second.first().map(|s| s.time), Some(i64::MAX - 999));
    }

    #[test]
    fn large_burst_layout_saturates_at_i64_min() {
        let out = Resampler::default().resample_batch(burst("hf", (0..600).map(|i| i64::MIN + i)));

        assert_eq!(out.len(), 1000);
        assert_eq!(out.first().map(|s| s.time), Some(i64::MIN));
        assert_eq!(out.last().map(|s| s.time), Some(i64::MIN + 599));
    }
}
