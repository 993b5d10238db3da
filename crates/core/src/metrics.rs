//! Summary metrics: per-metric means across a frame sequence.

use std::collections::BTreeMap;

use crate::pose::FrameResult;

/// Metric name → mean value across the frames where the metric was present.
pub type SummaryMetrics = BTreeMap<String, f64>;

/// Reduce a frame sequence into summary metrics.
///
/// Each metric is averaged only over the frames that carry it; frames where
/// a joint was occluded count toward neither the sum nor the divisor. An
/// empty sequence yields an empty map.
pub fn summarize(frames: &[FrameResult]) -> SummaryMetrics {
    let mut totals: BTreeMap<&str, (f64, u32)> = BTreeMap::new();

    for frame in frames {
        for (name, value) in &frame.metrics {
            if !value.is_finite() {
                continue;
            }
            let entry = totals.entry(name.as_str()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    totals
        .into_iter()
        .map(|(name, (sum, count))| (name.to_string(), sum / f64::from(count)))
        .collect()
}
