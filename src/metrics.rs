use crate::Event;
use serde::Serialize;
use std::collections::HashMap;

/// The statistics of one event class: one accumulator per metric name,
/// split by metric kind the same way [`Event`](crate::Event) splits them.
///
/// Values are buffered until [`finalize`](Metrics::finalize) computes the
/// distribution, so memory is O(events) per class until then.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub time_metrics: HashMap<String, TimeStats>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub number_metrics: HashMap<String, NumberStats>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub bool_metrics: HashMap<String, BoolStats>,
}

/// Statistics for a second-based metric like `Query_time` or `Lock_time`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeStats {
    #[serde(skip)]
    pub(crate) vals: Vec<f64>,
    pub cnt: u64,
    pub sum: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// 99th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip)]
    pub(crate) outlier_sum: f64,
}

/// Statistics for an integer metric like `Rows_sent` or `Merge_passes`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NumberStats {
    #[serde(skip)]
    pub(crate) vals: Vec<u64>,
    pub cnt: u64,
    pub sum: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    #[serde(skip)]
    pub(crate) outlier_sum: u64,
}

/// Statistics for a Yes/No metric like `QC_Hit` or `Filesort`.
/// `sum` counts the Yes values; %true is `sum / cnt`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoolStats {
    #[serde(skip)]
    pub(crate) vals: Vec<bool>,
    pub cnt: u64,
    pub sum: u64,
    #[serde(skip)]
    pub(crate) outlier_sum: u64,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics::default()
    }

    /// Buffers all metric values of `event`. Outlier contributions go to a
    /// separate sum that bypasses the rate limit multiplier at finalize.
    pub fn add_event(&mut self, event: &Event, outlier: bool) {
        for (metric, &val) in &event.time_metrics {
            let stats = self.time_metrics.entry(metric.clone()).or_default();
            stats.vals.push(val);
            if outlier {
                stats.outlier_sum += val;
            } else {
                stats.sum += val;
            }
        }
        for (metric, &val) in &event.number_metrics {
            let stats = self.number_metrics.entry(metric.clone()).or_default();
            stats.vals.push(val);
            if outlier {
                stats.outlier_sum += val;
            } else {
                stats.sum += val;
            }
        }
        for (metric, &val) in &event.bool_metrics {
            let stats = self.bool_metrics.entry(metric.clone()).or_default();
            stats.vals.push(val);
            if val {
                if outlier {
                    stats.outlier_sum += 1;
                } else {
                    stats.sum += 1;
                }
            }
        }
    }

    /// Computes the final statistics and drops the value buffers.
    ///
    /// Sums are scaled by `rate_limit` (0 means unlimited, i.e. 1) before the
    /// outlier contributions are added back, estimating population totals
    /// from a rate-limited sample. The percentile is the value at index
    /// `99 * cnt / 100` of the sorted buffer, integer arithmetic, no
    /// interpolation.
    pub fn finalize(&mut self, rate_limit: u64) {
        let rate_limit = if rate_limit == 0 { 1 } else { rate_limit };

        for stats in self.time_metrics.values_mut() {
            stats.vals.sort_by(f64::total_cmp);
            stats.cnt = stats.vals.len() as u64;
            if !stats.vals.is_empty() {
                stats.min = Some(stats.vals[0]);
                stats.p99 = Some(stats.vals[99 * stats.vals.len() / 100]);
                stats.max = Some(stats.vals[stats.vals.len() - 1]);
            }
            stats.sum = stats.sum * rate_limit as f64 + stats.outlier_sum;
            stats.vals = Vec::new();
        }

        for stats in self.number_metrics.values_mut() {
            stats.vals.sort_unstable();
            stats.cnt = stats.vals.len() as u64;
            if !stats.vals.is_empty() {
                stats.min = Some(stats.vals[0]);
                stats.p99 = Some(stats.vals[99 * stats.vals.len() / 100]);
                stats.max = Some(stats.vals[stats.vals.len() - 1]);
            }
            stats.sum = stats.sum * rate_limit + stats.outlier_sum;
            stats.vals = Vec::new();
        }

        for stats in self.bool_metrics.values_mut() {
            stats.cnt = stats.vals.len() as u64;
            stats.sum = stats.sum * rate_limit + stats.outlier_sum;
            stats.vals = Vec::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_time(metric: &str, val: f64) -> Event {
        let mut event = Event::new();
        event.time_metrics.insert(metric.to_string(), val);
        event
    }

    #[test]
    fn test_time_stats() {
        let mut metrics = Metrics::new();
        for val in [2.0, 0.5, 1.0, 4.0] {
            metrics.add_event(&event_with_time("Query_time", val), false);
        }
        metrics.finalize(0);

        let stats = &metrics.time_metrics["Query_time"];
        assert_eq!(stats.cnt, 4);
        assert_eq!(stats.sum, 7.5);
        assert_eq!(stats.min, Some(0.5));
        // 99 * 4 / 100 = 3, the last sorted value.
        assert_eq!(stats.p99, Some(4.0));
        assert_eq!(stats.max, Some(4.0));
    }

    #[test]
    fn test_number_stats_percentile_index() {
        let mut metrics = Metrics::new();
        for val in 1..=200u64 {
            let mut event = Event::new();
            event.number_metrics.insert("Rows_sent".to_string(), val);
            metrics.add_event(&event, false);
        }
        metrics.finalize(0);

        let stats = &metrics.number_metrics["Rows_sent"];
        assert_eq!(stats.cnt, 200);
        // 99 * 200 / 100 = 198 -> the 199th smallest value.
        assert_eq!(stats.p99, Some(199));
        assert_eq!(stats.min, Some(1));
        assert_eq!(stats.max, Some(200));
        assert_eq!(stats.sum, 20100);
    }

    #[test]
    fn test_min_p99_max_ordering() {
        let mut metrics = Metrics::new();
        for val in [9.0, 3.0, 7.0, 1.0, 5.0, 8.0, 2.0] {
            metrics.add_event(&event_with_time("Query_time", val), false);
        }
        metrics.finalize(0);
        let stats = &metrics.time_metrics["Query_time"];
        assert!(stats.min.unwrap() <= stats.p99.unwrap());
        assert!(stats.p99.unwrap() <= stats.max.unwrap());
    }

    #[test]
    fn test_rate_limit_scales_sums() {
        let mut metrics = Metrics::new();
        metrics.add_event(&event_with_time("Query_time", 1.5), false);
        metrics.add_event(&event_with_time("Query_time", 0.5), false);
        metrics.finalize(100);
        assert_eq!(metrics.time_metrics["Query_time"].sum, 200.0);
        // Distribution stats describe the logged sample, not the estimate.
        assert_eq!(metrics.time_metrics["Query_time"].max, Some(1.5));
    }

    #[test]
    fn test_outliers_bypass_rate_limit() {
        let mut metrics = Metrics::new();
        metrics.add_event(&event_with_time("Query_time", 2.0), false);
        metrics.add_event(&event_with_time("Query_time", 12.0), true);
        metrics.finalize(10);

        let stats = &metrics.time_metrics["Query_time"];
        // 2.0 * 10 + 12.0: the outlier is not multiplied.
        assert_eq!(stats.sum, 32.0);
        assert_eq!(stats.cnt, 2);
        assert_eq!(stats.max, Some(12.0));
    }

    #[test]
    fn test_bool_stats() {
        let mut metrics = Metrics::new();
        for (val, outlier) in [(true, false), (false, false), (true, false), (true, true)] {
            let mut event = Event::new();
            event.bool_metrics.insert("Filesort".to_string(), val);
            metrics.add_event(&event, outlier);
        }
        metrics.finalize(10);

        let stats = &metrics.bool_metrics["Filesort"];
        assert_eq!(stats.cnt, 4);
        // 2 true samples * 10 + 1 true outlier.
        assert_eq!(stats.sum, 21);
    }

    #[test]
    fn test_missing_metrics_do_not_create_entries() {
        let mut metrics = Metrics::new();
        metrics.add_event(&event_with_time("Query_time", 1.0), false);
        let mut event = Event::new();
        event.time_metrics.insert("Query_time".to_string(), 2.0);
        event.time_metrics.insert("Lock_time".to_string(), 0.5);
        metrics.add_event(&event, false);
        metrics.finalize(0);

        assert_eq!(metrics.time_metrics["Query_time"].cnt, 2);
        // Lock_time was present in only one event.
        assert_eq!(metrics.time_metrics["Lock_time"].cnt, 1);
        assert!(metrics.number_metrics.is_empty());
        assert!(metrics.bool_metrics.is_empty());
    }

    #[test]
    fn test_optional_stats_omitted_from_json() {
        let mut metrics = Metrics::new();
        metrics.add_event(&event_with_time("Query_time", 1.0), false);
        // Not finalized: min/p99/max not yet computed.
        let value = serde_json::to_value(&metrics).unwrap();
        let stats = &value["time_metrics"]["Query_time"];
        assert!(stats.get("min").is_none());
        assert!(stats.get("p99").is_none());
        assert!(stats.get("max").is_none());
        assert!(value.get("number_metrics").is_none());
    }
}
