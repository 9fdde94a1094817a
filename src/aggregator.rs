use crate::class::{Class, GlobalClass};
use crate::Event;
use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// The aggregation output: the global pseudo-class plus one [`Class`] per
/// fingerprint id, with finalized metric statistics.
///
/// Serializes to JSON with optional statistics, empty fields, and the error
/// omitted.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub global: GlobalClass,
    /// Keyed on class id.
    pub classes: HashMap<String, Class>,
    /// Set when events with mixed rate limits were aggregated. The numbers
    /// are still computed, but the rate estimate is unreliable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Groups events into classes by fingerprint id and accumulates their
/// metrics. When there are no more events, [`finalize`](Aggregator::finalize)
/// computes all statistics and returns the [`Report`].
///
/// # Examples
///
/// ```
/// use slowlog_digest::{fingerprint, id, Aggregator, Event};
///
/// let mut aggregator = Aggregator::new(true, chrono::Duration::zero(), 10.0);
/// let mut event = Event::default();
/// event.query = "select c from t where id=1".to_string();
/// event.time_metrics.insert("Query_time".to_string(), 2.5);
/// let f = fingerprint(&event.query);
/// let i = id(&f);
/// aggregator.add_event(event, &i, &f);
///
/// let report = aggregator.finalize();
/// assert_eq!(report.global.total_queries, 1);
/// assert_eq!(report.classes[&i].fingerprint, "select c from t where id=?");
/// ```
pub struct Aggregator {
    examples: bool,
    utc_offset: Duration,
    outlier_p99_query_time: f64,
    result: Report,
}

impl Aggregator {
    /// Returns a new aggregator.
    ///
    /// * `examples` — keep the worst query of each class as its example.
    /// * `utc_offset` — shift applied to every event timestamp, for servers
    ///   whose log timezone is not the reporting timezone.
    /// * `outlier_p99_query_time` — events with a `Query_time` above this
    ///   threshold are outliers: their contributions bypass the rate limit
    ///   multiplier. `0.0` disables outlier handling.
    pub fn new(examples: bool, utc_offset: Duration, outlier_p99_query_time: f64) -> Aggregator {
        Aggregator {
            examples,
            utc_offset,
            outlier_p99_query_time,
            result: Report {
                global: GlobalClass::new(),
                classes: HashMap::new(),
                error: None,
            },
        }
    }

    /// Adds the event to its class, creating the class on first sighting.
    pub fn add_event(&mut self, mut event: Event, id: &str, fingerprint: &str) {
        if let Some(ts) = event.ts {
            event.ts = Some(ts + self.utc_offset);
        }

        if let Err(err) = self.result.global.add_event(&event) {
            warn!(%err, "mixed rate limits");
            self.result.error = Some(err.to_string());
        }

        let outlier = self.outlier_p99_query_time > 0.0
            && event
                .time_metrics
                .get("Query_time")
                .is_some_and(|&qt| qt > self.outlier_p99_query_time);

        let examples = self.examples;
        let class = self
            .result
            .classes
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(id, fingerprint, "new class");
                Class::new(id, fingerprint, examples)
            });
        class.add_event(&event, outlier);
    }

    /// Computes all metric statistics and returns the report. Call when done
    /// adding events.
    pub fn finalize(mut self) -> Report {
        let rate_limit = self.result.global.rate_limit;
        for class in self.result.classes.values_mut() {
            class.finalize(rate_limit);
        }
        let unique_queries = self.result.classes.len() as u64;
        self.result.global.finalize(unique_queries);
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fingerprint, id, Options, SlowLogParser};
    use chrono::Duration;
    use std::io::Cursor;

    const SLOW001: &[u8] = include_bytes!("../testdata/slow001.log");
    const SLOW001_GOLDEN: &str = include_str!("../testdata/slow001.golden");
    const SLOW_RATE: &[u8] = include_bytes!("../testdata/slow-rate.log");
    const SLOW_RATE_GOLDEN: &str = include_str!("../testdata/slow-rate.golden");

    fn aggregate(data: &[u8], examples: bool, utc_offset: Duration, outlier: f64) -> Report {
        let parser = SlowLogParser::new(Cursor::new(data), Options::default());
        let mut aggregator = Aggregator::new(examples, utc_offset, outlier);
        for event in parser {
            let event = event.unwrap();
            let f = fingerprint(&event.query);
            let i = id(&f);
            aggregator.add_event(event, &i, &f);
        }
        aggregator.finalize()
    }

    fn assert_matches_golden(report: &Report, golden: &str) {
        let got = serde_json::to_value(report).unwrap();
        let expect: serde_json::Value = serde_json::from_str(golden).unwrap();
        assert_eq!(got, expect);
    }

    #[test]
    fn test_golden_slow001() {
        let report = aggregate(SLOW001, true, Duration::zero(), 10.0);
        assert_matches_golden(&report, SLOW001_GOLDEN);
    }

    #[test]
    fn test_golden_slow001_no_examples() {
        let report = aggregate(SLOW001, false, Duration::zero(), 10.0);
        for class in report.classes.values() {
            assert!(class.example.is_none());
        }
        assert_eq!(report.global.total_queries, 2);
        assert_eq!(report.global.unique_queries, 2);
    }

    #[test]
    fn test_golden_slow_rate() {
        let report = aggregate(SLOW_RATE, true, Duration::zero(), 10.0);
        assert_matches_golden(&report, SLOW_RATE_GOLDEN);
    }

    #[test]
    fn test_outlier_handling_disabled() {
        let report = aggregate(SLOW_RATE, true, Duration::zero(), 0.0);
        let class = &report.classes["9EA505F4786E7F15"];
        // All 3 events are sampled queries: 3 * 10, no outliers.
        assert_eq!(class.total_queries, 30);
        assert_eq!(class.metrics.time_metrics["Query_time"].sum, 140.0);
    }

    #[test]
    fn test_utc_offset_shifts_example_ts() {
        let report = aggregate(SLOW001, true, Duration::hours(2), 10.0);
        let class = &report.classes["7F7D57ACDD8A346E"];
        assert_eq!(class.example.as_ref().unwrap().ts, "2007-10-15 23:43:52");
    }

    #[test]
    fn test_mixed_rate_limits_reported() {
        let log = b"# User@Host: app[app] @ localhost []\n\
# Query_time: 0.1  Lock_time: 0  Rows_sent: 0  Rows_examined: 0\n\
# Log_slow_rate_type: query  Log_slow_rate_limit: 2\n\
select 1;\n\
# User@Host: app[app] @ localhost []\n\
# Query_time: 0.1  Lock_time: 0  Rows_sent: 0  Rows_examined: 0\n\
# Log_slow_rate_type: session  Log_slow_rate_limit: 10\n\
select 2;\n";
        let report = aggregate(log, false, Duration::zero(), 0.0);
        assert_eq!(
            report.error.as_deref(),
            Some("mixed rate limits: have query:2, got session:10")
        );
        // Last write wins.
        assert_eq!(report.global.rate_type, "session");
        assert_eq!(report.global.rate_limit, 10);
    }

    #[test]
    fn test_error_omitted_from_json() {
        let report = aggregate(SLOW001, true, Duration::zero(), 10.0);
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("error").is_none());
        assert!(value["global"].get("rate_type").is_none());
        assert!(value["global"].get("rate_limit").is_none());
    }
}
