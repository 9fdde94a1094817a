use crate::metrics::Metrics;
use crate::Event;
use serde::Serialize;

/// Example queries longer than this are truncated with a `...` suffix.
pub const MAX_EXAMPLE_BYTES: usize = 1024 * 10;

/// A real query kept as the exemplar of its class: the one with the
/// greatest `Query_time` seen so far.
#[derive(Debug, Clone, Serialize)]
pub struct Example {
    pub query_time: f64,
    /// `Schema: <db>` or `USE <db>`, falling back to the last db seen in
    /// the class when the exemplar event itself had none.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub db: String,
    /// Truncated to [`MAX_EXAMPLE_BYTES`].
    pub query: String,
    /// `YYYY-MM-DD HH:MM:SS`, empty when the event had no timestamp.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ts: String,
}

/// All events with the same fingerprint and class id. This is only enforced
/// by convention, so be careful not to mix events from different classes.
#[derive(Debug, Clone, Serialize)]
pub struct Class {
    /// 16-character hex checksum of the fingerprint.
    pub id: String,
    /// Canonical form of the query: values replaced with `?`.
    pub fingerprint: String,
    pub metrics: Metrics,
    /// Total queries in the class; scaled by the rate limit at finalize.
    pub total_queries: u64,
    /// Distinct pre-aggregated classes merged in via [`add_class`](Class::add_class).
    pub unique_queries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Example>,
    #[serde(skip)]
    outliers: u64,
    #[serde(skip)]
    last_db: String,
    #[serde(skip)]
    sample: bool,
}

impl Class {
    /// Returns a new class for the id and fingerprint. If `sample` is true,
    /// the query with the greatest `Query_time` is kept as the example.
    pub fn new(id: &str, fingerprint: &str, sample: bool) -> Class {
        Class {
            id: id.to_string(),
            fingerprint: fingerprint.to_string(),
            metrics: Metrics::new(),
            total_queries: 0,
            unique_queries: 0,
            example: None,
            outliers: 0,
            last_db: String::new(),
            sample,
        }
    }

    pub fn add_event(&mut self, event: &Event, outlier: bool) {
        if outlier {
            self.outliers += 1;
        } else {
            self.total_queries += 1;
        }

        self.metrics.add_event(event, outlier);

        // Remember the last db seen so the example has one even when its
        // own event didn't.
        if !event.db.is_empty() {
            self.last_db = event.db.clone();
        }
        if self.sample {
            if let Some(&query_time) = event.time_metrics.get("Query_time") {
                let current = self.example.as_ref().map_or(0.0, |e| e.query_time);
                if query_time > current {
                    let db = if event.db.is_empty() {
                        self.last_db.clone()
                    } else {
                        event.db.clone()
                    };
                    self.example = Some(Example {
                        query_time,
                        db,
                        query: truncate_query(&event.query),
                        ts: event
                            .ts
                            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default(),
                    });
                }
            }
        }
    }

    /// Merges a pre-aggregated class, as returned by Performance Schema,
    /// into this one. Percentiles cannot be merged and are dropped; the
    /// example no longer describes a single query and is dropped too.
    pub fn add_class(&mut self, other: &Class) {
        self.unique_queries += 1;
        self.total_queries += other.total_queries;
        self.example = None;
        merge_metrics(&mut self.metrics, &other.metrics);
    }

    /// Computes all metric statistics. Call when done adding events.
    pub fn finalize(&mut self, rate_limit: u64) {
        let rate_limit = if rate_limit == 0 { 1 } else { rate_limit };
        self.metrics.finalize(rate_limit);
        self.total_queries = self.total_queries * rate_limit + self.outliers;
    }
}

/// The pseudo-class aggregating every event regardless of fingerprint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalClass {
    pub total_queries: u64,
    pub unique_queries: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rate_type: String,
    #[serde(skip_serializing_if = "u64_is_zero")]
    pub rate_limit: u64,
    pub metrics: Metrics,
}

fn u64_is_zero(v: &u64) -> bool {
    *v == 0
}

impl GlobalClass {
    pub fn new() -> GlobalClass {
        GlobalClass::default()
    }

    /// Adds an event. Rate limit markers on the event are adopted; the last
    /// write wins, and a change of regime mid-stream is reported — the
    /// caller is responsible for not mixing rate limits in one aggregation.
    pub fn add_event(&mut self, event: &Event) -> Result<(), MixedRateLimits> {
        let mut result = Ok(());
        if !event.rate_type.is_empty() {
            if self.rate_type.is_empty() {
                self.rate_type = event.rate_type.clone();
                self.rate_limit = event.rate_limit;
            } else if self.rate_type != event.rate_type || self.rate_limit != event.rate_limit {
                result = Err(MixedRateLimits {
                    prev_rate_type: std::mem::replace(&mut self.rate_type, event.rate_type.clone()),
                    prev_rate_limit: std::mem::replace(&mut self.rate_limit, event.rate_limit),
                    cur_rate_type: event.rate_type.clone(),
                    cur_rate_limit: event.rate_limit,
                });
            }
        }
        self.total_queries += 1;
        self.metrics.add_event(event, false);
        result
    }

    /// Merges a finalized per-fingerprint class into the global class.
    pub fn add_class(&mut self, class: &Class) {
        self.total_queries += class.total_queries;
        self.unique_queries += 1;
        merge_metrics(&mut self.metrics, &class.metrics);
    }

    pub fn finalize(&mut self, unique_queries: u64) {
        self.unique_queries = unique_queries;
        self.metrics.finalize(self.rate_limit);
    }
}

// Sums, mins, and maxes merge; percentiles of merged distributions do not
// exist and reset.
fn merge_metrics(dst: &mut Metrics, src: &Metrics) {
    for (metric, other) in &src.time_metrics {
        match dst.time_metrics.get_mut(metric) {
            None => {
                let mut stats = other.clone();
                stats.p99 = None;
                dst.time_metrics.insert(metric.clone(), stats);
            }
            Some(stats) => {
                stats.sum += other.sum;
                stats.min = merge_option(stats.min, other.min, f64::min);
                stats.max = merge_option(stats.max, other.max, f64::max);
            }
        }
    }
    for (metric, other) in &src.number_metrics {
        match dst.number_metrics.get_mut(metric) {
            None => {
                let mut stats = other.clone();
                stats.p99 = None;
                dst.number_metrics.insert(metric.clone(), stats);
            }
            Some(stats) => {
                stats.sum += other.sum;
                stats.min = merge_option(stats.min, other.min, u64::min);
                stats.max = merge_option(stats.max, other.max, u64::max);
            }
        }
    }
    for (metric, other) in &src.bool_metrics {
        match dst.bool_metrics.get_mut(metric) {
            None => {
                dst.bool_metrics.insert(metric.clone(), other.clone());
            }
            Some(stats) => {
                stats.sum += other.sum;
            }
        }
    }
}

fn merge_option<T: Copy>(a: Option<T>, b: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

fn truncate_query(query: &str) -> String {
    if query.len() <= MAX_EXAMPLE_BYTES {
        return query.to_string();
    }
    let mut end = MAX_EXAMPLE_BYTES - 3;
    while !query.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &query[..end])
}

/// The rate limit regime changed within one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedRateLimits {
    pub prev_rate_type: String,
    pub prev_rate_limit: u64,
    pub cur_rate_type: String,
    pub cur_rate_limit: u64,
}

impl std::fmt::Display for MixedRateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mixed rate limits: have {}:{}, got {}:{}",
            self.prev_rate_type, self.prev_rate_limit, self.cur_rate_type, self.cur_rate_limit
        )
    }
}

impl std::error::Error for MixedRateLimits {}
