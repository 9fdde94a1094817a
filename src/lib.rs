//! A library for parsing and analysing MySQL slow query logs.
//!
//! This library turns a (possibly partial) MySQL slow query log into a stream
//! of structured events and aggregates those events into compact per-query
//! statistics. Queries are grouped by *fingerprint*: a canonical form of the
//! SQL text with literal values, comments, and whitespace normalised away.
//!
//! # Features
//!
//! - Stream a slow query log into [`Event`]s, restartable at any byte offset
//! - Fingerprint queries by collapsing literals into `?` placeholders
//! - Derive stable 16-character class ids from fingerprints
//! - Aggregate events into per-class and global metric statistics
//!   (count, sum, min, max, 99th percentile) with a JSON-ready report
//!
//! # Examples
//!
//! ## Streaming events from a log file
//!
//! ```no_run
//! use slowlog_digest::{parse_slow_log_file, Options};
//!
//! let parser = parse_slow_log_file("path/to/slow.log", Options::default()).unwrap();
//! for event in parser {
//!     let event = event.unwrap();
//!     println!("{}s  {}", event.time_metrics["Query_time"], event.query);
//! }
//! ```
//!
//! ## Parsing from any `BufRead` source
//!
//! ```
//! use slowlog_digest::{Options, SlowLogParser};
//! use std::io::Cursor;
//!
//! let data = b"# Time: 2024-01-01T00:00:00.000000Z
//! ## User@Host: app[app] @ localhost []
//! ## Query_time: 1.5  Lock_time: 0.1  Rows_sent: 10  Rows_examined: 1000
//! SELECT * FROM users WHERE id = 1;
//! ";
//!
//! let mut parser = SlowLogParser::new(Cursor::new(&data[..]), Options::default());
//! let event = parser.next().unwrap().unwrap();
//! assert_eq!(event.time_metrics["Query_time"], 1.5);
//! assert_eq!(event.query, "SELECT * FROM users WHERE id = 1");
//! ```
//!
//! ## Aggregating a whole log into a report
//!
//! ```no_run
//! use slowlog_digest::{fingerprint, id, parse_slow_log_file, Aggregator, Options};
//!
//! let parser = parse_slow_log_file("slow.log", Options::default()).unwrap();
//! let mut aggregator = Aggregator::new(true, chrono::Duration::zero(), 10.0);
//! for event in parser {
//!     let event = event.unwrap();
//!     let fingerprint = fingerprint(&event.query);
//!     let id = id(&fingerprint);
//!     aggregator.add_event(event, &id, &fingerprint);
//! }
//! let report = aggregator.finalize();
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! ```
//!
//! # Query fingerprints
//!
//! | Original | Fingerprint |
//! |----------|-------------|
//! | `SELECT c FROM t WHERE id=1` | `select c from t where id=?` |
//! | `select * from foo where a in (5, 8, 9)` | `select * from foo where a in(?+)` |
//! | `INSERT INTO users (name, age) VALUES ('Alice', 25)` | `insert into users (name, age) values(?+)` |
//! | `CALL foo(1, 2, 3)` | `call foo` |

mod aggregator;
mod class;
mod helpers;
mod metrics;
mod parser;
mod sql;

pub use aggregator::{Aggregator, Report};
pub use class::{Class, Example, GlobalClass, MixedRateLimits, MAX_EXAMPLE_BYTES};
pub use metrics::{BoolStats, Metrics, NumberStats, TimeStats};
pub use parser::{SlowLogParser, StopHandle};
pub use sql::{fingerprint, id, Fingerprinter};

use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};

/// One query and its metadata parsed from a slow log.
///
/// Metadata is not guaranteed to be present; what the server writes varies
/// with the MySQL flavour, version, and configuration. The only field the
/// parser guarantees is `Query_time` in [`time_metrics`](Event::time_metrics).
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Byte offset in the log at which this event starts.
    pub offset: u64,
    /// Byte offset at which the next event starts (or the log ends).
    pub offset_end: u64,
    /// Timestamp of the query, when the event carried a `# Time:` line.
    pub ts: Option<DateTime<Utc>>,
    /// True if `query` is an administrator command (e.g. `Quit`) rather than SQL.
    pub admin: bool,
    /// SQL query or admin command name, without the trailing `;`.
    pub query: String,
    pub user: String,
    pub host: String,
    pub db: String,
    /// `*_time` and `*_wait` metrics, in seconds.
    pub time_metrics: HashMap<String, f64>,
    /// Integer metrics, including `Thread_id`.
    pub number_metrics: HashMap<String, u64>,
    /// Yes/No metrics.
    pub bool_metrics: HashMap<String, bool>,
    /// Percona Server rate limiting: `""`, `"query"`, or `"session"`.
    pub rate_type: String,
    pub rate_limit: u64,
}

impl Event {
    pub(crate) fn new() -> Event {
        Event::default()
    }
}

/// Options controlling how a [`SlowLogParser`] reads its input.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Byte offset the reader is positioned at. Event offsets are reported
    /// relative to the start of the file, so a parse resumed at
    /// `start_offset` yields the same offsets as a full parse.
    /// [`parse_slow_log_file`] seeks to this offset itself.
    pub start_offset: u64,
    /// Timezone in which to interpret timestamps that carry no offset of
    /// their own. UTC when unset.
    pub default_location: Option<FixedOffset>,
    /// Admin commands (e.g. `Quit`) to drop instead of emitting.
    pub filter_admin_commands: HashSet<String>,
}

/// Error type for slow log parsing.
///
/// The parser surfaces at most one error, then terminates the event stream.
#[derive(Debug)]
pub enum ParseError {
    /// Reading from the input failed.
    Io(io::Error),
    /// An event was terminated without a `Query_time` metric even though its
    /// header was seen. The log is corrupt or not a slow query log.
    MissingQueryTime {
        /// Offset of the line that triggered the emission.
        offset: u64,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read error: {err}"),
            Self::MissingQueryTime { offset } => {
                write!(f, "no Query_time in event at offset {offset}")
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::MissingQueryTime { .. } => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Opens a slow query log file and returns a parser over its events.
///
/// Seeks to `options.start_offset` first, so a caller resuming from a saved
/// offset gets events whose offsets continue where the previous parse left
/// off.
///
/// # Examples
///
/// ```no_run
/// use slowlog_digest::{parse_slow_log_file, Options};
///
/// let parser = parse_slow_log_file("slow.log", Options::default()).unwrap();
/// for event in parser {
///     println!("{:?}", event.unwrap());
/// }
/// ```
pub fn parse_slow_log_file(
    path: &str,
    options: Options,
) -> io::Result<SlowLogParser<BufReader<File>>> {
    let mut file = File::open(path)?;
    if options.start_offset > 0 {
        file.seek(SeekFrom::Start(options.start_offset))?;
    }
    Ok(SlowLogParser::new(BufReader::new(file), options))
}
