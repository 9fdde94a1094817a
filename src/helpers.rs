use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

// Header lines begin with '#', whitespace, and a capital letter. The admin
// command line ("# administrator command: ...") intentionally does not match.
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+[A-Z]").unwrap());

// User@Host: root[root] @ localhost [127.0.0.1]
// The user is either plain (up to the first '[') or fully bracketed, as
// written for replication threads like [SQL_SLAVE].
static USER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"User@Host: ([^\[]+|\[[^\[]+\]).*?@ (\S*) \[(.*)\]").unwrap());

// Percona Server writes the schema inline with the error metrics:
//   # Schema: dbname  Last_errno: 0  Killed: 0
static SCHEMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Schema: +(.*?) +Last_errno:").unwrap());

// name: value pairs on metric header lines. The empty alternative picks up a
// trailing metric with no value at end of line.
static METRICS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+): (\S+|$)").unwrap());

static ADMIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"command: (.+)").unwrap());

static SET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SET (?:last_insert_id|insert_id|timestamp)").unwrap());

static USE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^use ").unwrap());

pub(crate) fn is_header_line(line: &str) -> bool {
    HEADER_RE.is_match(line)
}

/// Matches lines the server writes around events, which are not events
/// themselves: the restart banner, the banner column headers, empty
/// comments, and MariaDB EXPLAIN annotations. `line` carries no newline.
pub(crate) fn is_meta_line(line: &str) -> bool {
    (line.len() >= 19
        && ((line.starts_with('/') && line.ends_with("with:"))
            || line.starts_with("Time ")
            || line.starts_with("Tcp ")
            || line.starts_with("TCP ")))
        || line == "#"
        || line.starts_with("# explain:")
}

pub(crate) fn is_set_line(line: &str) -> bool {
    SET_RE.is_match(line)
}

/// True for `use db` lines in any case. The prefix is always 4 bytes.
pub(crate) fn is_use_line(line: &str) -> bool {
    USE_RE.is_match(line)
}

pub(crate) fn parse_user_host(line: &str) -> Option<(String, String)> {
    USER_RE
        .captures(line)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

pub(crate) fn parse_schema_db(line: &str) -> Option<String> {
    SCHEMA_RE.captures(line).map(|caps| caps[1].to_string())
}

/// All `name: value` pairs on a metric header line. `value` is empty for a
/// trailing metric with no value.
pub(crate) fn metric_pairs(line: &str) -> Vec<(String, String)> {
    METRICS_RE
        .captures_iter(line)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// The admin command named on a `# administrator command:` line.
pub(crate) fn parse_admin_command(line: &str) -> Option<String> {
    ADMIN_RE.captures(line).map(|caps| caps[1].to_string())
}

/// Parses the raw value of a `# Time:` line.
///
/// Two formats appear in the wild: the legacy `YYMMDD H:MM:SS` form
/// (MySQL < 5.7, single-digit hours not zero-padded) and ISO-8601 with
/// optional fractional seconds and optional offset (MySQL >= 5.7, MariaDB).
/// Timestamps without an offset of their own are interpreted in
/// `default_location`, or UTC when unset. Trailing garbage (such as a
/// malformed User@Host fragment on the same line) is ignored.
pub(crate) fn parse_timestamp(
    raw: &str,
    default_location: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let mut tokens = raw.split_whitespace();
    let first = tokens.next()?;

    if first.len() == 6 && first.bytes().all(|b| b.is_ascii_digit()) {
        let second = tokens.next()?;
        return parse_legacy(first, second, default_location);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(first) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(first, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    to_utc(naive, default_location)
}

// YYMMDD date plus H:MM:SS or HH:MM:SS clock. Two-digit years follow the
// usual pivot: 69..=99 are 19xx, 00..=68 are 20xx.
fn parse_legacy(
    date: &str,
    clock: &str,
    default_location: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let yy: i32 = date[0..2].parse().ok()?;
    let month: u32 = date[2..4].parse().ok()?;
    let day: u32 = date[4..6].parse().ok()?;
    let year = if yy >= 69 { 1900 + yy } else { 2000 + yy };

    let mut parts = clock.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let min: u32 = parts.next()?.parse().ok()?;
    let sec: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)?;
    to_utc(naive, default_location)
}

fn to_utc(naive: NaiveDateTime, default_location: Option<FixedOffset>) -> Option<DateTime<Utc>> {
    match default_location {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}
