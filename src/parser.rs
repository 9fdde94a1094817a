use crate::helpers;
use crate::{Event, Options, ParseError};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// A streaming MySQL slow log parser.
///
/// Reads lines from any [`BufRead`] source and yields one [`Event`] per
/// executed query. The parser is a pull iterator: nothing is read ahead of
/// the consumer, so back-pressure comes for free and a parse can be abandoned
/// at any point. Parsing stops at EOF, on the first error, or when the
/// [`StopHandle`] is triggered; after that the iterator only returns `None`.
///
/// The input must be positioned at `options.start_offset`
/// ([`parse_slow_log_file`](crate::parse_slow_log_file) seeks for you);
/// offsets on emitted events are absolute file positions.
pub struct SlowLogParser<R> {
    reader: R,
    opt: Options,
    stop: Arc<AtomicBool>,
    in_header: bool,
    in_query: bool,
    header_lines: u64,
    query_lines: u64,
    bytes_read: u64,
    line_offset: u64,
    done: bool,
    event: Event,
}

/// Cooperative stop signal for a [`SlowLogParser`].
///
/// Cloneable and sendable to another thread; the parser checks it before
/// reading each line and closes the event stream without emitting the
/// in-flight partial event.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl<R: BufRead> SlowLogParser<R> {
    /// Returns a parser reading from `reader`, which must already be
    /// positioned at `options.start_offset`.
    pub fn new(reader: R, options: Options) -> SlowLogParser<R> {
        SlowLogParser {
            reader,
            bytes_read: options.start_offset,
            opt: options,
            stop: Arc::new(AtomicBool::new(false)),
            in_header: false,
            in_query: false,
            header_lines: 0,
            query_lines: 0,
            line_offset: 0,
            done: false,
            event: Event::new(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    fn parse_header(&mut self, line: &str) -> Result<Option<Event>, ParseError> {
        if !helpers::is_header_line(line) {
            self.in_header = false;
            self.in_query = true;
            return self.parse_query(line);
        }

        if self.header_lines == 0 {
            self.event.offset = self.line_offset;
        }
        self.header_lines += 1;

        if line.starts_with("# Time") {
            trace!("time");
            let raw = line.splitn(2, ':').nth(1).unwrap_or("");
            self.event.ts = helpers::parse_timestamp(raw, self.opt.default_location);
            // Malformed logs glue the User@Host fragment onto the Time line.
            if let Some((user, host)) = helpers::parse_user_host(line) {
                self.event.user = user;
                self.event.host = host;
            }
        } else if line.starts_with("# User") {
            trace!("user");
            if let Some((user, host)) = helpers::parse_user_host(line) {
                self.event.user = user;
                self.event.host = host;
            }
        } else {
            trace!("metrics");
            if let Some(db) = helpers::parse_schema_db(line) {
                self.event.db = db;
            }
            for (name, value) in helpers::metric_pairs(line) {
                if name.ends_with("_time") || name.ends_with("_wait") {
                    self.event
                        .time_metrics
                        .insert(name, value.parse().unwrap_or(0.0));
                } else if value == "Yes" || value == "No" {
                    self.event.bool_metrics.insert(name, value == "Yes");
                } else if name == "Schema" {
                    self.event.db = value;
                } else if name == "Log_slow_rate_type" {
                    self.event.rate_type = value;
                } else if name == "Log_slow_rate_limit" {
                    self.event.rate_limit = value.parse().unwrap_or(0);
                } else {
                    self.event
                        .number_metrics
                        .insert(name, value.parse().unwrap_or(0));
                }
            }
        }
        Ok(None)
    }

    fn parse_query(&mut self, line: &str) -> Result<Option<Event>, ParseError> {
        if line.starts_with("# admin") {
            return self.parse_admin(line);
        }
        if helpers::is_header_line(line) {
            trace!("next event");
            self.in_header = true;
            self.in_query = false;
            let end = self.line_offset;
            let event = self.send_event(true, false, end)?;
            self.parse_header(line)?;
            return Ok(event);
        }

        if self.query_lines == 0 && helpers::is_use_line(line) {
            trace!("use db");
            let db = line[4..].trim_end_matches(';').trim_matches('`');
            self.event.db = db.to_string();
            // Keep the USE itself as the query so a lone USE event survives;
            // a following real query line replaces it.
            self.event.query = line.to_string();
        } else if helpers::is_set_line(line) {
            trace!("set var");
        } else {
            if self.query_lines > 0 {
                self.event.query.push('\n');
                self.event.query.push_str(line);
            } else {
                self.event.query = line.to_string();
            }
            self.query_lines += 1;
        }
        Ok(None)
    }

    // Admin commands are the last line of their event, so they emit
    // immediately unless filtered out.
    fn parse_admin(&mut self, line: &str) -> Result<Option<Event>, ParseError> {
        trace!("admin");
        self.event.admin = true;
        if let Some(command) = helpers::parse_admin_command(line) {
            self.event.query = command.strip_suffix(';').unwrap_or(&command).to_string();
        }

        if self.opt.filter_admin_commands.contains(&self.event.query) {
            debug!(command = %self.event.query, "filtered admin command");
            self.event = Event::new();
            self.header_lines = 0;
            self.query_lines = 0;
            self.in_header = false;
            self.in_query = false;
            Ok(None)
        } else {
            let end = self.bytes_read;
            self.send_event(false, false, end)
        }
    }

    fn send_event(
        &mut self,
        in_header: bool,
        in_query: bool,
        end: u64,
    ) -> Result<Option<Event>, ParseError> {
        let had_headers = self.header_lines > 0;
        let mut event = std::mem::replace(&mut self.event, Event::new());
        self.header_lines = 0;
        self.query_lines = 0;
        self.in_header = in_header;
        self.in_query = in_query;

        if !event.time_metrics.contains_key("Query_time") {
            if !had_headers {
                // Parsing started mid-event; nothing usable was collected.
                trace!("throwing away event without header");
                return Ok(None);
            }
            return Err(ParseError::MissingQueryTime {
                offset: self.line_offset,
            });
        }

        if let Some(stripped) = event.query.strip_suffix(';') {
            event.query.truncate(stripped.len());
        }
        event.offset_end = end;
        debug!(offset = event.offset, offset_end = event.offset_end, "send event");
        Ok(Some(event))
    }
}

impl<R: BufRead> Iterator for SlowLogParser<R> {
    type Item = Result<Event, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("stopped");
                self.done = true;
                return None;
            }

            line.clear();
            let n = match self.reader.read_line(&mut line) {
                Ok(n) => n,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            };
            if n == 0 {
                self.done = true;
                if self.query_lines > 0 {
                    let end = self.bytes_read;
                    return match self.send_event(false, false, end) {
                        Ok(Some(event)) => Some(Ok(event)),
                        Ok(None) => None,
                        Err(err) => Some(Err(err)),
                    };
                }
                return None;
            }

            self.bytes_read += n as u64;
            self.line_offset = self.bytes_read - n as u64;
            trace!(offset = self.line_offset, line = line.trim_end(), "line");

            let stripped = line.strip_suffix('\n').unwrap_or(&line);
            if helpers::is_meta_line(stripped) {
                trace!("meta");
                continue;
            }

            let result = if self.in_header {
                self.parse_header(stripped)
            } else if self.in_query {
                self.parse_query(stripped)
            } else if helpers::is_header_line(stripped) {
                self.in_header = true;
                self.in_query = false;
                self.parse_header(stripped)
            } else {
                Ok(None)
            };

            match result {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
