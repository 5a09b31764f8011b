use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::{
    error::{LogError, Result},
    timestamp::{Timestamp, Zone},
};

/// Text shown once the log has no more lines
pub const END_OF_LOG: &str = "end of log";

/// Every log line starts with `YYYY-MM-DD HH:MM:SS.ffffff`
pub const TIMESTAMP_WIDTH: usize = 26;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One entry of the text log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub timestamp: Timestamp,
}

impl LogLine {
    /// Parse a raw log line; `None` when the timestamp prefix is malformed
    pub fn parse(text: &str, zone: Zone) -> Option<Self> {
        let prefix = text.get(..TIMESTAMP_WIDTH)?;
        let naive = NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            text: text.to_string(),
            timestamp: Timestamp::from_naive(&naive, zone)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndOfLog {
    NotReached,
    /// Input ran out; the sentinel goes in on the next update
    Pending,
    Shown,
}

/// Sliding window over a timestamp-ordered text log.
///
/// The window only moves forward: each [`update`](LogBuffer::update) reveals
/// every line whose timestamp has been reached and drops the oldest lines
/// beyond `max_lines`. Lines must be non-decreasing in time; a line that goes
/// backwards is an error rather than being reordered.
pub struct LogBuffer<R> {
    source: String,
    lines: Lines<R>,
    line_number: usize,
    zone: Zone,
    max_lines: usize,
    window: VecDeque<LogLine>,
    pending: Option<LogLine>,
    end: EndOfLog,
}

impl LogBuffer<BufReader<File>> {
    /// Open a log file and read its first entry
    pub fn open<P: AsRef<Path>>(path: P, max_lines: usize, zone: Zone) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LogError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::with_source(BufReader::new(file), max_lines, zone, path.display().to_string())
    }
}

impl<R: BufRead> LogBuffer<R> {
    pub fn new(reader: R, max_lines: usize, zone: Zone) -> Result<Self> {
        Self::with_source(reader, max_lines, zone, "<reader>".to_string())
    }

    fn with_source(reader: R, max_lines: usize, zone: Zone, source: String) -> Result<Self> {
        let mut buffer = Self {
            source,
            lines: reader.lines(),
            line_number: 0,
            zone,
            max_lines,
            window: VecDeque::with_capacity(max_lines + 1),
            pending: None,
            end: EndOfLog::NotReached,
        };

        buffer.pending = buffer.read_next(None)?;
        if buffer.pending.is_none() {
            buffer.end = EndOfLog::Pending;
        }
        Ok(buffer)
    }

    /// Next non-blank line, checked against the previous entry's timestamp
    fn read_next(&mut self, previous: Option<Timestamp>) -> Result<Option<LogLine>> {
        for raw in self.lines.by_ref() {
            self.line_number += 1;
            let raw = raw.map_err(|e| LogError::ReadFailed {
                path: self.source.clone(),
                reason: e.to_string(),
            })?;

            let text = raw.trim();
            if text.is_empty() {
                continue;
            }

            let line = LogLine::parse(text, self.zone).ok_or_else(|| LogError::Parse {
                line: self.line_number,
                text: text.to_string(),
            })?;

            if let Some(previous) = previous {
                if line.timestamp < previous {
                    return Err(LogError::OutOfOrder {
                        line: self.line_number,
                        timestamp: line.timestamp.to_string(),
                        previous: previous.to_string(),
                    }
                    .into());
                }
            }

            return Ok(Some(line));
        }
        Ok(None)
    }

    /// Advance the window to `virtual_time`.
    ///
    /// `virtual_time` is an absolute timestamp in the same space as the log's
    /// own lines, and must never decrease between calls.
    pub fn update(&mut self, virtual_time: Timestamp) -> Result<()> {
        if self.end == EndOfLog::Pending {
            self.window.push_back(LogLine {
                text: END_OF_LOG.to_string(),
                timestamp: virtual_time,
            });
            self.end = EndOfLog::Shown;
            debug!("Reached end of log {}", self.source);
        }

        while self
            .pending
            .as_ref()
            .is_some_and(|line| line.timestamp <= virtual_time)
        {
            let Some(pending) = self.pending.take() else {
                break;
            };
            let next = self.read_next(Some(pending.timestamp))?;
            self.window.push_back(pending);
            self.pending = next;
            if self.pending.is_none() {
                self.end = EndOfLog::Pending;
            }
        }

        while self.window.len() > self.max_lines {
            self.window.pop_front();
        }

        Ok(())
    }

    /// Visible lines, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.window.iter().map(|line| line.text.as_str())
    }

    /// Visible entries with their timestamps, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogLine> {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Timestamp of the next line that has not been revealed yet
    pub fn next_timestamp(&self) -> Option<Timestamp> {
        self.pending.as_ref().map(|line| line.timestamp)
    }

    /// Whether the end-of-log sentinel has been appended
    pub fn is_exhausted(&self) -> bool {
        self.end == EndOfLog::Shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const BASE: &str = "2022-06-11 10:00:00.000000";

    fn base() -> Timestamp {
        LogLine::parse(BASE, Zone::Utc).unwrap().timestamp
    }

    fn stamp(offset_secs: f64) -> String {
        (base() + offset_secs)
            .to_utc()
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string()
    }

    fn log_text(entries: &[(f64, &str)]) -> String {
        entries
            .iter()
            .map(|(t, msg)| format!("{} {}\n", stamp(*t), msg))
            .collect()
    }

    fn buffer(text: String, max_lines: usize) -> LogBuffer<Cursor<Vec<u8>>> {
        LogBuffer::new(Cursor::new(text.into_bytes()), max_lines, Zone::Utc).unwrap()
    }

    fn visible(buf: &LogBuffer<Cursor<Vec<u8>>>) -> Vec<String> {
        buf.iter()
            .map(|line| line.get(TIMESTAMP_WIDTH + 1..).unwrap_or(line).to_string())
            .collect()
    }

    #[test]
    fn test_parse_line_timestamp() {
        let line = LogLine::parse("2022-06-11 10:00:01.500000 rpm=3000", Zone::Utc).unwrap();
        assert_eq!(line.timestamp - base(), 1.5);
        assert_eq!(line.text, "2022-06-11 10:00:01.500000 rpm=3000");
    }

    #[test]
    fn test_parse_rejects_short_or_malformed_prefix() {
        assert!(LogLine::parse("2022-06-11 10:00", Zone::Utc).is_none());
        assert!(LogLine::parse("2022-13-11 10:00:01.500000 x", Zone::Utc).is_none());
        assert!(LogLine::parse("not a timestamp at all, really", Zone::Utc).is_none());
    }

    #[test]
    fn test_sliding_window_scenario() {
        let mut buf = buffer(
            log_text(&[(1.0, "line1"), (3.0, "line2"), (8.0, "line3")]),
            2,
        );

        buf.update(base() + 0.5).unwrap();
        assert!(buf.is_empty());

        buf.update(base() + 1.0).unwrap();
        assert_eq!(visible(&buf), ["line1"]);

        buf.update(base() + 3.0).unwrap();
        assert_eq!(visible(&buf), ["line1", "line2"]);

        buf.update(base() + 8.0).unwrap();
        assert_eq!(visible(&buf), ["line2", "line3"]);
        assert!(!buf.is_exhausted());

        buf.update(base() + 8.033).unwrap();
        assert_eq!(visible(&buf), ["line3", END_OF_LOG]);
        assert!(buf.is_exhausted());

        buf.update(base() + 100.0).unwrap();
        assert_eq!(visible(&buf), ["line3", END_OF_LOG]);
    }

    #[test]
    fn test_full_consumption_keeps_last_lines() {
        let max = 4;
        let k = 3;
        let entries: Vec<(f64, String)> =
            (0..max + k).map(|i| (i as f64, format!("entry{}", i))).collect();
        let borrowed: Vec<(f64, &str)> = entries.iter().map(|(t, s)| (*t, s.as_str())).collect();
        let mut buf = buffer(log_text(&borrowed), max);

        buf.update(base() + 50.0).unwrap();
        assert_eq!(visible(&buf), ["entry3", "entry4", "entry5", "entry6"]);

        buf.update(base() + 51.0).unwrap();
        assert_eq!(visible(&buf), ["entry4", "entry5", "entry6", END_OF_LOG]);
    }

    #[test]
    fn test_window_stays_ordered_and_bounded() {
        // Irregular spacing with bursts of equal timestamps
        let times: Vec<f64> = (0..200)
            .map(|i| ((i * 37) % 11) as f64 * 0.01 + (i / 3) as f64 * 0.1)
            .scan(0.0_f64, |last, t| {
                *last = last.max(t);
                Some(*last)
            })
            .collect();
        let entries: Vec<(f64, String)> = times.iter().enumerate().map(|(i, t)| (*t, i.to_string())).collect();
        let borrowed: Vec<(f64, &str)> = entries.iter().map(|(t, s)| (*t, s.as_str())).collect();
        let mut buf = buffer(log_text(&borrowed), 5);

        let mut clock = 0.0;
        while clock < 10.0 {
            let now = base() + clock;
            buf.update(now).unwrap();
            assert!(buf.len() <= 5);

            let stamps: Vec<Timestamp> = buf.entries().map(|l| l.timestamp).collect();
            assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
            assert!(stamps.iter().all(|t| *t <= now));
            clock += 1.0 / 30.0;
        }
    }

    #[test]
    fn test_log_starting_after_window_stays_empty() {
        let mut buf = buffer(log_text(&[(60.0, "late"), (61.0, "later")]), 3);
        let mut clock = 0.0;
        while clock < 10.0 {
            buf.update(base() + clock).unwrap();
            assert!(buf.is_empty());
            clock += 0.5;
        }
        assert_eq!(buf.next_timestamp(), Some(base() + 60.0));
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let text = format!("{} ok\ngarbage here\n", stamp(0.0));
        let mut buf = buffer(text, 3);
        let err = buf.update(base() + 1.0).unwrap_err();
        assert!(matches!(
            err,
            crate::VidlogError::Log(LogError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_malformed_first_line_fails_on_open() {
        let result = LogBuffer::new(Cursor::new(b"oops\n".to_vec()), 3, Zone::Utc);
        assert!(result.is_err());
    }

    #[test]
    fn test_decreasing_timestamp_is_fatal() {
        let mut buf = buffer(log_text(&[(2.0, "b"), (1.0, "a")]), 3);
        let err = buf.update(base() + 5.0).unwrap_err();
        assert!(matches!(
            err,
            crate::VidlogError::Log(LogError::OutOfOrder { line: 2, .. })
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let text = format!("\n{} one\n\n   \n{} two\n", stamp(1.0), stamp(2.0));
        let mut buf = buffer(text, 5);
        buf.update(base() + 2.0).unwrap();
        assert_eq!(visible(&buf), ["one", "two"]);
    }

    #[test]
    fn test_empty_log_shows_sentinel() {
        let mut buf = buffer(String::new(), 3);
        assert!(buf.next_timestamp().is_none());
        buf.update(base()).unwrap();
        assert_eq!(visible(&buf), [END_OF_LOG]);
    }

    #[test]
    fn test_open_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, log_text(&[(0.0, "hello")])).unwrap();

        let mut buf = LogBuffer::open(&path, 2, Zone::Utc).unwrap();
        buf.update(base()).unwrap();
        assert_eq!(buf.iter().count(), 1);
        assert!(LogBuffer::open(dir.path().join("missing.log"), 2, Zone::Utc).is_err());
    }
}
