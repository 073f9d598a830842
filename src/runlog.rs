//! Destinations for the human readable log of a backup run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write-once-per-run log destination.
pub trait LogSink {
    /// Appends one line to the log.
    fn append(&mut self, line: &str);

    /// Flushes and closes the log. Later appends are only echoed.
    fn close(&mut self) -> io::Result<()>;
}

/// Line terminator used when echoing to the screen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LineEnd {
    #[default]
    Newline,
    /// For runs triggered through a web wrapper.
    Html,
}

impl LineEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnd::Newline => "\n",
            LineEnd::Html => "<BR/>\n",
        }
    }
}

/// Controls if and how log lines are echoed to stdout.
#[derive(Copy, Clone, Debug, Default)]
pub struct Echo {
    pub enabled: bool,
    pub line_end: LineEnd,
}

impl Echo {
    pub fn new(enabled: bool, line_end: LineEnd) -> Self {
        Self { enabled, line_end }
    }

    pub fn print(&self, line: &str) {
        if self.enabled {
            print!("{line}{}", self.line_end.as_str());
        }
    }
}

/// [LogSink] backed by a log file.
///
/// Every line is also passed to the [log] facade and echoed if enabled.
pub struct RunLog {
    target: String,
    writer: Option<BufWriter<File>>,
    echo: Echo,
}

impl RunLog {
    /// Creates (or truncates) the log file at `path`.
    pub fn create(path: &Path, target: impl Into<String>, echo: Echo) -> io::Result<Self> {
        let file = File::create(path)?;

        Ok(Self {
            target: target.into(),
            writer: Some(BufWriter::new(file)),
            echo,
        })
    }

    /// A log without file, lines only reach the [log] facade and the echo.
    pub fn echo_only(target: impl Into<String>, echo: Echo) -> Self {
        Self {
            target: target.into(),
            writer: None,
            echo,
        }
    }
}

impl LogSink for RunLog {
    fn append(&mut self, line: &str) {
        log::debug!(target: "runlog", "[{}] {line}", self.target);
        self.echo.print(line);

        if let Some(writer) = &mut self.writer {
            if let Err(e) = writeln!(writer, "{line}") {
                log::warn!(target: "runlog", "Writing to the log of '{}' failed, further lines are dropped: {e}", self.target);
                self.writer = None;
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// [LogSink] keeping all lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    lines: Vec<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns if any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemoryLog {
    fn append(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn run_log_writes_lines_until_closed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.log");

        let mut log = RunLog::create(&path, "main", Echo::default()).unwrap();
        log.append("first");
        log.append("second");
        log.close().unwrap();
        log.append("after close");

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn html_line_end() {
        assert_eq!(LineEnd::Html.as_str(), "<BR/>\n");
        assert_eq!(LineEnd::default().as_str(), "\n");
    }
}
