//! Raw line storage for one captured log section.
//!
//! The analyzers never read files themselves; they walk a [`Section`] so the
//! same code runs on a bugreport splitter's output, a file on disk or an
//! in-memory fixture.

use std::fs;
use std::io;
use std::path::Path;

/// Read-only, random-access view of a section's lines.
pub trait Section {
    /// Human readable section name, used in log messages.
    fn name(&self) -> &str;

    fn line_count(&self) -> usize;

    /// Line `idx` without its trailing newline, `None` past the end.
    fn line(&self, idx: usize) -> Option<&str>;
}

/// In-memory section.
#[derive(Debug, Clone, Default)]
pub struct LineSection {
    name: String,
    lines: Vec<String>,
}

impl LineSection {
    #[must_use]
    pub fn new(name: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    /// Split `text` into lines, dropping `\r` from CRLF endings.
    #[must_use]
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        let lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        Self::new(name, lines)
    }

    /// Load a whole file. Invalid UTF-8 is replaced rather than rejected,
    /// since device logs regularly carry garbage in task names.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the file cannot be read.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Self::from_text(path.display().to_string(), &text))
    }
}

impl Section for LineSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }
}

/// Lines carrying no data: blank, `#` comments and control-character noise.
#[must_use]
pub fn is_noise(line: &str) -> bool {
    match line.chars().next() {
        None => true,
        Some(c) => c == '#' || c.is_control(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_text_strips_crlf() {
        let section = LineSection::from_text("trace", "a\r\nb\n\nc");
        assert_eq!(section.line_count(), 4);
        assert_eq!(section.line(0), Some("a"));
        assert_eq!(section.line(2), Some(""));
        assert_eq!(section.line(4), None);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# tracer: nop").unwrap();
        writeln!(file, "line").unwrap();

        let section = LineSection::from_file(file.path()).unwrap();
        assert_eq!(section.line_count(), 2);
        assert_eq!(section.line(1), Some("line"));
    }

    #[test]
    fn test_noise_lines() {
        assert!(is_noise(""));
        assert!(is_noise("# tracer: sched_switch"));
        assert!(is_noise("\u{1b}[0m"));
        assert!(!is_noise("  <idle>-0 ..."));
    }
}
