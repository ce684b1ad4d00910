//! User-facing progress lines.
//!
//! These are program output, not logs: `[OK]` lines go to the output stream,
//! `[FAIL]` lines to the error stream. Verbose mode prefixes a timestamp and
//! prints transaction boundaries.

use std::io::{self, Write};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

pub struct Reporter {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    verbose: bool,
}

impl Reporter {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, verbose: bool) -> Self {
        Self { out, err, verbose }
    }

    /// Report to stdout/stderr.
    pub fn stdio(verbose: bool) -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), verbose)
    }

    /// Discard everything.
    pub fn silent() -> Self {
        Self::new(Box::new(io::sink()), Box::new(io::sink()), false)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    fn prefix(&self) -> String {
        if self.verbose {
            format!("{} ", Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
        } else {
            String::new()
        }
    }

    pub fn ok(&mut self, filename: &str, elapsed: Duration) {
        let line = format!("{}[OK] {} ({:.2?})", self.prefix(), filename, elapsed);
        let _ = writeln!(self.out, "{}", line);
    }

    pub fn fail(&mut self, filename: &str, elapsed: Duration) {
        let line = format!("{}[FAIL] {} ({:.2?})", self.prefix(), filename, elapsed);
        let _ = writeln!(self.err, "{}", line);
    }

    /// Transaction boundary (`BEGIN`, `COMMIT`, `ROLLBACK`); verbose only.
    pub fn boundary(&mut self, keyword: &str) {
        if self.verbose {
            let line = format!("{}{}", self.prefix(), keyword);
            let _ = writeln!(self.out, "{}", line);
        }
    }

    /// Free-form output line.
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    /// Free-form error line.
    pub fn error_line(&mut self, text: &str) {
        let _ = writeln!(self.err, "{}", text);
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
        let _ = self.err.flush();
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").field("verbose", &self.verbose).finish()
    }
}

/// Shared in-memory buffer, handy for capturing report output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut buf) => buf.extend_from_slice(data),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(data),
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_and_fail_go_to_separate_streams() {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let mut r = Reporter::new(Box::new(out.clone()), Box::new(err.clone()), false);
        r.ok("01.sql", Duration::from_millis(3));
        r.fail("02.sql", Duration::from_millis(4));
        r.boundary("BEGIN");
        assert_eq!(out.contents(), "[OK] 01.sql (3.00ms)\n");
        assert_eq!(err.contents(), "[FAIL] 02.sql (4.00ms)\n");
    }

    #[test]
    fn test_verbose_prefixes_timestamp_and_prints_boundaries() {
        let out = SharedBuffer::new();
        let mut r = Reporter::new(Box::new(out.clone()), Box::new(io::sink()), true);
        r.boundary("COMMIT");
        let text = out.contents();
        assert!(text.ends_with(" COMMIT\n"));
        assert!(text.contains('T') && text.contains('Z'));
    }
}
