//! Operator-facing console transcript.
//!
//! Every user-visible message is a severity-tagged line on the console sink
//! (stdout in production). Each line is mirrored as a `tracing` event so
//! the structured log (stderr) carries the same narrative. The console
//! remembers the highest severity it has emitted and how many warnings
//! were raised.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "[INFO]",
            Self::Success => "[SUCCESS]",
            Self::Warning => "[WARNING]",
            Self::Error => "[ERROR]",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub type ConsoleSink = Box<dyn Write + Send + Sync>;

pub struct Console {
    sink: ConsoleSink,
    highest: Option<Severity>,
    warnings: usize,
}

impl Console {
    pub fn new(sink: ConsoleSink) -> Self {
        Self {
            sink,
            highest: None,
            warnings: 0,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.emit(Severity::Info, message.as_ref());
    }

    pub fn success(&mut self, message: impl AsRef<str>) {
        self.emit(Severity::Success, message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.emit(Severity::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.emit(Severity::Error, message.as_ref());
    }

    /// Untagged continuation line (command summaries, URLs).
    pub fn line(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.sink, "    {}", message.as_ref());
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.highest
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    fn emit(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Info | Severity::Success => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }

        if severity == Severity::Warning {
            self.warnings += 1;
        }
        self.highest = Some(self.highest.map_or(severity, |h| h.max(severity)));

        // A closed stdout must not turn a healthy deploy into a failure.
        let _ = writeln!(self.sink, "{} {message}", severity.tag());
        let _ = self.sink.flush();
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("highest", &self.highest)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

/// In-memory, cloneable console sink. Handy for capturing the transcript
/// of a run in tests.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<u8>>>);

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for Transcript {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tagged_by_severity() {
        let transcript = Transcript::new();
        let mut console = Console::new(Box::new(transcript.clone()));
        console.info("probing");
        console.success("done");
        console.warn("edit the config");
        console.error("boom");

        let text = transcript.contents();
        assert!(text.contains("[INFO] probing"));
        assert!(text.contains("[SUCCESS] done"));
        assert!(text.contains("[WARNING] edit the config"));
        assert!(text.contains("[ERROR] boom"));
    }

    #[test]
    fn tracks_highest_severity_and_warning_count() {
        let mut console = Console::new(Box::new(Transcript::new()));
        assert_eq!(console.highest_severity(), None);

        console.info("a");
        console.warn("b");
        console.warn("c");
        console.success("d");

        assert_eq!(console.highest_severity(), Some(Severity::Warning));
        assert_eq!(console.warning_count(), 2);
    }
}
