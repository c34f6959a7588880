//! Diagnostic output for the bus session.
//!
//! Every outcome the session reports goes through a [`Diagnostics`] sink so the
//! binary can route it to `tracing` while tests capture the exact sequence.

use tracing::{error, info, warn};

/// Severity of a diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
    /// User-facing notice written to stdout
    Notice,
}

/// Sink for human-readable session diagnostics.
pub trait Diagnostics: Send + Sync {
    /// Record one line at the given severity.
    fn report(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.report(Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.report(Severity::Warn, message);
    }

    fn error(&self, message: &str) {
        self.report(Severity::Error, message);
    }

    fn notice(&self, message: &str) {
        self.report(Severity::Notice, message);
    }
}

/// Default sink: warnings and status go to the tracing subscriber (stderr),
/// notices go to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
            Severity::Notice => println!("{}", message),
        }
    }
}

/// In-memory sink used by the session tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryDiagnostics {
    lines: std::sync::Mutex<Vec<(Severity, String)>>,
}

#[cfg(test)]
impl MemoryDiagnostics {
    pub(crate) fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Index of the first line containing `needle`.
    pub(crate) fn position(&self, needle: &str) -> Option<usize> {
        self.lines()
            .iter()
            .position(|(_, line)| line.contains(needle))
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }
}

#[cfg(test)]
impl Diagnostics for MemoryDiagnostics {
    fn report(&self, severity: Severity, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}
