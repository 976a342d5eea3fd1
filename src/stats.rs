//! Per-handler statistics (spec §4.2 bullet 6, §3 "ExtractorStats"):
//! accumulated in memory, emitted as a `tracing` event when a debug flag
//! is set, never consulted for control flow.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct MimeStats {
    pub calls: u64,
    pub failures: u64,
    pub total_elapsed: Duration,
}

/// Accumulator keyed by mime type. Not thread-safe by itself; owned
/// exclusively by the scheduler context, same as every other piece of
/// Decorator state (spec §5).
#[derive(Debug, Clone, Default)]
pub struct ExtractorStats {
    by_mime: HashMap<String, MimeStats>,
}

impl ExtractorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mime_type: &str, elapsed: Duration, succeeded: bool) {
        let entry = self.by_mime.entry(mime_type.to_string()).or_default();
        entry.calls += 1;
        entry.total_elapsed += elapsed;
        if !succeeded {
            entry.failures += 1;
        }
    }

    pub fn get(&self, mime_type: &str) -> Option<&MimeStats> {
        self.by_mime.get(mime_type)
    }

    /// Emit everything accumulated so far as one `tracing` event per mime
    /// type, at debug level (spec §4.2: "these do not influence control
    /// flow").
    pub fn emit(&self) {
        for (mime, stats) in &self.by_mime {
            tracing::debug!(
                target: "extract_core::stats",
                mime = %mime,
                calls = stats.calls,
                failures = stats.failures,
                total_elapsed_ms = stats.total_elapsed.as_millis() as u64,
                "extractor stats"
            );
        }
    }
}
