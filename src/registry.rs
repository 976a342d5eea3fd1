//! Extractor Registry (spec §4.1): a static, immutable-after-init map from
//! mime type to handler module, target graph, and content-hash tag.
//!
//! Mirrors the teacher's `DecoderRegistry::with_decoders` / `register`
//! split between bulk construction and individual registration, and its
//! `register_factory` extension point for handlers needing runtime
//! configuration.

use crate::error::ExtractError;
use crate::types::Resource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One format-specific unit of code that consumes a file and yields a
/// resource tree (spec glossary: "Handler / Extractor Module").
#[async_trait]
pub trait ExtractorHandler: Send + Sync {
    /// Human-readable identifier, used in logs and the `ExtractorStats`
    /// accumulator.
    fn name(&self) -> &'static str;

    /// Run the handler against one file. Cancellation-safe: implementors
    /// should check the token at any natural yield point; the engine does
    /// not otherwise guarantee prompt cancellation.
    async fn extract(
        &self,
        url: &str,
        content_id: &str,
        max_text_bytes: usize,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Resource, ExtractError>;
}

/// Constructs handler instances from runtime configuration (spec §4.1's
/// "registry... populated at module-load time", generalized for handlers
/// that need e.g. `max_bytes` at construction rather than call time).
pub trait HandlerFactory: Send + Sync {
    fn kind(&self) -> &'static str;
    fn create(&self, max_text_bytes: usize) -> Arc<dyn ExtractorHandler>;
}

/// One entry in the registry: everything the Extraction Engine needs to
/// dispatch and everything the Decorator needs to commit a result.
#[derive(Clone)]
pub struct RegistryEntry {
    pub handler: Arc<dyn ExtractorHandler>,
    /// Target graph results for this mime type are attached to.
    pub graph: String,
    /// Versioned identifier of the handler; written back to the graph so a
    /// future handler upgrade causes re-extraction.
    pub extractor_hash: String,
    /// RDF types the produced resource must carry, beyond what the
    /// handler itself adds.
    pub advertised_types: Vec<String>,
    /// Soft per-call deadline override, if this handler is known to need
    /// more or less time than the global default.
    pub deadline: Option<Duration>,
}

/// Maps mime type to [`RegistryEntry`]. Constructed once at startup and
/// safe to read from any thread without coordination thereafter (spec
/// §4.1, §5).
pub struct ExtractorRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_entries(entries: Vec<(String, RegistryEntry)>) -> Self {
        let mut registry = Self::new();
        for (mime, entry) in entries {
            registry.register(mime, entry);
        }
        registry
    }

    pub fn register(&mut self, mime_type: String, entry: RegistryEntry) {
        tracing::info!(
            target: "extract_core::registry",
            mime = %mime_type,
            handler = entry.handler.name(),
            graph = %entry.graph,
            hash = %entry.extractor_hash,
            "registered extractor"
        );
        self.entries.insert(mime_type, entry);
    }

    /// Exact-match lookup; no fallback is attempted (spec §4.1: "mime type
    /// resolution is the caller's problem").
    pub fn lookup(&self, mime_type: &str) -> Option<&RegistryEntry> {
        self.entries.get(mime_type)
    }

    /// All mime types this registry has a handler for.
    pub fn mime_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The live mime-type → extractor-hash map (spec §4.1: "the
    /// content-hash tag returned for a mime type is the versioned
    /// identifier of the handler"). Threaded into `GraphStore::
    /// count_unextracted`/`fetch_batch` so a handler upgrade (a changed
    /// hash here) causes previously-processed files to be re-selected,
    /// not just files that were never hashed at all.
    pub fn current_hashes(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(mime, entry)| (mime.clone(), entry.extractor_hash.clone()))
            .collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
